//! Decides when to sync.
//!
//! Writes never touch the network. They hand their dirty signal to the
//! scheduler, which waits for `debounce` of quiet before syncing, also syncs
//! every `interval`, and syncs at once on a manual trigger.

use std::sync::Arc;
use std::time::Duration;

use nibble_types::now_ms;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::engine::{SyncEngine, SyncReport};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub debounce: Duration,
    /// `None` disables periodic sync.
    pub interval: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(2000),
            interval: Some(Duration::from_secs(300)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Dirty,
    Now,
}

/// Outcome of the most recent scheduled sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastSync {
    pub finished_at: i64,
    pub outcome: Result<SyncReport, String>,
}

/// Cheap handle for feeding the scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    triggers: mpsc::UnboundedSender<Trigger>,
    last: watch::Receiver<Option<LastSync>>,
}

impl SchedulerHandle {
    /// Record that the outbox grew.
    pub fn notify_dirty(&self) {
        let _ = self.triggers.send(Trigger::Dirty);
    }

    /// Sync as soon as possible, skipping the debounce.
    pub fn trigger_now(&self) {
        let _ = self.triggers.send(Trigger::Now);
    }

    pub fn last_sync(&self) -> Option<LastSync> {
        self.last.borrow().clone()
    }
}

pub struct Scheduler {
    engine: Arc<SyncEngine>,
    config: SchedulerConfig,
    triggers: mpsc::UnboundedReceiver<Trigger>,
    last: watch::Sender<Option<LastSync>>,
}

impl Scheduler {
    /// Start the scheduler task. It stops when `shutdown` fires or every
    /// handle is dropped.
    pub fn spawn(
        engine: Arc<SyncEngine>,
        config: SchedulerConfig,
        mut shutdown: broadcast::Receiver<()>,
    ) -> (SchedulerHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (last_tx, last_rx) = watch::channel(None);

        let scheduler = Scheduler {
            engine,
            config,
            triggers: rx,
            last: last_tx,
        };
        let task = tokio::spawn(async move {
            tokio::select! {
                _ = scheduler.run() => {}
                _ = shutdown.recv() => debug!("scheduler shutting down"),
            }
        });

        (
            SchedulerHandle {
                triggers: tx,
                last: last_rx,
            },
            task,
        )
    }

    async fn run(mut self) {
        let mut deadline: Option<Instant> = None;
        let mut periodic = self.config.interval.filter(|d| !d.is_zero()).map(|every| {
            let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker
        });

        loop {
            let wait_until = deadline;
            let debounce_elapsed = async move {
                match wait_until {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };
            let tick = async {
                match periodic.as_mut() {
                    Some(ticker) => {
                        ticker.tick().await;
                    }
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                trigger = self.triggers.recv() => match trigger {
                    Some(Trigger::Dirty) => {
                        deadline = Some(Instant::now() + self.config.debounce);
                    }
                    Some(Trigger::Now) => {
                        deadline = None;
                        self.run_once("manual").await;
                    }
                    None => break,
                },
                _ = debounce_elapsed => {
                    deadline = None;
                    self.run_once("debounce").await;
                }
                _ = tick => self.run_once("interval").await,
            }
        }
    }

    async fn run_once(&self, reason: &'static str) {
        let outcome = match self.engine.try_sync().await {
            None => {
                debug!(reason, "sync already in flight");
                return;
            }
            Some(Ok(report)) => {
                info!(
                    reason,
                    pushed = report.pushed,
                    pulled = report.pulled,
                    "scheduled sync finished"
                );
                Ok(report)
            }
            Some(Err(e)) => {
                warn!(
                    reason,
                    error = %e,
                    retryable = e.is_retryable(),
                    "scheduled sync failed"
                );
                Err(e.to_string())
            }
        };

        self.last.send_replace(Some(LastSync {
            finished_at: now_ms(),
            outcome,
        }));
    }
}
