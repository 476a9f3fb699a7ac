//! Sync orchestration: push the outbox, then pull and merge remote deltas.
//!
//! Store locks are never held across a network call. Each pulled page is
//! applied in one transaction together with the cursor advance, so a failure
//! mid-page leaves both the entities and the cursor as they were.

use std::collections::HashSet;
use std::sync::Arc;

use nibble_db::queries::quarantine::{self, QuarantineRow};
use nibble_db::{CursorRepo, Store};
use nibble_types::wire::{PullRequest, PullResponse, PushRequest};
use nibble_types::{now_ms, Delta};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::auth::{CredentialProvider, Credentials};
use crate::merge::{self, ApplyError, MergeOutcome};
use crate::remote::RemoteSync;
use crate::retention::RetentionPolicy;
use crate::{Result, SharedStore, SyncError};

/// Tuning knobs for a [`SyncEngine`].
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Deltas per push request.
    pub push_batch_size: u32,
    /// Upper bound on pull round-trips per sync.
    pub pull_max_pages: u32,
    pub retention: RetentionPolicy,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            push_batch_size: 500,
            pull_max_pages: 20,
            retention: RetentionPolicy::keep_forever(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PushReport {
    /// Deltas newly marked sent.
    pub pushed: usize,
    pub batches: usize,
    /// Whether unsent deltas were left behind by a partial ack.
    pub incomplete: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PullReport {
    /// Deltas received from the authority.
    pub pulled: usize,
    /// Deltas that changed a local row.
    pub applied: usize,
    /// Deltas that lost the merge or were already present.
    pub skipped: usize,
    pub quarantined: usize,
    pub cursor: i64,
}

impl PullReport {
    fn absorb(&mut self, page: &PullReport) {
        self.pulled += page.pulled;
        self.applied += page.applied;
        self.skipped += page.skipped;
        self.quarantined += page.quarantined;
        self.cursor = page.cursor;
    }
}

/// Summary of one successful `sync()`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub pushed: usize,
    pub pulled: usize,
    pub applied: usize,
    pub skipped: usize,
    pub quarantined: usize,
    pub cursor: i64,
    /// Acknowledged deltas removed by the retention policy.
    pub purged: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub owner: String,
    pub device_id: String,
    pub cursor: i64,
    pub unsent: u64,
    pub quarantined: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetryReport {
    pub applied: usize,
    pub remaining: usize,
}

pub struct SyncEngine {
    store: SharedStore,
    remote: Arc<dyn RemoteSync>,
    credentials: Arc<dyn CredentialProvider>,
    options: SyncOptions,
    in_flight: tokio::sync::Mutex<()>,
}

impl SyncEngine {
    pub fn new(
        store: SharedStore,
        remote: Arc<dyn RemoteSync>,
        credentials: Arc<dyn CredentialProvider>,
        options: SyncOptions,
    ) -> Self {
        Self {
            store,
            remote,
            credentials,
            options,
            in_flight: tokio::sync::Mutex::new(()),
        }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Stable per-installation device id.
    pub async fn device_id(&self) -> Result<String> {
        Ok(self.store.lock().await.device_id()?)
    }

    async fn require_credentials(&self) -> Result<Credentials> {
        self.credentials
            .credentials()
            .await?
            .ok_or(SyncError::AuthenticationMissing)
    }

    /// Drain the outbox to the authority.
    pub async fn push(&self) -> Result<PushReport> {
        let _guard = self.in_flight.lock().await;
        let credentials = self.require_credentials().await?;
        let device_id = self.device_id().await?;
        self.push_outbox(&credentials, &device_id).await
    }

    /// Fetch and merge everything after the cursor.
    pub async fn pull(&self) -> Result<PullReport> {
        let _guard = self.in_flight.lock().await;
        let credentials = self.require_credentials().await?;
        let device_id = self.device_id().await?;
        self.pull_pages(&credentials, &device_id).await
    }

    /// Push, then pull. Waits for any sync already in flight.
    pub async fn sync(&self) -> Result<SyncReport> {
        let _guard = self.in_flight.lock().await;
        self.run_sync().await
    }

    /// Like [`sync`](Self::sync), but returns `None` immediately if one is
    /// already running.
    pub async fn try_sync(&self) -> Option<Result<SyncReport>> {
        let _guard = self.in_flight.try_lock().ok()?;
        Some(self.run_sync().await)
    }

    async fn run_sync(&self) -> Result<SyncReport> {
        let credentials = self.require_credentials().await?;
        let device_id = self.device_id().await?;
        self.store
            .lock()
            .await
            .init_sync_state(&credentials.owner)?;

        let push = self.push_outbox(&credentials, &device_id).await?;
        let pull = match self.pull_pages(&credentials, &device_id).await {
            Ok(pull) => pull,
            Err(e) => {
                warn!(
                    pushed = push.pushed,
                    error = %e,
                    "pull failed after push; acknowledged deltas stay sent"
                );
                return Err(e);
            }
        };

        let purged = self.enforce_retention(&credentials.owner).await?;

        let report = SyncReport {
            pushed: push.pushed,
            pulled: pull.pulled,
            applied: pull.applied,
            skipped: pull.skipped,
            quarantined: pull.quarantined,
            cursor: pull.cursor,
            purged,
        };
        info!(
            owner = %credentials.owner,
            pushed = report.pushed,
            pulled = report.pulled,
            applied = report.applied,
            quarantined = report.quarantined,
            cursor = report.cursor,
            "sync complete"
        );
        Ok(report)
    }

    async fn push_outbox(&self, credentials: &Credentials, device_id: &str) -> Result<PushReport> {
        let mut report = PushReport::default();

        loop {
            let batch = self
                .store
                .lock()
                .await
                .unsent(&credentials.owner, Some(self.options.push_batch_size))?;
            if batch.is_empty() {
                break;
            }

            let request = PushRequest {
                device_id: device_id.to_string(),
                deltas: batch,
            };
            let response = self.remote.push(credentials, &request).await?;

            let sent: HashSet<&str> = request.deltas.iter().map(|d| d.id.as_str()).collect();
            let acked: HashSet<&str> = response
                .acked
                .iter()
                .map(String::as_str)
                .filter(|id| sent.contains(id))
                .collect();
            let acked: Vec<String> = acked.into_iter().map(str::to_string).collect();

            let marked = self
                .store
                .lock()
                .await
                .mark_sent(&acked, response.last_server_seq)?;
            report.pushed += marked;
            report.batches += 1;
            info!(
                sent = request.deltas.len(),
                acked = acked.len(),
                last_server_seq = response.last_server_seq,
                "push batch acknowledged"
            );

            if acked.len() < request.deltas.len() {
                warn!(
                    missing = request.deltas.len() - acked.len(),
                    "authority did not acknowledge every delta; remainder retried next sync"
                );
                report.incomplete = true;
                break;
            }
        }

        Ok(report)
    }

    async fn pull_pages(&self, credentials: &Credentials, device_id: &str) -> Result<PullReport> {
        let mut report = PullReport {
            cursor: self.store.lock().await.cursor(&credentials.owner)?,
            ..PullReport::default()
        };

        for _ in 0..self.options.pull_max_pages.max(1) {
            let request = PullRequest {
                cursor: report.cursor,
                device_id: device_id.to_string(),
            };
            let response = self.remote.pull(credentials, &request).await?;
            let fetched = response.deltas.len();

            let page = {
                let mut store = self.store.lock().await;
                apply_page(&mut store, &credentials.owner, report.cursor, response)?
            };
            let advanced = page.cursor > report.cursor;
            report.absorb(&page);
            info!(
                pulled = page.pulled,
                applied = page.applied,
                quarantined = page.quarantined,
                cursor = page.cursor,
                "pull page applied"
            );

            if fetched == 0 || !advanced {
                break;
            }
        }

        Ok(report)
    }

    async fn enforce_retention(&self, owner: &str) -> Result<usize> {
        let Some(cutoff) = self.options.retention.cutoff(now_ms()) else {
            return Ok(0);
        };
        Ok(self.store.lock().await.purge_acknowledged(owner, cutoff)?)
    }

    /// Cursor, outbox and quarantine sizes for the signed-in owner.
    pub async fn status(&self) -> Result<SyncStatus> {
        let credentials = self.require_credentials().await?;
        let store = self.store.lock().await;
        Ok(SyncStatus {
            device_id: store.device_id()?,
            cursor: store.cursor(&credentials.owner)?,
            unsent: store.unsent_count(&credentials.owner)?,
            quarantined: store.quarantined_count(&credentials.owner)?,
            owner: credentials.owner,
        })
    }

    pub async fn quarantined(&self) -> Result<Vec<QuarantineRow>> {
        let credentials = self.require_credentials().await?;
        Ok(self.store.lock().await.quarantined(&credentials.owner)?)
    }

    /// Re-attempt quarantined deltas, removing the ones that now apply.
    pub async fn retry_quarantined(&self) -> Result<RetryReport> {
        let _guard = self.in_flight.lock().await;
        let credentials = self.require_credentials().await?;
        let mut store = self.store.lock().await;
        let rows = store.quarantined(&credentials.owner)?;

        let tx = store.transaction()?;
        let mut report = RetryReport::default();
        for row in rows {
            let raw: Value = match serde_json::from_str(&row.raw) {
                Ok(raw) => raw,
                Err(_) => {
                    report.remaining += 1;
                    continue;
                }
            };
            match apply_raw(&tx, &credentials.owner, &raw) {
                Ok(_) => {
                    quarantine::remove(&tx, row.id)?;
                    report.applied += 1;
                }
                Err(ApplyError::Malformed(reason)) => {
                    debug!(id = row.id, %reason, "quarantined delta still rejected");
                    report.remaining += 1;
                }
                Err(ApplyError::Persistence(e)) => return Err(e.into()),
            }
        }
        tx.commit().map_err(nibble_db::DbError::from)?;

        info!(
            applied = report.applied,
            remaining = report.remaining,
            "retried quarantined deltas"
        );
        Ok(report)
    }
}

/// Apply one pulled page and advance the cursor, atomically.
fn apply_page(
    store: &mut Store,
    owner: &str,
    cursor: i64,
    page: PullResponse,
) -> Result<PullReport> {
    let tx = store.transaction()?;
    let received_at = now_ms();
    let mut report = PullReport {
        pulled: page.deltas.len(),
        cursor,
        ..PullReport::default()
    };

    for raw in &page.deltas {
        match apply_raw(&tx, owner, raw) {
            Ok(outcome) if outcome.changed() => report.applied += 1,
            Ok(_) => report.skipped += 1,
            Err(ApplyError::Malformed(reason)) => {
                let server_seq = raw.get("server_seq").and_then(Value::as_i64);
                let delta_id = raw.get("id").and_then(Value::as_str);
                warn!(?server_seq, ?delta_id, %reason, "quarantining pulled delta");
                quarantine::insert(
                    &tx,
                    owner,
                    server_seq,
                    delta_id,
                    &raw.to_string(),
                    &reason,
                    received_at,
                )?;
                report.quarantined += 1;
            }
            Err(ApplyError::Persistence(e)) => return Err(SyncError::Persistence(e)),
        }
    }

    if page.cursor > cursor && tx.advance_cursor(owner, page.cursor)? {
        report.cursor = page.cursor;
    }
    tx.commit().map_err(nibble_db::DbError::from)?;

    Ok(report)
}

/// Decode a pulled delta envelope, check it belongs to `owner`, and merge it.
fn apply_raw(
    conn: &Connection,
    owner: &str,
    raw: &Value,
) -> std::result::Result<MergeOutcome, ApplyError> {
    let delta =
        Delta::deserialize(raw).map_err(|e| ApplyError::Malformed(format!("envelope: {e}")))?;

    if delta.server_seq.is_none() {
        return Err(ApplyError::Malformed("missing server_seq".into()));
    }
    if delta.owner != owner {
        return Err(ApplyError::Malformed(format!(
            "delta belongs to owner '{}'",
            delta.owner
        )));
    }

    let outcome = merge::apply_delta(conn, &delta)?;
    debug!(
        delta_id = %delta.id,
        kind = %delta.entity_kind,
        entity_id = %delta.entity_id,
        ?outcome,
        "applied remote delta"
    );
    Ok(outcome)
}
