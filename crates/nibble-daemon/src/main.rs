//! nibble-daemon: local-first activity log with background sync.
//!
//! Single OS process running a Tokio async runtime. Clients talk to the
//! daemon via line-delimited JSON-RPC over a Unix socket in the data
//! directory. Every write commits locally first; the scheduler pushes and
//! pulls in the background.

mod commands;
mod config;
mod rpc;

use std::sync::Arc;

use nibble_db::Store;
use nibble_sync::{
    HttpRemote, Scheduler, SchedulerHandle, SettingsCredentials, SharedStore, SyncEngine,
};
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::config::DaemonConfig;
use crate::rpc::RpcServer;

/// Daemon-wide shared state.
pub struct DaemonState {
    /// The local store, shared with the sync engine.
    pub store: SharedStore,
    pub engine: Arc<SyncEngine>,
    /// Authority client, used directly for login.
    pub http: HttpRemote,
    pub credentials: SettingsCredentials,
    pub scheduler: SchedulerHandle,
    /// Stamped on every activity this daemon writes.
    pub app_version: String,
    /// Shutdown signal sender.
    pub shutdown_tx: broadcast::Sender<()>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load config
    let config = DaemonConfig::load()?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(config.log_directive().parse()?),
        )
        .init();

    info!("nibble daemon starting");

    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)?;

    // 2. Open the store
    let db_path = data_dir.join("nibble.db");
    let store = nibble_sync::share(Store::open(&db_path)?);
    let credentials = SettingsCredentials::new(store.clone());

    // 3. Build the engine against the configured authority
    let http = HttpRemote::new(&config.server.url, config.request_timeout())?;
    let engine = Arc::new(SyncEngine::new(
        store.clone(),
        Arc::new(http.clone()),
        Arc::new(credentials.clone()),
        config.sync_options(),
    ));
    info!(
        server = %http.base_url(),
        device_id = %engine.device_id().await?,
        "sync engine ready"
    );

    // 4. Create shutdown channel and start the scheduler
    let (shutdown_tx, _shutdown_rx) = broadcast::channel(1);
    let (scheduler, scheduler_task) = Scheduler::spawn(
        engine.clone(),
        config.scheduler_config(),
        shutdown_tx.subscribe(),
    );

    // 5. Build daemon state
    let state = Arc::new(DaemonState {
        store,
        engine,
        http,
        credentials,
        scheduler,
        app_version: env!("CARGO_PKG_VERSION").to_string(),
        shutdown_tx: shutdown_tx.clone(),
    });

    // Catch up with anything written while the daemon was down
    state.scheduler.trigger_now();

    // 6. Run the RPC server until shutdown
    let socket_path = data_dir.join("nibble.sock");
    let rpc_server = RpcServer::new(state.clone(), socket_path.clone());

    let mut shutdown_rx = shutdown_tx.subscribe();
    tokio::select! {
        result = rpc_server.run() => {
            if let Err(e) = result {
                error!("RPC server error: {}", e);
            }
        }
        _ = shutdown_rx.recv() => {
            info!("Shutdown signal received");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down");
        }
    }

    // Graceful shutdown
    let _ = shutdown_tx.send(());
    if let Err(e) = scheduler_task.await {
        error!("scheduler task failed: {}", e);
    }

    // Clean up socket file
    let _ = std::fs::remove_file(&socket_path);

    info!("Daemon stopped");
    Ok(())
}
