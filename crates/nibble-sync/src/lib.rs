//! # nibble-sync
//!
//! Offline-first synchronization between one owner's devices and the sync
//! authority.
//!
//! ```text
//! Store mutation ──► outbox delta ──► SyncEngine::push ──► authority assigns server_seq
//!                                                              │
//! Store ◄── merge::apply_delta (LWW) ◄── SyncEngine::pull ◄────┘  (cursor advances)
//! ```
//!
//! - [`merge`]: deterministic last-write-wins merge of remote deltas
//! - [`engine`]: push/pull/sync orchestration with the in-flight guard
//! - [`remote`]: the authority contract, an HTTP client and an in-process authority
//! - [`auth`]: bearer token + owner contract
//! - [`scheduler`]: debounced and periodic sync triggering
//! - [`retention`]: purge policy for acknowledged deltas

pub mod auth;
pub mod engine;
pub mod merge;
pub mod remote;
pub mod retention;
pub mod scheduler;

use std::sync::Arc;

use nibble_db::{DbError, Store};

pub use auth::{CredentialProvider, Credentials, SettingsCredentials, StaticCredentials};
pub use engine::{SyncEngine, SyncOptions, SyncReport, SyncStatus};
pub use remote::{HttpRemote, MemoryRemote, RemoteSync};
pub use retention::RetentionPolicy;
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerHandle};

/// The store shared between the orchestrator and local API callers.
pub type SharedStore = Arc<tokio::sync::Mutex<Store>>;

/// Wrap a store for sharing.
pub fn share(store: Store) -> SharedStore {
    Arc::new(tokio::sync::Mutex::new(store))
}

/// Sync failure kinds.
///
/// Any of these leaves the outbox and cursor as they were before the failed
/// step, so the next sync retries safely.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// No token or owner available.
    #[error("not authenticated")]
    AuthenticationMissing,

    /// Transport failure or non-success response.
    #[error("network failure: {0}")]
    Network(String),

    /// Response body could not be understood.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Local write failed and was rolled back.
    #[error("local persistence failed: {0}")]
    Persistence(#[from] DbError),
}

impl SyncError {
    /// Whether retrying later without user action can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Network(_) | SyncError::Persistence(_))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
