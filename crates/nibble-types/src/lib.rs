//! # nibble-types
//!
//! Shared domain and wire types used across the nibble workspace.
//!
//! - All timestamps are Unix epoch milliseconds (`i64`).
//! - Ids are UUIDv4 strings generated by the writing replica.
//! - Entity payloads travel inside [`delta::Delta`] as full JSON snapshots.

pub mod delta;
pub mod entity;
pub mod wire;

pub use delta::{Delta, DeltaOp, SyncState};
pub use entity::{
    Activity, ActivityPatch, Category, CategoryPatch, EntityKind, NewActivity, NewCategory,
};

/// Default page size for list operations when the caller does not supply one.
pub const DEFAULT_LIST_LIMIT: u32 = 100;

/// Maximum number of deltas the authority returns in a single pull page.
pub const PULL_PAGE_LIMIT: usize = 1000;

/// Error raised when a textual tag does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseTagError {
    pub kind: &'static str,
    pub value: String,
}

/// Current wall-clock time in Unix epoch milliseconds.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
