//! The sync authority contract.
//!
//! The authority assigns a strictly increasing sequence number to every
//! accepted delta, stores each delta id at most once, and serves an owner's
//! deltas in sequence order after a cursor.

mod http;
mod memory;

use async_trait::async_trait;
use nibble_types::wire::{PullRequest, PullResponse, PushRequest, PushResponse};

use crate::auth::Credentials;
use crate::Result;

pub use http::HttpRemote;
pub use memory::MemoryRemote;

#[async_trait]
pub trait RemoteSync: Send + Sync {
    /// Submit a batch. Only ids in `acked` were durably accepted.
    async fn push(&self, auth: &Credentials, request: &PushRequest) -> Result<PushResponse>;

    /// Fetch the next page after `request.cursor`.
    async fn pull(&self, auth: &Credentials, request: &PullRequest) -> Result<PullResponse>;
}
