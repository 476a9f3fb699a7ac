//! Request and response bodies exchanged with the sync authority.

use serde::{Deserialize, Serialize};

use crate::Delta;

/// `POST /sync/push` body.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PushRequest {
    pub device_id: String,
    pub deltas: Vec<Delta>,
}

/// Acknowledgement of a push. Ids missing from `acked` stay in the outbox.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushResponse {
    pub acked: Vec<String>,
    pub last_server_seq: i64,
}

/// `GET /sync/pull` query.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PullRequest {
    pub cursor: i64,
    pub device_id: String,
}

/// One page of deltas after a cursor.
///
/// Deltas stay as raw JSON so that a single malformed entry can be isolated
/// without rejecting the whole page.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PullResponse {
    pub deltas: Vec<serde_json::Value>,
    /// New high-water mark.
    pub cursor: i64,
}

/// `POST /auth/login` body.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    #[serde(alias = "owner")]
    pub user_id: String,
}

/// Error body returned by the authority on non-success statuses.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub detail: Option<String>,
}
