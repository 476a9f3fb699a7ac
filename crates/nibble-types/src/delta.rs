//! Outbox records and the per-owner sync cursor.

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{EntityKind, ParseTagError};

/// Kind of mutation a delta records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ts_rs::TS)]
#[serde(rename_all = "snake_case")]
pub enum DeltaOp {
    Upsert,
    Delete,
}

impl DeltaOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeltaOp::Upsert => "upsert",
            DeltaOp::Delete => "delete",
        }
    }
}

impl fmt::Display for DeltaOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeltaOp {
    type Err = ParseTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upsert" => Ok(DeltaOp::Upsert),
            "delete" => Ok(DeltaOp::Delete),
            other => Err(ParseTagError {
                kind: "delta op",
                value: other.to_string(),
            }),
        }
    }
}

/// One recorded mutation.
///
/// Immutable once created, except that `sent_at` and `server_seq` are filled
/// in when the authority acknowledges it. Pulled deltas always carry
/// `server_seq`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ts_rs::TS)]
pub struct Delta {
    pub id: String,
    #[serde(alias = "user_id")]
    pub owner: String,
    pub device_id: String,
    #[serde(alias = "entity")]
    pub entity_kind: EntityKind,
    pub entity_id: String,
    pub op: DeltaOp,
    /// Full snapshot of the entity at mutation time.
    #[ts(type = "Record<string, unknown>")]
    pub payload: serde_json::Value,
    #[serde(alias = "ts")]
    pub local_ts: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_seq: Option<i64>,
}

impl Delta {
    /// Decode the payload as a concrete entity snapshot.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        T::deserialize(&self.payload)
    }

    pub fn is_sent(&self) -> bool {
        self.sent_at.is_some()
    }
}

/// Last server sequence a device has applied for one owner.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
pub struct SyncState {
    pub owner: String,
    pub last_server_seq: i64,
}
