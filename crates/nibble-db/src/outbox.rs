//! Outbox recording.
//!
//! Deltas are created only here, as a side effect of an entity write and
//! inside the same transaction.

use nibble_types::{now_ms, Delta, DeltaOp, EntityKind};
use rusqlite::Connection;
use serde::Serialize;

use crate::repo::DeltaLog;
use crate::Result;

/// Record one mutation. Assigns a fresh id and the local timestamp.
pub fn record<T: Serialize>(
    conn: &Connection,
    owner: &str,
    device_id: &str,
    entity_kind: EntityKind,
    entity_id: &str,
    op: DeltaOp,
    payload: &T,
) -> Result<Delta> {
    let delta = Delta {
        id: uuid::Uuid::new_v4().to_string(),
        owner: owner.to_string(),
        device_id: device_id.to_string(),
        entity_kind,
        entity_id: entity_id.to_string(),
        op,
        payload: serde_json::to_value(payload)?,
        local_ts: now_ms(),
        sent_at: None,
        server_seq: None,
    };
    conn.append_delta(&delta)?;
    tracing::debug!(
        delta_id = %delta.id,
        entity = %entity_kind,
        entity_id,
        op = %op,
        "recorded delta"
    );
    Ok(delta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries;

    #[test]
    fn test_record_assigns_unique_ids() {
        let conn = crate::open_memory().expect("open");
        let payload = serde_json::json!({"name": "Gym"});
        let first = record(&conn, "yak", "dev-a", EntityKind::Category, "c1", DeltaOp::Upsert, &payload)
            .expect("record");
        let second = record(&conn, "yak", "dev-a", EntityKind::Category, "c1", DeltaOp::Upsert, &payload)
            .expect("record");

        assert_ne!(first.id, second.id);
        assert!(first.local_ts > 0);
        assert_eq!(queries::deltas::count_unsent(&conn, "yak").expect("count"), 2);
    }
}
