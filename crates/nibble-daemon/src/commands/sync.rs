//! Sync command handlers.

use std::sync::Arc;

use nibble_db::queries::quarantine::QuarantineRow;
use serde_json::Value;
use tracing::info;

use super::to_value;
use crate::rpc::RpcError;
use crate::DaemonState;

type Result = std::result::Result<Value, RpcError>;

/// Push then pull, waiting for any scheduled sync already running.
pub async fn sync_now(state: &Arc<DaemonState>) -> Result {
    let report = state.engine.sync().await?;
    info!(
        pushed = report.pushed,
        pulled = report.pulled,
        cursor = report.cursor,
        "manual sync finished"
    );
    to_value(&report)
}

pub async fn sync_status(state: &Arc<DaemonState>) -> Result {
    let status = state.engine.status().await?;
    let last_sync = state.scheduler.last_sync().map(|last| match last.outcome {
        Ok(report) => serde_json::json!({
            "finished_at": last.finished_at,
            "ok": true,
            "report": report,
        }),
        Err(error) => serde_json::json!({
            "finished_at": last.finished_at,
            "ok": false,
            "error": error,
        }),
    });

    let mut value = to_value(&status)?;
    value["last_sync"] = last_sync.unwrap_or(Value::Null);
    Ok(value)
}

fn quarantine_json(row: &QuarantineRow) -> Value {
    serde_json::json!({
        "id": row.id,
        "server_seq": row.server_seq,
        "delta_id": row.delta_id,
        "raw": row.raw,
        "error": row.error,
        "received_at": row.received_at,
    })
}

pub async fn list_quarantined(state: &Arc<DaemonState>) -> Result {
    let rows = state.engine.quarantined().await?;
    Ok(Value::Array(rows.iter().map(quarantine_json).collect()))
}

pub async fn retry_quarantined(state: &Arc<DaemonState>) -> Result {
    let report = state.engine.retry_quarantined().await?;
    to_value(&report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{categories, testing};
    use serde_json::json;

    #[tokio::test]
    async fn test_sync_now_pushes_outbox() {
        let (state, remote) = testing::signed_in_state().await;
        categories::create_category(&state, &json!({"name": "Gym"}))
            .await
            .expect("create");

        let report = sync_now(&state).await.expect("sync");
        assert_eq!(report["pushed"], 1);
        assert_eq!(remote.stored_count().await, 1);

        let status = sync_status(&state).await.expect("status");
        assert_eq!(status["owner"], "yak");
        assert_eq!(status["unsent"], 0);
        assert!(status["cursor"].as_i64().is_some_and(|c| c >= 1));
    }

    #[tokio::test]
    async fn test_sync_now_reports_network_failure() {
        let (state, remote) = testing::signed_in_state().await;
        categories::create_category(&state, &json!({"name": "Gym"}))
            .await
            .expect("create");
        remote.fail_next_push().await;

        let err = sync_now(&state).await.expect_err("push fails");
        assert_eq!(err.code, -32021);

        let status = sync_status(&state).await.expect("status");
        assert_eq!(status["unsent"], 1);
    }

    #[tokio::test]
    async fn test_sync_requires_login() {
        let (state, _remote) = testing::state().await;
        assert_eq!(sync_now(&state).await.expect_err("signed out").code, -32020);
        assert_eq!(
            sync_status(&state).await.expect_err("signed out").code,
            -32020
        );
    }

    #[tokio::test]
    async fn test_quarantine_listing_and_retry() {
        let (state, remote) = testing::signed_in_state().await;
        remote
            .inject_raw("yak", json!({"id": "bad", "entity_kind": "widget"}))
            .await;

        let report = sync_now(&state).await.expect("sync");
        assert_eq!(report["quarantined"], 1);

        let listed = list_quarantined(&state).await.expect("list");
        let rows = listed.as_array().expect("array");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["delta_id"], "bad");

        let retried = retry_quarantined(&state).await.expect("retry");
        assert_eq!(retried["applied"], 0);
        assert_eq!(retried["remaining"], 1);
    }
}
