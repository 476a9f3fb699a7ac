//! Activity command handlers.

use std::sync::Arc;

use nibble_types::{ActivityPatch, NewActivity, DEFAULT_LIST_LIMIT};
use serde_json::Value;
use tracing::debug;

use super::{decode, decode_patch, owner, require_str, to_value, writer};
use crate::rpc::RpcError;
use crate::DaemonState;

type Result = std::result::Result<Value, RpcError>;

pub async fn create_activity(state: &Arc<DaemonState>, params: &Value) -> Result {
    let input: NewActivity = decode(params)?;
    let (owner, device_id) = writer(state).await?;

    let mutation = state.store.lock().await.create_activity(
        &owner,
        &device_id,
        &state.app_version,
        input,
    )?;
    debug!(
        id = %mutation.entity.id,
        category = %mutation.entity.category_id,
        "activity logged"
    );

    state.scheduler.notify_dirty();
    to_value(&mutation.entity)
}

pub async fn update_activity(state: &Arc<DaemonState>, params: &Value) -> Result {
    let id = require_str(params, "id")?;
    let patch: ActivityPatch = decode_patch(params)?;
    let (owner, device_id) = writer(state).await?;

    let mutation = state.store.lock().await.update_activity(
        &owner,
        &device_id,
        &state.app_version,
        id,
        &patch,
    )?;

    state.scheduler.notify_dirty();
    to_value(&mutation.entity)
}

pub async fn delete_activity(state: &Arc<DaemonState>, params: &Value) -> Result {
    let id = require_str(params, "id")?;
    let (owner, device_id) = writer(state).await?;

    let mutation = state
        .store
        .lock()
        .await
        .delete_activity(&owner, &device_id, id)?;

    state.scheduler.notify_dirty();
    to_value(&mutation.entity)
}

/// Newest first. Optional `category_id` filter and `limit`.
pub async fn list_activities(state: &Arc<DaemonState>, params: &Value) -> Result {
    let limit = match params.get("limit") {
        None | Some(Value::Null) => DEFAULT_LIST_LIMIT,
        Some(v) => v
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| RpcError::invalid_params("limit must be a non-negative integer"))?,
    };
    let category_id = params.get("category_id").and_then(|v| v.as_str());
    let owner = owner(state).await?;

    let store = state.store.lock().await;
    let activities = match category_id {
        Some(category_id) => store.list_activities_by_category(&owner, category_id, limit)?,
        None => store.list_activities(&owner, limit)?,
    };
    to_value(&activities)
}

pub async fn get_activity(state: &Arc<DaemonState>, params: &Value) -> Result {
    let id = require_str(params, "id")?;
    let owner = owner(state).await?;
    let activity = state.store.lock().await.get_activity(&owner, id)?;
    to_value(&activity)
}
