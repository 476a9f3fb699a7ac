//! Category command handlers.
//!
//! Writes land in the local store together with their outbox delta and then
//! nudge the scheduler. None of them wait on the network.

use std::sync::Arc;

use nibble_types::{CategoryPatch, NewCategory};
use serde_json::Value;
use tracing::debug;

use super::{decode, decode_patch, owner, require_str, to_value, writer};
use crate::rpc::RpcError;
use crate::DaemonState;

type Result = std::result::Result<Value, RpcError>;

pub async fn create_category(state: &Arc<DaemonState>, params: &Value) -> Result {
    let input: NewCategory = decode(params)?;
    let (owner, device_id) = writer(state).await?;

    let mutation = state
        .store
        .lock()
        .await
        .create_category(&owner, &device_id, input)?;
    debug!(id = %mutation.entity.id, "category created");

    state.scheduler.notify_dirty();
    to_value(&mutation.entity)
}

pub async fn update_category(state: &Arc<DaemonState>, params: &Value) -> Result {
    let id = require_str(params, "id")?;
    let patch: CategoryPatch = decode_patch(params)?;
    let (owner, device_id) = writer(state).await?;

    let mutation = state
        .store
        .lock()
        .await
        .update_category(&owner, &device_id, id, &patch)?;

    state.scheduler.notify_dirty();
    to_value(&mutation.entity)
}

pub async fn delete_category(state: &Arc<DaemonState>, params: &Value) -> Result {
    let id = require_str(params, "id")?;
    let (owner, device_id) = writer(state).await?;

    let mutation = state
        .store
        .lock()
        .await
        .delete_category(&owner, &device_id, id)?;

    state.scheduler.notify_dirty();
    to_value(&mutation.entity)
}

/// Live categories, tombstones excluded.
pub async fn list_categories(state: &Arc<DaemonState>) -> Result {
    let owner = owner(state).await?;
    let categories = state.store.lock().await.list_categories(&owner)?;
    to_value(&categories)
}

pub async fn get_category(state: &Arc<DaemonState>, params: &Value) -> Result {
    let id = require_str(params, "id")?;
    let owner = owner(state).await?;
    let category = state.store.lock().await.get_category(&owner, id)?;
    to_value(&category)
}
