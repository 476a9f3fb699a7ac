//! IPC command handlers.
//!
//! Each submodule implements the commands for one IPC category.

pub mod activities;
pub mod auth;
pub mod categories;
pub mod sync;

use std::sync::Arc;

use nibble_sync::CredentialProvider;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::rpc::RpcError;
use crate::DaemonState;

fn require_str<'a>(params: &'a Value, key: &str) -> std::result::Result<&'a str, RpcError> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| RpcError::invalid_params(&format!("{key} required")))
}

/// Decode the whole params object into a typed input.
fn decode<T: DeserializeOwned>(params: &Value) -> std::result::Result<T, RpcError> {
    serde_json::from_value(params.clone()).map_err(|e| RpcError::invalid_params(&e.to_string()))
}

/// Decode `params.patch`; an absent patch changes nothing.
fn decode_patch<T: DeserializeOwned + Default>(
    params: &Value,
) -> std::result::Result<T, RpcError> {
    match params.get("patch") {
        Some(patch) => decode(patch),
        None => Ok(T::default()),
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> std::result::Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|e| RpcError::internal_error(&e.to_string()))
}

/// The signed-in owner, or `NOT_AUTHENTICATED`.
async fn owner(state: &Arc<DaemonState>) -> std::result::Result<String, RpcError> {
    state
        .credentials
        .credentials()
        .await?
        .map(|c| c.owner)
        .ok_or_else(RpcError::not_authenticated)
}

/// Owner and device id for a local write.
async fn writer(state: &Arc<DaemonState>) -> std::result::Result<(String, String), RpcError> {
    let owner = owner(state).await?;
    let device_id = state.engine.device_id().await?;
    Ok((owner, device_id))
}
