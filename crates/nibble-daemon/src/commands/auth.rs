//! Session command handlers.

use std::sync::Arc;

use nibble_sync::CredentialProvider;
use serde_json::Value;
use tracing::info;

use super::require_str;
use crate::rpc::RpcError;
use crate::DaemonState;

type Result = std::result::Result<Value, RpcError>;

/// Exchange a username and password for a token and persist it.
pub async fn login(state: &Arc<DaemonState>, params: &Value) -> Result {
    let username = require_str(params, "username")?;
    let password = require_str(params, "password")?;

    let credentials = state.http.login(username, password).await?;
    state.credentials.save(&credentials).await?;
    info!(owner = %credentials.owner, "logged in");

    state.scheduler.trigger_now();
    Ok(serde_json::json!({ "owner": credentials.owner }))
}

/// Forget the stored token. Local data stays.
pub async fn logout(state: &Arc<DaemonState>) -> Result {
    state.credentials.clear().await?;
    Ok(serde_json::json!({ "logged_out": true }))
}

pub async fn whoami(state: &Arc<DaemonState>) -> Result {
    let credentials = state.credentials.credentials().await?;
    let device_id = state.engine.device_id().await?;
    Ok(serde_json::json!({
        "owner": credentials.map(|c| c.owner),
        "device_id": device_id,
    }))
}
