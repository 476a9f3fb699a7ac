//! JSON-RPC server over a Unix socket.
//!
//! Listens on a Unix domain socket, accepts connections, and dispatches
//! line-delimited JSON-RPC 2.0 calls to the command handlers.

use std::path::PathBuf;
use std::sync::Arc;

use nibble_db::DbError;
use nibble_sync::SyncError;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tracing::{debug, error, info, warn};

use crate::commands;
use crate::DaemonState;

#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    /// Must be "2.0".
    pub jsonrpc: String,
    pub id: serde_json::Value,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// JSON-RPC error object.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RpcError {
    pub code: i32,
    /// Stable error name.
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RpcResponse {
    pub fn success(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: serde_json::Value, error: RpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

impl RpcError {
    // Standard JSON-RPC errors

    /// Parse error (-32700).
    pub fn parse_error() -> Self {
        Self {
            code: -32700,
            message: "PARSE_ERROR".to_string(),
            data: None,
        }
    }

    /// Invalid request (-32600).
    pub fn invalid_request() -> Self {
        Self {
            code: -32600,
            message: "INVALID_REQUEST".to_string(),
            data: None,
        }
    }

    /// Method not found (-32601).
    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: "METHOD_NOT_FOUND".to_string(),
            data: Some(serde_json::json!({"method": method})),
        }
    }

    /// Invalid params (-32602).
    pub fn invalid_params(detail: &str) -> Self {
        Self {
            code: -32602,
            message: "INVALID_PARAMS".to_string(),
            data: Some(serde_json::json!({"detail": detail})),
        }
    }

    /// Internal error (-32603).
    pub fn internal_error(detail: &str) -> Self {
        Self {
            code: -32603,
            message: "INTERNAL_ERROR".to_string(),
            data: Some(serde_json::json!({"detail": detail})),
        }
    }

    // Application errors

    /// Entity not found (-32004).
    pub fn not_found(detail: &str) -> Self {
        Self {
            code: -32004,
            message: "NOT_FOUND".to_string(),
            data: Some(serde_json::json!({"detail": detail})),
        }
    }

    /// No credentials (-32020).
    pub fn not_authenticated() -> Self {
        Self {
            code: -32020,
            message: "NOT_AUTHENTICATED".to_string(),
            data: None,
        }
    }

    /// Sync or login round-trip failed (-32021).
    pub fn sync_failed(detail: &str, retryable: bool) -> Self {
        Self {
            code: -32021,
            message: "SYNC_FAILED".to_string(),
            data: Some(serde_json::json!({"detail": detail, "retryable": retryable})),
        }
    }
}

impl From<DbError> for RpcError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::NotFound(what) => RpcError::not_found(&what),
            DbError::Constraint(detail) => RpcError::invalid_params(&detail),
            other => RpcError::internal_error(&other.to_string()),
        }
    }
}

impl From<SyncError> for RpcError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::AuthenticationMissing => RpcError::not_authenticated(),
            SyncError::Persistence(db) => db.into(),
            other => RpcError::sync_failed(&other.to_string(), other.is_retryable()),
        }
    }
}

pub struct RpcServer {
    state: Arc<DaemonState>,
    socket_path: PathBuf,
}

impl RpcServer {
    pub fn new(state: Arc<DaemonState>, socket_path: PathBuf) -> Self {
        Self { state, socket_path }
    }

    /// Run the server, accepting connections.
    pub async fn run(&self) -> anyhow::Result<()> {
        // Remove stale socket file
        let _ = std::fs::remove_file(&self.socket_path);

        let listener = UnixListener::bind(&self.socket_path)?;
        info!("IPC server listening on {:?}", self.socket_path);

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let state = self.state.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(state, stream).await {
                            warn!("Connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }
    }
}

async fn handle_connection(
    state: Arc<DaemonState>,
    stream: tokio::net::UnixStream,
) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            break; // EOF
        }
        if line.trim().is_empty() {
            continue;
        }

        let response = handle_line(&state, &line).await;

        let mut response_json = serde_json::to_string(&response)?;
        response_json.push('\n');
        writer.write_all(response_json.as_bytes()).await?;
        writer.flush().await?;
    }

    Ok(())
}

/// Parse and dispatch one request line.
pub async fn handle_line(state: &Arc<DaemonState>, line: &str) -> RpcResponse {
    match serde_json::from_str::<RpcRequest>(line) {
        Ok(request) if request.jsonrpc == "2.0" => dispatch_request(state, request).await,
        Ok(request) => RpcResponse::error(request.id, RpcError::invalid_request()),
        Err(_) => RpcResponse::error(serde_json::Value::Null, RpcError::parse_error()),
    }
}

async fn dispatch_request(state: &Arc<DaemonState>, request: RpcRequest) -> RpcResponse {
    let id = request.id.clone();
    let method = request.method.as_str();
    let params = &request.params;

    debug!("Dispatching RPC method: {}", method);

    let result = match method {
        // Session
        "login" => commands::auth::login(state, params).await,
        "logout" => commands::auth::logout(state).await,
        "whoami" => commands::auth::whoami(state).await,

        // Categories
        "create_category" => commands::categories::create_category(state, params).await,
        "update_category" => commands::categories::update_category(state, params).await,
        "delete_category" => commands::categories::delete_category(state, params).await,
        "list_categories" => commands::categories::list_categories(state).await,
        "get_category" => commands::categories::get_category(state, params).await,

        // Activities
        "create_activity" => commands::activities::create_activity(state, params).await,
        "update_activity" => commands::activities::update_activity(state, params).await,
        "delete_activity" => commands::activities::delete_activity(state, params).await,
        "list_activities" => commands::activities::list_activities(state, params).await,
        "get_activity" => commands::activities::get_activity(state, params).await,

        // Sync
        "sync_now" => commands::sync::sync_now(state).await,
        "sync_status" => commands::sync::sync_status(state).await,
        "list_quarantined" => commands::sync::list_quarantined(state).await,
        "retry_quarantined" => commands::sync::retry_quarantined(state).await,

        // Daemon
        "shutdown" => shutdown(state),

        _ => Err(RpcError::method_not_found(method)),
    };

    match result {
        Ok(value) => RpcResponse::success(id, value),
        Err(err) => RpcResponse::error(id, err),
    }
}

/// Ask the daemon to stop. The main loop and the scheduler both listen.
fn shutdown(state: &Arc<DaemonState>) -> std::result::Result<serde_json::Value, RpcError> {
    info!("Shutdown requested over RPC");
    let _ = state.shutdown_tx.send(());
    Ok(serde_json::json!({ "shutting_down": true }))
}
