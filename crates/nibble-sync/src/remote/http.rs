//! HTTP client for the sync authority.
//!
//! | Operation | Request |
//! |-----------|---------|
//! | login | `POST /auth/login` |
//! | push | `POST /sync/push` |
//! | pull | `GET /sync/pull?cursor=&device_id=` |

use std::time::Duration;

use async_trait::async_trait;
use nibble_types::wire::{
    ErrorBody, LoginRequest, LoginResponse, PullRequest, PullResponse, PushRequest, PushResponse,
};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::RemoteSync;
use crate::auth::Credentials;
use crate::{Result, SyncError};

#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRemote {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Exchange a username and password for credentials.
    pub async fn login(&self, username: &str, password: &str) -> Result<Credentials> {
        let response = self
            .client
            .post(self.url("/auth/login"))
            .json(&LoginRequest {
                username: username.to_string(),
                password: password.to_string(),
            })
            .send()
            .await
            .map_err(|e| SyncError::Network(e.to_string()))?;

        let body: LoginResponse = decode(response).await?;
        Ok(Credentials::new(body.token, body.user_id))
    }
}

/// Map a response to its body, or to a network error carrying the status and
/// the authority's `detail` message.
async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    let bytes = response
        .bytes()
        .await
        .map_err(|e| SyncError::Network(e.to_string()))?;

    if !status.is_success() {
        let detail = serde_json::from_slice::<ErrorBody>(&bytes)
            .ok()
            .and_then(|body| body.detail)
            .unwrap_or_else(|| String::from_utf8_lossy(&bytes).into_owned());
        return Err(SyncError::Network(format!("HTTP {}: {}", status.as_u16(), detail)));
    }

    serde_json::from_slice(&bytes)
        .map_err(|e| SyncError::Protocol(format!("unexpected response body: {e}")))
}

#[async_trait]
impl RemoteSync for HttpRemote {
    async fn push(&self, auth: &Credentials, request: &PushRequest) -> Result<PushResponse> {
        debug!(count = request.deltas.len(), "pushing deltas");
        let response = self
            .client
            .post(self.url("/sync/push"))
            .bearer_auth(&auth.token)
            .json(request)
            .send()
            .await
            .map_err(|e| SyncError::Network(e.to_string()))?;

        decode(response).await
    }

    async fn pull(&self, auth: &Credentials, request: &PullRequest) -> Result<PullResponse> {
        debug!(cursor = request.cursor, "pulling deltas");
        let response = self
            .client
            .get(self.url("/sync/pull"))
            .bearer_auth(&auth.token)
            .query(request)
            .send()
            .await
            .map_err(|e| SyncError::Network(e.to_string()))?;

        decode(response).await
    }
}
