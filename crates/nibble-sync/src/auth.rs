//! Credentials the orchestrator needs: a bearer token and the owner it
//! belongs to.
//!
//! Where they come from (a login exchange, a keychain, a test fixture) is
//! outside the engine. [`SettingsCredentials`] keeps them in the local
//! settings table so the daemon survives restarts signed in.

use std::fmt;

use async_trait::async_trait;
use nibble_db::queries::settings;

use crate::{Result, SharedStore};

/// Settings key holding the bearer token.
pub const TOKEN_KEY: &str = "auth_token";

/// Settings key holding the authenticated owner id.
pub const OWNER_KEY: &str = "auth_owner";

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub token: String,
    pub owner: String,
}

impl Credentials {
    pub fn new(token: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            owner: owner.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &"<redacted>")
            .field("owner", &self.owner)
            .finish()
    }
}

/// Supplies credentials on demand. `None` means signed out.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn credentials(&self) -> Result<Option<Credentials>>;
}

/// Fixed credentials.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials(Option<Credentials>);

impl StaticCredentials {
    pub fn new(credentials: Credentials) -> Self {
        Self(Some(credentials))
    }

    pub fn signed_out() -> Self {
        Self(None)
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn credentials(&self) -> Result<Option<Credentials>> {
        Ok(self.0.clone())
    }
}

/// Credentials persisted in the store's settings table.
#[derive(Clone)]
pub struct SettingsCredentials {
    store: SharedStore,
}

impl SettingsCredentials {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub async fn save(&self, credentials: &Credentials) -> Result<()> {
        let mut store = self.store.lock().await;
        let tx = store.transaction()?;
        settings::set(&tx, TOKEN_KEY, &credentials.token)?;
        settings::set(&tx, OWNER_KEY, &credentials.owner)?;
        tx.commit().map_err(nibble_db::DbError::from)?;
        tracing::info!(owner = %credentials.owner, "credentials saved");
        Ok(())
    }

    pub async fn clear(&self) -> Result<()> {
        let mut store = self.store.lock().await;
        let tx = store.transaction()?;
        settings::remove(&tx, TOKEN_KEY)?;
        settings::remove(&tx, OWNER_KEY)?;
        tx.commit().map_err(nibble_db::DbError::from)?;
        tracing::info!("credentials cleared");
        Ok(())
    }
}

#[async_trait]
impl CredentialProvider for SettingsCredentials {
    async fn credentials(&self) -> Result<Option<Credentials>> {
        let store = self.store.lock().await;
        let token = settings::get_opt(store.conn(), TOKEN_KEY)?;
        let owner = settings::get_opt(store.conn(), OWNER_KEY)?;
        Ok(match (token, owner) {
            (Some(token), Some(owner)) if !token.is_empty() && !owner.is_empty() => {
                Some(Credentials { token, owner })
            }
            _ => None,
        })
    }
}
