//! Daemon configuration, read from `config.toml` in the data directory.

use std::path::PathBuf;
use std::time::Duration;

use nibble_sync::{RetentionPolicy, SchedulerConfig, SyncOptions};
use serde::{Deserialize, Serialize};

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "NIBBLE_DATA_DIR";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub advanced: AdvancedConfig,
}

/// Sync authority connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_url")]
    pub url: String,
    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Data directory. Empty = platform default.
    #[serde(default)]
    pub data_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Quiet period after a local write before syncing.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Periodic sync interval. 0 disables it.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_push_batch_size")]
    pub push_batch_size: u32,
    #[serde(default = "default_pull_max_pages")]
    pub pull_max_pages: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Age after which acknowledged deltas are purged. 0 = keep forever.
    #[serde(default)]
    pub purge_acked_after_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvancedConfig {
    /// Log level: "trace" | "debug" | "info" | "warn" | "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_server_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_debounce_ms() -> u64 {
    2000
}

fn default_interval_secs() -> u64 {
    300
}

fn default_push_batch_size() -> u32 {
    500
}

fn default_pull_max_pages() -> u32 {
    20
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: default_server_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            interval_secs: default_interval_secs(),
            push_batch_size: default_push_batch_size(),
            pull_max_pages: default_pull_max_pages(),
        }
    }
}

impl Default for AdvancedConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from the default config file location.
    ///
    /// Falls back to defaults if the file does not exist.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();
        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Self::parse(&content)
        } else {
            Ok(Self::default())
        }
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn data_dir(&self) -> PathBuf {
        if self.storage.data_dir.is_empty() {
            Self::default_data_dir()
        } else {
            PathBuf::from(&self.storage.data_dir)
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.timeout_secs.max(1))
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            push_batch_size: self.sync.push_batch_size.max(1),
            pull_max_pages: self.sync.pull_max_pages.max(1),
            retention: RetentionPolicy::from_days(self.retention.purge_acked_after_days),
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            debounce: Duration::from_millis(self.sync.debounce_ms),
            interval: (self.sync.interval_secs > 0)
                .then(|| Duration::from_secs(self.sync.interval_secs)),
        }
    }

    /// Default `tracing` directive for the workspace crates.
    pub fn log_directive(&self) -> String {
        format!("nibble={}", self.advanced.log_level)
    }

    fn config_path() -> PathBuf {
        if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
            return PathBuf::from(dir).join("config.toml");
        }
        Self::default_data_dir().join("config.toml")
    }

    /// Platform-specific default data directory.
    fn default_data_dir() -> PathBuf {
        if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
            return PathBuf::from(dir);
        }
        #[cfg(target_os = "macos")]
        {
            dirs_fallback("Library/Application Support/Nibble")
        }
        #[cfg(target_os = "windows")]
        {
            dirs_fallback("Nibble")
        }
        #[cfg(not(any(target_os = "macos", target_os = "windows")))]
        {
            dirs_fallback(".nibble")
        }
    }
}

/// Fallback home directory resolution.
fn dirs_fallback(subpath: &str) -> PathBuf {
    std::env::var("HOME")
        .map(|h| PathBuf::from(h).join(subpath))
        .unwrap_or_else(|_| PathBuf::from("/tmp/nibble"))
}
