//! Configuration system for mailslot.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $MAILSLOT_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/mailslot/config.toml
//!   3. ~/.config/mailslot/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MailslotConfig {
    pub store: StoreConfig,
    pub server: ServerSettings,
    pub client: ClientSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory both roles can see (network mount, synced folder).
    pub root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Delay between polls of the inbound objects.
    pub poll_interval_ms: u64,
    /// Hard limit for `run` commands before the process group is killed.
    pub exec_timeout_secs: u64,
    /// Working directory for `run`. None = inherit.
    pub work_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    pub poll_interval_ms: u64,
    /// How long a round-trip waits for a fresh reply.
    pub response_timeout_secs: u64,
    /// Delay between discovery scans while no server is found.
    pub discovery_interval_ms: u64,
    /// Where files fetched with `read` are saved.
    pub download_dir: PathBuf,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: data_dir().join("store"),
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2_000,
            exec_timeout_secs: 10,
            work_dir: None,
        }
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            response_timeout_secs: 30,
            discovery_interval_ms: 2_000,
            download_dir: PathBuf::from("."),
        }
    }
}

impl ServerSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_timeout_secs)
    }
}

impl ClientSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }

    pub fn discovery_interval(&self) -> Duration {
        Duration::from_millis(self.discovery_interval_ms.max(1))
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("mailslot")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("mailslot")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl MailslotConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            MailslotConfig::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("MAILSLOT_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&MailslotConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply MAILSLOT_* overrides. `lookup` is `std::env::var` outside tests.
    /// Unparseable numbers are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("MAILSLOT_STORE__ROOT") {
            self.store.root = PathBuf::from(v);
        }
        if let Some(v) = lookup("MAILSLOT_SERVER__POLL_INTERVAL_MS").and_then(|v| v.parse().ok()) {
            self.server.poll_interval_ms = v;
        }
        if let Some(v) = lookup("MAILSLOT_SERVER__EXEC_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.server.exec_timeout_secs = v;
        }
        if let Some(v) = lookup("MAILSLOT_SERVER__WORK_DIR") {
            self.server.work_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("MAILSLOT_CLIENT__POLL_INTERVAL_MS").and_then(|v| v.parse().ok()) {
            self.client.poll_interval_ms = v;
        }
        if let Some(v) =
            lookup("MAILSLOT_CLIENT__RESPONSE_TIMEOUT_SECS").and_then(|v| v.parse().ok())
        {
            self.client.response_timeout_secs = v;
        }
        if let Some(v) =
            lookup("MAILSLOT_CLIENT__DISCOVERY_INTERVAL_MS").and_then(|v| v.parse().ok())
        {
            self.client.discovery_interval_ms = v;
        }
        if let Some(v) = lookup("MAILSLOT_CLIENT__DOWNLOAD_DIR") {
            self.client.download_dir = PathBuf::from(v);
        }
    }
}
