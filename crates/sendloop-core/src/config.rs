//! Sendloop configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, SendloopError};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SendloopConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl SendloopConfig {
    /// Load config from the default path (~/.sendloop/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SendloopError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| SendloopError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| SendloopError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Sendloop home directory (~/.sendloop).
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".sendloop")
    }
}

/// Scheduler loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Fixed polling cadence. Due-but-not-yet-polled messages wait for the
    /// next tick — no sub-interval precision is guaranteed.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Upper bound on concurrent in-flight deliveries.
    #[serde(default = "default_max_inflight")]
    pub max_inflight: usize,
    /// Deadline for one delivery attempt, session acquisition excluded.
    #[serde(default = "default_delivery_timeout")]
    pub delivery_timeout_secs: u64,
}

fn default_poll_interval() -> u64 { 10 }
fn default_max_inflight() -> usize { 8 }
fn default_delivery_timeout() -> u64 { 120 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            max_inflight: default_max_inflight(),
            delivery_timeout_secs: default_delivery_timeout(),
        }
    }
}

/// Session pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// How long one linking wait may take before `acquire` fails with
    /// `SessionTimeout`.
    #[serde(default = "default_linking_timeout")]
    pub linking_timeout_secs: u64,
    /// Root of the durable per-user session directories. Empty means
    /// `~/.sendloop/sessions`.
    #[serde(default)]
    pub data_dir: String,
}

fn default_linking_timeout() -> u64 { 180 }

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            linking_timeout_secs: default_linking_timeout(),
            data_dir: String::new(),
        }
    }
}

impl SessionConfig {
    /// Resolved session data root.
    pub fn data_dir(&self) -> PathBuf {
        if self.data_dir.is_empty() {
            SendloopConfig::home_dir().join("sessions")
        } else {
            PathBuf::from(&self.data_dir)
        }
    }
}

/// Gateway (HTTP API) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Require the X-Pairing-Code header on API routes.
    #[serde(default)]
    pub require_pairing: bool,
    /// Pairing code; generated at startup when required but empty.
    #[serde(default)]
    pub pairing_code: String,
}

fn default_host() -> String { "127.0.0.1".into() }
fn default_port() -> u16 { 7600 }

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            require_pairing: false,
            pairing_code: String::new(),
        }
    }
}

/// Automation bridge endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Base URL of the local automation bridge process.
    #[serde(default = "default_bridge_url")]
    pub base_url: String,
    /// Per-request HTTP timeout against the bridge.
    #[serde(default = "default_bridge_timeout")]
    pub request_timeout_secs: u64,
}

fn default_bridge_url() -> String { "http://127.0.0.1:7610".into() }
fn default_bridge_timeout() -> u64 { 30 }

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            base_url: default_bridge_url(),
            request_timeout_secs: default_bridge_timeout(),
        }
    }
}

/// Message store backend selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// "sqlite" or "memory".
    #[serde(default = "default_backend")]
    pub backend: String,
    /// SQLite database path. Empty means `~/.sendloop/messages.db`.
    #[serde(default)]
    pub db_path: String,
}

fn default_backend() -> String { "sqlite".into() }

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            db_path: String::new(),
        }
    }
}

impl StoreConfig {
    /// Resolved database path.
    pub fn db_path(&self) -> PathBuf {
        if self.db_path.is_empty() {
            SendloopConfig::home_dir().join("messages.db")
        } else {
            PathBuf::from(&self.db_path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SendloopConfig::default();
        assert_eq!(config.scheduler.poll_interval_secs, 10);
        assert_eq!(config.scheduler.max_inflight, 8);
        assert_eq!(config.session.linking_timeout_secs, 180);
        assert_eq!(config.gateway.port, 7600);
        assert_eq!(config.store.backend, "sqlite");
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: SendloopConfig = toml::from_str(
            r#"
            [scheduler]
            poll_interval_secs = 2

            [gateway]
            port = 9000
            "#,
        )
        .unwrap();
        assert_eq!(config.scheduler.poll_interval_secs, 2);
        assert_eq!(config.scheduler.max_inflight, 8);
        assert_eq!(config.gateway.port, 9000);
        assert_eq!(config.gateway.host, "127.0.0.1");
    }

    #[test]
    fn test_load_from_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = SendloopConfig::default();
        config.scheduler.max_inflight = 3;
        std::fs::write(&path, toml::to_string_pretty(&config).unwrap()).unwrap();

        let loaded = SendloopConfig::load_from(&path).unwrap();
        assert_eq!(loaded.scheduler.max_inflight, 3);
    }
}
