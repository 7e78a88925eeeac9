//! Relay configuration file handling
//!
//! Loads ~/.config/hive/config.yaml (or an explicit path), then applies
//! `HIVE_*` environment overrides on top.

use crate::channels::RetentionPolicy;
use crate::directory::LivenessPolicy;
use crate::{RelayError, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// HTTP listener settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Which storage backend to open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Sqlite,
}

impl FromStr for StorageBackend {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "sqlite" => Ok(StorageBackend::Sqlite),
            other => Err(RelayError::Config(format!(
                "unknown storage backend '{}', expected memory or sqlite",
                other
            ))),
        }
    }
}

/// Storage settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,

    /// SQLite database file
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    /// Enable WAL mode for better concurrency
    #[serde(default = "default_true")]
    pub wal_mode: bool,
}

fn default_backend() -> StorageBackend {
    StorageBackend::Sqlite
}

fn default_db_path() -> PathBuf {
    let mut path = config_dir();
    path.push("hive.db");
    path
}

fn default_true() -> bool {
    true
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_db_path(),
            wal_mode: true,
        }
    }
}

/// Request size and paging limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_message_max_bytes")]
    pub message_max_bytes: usize,

    #[serde(default = "default_context_summary_max_chars")]
    pub context_summary_max_chars: usize,

    #[serde(default = "default_poll_limit")]
    pub default_poll_limit: usize,

    #[serde(default = "default_max_poll_limit")]
    pub max_poll_limit: usize,

    #[serde(default = "default_max_lookback_minutes")]
    pub max_lookback_minutes: u32,
}

fn default_message_max_bytes() -> usize {
    10240
}

fn default_context_summary_max_chars() -> usize {
    255
}

fn default_poll_limit() -> usize {
    50
}

fn default_max_poll_limit() -> usize {
    100
}

fn default_max_lookback_minutes() -> u32 {
    1440
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            message_max_bytes: default_message_max_bytes(),
            context_summary_max_chars: default_context_summary_max_chars(),
            default_poll_limit: default_poll_limit(),
            max_poll_limit: default_max_poll_limit(),
            max_lookback_minutes: default_max_lookback_minutes(),
        }
    }
}

/// Heartbeat and eviction timing, in seconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivenessConfig {
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    #[serde(default = "default_stale_threshold")]
    pub stale_threshold_secs: u64,

    #[serde(default = "default_removal_threshold")]
    pub removal_threshold_secs: u64,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Hard-delete inactive agents after this long; disabled when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purge_after_secs: Option<u64>,
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_stale_threshold() -> u64 {
    120
}

fn default_removal_threshold() -> u64 {
    300
}

fn default_sweep_interval() -> u64 {
    60
}

impl LivenessConfig {
    /// Directory policy built from these thresholds
    pub fn policy(&self) -> Result<LivenessPolicy> {
        let policy = LivenessPolicy::new(
            seconds(self.stale_threshold_secs)?,
            seconds(self.removal_threshold_secs)?,
        )?;
        match self.purge_after_secs {
            Some(grace) => policy.with_purge_after(seconds(grace)?),
            None => Ok(policy),
        }
    }

    pub fn heartbeat_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs)
    }
}

fn seconds(secs: u64) -> Result<Duration> {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .ok_or_else(|| RelayError::Config(format!("{} seconds is out of range", secs)))
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_interval(),
            stale_threshold_secs: default_stale_threshold(),
            removal_threshold_secs: default_removal_threshold(),
            sweep_interval_secs: default_sweep_interval(),
            purge_after_secs: None,
        }
    }
}

/// Channel caps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_public_channel_max")]
    pub public_channel_max: usize,

    #[serde(default = "default_dm_channel_max")]
    pub dm_channel_max: usize,
}

fn default_public_channel_max() -> usize {
    1000
}

fn default_dm_channel_max() -> usize {
    500
}

impl RetentionConfig {
    pub fn policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            public_max: self.public_channel_max,
            dm_max: self.dm_channel_max,
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            public_channel_max: default_public_channel_max(),
            dm_channel_max: default_dm_channel_max(),
        }
    }
}

/// Relay configuration
///
/// Represents the complete ~/.config/hive/config.yaml file. Every section
/// and field is optional; missing values take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub liveness: LivenessConfig,

    #[serde(default)]
    pub retention: RetentionConfig,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            limits: LimitsConfig::default(),
            liveness: LivenessConfig::default(),
            retention: RetentionConfig::default(),
            log_level: default_log_level(),
        }
    }
}

fn config_dir() -> PathBuf {
    // Always use ~/.config for consistency across platforms (macOS, Linux)
    let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push(".config");
    path.push("hive");
    path
}

impl RelayConfig {
    /// Defaults with in-memory storage, for tests and throwaway relays
    pub fn in_memory() -> Self {
        let mut config = Self::default();
        config.storage.backend = StorageBackend::Memory;
        config
    }

    /// Load configuration from a specific path
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(RelayError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        tracing::info!(path = %path.display(), "Loading relay configuration");

        let content = fs::read_to_string(path)?;
        let config: Self = if content.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(&content)?
        };

        tracing::debug!(
            backend = ?config.storage.backend,
            port = config.server.port,
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    /// Resolve the effective configuration
    ///
    /// An explicit path must exist. Without one, the default path is used if
    /// present and built-in defaults otherwise. Environment overrides are
    /// applied last.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => {
                let default = Self::default_path();
                if default.exists() {
                    Self::load(&default)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        tracing::info!(path = %path.display(), "Saving relay configuration");

        fs::write(path, self.to_yaml()?)?;
        Ok(())
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Get the default config path (~/.config/hive/config.yaml)
    pub fn default_path() -> PathBuf {
        let mut path = config_dir();
        path.push("config.yaml");
        path
    }

    /// Apply `HIVE_*` variables from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("HIVE_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("HIVE_PORT") {
            self.server.port = parse_override("HIVE_PORT", &port)?;
        }
        if let Some(backend) = lookup("HIVE_STORAGE") {
            self.storage.backend = backend.parse()?;
        }
        if let Some(path) = lookup("HIVE_DB_PATH") {
            self.storage.path = PathBuf::from(path);
        }
        if let Some(secs) = lookup("HIVE_STALE_THRESHOLD") {
            self.liveness.stale_threshold_secs = parse_override("HIVE_STALE_THRESHOLD", &secs)?;
        }
        if let Some(secs) = lookup("HIVE_REMOVAL_THRESHOLD") {
            self.liveness.removal_threshold_secs =
                parse_override("HIVE_REMOVAL_THRESHOLD", &secs)?;
        }
        if let Some(max) = lookup("HIVE_PUBLIC_CHANNEL_MAX") {
            self.retention.public_channel_max = parse_override("HIVE_PUBLIC_CHANNEL_MAX", &max)?;
        }
        if let Some(max) = lookup("HIVE_DM_CHANNEL_MAX") {
            self.retention.dm_channel_max = parse_override("HIVE_DM_CHANNEL_MAX", &max)?;
        }
        if let Some(level) = lookup("HIVE_LOG_LEVEL") {
            self.log_level = level;
        }
        Ok(())
    }
}

fn parse_override<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| RelayError::Config(format!("{} has invalid value '{}'", key, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        assert!(config.storage.path.ends_with(".config/hive/hive.db"));
        assert_eq!(config.limits.message_max_bytes, 10240);
        assert_eq!(config.liveness.stale_threshold_secs, 120);
        assert_eq!(config.liveness.removal_threshold_secs, 300);
        assert_eq!(config.retention.public_channel_max, 1000);
        assert_eq!(config.retention.dm_channel_max, 500);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let config: RelayConfig = serde_yaml::from_str(
            "server:\n  port: 9000\nretention:\n  public_channel_max: 3\n",
        )
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.retention.public_channel_max, 3);
        assert_eq!(config.retention.dm_channel_max, 500);
    }

    #[test]
    fn test_save_and_load() {
        let mut config = RelayConfig::in_memory();
        config.liveness.purge_after_secs = Some(86400);

        let file = NamedTempFile::new().unwrap();
        config.save(file.path()).unwrap();
        let loaded = RelayConfig::load(file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_file() {
        let result = RelayConfig::load("/nonexistent/hive/config.yaml");
        assert!(matches!(result, Err(RelayError::Config(_))));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("HIVE_PORT", "9090"),
            ("HIVE_STORAGE", "memory"),
            ("HIVE_STALE_THRESHOLD", "30"),
            ("HIVE_DM_CHANNEL_MAX", "7"),
        ]
        .into_iter()
        .collect();

        let mut config = RelayConfig::default();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.liveness.stale_threshold_secs, 30);
        assert_eq!(config.retention.dm_channel_max, 7);
    }

    #[test]
    fn test_bad_env_override() {
        let mut config = RelayConfig::default();
        let result = config.apply_overrides(|key| (key == "HIVE_PORT").then(|| "high".to_string()));
        assert!(matches!(result, Err(RelayError::Config(_))));
    }

    #[test]
    fn test_liveness_policy_conversion() {
        let mut liveness = LivenessConfig::default();
        let policy = liveness.policy().unwrap();
        assert_eq!(policy.stale_threshold(), Duration::seconds(120));
        assert_eq!(policy.purge_after(), None);

        liveness.removal_threshold_secs = 60;
        assert!(liveness.policy().is_err());
    }
}
