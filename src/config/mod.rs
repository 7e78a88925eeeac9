//! Configuration system
//!
//! Loads ~/.config/hive/config.yaml with support for:
//! - HTTP listener settings
//! - Storage backend selection (memory or SQLite)
//! - Request limits, liveness timing and channel retention
//! - `HIVE_*` environment overrides

mod relay_config;
pub mod validation;

pub use relay_config::{
    LimitsConfig, LivenessConfig, RelayConfig, RetentionConfig, ServerConfig, StorageBackend,
    StorageConfig,
};
pub use validation::{validate_config, validate_config_result, ValidationError};
