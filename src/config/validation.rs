//! Configuration validation
//!
//! Validates relay configuration for correctness:
//! - Removal threshold strictly greater than stale threshold
//! - Positive intervals, caps and limits
//! - Poll limits consistent with each other
//! - Purge grace (if any) longer than the removal threshold

use super::relay_config::RelayConfig;
use crate::RelayError;

/// Validation error details
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validation result
pub type ValidationResult = std::result::Result<(), Vec<ValidationError>>;

/// Validate a relay configuration
pub fn validate_config(config: &RelayConfig) -> ValidationResult {
    let mut errors = Vec::new();

    if config.server.port == 0 {
        errors.push(ValidationError::new(
            "server.port",
            "Port must be greater than 0",
        ));
    }

    let liveness = &config.liveness;
    for (field, value) in [
        ("liveness.heartbeat_interval_secs", liveness.heartbeat_interval_secs),
        ("liveness.stale_threshold_secs", liveness.stale_threshold_secs),
        ("liveness.sweep_interval_secs", liveness.sweep_interval_secs),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "Must be greater than 0"));
        }
    }

    if liveness.removal_threshold_secs <= liveness.stale_threshold_secs {
        errors.push(ValidationError::new(
            "liveness.removal_threshold_secs",
            format!(
                "Must be greater than stale_threshold_secs ({})",
                liveness.stale_threshold_secs
            ),
        ));
    }

    if let Some(grace) = liveness.purge_after_secs {
        if grace <= liveness.removal_threshold_secs {
            errors.push(ValidationError::new(
                "liveness.purge_after_secs",
                format!(
                    "Must be greater than removal_threshold_secs ({})",
                    liveness.removal_threshold_secs
                ),
            ));
        }
    }

    let retention = &config.retention;
    if retention.public_channel_max == 0 {
        errors.push(ValidationError::new(
            "retention.public_channel_max",
            "Channel cap must be at least 1",
        ));
    }
    if retention.dm_channel_max == 0 {
        errors.push(ValidationError::new(
            "retention.dm_channel_max",
            "Channel cap must be at least 1",
        ));
    }

    let limits = &config.limits;
    if limits.message_max_bytes == 0 {
        errors.push(ValidationError::new(
            "limits.message_max_bytes",
            "Must be greater than 0",
        ));
    }
    if limits.max_poll_limit == 0 {
        errors.push(ValidationError::new(
            "limits.max_poll_limit",
            "Must be greater than 0",
        ));
    }
    if limits.default_poll_limit == 0 || limits.default_poll_limit > limits.max_poll_limit {
        errors.push(ValidationError::new(
            "limits.default_poll_limit",
            format!("Must be between 1 and max_poll_limit ({})", limits.max_poll_limit),
        ));
    }

    let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
    if !valid_levels.contains(&config.log_level.to_ascii_lowercase().as_str()) {
        errors.push(ValidationError::new(
            "log_level",
            format!(
                "Invalid level '{}'. Must be one of: {}",
                config.log_level,
                valid_levels.join(", ")
            ),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate configuration and return a crate Result
pub fn validate_config_result(config: &RelayConfig) -> crate::Result<()> {
    validate_config(config).map_err(|errors| {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        RelayError::Config(format!(
            "Configuration validation failed:\n  - {}",
            messages.join("\n  - ")
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config() {
        assert!(validate_config(&RelayConfig::default()).is_ok());
    }

    #[test]
    fn test_removal_must_exceed_stale() {
        let mut config = RelayConfig::default();
        config.liveness.removal_threshold_secs = config.liveness.stale_threshold_secs;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "liveness.removal_threshold_secs");
    }

    #[test]
    fn test_zero_caps_and_limits() {
        let mut config = RelayConfig::default();
        config.retention.public_channel_max = 0;
        config.retention.dm_channel_max = 0;
        config.limits.default_poll_limit = 500;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "retention.public_channel_max",
                "retention.dm_channel_max",
                "limits.default_poll_limit",
            ]
        );
    }

    #[test]
    fn test_purge_grace_and_log_level() {
        let mut config = RelayConfig::default();
        config.liveness.purge_after_secs = Some(10);
        config.log_level = "loud".to_string();

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_validate_config_result_joins_messages() {
        let mut config = RelayConfig::default();
        config.server.port = 0;
        config.liveness.sweep_interval_secs = 0;

        let err = validate_config_result(&config).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("server.port"));
        assert!(message.contains("liveness.sweep_interval_secs"));
    }
}
