//! Error types for the Hive relay
//!
//! Defines the error enum shared by every component. The first five variants
//! are the relay's user-visible taxonomy; the rest cover ambient failures
//! (configuration, I/O, serialization) that only surface at startup or in
//! the transports. Uses thiserror for ergonomic error handling.

use crate::storage::StorageError;
use thiserror::Error;

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

/// Comprehensive error type for relay operations
#[derive(Error, Debug)]
pub enum RelayError {
    /// Referenced agent (or other record) does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Name collision at registration
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Identity generation could not find a free name
    #[error("Exhausted {attempts} attempts generating a unique agent name")]
    ExhaustedAttempts { attempts: usize },

    /// Size or format limits violated
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// Storage collaborator failure
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[from] StorageError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl RelayError {
    /// Shorthand for a validation failure
    pub fn validation(msg: impl Into<String>) -> Self {
        RelayError::ValidationFailed(msg.into())
    }

    /// Shorthand for a missing agent
    pub fn agent_not_found(agent_id: impl AsRef<str>) -> Self {
        RelayError::NotFound(format!("agent '{}'", agent_id.as_ref()))
    }

    /// Stable machine-readable kind, shared by all transports
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::NotFound(_) => "not_found",
            RelayError::AlreadyExists(_) => "already_exists",
            RelayError::ExhaustedAttempts { .. } => "exhausted_attempts",
            RelayError::ValidationFailed(_) => "validation_failed",
            RelayError::StorageUnavailable(_) => "storage_unavailable",
            RelayError::Config(_) => "config",
            RelayError::Io(_) => "io",
            RelayError::Json(_) => "json",
            RelayError::Yaml(_) => "yaml",
            RelayError::Other(_) => "other",
        }
    }
}

impl From<rusqlite::Error> for RelayError {
    fn from(e: rusqlite::Error) -> Self {
        RelayError::StorageUnavailable(StorageError::from(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_are_distinct_for_taxonomy() {
        let errors = [
            RelayError::NotFound("a".into()),
            RelayError::AlreadyExists("a".into()),
            RelayError::ExhaustedAttempts { attempts: 3 },
            RelayError::validation("too long"),
            RelayError::StorageUnavailable(StorageError::Backend("down".into())),
        ];
        let kinds: std::collections::HashSet<_> = errors.iter().map(|e| e.kind()).collect();
        assert_eq!(kinds.len(), errors.len());
    }

    #[test]
    fn test_agent_not_found_message() {
        let err = RelayError::agent_not_found("silver-falcon-a3f2");
        assert_eq!(err.kind(), "not_found");
        assert!(err.to_string().contains("silver-falcon-a3f2"));
    }

    #[test]
    fn test_sqlite_error_is_storage_unavailable() {
        let err: RelayError = rusqlite::Error::InvalidQuery.into();
        assert_eq!(err.kind(), "storage_unavailable");
    }
}
