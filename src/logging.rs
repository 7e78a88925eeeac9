//! Log setup for the `hive` binary
//!
//! Everything goes to stderr. In `hive tools` mode stdout carries the
//! JSON-RPC stream, so a single stray log line there would corrupt the
//! protocol for the agent host.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Directives appended to the configured level so HTTP plumbing stays quiet
const QUIET_DEPENDENCIES: &str = "hyper=warn,tower=warn";

/// Install the global subscriber
///
/// `RUST_LOG` wins when set. Otherwise `level` (the `log_level` config
/// value, e.g. `info` or `hive_relay=debug`) is used.
///
/// # Errors
/// `ValidationFailed` for an unparseable level, `Other` if a subscriber is
/// already installed.
pub fn init(level: &str) -> crate::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => filter_for(level)?,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true),
        )
        .try_init()
        .map_err(|e| crate::RelayError::Other(format!("Failed to initialize tracing: {}", e)))?;

    Ok(())
}

fn filter_for(level: &str) -> crate::Result<EnvFilter> {
    EnvFilter::try_new(format!("{},{}", level.trim(), QUIET_DEPENDENCIES)).map_err(|e| {
        crate::RelayError::validation(format!("invalid log level '{}': {}", level, e))
    })
}
