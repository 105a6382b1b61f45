//! Structured logging set-up.
//!
//! # Example
//!
//! ```rust,ignore
//! use nimbus_server::logging::{init_logging, LogConfig};
//!
//! init_logging(&LogConfig::default())?;
//! tracing::info!(arn = %arn, "function registered");
//! ```

use serde::{Deserialize, Serialize};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::error::{ServerError, ServerResult};

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive, e.g. `info` or `nimbus_runtime=debug,info`.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json_format: bool,
    /// Include the module path of each event.
    pub include_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            include_target: true,
        }
    }
}

/// Builds the event filter; `RUST_LOG` wins over the configured level.
pub fn env_filter(config: &LogConfig) -> ServerResult<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| ServerError::logging(format!("invalid log level: {e}"))),
    }
}

/// Installs the global subscriber.
///
/// Fails if the level is not a valid filter or a subscriber is already set.
pub fn init_logging(config: &LogConfig) -> ServerResult<()> {
    let filter = env_filter(config)?;

    if config.json_format {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(config.include_target)
            .with_filter(filter);
        tracing_subscriber::registry()
            .with(fmt_layer)
            .try_init()
            .map_err(|e| ServerError::logging(e.to_string()))?;
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(config.include_target)
            .with_filter(filter);
        tracing_subscriber::registry()
            .with(fmt_layer)
            .try_init()
            .map_err(|e| ServerError::logging(e.to_string()))?;
    }
    Ok(())
}
