//! Structured logging setup.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use stompgate_config::LoggingConfig;

use crate::error::{ObservabilityError, Result};

/// Initialize the global `tracing` subscriber from the logging config.
///
/// `RUST_LOG` wins over the configured level when set. Calling this twice is
/// an error; the binary does it exactly once at startup.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| ObservabilityError::Logging(format!("invalid log filter: {e}")))?;

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
    };

    result.map_err(|e| ObservabilityError::Logging(e.to_string()))
}
