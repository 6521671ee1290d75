//! Configuration error types.

use thiserror::Error;

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    Parse { key: String, reason: String },

    #[error("validation failed for {key}: {reason}")]
    Validation { key: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConfigError {
    pub fn validation(key: &str, reason: impl Into<String>) -> Self {
        ConfigError::Validation {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}
