//! Server error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] stompgate_core::CodecError),

    #[error("broker error: {0}")]
    Broker(#[from] stompgate_amqp::BrokerError),

    #[error("configuration error: {0}")]
    Config(#[from] stompgate_config::ConfigError),

    #[error("observability error: {0}")]
    Observability(#[from] stompgate_observability::ObservabilityError),
}
