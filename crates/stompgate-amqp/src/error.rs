//! Broker error taxonomy.

use thiserror::Error;

pub type BrokerResult<T> = std::result::Result<T, BrokerError>;

#[derive(Debug, Error)]
pub enum BrokerError {
    /// The broker cannot be reached or the connection dropped mid-operation.
    /// Retried with backoff by the supervisor.
    #[error("broker unavailable: {0}")]
    Unavailable(#[from] lapin::Error),

    /// No channel permit became available within the configured timeout.
    /// Surfaced to the caller, not retried automatically.
    #[error("timed out acquiring a broker channel")]
    ChannelAcquisitionTimeout,

    /// The broker negatively confirmed a publish.
    #[error("broker rejected the publish")]
    PublishRejected,

    /// No publisher confirm arrived within the configured timeout.
    #[error("publish confirm timed out")]
    ConfirmTimeout,

    /// Acknowledgement bookkeeping error: the delivery id is not outstanding
    /// (never issued, or already settled). Non-fatal.
    #[error("unknown delivery: {0}")]
    UnknownDelivery(String),
}

impl BrokerError {
    /// True for errors the supervisor handles by reconnecting.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, BrokerError::Unavailable(_) | BrokerError::ConfirmTimeout)
    }
}
