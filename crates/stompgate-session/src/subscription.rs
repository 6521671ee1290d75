//! Subscription bookkeeping.

use chrono::{DateTime, Utc};

/// STOMP acknowledgement mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    /// The broker side is settled as soon as the MESSAGE frame is queued
    /// toward the client.
    Auto,
    /// Client ACKs settle cumulatively, up to and including the referenced
    /// delivery.
    Client,
    /// Client ACKs settle exactly one delivery.
    ClientIndividual,
}

impl AckMode {
    /// Parse the SUBSCRIBE `ack` header; absence means `auto`.
    pub fn from_header(value: Option<&str>) -> Option<AckMode> {
        match value {
            None | Some("auto") => Some(AckMode::Auto),
            Some("client") => Some(AckMode::Client),
            Some("client-individual") => Some(AckMode::ClientIndividual),
            Some(_) => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AckMode::Auto => "auto",
            AckMode::Client => "client",
            AckMode::ClientIndividual => "client-individual",
        }
    }

    /// Whether MESSAGE frames need an `ack` header for the client to settle.
    pub fn requires_client_ack(&self) -> bool {
        !matches!(self, AckMode::Auto)
    }
}

/// One active subscription, owned by its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    /// Client-chosen subscription id, unique within the session.
    pub id: String,
    /// The destination exactly as the client wrote it.
    pub destination: String,
    pub ack_mode: AckMode,
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    pub fn new(id: impl Into<String>, destination: impl Into<String>, ack_mode: AckMode) -> Self {
        Self {
            id: id.into(),
            destination: destination.into(),
            ack_mode,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_header_parsing() {
        assert_eq!(AckMode::from_header(None), Some(AckMode::Auto));
        assert_eq!(AckMode::from_header(Some("auto")), Some(AckMode::Auto));
        assert_eq!(AckMode::from_header(Some("client")), Some(AckMode::Client));
        assert_eq!(
            AckMode::from_header(Some("client-individual")),
            Some(AckMode::ClientIndividual)
        );
        assert_eq!(AckMode::from_header(Some("maybe")), None);
    }

    #[test]
    fn auto_mode_needs_no_client_ack() {
        assert!(!AckMode::Auto.requires_client_ack());
        assert!(AckMode::Client.requires_client_ack());
        assert!(AckMode::ClientIndividual.requires_client_ack());
    }
}
