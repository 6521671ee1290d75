//! Heartbeat negotiation.
//!
//! A `heart-beat` header reads `x,y`: what the sender can emit, and what it
//! wants to receive. Each direction is active only when both sides opt in,
//! and then runs at the larger of the two values; 0 disables a direction.

use std::time::Duration;

/// Negotiated heartbeat intervals for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeartbeatAgreement {
    /// How often the server emits a heartbeat toward the client.
    pub send_interval: Option<Duration>,
    /// How often the client promised to transmit something.
    pub recv_interval: Option<Duration>,
}

impl HeartbeatAgreement {
    /// The client is declared dead when nothing arrives for this long
    /// (twice the negotiated interval, tolerating one lost heartbeat).
    pub fn liveness_deadline(&self) -> Option<Duration> {
        self.recv_interval.map(|interval| interval * 2)
    }
}

/// Parse a `heart-beat` header value into `(can_send_ms, wants_recv_ms)`.
pub fn parse_heart_beat(value: &str) -> Option<(u64, u64)> {
    let (send, recv) = value.split_once(',')?;
    Some((send.trim().parse().ok()?, recv.trim().parse().ok()?))
}

/// Apply the STOMP negotiation rule against the server's advertised values.
///
/// `client` is the client's `(cx, cy)`; the server advertises `(sx, sy)` =
/// (`server_send_ms`, `server_recv_ms`). `min_ms` floors any active interval
/// so a client cannot demand millisecond-level heartbeats.
pub fn negotiate(
    client: (u64, u64),
    server_send_ms: u64,
    server_recv_ms: u64,
    min_ms: u64,
) -> HeartbeatAgreement {
    let (cx, cy) = client;

    let send_interval = if cy == 0 || server_send_ms == 0 {
        None
    } else {
        Some(cy.max(server_send_ms).max(min_ms))
    };
    let recv_interval = if cx == 0 || server_recv_ms == 0 {
        None
    } else {
        Some(cx.max(server_recv_ms).max(min_ms))
    };

    HeartbeatAgreement {
        send_interval: send_interval.map(Duration::from_millis),
        recv_interval: recv_interval.map(Duration::from_millis),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_parsing() {
        assert_eq!(parse_heart_beat("5000,30000"), Some((5000, 30000)));
        assert_eq!(parse_heart_beat("0,0"), Some((0, 0)));
        assert_eq!(parse_heart_beat("5000"), None);
        assert_eq!(parse_heart_beat("a,b"), None);
    }

    #[test]
    fn larger_value_wins_in_each_direction() {
        let agreement = negotiate((10_000, 20_000), 30_000, 15_000, 5_000);
        assert_eq!(
            agreement.send_interval,
            Some(Duration::from_millis(30_000))
        );
        assert_eq!(
            agreement.recv_interval,
            Some(Duration::from_millis(15_000))
        );
    }

    #[test]
    fn zero_disables_a_direction() {
        let agreement = negotiate((0, 30_000), 30_000, 30_000, 5_000);
        assert_eq!(agreement.recv_interval, None);
        assert!(agreement.send_interval.is_some());

        let agreement = negotiate((30_000, 0), 30_000, 30_000, 5_000);
        assert_eq!(agreement.send_interval, None);

        let agreement = negotiate((10_000, 10_000), 0, 0, 5_000);
        assert_eq!(agreement, HeartbeatAgreement::default());
    }

    #[test]
    fn floor_applies_to_aggressive_clients() {
        let agreement = negotiate((1, 1), 1, 1, 5_000);
        assert_eq!(agreement.send_interval, Some(Duration::from_millis(5_000)));
        assert_eq!(agreement.recv_interval, Some(Duration::from_millis(5_000)));
    }

    #[test]
    fn liveness_deadline_doubles_the_interval() {
        let agreement = negotiate((10_000, 0), 0, 10_000, 5_000);
        assert_eq!(
            agreement.liveness_deadline(),
            Some(Duration::from_millis(20_000))
        );
        assert_eq!(HeartbeatAgreement::default().liveness_deadline(), None);
    }
}
