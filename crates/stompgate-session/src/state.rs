//! The session state machine.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use stompgate_config::HeartbeatConfig;
use stompgate_core::{Command, Frame};

use crate::heartbeat::{negotiate, parse_heart_beat, HeartbeatAgreement};
use crate::subscription::{AckMode, Subscription};

/// Protocol state of one client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingConnect,
    Connected,
    Disconnecting,
    Closed,
    /// Terminal: a protocol violation happened. Entered at most once.
    Error,
}

/// What the connection task must do in response to an inbound frame.
///
/// Events are emitted in the order they must be acted on; a RECEIPT always
/// follows the work it acknowledges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Send this frame to the client.
    Reply(Frame),
    /// Start consuming for this subscription.
    OpenSubscription(Subscription),
    /// Cancel the consumer and requeue whatever it still holds.
    CloseSubscription(Subscription),
    /// Translate this SEND and publish it to the broker.
    Forward(Frame),
    /// Settle a delivery on its subscription's consumer.
    Settle {
        subscription_id: String,
        delivery_id: String,
        ack: bool,
    },
    /// ACK/NACK referenced a delivery this session is not holding.
    /// Surfaced and logged, non-fatal.
    UnknownAck { id: String },
    /// Orderly end of the session; flush and close the connection.
    Close,
    /// Fatal end: best-effort send of the ERROR frame, then close.
    Terminate(Frame),
}

/// One client connection's protocol state.
///
/// Owned exclusively by its connection task for its whole lifetime; nothing
/// here is shared or locked.
#[derive(Debug)]
pub struct Session {
    id: String,
    state: SessionState,
    version: Option<String>,
    heartbeat: HeartbeatAgreement,
    heartbeat_config: HeartbeatConfig,
    subscriptions: HashMap<String, Subscription>,
    /// delivery id → subscription id, for routing settlements.
    outstanding: HashMap<String, String>,
    server_info: String,
    created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(server_info: impl Into<String>, heartbeat_config: HeartbeatConfig) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            state: SessionState::AwaitingConnect,
            version: None,
            heartbeat: HeartbeatAgreement::default(),
            heartbeat_config,
            subscriptions: HashMap::new(),
            outstanding: HashMap::new(),
            server_info: server_info.into(),
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn heartbeat(&self) -> HeartbeatAgreement {
        self.heartbeat
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn subscription(&self, id: &str) -> Option<&Subscription> {
        self.subscriptions.get(id)
    }

    pub fn subscriptions(&self) -> impl Iterator<Item = &Subscription> {
        self.subscriptions.values()
    }

    /// Record a delivery handed to the client, so a later ACK/NACK can be
    /// routed back to the subscription it arrived on.
    pub fn register_delivery(&mut self, subscription_id: &str, delivery_id: impl Into<String>) {
        self.outstanding
            .insert(delivery_id.into(), subscription_id.to_string());
    }

    /// Outstanding unacknowledged deliveries.
    pub fn outstanding_count(&self) -> usize {
        self.outstanding.len()
    }

    /// Drive the machine with one inbound frame.
    pub fn handle_frame(&mut self, frame: Frame) -> Vec<SessionEvent> {
        match self.state {
            // The Error transition happens exactly once; everything after
            // it is dropped on the floor while the connection drains.
            SessionState::Error | SessionState::Closed => Vec::new(),
            SessionState::AwaitingConnect => self.handle_awaiting_connect(frame),
            SessionState::Connected => self.handle_connected(frame),
            SessionState::Disconnecting => {
                self.violation("protocol violation", "received a frame after DISCONNECT")
            }
        }
    }

    /// Terminate the session for a failure detected outside the machine
    /// (codec error, broker failure surfaced to this client).
    pub fn fail(&mut self, message: &str, detail: &str) -> Vec<SessionEvent> {
        match self.state {
            SessionState::Error | SessionState::Closed => Vec::new(),
            _ => self.violation(message, detail),
        }
    }

    /// Mark the session closed after the connection task flushed its final
    /// frames.
    pub fn mark_closed(&mut self) {
        if self.state != SessionState::Error {
            self.state = SessionState::Closed;
        }
    }

    fn handle_awaiting_connect(&mut self, frame: Frame) -> Vec<SessionEvent> {
        match frame.command {
            Command::Connect | Command::Stomp => self.handle_connect(frame),
            other => self.violation(
                "protocol violation",
                &format!("expected CONNECT, received {other}"),
            ),
        }
    }

    fn handle_connect(&mut self, frame: Frame) -> Vec<SessionEvent> {
        let accepts_v12 = frame
            .headers
            .get("accept-version")
            .map(|versions| versions.split(',').any(|v| v.trim() == "1.2"))
            .unwrap_or(false);
        if !accepts_v12 {
            return self.violation(
                "unsupported protocol version",
                "this server speaks STOMP 1.2 only",
            );
        }

        let client_heart_beat = frame.headers.get("heart-beat").unwrap_or("0,0");
        let Some(client) = parse_heart_beat(client_heart_beat) else {
            return self.violation(
                "protocol violation",
                &format!("malformed heart-beat header: {client_heart_beat}"),
            );
        };
        self.heartbeat = negotiate(
            client,
            self.heartbeat_config.send_interval_ms,
            self.heartbeat_config.recv_interval_ms,
            self.heartbeat_config.min_interval_ms,
        );

        self.version = Some("1.2".to_string());
        self.state = SessionState::Connected;
        debug!(session = %self.id, heartbeat = ?self.heartbeat, "session connected");

        let advertised = format!(
            "{},{}",
            self.heartbeat_config.send_interval_ms, self.heartbeat_config.recv_interval_ms
        );
        vec![SessionEvent::Reply(Frame::connected(
            "1.2",
            &self.id,
            &self.server_info,
            &advertised,
        ))]
    }

    fn handle_connected(&mut self, frame: Frame) -> Vec<SessionEvent> {
        let receipt = frame.headers.get("receipt").map(str::to_string);
        let mut events = match frame.command {
            Command::Send => self.handle_send(frame),
            Command::Subscribe => self.handle_subscribe(frame),
            Command::Unsubscribe => self.handle_unsubscribe(frame),
            Command::Ack => self.handle_settle(frame, true),
            Command::Nack => self.handle_settle(frame, false),
            Command::Disconnect => {
                self.state = SessionState::Disconnecting;
                debug!(session = %self.id, "session disconnecting");
                let mut events = Vec::new();
                if let Some(receipt_id) = frame.headers.get("receipt") {
                    events.push(SessionEvent::Reply(Frame::receipt(receipt_id)));
                }
                events.push(SessionEvent::Close);
                return events;
            }
            Command::Connect | Command::Stomp => {
                return self.violation("protocol violation", "session is already connected")
            }
            Command::Begin | Command::Commit | Command::Abort => {
                return self.violation(
                    "unsupported command",
                    "transactions are not supported by this server",
                )
            }
            Command::Connected | Command::Message | Command::Receipt | Command::Error => {
                return self.violation(
                    "protocol violation",
                    &format!("client sent a server frame: {}", frame.command),
                )
            }
        };

        // A receipt acknowledges the work above it, so it goes last. Errors
        // never carry receipts.
        if !matches!(events.last(), Some(SessionEvent::Terminate(_))) {
            if let Some(receipt_id) = receipt {
                events.push(SessionEvent::Reply(Frame::receipt(&receipt_id)));
            }
        }
        events
    }

    fn handle_send(&mut self, frame: Frame) -> Vec<SessionEvent> {
        if frame.headers.get("destination").is_none() {
            return self.violation("protocol violation", "SEND without a destination header");
        }
        vec![SessionEvent::Forward(frame)]
    }

    fn handle_subscribe(&mut self, frame: Frame) -> Vec<SessionEvent> {
        let (Some(id), Some(destination)) =
            (frame.headers.get("id"), frame.headers.get("destination"))
        else {
            return self.violation(
                "protocol violation",
                "SUBSCRIBE requires both id and destination headers",
            );
        };
        if self.subscriptions.contains_key(id) {
            return self.violation(
                "protocol violation",
                &format!("subscription id already in use: {id}"),
            );
        }
        let Some(ack_mode) = AckMode::from_header(frame.headers.get("ack")) else {
            return self.violation(
                "protocol violation",
                &format!("invalid ack mode: {}", frame.headers.get("ack").unwrap_or("")),
            );
        };

        let subscription = Subscription::new(id, destination, ack_mode);
        self.subscriptions
            .insert(subscription.id.clone(), subscription.clone());
        debug!(
            session = %self.id,
            subscription = %subscription.id,
            destination = %subscription.destination,
            ack = subscription.ack_mode.as_str(),
            "subscribed"
        );
        vec![SessionEvent::OpenSubscription(subscription)]
    }

    fn handle_unsubscribe(&mut self, frame: Frame) -> Vec<SessionEvent> {
        let Some(id) = frame.headers.get("id") else {
            return self.violation("protocol violation", "UNSUBSCRIBE without an id header");
        };
        let Some(subscription) = self.subscriptions.remove(id) else {
            return self.violation(
                "protocol violation",
                &format!("unknown subscription id: {id}"),
            );
        };
        // Deliveries still outstanding on this subscription go back to the
        // broker with the consumer; forget their routing entries.
        self.outstanding.retain(|_, sub_id| sub_id != id);
        debug!(session = %self.id, subscription = %subscription.id, "unsubscribed");
        vec![SessionEvent::CloseSubscription(subscription)]
    }

    fn handle_settle(&mut self, frame: Frame, ack: bool) -> Vec<SessionEvent> {
        let Some(id) = frame.headers.get("id") else {
            let command = if ack { "ACK" } else { "NACK" };
            return self.violation(
                "protocol violation",
                &format!("{command} without an id header"),
            );
        };
        match self.outstanding.remove(id) {
            Some(subscription_id) => vec![SessionEvent::Settle {
                subscription_id,
                delivery_id: id.to_string(),
                ack,
            }],
            None => {
                warn!(session = %self.id, delivery = id, "ack for unknown delivery");
                vec![SessionEvent::UnknownAck { id: id.to_string() }]
            }
        }
    }

    fn violation(&mut self, message: &str, detail: &str) -> Vec<SessionEvent> {
        warn!(session = %self.id, message, detail, "protocol violation, session failed");
        self.state = SessionState::Error;
        self.outstanding.clear();

        let mut events: Vec<SessionEvent> = self
            .subscriptions
            .drain()
            .map(|(_, subscription)| SessionEvent::CloseSubscription(subscription))
            .collect();
        events.push(SessionEvent::Terminate(Frame::error(message, detail)));
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stompgate_core::Command;

    fn connected_session() -> Session {
        let mut session = Session::new("stompgate/test", HeartbeatConfig::default());
        let events = session.handle_frame(Frame::connect("broker", "0,0"));
        assert_eq!(events.len(), 1);
        session
    }

    fn subscribe(session: &mut Session, id: &str, destination: &str, ack: &str) {
        let events = session.handle_frame(Frame::subscribe(id, destination, ack));
        assert!(matches!(events[0], SessionEvent::OpenSubscription(_)));
    }

    #[test]
    fn connect_yields_connected_with_version_1_2() {
        let mut session = Session::new("stompgate/test", HeartbeatConfig::default());
        let events = session.handle_frame(Frame::connect("broker", "5000,30000"));

        match &events[0] {
            SessionEvent::Reply(frame) => {
                assert_eq!(frame.command, Command::Connected);
                assert_eq!(frame.headers.get("version"), Some("1.2"));
                assert_eq!(frame.headers.get("session"), Some(session.id()));
                assert!(frame.headers.get("heart-beat").is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(session.state(), SessionState::Connected);
        assert!(session.heartbeat().send_interval.is_some());
    }

    #[test]
    fn connect_without_1_2_is_rejected() {
        let mut session = Session::new("stompgate/test", HeartbeatConfig::default());
        let mut frame = Frame::new(Command::Connect);
        frame.headers.push("accept-version", "1.0,1.1");
        let events = session.handle_frame(frame);

        assert!(matches!(events.last(), Some(SessionEvent::Terminate(_))));
        assert_eq!(session.state(), SessionState::Error);
    }

    #[test]
    fn send_before_connect_errors_exactly_once_and_releases_subscriptions() {
        let mut session = connected_session();
        subscribe(&mut session, "sub-1", "/queue/a", "auto");
        subscribe(&mut session, "sub-2", "/queue/b", "client");

        // BEGIN is unsupported and fails the session.
        let events = session.handle_frame(Frame::new(Command::Begin).header("transaction", "t1"));
        let closes = events
            .iter()
            .filter(|e| matches!(e, SessionEvent::CloseSubscription(_)))
            .count();
        assert_eq!(closes, 2);
        assert!(matches!(events.last(), Some(SessionEvent::Terminate(_))));
        assert_eq!(session.state(), SessionState::Error);

        // Exactly once: later frames are dropped without further events.
        assert!(session.handle_frame(Frame::ack("d-1")).is_empty());
    }

    #[test]
    fn send_requires_a_destination() {
        let mut session = connected_session();
        let events = session.handle_frame(Frame::new(Command::Send).body(b"x".to_vec()));
        assert!(matches!(events.last(), Some(SessionEvent::Terminate(_))));
    }

    #[test]
    fn send_forwards_and_honors_receipt() {
        let mut session = connected_session();
        let frame = Frame::send("/queue/orders", b"payload".to_vec()).header("receipt", "r-1");
        let events = session.handle_frame(frame);

        assert!(matches!(events[0], SessionEvent::Forward(_)));
        match &events[1] {
            SessionEvent::Reply(frame) => {
                assert_eq!(frame.command, Command::Receipt);
                assert_eq!(frame.headers.get("receipt-id"), Some("r-1"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn duplicate_subscription_id_is_a_violation() {
        let mut session = connected_session();
        subscribe(&mut session, "sub-1", "/queue/a", "auto");
        let events = session.handle_frame(Frame::subscribe("sub-1", "/queue/b", "auto"));
        assert!(matches!(events.last(), Some(SessionEvent::Terminate(_))));
    }

    #[test]
    fn unsubscribe_closes_and_forgets_outstanding_routes() {
        let mut session = connected_session();
        subscribe(&mut session, "sub-1", "/queue/a", "client");
        session.register_delivery("sub-1", "d-1");
        assert_eq!(session.outstanding_count(), 1);

        let events = session.handle_frame(Frame::unsubscribe("sub-1"));
        assert!(matches!(events[0], SessionEvent::CloseSubscription(_)));
        assert_eq!(session.outstanding_count(), 0);
    }

    #[test]
    fn ack_routes_to_the_owning_subscription() {
        let mut session = connected_session();
        subscribe(&mut session, "sub-1", "/queue/a", "client");
        session.register_delivery("sub-1", "d-1");

        let events = session.handle_frame(Frame::ack("d-1"));
        assert_eq!(
            events[0],
            SessionEvent::Settle {
                subscription_id: "sub-1".to_string(),
                delivery_id: "d-1".to_string(),
                ack: true,
            }
        );
    }

    #[test]
    fn unknown_ack_is_surfaced_not_fatal() {
        let mut session = connected_session();
        let events = session.handle_frame(Frame::ack("never-seen"));
        assert_eq!(
            events[0],
            SessionEvent::UnknownAck {
                id: "never-seen".to_string()
            }
        );
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[test]
    fn second_ack_for_the_same_delivery_is_unknown() {
        let mut session = connected_session();
        subscribe(&mut session, "sub-1", "/queue/a", "client-individual");
        session.register_delivery("sub-1", "d-1");

        assert!(matches!(
            session.handle_frame(Frame::ack("d-1"))[0],
            SessionEvent::Settle { .. }
        ));
        assert!(matches!(
            session.handle_frame(Frame::ack("d-1"))[0],
            SessionEvent::UnknownAck { .. }
        ));
    }

    #[test]
    fn disconnect_sends_receipt_then_closes() {
        let mut session = connected_session();
        let events = session.handle_frame(Frame::disconnect("r-9"));

        match &events[0] {
            SessionEvent::Reply(frame) => {
                assert_eq!(frame.headers.get("receipt-id"), Some("r-9"))
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(events[1], SessionEvent::Close);
        assert_eq!(session.state(), SessionState::Disconnecting);

        // Frames after DISCONNECT are a violation.
        let events = session.handle_frame(Frame::send("/queue/a", b"late".to_vec()));
        assert!(matches!(events.last(), Some(SessionEvent::Terminate(_))));
    }

    #[test]
    fn fail_is_idempotent() {
        let mut session = connected_session();
        let events = session.fail("malformed frame", "bad framing");
        assert!(matches!(events.last(), Some(SessionEvent::Terminate(_))));
        assert!(session.fail("malformed frame", "again").is_empty());
    }
}
