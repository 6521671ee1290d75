//! Shared bridge state.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Where the bridge is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgePhase {
    Starting,
    Serving,
    /// The broker retry budget is exhausted; readiness fails until a
    /// reconnect succeeds.
    Degraded,
}

#[derive(Debug)]
struct StateInner {
    phase: BridgePhase,
    broker_connected: bool,
    active_sessions: usize,
    last_broker_reconnect: Option<DateTime<Utc>>,
    started_at: DateTime<Utc>,
}

/// Handle to the bridge's operational state.
///
/// The supervisor writes, the management endpoint reads. Cheap to clone.
#[derive(Debug, Clone)]
pub struct BridgeState {
    inner: Arc<RwLock<StateInner>>,
}

impl Default for BridgeState {
    fn default() -> Self {
        Self::new()
    }
}

impl BridgeState {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(StateInner {
                phase: BridgePhase::Starting,
                broker_connected: false,
                active_sessions: 0,
                last_broker_reconnect: None,
                started_at: Utc::now(),
            })),
        }
    }

    pub fn set_phase(&self, phase: BridgePhase) {
        self.inner.write().phase = phase;
    }

    pub fn phase(&self) -> BridgePhase {
        self.inner.read().phase
    }

    pub fn set_broker_connected(&self, connected: bool) {
        let mut inner = self.inner.write();
        inner.broker_connected = connected;
        if connected {
            inner.last_broker_reconnect = Some(Utc::now());
        }
    }

    pub fn session_opened(&self) {
        self.inner.write().active_sessions += 1;
    }

    pub fn session_closed(&self) {
        let mut inner = self.inner.write();
        inner.active_sessions = inner.active_sessions.saturating_sub(1);
    }

    /// Ready means serving with a live broker connection.
    pub fn is_ready(&self) -> bool {
        let inner = self.inner.read();
        inner.phase == BridgePhase::Serving && inner.broker_connected
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let inner = self.inner.read();
        StatusSnapshot {
            phase: inner.phase,
            broker_connected: inner.broker_connected,
            active_sessions: inner.active_sessions,
            last_broker_reconnect: inner.last_broker_reconnect,
            uptime_seconds: (Utc::now() - inner.started_at).num_seconds().max(0) as u64,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Point-in-time view served by `/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub phase: BridgePhase,
    pub broker_connected: bool,
    pub active_sessions: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_broker_reconnect: Option<DateTime<Utc>>,
    pub uptime_seconds: u64,
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_requires_serving_and_broker() {
        let state = BridgeState::new();
        assert!(!state.is_ready());

        state.set_broker_connected(true);
        assert!(!state.is_ready()); // still Starting

        state.set_phase(BridgePhase::Serving);
        assert!(state.is_ready());

        state.set_phase(BridgePhase::Degraded);
        assert!(!state.is_ready());
    }

    #[test]
    fn session_counting_never_underflows() {
        let state = BridgeState::new();
        state.session_closed();
        assert_eq!(state.snapshot().active_sessions, 0);

        state.session_opened();
        state.session_opened();
        state.session_closed();
        assert_eq!(state.snapshot().active_sessions, 1);
    }

    #[test]
    fn reconnect_timestamp_updates_on_connect() {
        let state = BridgeState::new();
        assert!(state.snapshot().last_broker_reconnect.is_none());
        state.set_broker_connected(true);
        assert!(state.snapshot().last_broker_reconnect.is_some());
    }
}
