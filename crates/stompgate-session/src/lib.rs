//! Per-connection STOMP protocol state.
//!
//! A [`Session`] is a pure state machine: it consumes inbound frames and
//! produces [`SessionEvent`]s for the connection task to act on: frames to
//! send back, subscriptions to open or close, publishes and settlements to
//! forward to the broker. It owns no IO and no timers, which is what keeps
//! the protocol rules testable in isolation.

pub mod heartbeat;
pub mod state;
pub mod subscription;

pub use heartbeat::{negotiate, parse_heart_beat, HeartbeatAgreement};
pub use state::{Session, SessionEvent, SessionState};
pub use subscription::{AckMode, Subscription};
