//! Connection supervisor for the STOMP/AMQP gateway.
//!
//! The supervisor accepts client connections, runs one task per session, and
//! babysits the broker connection with bounded backoff. The per-connection
//! loop in [`connection`] is where the codec, the session machine, the
//! router and the broker adapter meet.

pub mod backoff;
pub mod connection;
pub mod error;
pub mod supervisor;

pub use backoff::Backoff;
pub use connection::handle_connection;
pub use error::ServerError;
pub use supervisor::Supervisor;

/// Server identity advertised in CONNECTED frames.
pub fn server_info() -> String {
    format!("stompgate/{}", env!("CARGO_PKG_VERSION"))
}
