//! Destination and header translation.
//!
//! The router is the only place that knows how a STOMP destination maps onto
//! AMQP exchanges, queues and routing keys, and how headers cross the
//! boundary in either direction. Both mappings are deterministic: the same
//! frame always produces the same publish parameters, and the same delivery
//! always produces the same MESSAGE frame (modulo the freshly minted ids).

pub mod destination;
pub mod error;
pub mod translate;

pub use destination::Destination;
pub use error::{RouteError, RouteResult};
pub use translate::{OutboundPublish, Router};
