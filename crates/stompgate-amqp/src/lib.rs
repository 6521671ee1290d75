//! AMQP 0.9.1 channel adapter.
//!
//! Everything broker-side lives here: the connection, a bounded channel
//! pool, publishing with publisher confirms, consumer streams, and the
//! delivery bookkeeping that guarantees every delivery is settled at most
//! once. The rest of the gateway talks to the broker exclusively through the
//! [`MessageBroker`] and [`BrokerSubscription`] traits, which keeps the
//! session machinery testable without a running broker.

pub mod adapter;
pub mod delivery;
pub mod error;
pub mod pool;
pub mod registry;

pub use adapter::{ChannelAdapter, MessageBroker};
pub use delivery::{BrokerSubscription, Delivery, DeliverySettler, MessageProperties, QueueBinding};
pub use error::{BrokerError, BrokerResult};
pub use pool::{ChannelPool, PooledChannel};
pub use registry::DeliveryRegistry;
