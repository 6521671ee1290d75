//! Broker-side vocabulary shared across the gateway.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::BrokerResult;

/// One message in flight from the broker toward a STOMP client.
///
/// `id` is the gateway-assigned delivery id clients acknowledge against; the
/// AMQP delivery tag never leaves the adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub id: String,
    pub exchange: String,
    pub routing_key: String,
    pub redelivered: bool,
    pub content_type: Option<String>,
    pub message_id: Option<String>,
    pub headers: Vec<(String, String)>,
    pub payload: Vec<u8>,
}

/// Properties attached to an outbound publish.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageProperties {
    pub content_type: Option<String>,
    pub message_id: Option<String>,
    /// Delivery mode 2 on the wire; survives a broker restart.
    pub persistent: bool,
    pub headers: Vec<(String, String)>,
}

/// What a subscription needs declared and bound on the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueBinding {
    /// Consume from this queue; `None` asks for a server-named exclusive
    /// auto-delete queue.
    pub queue: Option<String>,
    /// Declare the named queue as durable.
    pub durable: bool,
    /// Bind the queue to this exchange (with `routing_key`) before consuming.
    pub exchange: Option<String>,
    pub routing_key: String,
}

impl QueueBinding {
    /// Consume straight from an existing durable queue.
    pub fn direct_queue(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            routing_key: name.clone(),
            queue: Some(name),
            durable: true,
            exchange: None,
        }
    }

    /// Server-named exclusive queue bound to an exchange.
    pub fn bound_to(exchange: impl Into<String>, routing_key: impl Into<String>) -> Self {
        Self {
            queue: None,
            durable: false,
            exchange: Some(exchange.into()),
            routing_key: routing_key.into(),
        }
    }
}

/// A live consumer on one broker queue.
///
/// Polling is exclusive (`&mut self`); settlement happens concurrently
/// through the shared [`DeliverySettler`] handle, which talks to the same
/// channel the deliveries arrive on, since AMQP acknowledges per channel.
#[async_trait]
pub trait BrokerSubscription: Send {
    /// The queue actually consumed from (server-named queues included).
    fn queue(&self) -> &str;

    /// Next delivery, or `None` once the consumer is cancelled. Lazy and
    /// restartable: deliveries are only pulled when polled.
    async fn next_delivery(&mut self) -> Option<BrokerResult<Delivery>>;

    /// Shared settlement handle for this subscription's deliveries.
    fn settler(&self) -> Arc<dyn DeliverySettler>;
}

/// Settles deliveries for one subscription.
#[async_trait]
pub trait DeliverySettler: Send + Sync {
    /// Positively settle a delivery; `cumulative` settles everything up to
    /// and including it.
    async fn ack(&self, delivery_id: &str, cumulative: bool) -> BrokerResult<()>;

    /// Negatively settle a delivery, optionally leaving it a redelivery
    /// candidate.
    async fn nack(&self, delivery_id: &str, requeue: bool) -> BrokerResult<()>;

    /// Return every unsettled delivery to the broker as a redelivery
    /// candidate. Used on session teardown; returns how many were requeued.
    async fn requeue_outstanding(&self) -> BrokerResult<usize>;

    /// Stop the consumer. Idempotent.
    async fn cancel(&self) -> BrokerResult<()>;
}
