//! Frame/delivery translation.

use tracing::warn;
use uuid::Uuid;

use stompgate_amqp::{Delivery, MessageProperties};
use stompgate_core::{Command, Frame};
use stompgate_session::Subscription;

use crate::destination::Destination;
use crate::error::{RouteError, RouteResult};

/// Headers that carry the frame's own wiring and are never forwarded as
/// application data.
const PROTOCOL_HEADERS: &[&str] = &["destination", "content-length", "receipt", "transaction"];

/// Headers the translation itself wants to fill in. A client that sets one
/// explicitly wins, and the collision is logged, never silently dropped.
const RESERVED_HEADERS: &[&str] = &["message-id", "subscription", "redelivered", "ack"];

fn in_list(list: &[&str], key: &str) -> bool {
    list.iter().any(|entry| *entry == key)
}

/// Everything an outbound SEND turns into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundPublish {
    pub exchange: String,
    pub routing_key: String,
    pub payload: Vec<u8>,
    pub properties: MessageProperties,
}

/// Stateless translator, configured with the topic exchange name.
#[derive(Debug, Clone)]
pub struct Router {
    topic_exchange: String,
}

impl Router {
    pub fn new(topic_exchange: impl Into<String>) -> Self {
        Self {
            topic_exchange: topic_exchange.into(),
        }
    }

    /// What a SUBSCRIBE to this destination needs declared on the broker.
    pub fn binding_for(&self, destination: &str) -> RouteResult<stompgate_amqp::QueueBinding> {
        let destination: Destination = destination.parse()?;
        Ok(destination.binding(&self.topic_exchange))
    }

    /// Map a SEND frame to AMQP publish parameters.
    ///
    /// Deterministic per destination; the only minted value is the
    /// `message-id`, and only when the client did not supply one.
    pub fn translate_outbound(&self, frame: &Frame, session_id: &str) -> RouteResult<OutboundPublish> {
        let raw_destination = frame
            .headers
            .get("destination")
            .ok_or(RouteError::MissingDestination)?;
        let destination: Destination = raw_destination.parse()?;
        let (exchange, routing_key) = destination.publish_target(&self.topic_exchange);

        let message_id = match frame.headers.get("message-id") {
            Some(explicit) => {
                warn!(
                    session = session_id,
                    header = "message-id",
                    value = explicit,
                    "client header collides with a translation field; keeping the client value"
                );
                explicit.to_string()
            }
            None => Uuid::new_v4().to_string(),
        };

        let mut headers = Vec::new();
        for (key, value) in frame.headers.iter() {
            if key == "content-type" || key == "message-id" || in_list(PROTOCOL_HEADERS, key) {
                continue;
            }
            if in_list(RESERVED_HEADERS, key) {
                warn!(
                    session = session_id,
                    header = key,
                    "client header collides with a translation field; keeping the client value"
                );
            }
            headers.push((key.to_string(), value.to_string()));
        }

        Ok(OutboundPublish {
            exchange,
            routing_key,
            payload: frame.body.clone(),
            properties: MessageProperties {
                content_type: frame.headers.get("content-type").map(str::to_string),
                message_id: Some(message_id),
                persistent: destination.is_persistent(),
                headers,
            },
        })
    }

    /// Map a broker delivery to the MESSAGE frame for its subscription.
    ///
    /// The `destination` header is the subscription's destination verbatim,
    /// and `message-id` is the gateway delivery id, unique per delivery even
    /// when the broker redelivers the same message. The broker's own message
    /// id, when present, survives as `amqp-message-id`.
    pub fn translate_inbound(&self, delivery: &Delivery, subscription: &Subscription) -> Frame {
        let mut frame = Frame::new(Command::Message)
            .header("destination", subscription.destination.clone())
            .header("message-id", delivery.id.clone())
            .header("subscription", subscription.id.clone())
            .header("redelivered", if delivery.redelivered { "true" } else { "false" });

        if subscription.ack_mode.requires_client_ack() {
            frame.headers.push("ack", delivery.id.clone());
        }
        if let Some(content_type) = &delivery.content_type {
            frame.headers.push("content-type", content_type.clone());
        }
        if let Some(message_id) = &delivery.message_id {
            frame.headers.push("amqp-message-id", message_id.clone());
        }

        for (key, value) in &delivery.headers {
            // Translation headers were placed first; first-occurrence-wins
            // lookup keeps them authoritative even on a name collision.
            if in_list(RESERVED_HEADERS, key) || key == "destination" {
                warn!(
                    subscription = %subscription.id,
                    header = %key,
                    "broker header collides with a translation field"
                );
            }
            frame.headers.push(key.clone(), value.clone());
        }

        frame.body(delivery.payload.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stompgate_session::AckMode;

    fn delivery(id: &str) -> Delivery {
        Delivery {
            id: id.to_string(),
            exchange: String::new(),
            routing_key: "orders".to_string(),
            redelivered: false,
            content_type: Some("application/json".to_string()),
            message_id: Some("broker-42".to_string()),
            headers: vec![("tenant".to_string(), "acme".to_string())],
            payload: b"{\"n\":1}".to_vec(),
        }
    }

    #[test]
    fn outbound_queue_send_is_persistent_via_default_exchange() {
        let router = Router::new("amq.topic");
        let frame = Frame::send("/queue/orders", b"hi".to_vec()).header("content-type", "text/plain");
        let publish = router.translate_outbound(&frame, "s-1").unwrap();

        assert_eq!(publish.exchange, "");
        assert_eq!(publish.routing_key, "orders");
        assert!(publish.properties.persistent);
        assert_eq!(
            publish.properties.content_type.as_deref(),
            Some("text/plain")
        );
        assert!(publish.properties.message_id.is_some());
    }

    #[test]
    fn outbound_topic_send_uses_the_topic_exchange() {
        let router = Router::new("gateway.topic");
        let frame = Frame::send("/topic/prices", b"1.5".to_vec());
        let publish = router.translate_outbound(&frame, "s-1").unwrap();

        assert_eq!(publish.exchange, "gateway.topic");
        assert_eq!(publish.routing_key, "prices");
        assert!(!publish.properties.persistent);
    }

    #[test]
    fn outbound_keeps_application_headers_and_drops_protocol_ones() {
        let router = Router::new("amq.topic");
        let frame = Frame::send("/queue/orders", b"x".to_vec())
            .header("receipt", "r-1")
            .header("tenant", "acme");
        let publish = router.translate_outbound(&frame, "s-1").unwrap();

        assert_eq!(
            publish.properties.headers,
            vec![("tenant".to_string(), "acme".to_string())]
        );
    }

    #[test]
    fn explicit_client_message_id_wins() {
        let router = Router::new("amq.topic");
        let frame = Frame::send("/queue/orders", b"x".to_vec()).header("message-id", "mine-1");
        let publish = router.translate_outbound(&frame, "s-1").unwrap();
        assert_eq!(publish.properties.message_id.as_deref(), Some("mine-1"));
    }

    #[test]
    fn outbound_rejects_unroutable_destinations() {
        let router = Router::new("amq.topic");
        let frame = Frame::send("/stack/nope", b"x".to_vec());
        assert!(matches!(
            router.translate_outbound(&frame, "s-1"),
            Err(RouteError::BadDestination(_))
        ));
    }

    #[test]
    fn inbound_message_carries_the_subscription_destination_verbatim() {
        let router = Router::new("amq.topic");
        let subscription = Subscription::new("sub-1", "/queue/orders", AckMode::Client);
        let frame = router.translate_inbound(&delivery("d-1"), &subscription);

        assert_eq!(frame.command, Command::Message);
        assert_eq!(frame.headers.get("destination"), Some("/queue/orders"));
        assert_eq!(frame.headers.get("message-id"), Some("d-1"));
        assert_eq!(frame.headers.get("subscription"), Some("sub-1"));
        assert_eq!(frame.headers.get("ack"), Some("d-1"));
        assert_eq!(frame.headers.get("amqp-message-id"), Some("broker-42"));
        assert_eq!(frame.headers.get("tenant"), Some("acme"));
        assert_eq!(frame.body, b"{\"n\":1}");
    }

    #[test]
    fn inbound_message_ids_are_unique_per_delivery() {
        let router = Router::new("amq.topic");
        let subscription = Subscription::new("sub-1", "/queue/orders", AckMode::Auto);

        let first = router.translate_inbound(&delivery("d-1"), &subscription);
        let second = router.translate_inbound(&delivery("d-2"), &subscription);
        assert_ne!(
            first.headers.get("message-id"),
            second.headers.get("message-id")
        );
        // Auto subscriptions get no ack header; there is nothing to settle.
        assert_eq!(first.headers.get("ack"), None);
    }

    #[test]
    fn colliding_broker_headers_never_shadow_translation_fields() {
        let router = Router::new("amq.topic");
        let subscription = Subscription::new("sub-1", "/queue/orders", AckMode::Auto);
        let mut poisoned = delivery("d-1");
        poisoned
            .headers
            .push(("message-id".to_string(), "spoofed".to_string()));

        let frame = router.translate_inbound(&poisoned, &subscription);
        assert_eq!(frame.headers.get("message-id"), Some("d-1"));
    }
}
