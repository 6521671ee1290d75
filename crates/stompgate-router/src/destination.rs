//! Destination grammar.
//!
//! Three destination families are understood, following the conventions
//! RabbitMQ's own STOMP surface established:
//!
//! - `/queue/<name>`: the named durable queue, published via the default
//!   exchange
//! - `/topic/<name>`: the configured topic exchange, one server-named
//!   exclusive queue per subscriber
//! - `/exchange/<exchange>[/<routing-key>]`: an explicit exchange

use std::fmt;
use std::str::FromStr;

use stompgate_amqp::QueueBinding;

use crate::error::RouteError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Queue(String),
    Topic(String),
    Exchange {
        exchange: String,
        routing_key: String,
    },
}

impl FromStr for Destination {
    type Err = RouteError;

    fn from_str(raw: &str) -> Result<Self, RouteError> {
        if let Some(name) = raw.strip_prefix("/queue/") {
            if name.is_empty() || name.contains('/') {
                return Err(RouteError::BadDestination(raw.to_string()));
            }
            return Ok(Destination::Queue(name.to_string()));
        }
        if let Some(name) = raw.strip_prefix("/topic/") {
            if name.is_empty() || name.contains('/') {
                return Err(RouteError::BadDestination(raw.to_string()));
            }
            return Ok(Destination::Topic(name.to_string()));
        }
        if let Some(rest) = raw.strip_prefix("/exchange/") {
            let (exchange, routing_key) = match rest.split_once('/') {
                Some((exchange, key)) => (exchange, key),
                None => (rest, ""),
            };
            if exchange.is_empty() {
                return Err(RouteError::BadDestination(raw.to_string()));
            }
            return Ok(Destination::Exchange {
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
            });
        }
        Err(RouteError::BadDestination(raw.to_string()))
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Queue(name) => write!(f, "/queue/{name}"),
            Destination::Topic(name) => write!(f, "/topic/{name}"),
            Destination::Exchange {
                exchange,
                routing_key,
            } if routing_key.is_empty() => write!(f, "/exchange/{exchange}"),
            Destination::Exchange {
                exchange,
                routing_key,
            } => write!(f, "/exchange/{exchange}/{routing_key}"),
        }
    }
}

impl Destination {
    /// Exchange and routing key a SEND to this destination publishes with.
    pub fn publish_target(&self, topic_exchange: &str) -> (String, String) {
        match self {
            Destination::Queue(name) => (String::new(), name.clone()),
            Destination::Topic(name) => (topic_exchange.to_string(), name.clone()),
            Destination::Exchange {
                exchange,
                routing_key,
            } => (exchange.clone(), routing_key.clone()),
        }
    }

    /// What a SUBSCRIBE to this destination needs declared and bound.
    pub fn binding(&self, topic_exchange: &str) -> QueueBinding {
        match self {
            Destination::Queue(name) => QueueBinding::direct_queue(name.clone()),
            Destination::Topic(name) => QueueBinding::bound_to(topic_exchange, name.clone()),
            Destination::Exchange {
                exchange,
                routing_key,
            } => QueueBinding::bound_to(exchange.clone(), routing_key.clone()),
        }
    }

    /// Queue destinations publish persistent messages.
    pub fn is_persistent(&self) -> bool {
        matches!(self, Destination::Queue(_))
    }
}
