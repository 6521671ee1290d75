//! The lapin-backed broker adapter.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions,
    BasicPublishOptions, BasicQosOptions, ConfirmSelectOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Connection, ConnectionProperties, Consumer};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use std::sync::Arc;

use stompgate_config::BrokerConfig;

use crate::delivery::{BrokerSubscription, Delivery, DeliverySettler, MessageProperties, QueueBinding};
use crate::error::{BrokerError, BrokerResult};
use crate::pool::{ChannelPool, PooledChannel};
use crate::registry::DeliveryRegistry;

/// The capability sessions use to reach the broker.
///
/// The concrete implementation is [`ChannelAdapter`]; tests drive the session
/// machinery with an in-memory implementation instead.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Publish and wait for the broker's confirm.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: MessageProperties,
    ) -> BrokerResult<()>;

    /// Declare/bind per the binding and start consuming.
    async fn subscribe(&self, binding: &QueueBinding) -> BrokerResult<Box<dyn BrokerSubscription>>;

    async fn is_connected(&self) -> bool;
}

/// Owns the shared AMQP connection and the channel pool.
pub struct ChannelAdapter {
    config: BrokerConfig,
    connection: RwLock<Connection>,
    pool: ChannelPool,
}

impl ChannelAdapter {
    /// Establish the broker connection.
    pub async fn connect(config: BrokerConfig) -> BrokerResult<Self> {
        info!(url = %config.masked_url(), "connecting to broker");
        let connection =
            Connection::connect(&config.url, ConnectionProperties::default()).await?;
        let pool = ChannelPool::new(
            config.channel_pool_size,
            Duration::from_millis(config.channel_acquire_timeout_ms),
        );
        Ok(Self {
            config,
            connection: RwLock::new(connection),
            pool,
        })
    }

    /// Replace the underlying connection after a drop. Channels handed out
    /// before the drop fail on use and are reopened by their owners.
    pub async fn reconnect(&self) -> BrokerResult<()> {
        info!(url = %self.config.masked_url(), "reconnecting to broker");
        let fresh = Connection::connect(&self.config.url, ConnectionProperties::default()).await?;
        *self.connection.write().await = fresh;
        Ok(())
    }

    pub fn pool(&self) -> &ChannelPool {
        &self.pool
    }

    /// Acquire a pool permit and open a channel on the current connection.
    async fn open_channel(&self) -> BrokerResult<PooledChannel> {
        let permit = self.pool.acquire().await?;
        let channel = self.connection.read().await.create_channel().await?;
        Ok(PooledChannel::new(channel, permit))
    }
}

#[async_trait]
impl MessageBroker for ChannelAdapter {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: MessageProperties,
    ) -> BrokerResult<()> {
        let channel = self.open_channel().await?;
        channel.confirm_select(ConfirmSelectOptions::default()).await?;

        let confirm = channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                build_properties(properties),
            )
            .await?;
        let confirmation = tokio::time::timeout(
            Duration::from_millis(self.config.publish_confirm_timeout_ms),
            confirm,
        )
        .await
        .map_err(|_| BrokerError::ConfirmTimeout)??;

        if matches!(confirmation, Confirmation::Nack(_)) {
            warn!(exchange, routing_key, "broker nacked publish");
            return Err(BrokerError::PublishRejected);
        }
        debug!(exchange, routing_key, bytes = payload.len(), "published");
        Ok(())
    }

    async fn subscribe(&self, binding: &QueueBinding) -> BrokerResult<Box<dyn BrokerSubscription>> {
        let channel = self.open_channel().await?;
        channel
            .basic_qos(self.config.prefetch_count, BasicQosOptions::default())
            .await?;

        let queue = match &binding.queue {
            Some(name) => {
                channel
                    .queue_declare(
                        name,
                        QueueDeclareOptions {
                            durable: binding.durable,
                            ..QueueDeclareOptions::default()
                        },
                        FieldTable::default(),
                    )
                    .await?;
                name.clone()
            }
            None => {
                let declared = channel
                    .queue_declare(
                        "",
                        QueueDeclareOptions {
                            exclusive: true,
                            auto_delete: true,
                            ..QueueDeclareOptions::default()
                        },
                        FieldTable::default(),
                    )
                    .await?;
                declared.name().as_str().to_string()
            }
        };

        if let Some(exchange) = &binding.exchange {
            channel
                .queue_bind(
                    &queue,
                    exchange,
                    &binding.routing_key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await?;
        }

        let consumer_tag = format!("stompgate-{}", Uuid::new_v4());
        let consumer = channel
            .basic_consume(
                &queue,
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;
        info!(queue, consumer_tag, "consuming");

        let registry = Arc::new(DeliveryRegistry::new());
        Ok(Box::new(AmqpSubscription {
            consumer,
            registry: Arc::clone(&registry),
            settler: Arc::new(AmqpSettler {
                queue,
                consumer_tag,
                channel,
                registry,
                cancelled: AtomicBool::new(false),
            }),
        }))
    }

    async fn is_connected(&self) -> bool {
        self.connection.read().await.status().connected()
    }
}

struct AmqpSubscription {
    consumer: Consumer,
    registry: Arc<DeliveryRegistry>,
    settler: Arc<AmqpSettler>,
}

/// Channel-side half of a subscription: acks, nacks, cancellation.
struct AmqpSettler {
    queue: String,
    consumer_tag: String,
    channel: PooledChannel,
    registry: Arc<DeliveryRegistry>,
    cancelled: AtomicBool,
}

#[async_trait]
impl BrokerSubscription for AmqpSubscription {
    fn queue(&self) -> &str {
        &self.settler.queue
    }

    async fn next_delivery(&mut self) -> Option<BrokerResult<Delivery>> {
        let next = self.consumer.next().await?;
        Some(next.map_err(BrokerError::from).map(|delivery| {
            let properties = &delivery.properties;
            let headers = properties
                .headers()
                .as_ref()
                .map(|table| {
                    table
                        .inner()
                        .iter()
                        .filter_map(|(key, value)| match value {
                            AMQPValue::LongString(s) => Some((
                                key.as_str().to_string(),
                                String::from_utf8_lossy(s.as_bytes()).into_owned(),
                            )),
                            _ => None,
                        })
                        .collect()
                })
                .unwrap_or_default();

            Delivery {
                id: self.registry.register(delivery.delivery_tag),
                exchange: delivery.exchange.as_str().to_string(),
                routing_key: delivery.routing_key.as_str().to_string(),
                redelivered: delivery.redelivered,
                content_type: properties
                    .content_type()
                    .as_ref()
                    .map(|s| s.as_str().to_string()),
                message_id: properties
                    .message_id()
                    .as_ref()
                    .map(|s| s.as_str().to_string()),
                headers,
                payload: delivery.data,
            }
        }))
    }

    fn settler(&self) -> Arc<dyn DeliverySettler> {
        Arc::clone(&self.settler) as Arc<dyn DeliverySettler>
    }
}

#[async_trait]
impl DeliverySettler for AmqpSettler {
    async fn ack(&self, delivery_id: &str, cumulative: bool) -> BrokerResult<()> {
        let tag = self.registry.settle(delivery_id, cumulative)?;
        self.channel
            .basic_ack(tag, BasicAckOptions { multiple: cumulative })
            .await?;
        debug!(delivery_id, tag, cumulative, "acked");
        Ok(())
    }

    async fn nack(&self, delivery_id: &str, requeue: bool) -> BrokerResult<()> {
        let tag = self.registry.settle(delivery_id, false)?;
        self.channel
            .basic_nack(
                tag,
                BasicNackOptions {
                    multiple: false,
                    requeue,
                },
            )
            .await?;
        debug!(delivery_id, tag, requeue, "nacked");
        Ok(())
    }

    async fn requeue_outstanding(&self) -> BrokerResult<usize> {
        let tags = self.registry.drain();
        let count = tags.len();
        for tag in tags {
            self.channel
                .basic_nack(
                    tag,
                    BasicNackOptions {
                        multiple: false,
                        requeue: true,
                    },
                )
                .await?;
        }
        if count > 0 {
            debug!(queue = %self.queue, count, "requeued outstanding deliveries");
        }
        Ok(count)
    }

    async fn cancel(&self) -> BrokerResult<()> {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.channel
            .basic_cancel(&self.consumer_tag, BasicCancelOptions::default())
            .await?;
        debug!(queue = %self.queue, "consumer cancelled");
        Ok(())
    }
}

fn build_properties(properties: MessageProperties) -> BasicProperties {
    let mut props = BasicProperties::default();
    if let Some(content_type) = properties.content_type {
        props = props.with_content_type(content_type.into());
    }
    if let Some(message_id) = properties.message_id {
        props = props.with_message_id(message_id.into());
    }
    if properties.persistent {
        props = props.with_delivery_mode(2);
    }
    if !properties.headers.is_empty() {
        let mut table = FieldTable::default();
        for (key, value) in properties.headers {
            table.insert(key.into(), AMQPValue::LongString(value.into()));
        }
        props = props.with_headers(table);
    }
    props
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_properties_maps_every_field() {
        let props = build_properties(MessageProperties {
            content_type: Some("application/json".to_string()),
            message_id: Some("m-1".to_string()),
            persistent: true,
            headers: vec![("tenant".to_string(), "acme".to_string())],
        });

        assert_eq!(
            props.content_type().as_ref().map(|s| s.as_str()),
            Some("application/json")
        );
        assert_eq!(props.message_id().as_ref().map(|s| s.as_str()), Some("m-1"));
        assert_eq!(*props.delivery_mode(), Some(2));
        let headers = props.headers().as_ref().unwrap();
        assert!(headers
            .inner()
            .get(&lapin::types::ShortString::from("tenant"))
            .is_some());
    }

    #[test]
    fn empty_properties_stay_empty() {
        let props = build_properties(MessageProperties::default());
        assert!(props.content_type().is_none());
        assert!(props.headers().is_none());
        assert!(props.delivery_mode().is_none());
    }
}
