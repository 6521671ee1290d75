//! Delivery bookkeeping.
//!
//! Maps the gateway-assigned delivery ids clients acknowledge against to the
//! AMQP delivery tags the broker understands. Settlement removes the entry,
//! which is what makes double-settling impossible: the second attempt finds
//! nothing and fails with `UnknownDelivery`.

use dashmap::DashMap;
use uuid::Uuid;

use crate::error::{BrokerError, BrokerResult};

/// Outstanding-delivery registry for one subscription.
#[derive(Debug, Default)]
pub struct DeliveryRegistry {
    outstanding: DashMap<String, u64>,
}

impl DeliveryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new outstanding delivery and mint its id.
    pub fn register(&self, delivery_tag: u64) -> String {
        let id = Uuid::new_v4().to_string();
        self.outstanding.insert(id.clone(), delivery_tag);
        id
    }

    /// Resolve and remove an outstanding delivery.
    ///
    /// With `cumulative`, every delivery with a tag at or below the resolved
    /// one is removed as well; the broker-side cumulative ack covers them.
    /// A second settle of the same id fails with [`BrokerError::UnknownDelivery`].
    pub fn settle(&self, delivery_id: &str, cumulative: bool) -> BrokerResult<u64> {
        let (_, tag) = self
            .outstanding
            .remove(delivery_id)
            .ok_or_else(|| BrokerError::UnknownDelivery(delivery_id.to_string()))?;
        if cumulative {
            self.outstanding.retain(|_, t| *t > tag);
        }
        Ok(tag)
    }

    /// Remove and return every outstanding tag, for teardown requeueing.
    pub fn drain(&self) -> Vec<u64> {
        let tags: Vec<u64> = self.outstanding.iter().map(|e| *e.value()).collect();
        self.outstanding.clear();
        tags
    }

    pub fn len(&self) -> usize {
        self.outstanding.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outstanding.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settle_is_exactly_once() {
        let registry = DeliveryRegistry::new();
        let id = registry.register(7);

        assert_eq!(registry.settle(&id, false).unwrap(), 7);
        match registry.settle(&id, false) {
            Err(BrokerError::UnknownDelivery(unknown)) => assert_eq!(unknown, id),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_id_is_rejected() {
        let registry = DeliveryRegistry::new();
        assert!(matches!(
            registry.settle("no-such-delivery", false),
            Err(BrokerError::UnknownDelivery(_))
        ));
    }

    #[test]
    fn cumulative_settle_covers_earlier_tags() {
        let registry = DeliveryRegistry::new();
        let _first = registry.register(1);
        let second = registry.register(2);
        let third = registry.register(3);

        registry.settle(&second, true).unwrap();
        assert_eq!(registry.len(), 1); // only tag 3 left
        assert_eq!(registry.settle(&third, false).unwrap(), 3);
    }

    #[test]
    fn drain_empties_the_registry() {
        let registry = DeliveryRegistry::new();
        registry.register(1);
        registry.register(2);

        let mut tags = registry.drain();
        tags.sort_unstable();
        assert_eq!(tags, vec![1, 2]);
        assert!(registry.is_empty());
    }
}
