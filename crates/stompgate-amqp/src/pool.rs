//! Bounded channel allocation.
//!
//! The AMQP connection is shared by every session; channels are the unit of
//! contention. The pool hands out permits through a semaphore so that channel
//! allocation suspends the requesting session until a slot frees up, or fails
//! with `ChannelAcquisitionTimeout` once the configured deadline passes.
//! A permit travels inside [`PooledChannel`] and releases on every exit path.

use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use lapin::Channel;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::trace;

use crate::error::{BrokerError, BrokerResult};

#[derive(Debug, Clone)]
pub struct ChannelPool {
    permits: Arc<Semaphore>,
    acquire_timeout: Duration,
}

impl ChannelPool {
    pub fn new(size: usize, acquire_timeout: Duration) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(size)),
            acquire_timeout,
        }
    }

    /// Wait for a channel slot.
    pub async fn acquire(&self) -> BrokerResult<OwnedSemaphorePermit> {
        let permit = tokio::time::timeout(
            self.acquire_timeout,
            Arc::clone(&self.permits).acquire_owned(),
        )
        .await
        .map_err(|_| BrokerError::ChannelAcquisitionTimeout)?
        .map_err(|_| BrokerError::ChannelAcquisitionTimeout)?;
        trace!(available = self.permits.available_permits(), "channel permit acquired");
        Ok(permit)
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

/// A broker channel plus the pool permit that authorized it.
#[derive(Debug)]
pub struct PooledChannel {
    channel: Channel,
    _permit: OwnedSemaphorePermit,
}

impl PooledChannel {
    pub(crate) fn new(channel: Channel, permit: OwnedSemaphorePermit) -> Self {
        Self {
            channel,
            _permit: permit,
        }
    }
}

impl Deref for PooledChannel {
    type Target = Channel;

    fn deref(&self) -> &Channel {
        &self.channel
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_suspends_until_a_permit_frees() {
        let pool = ChannelPool::new(1, Duration::from_secs(1));
        let held = pool.acquire().await.unwrap();
        assert_eq!(pool.available(), 0);

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await })
        };
        drop(held);
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn exhausted_pool_times_out() {
        let pool = ChannelPool::new(1, Duration::from_millis(20));
        let _held = pool.acquire().await.unwrap();

        match pool.acquire().await {
            Err(BrokerError::ChannelAcquisitionTimeout) => {}
            other => panic!("unexpected {other:?}"),
        }
    }
}
