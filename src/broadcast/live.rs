//! Live sample fan-out.

use tokio::sync::broadcast::{self, error::RecvError};

use crate::storage::Sample;

/// Default number of buffered samples per subscriber.
pub const DEFAULT_LIVE_CAPACITY: usize = 128;

/// Publishes finalized samples to any number of streaming consumers.
///
/// Backed by a bounded ring: a subscriber that falls more than `capacity`
/// samples behind loses the oldest ones. Publishing never waits on consumers.
#[derive(Clone)]
pub struct LiveBroadcaster {
    tx: broadcast::Sender<Sample>,
    capacity: usize,
}

impl std::fmt::Debug for LiveBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveBroadcaster")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.tx.receiver_count())
            .finish()
    }
}

impl Default for LiveBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_LIVE_CAPACITY)
    }
}

impl LiveBroadcaster {
    /// Create a broadcaster buffering `capacity` samples per subscriber,
    /// rounded up to the next power of two. See [`capacity`](Self::capacity).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1).next_power_of_two();
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Effective per-subscriber buffer.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Register a new subscriber. Dropping the subscription unsubscribes it.
    pub fn subscribe(&self) -> LiveSubscription {
        LiveSubscription {
            rx: self.tx.subscribe(),
            dropped: 0,
        }
    }

    /// Deliver a sample to every current subscriber.
    ///
    /// Returns the number of subscribers that will see it.
    pub fn publish(&self, sample: Sample) -> usize {
        // Err only means nobody is listening.
        self.tx.send(sample).unwrap_or(0)
    }

    /// Number of active subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// One consumer's view of the live stream.
#[derive(Debug)]
pub struct LiveSubscription {
    rx: broadcast::Receiver<Sample>,
    dropped: u64,
}

impl LiveSubscription {
    /// Next sample, skipping over anything lost to overflow.
    ///
    /// Returns `None` once the broadcaster is gone. Cancel safe.
    pub async fn recv(&mut self) -> Option<Sample> {
        loop {
            match self.rx.recv().await {
                Ok(sample) => return Some(sample),
                Err(RecvError::Lagged(skipped)) => {
                    self.dropped += skipped;
                    tracing::debug!(skipped, "Live subscriber lagged, oldest samples dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Total samples this subscriber has lost to overflow.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sample(ts: i64) -> Sample {
        Sample::new(1, ts, 10)
    }

    #[tokio::test]
    async fn test_every_subscriber_receives() {
        let live = LiveBroadcaster::new(8);
        let mut a = live.subscribe();
        let mut b = live.subscribe();

        assert_eq!(live.publish(sample(1)), 2);

        assert_eq!(a.recv().await.unwrap().timestamp_ms, 1);
        assert_eq!(b.recv().await.unwrap().timestamp_ms, 1);
    }

    #[tokio::test]
    async fn test_full_subscriber_drops_oldest_without_blocking() {
        let live = LiveBroadcaster::new(2);
        let mut slow = live.subscribe();

        // Publishing past capacity must return immediately.
        tokio::time::timeout(Duration::from_millis(100), async {
            for ts in 1..=5 {
                live.publish(sample(ts));
            }
        })
        .await
        .expect("publish must not block");

        assert_eq!(slow.recv().await.unwrap().timestamp_ms, 4);
        assert_eq!(slow.recv().await.unwrap().timestamp_ms, 5);
        assert_eq!(slow.dropped(), 3);
    }

    #[tokio::test]
    async fn test_capacity_rounds_up_to_power_of_two() {
        assert_eq!(LiveBroadcaster::new(100).capacity(), 128);
        assert_eq!(LiveBroadcaster::new(0).capacity(), 1);
        assert_eq!(LiveBroadcaster::default().capacity(), DEFAULT_LIVE_CAPACITY);

        // A requested 3 buffers 4 before the oldest is dropped
        let live = LiveBroadcaster::new(3);
        let mut slow = live.subscribe();
        for ts in 1..=5 {
            live.publish(sample(ts));
        }
        assert_eq!(slow.recv().await.unwrap().timestamp_ms, 2);
        assert_eq!(slow.dropped(), 1);
    }

    #[tokio::test]
    async fn test_slow_subscriber_does_not_affect_others() {
        let live = LiveBroadcaster::new(2);
        let _slow = live.subscribe();
        let mut fast = live.subscribe();

        for ts in 1..=4 {
            live.publish(sample(ts));
            assert_eq!(fast.recv().await.unwrap().timestamp_ms, ts);
        }
        assert_eq!(fast.dropped(), 0);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let live = LiveBroadcaster::default();
        assert_eq!(live.publish(sample(1)), 0);

        let sub = live.subscribe();
        assert_eq!(live.subscriber_count(), 1);
        drop(sub);
        assert_eq!(live.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_recv_ends_when_broadcaster_dropped() {
        let live = LiveBroadcaster::new(4);
        let mut sub = live.subscribe();
        drop(live);
        assert!(sub.recv().await.is_none());
    }
}
