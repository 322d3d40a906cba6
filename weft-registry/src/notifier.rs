//! Lossy one-to-many fan-out
//!
//! A `Notifier` delivers values to any number of dynamically registered
//! consumers without backpressure ever reaching the producer: delivery is
//! non-blocking and a consumer whose buffer is full simply misses that value.
//! Consumers must treat their stream as gappy and re-read authoritative state
//! on wake.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tracing::debug;

type SubscriberMap<T> = HashMap<u64, mpsc::Sender<T>>;
type Subscribers<T> = Arc<Mutex<SubscriberMap<T>>>;

/// Every mutation of the map is a single insert/remove/try_send, so a lock
/// poisoned by a panicking holder still guards a structurally sound map and
/// can be taken over.
fn lock_subscribers<T>(subscribers: &Mutex<SubscriberMap<T>>) -> MutexGuard<'_, SubscriberMap<T>> {
    subscribers.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Single-producer, many-consumer notification fan-out.
pub struct Notifier<T> {
    subscribers: Subscribers<T>,
    next_id: AtomicU64,
    buffer: usize,
}

impl<T: Clone + Send + 'static> Notifier<T> {
    /// `buffer` is the per-subscriber queue depth before values are dropped
    /// for that subscriber.
    pub fn new(buffer: usize) -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
            buffer: buffer.max(1),
        }
    }

    /// Add a consumer. Dropping or cancelling the returned `Subscription`
    /// removes it.
    pub fn register(&self) -> (mpsc::Receiver<T>, Subscription) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.buffer);
        lock_subscribers(&self.subscribers).insert(id, tx);

        let subscribers = self.subscribers.clone();
        let cancel = Box::new(move || {
            lock_subscribers(&subscribers).remove(&id);
        });
        (rx, Subscription::new(cancel))
    }

    /// Deliver `value` to every current subscriber without blocking.
    ///
    /// The subscriber lock is held across delivery, so a `cancel` that has
    /// returned is guaranteed to see no further values.
    pub fn trigger(&self, value: T) {
        let mut subscribers = lock_subscribers(&self.subscribers);
        subscribers.retain(|id, tx| match tx.try_send(value.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(subscriber = id, "notifier buffer full, value dropped");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|g| g.len()).unwrap_or(0)
    }
}

/// Removes its consumer from the notifier when cancelled or dropped.
pub struct Subscription {
    cancel: Box<dyn Fn() + Send + Sync>,
    cancelled: AtomicBool,
}

impl Subscription {
    fn new(cancel: Box<dyn Fn() + Send + Sync>) -> Self {
        Self {
            cancel,
            cancelled: AtomicBool::new(false),
        }
    }

    /// Idempotent: the first call removes the subscriber and closes its
    /// channel; later calls are no-ops.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            (self.cancel)();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_delivers_to_all_subscribers() {
        let notifier = Notifier::new(4);
        let (mut rx1, _sub1) = notifier.register();
        let (mut rx2, _sub2) = notifier.register();

        notifier.trigger(7u32);

        assert_eq!(rx1.recv().await, Some(7));
        assert_eq!(rx2.recv().await, Some(7));
    }

    #[tokio::test]
    async fn test_full_buffer_drops_for_that_subscriber_only() {
        let notifier = Notifier::new(1);
        let (mut slow, _sub_slow) = notifier.register();
        let (mut fast, _sub_fast) = notifier.register();

        notifier.trigger(1u32);
        // slow doesn't drain; its buffer (depth 1) is now full.
        notifier.trigger(2u32);

        assert_eq!(fast.recv().await, Some(1));
        assert_eq!(fast.recv().await, Some(2));

        // slow got the first value and lost the second.
        assert_eq!(slow.recv().await, Some(1));
        assert!(slow.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_trigger_never_blocks_on_stalled_subscriber() {
        let notifier = Notifier::new(1);
        let (_stalled, _sub) = notifier.register();

        // Many triggers against a never-draining subscriber return promptly.
        for i in 0..100u32 {
            notifier.trigger(i);
        }
        assert_eq!(notifier.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent_and_stops_delivery() {
        let notifier = Notifier::<u32>::new(4);
        let (mut rx, sub) = notifier.register();

        notifier.trigger(1u32);
        sub.cancel();
        sub.cancel();
        notifier.trigger(2u32);

        assert_eq!(rx.recv().await, Some(1));
        // Channel closed, nothing after cancel.
        assert_eq!(rx.recv().await, None);
        assert_eq!(notifier.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_drop_subscription_unregisters() {
        let notifier = Notifier::<u32>::new(4);
        let (_rx, sub) = notifier.register();
        assert_eq!(notifier.subscriber_count(), 1);
        drop(sub);
        assert_eq!(notifier.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_pruned_on_trigger() {
        let notifier = Notifier::<u32>::new(4);
        let (rx, sub) = notifier.register();
        drop(rx);
        // Subscription still registered until a trigger notices the closure.
        notifier.trigger(1u32);
        assert_eq!(notifier.subscriber_count(), 0);
        drop(sub);
    }
}
