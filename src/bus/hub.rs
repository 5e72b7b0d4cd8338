//! Topic registry and fan-out delivery.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::mpsc::{self, error::TrySendError};

use super::event::{Event, Topic};

/// Default per-subscription channel capacity.
pub const DEFAULT_BUFFER_SIZE: usize = 256;

/// Identifier of one subscription (one delivery channel).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Point-in-time counters for the bus.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    /// Publish calls, including those with no subscribers.
    pub published: u64,
    /// Successful channel deliveries.
    pub delivered: u64,
    /// Deliveries dropped because the subscriber's channel was full.
    pub dropped: u64,
    /// Topics with at least one subscriber.
    pub topics: usize,
    /// Topic bindings across all subscriptions.
    pub bindings: usize,
}

struct Subscriber {
    id: SubscriptionId,
    tx: mpsc::Sender<Event>,
}

struct Shared {
    topics: RwLock<HashMap<Arc<str>, Vec<Subscriber>>>,
    buffer_size: usize,
    next_id: AtomicU64,
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

/// In-memory publish/subscribe hub.
///
/// Cloning is cheap and every clone shares the same registry.
#[derive(Clone)]
pub struct EventBus {
    shared: Arc<Shared>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("buffer_size", &self.shared.buffer_size)
            .field("stats", &self.stats())
            .finish()
    }
}

impl EventBus {
    /// Create a bus whose subscriptions buffer up to `buffer_size` events.
    ///
    /// A capacity below 1 is raised to 1.
    pub fn new(buffer_size: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                topics: RwLock::new(HashMap::new()),
                buffer_size: buffer_size.max(1),
                next_id: AtomicU64::new(1),
                published: AtomicU64::new(0),
                delivered: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Per-subscription channel capacity.
    pub fn buffer_size(&self) -> usize {
        self.shared.buffer_size
    }

    /// Subscribe to a single topic.
    pub fn subscribe(&self, topic: &str) -> Subscription {
        self.subscribe_many(&[topic])
    }

    /// Subscribe to several topics with one shared channel.
    ///
    /// Duplicate topic names are bound once.
    pub fn subscribe_many<S: AsRef<str>>(&self, topics: &[S]) -> Subscription {
        let id = SubscriptionId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.shared.buffer_size);

        let mut names: Vec<String> = Vec::with_capacity(topics.len());
        for topic in topics {
            let topic = topic.as_ref();
            if !names.iter().any(|n| n == topic) {
                names.push(topic.to_owned());
            }
        }

        {
            let mut registry = self.write();
            for name in &names {
                registry
                    .entry(Arc::from(name.as_str()))
                    .or_default()
                    .push(Subscriber { id, tx: tx.clone() });
            }
        }

        tracing::debug!(subscription = %id, topics = ?names, "Subscribed");
        Subscription {
            id,
            topics: names,
            rx,
        }
    }

    /// Remove `subscription` from `topic`.
    ///
    /// Removing a binding that does not exist is a no-op. Once a
    /// subscription has no topics left its channel closes and
    /// [`Subscription::recv`] returns `None` after the buffer drains.
    pub fn unsubscribe(&self, subscription: &Subscription, topic: &str) {
        let mut registry = self.write();
        let now_empty = match registry.get_mut(topic) {
            Some(subscribers) => {
                subscribers.retain(|s| s.id != subscription.id);
                subscribers.is_empty()
            }
            None => return,
        };
        if now_empty {
            registry.remove(topic);
        }
        tracing::debug!(subscription = %subscription.id, topic, "Unsubscribed");
    }

    /// Remove `subscription` from every topic it is bound to.
    pub fn unsubscribe_all(&self, subscription: &Subscription) {
        let mut registry = self.write();
        registry.retain(|_, subscribers| {
            subscribers.retain(|s| s.id != subscription.id);
            !subscribers.is_empty()
        });
        tracing::debug!(subscription = %subscription.id, "Unsubscribed from all topics");
    }

    /// Publish `payload` to every current subscriber of `topic`.
    ///
    /// Never blocks. Returns the number of subscribers the event was
    /// delivered to; full channels drop the event.
    pub fn publish<T: Any + Send + Sync>(&self, topic: &str, payload: T) -> usize {
        self.shared.published.fetch_add(1, Ordering::Relaxed);

        let mut delivered = 0;
        let mut closed = Vec::new();
        {
            let registry = self.read();
            let Some((key, subscribers)) = registry.get_key_value(topic) else {
                return 0;
            };

            let event = Event::new(Arc::clone(key), Arc::new(payload));
            for subscriber in subscribers {
                match subscriber.tx.try_send(event.clone()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(
                            topic,
                            subscription = %subscriber.id,
                            "Subscriber channel full, event dropped"
                        );
                    }
                    Err(TrySendError::Closed(_)) => closed.push(subscriber.id),
                }
            }
        }

        self.shared
            .delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);

        if !closed.is_empty() {
            self.prune(topic, &closed);
        }
        delivered
    }

    /// Publish through a typed topic handle.
    pub fn publish_to<T: Any + Send + Sync>(&self, topic: &Topic<T>, payload: T) -> usize {
        self.publish(topic.name(), payload)
    }

    /// Number of subscriptions currently bound to `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.read().get(topic).map_or(0, Vec::len)
    }

    /// Snapshot of the bus counters.
    pub fn stats(&self) -> BusStats {
        let registry = self.read();
        BusStats {
            published: self.shared.published.load(Ordering::Relaxed),
            delivered: self.shared.delivered.load(Ordering::Relaxed),
            dropped: self.shared.dropped.load(Ordering::Relaxed),
            topics: registry.len(),
            bindings: registry.values().map(Vec::len).sum(),
        }
    }

    // Receivers dropped without unsubscribing are removed on the next publish.
    fn prune(&self, topic: &str, closed: &[SubscriptionId]) {
        let mut registry = self.write();
        if let Some(subscribers) = registry.get_mut(topic) {
            subscribers.retain(|s| !closed.contains(&s.id));
            if subscribers.is_empty() {
                registry.remove(topic);
            }
        }
        tracing::debug!(topic, pruned = closed.len(), "Pruned closed subscriptions");
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<Arc<str>, Vec<Subscriber>>> {
        self.shared
            .topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Arc<str>, Vec<Subscriber>>> {
        self.shared
            .topics
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Receiving half of a subscription.
///
/// Owned by the subscriber, released with [`EventBus::unsubscribe`] or
/// [`EventBus::unsubscribe_all`].
pub struct Subscription {
    id: SubscriptionId,
    topics: Vec<String>,
    rx: mpsc::Receiver<Event>,
}

impl Subscription {
    /// Identifier used by the bus for this channel.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Topics this subscription was created for.
    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// Wait for the next event. `None` once the subscription has no topics
    /// left and the buffer is drained.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Take a buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    /// Number of events waiting in the buffer.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("topics", &self.topics)
            .field("pending", &self.rx.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let bus = EventBus::new(4);
        assert_eq!(bus.publish("nobody_listens", 1_u8), 0);

        let stats = bus.stats();
        assert_eq!(stats.published, 1);
        assert_eq!(stats.delivered, 0);
        assert_eq!(stats.topics, 0);
    }

    #[test]
    fn test_buffer_size_minimum() {
        assert_eq!(EventBus::new(0).buffer_size(), 1);
        assert_eq!(EventBus::default().buffer_size(), DEFAULT_BUFFER_SIZE);
    }

    #[tokio::test]
    async fn test_fan_out_to_all_subscribers() {
        let bus = EventBus::new(4);
        let mut a = bus.subscribe("array_status_update");
        let mut b = bus.subscribe("array_status_update");
        let mut other = bus.subscribe("system_update");

        assert_eq!(bus.publish("array_status_update", "Started".to_string()), 2);

        let ea = a.recv().await.unwrap();
        let eb = b.recv().await.unwrap();
        assert_eq!(ea.topic(), "array_status_update");
        assert_eq!(ea.payload::<String>().unwrap(), "Started");
        assert_eq!(eb.payload::<String>().unwrap(), "Started");
        assert!(other.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery_and_closes_channel() {
        let bus = EventBus::new(4);
        let mut sub = bus.subscribe("disk_list_update");

        bus.publish("disk_list_update", 1_u32);
        bus.unsubscribe(&sub, "disk_list_update");
        assert_eq!(bus.publish("disk_list_update", 2_u32), 0);

        // Buffered event still drains, then the channel reports closed.
        assert_eq!(sub.recv().await.unwrap().payload::<u32>(), Some(&1));
        assert!(sub.recv().await.is_none());
    }

    #[test]
    fn test_unsubscribe_twice_is_noop() {
        let bus = EventBus::new(4);
        let sub = bus.subscribe("vm_list_update");
        bus.unsubscribe(&sub, "vm_list_update");
        bus.unsubscribe(&sub, "vm_list_update");
        bus.unsubscribe(&sub, "never_subscribed");
        assert_eq!(bus.subscriber_count("vm_list_update"), 0);
    }

    #[test]
    fn test_full_channel_drops_without_blocking() {
        let bus = EventBus::new(2);
        let mut slow = bus.subscribe("ups_status_update");

        let delivered: usize = (0..5_u32)
            .map(|i| bus.publish("ups_status_update", i))
            .sum();
        assert_eq!(delivered, 2);
        assert_eq!(bus.stats().dropped, 3);

        // Oldest events survive; later ones were dropped.
        assert_eq!(slow.try_recv().unwrap().payload::<u32>(), Some(&0));
        assert_eq!(slow.try_recv().unwrap().payload::<u32>(), Some(&1));
        assert!(slow.try_recv().is_none());
    }

    #[test]
    fn test_subscribe_many_shares_one_channel() {
        let bus = EventBus::new(8);
        let mut sub = bus.subscribe_many(&["a", "b", "a"]);
        assert_eq!(sub.topics(), ["a", "b"]);
        assert_eq!(bus.subscriber_count("a"), 1);

        bus.publish("a", 1_i32);
        bus.publish("b", 2_i32);
        assert_eq!(sub.pending(), 2);

        bus.unsubscribe(&sub, "a");
        bus.publish("a", 3_i32);
        bus.publish("b", 4_i32);

        let seen: Vec<i32> = std::iter::from_fn(|| sub.try_recv())
            .filter_map(|e| e.payload::<i32>().copied())
            .collect();
        assert_eq!(seen, vec![1, 2, 4]);
    }

    #[tokio::test]
    async fn test_unsubscribe_all_closes_channel() {
        let bus = EventBus::new(8);
        let mut sub = bus.subscribe_many(&["x", "y"]);
        bus.unsubscribe_all(&sub);

        assert_eq!(bus.stats().bindings, 0);
        assert!(sub.recv().await.is_none());
    }

    #[test]
    fn test_dropped_receiver_is_pruned() {
        let bus = EventBus::new(4);
        let keep = bus.subscribe("zfs_pools_update");
        drop(bus.subscribe("zfs_pools_update"));

        assert_eq!(bus.subscriber_count("zfs_pools_update"), 2);
        assert_eq!(bus.publish("zfs_pools_update", ()), 1);
        assert_eq!(bus.subscriber_count("zfs_pools_update"), 1);
        bus.unsubscribe(&keep, "zfs_pools_update");
    }

    #[tokio::test]
    async fn test_typed_topic_publish() {
        const COUNT: Topic<u64> = Topic::new("count");
        let bus = EventBus::new(4);
        let mut sub = bus.subscribe(COUNT.name());

        bus.publish_to(&COUNT, 7);
        let event = sub.recv().await.unwrap();
        assert_eq!(*event.downcast::<u64>().unwrap(), 7);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_publishers() {
        let bus = EventBus::new(1024);
        let mut sub = bus.subscribe_many(&["t0", "t1", "t2", "t3"]);

        let mut handles = Vec::new();
        for t in 0..4 {
            let bus = bus.clone();
            handles.push(tokio::spawn(async move {
                let topic = format!("t{t}");
                for i in 0..100_u32 {
                    bus.publish(&topic, i);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let mut received = 0;
        while tokio::time::timeout(Duration::from_millis(50), sub.recv())
            .await
            .ok()
            .flatten()
            .is_some()
        {
            received += 1;
        }
        assert_eq!(received, 400);
        assert_eq!(bus.stats().delivered, 400);
    }
}
