//! Asynchronous fan-out event bus.
//!
//! Every subscriber owns a bounded queue. Publishing never blocks on a
//! slow subscriber for longer than the grace period: a subscriber whose
//! queue is still full when the deadline passes is detached and a
//! [`NetworkEvent::SubscriberDetached`] event is emitted to the others.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use crate::event::NetworkEvent;

pub const DEFAULT_BUS_CAPACITY: usize = 1024;
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_millis(500);

/// Identifies a subscription so publishers can skip it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

#[derive(Clone, Debug)]
pub struct EventBusConfig {
    /// Queue length per subscriber.
    pub capacity: usize,
    /// How long one publish may wait on full subscriber queues.
    pub grace_period: Duration,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_BUS_CAPACITY,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

struct Subscriber {
    id: SubscriberId,
    name: String,
    tx: mpsc::Sender<NetworkEvent>,
}

struct BusInner {
    config: EventBusConfig,
    subscribers: RwLock<Vec<Subscriber>>,
    next_id: AtomicU64,
}

/// Cloneable handle to a shared bus.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

/// Receiving half of a subscription.
pub struct EventSubscription {
    id: SubscriberId,
    rx: mpsc::Receiver<NetworkEvent>,
}

impl EventSubscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next event, or `None` once the subscriber has been detached or the
    /// bus dropped.
    pub async fn recv(&mut self) -> Option<NetworkEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<NetworkEvent> {
        self.rx.try_recv().ok()
    }
}

impl EventBus {
    pub fn new(config: EventBusConfig) -> Self {
        Self {
            inner: Arc::new(BusInner {
                config,
                subscribers: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn subscribe(&self, name: impl Into<String>) -> EventSubscription {
        let id = SubscriberId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.inner.config.capacity.max(1));
        let name = name.into();
        debug!(subscriber = %name, "event bus subscription added");
        self.inner
            .subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Subscriber { id, name, tx });
        EventSubscription { id, rx }
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        self.inner
            .subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|s| s.id != id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Deliver `event` to every live subscriber.
    pub async fn publish(&self, event: NetworkEvent) {
        self.publish_inner(None, event).await;
    }

    /// Deliver `event` to every live subscriber except `skip`. Used by
    /// subscribers that publish from their own receive loop.
    pub async fn publish_except(&self, skip: SubscriberId, event: NetworkEvent) {
        self.publish_inner(Some(skip), event).await;
    }

    async fn publish_inner(&self, skip: Option<SubscriberId>, event: NetworkEvent) {
        let mut pending = VecDeque::from(vec![event]);
        while let Some(event) = pending.pop_front() {
            for name in self.deliver(skip, event).await {
                warn!(subscriber = %name, "slow event subscriber detached");
                pending.push_back(NetworkEvent::SubscriberDetached { subscriber: name });
            }
        }
    }

    /// Returns the names of subscribers detached during this delivery.
    async fn deliver(&self, skip: Option<SubscriberId>, event: NetworkEvent) -> Vec<String> {
        let targets: Vec<(SubscriberId, String, mpsc::Sender<NetworkEvent>)> = self
            .inner
            .subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|s| Some(s.id) != skip)
            .map(|s| (s.id, s.name.clone(), s.tx.clone()))
            .collect();

        let deadline = Instant::now() + self.inner.config.grace_period;
        let mut dropped = Vec::new();
        let mut detached = Vec::new();

        for (id, name, tx) in targets {
            let event = match tx.try_send(event.clone()) {
                Ok(()) => continue,
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    dropped.push(id);
                    continue;
                }
                Err(mpsc::error::TrySendError::Full(event)) => event,
            };
            match timeout_at(deadline, tx.send(event)).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => dropped.push(id),
                Err(_) => {
                    dropped.push(id);
                    detached.push(name);
                }
            }
        }

        if !dropped.is_empty() {
            self.inner
                .subscribers
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .retain(|s| !dropped.contains(&s.id));
        }
        detached
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EventBusConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(n: u64) -> NetworkEvent {
        NetworkEvent::Tick { now_secs: n }
    }

    #[tokio::test]
    async fn publish_reaches_every_subscriber() {
        let bus = EventBus::default();
        let mut a = bus.subscribe("a");
        let mut b = bus.subscribe("b");

        bus.publish(tick(1)).await;

        assert!(matches!(a.recv().await, Some(NetworkEvent::Tick { now_secs: 1 })));
        assert!(matches!(b.recv().await, Some(NetworkEvent::Tick { now_secs: 1 })));
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_is_noop() {
        let bus = EventBus::default();
        bus.publish(tick(1)).await;
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn publish_except_skips_the_publisher() {
        let bus = EventBus::default();
        let mut me = bus.subscribe("me");
        let mut other = bus.subscribe("other");

        bus.publish_except(me.id(), tick(7)).await;

        assert!(other.try_recv().is_some());
        assert!(me.try_recv().is_none());
    }

    #[tokio::test]
    async fn events_arrive_in_publish_order() {
        let bus = EventBus::default();
        let mut sub = bus.subscribe("ordered");
        for n in 0..10 {
            bus.publish(tick(n)).await;
        }
        for n in 0..10 {
            match sub.recv().await {
                Some(NetworkEvent::Tick { now_secs }) => assert_eq!(now_secs, n),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_subscriber_is_detached_after_grace() {
        let bus = EventBus::new(EventBusConfig {
            capacity: 1,
            grace_period: Duration::from_millis(50),
        });
        let mut slow = bus.subscribe("slow");
        let mut watcher = bus.subscribe("watcher");

        bus.publish(tick(1)).await;
        // watcher drains, slow never does
        assert!(watcher.try_recv().is_some());
        bus.publish(tick(2)).await;

        assert_eq!(bus.subscriber_count(), 1);
        assert!(matches!(watcher.try_recv(), Some(NetworkEvent::Tick { now_secs: 2 })));
        match watcher.try_recv() {
            Some(NetworkEvent::SubscriberDetached { subscriber }) => assert_eq!(subscriber, "slow"),
            other => panic!("unexpected {other:?}"),
        }
        // the queued event is still readable, then the channel ends
        assert!(slow.try_recv().is_some());
        assert!(slow.recv().await.is_none());
    }

    #[tokio::test]
    async fn dropped_subscription_is_pruned() {
        let bus = EventBus::default();
        let sub = bus.subscribe("gone");
        drop(sub);
        bus.publish(tick(1)).await;
        assert_eq!(bus.subscriber_count(), 0);
    }
}
