//! In-process event bus.
//!
//! Typed pub/sub with per-subscriber bounded queues. Publishing never blocks
//! and never fails: a full subscriber queue drops its oldest event and counts
//! the drop, so one slow consumer cannot stall the bus or other subscribers.
//! Delivery is at-least-once per live subscriber, FIFO within a subscriber.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::types::{Event, EventKind, EventSeverity};

const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Subscriber-side predicate. Empty filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub kinds: Option<HashSet<EventKind>>,
    pub route_id: Option<Uuid>,
    pub min_severity: Option<EventSeverity>,
}

impl EventFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_kinds(kinds: impl IntoIterator<Item = EventKind>) -> Self {
        Self {
            kinds: Some(kinds.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn for_route(route_id: Uuid) -> Self {
        Self { route_id: Some(route_id), ..Self::default() }
    }

    pub fn with_min_severity(mut self, severity: EventSeverity) -> Self {
        self.min_severity = Some(severity);
        self
    }

    pub fn matches(&self, event: &Event) -> bool {
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&event.kind) {
                return false;
            }
        }
        if let Some(route_id) = self.route_id {
            if event.route_id != Some(route_id) {
                return false;
            }
        }
        if let Some(min) = self.min_severity {
            if event.severity < min {
                return false;
            }
        }
        true
    }
}

struct SubscriberQueue {
    filter: EventFilter,
    queue: Mutex<VecDeque<Event>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

impl SubscriberQueue {
    fn push(&self, event: Event) {
        {
            let mut queue = self.queue.lock();
            if queue.len() >= self.capacity {
                queue.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            queue.push_back(event);
        }
        self.notify.notify_one();
    }
}

/// Handle for one subscriber. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    queue: Arc<SubscriberQueue>,
    bus: Arc<BusInner>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next event, FIFO. Waits until one arrives.
    pub async fn recv(&self) -> Event {
        loop {
            if let Some(event) = self.queue.queue.lock().pop_front() {
                return event;
            }
            self.queue.notify.notified().await;
        }
    }

    /// Next event without waiting.
    pub fn try_recv(&self) -> Option<Event> {
        self.queue.queue.lock().pop_front()
    }

    /// Events lost to queue overflow so far.
    pub fn dropped(&self) -> u64 {
        self.queue.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.subscribers.write().retain(|(id, _)| *id != self.id);
    }
}

struct BusInner {
    subscribers: RwLock<Vec<(u64, Arc<SubscriberQueue>)>>,
    next_id: AtomicU64,
    published: AtomicU64,
}

/// The event bus. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
    queue_capacity: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl EventBus {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
                published: AtomicU64::new(0),
            }),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Deliver an event to every matching subscriber. Non-blocking.
    pub fn publish(&self, event: Event) {
        self.inner.published.fetch_add(1, Ordering::Relaxed);
        let subscribers = self.inner.subscribers.read();
        for (_, queue) in subscribers.iter() {
            if queue.filter.matches(&event) {
                queue.push(event.clone());
            }
        }
    }

    /// Register a subscriber with the given filter.
    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(SubscriberQueue {
            filter,
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity: self.queue_capacity,
            dropped: AtomicU64::new(0),
        });
        self.inner.subscribers.write().push((id, Arc::clone(&queue)));
        Subscription { id, queue, bus: Arc::clone(&self.inner) }
    }

    /// Explicit unsubscribe by handle id (dropping the handle also works).
    pub fn unsubscribe(&self, id: u64) {
        self.inner.subscribers.write().retain(|(sid, _)| *sid != id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }

    pub fn published_count(&self) -> u64 {
        self.inner.published.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventStatus;

    fn event(kind: EventKind, severity: EventSeverity) -> Event {
        Event::new(kind, severity, kind.as_str())
    }

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let bus = EventBus::default();
        let sub = bus.subscribe(EventFilter::all());

        bus.publish(event(EventKind::TrafficDelay, EventSeverity::Medium));

        let received = sub.recv().await;
        assert_eq!(received.kind, EventKind::TrafficDelay);
        assert_eq!(received.status, EventStatus::Active);
    }

    #[tokio::test]
    async fn test_fifo_per_subscriber() {
        let bus = EventBus::default();
        let sub = bus.subscribe(EventFilter::all());

        for i in 0..5 {
            let mut e = event(EventKind::Weather, EventSeverity::Low);
            e.estimated_delay_minutes = i;
            bus.publish(e);
        }
        for i in 0..5 {
            assert_eq!(sub.recv().await.estimated_delay_minutes, i);
        }
    }

    #[tokio::test]
    async fn test_kind_filter() {
        let bus = EventBus::default();
        let sub = bus.subscribe(EventFilter::for_kinds([EventKind::VehicleBreakdown]));

        bus.publish(event(EventKind::TrafficDelay, EventSeverity::High));
        bus.publish(event(EventKind::VehicleBreakdown, EventSeverity::High));

        let received = sub.recv().await;
        assert_eq!(received.kind, EventKind::VehicleBreakdown);
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_route_filter() {
        let bus = EventBus::default();
        let route_id = Uuid::new_v4();
        let sub = bus.subscribe(EventFilter::for_route(route_id));

        bus.publish(event(EventKind::TrafficDelay, EventSeverity::Medium));
        bus.publish(event(EventKind::TrafficDelay, EventSeverity::Medium).with_route(route_id));

        let received = sub.recv().await;
        assert_eq!(received.route_id, Some(route_id));
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_severity_filter() {
        let bus = EventBus::default();
        let sub = bus.subscribe(EventFilter::all().with_min_severity(EventSeverity::High));

        bus.publish(event(EventKind::Weather, EventSeverity::Low));
        bus.publish(event(EventKind::Weather, EventSeverity::Critical));

        assert_eq!(sub.recv().await.severity, EventSeverity::Critical);
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_slow_subscriber_drops_oldest() {
        let bus = EventBus::new(3);
        let sub = bus.subscribe(EventFilter::all());

        for i in 0..5 {
            let mut e = event(EventKind::Weather, EventSeverity::Low);
            e.estimated_delay_minutes = i;
            bus.publish(e);
        }

        // Oldest two were dropped; 2, 3, 4 remain in order
        assert_eq!(sub.dropped(), 2);
        assert_eq!(sub.try_recv().unwrap().estimated_delay_minutes, 2);
        assert_eq!(sub.try_recv().unwrap().estimated_delay_minutes, 3);
        assert_eq!(sub.try_recv().unwrap().estimated_delay_minutes, 4);
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_full_queue_never_blocks_publisher() {
        let bus = EventBus::new(1);
        let _sub = bus.subscribe(EventFilter::all());

        // Publisher stays synchronous and unblocked regardless of consumers
        for _ in 0..100 {
            bus.publish(event(EventKind::Weather, EventSeverity::Low));
        }
        assert_eq!(bus.published_count(), 100);
    }

    #[tokio::test]
    async fn test_independent_subscriber_queues() {
        let bus = EventBus::new(2);
        let slow = bus.subscribe(EventFilter::all());
        let fast = bus.subscribe(EventFilter::all());

        for i in 0..4 {
            let mut e = event(EventKind::Weather, EventSeverity::Low);
            e.estimated_delay_minutes = i;
            bus.publish(e);
            // Fast consumer keeps up
            assert_eq!(fast.recv().await.estimated_delay_minutes, i);
        }

        // Slow consumer lost the oldest two, fast lost nothing
        assert_eq!(slow.dropped(), 2);
        assert_eq!(fast.dropped(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let bus = EventBus::default();
        let sub = bus.subscribe(EventFilter::all());
        assert_eq!(bus.subscriber_count(), 1);

        bus.unsubscribe(sub.id());
        assert_eq!(bus.subscriber_count(), 0);

        bus.publish(event(EventKind::Weather, EventSeverity::Low));
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let bus = EventBus::default();
        {
            let _sub = bus.subscribe(EventFilter::all());
            assert_eq!(bus.subscriber_count(), 1);
        }
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_recv_wakes_on_publish() {
        let bus = EventBus::default();
        let sub = bus.subscribe(EventFilter::all());

        let publisher = {
            let bus = bus.clone();
            tokio::spawn(async move {
                tokio::task::yield_now().await;
                bus.publish(event(EventKind::NewUrgentOrder, EventSeverity::High));
            })
        };

        let received = sub.recv().await;
        assert_eq!(received.kind, EventKind::NewUrgentOrder);
        publisher.await.unwrap();
    }
}
