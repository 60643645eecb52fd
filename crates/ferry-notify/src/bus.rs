//! Notification bus - in-process publish/subscribe
//!
//! Each subscription owns a bounded queue fed by the publisher. Publishing
//! never waits on a subscriber: when a queue is full its oldest undelivered
//! event is dropped and the subscriber is handed a single `Dropped(n)`
//! marker before its next event.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, trace, warn};

use ferry_core::NotificationEvent;

use crate::EventFilter;

/// Subscription identity
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Bus configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Maximum undelivered events held per subscriber
    pub queue_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        BusConfig {
            queue_capacity: 256,
        }
    }
}

/// What a subscriber receives
#[derive(Clone, Debug, PartialEq)]
pub enum Delivery {
    Event(Arc<NotificationEvent>),
    /// `n` older events were dropped because this subscriber fell behind
    Dropped(u64),
}

impl Delivery {
    pub fn event(&self) -> Option<&NotificationEvent> {
        match self {
            Delivery::Event(event) => Some(event),
            Delivery::Dropped(_) => None,
        }
    }
}

/// Bus-wide counters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BusStats {
    pub published: u64,
    pub enqueued: u64,
    pub dropped: u64,
    pub subscribers: usize,
}

#[derive(Debug)]
struct QueueState {
    events: VecDeque<Arc<NotificationEvent>>,
    /// Drops not yet reported to the subscriber
    pending_dropped: u64,
    dropped_total: u64,
    closed: bool,
}

struct SubscriberQueue {
    id: SubscriptionId,
    filter: EventFilter,
    capacity: usize,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl SubscriberQueue {
    fn new(id: SubscriptionId, filter: EventFilter, capacity: usize) -> Self {
        SubscriberQueue {
            id,
            filter,
            capacity,
            state: Mutex::new(QueueState {
                events: VecDeque::with_capacity(capacity.min(64)),
                pending_dropped: 0,
                dropped_total: 0,
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Enqueue without blocking; returns true if an older event was dropped
    fn push(&self, event: Arc<NotificationEvent>) -> bool {
        let dropped = {
            let mut state = self.state.lock();
            if state.closed {
                return false;
            }
            let mut dropped = false;
            if state.events.len() >= self.capacity {
                state.events.pop_front();
                state.pending_dropped += 1;
                state.dropped_total += 1;
                dropped = true;
                if state.pending_dropped == 1 {
                    warn!(subscription = %self.id, "subscriber queue full, dropping oldest events");
                }
            }
            state.events.push_back(event);
            dropped
        };
        self.notify.notify_one();
        dropped
    }

    fn take(&self) -> Option<Delivery> {
        let mut state = self.state.lock();
        if state.pending_dropped > 0 {
            let n = std::mem::take(&mut state.pending_dropped);
            return Some(Delivery::Dropped(n));
        }
        state.events.pop_front().map(Delivery::Event)
    }

    fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_one();
    }
}

struct BusInner {
    config: BusConfig,
    subscribers: RwLock<HashMap<SubscriptionId, Arc<SubscriberQueue>>>,
    next_id: AtomicU64,
    closed: AtomicBool,
    published: AtomicU64,
    enqueued: AtomicU64,
    dropped: AtomicU64,
}

impl BusInner {
    fn remove(&self, id: SubscriptionId) -> bool {
        match self.subscribers.write().remove(&id) {
            Some(queue) => {
                queue.close();
                true
            }
            None => false,
        }
    }
}

/// Process-wide notification hub.
///
/// Cheap to clone; all clones share the same subscribers.
#[derive(Clone)]
pub struct NotificationBus {
    inner: Arc<BusInner>,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::with_config(BusConfig::default())
    }

    pub fn with_config(config: BusConfig) -> Self {
        let config = BusConfig {
            queue_capacity: config.queue_capacity.max(1),
        };
        NotificationBus {
            inner: Arc::new(BusInner {
                config,
                subscribers: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
                published: AtomicU64::new(0),
                enqueued: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    /// Fan an event out to every matching subscriber.
    ///
    /// Never blocks on subscribers. Returns how many queues received it.
    pub fn publish(&self, event: NotificationEvent) -> usize {
        if self.inner.closed.load(Ordering::Acquire) {
            trace!(kind = %event.kind, "bus closed, event discarded");
            return 0;
        }
        self.inner.published.fetch_add(1, Ordering::Relaxed);

        let event = Arc::new(event);
        let subscribers = self.inner.subscribers.read();
        let mut delivered = 0;
        for queue in subscribers.values() {
            if !queue.filter.matches(&event) {
                continue;
            }
            if queue.push(Arc::clone(&event)) {
                self.inner.dropped.fetch_add(1, Ordering::Relaxed);
            }
            delivered += 1;
        }
        self.inner
            .enqueued
            .fetch_add(delivered as u64, Ordering::Relaxed);
        trace!(kind = %event.kind, session = ?event.session, delivered, "event published");
        delivered
    }

    /// Subscribe to events published from now on that match `filter`
    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let queue = Arc::new(SubscriberQueue::new(
            id,
            filter,
            self.inner.config.queue_capacity,
        ));
        if self.inner.closed.load(Ordering::Acquire) {
            queue.close();
        } else {
            self.inner.subscribers.write().insert(id, Arc::clone(&queue));
        }
        debug!(subscription = %id, "subscriber added");
        Subscription {
            id,
            queue,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Remove a subscription. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.inner.remove(id);
        if removed {
            debug!(subscription = %id, "subscriber removed");
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }

    /// Stop accepting events and close every subscriber queue.
    ///
    /// Subscribers still drain what was queued before the close.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let subscribers: Vec<_> = self.inner.subscribers.write().drain().collect();
        for (_, queue) in &subscribers {
            queue.close();
        }
        debug!(subscribers = subscribers.len(), "notification bus closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.inner.published.load(Ordering::Relaxed),
            enqueued: self.inner.enqueued.load(Ordering::Relaxed),
            dropped: self.inner.dropped.load(Ordering::Relaxed),
            subscribers: self.subscriber_count(),
        }
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for NotificationBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationBus")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Subscription handle; unsubscribes when dropped
pub struct Subscription {
    id: SubscriptionId,
    queue: Arc<SubscriberQueue>,
    bus: Weak<BusInner>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Next delivery, waiting if the queue is empty.
    ///
    /// Returns `None` once the subscription is closed and drained.
    pub async fn recv(&mut self) -> Option<Delivery> {
        loop {
            if let Some(delivery) = self.queue.take() {
                return Some(delivery);
            }
            if self.queue.is_closed() {
                return None;
            }
            self.queue.notify.notified().await;
        }
    }

    /// Next delivery if one is queued
    pub fn try_recv(&mut self) -> Option<Delivery> {
        self.queue.take()
    }

    /// Events currently waiting
    pub fn pending(&self) -> usize {
        self.queue.state.lock().events.len()
    }

    /// Events this subscriber has lost to overflow since subscribing
    pub fn dropped_total(&self) -> u64 {
        self.queue.state.lock().dropped_total
    }

    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }

    pub fn unsubscribe(self) {
        // Drop does the work
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("filter", &self.queue.filter)
            .finish()
    }
}
