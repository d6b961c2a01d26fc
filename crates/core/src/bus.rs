//! In-process event bus
//!
//! Producers call [`EventBus::emit`], which never waits on a consumer: every
//! live-tail subscriber owns a bounded queue, and a full queue only drops the
//! event for that subscriber. Subscriptions are either scoped to one run or
//! global. A consumer that must see every event (persistence) takes an
//! unbounded global subscription instead.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::run::Event;

/// Default queue depth for a subscriber
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 100;

enum Delivery {
    Bounded(mpsc::Sender<Event>),
    Unbounded(mpsc::UnboundedSender<Event>),
}

enum Sent {
    Delivered,
    Full,
    Closed,
}

impl Delivery {
    fn send(&self, event: Event) -> Sent {
        match self {
            Self::Bounded(tx) => match tx.try_send(event) {
                Ok(()) => Sent::Delivered,
                Err(mpsc::error::TrySendError::Full(_)) => Sent::Full,
                Err(mpsc::error::TrySendError::Closed(_)) => Sent::Closed,
            },
            Self::Unbounded(tx) => match tx.send(event) {
                Ok(()) => Sent::Delivered,
                Err(_) => Sent::Closed,
            },
        }
    }
}

struct Subscriber {
    scope: Option<Uuid>,
    tx: Delivery,
}

impl Subscriber {
    fn wants(&self, event: &Event) -> bool {
        self.scope.map_or(true, |run_id| run_id == event.run_id)
    }
}

struct BusInner {
    subscribers: RwLock<HashMap<u64, Subscriber>>,
    next_id: AtomicU64,
    closed: AtomicBool,
    capacity: usize,
}

impl BusInner {
    fn remove(&self, id: u64) {
        if let Ok(mut subscribers) = self.subscribers.write() {
            subscribers.remove(&id);
        }
    }
}

/// Typed publish/subscribe hub for execution events
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SUBSCRIBER_CAPACITY)
    }

    /// Create a bus whose subscribers get queues of `capacity` events
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Subscribe to the events of one run
    pub fn subscribe(&self, run_id: Uuid) -> (mpsc::Receiver<Event>, Unsubscribe) {
        self.add_subscriber(Some(run_id), self.inner.capacity)
    }

    /// Subscribe to the events of every run
    pub fn subscribe_all(&self) -> (mpsc::Receiver<Event>, Unsubscribe) {
        self.add_subscriber(None, self.inner.capacity)
    }

    /// Global subscription with its own queue depth
    pub fn subscribe_all_with_capacity(&self, capacity: usize) -> (mpsc::Receiver<Event>, Unsubscribe) {
        self.add_subscriber(None, capacity.max(1))
    }

    /// Global subscription that never drops. Emitting still does not block;
    /// the queue grows until the consumer catches up.
    pub fn subscribe_all_unbounded(&self) -> (mpsc::UnboundedReceiver<Event>, Unsubscribe) {
        let (tx, rx) = mpsc::unbounded_channel();
        let unsubscribe = self.insert(None, Delivery::Unbounded(tx));
        (rx, unsubscribe)
    }

    fn add_subscriber(&self, scope: Option<Uuid>, capacity: usize) -> (mpsc::Receiver<Event>, Unsubscribe) {
        let (tx, rx) = mpsc::channel(capacity);
        let unsubscribe = self.insert(scope, Delivery::Bounded(tx));
        (rx, unsubscribe)
    }

    fn insert(&self, scope: Option<Uuid>, tx: Delivery) -> Unsubscribe {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        // A closed bus hands out a receiver that is already finished.
        if !self.inner.closed.load(Ordering::Acquire) {
            if let Ok(mut subscribers) = self.inner.subscribers.write() {
                subscribers.insert(id, Subscriber { scope, tx });
            }
        }

        Unsubscribe {
            bus: Arc::downgrade(&self.inner),
            id,
            done: AtomicBool::new(false),
        }
    }

    /// Deliver an event to every matching subscriber without blocking
    pub fn emit(&self, event: Event) {
        if self.inner.closed.load(Ordering::Acquire) {
            return;
        }

        let mut gone = Vec::new();
        {
            let subscribers = match self.inner.subscribers.read() {
                Ok(subscribers) => subscribers,
                Err(_) => return,
            };

            for (id, subscriber) in subscribers.iter() {
                if !subscriber.wants(&event) {
                    continue;
                }
                match subscriber.tx.send(event.clone()) {
                    Sent::Delivered => {}
                    Sent::Full => {
                        warn!(
                            "Subscriber {} is full, dropping {} event {} for run {}",
                            id,
                            event.event_type(),
                            event.id,
                            event.run_id
                        );
                    }
                    Sent::Closed => gone.push(*id),
                }
            }
        }

        for id in gone {
            debug!("Removing closed subscriber {}", id);
            self.inner.remove(id);
        }
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .read()
            .map(|subscribers| subscribers.len())
            .unwrap_or(0)
    }

    /// Tear down every subscription; later emits are ignored
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        if let Ok(mut subscribers) = self.inner.subscribers.write() {
            subscribers.clear();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Cleanup handle returned with every subscription. Calling it more than once is a no-op.
pub struct Unsubscribe {
    bus: Weak<BusInner>,
    id: u64,
    done: AtomicBool,
}

impl Unsubscribe {
    pub fn unsubscribe(&self) {
        if self.done.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.id);
        }
    }
}
