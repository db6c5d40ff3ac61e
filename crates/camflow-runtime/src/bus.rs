//! Typed topic bus
//!
//! Every publish wraps the message in one `Arc` and hands the dispatcher a
//! single batch with one job per current subscriber, each tagged with that
//! subscriber's priority. The dispatcher decides the order; the bus never
//! runs callbacks inline.
//!
//! Callback failures (errors or panics) are counted and logged per
//! subscriber and never affect delivery to the others.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use camflow_core::{Message, PriorityClass, SubscriptionId, Topic};
use parking_lot::RwLock;

use crate::{BusError, BusResult, CallbackError, Dispatcher, ReadyJob, ScheduleError};

type Erased = Arc<dyn Any + Send + Sync>;
type Deliver = Box<dyn Fn(Erased) -> Result<(), CallbackError> + Send + Sync>;

struct Subscriber {
    id: SubscriptionId,
    priority: PriorityClass,
    label: Arc<str>,
    deliver: Deliver,
    active: AtomicBool,
}

struct TopicEntry {
    type_id: TypeId,
    type_name: &'static str,
    subscribers: Vec<Arc<Subscriber>>,
}

#[derive(Debug, Default)]
struct Counters {
    published: AtomicU64,
    scheduled: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Bus counters snapshot
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BusStats {
    pub published: u64,
    /// Subscriber jobs accepted by the dispatcher
    pub scheduled: u64,
    /// Callbacks that returned Ok
    pub delivered: u64,
    /// Callbacks that returned an error or panicked
    pub failed: u64,
    /// Subscriber jobs the dispatcher refused
    pub dropped: u64,
}

struct BusShared {
    topics: RwLock<HashMap<&'static str, TopicEntry>>,
    dispatcher: Arc<dyn Dispatcher>,
    next_id: AtomicU64,
    counters: Counters,
}

/// Outcome of one publish call
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PublishReceipt {
    pub scheduled: usize,
    pub dropped: usize,
}

/// In-process publish/subscribe bus. Cheap to clone.
#[derive(Clone)]
pub struct Bus {
    shared: Arc<BusShared>,
}

impl Bus {
    pub fn new(dispatcher: Arc<dyn Dispatcher>) -> Self {
        Bus {
            shared: Arc::new(BusShared {
                topics: RwLock::new(HashMap::new()),
                dispatcher,
                next_id: AtomicU64::new(1),
                counters: Counters::default(),
            }),
        }
    }

    pub fn dispatcher(&self) -> &Arc<dyn Dispatcher> {
        &self.shared.dispatcher
    }

    /// Register `callback` on `topic`. The subscription lives until the
    /// returned handle is dropped.
    pub fn subscribe<M, F>(
        &self,
        topic: Topic<M>,
        priority: PriorityClass,
        label: &str,
        callback: F,
    ) -> BusResult<Subscription>
    where
        M: Message,
        F: Fn(&M) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        let id = SubscriptionId::new(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let deliver: Deliver = Box::new(move |message: Erased| {
            let message = message
                .downcast::<M>()
                .map_err(|_| CallbackError::from("message type does not match subscription"))?;
            callback(&*message)
        });
        let subscriber = Arc::new(Subscriber {
            id,
            priority,
            label: Arc::from(label),
            deliver,
            active: AtomicBool::new(true),
        });

        {
            let mut topics = self.shared.topics.write();
            let entry = topics.entry(topic.name()).or_insert_with(|| TopicEntry {
                type_id: TypeId::of::<M>(),
                type_name: std::any::type_name::<M>(),
                subscribers: Vec::new(),
            });
            check_type::<M>(topic.name(), entry)?;
            entry.subscribers.push(subscriber.clone());
        }

        tracing::debug!(topic = topic.name(), %id, %priority, label, "subscribed");
        Ok(Subscription {
            id,
            topic: topic.name(),
            priority,
            subscriber,
            bus: Arc::downgrade(&self.shared),
        })
    }

    /// Typed publishing handle for `topic`
    pub fn publisher<M: Message>(&self, topic: Topic<M>) -> Publisher<M> {
        Publisher {
            bus: self.clone(),
            topic,
        }
    }

    /// Deliver `message` to every current subscriber of `topic`
    pub fn publish<M: Message>(&self, topic: Topic<M>, message: M) -> BusResult<PublishReceipt> {
        let counters = &self.shared.counters;
        counters.published.fetch_add(1, Ordering::Relaxed);

        let message: Erased = Arc::new(message);
        let batch: Vec<ReadyJob> = {
            let topics = self.shared.topics.read();
            let Some(entry) = topics.get(topic.name()) else {
                return Ok(PublishReceipt::default());
            };
            check_type::<M>(topic.name(), entry)?;
            entry
                .subscribers
                .iter()
                .map(|subscriber| self.delivery_job(subscriber.clone(), message.clone()))
                .collect()
        };

        let jobs = batch.len();
        match self.shared.dispatcher.submit_batch(batch) {
            Ok(()) => {
                counters.scheduled.fetch_add(jobs as u64, Ordering::Relaxed);
                Ok(PublishReceipt {
                    scheduled: jobs,
                    dropped: 0,
                })
            }
            Err(ScheduleError::QueueFull { dropped, .. }) => {
                counters.scheduled.fetch_add((jobs - dropped) as u64, Ordering::Relaxed);
                counters.dropped.fetch_add(dropped as u64, Ordering::Relaxed);
                tracing::warn!(topic = topic.name(), dropped, "deliveries dropped, not retried");
                Ok(PublishReceipt {
                    scheduled: jobs - dropped,
                    dropped,
                })
            }
            Err(e) => {
                counters.dropped.fetch_add(jobs as u64, Ordering::Relaxed);
                Err(e.into())
            }
        }
    }

    fn delivery_job(&self, subscriber: Arc<Subscriber>, message: Erased) -> ReadyJob {
        let shared = self.shared.clone();
        let priority = subscriber.priority;
        let label = subscriber.label.to_string();
        ReadyJob::new(priority, label, move || shared.deliver(&subscriber, message))
    }

    pub fn stats(&self) -> BusStats {
        let c = &self.shared.counters;
        BusStats {
            published: c.published.load(Ordering::Relaxed),
            scheduled: c.scheduled.load(Ordering::Relaxed),
            delivered: c.delivered.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
        }
    }

    /// Current subscriber count on a topic
    pub fn subscriber_count<M>(&self, topic: Topic<M>) -> usize {
        self.shared
            .topics
            .read()
            .get(topic.name())
            .map_or(0, |entry| entry.subscribers.len())
    }
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus").field("stats", &self.stats()).finish()
    }
}

impl BusShared {
    fn deliver(&self, subscriber: &Subscriber, message: Erased) {
        // Removed after scheduling: skip. A callback already running finishes.
        if !subscriber.active.load(Ordering::Acquire) {
            tracing::debug!(label = %subscriber.label, "subscriber gone, delivery skipped");
            return;
        }

        let outcome = catch_unwind(AssertUnwindSafe(|| (subscriber.deliver)(message)));
        match outcome {
            Ok(Ok(())) => {
                self.counters.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(e)) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(label = %subscriber.label, id = %subscriber.id, "callback failed: {}", e);
            }
            Err(_) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(label = %subscriber.label, id = %subscriber.id, "callback panicked");
            }
        }
    }

    fn unsubscribe(&self, topic: &'static str, id: SubscriptionId) {
        let mut topics = self.topics.write();
        if let Some(entry) = topics.get_mut(topic) {
            entry.subscribers.retain(|s| s.id != id);
        }
    }
}

fn check_type<M: 'static>(topic: &'static str, entry: &TopicEntry) -> BusResult<()> {
    if entry.type_id != TypeId::of::<M>() {
        return Err(BusError::TypeMismatch {
            topic,
            existing: entry.type_name,
            requested: std::any::type_name::<M>(),
        });
    }
    Ok(())
}

/// Subscription handle. Dropping it unsubscribes.
pub struct Subscription {
    id: SubscriptionId,
    topic: &'static str,
    priority: PriorityClass,
    subscriber: Arc<Subscriber>,
    bus: Weak<BusShared>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn topic(&self) -> &'static str {
        self.topic
    }

    pub fn priority(&self) -> PriorityClass {
        self.priority
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.subscriber.active.store(false, Ordering::Release);
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.topic, self.id);
        }
        tracing::debug!(topic = self.topic, id = %self.id, "unsubscribed");
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .field("priority", &self.priority)
            .finish()
    }
}

/// Typed publisher bound to one topic
pub struct Publisher<M> {
    bus: Bus,
    topic: Topic<M>,
}

impl<M: Message> Publisher<M> {
    pub fn publish(&self, message: M) -> BusResult<PublishReceipt> {
        self.bus.publish(self.topic, message)
    }

    pub fn topic(&self) -> Topic<M> {
        self.topic
    }
}

impl<M> Clone for Publisher<M> {
    fn clone(&self) -> Self {
        Publisher {
            bus: self.bus.clone(),
            topic: self.topic,
        }
    }
}
