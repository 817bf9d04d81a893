//! Subscription registry
//!
//! Maps topic -> client id -> `Subscriber`. Each topic bucket is a `Topic`
//! holding its live subscribers; a bucket is dropped when it becomes empty.
//!
//! Concurrency note: the whole registry sits behind one `RwLock`. Broadcasts
//! take the read side so they run in parallel with each other; register and
//! unregister take the write side. Subscriber callbacks (`close`) are never
//! invoked while the lock is held; the registry hands the removed subscriber
//! back to the caller instead.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::broker::message::Delivery;
use crate::broker::subscriber::Subscriber;

pub type ClientId = String;

/// Identifies one successful registration. A later registration of the same
/// `(topic, client_id)` gets a different serial, so releasing a stale token
/// never removes its successor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub topic: String,
    pub client_id: ClientId,
    serial: u64,
}

struct Slot {
    serial: u64,
    subscriber: Arc<dyn Subscriber>,
}

#[derive(Default)]
struct Topic {
    subscribers: HashMap<ClientId, Slot>,
}

/// Result of a single broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastOutcome {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    topics: RwLock<HashMap<String, Topic>>,
    next_serial: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `subscriber` under `(topic, client_id)`. Returns the new
    /// registration and, if the slot was taken, the subscriber it displaced.
    pub fn register(
        &self,
        topic: &str,
        client_id: &str,
        subscriber: Arc<dyn Subscriber>,
    ) -> (Registration, Option<Arc<dyn Subscriber>>) {
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        let displaced = self
            .topics
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(topic.to_string())
            .or_default()
            .subscribers
            .insert(client_id.to_string(), Slot { serial, subscriber })
            .map(|slot| slot.subscriber);

        let registration = Registration {
            topic: topic.to_string(),
            client_id: client_id.to_string(),
            serial,
        };
        (registration, displaced)
    }

    /// Remove whatever is registered under `(topic, client_id)`.
    pub fn unregister(&self, topic: &str, client_id: &str) -> Option<Arc<dyn Subscriber>> {
        self.remove_if(topic, client_id, |_| true)
    }

    /// Remove the slot only if it still holds `registration`.
    pub fn release(&self, registration: &Registration) -> Option<Arc<dyn Subscriber>> {
        self.remove_if(&registration.topic, &registration.client_id, |slot| {
            slot.serial == registration.serial
        })
    }

    fn remove_if(
        &self,
        topic: &str,
        client_id: &str,
        pred: impl FnOnce(&Slot) -> bool,
    ) -> Option<Arc<dyn Subscriber>> {
        let mut topics = self.topics.write().unwrap_or_else(PoisonError::into_inner);
        let bucket = topics.get_mut(topic)?;
        let removed = if bucket.subscribers.get(client_id).is_some_and(pred) {
            bucket.subscribers.remove(client_id)
        } else {
            None
        };
        if bucket.subscribers.is_empty() {
            topics.remove(topic);
        }
        removed.map(|slot| slot.subscriber)
    }

    /// Deliver to every subscriber of `delivery.topic`. A failing subscriber
    /// does not stop delivery to the rest.
    pub fn broadcast(&self, delivery: &Delivery) -> BroadcastOutcome {
        let topics = self.topics.read().unwrap_or_else(PoisonError::into_inner);
        let mut outcome = BroadcastOutcome::default();
        let Some(bucket) = topics.get(&delivery.topic) else {
            return outcome;
        };

        for (client_id, slot) in &bucket.subscribers {
            match slot.subscriber.deliver(delivery) {
                Ok(()) => outcome.delivered += 1,
                Err(e) => {
                    debug!("skipping {client_id} on {}: {e}", delivery.topic);
                    outcome.failed += 1;
                }
            }
        }
        outcome
    }

    pub fn subscriber_ids(&self, topic: &str) -> Vec<ClientId> {
        let topics = self.topics.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<ClientId> = topics
            .get(topic)
            .map(|bucket| bucket.subscribers.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    pub fn contains_topic(&self, topic: &str) -> bool {
        self.topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(topic)
    }

    /// Number of registered `(topic, client_id)` pairs.
    pub fn len(&self) -> usize {
        self.topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|bucket| bucket.subscribers.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
