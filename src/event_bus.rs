//! Process-wide topic based publish/subscribe
//!
//! Payloads are JSON values. Subscribers are held weakly so a dropped overlay
//! never keeps receiving; dead entries are pruned on publish.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

/// Stable identity of a subscriber across topics
pub type SubscriberId = u64;

static NEXT_SUBSCRIBER: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique subscriber id
pub fn next_subscriber_id() -> SubscriberId {
    NEXT_SUBSCRIBER.fetch_add(1, Ordering::Relaxed)
}

pub trait EventSubscriber: Send + Sync {
    fn handle_event(&self, payload: &Value);
}

type Subscription = (SubscriberId, Weak<dyn EventSubscriber>);

#[derive(Default)]
pub struct EventBus {
    topics: RwLock<HashMap<String, Vec<Subscription>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `id` to `topic`; subscribing twice keeps a single entry
    pub fn subscribe(&self, topic: &str, id: SubscriberId, subscriber: &Arc<dyn EventSubscriber>) {
        let mut topics = self.topics.write();
        let entries = topics.entry(topic.to_string()).or_default();
        if entries.iter().any(|(existing, _)| *existing == id) {
            return;
        }
        entries.push((id, Arc::downgrade(subscriber)));
        debug!(topic = %topic, subscriber = id, "Subscribed to topic");
    }

    pub fn unsubscribe(&self, topic: &str, id: SubscriberId) {
        let mut topics = self.topics.write();
        if let Some(entries) = topics.get_mut(topic) {
            entries.retain(|(existing, _)| *existing != id);
            if entries.is_empty() {
                topics.remove(topic);
            }
            debug!(topic = %topic, subscriber = id, "Unsubscribed from topic");
        }
    }

    /// Drop every subscription held by `id`
    pub fn unsubscribe_all(&self, id: SubscriberId) {
        let mut topics = self.topics.write();
        topics.retain(|_, entries| {
            entries.retain(|(existing, _)| *existing != id);
            !entries.is_empty()
        });
        debug!(subscriber = id, "Unsubscribed from all topics");
    }

    /// Deliver `payload` to every live subscriber of `topic`, returns the count
    pub fn publish(&self, topic: &str, payload: &Value) -> usize {
        let live: Vec<Arc<dyn EventSubscriber>> = {
            let mut topics = self.topics.write();
            let Some(entries) = topics.get_mut(topic) else {
                trace!(topic = %topic, "Publish with no subscribers");
                return 0;
            };
            entries.retain(|(_, subscriber)| subscriber.strong_count() > 0);
            entries.iter().filter_map(|(_, subscriber)| subscriber.upgrade()).collect()
        };

        // Delivery runs unlocked so handlers may (un)subscribe
        for subscriber in &live {
            subscriber.handle_event(payload);
        }
        trace!(topic = %topic, delivered = live.len(), "Published event");
        live.len()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.read().get(topic).map_or(0, Vec::len)
    }

    pub fn topics_of(&self, id: SubscriberId) -> Vec<String> {
        let mut topics: Vec<String> = self
            .topics
            .read()
            .iter()
            .filter(|(_, entries)| entries.iter().any(|(existing, _)| *existing == id))
            .map(|(topic, _)| topic.clone())
            .collect();
        topics.sort();
        topics
    }
}
