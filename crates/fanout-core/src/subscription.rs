//! Subscription index.
//!
//! Keeps the topic → subscribers and client → topics views behind a single
//! lock so every paired mutation is observed atomically.

use crate::client::ClientId;
use crate::error::{FanoutError, Result};
use crate::event::{now_millis, Event};
use crate::topic::Topic;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Predicate deciding whether a subscriber receives an event.
pub type Filter = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

/// Per-subscriber rewrite applied before delivery.
pub type Transform = Arc<dyn Fn(Event) -> Event + Send + Sync>;

/// Optional per-subscription filter and transform.
#[derive(Clone, Default)]
pub struct SubscriptionOptions {
    /// Skip events for which this returns `false`.
    pub filter: Option<Filter>,
    /// Rewrite events before they reach the transport.
    pub transform: Option<Transform>,
}

impl SubscriptionOptions {
    /// Options with neither filter nor transform.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the filter.
    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Set the transform.
    pub fn with_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(Event) -> Event + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(transform));
        self
    }

    /// Filter accepting events whose payload has every given field with an
    /// equal value.
    pub fn matching_fields(fields: serde_json::Map<String, serde_json::Value>) -> Self {
        Self::new().with_filter(move |event| {
            fields
                .iter()
                .all(|(key, expected)| event.field(key) == Some(expected))
        })
    }
}

impl fmt::Debug for SubscriptionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionOptions")
            .field("filter", &self.filter.is_some())
            .field("transform", &self.transform.is_some())
            .finish()
    }
}

/// A (client, topic) edge.
#[derive(Debug, Clone)]
pub struct Subscription {
    /// Subscribed client.
    pub client_id: ClientId,
    /// Subscribed topic.
    pub topic: Topic,
    /// Filter and transform.
    pub options: SubscriptionOptions,
    /// Creation time (Unix millis).
    pub created_at: u64,
    /// Last update time (Unix millis).
    pub updated_at: u64,
}

impl Subscription {
    fn new(client_id: ClientId, topic: Topic, options: SubscriptionOptions) -> Self {
        let now = now_millis();
        Self {
            client_id,
            topic,
            options,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the filter lets this event through.
    pub fn accepts(&self, event: &Event) -> bool {
        self.options.filter.as_ref().map_or(true, |f| f(event))
    }

    /// Apply the transform, if any.
    pub fn apply(&self, event: Event) -> Event {
        match &self.options.transform {
            Some(transform) => transform(event),
            None => event,
        }
    }
}

#[derive(Debug, Default)]
struct IndexInner {
    by_topic: HashMap<Topic, HashMap<ClientId, Subscription>>,
    by_client: HashMap<ClientId, HashSet<Topic>>,
}

impl IndexInner {
    fn insert(&mut self, client_id: &str, topic: &Topic, options: Option<&SubscriptionOptions>) -> bool {
        let subscribers = self.by_topic.entry(topic.clone()).or_default();
        let is_new = match subscribers.get_mut(client_id) {
            Some(existing) => {
                if let Some(options) = options {
                    existing.options = options.clone();
                    existing.updated_at = now_millis();
                }
                false
            }
            None => {
                subscribers.insert(
                    client_id.to_string(),
                    Subscription::new(
                        client_id.to_string(),
                        topic.clone(),
                        options.cloned().unwrap_or_default(),
                    ),
                );
                true
            }
        };

        self.by_client
            .entry(client_id.to_string())
            .or_default()
            .insert(topic.clone());
        is_new
    }

    fn remove(&mut self, client_id: &str, topic: &Topic) -> bool {
        let removed = match self.by_topic.get_mut(topic) {
            Some(subscribers) => {
                let removed = subscribers.remove(client_id).is_some();
                if subscribers.is_empty() {
                    self.by_topic.remove(topic);
                }
                removed
            }
            None => false,
        };

        if let Some(topics) = self.by_client.get_mut(client_id) {
            topics.remove(topic);
            if topics.is_empty() {
                self.by_client.remove(client_id);
            }
        }
        removed
    }
}

/// Bidirectional topic ↔ client index.
#[derive(Debug)]
pub struct SubscriptionIndex {
    inner: RwLock<IndexInner>,
    max_per_client: usize,
}

impl SubscriptionIndex {
    /// Create an empty index allowing `max_per_client` topics per client.
    pub fn new(max_per_client: usize) -> Self {
        Self {
            inner: RwLock::new(IndexInner::default()),
            max_per_client,
        }
    }

    /// Add edges for every topic. Re-subscribing is a no-op.
    ///
    /// Either every topic is added or, if the per-client limit would be
    /// exceeded, none is. Returns the topics that were newly added.
    pub fn subscribe(&self, client_id: &str, topics: &[Topic]) -> Result<Vec<Topic>> {
        self.insert_all(client_id, topics, None)
    }

    /// Add or update one edge with a filter and transform.
    ///
    /// Returns `true` if the edge is new.
    pub fn subscribe_with(
        &self,
        client_id: &str,
        topic: &Topic,
        options: SubscriptionOptions,
    ) -> Result<bool> {
        let added = self.insert_all(client_id, std::slice::from_ref(topic), Some(&options))?;
        Ok(!added.is_empty())
    }

    fn insert_all(
        &self,
        client_id: &str,
        topics: &[Topic],
        options: Option<&SubscriptionOptions>,
    ) -> Result<Vec<Topic>> {
        let mut inner = self.inner.write();

        let current = inner.by_client.get(client_id);
        let fresh: HashSet<&Topic> = topics
            .iter()
            .filter(|t| current.map_or(true, |set| !set.contains(*t)))
            .collect();
        let existing = current.map_or(0, HashSet::len);
        if existing + fresh.len() > self.max_per_client {
            return Err(FanoutError::SubscriptionLimit(self.max_per_client));
        }

        let mut added = Vec::new();
        for topic in topics {
            if inner.insert(client_id, topic, options) {
                added.push(topic.clone());
            }
        }
        Ok(added)
    }

    /// Remove edges. Topics left without subscribers are dropped.
    ///
    /// Returns the topics that were actually removed.
    pub fn unsubscribe(&self, client_id: &str, topics: &[Topic]) -> Vec<Topic> {
        let mut inner = self.inner.write();
        topics
            .iter()
            .filter(|topic| inner.remove(client_id, topic))
            .cloned()
            .collect()
    }

    /// Remove every edge of a client. Returns the topics it was subscribed to.
    pub fn remove_client(&self, client_id: &str) -> Vec<Topic> {
        let mut inner = self.inner.write();
        let topics: Vec<Topic> = inner
            .by_client
            .get(client_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        for topic in &topics {
            inner.remove(client_id, topic);
        }
        topics
    }

    /// Subscribers of a topic. Unknown topics yield an empty set.
    pub fn subscribers_of(&self, topic: &str) -> HashSet<ClientId> {
        self.inner
            .read()
            .by_topic
            .get(topic)
            .map(|subs| subs.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Topics of a client. Unknown clients yield an empty set.
    pub fn topics_of(&self, client_id: &str) -> HashSet<Topic> {
        self.inner
            .read()
            .by_client
            .get(client_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Snapshot of every subscription on a topic.
    pub fn subscriptions_of(&self, topic: &str) -> Vec<Subscription> {
        self.inner
            .read()
            .by_topic
            .get(topic)
            .map(|subs| subs.values().cloned().collect())
            .unwrap_or_default()
    }

    /// The subscription record for one edge.
    pub fn subscription(&self, client_id: &str, topic: &str) -> Option<Subscription> {
        self.inner
            .read()
            .by_topic
            .get(topic)
            .and_then(|subs| subs.get(client_id))
            .cloned()
    }

    /// Topics with at least one subscriber, sorted.
    pub fn topics(&self) -> Vec<Topic> {
        let mut topics: Vec<_> = self.inner.read().by_topic.keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Number of live topics.
    pub fn topic_count(&self) -> usize {
        self.inner.read().by_topic.len()
    }

    /// Number of edges.
    pub fn subscription_count(&self) -> usize {
        self.inner.read().by_topic.values().map(HashMap::len).sum()
    }

    /// Check the bidirectional invariant and that no empty set is kept.
    pub fn is_consistent(&self) -> bool {
        let inner = self.inner.read();

        let forward_ok = inner.by_topic.iter().all(|(topic, subs)| {
            !subs.is_empty()
                && subs.iter().all(|(client_id, sub)| {
                    sub.client_id == *client_id
                        && sub.topic == *topic
                        && inner
                            .by_client
                            .get(client_id)
                            .is_some_and(|topics| topics.contains(topic))
                })
        });

        let backward_ok = inner.by_client.iter().all(|(client_id, topics)| {
            !topics.is_empty()
                && topics.iter().all(|topic| {
                    inner
                        .by_topic
                        .get(topic)
                        .is_some_and(|subs| subs.contains_key(client_id))
                })
        });

        forward_ok && backward_ok
    }
}
