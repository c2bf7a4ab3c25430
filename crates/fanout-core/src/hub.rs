//! Hub: connects clients, routes subscriptions and publishes events.

use crate::broadcast::{BroadcastEngine, DeliveryReport, Recipient};
use crate::bus::{Bus, BusEnvelope};
use crate::client::{ClientEntry, ClientId, ClientInfo, ClientRegistry, UserIdentity};
use crate::config::HubConfig;
use crate::error::{FanoutError, Result};
use crate::event::Event;
use crate::presence::{joined_event, left_event, subscribed_event, PresenceNotice, PresenceTracker};
use crate::reader::HubReader;
use crate::subscription::{SubscriptionIndex, SubscriptionOptions};
use crate::topic::Topic;
use crate::transport::Transport;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Why a client was removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    /// The connection handler or application asked for it.
    Disconnected,
    /// A write to the client failed or timed out.
    TransportFailure,
    /// The client did not answer a heartbeat probe in time.
    HeartbeatTimeout,
    /// Sending the heartbeat probe failed.
    ProbeFailure,
}

impl fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EvictionReason::Disconnected => "disconnected",
            EvictionReason::TransportFailure => "transport_failure",
            EvictionReason::HeartbeatTimeout => "heartbeat_timeout",
            EvictionReason::ProbeFailure => "probe_failure",
        };
        f.write_str(s)
    }
}

/// Parameters for [`Hub::connect`].
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// Topics to subscribe right away.
    pub topics: Vec<String>,
    /// Arbitrary connection metadata.
    pub metadata: HashMap<String, String>,
    /// Verified identity, required for presence topics.
    pub identity: Option<UserIdentity>,
}

impl ConnectOptions {
    /// Empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to these topics on connect.
    pub fn with_topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics = topics.into_iter().map(Into::into).collect();
        self
    }

    /// Add a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Attach a verified identity.
    pub fn with_identity(mut self, identity: UserIdentity) -> Self {
        self.identity = Some(identity);
        self
    }
}

/// Hub statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    /// Current number of connections.
    pub current_connections: usize,
    /// Current number of topics with subscribers.
    pub current_topics: usize,
    /// Total connections since start.
    pub total_connections: u64,
    /// Total subscription edges created since start.
    pub total_subscriptions: u64,
    /// Total events published since start.
    pub total_events: u64,
    /// Total successful writes.
    pub total_deliveries: u64,
    /// Total failed writes.
    pub total_failed_deliveries: u64,
    /// Total recipients skipped by filters.
    pub total_filtered: u64,
    /// Total clients removed for failures or missed heartbeats.
    pub total_evictions: u64,
}

/// The fan-out hub.
///
/// Build one per node and share it as `Arc<Hub>`; every collaborator gets it
/// explicitly at construction.
#[derive(Debug)]
pub struct Hub {
    config: HubConfig,
    registry: ClientRegistry,
    index: SubscriptionIndex,
    presence: PresenceTracker,
    engine: BroadcastEngine,
    bus: Option<Arc<dyn Bus>>,
    stats: RwLock<HubStats>,
}

impl Hub {
    /// Create a single-node hub.
    pub fn new(config: HubConfig) -> Self {
        Self {
            registry: ClientRegistry::new(config.max_clients),
            index: SubscriptionIndex::new(config.max_subscriptions_per_client),
            presence: PresenceTracker::new(),
            engine: BroadcastEngine::new(config.max_payload_bytes, config.write_timeout()),
            bus: None,
            stats: RwLock::new(HubStats::default()),
            config,
        }
    }

    /// Create a hub that replicates publishes over `bus`.
    pub fn with_bus(config: HubConfig, bus: Arc<dyn Bus>) -> Self {
        Self {
            bus: Some(bus),
            ..Self::new(config)
        }
    }

    /// Hub configuration.
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Read-only view for query surfaces.
    pub fn reader(self: &Arc<Self>) -> HubReader {
        HubReader::new(self.clone())
    }

    pub(crate) fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    /// Register a client and subscribe its initial topics.
    pub async fn connect(
        &self,
        transport: Arc<dyn Transport>,
        options: ConnectOptions,
    ) -> Result<ClientId> {
        let topics = Topic::parse_all(&options.topics)?;
        let unique: HashSet<&Topic> = topics.iter().collect();
        if unique.len() > self.config.max_subscriptions_per_client {
            return Err(FanoutError::SubscriptionLimit(
                self.config.max_subscriptions_per_client,
            ));
        }
        if options.identity.is_none() {
            if let Some(topic) = topics.iter().find(|t| t.is_presence()) {
                return Err(FanoutError::IdentityRequired(topic.to_string()));
            }
        }

        let entry = self
            .registry
            .add(transport, options.metadata, options.identity)?;
        self.stats.write().total_connections += 1;
        info!(client_id = %entry.id, "Client connected");

        if !topics.is_empty() {
            if let Err(e) = self.subscribe_entry(&entry, &topics, None, None).await {
                self.disconnect(&entry.id).await;
                return Err(e);
            }
        }

        Ok(entry.id.clone())
    }

    /// Attach a verified identity. Affects presence topics joined afterwards.
    ///
    /// Returns `false` if the client is unknown.
    pub fn identify(&self, client_id: &str, identity: UserIdentity) -> bool {
        let Some(entry) = self.registry.get(client_id) else {
            return false;
        };
        let mut state = entry.lock();
        if state.closed {
            return false;
        }
        state.identity = Some(identity);
        true
    }

    /// Subscribe a client to topics. Unknown clients are ignored.
    ///
    /// Returns the topics that were newly added.
    pub async fn subscribe<I, S>(&self, client_id: &str, topics: I) -> Result<Vec<Topic>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let topics = Topic::parse_all(topics)?;
        let Some(entry) = self.registry.get(client_id) else {
            return Ok(Vec::new());
        };
        self.subscribe_entry(&entry, &topics, None, None).await
    }

    /// Subscribe or update one topic with a filter and transform.
    ///
    /// Returns `true` if the subscription is new.
    pub async fn subscribe_with(
        &self,
        client_id: &str,
        topic: &str,
        options: SubscriptionOptions,
    ) -> Result<bool> {
        let topic = Topic::parse(topic)?;
        let Some(entry) = self.registry.get(client_id) else {
            return Ok(false);
        };
        let added = self
            .subscribe_entry(&entry, std::slice::from_ref(&topic), Some(options), None)
            .await?;
        Ok(!added.is_empty())
    }

    /// Subscribe one topic while attaching a verified identity.
    ///
    /// The identity replaces the client's current one only if the
    /// subscription succeeds. Returns `true` if the subscription is new.
    pub async fn subscribe_as(
        &self,
        client_id: &str,
        topic: &str,
        identity: UserIdentity,
        options: SubscriptionOptions,
    ) -> Result<bool> {
        let topic = Topic::parse(topic)?;
        let Some(entry) = self.registry.get(client_id) else {
            return Ok(false);
        };
        let added = self
            .subscribe_entry(
                &entry,
                std::slice::from_ref(&topic),
                Some(options),
                Some(identity),
            )
            .await?;
        Ok(!added.is_empty())
    }

    async fn subscribe_entry(
        &self,
        entry: &Arc<ClientEntry>,
        topics: &[Topic],
        options: Option<SubscriptionOptions>,
        identity: Option<UserIdentity>,
    ) -> Result<Vec<Topic>> {
        let sequence = entry.sequence().await;
        let mut notices = Vec::new();
        let added = {
            let mut state = entry.lock();
            if state.closed {
                return Ok(Vec::new());
            }
            if identity.is_none() && state.identity.is_none() {
                if let Some(topic) = topics.iter().find(|t| t.is_presence()) {
                    return Err(FanoutError::IdentityRequired(topic.to_string()));
                }
            }

            let added = match options {
                Some(options) => {
                    let mut added = Vec::new();
                    for topic in topics {
                        if self.index.subscribe_with(&entry.id, topic, options.clone())? {
                            added.push(topic.clone());
                        }
                    }
                    added
                }
                None => self.index.subscribe(&entry.id, topics)?,
            };
            if identity.is_some() {
                state.identity = identity;
            }

            if let Some(identity) = &state.identity {
                for topic in added.iter().filter(|t| t.is_presence()) {
                    if self.presence.join(topic, &entry.id, identity) {
                        notices.push(PresenceNotice::Joined {
                            topic: topic.clone(),
                            client_id: entry.id.clone(),
                            identity: identity.clone(),
                        });
                    }
                }
            }
            added
        };

        if added.is_empty() {
            return Ok(added);
        }
        self.stats.write().total_subscriptions += added.len() as u64;
        debug!(client_id = %entry.id, topics = ?added, "Client subscribed");

        let mut failed = self.announce(notices).await;
        for topic in added.iter().filter(|t| t.is_presence()) {
            let members = self.presence.members(topic.as_str());
            let recipient = Recipient {
                entry: entry.clone(),
                subscription: None,
            };
            let (_, f) = self
                .engine
                .deliver(subscribed_event(topic, &members), vec![recipient])
                .await;
            failed.extend(f);
        }
        drop(sequence);
        self.evict_failed(failed).await;

        Ok(added)
    }

    /// Unsubscribe a client from topics. Unknown clients are ignored.
    ///
    /// Returns the topics that were actually removed.
    pub async fn unsubscribe<I, S>(&self, client_id: &str, topics: I) -> Result<Vec<Topic>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let topics = Topic::parse_all(topics)?;
        let Some(entry) = self.registry.get(client_id) else {
            return Ok(Vec::new());
        };

        let sequence = entry.sequence().await;
        let (removed, notices) = {
            let state = entry.lock();
            if state.closed {
                return Ok(Vec::new());
            }
            let removed = self.index.unsubscribe(&entry.id, &topics);
            let notices = self.leave_presence(&entry.id, &removed);
            (removed, notices)
        };

        if !removed.is_empty() {
            debug!(client_id = %client_id, topics = ?removed, "Client unsubscribed");
        }
        let failed = self.announce(notices).await;
        drop(sequence);
        self.evict_failed(failed).await;

        Ok(removed)
    }

    /// Publish an event to a topic, or to every client when `topic` is `None`.
    ///
    /// Oversized payloads, invalid topics and events whose header fields span
    /// several lines fail the whole call before any write. Per-recipient
    /// failures evict the recipient and are reported.
    pub async fn publish(&self, topic: Option<&str>, mut event: Event) -> Result<DeliveryReport> {
        let topic = topic.map(Topic::parse).transpose()?;
        event.validate()?;
        self.engine.check_payload(&event)?;
        event.topic = topic.clone();

        let report = self.publish_local(topic.as_ref(), event.clone()).await;

        if let Some(bus) = &self.bus {
            let envelope = BusEnvelope {
                origin: self.config.node_id.clone(),
                topic,
                event,
            };
            if let Err(e) = bus.publish(envelope).await {
                warn!(error = %e, "Failed to forward event to bus");
            }
        }

        Ok(report)
    }

    async fn publish_local(&self, topic: Option<&Topic>, event: Event) -> DeliveryReport {
        let recipients = self.recipients(topic, None, true);
        let (report, failed) = self.engine.deliver(event, recipients).await;

        self.record(&report);
        self.stats.write().total_events += 1;
        debug!(
            topic = ?topic,
            event_id = %report.event_id,
            recipients = report.recipients,
            delivered = report.delivered,
            failed = report.failed_count(),
            "Event broadcast"
        );

        self.evict_failed(failed).await;
        report
    }

    /// Remove a client. Idempotent.
    pub async fn disconnect(&self, client_id: &str) {
        self.evict_all(vec![(client_id.to_string(), EvictionReason::Disconnected)])
            .await;
    }

    /// Record a liveness response or any inbound client message.
    ///
    /// Returns `false` if the client is already gone.
    pub fn touch(&self, client_id: &str) -> bool {
        self.registry.touch(client_id)
    }

    /// Spawn the task delivering events published on other nodes.
    ///
    /// The bus receiver is created before this returns, so nothing published
    /// afterwards is missed. Returns `None` for single-node hubs.
    pub fn spawn_bus_listener(
        self: &Arc<Self>,
        shutdown: CancellationToken,
    ) -> Option<JoinHandle<()>> {
        let mut rx = self.bus.as_ref()?.subscribe();
        let hub = self.clone();

        Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    msg = rx.recv() => match msg {
                        Ok(envelope) if envelope.origin == hub.config.node_id => {}
                        Ok(envelope) => {
                            hub.publish_local(envelope.topic.as_ref(), envelope.event).await;
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Bus receiver lagged");
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }
            debug!("Bus listener stopped");
        }))
    }

    /// Registered client IDs, sorted.
    pub fn list_clients(&self) -> Vec<ClientId> {
        self.registry.ids()
    }

    /// Topics with at least one subscriber, sorted.
    pub fn list_topics(&self) -> Vec<Topic> {
        self.index.topics()
    }

    /// Subscribers of a topic, sorted. Unknown topics yield nothing.
    pub fn subscribers_of(&self, topic: &str) -> Vec<ClientId> {
        let mut ids: Vec<_> = self.index.subscribers_of(topic).into_iter().collect();
        ids.sort();
        ids
    }

    /// Topics of a client, sorted. Unknown clients yield nothing.
    pub fn topics_of(&self, client_id: &str) -> Vec<Topic> {
        let mut topics: Vec<_> = self.index.topics_of(client_id).into_iter().collect();
        topics.sort();
        topics
    }

    /// Snapshot of one client.
    pub fn client(&self, client_id: &str) -> Option<ClientInfo> {
        let entry = self.registry.get(client_id)?;
        let topics = self
            .topics_of(client_id)
            .into_iter()
            .map(String::from)
            .collect();
        Some(entry.info(topics))
    }

    /// Members of a presence topic.
    pub fn presence_members(&self, topic: &str) -> Vec<UserIdentity> {
        self.presence.members(topic)
    }

    /// Current connection count.
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Hub statistics.
    pub fn stats(&self) -> HubStats {
        let mut stats = self.stats.read().clone();
        stats.current_connections = self.registry.len();
        stats.current_topics = self.index.topic_count();
        stats
    }

    /// Whether the subscription index is internally consistent.
    pub fn is_consistent(&self) -> bool {
        self.index.is_consistent()
    }

    /// Evict clients one after another.
    ///
    /// Each eviction waits for the client's in-flight membership change, so
    /// its left notices always follow its joined notices. Leave announcements
    /// can fail and queue further evictions; the loop runs until the queue
    /// drains, so cleanup always completes.
    pub(crate) async fn evict_all(&self, mut queue: Vec<(ClientId, EvictionReason)>) {
        while let Some((client_id, reason)) = queue.pop() {
            let Some(entry) = self.registry.get(&client_id) else {
                continue;
            };
            let sequence = entry.sequence().await;
            let Some(notices) = self.detach(&entry) else {
                continue;
            };

            if reason == EvictionReason::Disconnected {
                info!(client_id = %client_id, "Client disconnected");
            } else {
                self.stats.write().total_evictions += 1;
                warn!(client_id = %client_id, reason = %reason, "Client evicted");
            }

            let failed = self.announce(notices).await;
            drop(sequence);
            queue.extend(
                failed
                    .into_iter()
                    .map(|id| (id, EvictionReason::TransportFailure)),
            );
        }
    }

    async fn evict_failed(&self, failed: Vec<ClientId>) {
        if failed.is_empty() {
            return;
        }
        self.evict_all(
            failed
                .into_iter()
                .map(|id| (id, EvictionReason::TransportFailure))
                .collect(),
        )
        .await;
    }

    /// Remove the record, its edges and presence, then close the transport.
    ///
    /// Returns `None` if another eviction got there first.
    fn detach(&self, entry: &ClientEntry) -> Option<Vec<PresenceNotice>> {
        let client_id = entry.id.as_str();
        self.registry.remove(client_id)?;

        let notices = {
            let mut state = entry.lock();
            state.closed = true;
            let topics = self.index.remove_client(client_id);
            self.leave_presence(client_id, &topics)
        };

        if let Err(e) = entry.transport.close() {
            debug!(client_id = %client_id, error = %e, "Transport close failed");
        }
        Some(notices)
    }

    fn leave_presence(&self, client_id: &str, topics: &[Topic]) -> Vec<PresenceNotice> {
        topics
            .iter()
            .filter(|t| t.is_presence())
            .filter_map(|topic| {
                self.presence
                    .leave(topic, client_id)
                    .map(|identity| PresenceNotice::Left {
                        topic: topic.clone(),
                        identity,
                    })
            })
            .collect()
    }

    /// Deliver presence notices, returning clients whose write failed.
    async fn announce(&self, notices: Vec<PresenceNotice>) -> Vec<ClientId> {
        let mut failed = Vec::new();
        for notice in notices {
            let (event, topic, exclude) = match &notice {
                PresenceNotice::Joined {
                    topic,
                    client_id,
                    identity,
                } => (joined_event(topic, identity), topic, Some(client_id.as_str())),
                PresenceNotice::Left { topic, identity } => {
                    (left_event(topic, identity), topic, None)
                }
            };

            let recipients = self.recipients(Some(topic), exclude, false);
            let (report, f) = self.engine.deliver(event, recipients).await;
            self.record(&report);
            failed.extend(f);
        }
        failed
    }

    /// Snapshot recipients. Locks are released before anything is written.
    fn recipients(
        &self,
        topic: Option<&Topic>,
        exclude: Option<&str>,
        with_options: bool,
    ) -> Vec<Recipient> {
        match topic {
            Some(topic) => self
                .index
                .subscriptions_of(topic.as_str())
                .into_iter()
                .filter(|sub| exclude != Some(sub.client_id.as_str()))
                .filter_map(|sub| {
                    let entry = self.registry.get(&sub.client_id)?;
                    Some(Recipient {
                        entry,
                        subscription: with_options.then_some(sub),
                    })
                })
                .collect(),
            None => self
                .registry
                .entries()
                .into_iter()
                .filter(|entry| exclude != Some(entry.id.as_str()))
                .map(|entry| Recipient {
                    entry,
                    subscription: None,
                })
                .collect(),
        }
    }

    fn record(&self, report: &DeliveryReport) {
        let mut stats = self.stats.write();
        stats.total_deliveries += report.delivered as u64;
        stats.total_failed_deliveries += report.failed_count() as u64;
        stats.total_filtered += report.filtered as u64;
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}
