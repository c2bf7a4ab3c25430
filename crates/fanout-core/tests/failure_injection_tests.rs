//! Failure Injection Tests
//!
//! Integration tests driving the hub through transports that fail on demand:
//! - Broken and closed connections
//! - Slow writers and write timeouts
//! - Failures during presence announcements
//! - Concurrent subscribe and disconnect

use async_trait::async_trait;
use fanout_core::{
    ConnectOptions, Event, FanoutError, HeartbeatMonitor, Hub, HubConfig, ProbeOutcome,
    Transport, TransportError, UserIdentity, PRESENCE_JOINED, PRESENCE_LEFT, PRESENCE_SUBSCRIBED,
};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

// ============================================================================
// Failure Injection Infrastructure
// ============================================================================

/// A transport that records writes and can inject failures.
#[derive(Debug, Default)]
pub struct FailableTransport {
    events: Mutex<Vec<Event>>,
    /// Fail every write
    fail_writes: AtomicBool,
    /// Fail every probe
    fail_probes: AtomicBool,
    /// Artificial write latency in milliseconds
    write_delay_ms: AtomicUsize,
    /// Number of close calls
    close_count: AtomicUsize,
    /// Next write of a given event name waits here
    hold: Mutex<Option<HeldWrite>>,
}

#[derive(Debug)]
struct HeldWrite {
    name: String,
    reached: Arc<Notify>,
    release: Arc<Notify>,
}

impl FailableTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn broken() -> Arc<Self> {
        let transport = Self::new();
        transport.set_fail_writes(true);
        transport
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_probes(&self, fail: bool) {
        self.fail_probes.store(fail, Ordering::SeqCst);
    }

    pub fn set_write_delay(&self, delay: Duration) {
        self.write_delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    /// Park the next write of `name` until `release` is notified.
    ///
    /// Returns `(reached, release)`; `reached` fires once the write is parked.
    pub fn hold_next(&self, name: &str) -> (Arc<Notify>, Arc<Notify>) {
        let reached = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        *self.hold.lock() = Some(HeldWrite {
            name: name.to_string(),
            reached: reached.clone(),
            release: release.clone(),
        });
        (reached, release)
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn event_names(&self) -> Vec<String> {
        self.events.lock().iter().map(|e| e.name.clone()).collect()
    }

    pub fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FailableTransport {
    async fn write(&self, event: &Event) -> Result<(), TransportError> {
        let held = {
            let mut hold = self.hold.lock();
            match hold.as_ref() {
                Some(h) if h.name == event.name => hold.take(),
                _ => None,
            }
        };
        if let Some(held) = held {
            held.reached.notify_one();
            held.release.notified().await;
        }

        let delay = self.write_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::Io("connection reset".to_string()));
        }
        self.events.lock().push(event.clone());
        Ok(())
    }

    async fn probe(&self) -> Result<ProbeOutcome, TransportError> {
        if self.fail_probes.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        Ok(ProbeOutcome::AwaitResponse)
    }

    fn close(&self) -> Result<(), TransportError> {
        self.close_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn test_hub() -> Hub {
    Hub::new(HubConfig {
        node_id: "node-test".to_string(),
        write_timeout_ms: 100,
        ..HubConfig::default()
    })
}

async fn connect(hub: &Hub, transport: &Arc<FailableTransport>, topics: &[&str]) -> String {
    hub.connect(
        transport.clone(),
        ConnectOptions::new().with_topics(topics.iter().copied()),
    )
    .await
    .unwrap()
}

// ============================================================================
// Delivery
// ============================================================================

#[tokio::test]
async fn test_publish_reaches_only_topic_subscribers() {
    let hub = test_hub();
    let a = FailableTransport::new();
    let b = FailableTransport::new();
    let c = FailableTransport::new();
    connect(&hub, &a, &["room-1"]).await;
    connect(&hub, &b, &["room-1"]).await;
    connect(&hub, &c, &["room-2"]).await;

    let report = hub
        .publish(Some("room-1"), Event::new("message", json!({"data": "hi"})))
        .await
        .unwrap();

    assert_eq!(report.recipients, 2);
    assert_eq!(report.delivered, 2);
    assert_eq!(a.events().len(), 1);
    assert_eq!(b.events().len(), 1);
    assert!(c.events().is_empty());
}

#[tokio::test]
async fn test_broken_transport_is_isolated_and_evicted() {
    let hub = test_hub();
    let healthy = FailableTransport::new();
    let broken = FailableTransport::broken();
    connect(&hub, &healthy, &["room-1"]).await;
    let broken_id = connect(&hub, &broken, &["room-1"]).await;

    let report = hub
        .publish(Some("room-1"), Event::new("message", json!(null)))
        .await
        .unwrap();

    assert_eq!(report.delivered, 1);
    assert_eq!(report.failed_count(), 1);
    assert_eq!(report.failed[0].client_id, broken_id);
    assert_eq!(healthy.events().len(), 1);

    assert!(!hub.list_clients().contains(&broken_id));
    assert!(hub.topics_of(&broken_id).is_empty());
    assert_eq!(broken.close_count(), 1);
    assert!(hub.is_consistent());
}

#[tokio::test(start_paused = true)]
async fn test_slow_transport_times_out() {
    let hub = test_hub();
    let fast = FailableTransport::new();
    let slow = FailableTransport::new();
    slow.set_write_delay(Duration::from_secs(5));
    connect(&hub, &fast, &["room-1"]).await;
    let slow_id = connect(&hub, &slow, &["room-1"]).await;

    let report = hub
        .publish(Some("room-1"), Event::new("message", json!(null)))
        .await
        .unwrap();

    assert_eq!(report.delivered, 1);
    assert_eq!(report.failed[0].client_id, slow_id);
    assert!(report.failed[0].reason.contains("timed out"));
    assert_eq!(hub.connection_count(), 1);
}

#[tokio::test]
async fn test_oversized_payload_writes_nothing() {
    let hub = Hub::new(HubConfig {
        max_payload_bytes: 32,
        ..HubConfig::default()
    });
    let a = FailableTransport::new();
    connect(&hub, &a, &["room-1"]).await;

    let result = hub
        .publish(Some("room-1"), Event::new("message", json!("x".repeat(64))))
        .await;

    assert!(matches!(result, Err(FanoutError::PayloadTooLarge { limit: 32, .. })));
    assert!(a.events().is_empty());
    assert_eq!(hub.stats().total_events, 0);
}

#[tokio::test]
async fn test_unsubscribing_last_topic_drops_it() {
    let hub = test_hub();
    let a = FailableTransport::new();
    let id = connect(&hub, &a, &["room-1"]).await;

    let removed = hub.unsubscribe(&id, ["room-1"]).await.unwrap();
    assert_eq!(removed.len(), 1);
    assert!(hub.list_topics().is_empty());

    let again = hub.unsubscribe(&id, ["room-1"]).await.unwrap();
    assert!(again.is_empty());
    assert_eq!(hub.list_clients(), vec![id]);
}

// ============================================================================
// Presence
// ============================================================================

async fn connect_user(hub: &Hub, transport: &Arc<FailableTransport>, user: &str) -> String {
    hub.connect(
        transport.clone(),
        ConnectOptions::new()
            .with_identity(UserIdentity::new(user))
            .with_topics(["presence-lobby"]),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn test_presence_join_precedes_joiner_events() {
    let hub = test_hub();
    let alice = FailableTransport::new();
    let bob = FailableTransport::new();
    connect_user(&hub, &alice, "alice").await;
    let bob_id = connect_user(&hub, &bob, "bob").await;

    hub.publish(Some("presence-lobby"), Event::new("chat", json!({"from": "bob"})))
        .await
        .unwrap();
    hub.disconnect(&bob_id).await;

    let names = alice.event_names();
    let joined = names.iter().position(|n| n == PRESENCE_JOINED).unwrap();
    let chat = names.iter().position(|n| n == "chat").unwrap();
    let left = names.iter().position(|n| n == PRESENCE_LEFT).unwrap();
    assert!(joined < chat);
    assert!(chat < left);
}

#[tokio::test]
async fn test_second_connection_of_same_user_is_silent() {
    let hub = test_hub();
    let watcher = FailableTransport::new();
    connect_user(&hub, &watcher, "watcher").await;

    let first = FailableTransport::new();
    let second = FailableTransport::new();
    let first_id = connect_user(&hub, &first, "alice").await;
    let second_id = connect_user(&hub, &second, "alice").await;

    let joins = |t: &FailableTransport| {
        t.event_names()
            .iter()
            .filter(|n| n.as_str() == PRESENCE_JOINED)
            .count()
    };
    assert_eq!(joins(&watcher), 1);

    hub.disconnect(&first_id).await;
    assert!(!watcher.event_names().iter().any(|n| n == PRESENCE_LEFT));

    hub.disconnect(&second_id).await;
    assert!(watcher.event_names().iter().any(|n| n == PRESENCE_LEFT));
}

#[tokio::test]
async fn test_failure_during_leave_announcement_cascades() {
    let hub = test_hub();
    let alice = FailableTransport::new();
    let bob = FailableTransport::new();
    let alice_id = connect_user(&hub, &alice, "alice").await;
    let bob_id = connect_user(&hub, &bob, "bob").await;

    bob.set_fail_writes(true);
    hub.disconnect(&alice_id).await;

    assert!(!hub.list_clients().contains(&bob_id));
    assert!(hub.list_topics().is_empty());
    assert!(hub.presence_members("presence-lobby").is_empty());
    assert!(hub.is_consistent());
}

// ============================================================================
// Heartbeats
// ============================================================================

#[tokio::test]
async fn test_failed_probe_evicts_client() {
    let hub = Arc::new(test_hub());
    let monitor = HeartbeatMonitor::new(hub.clone());
    let a = FailableTransport::new();
    let id = connect(&hub, &a, &["room-1"]).await;

    a.set_fail_probes(true);
    let report = monitor.sweep().await;

    assert_eq!(report.evicted, vec![id]);
    assert!(hub.list_topics().is_empty());
}

#[tokio::test]
async fn test_touched_client_survives_sweeps() {
    let hub = Arc::new(test_hub());
    let monitor = HeartbeatMonitor::new(hub.clone());
    let quiet = FailableTransport::new();
    let chatty = FailableTransport::new();
    let quiet_id = connect(&hub, &quiet, &[]).await;
    let chatty_id = connect(&hub, &chatty, &[]).await;

    monitor.sweep().await;
    hub.touch(&chatty_id);
    let report = monitor.sweep().await;

    assert_eq!(report.evicted, vec![quiet_id]);
    assert_eq!(hub.list_clients(), vec![chatty_id]);
}
#[tokio::test]
async fn test_disconnect_waits_for_pending_join_announcement() {
    let hub = Arc::new(Hub::new(HubConfig {
        node_id: "node-test".to_string(),
        write_timeout_ms: 5_000,
        ..HubConfig::default()
    }));
    let watcher = FailableTransport::new();
    let watcher_id = connect_user(&hub, &watcher, "watcher").await;
    let (reached, release) = watcher.hold_next(PRESENCE_JOINED);

    let alice = FailableTransport::new();
    let joining = {
        let hub = hub.clone();
        let alice = alice.clone();
        tokio::spawn(async move { connect_user(&hub, &alice, "alice").await })
    };
    reached.notified().await;

    let alice_id = hub
        .list_clients()
        .into_iter()
        .find(|id| *id != watcher_id)
        .unwrap();
    let leaving = {
        let hub = hub.clone();
        tokio::spawn(async move { hub.disconnect(&alice_id).await })
    };
    // Give the disconnect every chance to overtake the parked join notice.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!watcher.event_names().iter().any(|n| n == PRESENCE_LEFT));

    release.notify_one();
    joining.await.unwrap();
    leaving.await.unwrap();

    assert_eq!(
        watcher.event_names(),
        vec![PRESENCE_SUBSCRIBED, PRESENCE_JOINED, PRESENCE_LEFT]
    );
    let members: Vec<_> = hub
        .presence_members("presence-lobby")
        .into_iter()
        .map(|m| m.user_id)
        .collect();
    assert_eq!(members, vec!["watcher"]);
    assert!(hub.is_consistent());
}


// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_subscribe_and_disconnect() {
    let hub = Arc::new(test_hub());
    let mut ids = Vec::new();
    for _ in 0..16 {
        let transport = FailableTransport::new();
        ids.push(connect(&hub, &transport, &[]).await);
    }

    let mut handles = Vec::new();
    for (i, id) in ids.iter().cloned().enumerate() {
        let sub_hub = hub.clone();
        let sub_id = id.clone();
        handles.push(tokio::spawn(async move {
            for n in 0..8 {
                let topic = format!("room-{}", (i + n) % 5);
                let _ = sub_hub.subscribe(&sub_id, [topic.as_str()]).await;
            }
        }));
        let hub = hub.clone();
        let id = id.clone();
        handles.push(tokio::spawn(async move {
            hub.disconnect(&id).await;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(hub.connection_count(), 0);
    assert!(hub.list_topics().is_empty());
    assert!(hub.is_consistent());
}
