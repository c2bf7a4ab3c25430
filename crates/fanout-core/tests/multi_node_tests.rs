//! Multi-node fan-out tests.
//!
//! These tests verify that:
//! 1. Two hubs sharing a bus deliver each other's publishes
//! 2. A node never re-delivers its own publishes from the bus
//! 3. Stopping the listener stops cross-node delivery

use fanout_core::{
    ChannelTransport, ConnectOptions, Event, Hub, HubConfig, LocalBus, Outbound,
    OutboundReceiver, ProbeMode,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn node(id: &str, bus: &Arc<LocalBus>) -> Arc<Hub> {
    let config = HubConfig {
        node_id: id.to_string(),
        ..HubConfig::default()
    };
    Arc::new(Hub::with_bus(config, bus.clone()))
}

async fn subscriber(hub: &Hub, topic: &str) -> OutboundReceiver {
    let (transport, rx) = ChannelTransport::new(16, ProbeMode::Ping);
    hub.connect(transport, ConnectOptions::new().with_topics([topic]))
        .await
        .unwrap();
    rx
}

async fn next_event(rx: &mut OutboundReceiver) -> Option<Event> {
    match tokio::time::timeout(Duration::from_secs(1), rx.recv()).await {
        Ok(Some(Outbound::Event(event))) => Some(event),
        _ => None,
    }
}

#[tokio::test]
async fn test_two_nodes_share_publishes() {
    let bus = Arc::new(LocalBus::new());
    let node_a = node("node-a", &bus);
    let node_b = node("node-b", &bus);
    let shutdown = CancellationToken::new();
    let listener_a = node_a.spawn_bus_listener(shutdown.clone()).unwrap();
    let listener_b = node_b.spawn_bus_listener(shutdown.clone()).unwrap();

    let mut rx_a = subscriber(&node_a, "room-1").await;
    let mut rx_b = subscriber(&node_b, "room-1").await;

    let report = node_a
        .publish(Some("room-1"), Event::new("message", json!({"data": "hi"})))
        .await
        .unwrap();
    assert_eq!(report.delivered, 1);

    let local = next_event(&mut rx_a).await.unwrap();
    let remote = next_event(&mut rx_b).await.unwrap();
    assert_eq!(local.id, remote.id);
    assert_eq!(remote.field("data"), Some(&json!("hi")));

    // Node A ignores its own envelope.
    assert!(next_event(&mut rx_a).await.is_none());

    shutdown.cancel();
    listener_a.await.unwrap();
    listener_b.await.unwrap();
}

#[tokio::test]
async fn test_global_publish_crosses_nodes() {
    let bus = Arc::new(LocalBus::new());
    let node_a = node("node-a", &bus);
    let node_b = node("node-b", &bus);
    let shutdown = CancellationToken::new();
    node_b.spawn_bus_listener(shutdown.clone()).unwrap();

    let (transport, mut rx_b) = ChannelTransport::new(16, ProbeMode::Ping);
    node_b.connect(transport, ConnectOptions::new()).await.unwrap();

    node_a
        .publish(None, Event::new("announcement", json!("maintenance")))
        .await
        .unwrap();

    let event = next_event(&mut rx_b).await.unwrap();
    assert_eq!(event.name, "announcement");
    assert!(event.topic.is_none());
    shutdown.cancel();
}

#[tokio::test]
async fn test_stopped_listener_receives_nothing() {
    let bus = Arc::new(LocalBus::new());
    let node_a = node("node-a", &bus);
    let node_b = node("node-b", &bus);
    let shutdown = CancellationToken::new();
    let listener = node_b.spawn_bus_listener(shutdown.clone()).unwrap();
    shutdown.cancel();
    listener.await.unwrap();

    let mut rx_b = subscriber(&node_b, "room-1").await;
    node_a
        .publish(Some("room-1"), Event::new("message", json!(null)))
        .await
        .unwrap();

    assert!(next_event(&mut rx_b).await.is_none());
}

#[tokio::test]
async fn test_single_node_has_no_listener() {
    let hub = Arc::new(Hub::default());
    assert!(hub.spawn_bus_listener(CancellationToken::new()).is_none());
}
