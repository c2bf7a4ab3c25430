//! # Fanout Core
//!
//! Real-time fan-out for connected clients.
//!
//! This crate keeps track of long-lived client connections, the topics they
//! subscribe to, and delivers published events to every matching subscriber.
//! Transport framing lives behind the [`Transport`] trait so the same hub
//! serves WebSocket and Server-Sent Events connections alike.
//!
//! ## Features
//!
//! - **Client Registry**: Live clients and their bookkeeping
//! - **Subscription Index**: Topic and client edges kept in both directions
//! - **Broadcast Engine**: Concurrent fan-out with per-subscriber filters
//! - **Heartbeats**: Two-phase liveness probing and eviction
//! - **Presence**: Join and leave announcements on `presence-` topics
//! - **Bus**: Replicates publishes across nodes
//!
//! ## Topic Names
//!
//! - `room-1` - Plain topic, anyone may subscribe
//! - `private-orders` - Requires a signed authorization
//! - `presence-lobby` - Requires authorization and a user identity
//!
//! ## Example
//!
//! ```rust
//! use fanout_core::{ChannelTransport, ConnectOptions, Event, Hub, ProbeMode};
//! use std::sync::Arc;
//!
//! # tokio_test_block(async {
//! let hub = Arc::new(Hub::default());
//!
//! // Connect a client with an in-memory transport
//! let (transport, mut outbound) = ChannelTransport::new(64, ProbeMode::Ping);
//! let client_id = hub
//!     .connect(transport, ConnectOptions::new().with_topics(["room-1"]))
//!     .await
//!     .unwrap();
//!
//! // Publish to the topic
//! let report = hub
//!     .publish(Some("room-1"), Event::new("message", serde_json::json!({"text": "hi"})))
//!     .await
//!     .unwrap();
//! assert_eq!(report.delivered, 1);
//! assert!(outbound.try_recv().is_ok());
//!
//! hub.disconnect(&client_id).await;
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f);
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                     Hub                      │
//! │  ┌────────────────┐   ┌───────────────────┐  │
//! │  │ ClientRegistry │   │ SubscriptionIndex │  │
//! │  │ id -> entry    │   │ topic <-> client  │  │
//! │  └───────┬────────┘   └─────────┬─────────┘  │
//! │          │   ┌──────────────┐   │            │
//! │          └──►│BroadcastEngine│◄─┘            │
//! │              └──────┬───────┘                │
//! │  ┌────────────────┐ │  ┌──────────────────┐  │
//! │  │PresenceTracker │ │  │ HeartbeatMonitor │  │
//! │  └────────────────┘ │  └──────────────────┘  │
//! └─────────────────────┼────────────────────────┘
//!                       ▼
//!            Transport (per client)     Bus (cross-node)
//! ```

pub mod broadcast;
pub mod bus;
pub mod client;
pub mod config;
pub mod error;
pub mod event;
pub mod heartbeat;
pub mod hub;
pub mod presence;
pub mod reader;
pub mod subscription;
pub mod topic;
pub mod transport;

// Re-export main types
pub use broadcast::{BroadcastEngine, DeliveryFailure, DeliveryReport};
pub use bus::{Bus, BusEnvelope, LocalBus};
pub use client::{ClientId, ClientInfo, ClientRegistry, UserIdentity};
pub use config::HubConfig;
pub use error::{BusError, FanoutError, Result, TransportError};
pub use event::{Event, PRESENCE_JOINED, PRESENCE_LEFT, PRESENCE_SUBSCRIBED};
pub use heartbeat::{HeartbeatMonitor, SweepReport};
pub use hub::{ConnectOptions, EvictionReason, Hub, HubStats};
pub use presence::PresenceTracker;
pub use reader::HubReader;
pub use subscription::{Filter, Subscription, SubscriptionIndex, SubscriptionOptions, Transform};
pub use topic::{Topic, MAX_TOPIC_LEN, PRESENCE_PREFIX, PRIVATE_PREFIX};
pub use transport::{ChannelTransport, Outbound, OutboundReceiver, ProbeMode, ProbeOutcome, Transport};

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_public_api() {
        let hub = Hub::default();
        assert_eq!(hub.connection_count(), 0);
        assert!(hub.list_topics().is_empty());
    }

    #[tokio::test]
    async fn test_full_flow() {
        let hub = std::sync::Arc::new(Hub::default());

        // Connect
        let (transport, mut rx) = ChannelTransport::new(16, ProbeMode::Ping);
        let id = hub.connect(transport, ConnectOptions::new()).await.unwrap();
        assert_eq!(hub.connection_count(), 1);

        // Subscribe
        let added = hub.subscribe(&id, ["room-1"]).await.unwrap();
        assert_eq!(added.len(), 1);

        // Publish
        let report = hub
            .publish(Some("room-1"), Event::new("message", json!({"text": "hi"})))
            .await
            .unwrap();
        assert_eq!(report.delivered, 1);

        // Verify received
        assert!(matches!(rx.try_recv(), Ok(Outbound::Event(_))));

        // Disconnect
        hub.disconnect(&id).await;
        assert_eq!(hub.connection_count(), 0);
        assert!(hub.reader().list_topics().is_empty());
    }
}
