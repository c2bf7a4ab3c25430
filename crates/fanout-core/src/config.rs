//! Hub configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for a [`Hub`](crate::Hub).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Identifies this node on the cross-node bus.
    pub node_id: String,
    /// Maximum number of concurrent clients.
    pub max_clients: usize,
    /// Maximum serialized payload size of a published event.
    pub max_payload_bytes: usize,
    /// Maximum topics per client.
    pub max_subscriptions_per_client: usize,
    /// Period of the heartbeat sweep in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Upper bound for a single transport write or probe in milliseconds.
    pub write_timeout_ms: u64,
    /// Per-client outbound buffer, in frames.
    pub client_buffer: usize,
    /// Reconnection hint sent to stream clients in milliseconds.
    pub sse_retry_ms: u64,
}

impl HubConfig {
    /// Heartbeat sweep period.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Write and probe timeout.
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            node_id: format!("node-{}", uuid::Uuid::new_v4()),
            max_clients: 10_000,
            max_payload_bytes: 10 * 1024,
            max_subscriptions_per_client: 100,
            heartbeat_interval_ms: 30_000,
            write_timeout_ms: 5_000,
            client_buffer: 256,
            sse_retry_ms: 3_000,
        }
    }
}
