//! Cross-node bus.
//!
//! Each node keeps its own registry and index. A bus replicates publishes so
//! subscribers on other nodes receive them too. Envelopes carry the origin
//! node so nobody re-delivers its own publishes.

use crate::error::BusError;
use crate::event::Event;
use crate::topic::Topic;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Capacity of the in-process bus.
const LOCAL_BUS_CAPACITY: usize = 1024;

/// A publish replicated across nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusEnvelope {
    /// Node that accepted the original publish.
    pub origin: String,
    /// Target topic, or `None` for a global broadcast.
    pub topic: Option<Topic>,
    /// The published event.
    pub event: Event,
}

/// Publish/subscribe link between nodes.
#[async_trait]
pub trait Bus: Send + Sync + std::fmt::Debug {
    /// Forward an envelope to every other node.
    async fn publish(&self, envelope: BusEnvelope) -> Result<(), BusError>;

    /// Receive envelopes from every node, including this one.
    fn subscribe(&self) -> broadcast::Receiver<BusEnvelope>;
}

/// Bus connecting hubs inside one process.
#[derive(Debug, Clone)]
pub struct LocalBus {
    sender: broadcast::Sender<BusEnvelope>,
}

impl LocalBus {
    /// Create a bus with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(LOCAL_BUS_CAPACITY)
    }

    /// Create a bus buffering `capacity` envelopes per receiver.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Bus for LocalBus {
    async fn publish(&self, envelope: BusEnvelope) -> Result<(), BusError> {
        // No receivers just means no other node is listening.
        let _ = self.sender.send(envelope);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<BusEnvelope> {
        self.sender.subscribe()
    }
}
