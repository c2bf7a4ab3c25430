//! Client registry.

use crate::error::{FanoutError, Result};
use crate::event::now_millis;
use crate::transport::Transport;
use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Unique identifier for a connected client.
pub type ClientId = String;

/// Verified user identity attached to a client, used by presence topics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    /// Stable user identifier.
    pub user_id: String,
    /// Arbitrary public user data shown to other members.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_info: Option<serde_json::Value>,
}

impl UserIdentity {
    /// Identity with no extra user data.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            user_info: None,
        }
    }

    /// Attach public user data.
    pub fn with_info(mut self, info: serde_json::Value) -> Self {
        self.user_info = Some(info);
        self
    }
}

/// Mutable bookkeeping for a client.
///
/// Holding this lock serializes every operation on the same client.
#[derive(Debug)]
pub(crate) struct ClientState {
    pub closed: bool,
    pub metadata: HashMap<String, String>,
    pub identity: Option<UserIdentity>,
    pub connected_at: u64,
    pub last_heartbeat_at: u64,
    pub last_event_at: Option<u64>,
}

/// A registered client.
#[derive(Debug)]
pub(crate) struct ClientEntry {
    pub id: ClientId,
    pub transport: Arc<dyn Transport>,
    alive: AtomicBool,
    state: Mutex<ClientState>,
    /// Held across a membership change and its presence announcements, so
    /// one client's joined and left notices reach other members in order.
    sequence: tokio::sync::Mutex<()>,
}

impl ClientEntry {
    fn new(
        id: ClientId,
        transport: Arc<dyn Transport>,
        metadata: HashMap<String, String>,
        identity: Option<UserIdentity>,
    ) -> Self {
        let now = now_millis();
        Self {
            id,
            transport,
            alive: AtomicBool::new(true),
            state: Mutex::new(ClientState {
                closed: false,
                metadata,
                identity,
                connected_at: now,
                last_heartbeat_at: now,
                last_event_at: None,
            }),
            sequence: tokio::sync::Mutex::new(()),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, ClientState> {
        self.state.lock()
    }

    pub async fn sequence(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.sequence.lock().await
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Record a liveness response.
    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::Release);
        self.state.lock().last_heartbeat_at = now_millis();
    }

    /// Clear the alive flag, returning whether it was set.
    pub fn take_alive(&self) -> bool {
        self.alive.swap(false, Ordering::AcqRel)
    }

    pub fn record_event(&self) {
        self.state.lock().last_event_at = Some(now_millis());
    }

    pub fn info(&self, topics: Vec<String>) -> ClientInfo {
        let state = self.state.lock();
        ClientInfo {
            id: self.id.clone(),
            topics,
            metadata: state.metadata.clone(),
            identity: state.identity.clone(),
            connected_at: state.connected_at,
            last_heartbeat_at: state.last_heartbeat_at,
            last_event_at: state.last_event_at,
        }
    }
}

/// Snapshot of a client record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientInfo {
    /// Client identifier.
    pub id: ClientId,
    /// Subscribed topics, sorted.
    pub topics: Vec<String>,
    /// Arbitrary connection metadata.
    pub metadata: HashMap<String, String>,
    /// Verified identity, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<UserIdentity>,
    /// Connection time (Unix millis).
    pub connected_at: u64,
    /// Last liveness response (Unix millis).
    pub last_heartbeat_at: u64,
    /// Last successful delivery (Unix millis).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_event_at: Option<u64>,
}

/// Owns every live client record.
#[derive(Debug)]
pub struct ClientRegistry {
    clients: RwLock<HashMap<ClientId, Arc<ClientEntry>>>,
    max_clients: usize,
}

impl ClientRegistry {
    /// Create an empty registry holding at most `max_clients` clients.
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            max_clients,
        }
    }

    pub(crate) fn add(
        &self,
        transport: Arc<dyn Transport>,
        metadata: HashMap<String, String>,
        identity: Option<UserIdentity>,
    ) -> Result<Arc<ClientEntry>> {
        let mut clients = self.clients.write();
        if clients.len() >= self.max_clients {
            return Err(FanoutError::CapacityExceeded(self.max_clients));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let entry = Arc::new(ClientEntry::new(id.clone(), transport, metadata, identity));
        clients.insert(id, entry.clone());
        Ok(entry)
    }

    /// Drop the record. Returns `None` if it was already gone.
    ///
    /// Marking the entry closed and cascading into the subscription index is
    /// the hub's job, done under the client lock.
    pub(crate) fn remove(&self, client_id: &str) -> Option<Arc<ClientEntry>> {
        self.clients.write().remove(client_id)
    }

    pub(crate) fn get(&self, client_id: &str) -> Option<Arc<ClientEntry>> {
        self.clients.read().get(client_id).cloned()
    }

    pub(crate) fn entries(&self) -> Vec<Arc<ClientEntry>> {
        self.clients.read().values().cloned().collect()
    }

    /// Record a liveness response. Unknown clients are ignored.
    pub fn touch(&self, client_id: &str) -> bool {
        match self.get(client_id) {
            Some(entry) => {
                entry.mark_alive();
                true
            }
            None => false,
        }
    }

    /// Whether the client is registered.
    pub fn contains(&self, client_id: &str) -> bool {
        self.clients.read().contains_key(client_id)
    }

    /// Registered client IDs, sorted.
    pub fn ids(&self) -> Vec<ClientId> {
        let mut ids: Vec<_> = self.clients.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of registered clients.
    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.max_clients
    }
}
