//! Read-only hub view.

use crate::client::{ClientId, ClientInfo, UserIdentity};
use crate::hub::{Hub, HubStats};
use crate::topic::Topic;
use std::sync::Arc;

/// Query-only handle to a [`Hub`].
///
/// Hand this to surfaces that must observe the hub but never mutate it.
#[derive(Debug, Clone)]
pub struct HubReader {
    hub: Arc<Hub>,
}

impl HubReader {
    pub(crate) fn new(hub: Arc<Hub>) -> Self {
        Self { hub }
    }

    /// Registered client IDs, sorted.
    pub fn list_clients(&self) -> Vec<ClientId> {
        self.hub.list_clients()
    }

    /// Topics with at least one subscriber, sorted.
    pub fn list_topics(&self) -> Vec<Topic> {
        self.hub.list_topics()
    }

    /// Subscribers of a topic, sorted.
    pub fn subscribers_of(&self, topic: &str) -> Vec<ClientId> {
        self.hub.subscribers_of(topic)
    }

    /// Topics of a client, sorted.
    pub fn topics_of(&self, client_id: &str) -> Vec<Topic> {
        self.hub.topics_of(client_id)
    }

    /// Snapshot of one client.
    pub fn client(&self, client_id: &str) -> Option<ClientInfo> {
        self.hub.client(client_id)
    }

    /// Members of a presence topic.
    pub fn presence_members(&self, topic: &str) -> Vec<UserIdentity> {
        self.hub.presence_members(topic)
    }

    /// Current connection count.
    pub fn connection_count(&self) -> usize {
        self.hub.connection_count()
    }

    /// Hub statistics.
    pub fn stats(&self) -> HubStats {
        self.hub.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::ConnectOptions;
    use crate::transport::{ChannelTransport, ProbeMode};

    #[tokio::test]
    async fn test_reader_sees_hub_state() {
        let hub = Arc::new(Hub::default());
        let reader = hub.reader();

        let (transport, _rx) = ChannelTransport::new(4, ProbeMode::Ping);
        let id = hub
            .connect(transport, ConnectOptions::new().with_topics(["room-1"]))
            .await
            .unwrap();

        assert_eq!(reader.list_clients(), vec![id.clone()]);
        assert_eq!(reader.subscribers_of("room-1"), vec![id.clone()]);
        assert_eq!(reader.topics_of(&id)[0].as_str(), "room-1");
        assert_eq!(reader.stats().current_connections, 1);
    }
}
