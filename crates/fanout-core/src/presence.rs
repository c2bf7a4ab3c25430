//! Presence tracking for `presence-` topics.
//!
//! A user may hold several connections on the same topic. Members are
//! announced once, on the first connection joining, and leave once, when the
//! last one is gone.

use crate::client::{ClientId, UserIdentity};
use crate::event::{Event, PRESENCE_JOINED, PRESENCE_LEFT, PRESENCE_SUBSCRIBED};
use crate::topic::Topic;
use parking_lot::RwLock;
use serde_json::json;
use std::collections::{HashMap, HashSet};

#[derive(Debug)]
struct Member {
    identity: UserIdentity,
    connections: HashSet<ClientId>,
}

/// Members of every presence topic.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    topics: RwLock<HashMap<Topic, HashMap<String, Member>>>,
}

impl PresenceTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a connection joining. Returns `true` if the user is new to the
    /// topic and should be announced.
    pub fn join(&self, topic: &Topic, client_id: &str, identity: &UserIdentity) -> bool {
        let mut topics = self.topics.write();
        let members = topics.entry(topic.clone()).or_default();
        let member = members
            .entry(identity.user_id.clone())
            .or_insert_with(|| Member {
                identity: identity.clone(),
                connections: HashSet::new(),
            });
        let first = member.connections.is_empty();
        member.connections.insert(client_id.to_string());
        first
    }

    /// Record a connection leaving. Returns the identity when it was the
    /// user's last connection on the topic.
    pub fn leave(&self, topic: &Topic, client_id: &str) -> Option<UserIdentity> {
        let mut topics = self.topics.write();
        let members = topics.get_mut(topic)?;

        let user_id = members
            .iter()
            .find(|(_, m)| m.connections.contains(client_id))
            .map(|(id, _)| id.clone())?;

        let mut departed = None;
        if let Some(member) = members.get_mut(&user_id) {
            member.connections.remove(client_id);
            if member.connections.is_empty() {
                departed = members.remove(&user_id).map(|m| m.identity);
            }
        }

        if members.is_empty() {
            topics.remove(topic);
        }
        departed
    }

    /// Current members of a topic, sorted by user ID.
    pub fn members(&self, topic: &str) -> Vec<UserIdentity> {
        let mut members: Vec<_> = self
            .topics
            .read()
            .get(topic)
            .map(|m| m.values().map(|member| member.identity.clone()).collect())
            .unwrap_or_default();
        members.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        members
    }

    /// Number of distinct users on a topic.
    pub fn member_count(&self, topic: &str) -> usize {
        self.topics.read().get(topic).map_or(0, HashMap::len)
    }
}

/// A membership change waiting to be announced.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PresenceNotice {
    Joined {
        topic: Topic,
        client_id: ClientId,
        identity: UserIdentity,
    },
    Left {
        topic: Topic,
        identity: UserIdentity,
    },
}

pub(crate) fn joined_event(topic: &Topic, identity: &UserIdentity) -> Event {
    let mut event = Event::new(PRESENCE_JOINED, member_json(identity));
    event.topic = Some(topic.clone());
    event
}

pub(crate) fn left_event(topic: &Topic, identity: &UserIdentity) -> Event {
    let mut event = Event::new(PRESENCE_LEFT, member_json(identity));
    event.topic = Some(topic.clone());
    event
}

pub(crate) fn subscribed_event(topic: &Topic, members: &[UserIdentity]) -> Event {
    let ids: Vec<&str> = members.iter().map(|m| m.user_id.as_str()).collect();
    let mut event = Event::new(
        PRESENCE_SUBSCRIBED,
        json!({
            "count": members.len(),
            "ids": ids,
            "members": members,
        }),
    );
    event.topic = Some(topic.clone());
    event
}

fn member_json(identity: &UserIdentity) -> serde_json::Value {
    json!({
        "user_id": identity.user_id,
        "user_info": identity.user_info,
    })
}
