//! Events delivered to subscribers.

use crate::error::{FanoutError, Result};
use crate::topic::Topic;
use serde::{Deserialize, Serialize};

/// Sent to the remaining members of a presence topic when a user joins.
pub const PRESENCE_JOINED: &str = "presence:joined";

/// Sent to the remaining members of a presence topic when a user leaves.
pub const PRESENCE_LEFT: &str = "presence:left";

/// Sent to a client right after it subscribes to a presence topic.
pub const PRESENCE_SUBSCRIBED: &str = "presence:subscribed";

/// An event that can be broadcast to connected clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique event ID.
    pub id: String,

    /// Application-level event name.
    #[serde(rename = "event")]
    pub name: String,

    /// Topic this event was published on; `None` for global broadcasts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<Topic>,

    /// Event payload data.
    #[serde(default)]
    pub data: serde_json::Value,

    /// Reconnection hint in milliseconds for stream transports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_ms: Option<u64>,

    /// Free-form annotation, sent as a comment line by stream transports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    /// Unix timestamp in milliseconds, stamped when the broadcast starts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

impl Event {
    /// Create a new event with a random ID.
    pub fn new(name: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            topic: None,
            data,
            retry_ms: None,
            comment: None,
            timestamp: None,
        }
    }

    /// Replace the generated ID.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Attach a reconnection hint.
    pub fn with_retry(mut self, retry_ms: u64) -> Self {
        self.retry_ms = Some(retry_ms);
        self
    }

    /// Attach a comment.
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Size of the serialized payload in bytes.
    pub fn payload_size(&self) -> Result<usize> {
        serde_json::to_vec(&self.data)
            .map(|bytes| bytes.len())
            .map_err(FanoutError::from)
    }

    /// Check that the ID, name and comment are non-empty single lines.
    ///
    /// Stream transports write these as header lines, so a line break would
    /// split the frame.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(FanoutError::InvalidEvent("empty event name".to_string()));
        }
        if self.id.is_empty() {
            return Err(FanoutError::InvalidEvent("empty event id".to_string()));
        }
        let fields = [
            ("id", Some(self.id.as_str())),
            ("name", Some(self.name.as_str())),
            ("comment", self.comment.as_deref()),
        ];
        for (field, value) in fields {
            if value.is_some_and(|v| v.contains(['\n', '\r', '\0'])) {
                return Err(FanoutError::InvalidEvent(format!(
                    "{} must be a single line",
                    field
                )));
            }
        }
        Ok(())
    }

    /// Look up a top-level field of an object payload.
    pub fn field(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.as_object().and_then(|obj| obj.get(key))
    }

    pub(crate) fn stamp(&mut self) {
        self.timestamp = Some(now_millis());
    }
}

/// Current Unix time in milliseconds.
pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
