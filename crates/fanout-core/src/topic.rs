//! Topic names.

use crate::error::FanoutError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Maximum length of a topic name.
pub const MAX_TOPIC_LEN: usize = 164;

/// Prefix marking a presence topic.
pub const PRESENCE_PREFIX: &str = "presence-";

/// Prefix marking a private topic.
pub const PRIVATE_PREFIX: &str = "private-";

/// Characters allowed in a topic name.
static TOPIC_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_\-=@,.;:]+$").expect("Invalid regex"));

/// A validated topic name.
///
/// Topics have no lifecycle of their own: they exist in the index only while
/// at least one client is subscribed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Topic(String);

impl Topic {
    /// Parse and validate a topic name.
    ///
    /// Names are 1 to [`MAX_TOPIC_LEN`] characters drawn from
    /// `A-Z a-z 0-9 _ - = @ , . ; :`.
    pub fn parse(s: &str) -> Result<Self, FanoutError> {
        if s.is_empty() {
            return Err(FanoutError::InvalidTopic(
                "topic name cannot be empty".to_string(),
            ));
        }

        if s.len() > MAX_TOPIC_LEN {
            return Err(FanoutError::InvalidTopic(format!(
                "topic name longer than {} characters",
                MAX_TOPIC_LEN
            )));
        }

        if !TOPIC_REGEX.is_match(s) {
            return Err(FanoutError::InvalidTopic(format!(
                "topic name contains invalid characters: {}",
                s
            )));
        }

        Ok(Self(s.to_string()))
    }

    /// Parse a list of names, failing on the first invalid one.
    pub fn parse_all<I, S>(names: I) -> Result<Vec<Self>, FanoutError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names.into_iter().map(|n| Self::parse(n.as_ref())).collect()
    }

    /// Whether members of this topic are announced on join and leave.
    pub fn is_presence(&self) -> bool {
        self.0.starts_with(PRESENCE_PREFIX)
    }

    /// Whether this topic is private.
    pub fn is_private(&self) -> bool {
        self.0.starts_with(PRIVATE_PREFIX)
    }

    /// Whether subscribing needs a signed authorization at the edge.
    pub fn requires_authorization(&self) -> bool {
        self.is_private() || self.is_presence()
    }

    /// The topic name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for Topic {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Topic {
    type Error = FanoutError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Topic> for String {
    fn from(topic: Topic) -> Self {
        topic.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_parse_valid() {
        for name in ["room-1", "private-orders", "presence-lobby", "a:b;c,d.e@f=g_h"] {
            let topic = Topic::parse(name).unwrap();
            assert_eq!(topic.as_str(), name);
        }
    }

    #[test]
    fn test_topic_parse_invalid() {
        assert!(Topic::parse("").is_err());
        assert!(Topic::parse("room 1").is_err());
        assert!(Topic::parse("room/1").is_err());
        assert!(Topic::parse(&"x".repeat(MAX_TOPIC_LEN + 1)).is_err());
        assert!(Topic::parse(&"x".repeat(MAX_TOPIC_LEN)).is_ok());
    }

    #[test]
    fn test_topic_flags() {
        let presence = Topic::parse("presence-lobby").unwrap();
        assert!(presence.is_presence());
        assert!(!presence.is_private());
        assert!(presence.requires_authorization());

        let private = Topic::parse("private-orders").unwrap();
        assert!(private.is_private());
        assert!(private.requires_authorization());

        let public = Topic::parse("room-1").unwrap();
        assert!(!public.requires_authorization());
    }

    #[test]
    fn test_topic_serde_validates() {
        let topic: Topic = serde_json::from_str("\"room-1\"").unwrap();
        assert_eq!(topic.to_string(), "room-1");
        assert_eq!(serde_json::to_string(&topic).unwrap(), "\"room-1\"");

        assert!(serde_json::from_str::<Topic>("\"bad topic\"").is_err());
    }

    #[test]
    fn test_parse_all_fails_on_first_invalid() {
        assert_eq!(Topic::parse_all(["a", "b"]).unwrap().len(), 2);
        assert!(matches!(
            Topic::parse_all(["a", "b c"]),
            Err(FanoutError::InvalidTopic(_))
        ));
    }
}
