//! Relay message types
//!
//! A [`Message`] is created once by the channel store and never changes
//! afterwards. Callers describe what they want to send with a validated
//! [`NewMessage`]; id and timestamp are assigned at write time.

use crate::directory::validate_agent_id;
use crate::{RelayError, Result};
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Longest accepted thread id
pub const MAX_THREAD_ID_LEN: usize = 128;

/// Unique message identifier, `msg_` followed by 16 hex digits
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Create a new random message ID
    pub fn new() -> Self {
        let bits: u64 = OsRng.gen();
        Self(format!("msg_{:016x}", bits))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which kind of channel a message lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Public,
    Dm,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Public => "public",
            ChannelKind::Dm => "dm",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage key of a channel
///
/// A DM channel is identified by its two participants in lexicographic
/// order, so `(a, b)` and `(b, a)` always resolve to the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelKey {
    Public,
    Direct { low: String, high: String },
}

impl ChannelKey {
    const PUBLIC: &'static str = "public";
    const DM_PREFIX: &'static str = "dm:";

    /// Glob matching every DM key
    pub const DM_PATTERN: &'static str = "dm:*";

    /// Canonical DM key for a participant pair, in either order
    pub fn direct(a: &str, b: &str) -> Self {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        ChannelKey::Direct {
            low: low.to_string(),
            high: high.to_string(),
        }
    }

    /// Parse a stored key; `None` for anything that is not a well-formed key
    pub fn parse(raw: &str) -> Option<Self> {
        if raw == Self::PUBLIC {
            return Some(ChannelKey::Public);
        }
        let rest = raw.strip_prefix(Self::DM_PREFIX)?;
        let (low, high) = rest.split_once(':')?;
        if low.is_empty() || high.is_empty() || high.contains(':') || low > high {
            return None;
        }
        Some(ChannelKey::Direct {
            low: low.to_string(),
            high: high.to_string(),
        })
    }

    pub fn kind(&self) -> ChannelKind {
        match self {
            ChannelKey::Public => ChannelKind::Public,
            ChannelKey::Direct { .. } => ChannelKind::Dm,
        }
    }

    /// Exact participant match (never a substring test)
    pub fn involves(&self, agent_id: &str) -> bool {
        match self {
            ChannelKey::Public => false,
            ChannelKey::Direct { low, high } => low == agent_id || high == agent_id,
        }
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKey::Public => f.write_str(Self::PUBLIC),
            ChannelKey::Direct { low, high } => write!(f, "{}{}:{}", Self::DM_PREFIX, low, high),
        }
    }
}

/// A stored message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: MessageId,
    pub from_agent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_agent: Option<String>,
    pub channel: ChannelKind,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

impl Message {
    pub fn channel_key(&self) -> ChannelKey {
        match &self.to_agent {
            Some(to) => ChannelKey::direct(&self.from_agent, to),
            None => ChannelKey::Public,
        }
    }

    pub fn is_public(&self) -> bool {
        self.to_agent.is_none()
    }
}

/// A message as submitted by a sender, before id and timestamp exist
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    from_agent: String,
    to_agent: Option<String>,
    content: String,
    thread_id: Option<String>,
}

impl NewMessage {
    /// Validate sender, recipient, content size and thread id
    ///
    /// `max_content_bytes` bounds the UTF-8 length of `content`.
    pub fn new(
        from_agent: impl Into<String>,
        to_agent: Option<String>,
        content: impl Into<String>,
        thread_id: Option<String>,
        max_content_bytes: usize,
    ) -> Result<Self> {
        let from_agent = from_agent.into();
        let content = content.into();

        validate_agent_id(&from_agent)?;
        if let Some(to) = &to_agent {
            validate_agent_id(to)?;
        }
        if content.trim().is_empty() {
            return Err(RelayError::validation("content must not be empty"));
        }
        if content.len() > max_content_bytes {
            return Err(RelayError::validation(format!(
                "content is {} bytes, limit is {}",
                content.len(),
                max_content_bytes
            )));
        }
        let thread_id = thread_id.filter(|t| !t.is_empty());
        if let Some(thread) = &thread_id {
            if thread.chars().count() > MAX_THREAD_ID_LEN {
                return Err(RelayError::validation(format!(
                    "thread_id exceeds {} characters",
                    MAX_THREAD_ID_LEN
                )));
            }
        }

        Ok(Self {
            from_agent,
            to_agent,
            content,
            thread_id,
        })
    }

    /// Stamp with a fresh id and the given write time
    pub(crate) fn into_message(self, timestamp: DateTime<Utc>) -> Message {
        let channel = if self.to_agent.is_some() {
            ChannelKind::Dm
        } else {
            ChannelKind::Public
        };
        Message {
            message_id: MessageId::new(),
            from_agent: self.from_agent,
            to_agent: self.to_agent,
            channel,
            content: self.content,
            timestamp,
            thread_id: self.thread_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_id_format() {
        let id = MessageId::new();
        let hex = id.as_str().strip_prefix("msg_").unwrap();
        assert_eq!(hex.len(), 16);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(MessageId::new(), id);
    }

    #[test]
    fn test_direct_key_is_symmetric() {
        let ab = ChannelKey::direct("amber-fox-0001", "zen-owl-ffff");
        let ba = ChannelKey::direct("zen-owl-ffff", "amber-fox-0001");
        assert_eq!(ab, ba);
        assert_eq!(ab.to_string(), "dm:amber-fox-0001:zen-owl-ffff");
    }

    #[test]
    fn test_key_parse() {
        let key = ChannelKey::direct("b", "a");
        assert_eq!(ChannelKey::parse(&key.to_string()), Some(key));
        assert_eq!(ChannelKey::parse("public"), Some(ChannelKey::Public));
        assert_eq!(ChannelKey::parse("dm:b:a"), None);
        assert_eq!(ChannelKey::parse("dm:a"), None);
        assert_eq!(ChannelKey::parse("dm:a:b:c"), None);
        assert_eq!(ChannelKey::parse("other"), None);
    }

    #[test]
    fn test_involves_is_exact() {
        let key = ChannelKey::direct("fox", "owl");
        assert!(key.involves("fox"));
        assert!(key.involves("owl"));
        assert!(!key.involves("fo"));
        assert!(!key.involves("fox:owl"));
        assert!(!ChannelKey::Public.involves("fox"));
    }

    #[test]
    fn test_new_message_limits() {
        assert!(NewMessage::new("fox", None, "hello", None, 10).is_ok());
        assert!(NewMessage::new("fox", None, "x".repeat(11), None, 10).is_err());
        assert!(NewMessage::new("fox", None, "   ", None, 10).is_err());
        assert!(NewMessage::new("fox", Some("a:b".into()), "hi", None, 10).is_err());
        assert!(NewMessage::new("fox", None, "hi", Some("t".repeat(129)), 10).is_err());
    }

    #[test]
    fn test_into_message_derives_channel() {
        let now = Utc::now();
        let dm = NewMessage::new("fox", Some("owl".into()), "hi", Some("t1".into()), 100)
            .unwrap()
            .into_message(now);
        assert_eq!(dm.channel, ChannelKind::Dm);
        assert_eq!(dm.channel_key(), ChannelKey::direct("owl", "fox"));
        assert_eq!(dm.timestamp, now);

        let public = NewMessage::new("fox", None, "hi", None, 100)
            .unwrap()
            .into_message(now);
        assert_eq!(public.channel, ChannelKind::Public);
        assert!(public.is_public());
    }

    #[test]
    fn test_message_json_shape() {
        let message = NewMessage::new("fox", None, "hi", None, 100)
            .unwrap()
            .into_message(Utc::now());
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["channel"], "public");
        assert!(json.get("to_agent").is_none());
        assert!(json["message_id"].as_str().unwrap().starts_with("msg_"));
    }
}
