//! Conversation identity.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identity of a conversation: one chat channel plus an optional
/// thread inside it. Direct (non-threaded) conversations share a single
/// reserved thread slot per channel.
///
/// The key never changes for the lifetime of a session; it is the map key
/// in the registry and the identity in the persistence file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationKey {
    channel_id: String,
    thread_id: Option<String>,
}

impl ConversationKey {
    /// Build a key from a channel id and an optional thread id.
    pub fn new(channel_id: impl Into<String>, thread_id: Option<&str>) -> Self {
        Self {
            channel_id: channel_id.into(),
            thread_id: thread_id.map(str::to_owned),
        }
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn thread_id(&self) -> Option<&str> {
        self.thread_id.as_deref()
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.thread_id {
            Some(thread) => write!(f, "{}-{}", self.channel_id, thread),
            None => write!(f, "{}-direct", self.channel_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threaded_key_display() {
        let key = ConversationKey::new("C1", Some("T1"));
        assert_eq!(key.to_string(), "C1-T1");
    }

    #[test]
    fn test_direct_key_display() {
        let key = ConversationKey::new("C1", None);
        assert_eq!(key.to_string(), "C1-direct");
    }

    #[test]
    fn test_key_equality_is_deterministic() {
        let a = ConversationKey::new("C9", Some("T3"));
        let b = ConversationKey::new("C9", Some("T3"));
        assert_eq!(a, b);
        assert_ne!(a, ConversationKey::new("C9", None));
    }
}
