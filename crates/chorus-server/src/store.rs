//! In-memory message store.

use crate::metrics;
use async_trait::async_trait;
use chorus_core::{unix_millis, Destination, MessageStore, StoreError};
use chorus_protocol::UserId;
use dashmap::DashMap;
use std::collections::VecDeque;

/// Messages kept per destination unless configured otherwise.
pub const DEFAULT_RETENTION: usize = 1000;

/// A persisted chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub sender: UserId,
    pub content: String,
    /// Unix time in milliseconds.
    pub stored_at: u64,
}

/// Keeps the most recent messages of each destination in memory.
pub struct MemoryStore {
    messages: DashMap<Destination, VecDeque<StoredMessage>>,
    retention: usize,
}

impl MemoryStore {
    /// Create a store keeping `retention` messages per destination.
    #[must_use]
    pub fn new(retention: usize) -> Self {
        Self {
            messages: DashMap::new(),
            retention: retention.max(1),
        }
    }

    /// Get the stored messages of a destination, oldest first.
    #[must_use]
    pub fn messages(&self, destination: &Destination) -> Vec<StoredMessage> {
        self.messages
            .get(destination)
            .map(|messages| messages.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Get the total number of stored messages.
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.messages.iter().map(|entry| entry.len()).sum()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn persist(
        &self,
        sender: &UserId,
        destination: &Destination,
        content: &str,
    ) -> Result<(), StoreError> {
        let mut messages = self.messages.entry(destination.clone()).or_default();
        if messages.len() >= self.retention {
            messages.pop_front();
        }
        messages.push_back(StoredMessage {
            sender: sender.clone(),
            content: content.to_string(),
            stored_at: unix_millis(),
        });
        drop(messages);

        metrics::record_persisted(destination);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chorus_protocol::GroupId;

    fn user(id: &str) -> UserId {
        UserId::new(id).unwrap()
    }

    #[tokio::test]
    async fn test_persist_by_destination() {
        let store = MemoryStore::default();
        let direct = Destination::Direct {
            receiver: user("bob"),
        };
        let group = Destination::Group {
            group: GroupId::new("7").unwrap(),
        };

        store.persist(&user("alice"), &direct, "hi").await.unwrap();
        store.persist(&user("alice"), &group, "all").await.unwrap();
        store.persist(&user("carol"), &group, "hey").await.unwrap();

        assert_eq!(store.message_count(), 3);
        let messages = store.messages(&group);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "all");
        assert_eq!(messages[1].sender, user("carol"));
        assert!(store
            .messages(&Destination::Direct {
                receiver: user("dave")
            })
            .is_empty());
    }

    #[tokio::test]
    async fn test_retention_drops_oldest() {
        let store = MemoryStore::new(2);
        let direct = Destination::Direct {
            receiver: user("bob"),
        };

        for content in ["one", "two", "three"] {
            store.persist(&user("alice"), &direct, content).await.unwrap();
        }

        let contents: Vec<_> = store
            .messages(&direct)
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, vec!["two", "three"]);
    }
}
