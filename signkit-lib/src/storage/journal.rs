//! JSON-RPC request journal.
//!
//! Every request this client sends or receives is recorded here, keyed by its
//! topic and JSON-RPC id, together with the side that sent it. Two things
//! depend on it:
//!
//! - **Duplicate suppression**: relays deliver at least once, so an inbound
//!   request is only processed if [`RequestJournal::admit`] returns `true`.
//! - **Response correlation**: a response carries only an id; the journal
//!   entry supplies the method needed to interpret its payload. A response
//!   only matches a request sent on the topic it arrived on.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::debug;

use crate::{Result, SignError, Topic};

/// Which side sent a journaled request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Received from the peer.
    Inbound,
    /// Sent by this client.
    Outbound,
}

/// A recorded request and, once known, its response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JournalEntry {
    pub id: u64,
    pub topic: Topic,
    pub method: String,
    pub direction: Direction,
    /// Serialized request as sent or received.
    pub body: String,
    /// Serialized response, if one has been attached.
    pub response: Option<String>,
}

/// Durable record of in-flight and completed JSON-RPC exchanges.
///
/// Implementations must serialize writes so that an admission and a racing
/// response attachment for the same id never interleave.
#[async_trait]
pub trait RequestJournal: Send + Sync {
    /// Record a request.
    ///
    /// Returns `Ok(false)` without writing if `id` is already recorded for
    /// `topic`.
    async fn admit(
        &self,
        id: u64,
        topic: &Topic,
        method: &str,
        body: &str,
        direction: Direction,
    ) -> Result<bool>;

    /// Attach a response to the request `id` sent on `topic` in `direction`.
    ///
    /// Returns the original entry, or `None` if there is no such request or
    /// it was already answered.
    async fn attach_response(
        &self,
        id: u64,
        topic: &Topic,
        direction: Direction,
        response: &str,
    ) -> Result<Option<JournalEntry>>;

    /// Entries on `topic` with no attached response, oldest id first.
    async fn list_pending(&self, topic: &Topic) -> Result<Vec<JournalEntry>>;

    /// Remove every entry for `topic`.
    async fn delete(&self, topic: &Topic) -> Result<()>;
}

/// In-memory journal.
#[derive(Default)]
pub struct InMemoryJournal {
    entries: RwLock<HashMap<(Topic, u64), JournalEntry>>,
}

fn lock_error(context: &str) -> SignError {
    SignError::Storage(format!("InMemoryJournal: lock poisoned during {}", context))
}

impl InMemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of recorded entries. Returns 0 if the lock is poisoned.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RequestJournal for InMemoryJournal {
    async fn admit(
        &self,
        id: u64,
        topic: &Topic,
        method: &str,
        body: &str,
        direction: Direction,
    ) -> Result<bool> {
        let mut entries = self.entries.write().map_err(|_| lock_error("admit"))?;
        let key = (topic.clone(), id);
        if entries.contains_key(&key) {
            debug!(id, topic = %topic, method, "duplicate request id");
            return Ok(false);
        }
        entries.insert(
            key,
            JournalEntry {
                id,
                topic: topic.clone(),
                method: method.to_string(),
                direction,
                body: body.to_string(),
                response: None,
            },
        );
        Ok(true)
    }

    async fn attach_response(
        &self,
        id: u64,
        topic: &Topic,
        direction: Direction,
        response: &str,
    ) -> Result<Option<JournalEntry>> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| lock_error("attach_response"))?;
        match entries.get_mut(&(topic.clone(), id)) {
            Some(entry) if entry.direction != direction => {
                debug!(id, topic = %topic, "response for a request sent the other way");
                Ok(None)
            }
            Some(entry) if entry.response.is_none() => {
                let original = entry.clone();
                entry.response = Some(response.to_string());
                Ok(Some(original))
            }
            Some(_) => {
                debug!(id, "response already attached");
                Ok(None)
            }
            None => {
                debug!(id, topic = %topic, "no request matching response");
                Ok(None)
            }
        }
    }

    async fn list_pending(&self, topic: &Topic) -> Result<Vec<JournalEntry>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| lock_error("list_pending"))?;
        let mut pending: Vec<JournalEntry> = entries
            .values()
            .filter(|e| &e.topic == topic && e.response.is_none())
            .cloned()
            .collect();
        pending.sort_by_key(|e| e.id);
        Ok(pending)
    }

    async fn delete(&self, topic: &Topic) -> Result<()> {
        let mut entries = self.entries.write().map_err(|_| lock_error("delete"))?;
        entries.retain(|(entry_topic, _), _| entry_topic != topic);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_admit_is_idempotent() {
        let journal = InMemoryJournal::new();
        let topic = Topic::generate();

        for expected in [true, false, false] {
            let admitted = journal
                .admit(1, &topic, "wc_sessionPing", "{}", Direction::Inbound)
                .await
                .unwrap();
            assert_eq!(admitted, expected);
        }
        assert_eq!(journal.len(), 1);
    }

    #[tokio::test]
    async fn test_attach_unknown_id_leaves_no_entry() {
        let journal = InMemoryJournal::new();
        assert!(journal
            .attach_response(42, &Topic::generate(), Direction::Outbound, "{}")
            .await
            .unwrap()
            .is_none());
        assert!(journal.is_empty());
    }

    #[tokio::test]
    async fn test_attach_returns_original_once() {
        let journal = InMemoryJournal::new();
        let topic = Topic::generate();
        journal
            .admit(7, &topic, "wc_sessionRequest", "{\"id\":7}", Direction::Outbound)
            .await
            .unwrap();

        let entry = journal
            .attach_response(7, &topic, Direction::Outbound, "{\"result\":true}")
            .await
            .unwrap();
        let entry = entry.unwrap();
        assert_eq!(entry.method, "wc_sessionRequest");
        assert_eq!(entry.direction, Direction::Outbound);
        assert_eq!(entry.body, "{\"id\":7}");
        assert!(entry.response.is_none());

        assert!(journal
            .attach_response(7, &topic, Direction::Outbound, "{}")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_list_pending_and_delete() {
        let journal = InMemoryJournal::new();
        let a = Topic::generate();
        let b = Topic::generate();
        let inbound = Direction::Inbound;
        journal.admit(3, &a, "wc_sessionRequest", "{}", inbound).await.unwrap();
        journal.admit(1, &a, "wc_sessionRequest", "{}", inbound).await.unwrap();
        journal.admit(2, &a, "wc_sessionEvent", "{}", inbound).await.unwrap();
        journal.admit(4, &b, "wc_sessionRequest", "{}", inbound).await.unwrap();
        journal.attach_response(2, &a, inbound, "{}").await.unwrap();

        let ids: Vec<u64> = journal
            .list_pending(&a)
            .await
            .unwrap()
            .iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec![1, 3]);

        journal.delete(&a).await.unwrap();
        assert!(journal.list_pending(&a).await.unwrap().is_empty());
        assert_eq!(journal.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_admission_admits_once() {
        let journal = Arc::new(InMemoryJournal::new());
        let topic = Topic::generate();

        let mut handles = vec![];
        for _ in 0..16 {
            let journal = journal.clone();
            let topic = topic.clone();
            handles.push(tokio::spawn(async move {
                journal
                    .admit(99, &topic, "wc_sessionPing", "{}", Direction::Inbound)
                    .await
                    .unwrap()
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
    }

    #[tokio::test]
    async fn test_response_only_matches_its_topic_and_direction() {
        let journal = InMemoryJournal::new();
        let a = Topic::generate();
        let b = Topic::generate();
        journal
            .admit(5, &a, "wc_sessionSettle", "{}", Direction::Outbound)
            .await
            .unwrap();

        assert!(journal
            .attach_response(5, &b, Direction::Outbound, "{}")
            .await
            .unwrap()
            .is_none());
        assert!(journal
            .attach_response(5, &a, Direction::Inbound, "{}")
            .await
            .unwrap()
            .is_none());
        assert_eq!(journal.list_pending(&a).await.unwrap().len(), 1);

        assert!(journal
            .attach_response(5, &a, Direction::Outbound, "{}")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_same_id_on_two_topics_is_two_entries() {
        let journal = InMemoryJournal::new();
        let a = Topic::generate();
        let b = Topic::generate();
        assert!(journal
            .admit(8, &a, "wc_sessionPing", "{}", Direction::Inbound)
            .await
            .unwrap());
        assert!(journal
            .admit(8, &b, "wc_sessionPing", "{}", Direction::Inbound)
            .await
            .unwrap());
        assert_eq!(journal.len(), 2);
    }
}
