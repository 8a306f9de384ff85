//! In-memory sequence store.
//!
//! Uses `RwLock` maps. Lock poisoning is reported as a storage error rather
//! than a panic. Expired rows are removed lazily whenever a lookup observes
//! them, and the registered expiry callback is invoked after the lock is
//! released.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::debug;

use super::{ExpiredSequence, ExpiryCallback, Pairing, SequenceStore, Session};
use crate::namespace::SessionNamespaces;
use crate::{AppMetadata, Expiry, Result, SignError, Topic};

struct SessionRow {
    session: Session,
    last_update_id: u64,
    staged: HashMap<u64, SessionNamespaces>,
}

/// In-memory implementation of [`SequenceStore`].
#[derive(Default)]
pub struct InMemorySequenceStore {
    pairings: RwLock<HashMap<Topic, Pairing>>,
    sessions: RwLock<HashMap<Topic, SessionRow>>,
    on_expired: RwLock<Option<ExpiryCallback>>,
}

fn lock_error(context: &str) -> SignError {
    SignError::Storage(format!(
        "InMemorySequenceStore: lock poisoned during {}",
        context
    ))
}

fn missing(kind: &str, topic: &Topic) -> SignError {
    SignError::Storage(format!("no {} stored for topic {}", kind, topic))
}

impl InMemorySequenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn notify(&self, expired: ExpiredSequence) {
        debug!(topic = %expired.topic(), "sequence expired");
        let callback = self.on_expired.read().ok().and_then(|cb| cb.clone());
        if let Some(callback) = callback {
            callback(expired);
        }
    }

    fn with_session<T>(
        &self,
        topic: &Topic,
        context: &str,
        f: impl FnOnce(&mut SessionRow) -> T,
    ) -> Result<T> {
        let mut sessions = self.sessions.write().map_err(|_| lock_error(context))?;
        let row = sessions
            .get_mut(topic)
            .ok_or_else(|| missing("session", topic))?;
        Ok(f(row))
    }
}

#[async_trait]
impl SequenceStore for InMemorySequenceStore {
    async fn insert_pairing(&self, pairing: Pairing) -> Result<()> {
        let mut pairings = self
            .pairings
            .write()
            .map_err(|_| lock_error("insert_pairing"))?;
        if pairings.contains_key(&pairing.topic) {
            return Err(SignError::Storage(format!(
                "pairing already stored for topic {}",
                pairing.topic
            )));
        }
        pairings.insert(pairing.topic.clone(), pairing);
        Ok(())
    }

    async fn get_pairing_by_topic(&self, topic: &Topic) -> Result<Option<Pairing>> {
        {
            let mut pairings = self
                .pairings
                .write()
                .map_err(|_| lock_error("get_pairing_by_topic"))?;
            match pairings.get(topic) {
                Some(pairing) if !pairing.expiry.is_expired() => return Ok(Some(pairing.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
            pairings.remove(topic);
        }
        self.notify(ExpiredSequence::Pairing(topic.clone()));
        Ok(None)
    }

    async fn is_pairing_valid(&self, topic: &Topic) -> Result<bool> {
        Ok(self.get_pairing_by_topic(topic).await?.is_some())
    }

    async fn delete_pairing(&self, topic: &Topic) -> Result<()> {
        let mut pairings = self
            .pairings
            .write()
            .map_err(|_| lock_error("delete_pairing"))?;
        pairings.remove(topic);
        Ok(())
    }

    async fn list_pairings(&self) -> Result<Vec<Pairing>> {
        let pairings = self
            .pairings
            .read()
            .map_err(|_| lock_error("list_pairings"))?;
        Ok(pairings.values().cloned().collect())
    }

    async fn activate_pairing(&self, topic: &Topic, expiry: Expiry) -> Result<()> {
        let mut pairings = self
            .pairings
            .write()
            .map_err(|_| lock_error("activate_pairing"))?;
        let pairing = pairings
            .get_mut(topic)
            .ok_or_else(|| missing("pairing", topic))?;
        pairing.is_active = true;
        pairing.expiry = expiry;
        Ok(())
    }

    async fn upsert_peer_metadata(&self, topic: &Topic, metadata: AppMetadata) -> Result<()> {
        let mut pairings = self
            .pairings
            .write()
            .map_err(|_| lock_error("upsert_peer_metadata"))?;
        let pairing = pairings
            .get_mut(topic)
            .ok_or_else(|| missing("pairing", topic))?;
        pairing.peer_metadata = Some(metadata);
        Ok(())
    }

    async fn insert_session(&self, session: Session) -> Result<()> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| lock_error("insert_session"))?;
        if sessions.contains_key(&session.topic) {
            return Err(SignError::Storage(format!(
                "session already stored for topic {}",
                session.topic
            )));
        }
        sessions.insert(
            session.topic.clone(),
            SessionRow {
                session,
                last_update_id: 0,
                staged: HashMap::new(),
            },
        );
        Ok(())
    }

    async fn get_session_by_topic(&self, topic: &Topic) -> Result<Option<Session>> {
        {
            let mut sessions = self
                .sessions
                .write()
                .map_err(|_| lock_error("get_session_by_topic"))?;
            match sessions.get(topic) {
                Some(row) if !row.session.expiry.is_expired() => {
                    return Ok(Some(row.session.clone()))
                }
                Some(_) => {}
                None => return Ok(None),
            }
            sessions.remove(topic);
        }
        self.notify(ExpiredSequence::Session(topic.clone()));
        Ok(None)
    }

    async fn is_session_valid(&self, topic: &Topic) -> Result<bool> {
        Ok(self.get_session_by_topic(topic).await?.is_some())
    }

    async fn delete_session(&self, topic: &Topic) -> Result<()> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| lock_error("delete_session"))?;
        sessions.remove(topic);
        Ok(())
    }

    async fn list_sessions(&self) -> Result<Vec<Session>> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| lock_error("list_sessions"))?;
        Ok(sessions.values().map(|row| row.session.clone()).collect())
    }

    async fn acknowledge_session(&self, topic: &Topic) -> Result<()> {
        self.with_session(topic, "acknowledge_session", |row| {
            row.session.is_acknowledged = true;
        })
    }

    async fn extend_session(&self, topic: &Topic, expiry: Expiry) -> Result<()> {
        self.with_session(topic, "extend_session", |row| {
            row.session.expiry = expiry;
        })
    }

    async fn stage_namespace_update(
        &self,
        topic: &Topic,
        namespaces: SessionNamespaces,
        request_id: u64,
    ) -> Result<()> {
        self.with_session(topic, "stage_namespace_update", |row| {
            row.staged.insert(request_id, namespaces);
        })
    }

    async fn take_staged_namespace_update(
        &self,
        topic: &Topic,
        request_id: u64,
    ) -> Result<Option<SessionNamespaces>> {
        self.with_session(topic, "take_staged_namespace_update", |row| {
            row.staged.remove(&request_id)
        })
    }

    async fn apply_namespace_update(
        &self,
        topic: &Topic,
        namespaces: SessionNamespaces,
        request_id: u64,
    ) -> Result<bool> {
        self.with_session(topic, "apply_namespace_update", |row| {
            if request_id <= row.last_update_id {
                return false;
            }
            row.session.namespaces = namespaces;
            row.last_update_id = request_id;
            true
        })
    }

    fn set_expiry_callback(&self, callback: ExpiryCallback) {
        if let Ok(mut slot) = self.on_expired.write() {
            *slot = Some(callback);
        }
    }
}
