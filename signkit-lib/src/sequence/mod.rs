//! Pairing and session records and their storage boundary.
//!
//! "Sequence" is the umbrella term for pairings and sessions: both are bound
//! to one topic, expire, and are torn down together with their key material.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::namespace::{ProposalNamespaces, SessionNamespaces};
use crate::rpc::{Participant, SessionSettleParams};
use crate::{AppMetadata, Expiry, PublicKey, RelayProtocolOptions, Result, Topic};

mod memory;

pub use memory::InMemorySequenceStore;

/// Lifetime of a pairing created by proposing, until first acknowledgment.
pub const INACTIVE_PAIRING_TTL: Duration = Duration::from_secs(5 * 60);

/// Lifetime of an active pairing.
pub const ACTIVE_PAIRING_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Lifetime of a settled session.
pub const SESSION_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Window added to "now" when a controller extends a session.
pub const SESSION_EXTENSION_WINDOW: Duration = SESSION_TTL;

/// Discovery channel between two parties.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pairing {
    pub topic: Topic,
    pub expiry: Expiry,
    pub relay: RelayProtocolOptions,
    pub peer_metadata: Option<AppMetadata>,
    pub uri: String,
    pub is_active: bool,
}

impl Pairing {
    /// A pairing this side proposed; short-lived until the peer answers.
    pub fn inactive(topic: Topic, relay: RelayProtocolOptions, uri: String) -> Self {
        Self {
            topic,
            expiry: Expiry::from_now(INACTIVE_PAIRING_TTL),
            relay,
            peer_metadata: None,
            uri,
            is_active: false,
        }
    }

    /// A pairing joined from a URI.
    pub fn active(topic: Topic, relay: RelayProtocolOptions, uri: String) -> Self {
        Self {
            topic,
            expiry: Expiry::from_now(ACTIVE_PAIRING_TTL),
            relay,
            peer_metadata: None,
            uri,
            is_active: true,
        }
    }
}

/// Namespace-scoped channel between two parties.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub topic: Topic,
    pub expiry: Expiry,
    pub relay: RelayProtocolOptions,
    pub self_public_key: PublicKey,
    pub peer_public_key: Option<PublicKey>,
    pub controller_key: Option<PublicKey>,
    pub self_metadata: Option<AppMetadata>,
    pub peer_metadata: Option<AppMetadata>,
    pub namespaces: SessionNamespaces,
    pub proposal_namespaces: ProposalNamespaces,
    pub is_acknowledged: bool,
}

impl Session {
    /// Session created by the approving side; it is its own controller.
    pub fn unacknowledged(
        topic: Topic,
        relay: RelayProtocolOptions,
        self_participant: Participant,
        proposer: Participant,
        namespaces: SessionNamespaces,
        proposal_namespaces: ProposalNamespaces,
    ) -> Self {
        Self {
            topic,
            expiry: Expiry::from_now(SESSION_TTL),
            relay,
            self_public_key: self_participant.public_key,
            peer_public_key: Some(proposer.public_key),
            controller_key: Some(self_participant.public_key),
            self_metadata: Some(self_participant.metadata),
            peer_metadata: Some(proposer.metadata),
            namespaces,
            proposal_namespaces,
            is_acknowledged: false,
        }
    }

    /// Session created by the proposing side from the peer's settle request.
    pub fn acknowledged(
        topic: Topic,
        settle: &SessionSettleParams,
        self_participant: Participant,
        proposal_namespaces: ProposalNamespaces,
    ) -> Self {
        Self {
            topic,
            expiry: Expiry(settle.expiry),
            relay: settle.relay.clone(),
            self_public_key: self_participant.public_key,
            peer_public_key: Some(settle.controller.public_key),
            controller_key: Some(settle.controller.public_key),
            self_metadata: Some(self_participant.metadata),
            peer_metadata: Some(settle.controller.metadata.clone()),
            namespaces: settle.namespaces.clone(),
            proposal_namespaces,
            is_acknowledged: true,
        }
    }

    pub fn is_self_controller(&self) -> bool {
        self.controller_key == Some(self.self_public_key)
    }

    pub fn is_peer_controller(&self) -> bool {
        self.peer_public_key.is_some() && self.controller_key == self.peer_public_key
    }
}

/// A sequence the store found expired and removed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExpiredSequence {
    Pairing(Topic),
    Session(Topic),
}

impl ExpiredSequence {
    pub fn topic(&self) -> &Topic {
        match self {
            Self::Pairing(topic) | Self::Session(topic) => topic,
        }
    }
}

/// Invoked after the store deletes an expired row.
pub type ExpiryCallback = Arc<dyn Fn(ExpiredSequence) + Send + Sync>;

/// Persistence for pairing and session records.
///
/// Implementations must serialize writes per topic: a namespace update and
/// the response acknowledging it can race.
#[async_trait]
pub trait SequenceStore: Send + Sync {
    async fn insert_pairing(&self, pairing: Pairing) -> Result<()>;

    /// Pairing on `topic`, or `None` if unknown. An expired row is removed
    /// and reported through the expiry callback.
    async fn get_pairing_by_topic(&self, topic: &Topic) -> Result<Option<Pairing>>;

    /// Whether an unexpired pairing exists on `topic`.
    async fn is_pairing_valid(&self, topic: &Topic) -> Result<bool>;

    async fn delete_pairing(&self, topic: &Topic) -> Result<()>;

    /// Every stored pairing, expired or not.
    async fn list_pairings(&self) -> Result<Vec<Pairing>>;

    /// Mark a pairing active with a new expiry.
    async fn activate_pairing(&self, topic: &Topic, expiry: Expiry) -> Result<()>;

    /// Record the peer's metadata on a pairing.
    async fn upsert_peer_metadata(&self, topic: &Topic, metadata: AppMetadata) -> Result<()>;

    async fn insert_session(&self, session: Session) -> Result<()>;

    /// Session on `topic`, or `None` if unknown. An expired row is removed
    /// and reported through the expiry callback.
    async fn get_session_by_topic(&self, topic: &Topic) -> Result<Option<Session>>;

    /// Whether an unexpired session exists on `topic`.
    async fn is_session_valid(&self, topic: &Topic) -> Result<bool>;

    async fn delete_session(&self, topic: &Topic) -> Result<()>;

    /// Every stored session, expired or not.
    async fn list_sessions(&self) -> Result<Vec<Session>>;

    async fn acknowledge_session(&self, topic: &Topic) -> Result<()>;

    async fn extend_session(&self, topic: &Topic, expiry: Expiry) -> Result<()>;

    /// Stage namespaces sent in an update request, keyed by its id.
    async fn stage_namespace_update(
        &self,
        topic: &Topic,
        namespaces: SessionNamespaces,
        request_id: u64,
    ) -> Result<()>;

    /// Remove and return namespaces staged under `request_id`.
    async fn take_staged_namespace_update(
        &self,
        topic: &Topic,
        request_id: u64,
    ) -> Result<Option<SessionNamespaces>>;

    /// Replace a session's namespaces if `request_id` is strictly newer than
    /// the last applied update. Returns `false` (and changes nothing) for a
    /// stale id.
    async fn apply_namespace_update(
        &self,
        topic: &Topic,
        namespaces: SessionNamespaces,
        request_id: u64,
    ) -> Result<bool>;

    /// Register the callback invoked when the store removes an expired row.
    fn set_expiry_callback(&self, callback: ExpiryCallback);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn participant(byte: u8) -> Participant {
        Participant {
            public_key: PublicKey([byte; 32]),
            metadata: AppMetadata::new(format!("party-{}", byte), "https://example.com"),
        }
    }

    #[test]
    fn test_controller_roles() {
        let approver = Session::unacknowledged(
            Topic::generate(),
            RelayProtocolOptions::default(),
            participant(1),
            participant(2),
            BTreeMap::new(),
            BTreeMap::new(),
        );
        assert!(approver.is_self_controller());
        assert!(!approver.is_peer_controller());

        let settle = SessionSettleParams {
            relay: RelayProtocolOptions::default(),
            controller: participant(1),
            namespaces: BTreeMap::new(),
            expiry: Expiry::from_now(SESSION_TTL).seconds(),
        };
        let proposer = Session::acknowledged(Topic::generate(), &settle, participant(2), BTreeMap::new());
        assert!(!proposer.is_self_controller());
        assert!(proposer.is_peer_controller());
        assert!(proposer.is_acknowledged);
    }

    #[test]
    fn test_pairing_lifetimes() {
        let inactive = Pairing::inactive(Topic::generate(), RelayProtocolOptions::default(), String::new());
        let active = Pairing::active(Topic::generate(), RelayProtocolOptions::default(), String::new());
        assert!(!inactive.is_active);
        assert!(active.expiry > inactive.expiry);
    }
}
