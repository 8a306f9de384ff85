//! Bounded table of session proposals awaiting an answer.
//!
//! Entries are keyed by the proposer's public key on both sides: the proposer
//! keeps its own proposal until the peer settles or rejects it, the responder
//! keeps the peer's proposal until the user approves or rejects it.
//!
//! The table is never persisted. A restart mid-negotiation loses the proposal
//! and the proposer has to send a new one.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use signkit_lib::rpc::SessionProposeParams;
use signkit_lib::{PublicKey, Topic};
use tracing::warn;

/// A proposal and the request that carried it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingProposal {
    pub pairing_topic: Topic,
    pub request_id: u64,
    pub proposal: SessionProposeParams,
}

impl PendingProposal {
    pub fn proposer_public_key(&self) -> &PublicKey {
        &self.proposal.proposer.public_key
    }
}

pub(crate) struct ProposalTable {
    capacity: usize,
    entries: Mutex<VecDeque<PendingProposal>>,
}

impl ProposalTable {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, VecDeque<PendingProposal>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace the proposal for its proposer key. When full, the
    /// oldest entry is evicted and returned.
    pub(crate) fn insert(&self, proposal: PendingProposal) -> Option<PendingProposal> {
        let mut entries = self.entries();
        entries.retain(|p| p.proposer_public_key() != proposal.proposer_public_key());
        let evicted = if entries.len() >= self.capacity {
            entries.pop_front()
        } else {
            None
        };
        if let Some(old) = &evicted {
            warn!(
                proposer = %old.proposer_public_key(),
                pairing_topic = %old.pairing_topic,
                "pending proposal table full, evicting oldest"
            );
        }
        entries.push_back(proposal);
        evicted
    }

    /// Remove and return the proposal for `key` in one step.
    pub(crate) fn take(&self, key: &PublicKey) -> Option<PendingProposal> {
        let mut entries = self.entries();
        let index = entries.iter().position(|p| p.proposer_public_key() == key)?;
        entries.remove(index)
    }

    pub(crate) fn get(&self, key: &PublicKey) -> Option<PendingProposal> {
        self.entries()
            .iter()
            .find(|p| p.proposer_public_key() == key)
            .cloned()
    }

    pub(crate) fn list(&self) -> Vec<PendingProposal> {
        self.entries().iter().cloned().collect()
    }
}
