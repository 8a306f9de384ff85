//! Expiry enforcement and resubscription.
//!
//! Runs whenever the relay becomes available. There is no per-sequence
//! timer: anything that expired while offline is cleaned up here.

use signkit_lib::sequence::ExpiredSequence;
use signkit_lib::{Result, Topic};
use tracing::{debug, info, warn};

use super::SignEngine;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct SweepOutcome {
    expired: usize,
    resubscribed: usize,
}

impl SignEngine {
    pub(super) async fn resubscribe_and_sweep(&self) {
        let (pairings, sessions) = tokio::join!(self.sweep_pairings(), self.sweep_sessions());
        info!(
            expired_pairings = pairings.expired,
            resubscribed_pairings = pairings.resubscribed,
            expired_sessions = sessions.expired,
            resubscribed_sessions = sessions.resubscribed,
            "sweep finished"
        );
    }

    async fn sweep_pairings(&self) -> SweepOutcome {
        let pairings = match self.store.list_pairings().await {
            Ok(pairings) => pairings,
            Err(e) => {
                warn!(error = %e, "could not list pairings for sweep");
                self.on_internal_error(e);
                return SweepOutcome::default();
            }
        };

        let mut outcome = SweepOutcome::default();
        for pairing in pairings {
            let topic = pairing.topic;
            if pairing.expiry.is_expired() {
                if self.sweep_step(&topic, self.teardown_pairing(&topic).await) {
                    outcome.expired += 1;
                }
            } else if self.sweep_step(&topic, self.relayer.subscribe(&topic).await) {
                outcome.resubscribed += 1;
            }
        }
        outcome
    }

    async fn sweep_sessions(&self) -> SweepOutcome {
        let sessions = match self.store.list_sessions().await {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!(error = %e, "could not list sessions for sweep");
                self.on_internal_error(e);
                return SweepOutcome::default();
            }
        };

        let mut outcome = SweepOutcome::default();
        for session in sessions {
            let topic = session.topic;
            if session.expiry.is_expired() {
                if self.sweep_step(&topic, self.teardown_session(&topic).await) {
                    outcome.expired += 1;
                }
            } else if self.sweep_step(&topic, self.relayer.subscribe(&topic).await) {
                outcome.resubscribed += 1;
            }
        }
        outcome
    }

    fn sweep_step(&self, topic: &Topic, result: Result<()>) -> bool {
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(topic = %topic, error = %e, "sweep step failed");
                self.on_internal_error(e);
                false
            }
        }
    }

    /// The store removed an expired row on its own; drop what it leaves behind.
    pub(super) async fn on_expired(&self, expired: ExpiredSequence) {
        let topic = expired.topic();
        debug!(topic = %topic, "cleaning up after store expiry");
        if let Err(e) = self.keys().remove_keys(topic).await {
            warn!(topic = %topic, error = %e, "could not wipe keys of expired sequence");
        }
        if let Err(e) = self.relayer.unsubscribe(topic).await {
            warn!(topic = %topic, error = %e, "could not unsubscribe expired sequence");
        }
    }
}
