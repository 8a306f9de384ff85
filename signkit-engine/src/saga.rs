//! Compensation log for operations that allocate resources step by step.
//!
//! Key material, relay subscriptions and stored rows live in three systems
//! with no shared transaction. Each forward step records the action that
//! undoes it; on failure the log is replayed in reverse.

use async_trait::async_trait;
use signkit_lib::{PublicKey, Result, Topic};
use tracing::{debug, warn};

/// Undo action paired with a completed forward step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Undo {
    RemoveKeys(Topic),
    RemoveKeyPair(PublicKey),
    Unsubscribe(Topic),
    DeletePairing(Topic),
    DeleteSession(Topic),
    ForgetProposal(PublicKey),
}

/// Executes undo actions.
#[async_trait]
pub(crate) trait Compensator: Send + Sync {
    async fn undo(&self, step: &Undo) -> Result<()>;
}

pub(crate) struct Saga {
    operation: &'static str,
    steps: Vec<Undo>,
}

impl Saga {
    pub(crate) fn new(operation: &'static str) -> Self {
        Self {
            operation,
            steps: Vec::new(),
        }
    }

    pub(crate) fn record(&mut self, step: Undo) {
        self.steps.push(step);
    }

    pub(crate) fn commit(self) {
        debug!(operation = self.operation, steps = self.steps.len(), "committed");
    }

    /// Undo every recorded step, newest first. Failures are logged and the
    /// remaining steps still run.
    pub(crate) async fn compensate<C: Compensator + ?Sized>(self, target: &C) {
        for step in self.steps.iter().rev() {
            match target.undo(step).await {
                Ok(()) => debug!(operation = self.operation, ?step, "compensated"),
                Err(e) => warn!(operation = self.operation, ?step, error = %e, "compensation failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use signkit_lib::SignError;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<Undo>>,
    }

    #[async_trait]
    impl Compensator for Recorder {
        async fn undo(&self, step: &Undo) -> Result<()> {
            self.seen.lock().unwrap().push(step.clone());
            match step {
                Undo::Unsubscribe(_) => Err(SignError::Transport("offline".into())),
                _ => Ok(()),
            }
        }
    }

    #[tokio::test]
    async fn test_compensates_in_reverse_and_continues_past_failures() {
        let topic = Topic::generate();
        let mut saga = Saga::new("propose_pairing");
        saga.record(Undo::RemoveKeys(topic.clone()));
        saga.record(Undo::Unsubscribe(topic.clone()));
        saga.record(Undo::DeletePairing(topic.clone()));

        let recorder = Recorder::default();
        saga.compensate(&recorder).await;

        assert_eq!(
            *recorder.seen.lock().unwrap(),
            vec![
                Undo::DeletePairing(topic.clone()),
                Undo::Unsubscribe(topic.clone()),
                Undo::RemoveKeys(topic),
            ]
        );
    }
}
