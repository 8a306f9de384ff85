//! The pairing and session state machine.
//!
//! All peer traffic is processed by one task in the order the relayer emits
//! it. Application calls run on the caller's task and only share the pending
//! proposal table with the event loop.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use signkit_lib::crypto::KeyManagement;
use signkit_lib::rpc::{Participant, WcResponse};
use signkit_lib::sequence::{ExpiredSequence, Pairing, SequenceStore, Session};
use signkit_lib::storage::{KeyStore, RequestJournal};
use signkit_lib::transport::RelayTransport;
use signkit_lib::{PublicKey, RelayProtocolOptions, Result, SignError, Topic};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::events::EngineEvent;
use crate::lock;
use crate::proposals::{PendingProposal, ProposalTable};
use crate::relayer::{Connectivity, Inbound, RelayerInteractor};
use crate::saga::{Compensator, Undo};

mod pairing;
mod requests;
mod responses;
mod session;
mod sweep;

pub use session::ProposedSession;

/// Client protocol engine for one party.
pub struct SignEngine {
    config: EngineConfig,
    relayer: RelayerInteractor,
    store: Arc<dyn SequenceStore>,
    proposals: ProposalTable,
    events: broadcast::Sender<EngineEvent>,
    expired: Mutex<Option<mpsc::UnboundedReceiver<ExpiredSequence>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

struct Streams {
    inbound: broadcast::Receiver<Inbound>,
    errors: broadcast::Receiver<SignError>,
    connectivity: watch::Receiver<Connectivity>,
    expired: mpsc::UnboundedReceiver<ExpiredSequence>,
}

impl SignEngine {
    pub fn new(
        config: EngineConfig,
        transport: Arc<dyn RelayTransport>,
        key_store: Arc<dyn KeyStore>,
        journal: Arc<dyn RequestJournal>,
        store: Arc<dyn SequenceStore>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(config.event_channel_capacity.max(1));
        let (expired_tx, expired_rx) = mpsc::unbounded_channel();
        store.set_expiry_callback(Arc::new(move |expired| {
            let _ = expired_tx.send(expired);
        }));

        let relayer = RelayerInteractor::new(
            transport,
            KeyManagement::new(key_store),
            journal,
            config.event_channel_capacity,
        );
        Arc::new(Self {
            proposals: ProposalTable::new(config.pending_proposal_capacity),
            config,
            relayer,
            store,
            events,
            expired: Mutex::new(Some(expired_rx)),
            task: Mutex::new(None),
        })
    }

    /// Start processing relay traffic. Calling it again is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut task = lock(&self.task);
        if task.is_some() {
            return;
        }
        let Some(expired) = lock(&self.expired).take() else {
            return;
        };
        let streams = Streams {
            inbound: self.relayer.inbound(),
            errors: self.relayer.internal_errors(),
            connectivity: self.relayer.connectivity(),
            expired,
        };
        self.relayer.start();
        *task = Some(tokio::spawn(run(Arc::downgrade(self), streams)));
    }

    /// Subscribe to the application event stream.
    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn relayer(&self) -> &RelayerInteractor {
        &self.relayer
    }

    pub fn store(&self) -> &Arc<dyn SequenceStore> {
        &self.store
    }

    pub fn is_connected(&self) -> bool {
        self.relayer.is_connected()
    }

    /// Report host network reachability.
    pub fn set_network_available(&self, available: bool) {
        self.relayer.set_network_available(available);
    }

    /// Proposals awaiting an answer, oldest first.
    pub fn pending_proposals(&self) -> Vec<PendingProposal> {
        self.proposals.list()
    }

    pub fn pending_proposal(&self, proposer_public_key: &PublicKey) -> Option<PendingProposal> {
        self.proposals.get(proposer_public_key)
    }

    fn report(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }

    fn keys(&self) -> &KeyManagement {
        self.relayer.keys()
    }

    fn relay_options(&self) -> RelayProtocolOptions {
        RelayProtocolOptions {
            protocol: self.config.relay_protocol.clone(),
            data: None,
        }
    }

    fn participant(&self, public_key: PublicKey) -> Participant {
        Participant {
            public_key,
            metadata: self.config.metadata.clone(),
        }
    }

    async fn valid_pairing(&self, topic: &Topic) -> Result<Pairing> {
        self.store
            .get_pairing_by_topic(topic)
            .await?
            .ok_or_else(|| SignError::sequence_not_found(topic))
    }

    async fn valid_session(&self, topic: &Topic) -> Result<Session> {
        self.store
            .get_session_by_topic(topic)
            .await?
            .ok_or_else(|| SignError::sequence_not_found(topic))
    }

    /// Wipe keys, drop the subscription and finally the row.
    async fn teardown_pairing(&self, topic: &Topic) -> Result<()> {
        self.keys().remove_keys(topic).await?;
        if let Err(e) = self.relayer.unsubscribe(topic).await {
            warn!(topic = %topic, error = %e, "unsubscribe failed during teardown");
        }
        self.store.delete_pairing(topic).await
    }

    async fn teardown_session(&self, topic: &Topic) -> Result<()> {
        self.keys().remove_keys(topic).await?;
        if let Err(e) = self.relayer.unsubscribe(topic).await {
            warn!(topic = %topic, error = %e, "unsubscribe failed during teardown");
        }
        self.store.delete_session(topic).await
    }

    fn on_internal_error(&self, error: SignError) {
        self.report(EngineEvent::InternalError { error });
    }

    async fn on_connectivity(&self, available: bool) {
        self.report(EngineEvent::ConnectionStateChanged { available });
        if available {
            self.resubscribe_and_sweep().await;
        }
    }
}

#[async_trait]
impl Compensator for SignEngine {
    async fn undo(&self, step: &Undo) -> Result<()> {
        match step {
            Undo::RemoveKeys(topic) => self.keys().remove_keys(topic).await,
            Undo::RemoveKeyPair(key) => self.keys().remove_key_pair(key).await,
            Undo::Unsubscribe(topic) => self.relayer.unsubscribe(topic).await,
            Undo::DeletePairing(topic) => self.store.delete_pairing(topic).await,
            Undo::DeleteSession(topic) => self.store.delete_session(topic).await,
            Undo::ForgetProposal(key) => {
                self.proposals.take(key);
                Ok(())
            }
        }
    }
}

impl Drop for SignEngine {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
    }
}

/// Wait for the response to request `id`.
///
/// `inbound` must be subscribed before the request is published. The
/// receiver is dropped when this returns, whichever way it returns.
async fn await_response(
    mut inbound: broadcast::Receiver<Inbound>,
    id: u64,
    timeout: Duration,
    operation: &str,
) -> Result<WcResponse> {
    let wait = async {
        loop {
            match inbound.recv().await {
                Ok(Inbound::Response(response)) if response.response.id() == id => {
                    return Ok(response)
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(id, skipped, "response stream lagged while waiting");
                }
                Err(RecvError::Closed) => {
                    return Err(SignError::Internal("response stream closed".to_string()))
                }
            }
        }
    };
    match tokio::time::timeout(timeout, wait).await {
        Ok(result) => result,
        Err(_) => {
            debug!(id, operation, "no response before timeout");
            Err(SignError::timeout(operation, timeout))
        }
    }
}

fn lagged(stream: &str, skipped: u64) -> SignError {
    SignError::Internal(format!("{} stream skipped {} messages", stream, skipped))
}

async fn run(engine: Weak<SignEngine>, mut streams: Streams) {
    let mut available = streams.connectivity.borrow_and_update().is_available();
    if available {
        match engine.upgrade() {
            Some(engine) => engine.on_connectivity(true).await,
            None => return,
        }
    }

    loop {
        tokio::select! {
            message = streams.inbound.recv() => {
                let Some(engine) = engine.upgrade() else { break };
                match message {
                    Ok(Inbound::Request(request)) => engine.on_request(request).await,
                    Ok(Inbound::Response(response)) => engine.on_response(response).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "inbound stream lagged");
                        engine.on_internal_error(lagged("inbound", skipped));
                    }
                    Err(RecvError::Closed) => break,
                }
            },
            error = streams.errors.recv() => {
                let Some(engine) = engine.upgrade() else { break };
                match error {
                    Ok(error) => engine.on_internal_error(error),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "error stream lagged");
                        engine.on_internal_error(lagged("error", skipped));
                    }
                    Err(RecvError::Closed) => break,
                }
            },
            changed = streams.connectivity.changed() => {
                if changed.is_err() {
                    break;
                }
                let now = streams.connectivity.borrow_and_update().is_available();
                if now != available {
                    available = now;
                    match engine.upgrade() {
                        Some(engine) => engine.on_connectivity(now).await,
                        None => break,
                    }
                }
            },
            Some(expired) = streams.expired.recv() => match engine.upgrade() {
                Some(engine) => engine.on_expired(expired).await,
                None => break,
            },
        }
    }
    debug!("engine loop stopped");
}
