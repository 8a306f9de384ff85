//! Relay interaction layer.
//!
//! [`RelayerInteractor`] turns topics into encrypted pub/sub traffic. Outbound
//! requests are journaled and sealed before publishing; inbound envelopes are
//! opened, classified and either emitted as typed peer requests or correlated
//! with the request this side sent on the same topic and emitted as typed
//! responses. Both kinds share one stream so consumers see them in the order
//! they were delivered. Anything that cannot be opened or decoded is reported
//! on the internal error stream.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use signkit_lib::crypto::{Codec, EnvelopeType, KeyManagement};
use signkit_lib::rpc::{
    classify, methods, ClientParams, InboundPayload, IridiumParams, JsonRpcRequest,
    JsonRpcResponse, PeerError, WcRequest, WcResponse,
};
use signkit_lib::storage::{Direction, JournalEntry, RequestJournal};
use signkit_lib::transport::{ConnectionEvent, InboundMessage, RelayTransport, SubscriptionId};
use signkit_lib::{Result, SignError, Topic};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::lock;

/// Connectivity inputs. The relay is usable only when both are true.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Connectivity {
    pub transport_open: bool,
    pub network_available: bool,
}

impl Connectivity {
    pub fn is_available(&self) -> bool {
        self.transport_open && self.network_available
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self {
            transport_open: false,
            network_available: true,
        }
    }
}

/// A typed inbound message.
#[derive(Clone, Debug)]
pub enum Inbound {
    Request(WcRequest),
    Response(WcResponse),
}

/// A request sealed for publishing but not yet sent.
#[derive(Clone, Debug)]
pub struct PreparedRequest {
    pub topic: Topic,
    pub id: u64,
    pub envelope: String,
    pub relay: IridiumParams,
}

struct Shared {
    transport: Arc<dyn RelayTransport>,
    codec: Codec,
    journal: Arc<dyn RequestJournal>,
    subscriptions: Mutex<HashMap<Topic, SubscriptionId>>,
    connectivity: watch::Sender<Connectivity>,
    inbound: broadcast::Sender<Inbound>,
    errors: broadcast::Sender<SignError>,
}

impl Shared {
    fn internal_error(&self, error: SignError) {
        let _ = self.errors.send(error);
    }

    fn on_connection_event(&self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Opened => {
                info!("relay connection opened");
                self.connectivity.send_if_modified(|state| {
                    let changed = !state.transport_open;
                    state.transport_open = true;
                    changed
                });
            }
            ConnectionEvent::Closed => {
                info!("relay connection closed");
                self.connectivity.send_if_modified(|state| {
                    let changed = state.transport_open;
                    state.transport_open = false;
                    changed
                });
            }
            ConnectionEvent::Failed { cause } => {
                warn!(cause = %cause, "relay connection failed");
                self.internal_error(SignError::Transport(cause));
            }
        }
    }

    async fn on_inbound(&self, inbound: InboundMessage) {
        let InboundMessage { topic, message } = inbound;
        let text = match self.codec.decrypt(&topic, &message, None).await {
            Ok(text) => text,
            Err(e) => {
                warn!(topic = %topic, error = %e, "dropping undecryptable envelope");
                self.internal_error(e);
                return;
            }
        };

        let result = match classify(&text) {
            Ok(InboundPayload::Request(request)) => self.on_request(topic, request, &text).await,
            Ok(InboundPayload::Response(response)) => {
                self.on_response(topic, response, &text).await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(error = %e, "failed to process inbound payload");
            self.internal_error(e);
        }
    }

    async fn on_request(&self, topic: Topic, request: JsonRpcRequest, text: &str) -> Result<()> {
        if !self
            .journal
            .admit(request.id, &topic, &request.method, text, Direction::Inbound)
            .await?
        {
            debug!(id = request.id, topic = %topic, "duplicate request dropped");
            return Ok(());
        }
        let params = ClientParams::from_method(&request.method, request.params)?;
        debug!(id = request.id, topic = %topic, method = params.method(), "inbound request");
        let _ = self.inbound.send(Inbound::Request(WcRequest {
            topic,
            id: request.id,
            params,
        }));
        Ok(())
    }

    async fn on_response(&self, topic: Topic, response: JsonRpcResponse, text: &str) -> Result<()> {
        let Some(entry) = self
            .journal
            .attach_response(response.id(), &topic, Direction::Outbound, text)
            .await?
        else {
            debug!(id = response.id(), topic = %topic, "uncorrelated response dropped");
            return Ok(());
        };
        let params = params_of(&entry)?;
        debug!(id = entry.id, topic = %topic, method = params.method(), "inbound response");
        let _ = self.inbound.send(Inbound::Response(WcResponse {
            topic,
            params,
            response,
        }));
        Ok(())
    }
}

fn params_of(entry: &JournalEntry) -> Result<ClientParams> {
    let request: JsonRpcRequest = serde_json::from_str(&entry.body)?;
    ClientParams::from_method(&request.method, request.params)
}

/// Publishes encrypted requests and responses and demultiplexes inbound traffic.
pub struct RelayerInteractor {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RelayerInteractor {
    pub fn new(
        transport: Arc<dyn RelayTransport>,
        keys: KeyManagement,
        journal: Arc<dyn RequestJournal>,
        channel_capacity: usize,
    ) -> Self {
        let capacity = channel_capacity.max(1);
        let (connectivity, _) = watch::channel(Connectivity::default());
        let (inbound, _) = broadcast::channel(capacity);
        let (errors, _) = broadcast::channel(capacity);
        Self {
            shared: Arc::new(Shared {
                transport,
                codec: Codec::new(keys),
                journal,
                subscriptions: Mutex::new(HashMap::new()),
                connectivity,
                inbound,
                errors,
            }),
            task: Mutex::new(None),
        }
    }

    /// Start consuming the transport's inbound and connection streams.
    /// Calling it again is a no-op.
    pub fn start(&self) {
        let mut task = lock(&self.task);
        if task.is_some() {
            return;
        }
        let shared = self.shared.clone();
        let mut inbound = shared.transport.inbound_messages();
        let mut events = shared.transport.connection_events();
        *task = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    message = inbound.recv() => match message {
                        Ok(message) => shared.on_inbound(message).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "inbound stream lagged");
                            shared.internal_error(SignError::Transport(format!(
                                "inbound stream skipped {} messages",
                                skipped
                            )));
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    event = events.recv() => match event {
                        Ok(event) => shared.on_connection_event(event),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "connection event stream lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            debug!("relayer stopped");
        }));
    }

    pub fn keys(&self) -> &KeyManagement {
        self.shared.codec.keys()
    }

    pub fn codec(&self) -> &Codec {
        &self.shared.codec
    }

    /// Peer requests and correlated responses, in delivery order.
    pub fn inbound(&self) -> broadcast::Receiver<Inbound> {
        self.shared.inbound.subscribe()
    }

    /// Inbound traffic that could not be processed.
    pub fn internal_errors(&self) -> broadcast::Receiver<SignError> {
        self.shared.errors.subscribe()
    }

    pub fn connectivity(&self) -> watch::Receiver<Connectivity> {
        self.shared.connectivity.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connectivity.borrow().is_available()
    }

    /// Report host network reachability.
    pub fn set_network_available(&self, available: bool) {
        self.shared.connectivity.send_if_modified(|state| {
            let changed = state.network_available != available;
            state.network_available = available;
            changed
        });
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(SignError::NotConnected)
        }
    }

    /// Journal and seal a request without sending it.
    ///
    /// An id that is already journaled is not written again; the request is
    /// still sealed so the caller can publish it.
    pub async fn prepare_request(
        &self,
        topic: &Topic,
        id: u64,
        params: &ClientParams,
    ) -> Result<PreparedRequest> {
        let request = JsonRpcRequest::new(id, params)?;
        let body = serde_json::to_string(&request)?;
        if !self
            .shared
            .journal
            .admit(id, topic, params.method(), &body, Direction::Outbound)
            .await?
        {
            debug!(id, topic = %topic, "request id already journaled");
        }
        let envelope = self
            .shared
            .codec
            .encrypt(topic, &body, EnvelopeType::Type0)
            .await?;
        Ok(PreparedRequest {
            topic: topic.clone(),
            id,
            envelope,
            relay: IridiumParams::for_request(params),
        })
    }

    /// Publish a sealed request. `Ok` means the relay acknowledged it.
    pub async fn publish_prepared(&self, prepared: &PreparedRequest) -> Result<()> {
        self.ensure_connected()?;
        match self
            .shared
            .transport
            .publish(&prepared.topic, &prepared.envelope, &prepared.relay)
            .await
        {
            Ok(()) => {
                debug!(id = prepared.id, topic = %prepared.topic, tag = prepared.relay.tag, "request published");
                Ok(())
            }
            Err(e) => {
                warn!(id = prepared.id, topic = %prepared.topic, error = %e, "request publish failed");
                Err(e)
            }
        }
    }

    /// Journal, seal and publish a request.
    pub async fn publish_request(&self, topic: &Topic, id: u64, params: &ClientParams) -> Result<()> {
        self.ensure_connected()?;
        let prepared = self.prepare_request(topic, id, params).await?;
        self.publish_prepared(&prepared).await
    }

    /// Seal and publish a response. On success the journal entry of the
    /// answered request records the response.
    pub async fn publish_response(
        &self,
        topic: &Topic,
        response: &JsonRpcResponse,
        relay: IridiumParams,
    ) -> Result<()> {
        self.ensure_connected()?;
        let body = serde_json::to_string(response)?;
        let envelope = self
            .shared
            .codec
            .encrypt(topic, &body, EnvelopeType::Type0)
            .await?;
        if let Err(e) = self.shared.transport.publish(topic, &envelope, &relay).await {
            warn!(id = response.id(), topic = %topic, error = %e, "response publish failed");
            return Err(e);
        }
        debug!(id = response.id(), topic = %topic, tag = relay.tag, "response published");
        self.shared
            .journal
            .attach_response(response.id(), topic, Direction::Inbound, &body)
            .await?;
        Ok(())
    }

    /// Answer a peer request with a result.
    pub async fn respond_with_result(
        &self,
        topic: &Topic,
        id: u64,
        params: &ClientParams,
        result: Value,
    ) -> Result<()> {
        self.publish_response(
            topic,
            &JsonRpcResponse::result(id, result),
            IridiumParams::for_response(params),
        )
        .await
    }

    /// Answer a peer request with a protocol error.
    pub async fn respond_with_error(
        &self,
        topic: &Topic,
        id: u64,
        params: &ClientParams,
        error: &PeerError,
    ) -> Result<()> {
        debug!(id, topic = %topic, code = error.code(), "answering with error");
        self.publish_response(
            topic,
            &JsonRpcResponse::error(id, error.to_json_rpc_error()),
            IridiumParams::for_response(params),
        )
        .await
    }

    /// Subscribe to `topic`, replacing any recorded subscription id.
    pub async fn subscribe(&self, topic: &Topic) -> Result<()> {
        let id = self.shared.transport.subscribe(topic).await.map_err(|e| {
            warn!(topic = %topic, error = %e, "subscribe failed");
            e
        })?;
        debug!(topic = %topic, subscription = %id, "subscribed");
        lock(&self.shared.subscriptions).insert(topic.clone(), id);
        Ok(())
    }

    /// Unsubscribe from `topic` and purge its journal entries. Unknown topics
    /// are ignored.
    ///
    /// The local record is dropped even when the relay call fails; the
    /// transport error is still returned.
    pub async fn unsubscribe(&self, topic: &Topic) -> Result<()> {
        let Some(id) = lock(&self.shared.subscriptions).remove(topic) else {
            return Ok(());
        };
        let relayed = self.shared.transport.unsubscribe(topic, &id).await;
        self.shared.journal.delete(topic).await?;
        match relayed {
            Ok(()) => {
                debug!(topic = %topic, "unsubscribed");
                Ok(())
            }
            Err(e) => {
                warn!(topic = %topic, error = %e, "unsubscribe failed, local state dropped");
                Err(e)
            }
        }
    }

    pub fn is_subscribed(&self, topic: &Topic) -> bool {
        lock(&self.shared.subscriptions).contains_key(topic)
    }

    /// Inbound session requests on `topic` that have not been answered.
    pub async fn pending_requests(&self, topic: &Topic) -> Result<Vec<WcRequest>> {
        let entries = self.shared.journal.list_pending(topic).await?;
        entries
            .iter()
            .filter(|entry| entry.direction == Direction::Inbound)
            .filter(|entry| entry.method == methods::SESSION_REQUEST)
            .map(|entry| {
                Ok(WcRequest {
                    topic: entry.topic.clone(),
                    id: entry.id,
                    params: params_of(entry)?,
                })
            })
            .collect()
    }
}

impl Drop for RelayerInteractor {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use signkit_lib::rpc::{generate_id, PingParams, SessionParams};
    use signkit_lib::storage::{InMemoryJournal, InMemoryKeyStore};
    use signkit_lib::test_utils::LoopbackRelay;
    use signkit_lib::SymmetricKey;
    use std::time::Duration;

    fn new_relayer(
        relay: &Arc<LoopbackRelay>,
    ) -> (RelayerInteractor, Arc<signkit_lib::test_utils::LoopbackClient>) {
        let client = relay.client();
        let keys = KeyManagement::new(Arc::new(InMemoryKeyStore::new()));
        let relayer = RelayerInteractor::new(client.clone(), keys, Arc::new(InMemoryJournal::new()), 16);
        (relayer, client)
    }

    async fn wait_connected(relayer: &RelayerInteractor) {
        let mut rx = relayer.connectivity();
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|c| c.is_available()))
            .await
            .unwrap()
            .unwrap();
    }

    fn ping() -> ClientParams {
        SessionParams::Ping(PingParams::default()).into()
    }

    #[tokio::test]
    async fn test_publish_requires_connection() {
        let relay = LoopbackRelay::new();
        let (relayer, _client) = new_relayer(&relay);
        let err = relayer
            .publish_request(&Topic::generate(), generate_id(), &ping())
            .await
            .unwrap_err();
        assert_eq!(err, SignError::NotConnected);
    }

    #[tokio::test]
    async fn test_network_flag_gates_connectivity() {
        let relay = LoopbackRelay::new();
        let (relayer, client) = new_relayer(&relay);
        relayer.start();
        client.connect();
        wait_connected(&relayer).await;

        relayer.set_network_available(false);
        assert!(!relayer.is_connected());
        relayer.set_network_available(true);
        assert!(relayer.is_connected());
    }

    #[tokio::test]
    async fn test_request_and_response_round_trip() {
        let relay = LoopbackRelay::new();
        let (alice, alice_client) = new_relayer(&relay);
        let (bob, bob_client) = new_relayer(&relay);
        alice.start();
        bob.start();
        alice_client.connect();
        bob_client.connect();
        wait_connected(&alice).await;
        wait_connected(&bob).await;

        let topic = Topic::generate();
        let key = SymmetricKey::generate();
        alice.keys().set_symmetric_key(&topic, &key).await.unwrap();
        bob.keys().set_symmetric_key(&topic, &key).await.unwrap();
        alice.subscribe(&topic).await.unwrap();
        bob.subscribe(&topic).await.unwrap();

        let mut bob_inbound = bob.inbound();
        let mut alice_inbound = alice.inbound();

        let id = generate_id();
        alice.publish_request(&topic, id, &ping()).await.unwrap();

        let Inbound::Request(request) =
            tokio::time::timeout(Duration::from_secs(2), bob_inbound.recv())
                .await
                .unwrap()
                .unwrap()
        else {
            panic!("expected a request");
        };
        assert_eq!(request.id, id);
        assert_eq!(request.method(), methods::SESSION_PING);

        bob.respond_with_result(&request.topic, request.id, &request.params, Value::Bool(true))
            .await
            .unwrap();
        let Inbound::Response(response) =
            tokio::time::timeout(Duration::from_secs(2), alice_inbound.recv())
                .await
                .unwrap()
                .unwrap()
        else {
            panic!("expected a response");
        };
        assert_eq!(response.response.id(), id);
        assert_eq!(response.params, ping());
        assert_eq!(
            bob_client.published().last().unwrap().1,
            IridiumParams::new(1115, 30, false)
        );
    }

    #[tokio::test]
    async fn test_undecryptable_traffic_becomes_internal_error() {
        let relay = LoopbackRelay::new();
        let (alice, alice_client) = new_relayer(&relay);
        let (bob, bob_client) = new_relayer(&relay);
        alice.start();
        bob.start();
        alice_client.connect();
        bob_client.connect();
        wait_connected(&alice).await;
        wait_connected(&bob).await;

        let topic = Topic::generate();
        alice
            .keys()
            .set_symmetric_key(&topic, &SymmetricKey::generate())
            .await
            .unwrap();
        bob.keys()
            .set_symmetric_key(&topic, &SymmetricKey::generate())
            .await
            .unwrap();
        bob.subscribe(&topic).await.unwrap();

        let mut errors = bob.internal_errors();
        let mut inbound = bob.inbound();
        alice.publish_request(&topic, generate_id(), &ping()).await.unwrap();

        let error = tokio::time::timeout(Duration::from_secs(2), errors.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(error, SignError::Decryption(_)));
        assert!(inbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unsubscribe_purges_journal_and_ignores_unknown_topics() {
        let relay = LoopbackRelay::new();
        let (relayer, client) = new_relayer(&relay);
        relayer.start();
        client.connect();
        wait_connected(&relayer).await;

        let unknown = Topic::generate();
        relayer.unsubscribe(&unknown).await.unwrap();
        assert_eq!(client.unsubscribe_calls(), 0);

        let topic = Topic::generate();
        relayer
            .keys()
            .set_symmetric_key(&topic, &SymmetricKey::generate())
            .await
            .unwrap();
        relayer.subscribe(&topic).await.unwrap();
        relayer.publish_request(&topic, generate_id(), &ping()).await.unwrap();
        assert!(relayer.is_subscribed(&topic));

        relayer.unsubscribe(&topic).await.unwrap();
        assert!(!relayer.is_subscribed(&topic));
        assert_eq!(client.unsubscribe_calls(), 1);
        assert!(relayer.pending_requests(&topic).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribe_drops_local_state_when_relay_fails() {
        let relay = LoopbackRelay::new();
        let client = relay.client();
        let keys = KeyManagement::new(Arc::new(InMemoryKeyStore::new()));
        let journal = Arc::new(InMemoryJournal::new());
        let relayer = RelayerInteractor::new(client.clone(), keys, journal.clone(), 16);
        relayer.start();
        client.connect();
        wait_connected(&relayer).await;

        let topic = Topic::generate();
        relayer
            .keys()
            .set_symmetric_key(&topic, &SymmetricKey::generate())
            .await
            .unwrap();
        relayer.subscribe(&topic).await.unwrap();
        relayer.publish_request(&topic, generate_id(), &ping()).await.unwrap();
        assert_eq!(journal.len(), 1);

        client.disconnect();
        assert!(matches!(
            relayer.unsubscribe(&topic).await,
            Err(SignError::Transport(_))
        ));
        assert!(!relayer.is_subscribed(&topic));
        assert!(journal.is_empty());
    }
}
