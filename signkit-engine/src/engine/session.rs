use serde_json::Value;
use signkit_lib::namespace::{
    is_event_authorized, is_method_authorized, is_valid_chain_id, validate_proposal_namespaces,
    validate_session_namespaces, ProposalNamespaces, SessionNamespaces,
};
use signkit_lib::rpc::{
    generate_id, ApprovalParams, ClientParams, IridiumParams, JsonRpcResponse, PairingParams,
    PeerError, SessionEventParams, SessionExtendParams, SessionParams, SessionProposeParams,
    SessionRequestParams, SessionSettleParams, SessionUpdateParams, WcRequest,
};
use signkit_lib::sequence::{Session, SESSION_EXTENSION_WINDOW};
use signkit_lib::{Expiry, PublicKey, Result, SignError, Topic};
use tracing::{info, warn};

use super::pairing::user_disconnected;
use super::{await_response, SignEngine};
use crate::events::{DeleteOrigin, EngineEvent};
use crate::proposals::PendingProposal;
use crate::saga::{Saga, Undo};

/// A proposal sent by this side.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProposedSession {
    pub pairing_topic: Topic,
    /// URI of the pairing the proposal was sent over.
    pub uri: String,
    /// Key the peer's settle and approval are bound to.
    pub proposer_public_key: PublicKey,
    pub request_id: u64,
}

impl SignEngine {
    /// Propose a session over `pairing_topic`, or over a fresh pairing when
    /// `None`.
    pub async fn propose_session(
        &self,
        pairing_topic: Option<&Topic>,
        required_namespaces: ProposalNamespaces,
    ) -> Result<ProposedSession> {
        validate_proposal_namespaces(&required_namespaces)?;
        if let Some(topic) = pairing_topic {
            self.valid_pairing(topic).await?;
        }

        let mut saga = Saga::new("propose_session");
        match self
            .send_proposal(pairing_topic, required_namespaces, &mut saga)
            .await
        {
            Ok(proposed) => {
                saga.commit();
                Ok(proposed)
            }
            Err(e) => {
                saga.compensate(self).await;
                Err(e)
            }
        }
    }

    async fn send_proposal(
        &self,
        pairing_topic: Option<&Topic>,
        required_namespaces: ProposalNamespaces,
        saga: &mut Saga,
    ) -> Result<ProposedSession> {
        let pairing = match pairing_topic {
            Some(topic) => self.valid_pairing(topic).await?,
            None => self.create_pairing(saga).await?,
        };

        let proposer_public_key = self.keys().generate_key_pair().await?;
        saga.record(Undo::RemoveKeyPair(proposer_public_key));

        let proposal = SessionProposeParams {
            relays: vec![self.relay_options()],
            proposer: self.participant(proposer_public_key),
            required_namespaces,
        };
        let request_id = generate_id();
        self.proposals.insert(PendingProposal {
            pairing_topic: pairing.topic.clone(),
            request_id,
            proposal: proposal.clone(),
        });
        saga.record(Undo::ForgetProposal(proposer_public_key));

        self.relayer
            .publish_request(
                &pairing.topic,
                request_id,
                &PairingParams::SessionPropose(proposal).into(),
            )
            .await?;

        info!(pairing_topic = %pairing.topic, proposer = %proposer_public_key, "session proposed");
        Ok(ProposedSession {
            pairing_topic: pairing.topic,
            uri: pairing.uri,
            proposer_public_key,
            request_id,
        })
    }

    /// Approve a peer's proposal with the granted namespaces.
    ///
    /// The returned session is unacknowledged until the peer answers the
    /// settle request.
    pub async fn approve(
        &self,
        proposer_public_key: &PublicKey,
        namespaces: SessionNamespaces,
    ) -> Result<Session> {
        let pending = self
            .proposals
            .take(proposer_public_key)
            .ok_or_else(|| SignError::ProposalNotFound(proposer_public_key.to_hex()))?;

        if let Err(e) =
            validate_session_namespaces(&namespaces, &pending.proposal.required_namespaces)
        {
            self.proposals.insert(pending);
            return Err(e.into());
        }
        if !self.relayer.is_connected() {
            self.proposals.insert(pending);
            return Err(SignError::NotConnected);
        }

        let mut saga = Saga::new("approve");
        match self.settle_proposal(&pending, namespaces, &mut saga).await {
            Ok(session) => {
                saga.commit();
                Ok(session)
            }
            Err(e) => {
                saga.compensate(self).await;
                Err(e)
            }
        }
    }

    async fn settle_proposal(
        &self,
        pending: &PendingProposal,
        namespaces: SessionNamespaces,
        saga: &mut Saga,
    ) -> Result<Session> {
        let self_public_key = self.keys().generate_key_pair().await?;
        saga.record(Undo::RemoveKeyPair(self_public_key));

        let topic = self
            .keys()
            .generate_topic_from_key_agreement(&self_public_key, pending.proposer_public_key())
            .await?;
        saga.record(Undo::RemoveKeys(topic.clone()));

        self.relayer.subscribe(&topic).await?;
        saga.record(Undo::Unsubscribe(topic.clone()));

        let relay = pending
            .proposal
            .relays
            .first()
            .cloned()
            .unwrap_or_else(|| self.relay_options());
        let approval = ApprovalParams {
            relay: relay.clone(),
            responder_public_key: self_public_key,
        };
        let propose: ClientParams = PairingParams::SessionPropose(pending.proposal.clone()).into();
        self.relayer
            .respond_with_result(
                &pending.pairing_topic,
                pending.request_id,
                &propose,
                serde_json::to_value(&approval)?,
            )
            .await?;

        let session = Session::unacknowledged(
            topic.clone(),
            relay.clone(),
            self.participant(self_public_key),
            pending.proposal.proposer.clone(),
            namespaces.clone(),
            pending.proposal.required_namespaces.clone(),
        );
        self.store.insert_session(session.clone()).await?;
        saga.record(Undo::DeleteSession(topic.clone()));

        let settle = SessionSettleParams {
            relay,
            controller: self.participant(self_public_key),
            namespaces,
            expiry: session.expiry.seconds(),
        };
        self.relayer
            .publish_request(&topic, generate_id(), &SessionParams::Settle(settle).into())
            .await?;

        if let Err(e) = self
            .store
            .upsert_peer_metadata(&pending.pairing_topic, pending.proposal.proposer.metadata.clone())
            .await
        {
            warn!(pairing_topic = %pending.pairing_topic, error = %e, "could not record proposer metadata");
        }

        info!(topic = %topic, "session approved, settle sent");
        Ok(session)
    }

    /// Reject a peer's proposal with an application-chosen reason and code.
    pub async fn reject(&self, proposer_public_key: &PublicKey, reason: &str, code: i32) -> Result<()> {
        let pending = self
            .proposals
            .take(proposer_public_key)
            .ok_or_else(|| SignError::ProposalNotFound(proposer_public_key.to_hex()))?;

        let propose: ClientParams = PairingParams::SessionPropose(pending.proposal).into();
        self.relayer
            .respond_with_error(
                &pending.pairing_topic,
                pending.request_id,
                &propose,
                &PeerError::Custom {
                    code,
                    message: reason.to_string(),
                },
            )
            .await?;
        info!(pairing_topic = %pending.pairing_topic, code, "proposal rejected");
        Ok(())
    }

    /// Replace the session's namespaces. Applied locally once the peer
    /// acknowledges.
    pub async fn update_session(&self, topic: &Topic, namespaces: SessionNamespaces) -> Result<()> {
        let session = self.valid_session(topic).await?;
        if !session.is_self_controller() {
            return Err(SignError::Unauthorized(format!(
                "only the controller may update session {}",
                topic
            )));
        }
        if !session.is_acknowledged {
            return Err(SignError::NotSettled(topic.to_string()));
        }
        validate_session_namespaces(&namespaces, &session.proposal_namespaces)?;

        let id = generate_id();
        self.store
            .stage_namespace_update(topic, namespaces.clone(), id)
            .await?;
        let params: ClientParams = SessionParams::Update(SessionUpdateParams { namespaces }).into();
        if let Err(e) = self.relayer.publish_request(topic, id, &params).await {
            if let Err(cleanup) = self.store.take_staged_namespace_update(topic, id).await {
                warn!(topic = %topic, error = %cleanup, "could not drop staged update");
            }
            return Err(e);
        }
        Ok(())
    }

    /// Push the session's expiry out by the extension window.
    ///
    /// The new expiry is stored before the peer is told; a failed
    /// notification is reported but not rolled back.
    pub async fn extend(&self, topic: &Topic) -> Result<Expiry> {
        let session = self.valid_session(topic).await?;
        if !session.is_self_controller() {
            return Err(SignError::Unauthorized(format!(
                "only the controller may extend session {}",
                topic
            )));
        }
        if !session.is_acknowledged {
            return Err(SignError::NotSettled(topic.to_string()));
        }

        let expiry = Expiry::from_now(SESSION_EXTENSION_WINDOW);
        self.store.extend_session(topic, expiry).await?;
        let params: ClientParams = SessionParams::Extend(SessionExtendParams {
            expiry: expiry.seconds(),
        })
        .into();
        self.relayer
            .publish_request(topic, generate_id(), &params)
            .await?;
        info!(topic = %topic, expiry = expiry.seconds(), "session extended");
        Ok(expiry)
    }

    /// Send a request to the peer and wait for its answer.
    ///
    /// Nothing is retried: a timeout ends this call and a new call uses a new
    /// request id.
    pub async fn session_request(
        &self,
        topic: &Topic,
        request: SessionRequestParams,
    ) -> Result<JsonRpcResponse> {
        let session = self.valid_session(topic).await?;
        if request.request.method.trim().is_empty() {
            return Err(SignError::InvalidRequest("method is empty".to_string()));
        }
        if !is_valid_chain_id(&request.chain_id) {
            return Err(SignError::InvalidRequest(format!(
                "invalid chain id {}",
                request.chain_id
            )));
        }
        if !is_method_authorized(&request.chain_id, &request.request.method, &session.namespaces) {
            return Err(SignError::Unauthorized(format!(
                "{} is not authorized on {}",
                request.request.method, request.chain_id
            )));
        }

        let id = generate_id();
        let inbound = self.relayer.inbound();
        let params: ClientParams = SessionParams::Request(request).into();
        self.relayer.publish_request(topic, id, &params).await?;

        let answer = await_response(
            inbound,
            id,
            self.config.request_timeout(),
            params.method(),
        )
        .await?;
        Ok(answer.response)
    }

    /// Answer a peer's session request.
    pub async fn respond_session_request(
        &self,
        topic: &Topic,
        response: JsonRpcResponse,
    ) -> Result<()> {
        self.valid_session(topic).await?;
        let request = self
            .relayer
            .pending_requests(topic)
            .await?
            .into_iter()
            .find(|r| r.id == response.id())
            .ok_or_else(|| {
                SignError::InvalidRequest(format!(
                    "no pending session request with id {}",
                    response.id()
                ))
            })?;
        self.relayer
            .publish_response(topic, &response, IridiumParams::for_response(&request.params))
            .await
    }

    /// Emit an event to the peer. Only the controller emits.
    pub async fn emit(&self, topic: &Topic, event: SessionEventParams) -> Result<()> {
        let session = self.valid_session(topic).await?;
        if !session.is_self_controller() {
            return Err(SignError::Unauthorized(format!(
                "only the controller may emit on session {}",
                topic
            )));
        }
        if !session.is_acknowledged {
            return Err(SignError::NotSettled(topic.to_string()));
        }
        if event.event.name.trim().is_empty() || !is_valid_chain_id(&event.chain_id) {
            return Err(SignError::InvalidEvent(format!(
                "event {:?} on chain {:?}",
                event.event.name, event.chain_id
            )));
        }
        if !is_event_authorized(&event.chain_id, &event.event.name, &session.namespaces) {
            return Err(SignError::Unauthorized(format!(
                "{} is not authorized on {}",
                event.event.name, event.chain_id
            )));
        }

        self.relayer
            .publish_request(topic, generate_id(), &SessionParams::Event(event).into())
            .await
    }

    /// End a session. Local state is removed first; the peer notification is
    /// best effort.
    pub async fn disconnect(&self, topic: &Topic) -> Result<()> {
        self.valid_session(topic).await?;

        let params: ClientParams = SessionParams::Delete(user_disconnected()).into();
        let prepared = self.relayer.prepare_request(topic, generate_id(), &params).await;

        self.teardown_session(topic).await?;
        self.report(EngineEvent::SessionDeleted {
            topic: topic.clone(),
            origin: DeleteOrigin::Local,
        });
        info!(topic = %topic, "session disconnected");

        match prepared {
            Ok(prepared) => {
                if let Err(e) = self.relayer.publish_prepared(&prepared).await {
                    warn!(topic = %topic, error = %e, "session delete notification not delivered");
                }
            }
            Err(e) => warn!(topic = %topic, error = %e, "could not seal session delete notification"),
        }
        Ok(())
    }

    /// Acknowledged, unexpired sessions.
    pub async fn settled_sessions(&self) -> Result<Vec<Session>> {
        Ok(self
            .store
            .list_sessions()
            .await?
            .into_iter()
            .filter(|s| s.is_acknowledged && !s.expiry.is_expired())
            .collect())
    }

    /// Unexpired pairings.
    pub async fn settled_pairings(&self) -> Result<Vec<signkit_lib::sequence::Pairing>> {
        Ok(self
            .store
            .list_pairings()
            .await?
            .into_iter()
            .filter(|p| !p.expiry.is_expired())
            .collect())
    }

    /// Peer session requests on `topic` that have not been answered yet.
    pub async fn pending_requests(&self, topic: &Topic) -> Result<Vec<WcRequest>> {
        self.relayer.pending_requests(topic).await
    }

    /// Answer a peer request with `true`.
    pub(super) async fn respond_ok(&self, request: &WcRequest) -> Result<()> {
        self.relayer
            .respond_with_result(&request.topic, request.id, &request.params, Value::Bool(true))
            .await
    }

    pub(super) async fn respond_error(&self, request: &WcRequest, error: PeerError) -> Result<()> {
        self.relayer
            .respond_with_error(&request.topic, request.id, &request.params, &error)
            .await
    }
}
