//! Peer-initiated requests.
//!
//! Every request is answered, with `true` or a typed peer error, before or
//! while the matching application event is reported. Requests on topics this
//! side does not know are answered with "no matching topic" and never reach
//! the application.

use signkit_lib::namespace::{
    is_event_authorized, is_method_authorized, is_valid_chain_id, validate_proposal_namespaces,
    validate_session_namespaces,
};
use signkit_lib::rpc::{
    ClientParams, PairingParams, PeerError, SessionEventParams, SessionExtendParams,
    SessionParams, SessionProposeParams, SessionRequestParams, SessionSettleParams,
    SessionUpdateParams, WcRequest,
};
use signkit_lib::sequence::{Session, SESSION_EXTENSION_WINDOW};
use signkit_lib::{now_seconds, Expiry, Result};
use tracing::{debug, info, warn};

use super::SignEngine;
use crate::events::{DeleteOrigin, EngineEvent};
use crate::proposals::PendingProposal;

impl SignEngine {
    pub(super) async fn on_request(&self, request: WcRequest) {
        debug!(id = request.id, topic = %request.topic, method = request.method(), "handling peer request");
        let result = match request.params.clone() {
            ClientParams::Pairing(PairingParams::SessionPropose(params)) => {
                self.on_session_propose(&request, params).await
            }
            ClientParams::Pairing(PairingParams::Delete(_)) => self.on_pairing_delete(&request).await,
            ClientParams::Pairing(PairingParams::Ping(_)) => self.on_pairing_ping(&request).await,
            ClientParams::Session(SessionParams::Settle(params)) => {
                self.on_session_settle(&request, params).await
            }
            ClientParams::Session(SessionParams::Request(params)) => {
                self.on_session_request(&request, params).await
            }
            ClientParams::Session(SessionParams::Event(params)) => {
                self.on_session_event(&request, params).await
            }
            ClientParams::Session(SessionParams::Update(params)) => {
                self.on_session_update(&request, params).await
            }
            ClientParams::Session(SessionParams::Extend(params)) => {
                self.on_session_extend(&request, params).await
            }
            ClientParams::Session(SessionParams::Delete(_)) => self.on_session_delete(&request).await,
            ClientParams::Session(SessionParams::Ping(_)) => self.on_session_ping(&request).await,
        };
        if let Err(e) = result {
            warn!(id = request.id, topic = %request.topic, method = request.method(), error = %e, "peer request failed");
            self.on_internal_error(e);
        }
    }

    /// The valid session on the request's topic, or `None` after answering
    /// "no matching session".
    async fn session_for(&self, request: &WcRequest) -> Result<Option<Session>> {
        match self.store.get_session_by_topic(&request.topic).await? {
            Some(session) => Ok(Some(session)),
            None => {
                self.respond_error(request, PeerError::no_matching_session(&request.topic))
                    .await?;
                Ok(None)
            }
        }
    }

    async fn pairing_is_valid(&self, request: &WcRequest) -> Result<bool> {
        if self.store.is_pairing_valid(&request.topic).await? {
            return Ok(true);
        }
        self.respond_error(request, PeerError::no_matching_pairing(&request.topic))
            .await?;
        Ok(false)
    }

    async fn on_session_propose(
        &self,
        request: &WcRequest,
        params: SessionProposeParams,
    ) -> Result<()> {
        if !self.pairing_is_valid(request).await? {
            return Ok(());
        }
        if let Err(e) = validate_proposal_namespaces(&params.required_namespaces) {
            return self.respond_error(request, e.peer_error()).await;
        }

        let pending = PendingProposal {
            pairing_topic: request.topic.clone(),
            request_id: request.id,
            proposal: params,
        };
        self.proposals.insert(pending.clone());
        info!(pairing_topic = %request.topic, proposer = %pending.proposer_public_key(), "session proposal received");
        self.report(EngineEvent::SessionProposal(pending));
        Ok(())
    }

    async fn on_pairing_delete(&self, request: &WcRequest) -> Result<()> {
        if !self.pairing_is_valid(request).await? {
            return Ok(());
        }
        self.respond_ok(request).await?;
        self.teardown_pairing(&request.topic).await?;
        info!(topic = %request.topic, "pairing deleted by peer");
        self.report(EngineEvent::PairingDeleted {
            topic: request.topic.clone(),
        });
        Ok(())
    }

    async fn on_pairing_ping(&self, request: &WcRequest) -> Result<()> {
        if !self.pairing_is_valid(request).await? {
            return Ok(());
        }
        self.respond_ok(request).await
    }

    async fn on_session_settle(
        &self,
        request: &WcRequest,
        settle: SessionSettleParams,
    ) -> Result<()> {
        let topic = &request.topic;
        let (self_public_key, _) = match self.keys().get_key_agreement(topic).await {
            Ok(agreement) => agreement,
            Err(e) => {
                debug!(topic = %topic, error = %e, "settle on a topic without key agreement");
                return self
                    .respond_error(request, PeerError::SessionSettlementFailed(e.to_string()))
                    .await;
            }
        };
        let Some(pending) = self.proposals.take(&self_public_key) else {
            return self
                .respond_error(
                    request,
                    PeerError::SessionSettlementFailed(format!(
                        "no proposal for key {}",
                        self_public_key
                    )),
                )
                .await;
        };

        if let Err(e) =
            validate_session_namespaces(&settle.namespaces, &pending.proposal.required_namespaces)
        {
            self.respond_error(request, e.peer_error()).await?;
            self.keys().remove_keys(topic).await?;
            if let Err(e) = self.relayer.unsubscribe(topic).await {
                warn!(topic = %topic, error = %e, "unsubscribe after refused settle failed");
            }
            return Ok(());
        }

        let session = Session::acknowledged(
            topic.clone(),
            &settle,
            self.participant(self_public_key),
            pending.proposal.required_namespaces.clone(),
        );
        if let Err(e) = self.store.insert_session(session.clone()).await {
            warn!(topic = %topic, error = %e, "could not store settled session");
            self.proposals.insert(pending);
            return self
                .respond_error(request, PeerError::SessionSettlementFailed(e.to_string()))
                .await;
        }
        if let Err(e) = self
            .store
            .upsert_peer_metadata(&pending.pairing_topic, settle.controller.metadata.clone())
            .await
        {
            warn!(pairing_topic = %pending.pairing_topic, error = %e, "could not record responder metadata");
        }

        self.respond_ok(request).await?;
        info!(topic = %topic, "session settled by peer");
        self.report(EngineEvent::SessionApproved { session });
        Ok(())
    }

    async fn on_session_request(
        &self,
        request: &WcRequest,
        params: SessionRequestParams,
    ) -> Result<()> {
        let Some(session) = self.session_for(request).await? else {
            return Ok(());
        };
        if params.request.method.trim().is_empty() || !is_valid_chain_id(&params.chain_id) {
            return self
                .respond_error(
                    request,
                    PeerError::InvalidMethod(format!(
                        "{:?} on chain {:?}",
                        params.request.method, params.chain_id
                    )),
                )
                .await;
        }
        if !is_method_authorized(
            &params.chain_id,
            &params.request.method,
            &session.namespaces,
        ) {
            return self
                .respond_error(
                    request,
                    PeerError::UnauthorizedMethod(format!(
                        "{} on {}",
                        params.request.method, params.chain_id
                    )),
                )
                .await;
        }

        self.report(EngineEvent::SessionRequest {
            topic: request.topic.clone(),
            id: request.id,
            chain_id: params.chain_id,
            request: params.request,
        });
        Ok(())
    }

    async fn on_session_event(&self, request: &WcRequest, params: SessionEventParams) -> Result<()> {
        let Some(session) = self.session_for(request).await? else {
            return Ok(());
        };
        if !session.is_peer_controller() {
            return self
                .respond_error(
                    request,
                    PeerError::UnauthorizedEvent("only the controller may emit events".to_string()),
                )
                .await;
        }
        if !session.is_acknowledged {
            return self
                .respond_error(request, PeerError::no_matching_session(&request.topic))
                .await;
        }
        if params.event.name.trim().is_empty() || !is_valid_chain_id(&params.chain_id) {
            return self
                .respond_error(
                    request,
                    PeerError::InvalidEvent(format!(
                        "{:?} on chain {:?}",
                        params.event.name, params.chain_id
                    )),
                )
                .await;
        }
        if !is_event_authorized(&params.chain_id, &params.event.name, &session.namespaces) {
            return self
                .respond_error(
                    request,
                    PeerError::UnauthorizedEvent(format!(
                        "{} on {}",
                        params.event.name, params.chain_id
                    )),
                )
                .await;
        }

        self.respond_ok(request).await?;
        self.report(EngineEvent::SessionEvent {
            topic: request.topic.clone(),
            chain_id: params.chain_id,
            event: params.event,
        });
        Ok(())
    }

    async fn on_session_update(
        &self,
        request: &WcRequest,
        params: SessionUpdateParams,
    ) -> Result<()> {
        let Some(session) = self.session_for(request).await? else {
            return Ok(());
        };
        if !session.is_peer_controller() {
            return self
                .respond_error(
                    request,
                    PeerError::UnauthorizedUpdateRequest(
                        "only the controller may update namespaces".to_string(),
                    ),
                )
                .await;
        }
        if let Err(e) = validate_session_namespaces(&params.namespaces, &session.proposal_namespaces) {
            return self
                .respond_error(request, PeerError::InvalidUpdateRequest(e.to_string()))
                .await;
        }
        if !self
            .store
            .apply_namespace_update(&request.topic, params.namespaces.clone(), request.id)
            .await?
        {
            return self
                .respond_error(
                    request,
                    PeerError::InvalidUpdateRequest(format!(
                        "update {} is older than the last applied update",
                        request.id
                    )),
                )
                .await;
        }

        self.respond_ok(request).await?;
        info!(topic = %request.topic, "namespaces updated by peer");
        self.report(EngineEvent::SessionUpdateNamespaces {
            topic: request.topic.clone(),
            namespaces: params.namespaces,
        });
        Ok(())
    }

    async fn on_session_extend(
        &self,
        request: &WcRequest,
        params: SessionExtendParams,
    ) -> Result<()> {
        let Some(session) = self.session_for(request).await? else {
            return Ok(());
        };
        if !session.is_peer_controller() {
            return self
                .respond_error(
                    request,
                    PeerError::UnauthorizedExtendRequest(
                        "only the controller may extend the session".to_string(),
                    ),
                )
                .await;
        }
        let ceiling = now_seconds() + SESSION_EXTENSION_WINDOW.as_secs() as i64;
        if params.expiry < session.expiry.seconds() || params.expiry > ceiling {
            return self
                .respond_error(
                    request,
                    PeerError::InvalidExtendRequest(format!(
                        "expiry {} outside [{}, {}]",
                        params.expiry,
                        session.expiry.seconds(),
                        ceiling
                    )),
                )
                .await;
        }

        let expiry = Expiry(params.expiry);
        self.store.extend_session(&request.topic, expiry).await?;
        self.respond_ok(request).await?;
        info!(topic = %request.topic, expiry = expiry.seconds(), "session extended by peer");
        self.report(EngineEvent::SessionExtended {
            topic: request.topic.clone(),
            expiry,
        });
        Ok(())
    }

    async fn on_session_delete(&self, request: &WcRequest) -> Result<()> {
        if self.session_for(request).await?.is_none() {
            return Ok(());
        }
        self.respond_ok(request).await?;
        self.teardown_session(&request.topic).await?;
        info!(topic = %request.topic, "session deleted by peer");
        self.report(EngineEvent::SessionDeleted {
            topic: request.topic.clone(),
            origin: DeleteOrigin::Peer,
        });
        Ok(())
    }

    async fn on_session_ping(&self, request: &WcRequest) -> Result<()> {
        if self.session_for(request).await?.is_none() {
            return Ok(());
        }
        self.respond_ok(request).await
    }
}
