use signkit_lib::rpc::{
    ApprovalParams, ClientParams, JsonRpcResponse, PairingParams, SessionParams,
    SessionProposeParams, WcResponse,
};
use signkit_lib::sequence::ACTIVE_PAIRING_TTL;
use signkit_lib::{Expiry, Result, Topic};
use tracing::{debug, info, warn};

use super::SignEngine;
use crate::events::{EngineEvent, SettleResponse, UpdateNamespacesResponse};

/// Answers that only confirm receipt.
fn acknowledged(response: &WcResponse) {
    match &response.response {
        JsonRpcResponse::Result(_) => {
            debug!(id = response.response.id(), topic = %response.topic, method = response.method(), "peer acknowledged");
        }
        JsonRpcResponse::Error(e) => {
            warn!(id = response.response.id(), topic = %response.topic, method = response.method(), code = e.error.code, "peer refused");
        }
    }
}

impl SignEngine {
    pub(super) async fn on_response(&self, response: WcResponse) {
        debug!(id = response.response.id(), topic = %response.topic, method = response.method(), "handling peer response");
        let result = match &response.params {
            ClientParams::Pairing(PairingParams::SessionPropose(proposal)) => {
                self.on_propose_response(&response.topic, proposal, &response.response)
                    .await
            }
            ClientParams::Session(SessionParams::Settle(_)) => {
                self.on_settle_response(&response.topic, &response.response)
                    .await
            }
            ClientParams::Session(SessionParams::Update(_)) => {
                self.on_update_response(&response.topic, &response.response)
                    .await
            }
            ClientParams::Session(SessionParams::Request(request)) => {
                self.report(EngineEvent::SessionPayloadResponse {
                    topic: response.topic.clone(),
                    chain_id: request.chain_id.clone(),
                    response: response.response.clone(),
                });
                Ok(())
            }
            ClientParams::Session(
                SessionParams::Event(_)
                | SessionParams::Extend(_)
                | SessionParams::Delete(_)
                | SessionParams::Ping(_),
            )
            | ClientParams::Pairing(PairingParams::Delete(_) | PairingParams::Ping(_)) => {
                acknowledged(&response);
                Ok(())
            }
        };
        if let Err(e) = result {
            warn!(topic = %response.topic, method = response.method(), error = %e, "peer response failed");
            self.on_internal_error(e);
        }
    }

    async fn on_propose_response(
        &self,
        pairing_topic: &Topic,
        proposal: &SessionProposeParams,
        response: &JsonRpcResponse,
    ) -> Result<()> {
        let proposer_public_key = proposal.proposer.public_key;
        match response {
            JsonRpcResponse::Result(result) => {
                let approval: ApprovalParams = serde_json::from_value(result.result.clone())?;
                if let Some(pairing) = self.store.get_pairing_by_topic(pairing_topic).await? {
                    if !pairing.is_active {
                        self.store
                            .activate_pairing(pairing_topic, Expiry::from_now(ACTIVE_PAIRING_TTL))
                            .await?;
                    }
                }
                let session_topic = self
                    .keys()
                    .generate_topic_from_key_agreement(
                        &proposer_public_key,
                        &approval.responder_public_key,
                    )
                    .await?;
                self.relayer.subscribe(&session_topic).await?;
                info!(pairing_topic = %pairing_topic, session_topic = %session_topic, "proposal approved, awaiting settle");
                Ok(())
            }
            JsonRpcResponse::Error(rejection) => {
                self.proposals.take(&proposer_public_key);
                self.keys().remove_key_pair(&proposer_public_key).await?;
                info!(pairing_topic = %pairing_topic, code = rejection.error.code, "proposal rejected by peer");
                self.report(EngineEvent::SessionRejected {
                    pairing_topic: pairing_topic.clone(),
                    proposer_public_key,
                    error: rejection.error.clone(),
                });
                Ok(())
            }
        }
    }

    async fn on_settle_response(&self, topic: &Topic, response: &JsonRpcResponse) -> Result<()> {
        match response {
            JsonRpcResponse::Result(_) => {
                self.store.acknowledge_session(topic).await?;
                let session = self.valid_session(topic).await?;
                info!(topic = %topic, "session acknowledged");
                self.report(EngineEvent::SessionSettleResponse(SettleResponse::Result {
                    session,
                }));
            }
            JsonRpcResponse::Error(refusal) => {
                self.teardown_session(topic).await?;
                info!(topic = %topic, code = refusal.error.code, "settle refused by peer");
                self.report(EngineEvent::SessionSettleResponse(SettleResponse::Error {
                    topic: topic.clone(),
                    error: refusal.error.clone(),
                }));
            }
        }
        Ok(())
    }

    async fn on_update_response(&self, topic: &Topic, response: &JsonRpcResponse) -> Result<()> {
        let id = response.id();
        let Some(namespaces) = self.store.take_staged_namespace_update(topic, id).await? else {
            debug!(id, topic = %topic, "no staged update for response");
            return Ok(());
        };
        match response {
            JsonRpcResponse::Result(_) => {
                if self
                    .store
                    .apply_namespace_update(topic, namespaces.clone(), id)
                    .await?
                {
                    self.report(EngineEvent::SessionUpdateNamespacesResponse(
                        UpdateNamespacesResponse::Result {
                            topic: topic.clone(),
                            namespaces,
                        },
                    ));
                } else {
                    debug!(id, topic = %topic, "acknowledged update superseded by a newer one");
                }
            }
            JsonRpcResponse::Error(refusal) => {
                self.report(EngineEvent::SessionUpdateNamespacesResponse(
                    UpdateNamespacesResponse::Error {
                        topic: topic.clone(),
                        error: refusal.error.clone(),
                    },
                ));
            }
        }
        Ok(())
    }
}
