use signkit_lib::rpc::{
    generate_id, ClientParams, DeleteParams, JsonRpcResponse, PairingParams, PingParams,
    SessionParams,
};
use signkit_lib::sequence::Pairing;
use signkit_lib::uri::{format_pairing_uri, parse_pairing_uri, PairingUri};
use signkit_lib::{Result, SignError, Topic};
use tracing::{info, warn};

use super::{await_response, SignEngine};
use crate::events::EngineEvent;
use crate::saga::{Saga, Undo};

pub(super) const USER_DISCONNECTED_CODE: i32 = 6000;
pub(super) const USER_DISCONNECTED_MESSAGE: &str = "User disconnected";

pub(super) fn user_disconnected() -> DeleteParams {
    DeleteParams {
        code: USER_DISCONNECTED_CODE,
        message: USER_DISCONNECTED_MESSAGE.to_string(),
    }
}

impl SignEngine {
    /// Create an inactive pairing. Its `uri` is what the other party scans.
    pub async fn propose_pairing(&self) -> Result<Pairing> {
        let mut saga = Saga::new("propose_pairing");
        match self.create_pairing(&mut saga).await {
            Ok(pairing) => {
                saga.commit();
                Ok(pairing)
            }
            Err(e) => {
                saga.compensate(self).await;
                Err(e)
            }
        }
    }

    pub(super) async fn create_pairing(&self, saga: &mut Saga) -> Result<Pairing> {
        let topic = Topic::generate();
        let sym_key = self.keys().generate_symmetric_key(&topic).await?;
        saga.record(Undo::RemoveKeys(topic.clone()));

        let relay = self.relay_options();
        let uri = format_pairing_uri(&PairingUri {
            topic: topic.clone(),
            relay: relay.clone(),
            sym_key,
        });

        self.relayer.subscribe(&topic).await?;
        saga.record(Undo::Unsubscribe(topic.clone()));

        let pairing = Pairing::inactive(topic.clone(), relay, uri);
        self.store.insert_pairing(pairing.clone()).await?;
        saga.record(Undo::DeletePairing(topic.clone()));

        info!(topic = %topic, "pairing proposed");
        Ok(pairing)
    }

    /// Join a pairing from its URI.
    pub async fn pair(&self, uri: &str) -> Result<Pairing> {
        let parsed = parse_pairing_uri(uri)?;
        if self.store.get_pairing_by_topic(&parsed.topic).await?.is_some() {
            return Err(SignError::PairAlreadyExists(parsed.topic.to_string()));
        }

        let mut saga = Saga::new("pair");
        match self.join_pairing(parsed, uri, &mut saga).await {
            Ok(pairing) => {
                saga.commit();
                Ok(pairing)
            }
            Err(e) => {
                saga.compensate(self).await;
                Err(e)
            }
        }
    }

    async fn join_pairing(&self, parsed: PairingUri, uri: &str, saga: &mut Saga) -> Result<Pairing> {
        let topic = parsed.topic.clone();
        self.keys().set_symmetric_key(&topic, &parsed.sym_key).await?;
        saga.record(Undo::RemoveKeys(topic.clone()));

        self.relayer.subscribe(&topic).await?;
        saga.record(Undo::Unsubscribe(topic.clone()));

        let pairing = Pairing::active(topic.clone(), parsed.relay, uri.trim().to_string());
        self.store.insert_pairing(pairing.clone()).await?;

        info!(topic = %topic, "paired");
        Ok(pairing)
    }

    /// Delete a pairing locally, then tell the peer.
    pub async fn delete_pairing(&self, topic: &Topic) -> Result<()> {
        self.valid_pairing(topic).await?;

        let params: ClientParams = PairingParams::Delete(user_disconnected()).into();
        let prepared = self.relayer.prepare_request(topic, generate_id(), &params).await;

        self.teardown_pairing(topic).await?;
        self.report(EngineEvent::PairingDeleted {
            topic: topic.clone(),
        });
        info!(topic = %topic, "pairing deleted");

        match prepared {
            Ok(prepared) => {
                if let Err(e) = self.relayer.publish_prepared(&prepared).await {
                    warn!(topic = %topic, error = %e, "pairing delete notification not delivered");
                }
            }
            Err(e) => warn!(topic = %topic, error = %e, "could not seal pairing delete notification"),
        }
        Ok(())
    }

    /// Ping the peer on a session or pairing topic and wait for its answer.
    pub async fn ping(&self, topic: &Topic) -> Result<()> {
        let params: ClientParams = if self.store.is_session_valid(topic).await? {
            SessionParams::Ping(PingParams::default()).into()
        } else if self.store.is_pairing_valid(topic).await? {
            PairingParams::Ping(PingParams::default()).into()
        } else {
            return Err(SignError::sequence_not_found(topic));
        };

        let id = generate_id();
        let inbound = self.relayer.inbound();
        self.relayer.publish_request(topic, id, &params).await?;

        let answer = await_response(inbound, id, self.config.ping_timeout(), params.method()).await?;
        match answer.response {
            JsonRpcResponse::Result(_) => Ok(()),
            JsonRpcResponse::Error(e) => Err(SignError::Peer {
                code: e.error.code,
                message: e.error.message,
            }),
        }
    }
}
