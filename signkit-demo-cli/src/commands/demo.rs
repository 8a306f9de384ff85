//! Demo command - a dApp and a wallet share one loopback relay
//!
//! The dApp proposes a pairing and a session, the wallet approves, and the
//! two sides then exchange a signing request, an event, an extension and
//! finally a disconnect.

use anyhow::{anyhow, Context, Result};
use serde_json::json;
use signkit_engine::{EngineConfig, EngineEvent, SettleResponse, SignEngine};
use signkit_lib::rpc::{
    JsonRpcResponse, SessionEventParams, SessionEventPayload, SessionRequestParams,
    SessionRequestPayload,
};
use signkit_lib::sequence::InMemorySequenceStore;
use signkit_lib::storage::{InMemoryJournal, InMemoryKeyStore};
use signkit_lib::test_utils::{eip155_granted, eip155_required, LoopbackRelay, TEST_ACCOUNT};
use signkit_lib::AppMetadata;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::ui::{self, Side};

const EVENT_WAIT: Duration = Duration::from_secs(10);

/// One side of the demo.
struct Peer {
    label: &'static str,
    engine: Arc<SignEngine>,
    events: broadcast::Receiver<EngineEvent>,
}

impl Peer {
    async fn start(
        relay: &Arc<LoopbackRelay>,
        label: &'static str,
        config: EngineConfig,
    ) -> Result<Self> {
        let client = relay.client();
        let engine = SignEngine::new(
            config,
            client.clone(),
            Arc::new(InMemoryKeyStore::new()),
            Arc::new(InMemoryJournal::new()),
            Arc::new(InMemorySequenceStore::new()),
        );
        let events = engine.subscribe_events();
        engine.start();
        client.connect();

        let mut peer = Self {
            label,
            engine,
            events,
        };
        peer.wait_for("connection", |event| match event {
            EngineEvent::ConnectionStateChanged { available: true } => Some(()),
            _ => None,
        })
        .await?;
        Ok(peer)
    }

    /// Wait for the first event `pick` accepts.
    async fn wait_for<T>(
        &mut self,
        what: &str,
        mut pick: impl FnMut(EngineEvent) -> Option<T>,
    ) -> Result<T> {
        let events = &mut self.events;
        let waited = tokio::time::timeout(EVENT_WAIT, async {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if let Some(found) = pick(event) {
                            return Ok(found);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "event stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(anyhow!("event stream closed"));
                    }
                }
            }
        })
        .await;
        waited.map_err(|_| anyhow!("{} timed out waiting for {}", self.label, what))?
    }
}

fn dapp_config() -> EngineConfig {
    EngineConfig::new(
        AppMetadata::new("Signkit Demo dApp", "https://dapp.signkit.example")
            .with_description("Asks the wallet for signatures"),
    )
}

fn wallet_config() -> EngineConfig {
    EngineConfig::new(
        AppMetadata::new("Signkit Demo Wallet", "https://wallet.signkit.example")
            .with_description("Holds the account keys"),
    )
}

pub async fn run(
    config: Option<&str>,
    timeout_ms: Option<u64>,
    reject: bool,
    verbose: bool,
) -> Result<()> {
    let mut dapp_config = match config {
        Some(path) => super::load_config(Path::new(path))?,
        None => dapp_config(),
    };
    if let Some(ms) = timeout_ms {
        dapp_config.request_timeout_ms = ms;
    }

    let relay = LoopbackRelay::new();
    let mut dapp = Peer::start(&relay, "dApp", dapp_config).await?;
    let mut wallet = Peer::start(&relay, "wallet", wallet_config()).await?;
    ui::said(Side::Relay, "dapp and wallet connected");
    let show = |id: &str| if verbose { id.to_string() } else { ui::short(id) };

    ui::step(1, "Pairing");
    let pairing = dapp
        .engine
        .propose_pairing()
        .await
        .context("Failed to propose pairing")?;
    ui::said(Side::Dapp, "offers a pairing URI");
    ui::field("uri", &pairing.uri);
    if verbose {
        ui::field("expires", pairing.expiry.seconds());
    }
    wallet
        .engine
        .pair(&pairing.uri)
        .await
        .context("Wallet failed to pair")?;
    ui::ok(Side::Wallet, format!("joined {}", show(pairing.topic.as_str())));

    dapp.engine
        .ping(&pairing.topic)
        .await
        .context("Pairing ping failed")?;
    ui::ok(Side::Dapp, "pairing ping answered");

    ui::step(2, "Proposal");
    let proposed = dapp
        .engine
        .propose_session(Some(&pairing.topic), eip155_required())
        .await
        .context("Failed to propose session")?;
    ui::said(
        Side::Dapp,
        format!("proposes session as {}", show(&proposed.proposer_public_key.to_string())),
    );
    ui::field("request id", proposed.request_id);

    let proposal = wallet
        .wait_for("a proposal", |event| match event {
            EngineEvent::SessionProposal(proposal) => Some(proposal),
            _ => None,
        })
        .await?;
    ui::said(
        Side::Wallet,
        format!("received a proposal from {}", proposal.proposal.proposer.metadata.name),
    );

    if reject {
        wallet
            .engine
            .reject(proposal.proposer_public_key(), "User rejected", 5000)
            .await
            .context("Failed to reject proposal")?;
        ui::said(Side::Wallet, "rejects the proposal");
        let error = dapp
            .wait_for("the rejection", |event| match event {
                EngineEvent::SessionRejected { error, .. } => Some(error),
                _ => None,
            })
            .await?;
        ui::refused(Side::Dapp, error.code, &error.message);
        return Ok(());
    }

    ui::step(3, "Settlement");
    wallet
        .engine
        .approve(proposal.proposer_public_key(), eip155_granted())
        .await
        .context("Failed to approve proposal")?;
    ui::said(Side::Wallet, "approves and settles");
    let session = dapp
        .wait_for("settlement", |event| match event {
            EngineEvent::SessionApproved { session } => Some(session),
            _ => None,
        })
        .await?;
    let acknowledged = wallet
        .wait_for("the settle answer", |event| match event {
            EngineEvent::SessionSettleResponse(response) => Some(response),
            _ => None,
        })
        .await?;
    if let SettleResponse::Error { error, .. } = acknowledged {
        ui::refused(Side::Dapp, error.code, &error.message);
        return Err(anyhow!("session settlement failed"));
    }
    let topic = session.topic.clone();
    ui::ok(Side::Dapp, format!("session {} settled", show(topic.as_str())));
    ui::field("expires", session.expiry.seconds());

    ui::step(4, "Signing request");
    let engine = dapp.engine.clone();
    let request_topic = topic.clone();
    let request = tokio::spawn(async move {
        engine
            .session_request(
                &request_topic,
                SessionRequestParams {
                    request: SessionRequestPayload {
                        method: "personal_sign".to_string(),
                        params: json!(["0x48656c6c6f", TEST_ACCOUNT]),
                    },
                    chain_id: "eip155:1".to_string(),
                },
            )
            .await
    });

    let (id, payload) = wallet
        .wait_for("the session request", |event| match event {
            EngineEvent::SessionRequest { id, request, .. } => Some((id, request)),
            _ => None,
        })
        .await?;
    ui::said(Side::Wallet, format!("signs {} #{}", payload.method, id));
    wallet
        .engine
        .respond_session_request(&topic, JsonRpcResponse::result(id, json!("0xdeadbeef")))
        .await
        .context("Failed to answer session request")?;

    let response = request
        .await
        .context("Session request task failed")?
        .context("Session request failed")?;
    ui::ok(Side::Dapp, "received the signature");
    ui::json(&serde_json::to_value(&response)?);

    ui::step(5, "Event");
    wallet
        .engine
        .emit(
            &topic,
            SessionEventParams {
                event: SessionEventPayload {
                    name: "accountsChanged".to_string(),
                    data: json!([TEST_ACCOUNT]),
                },
                chain_id: "eip155:1".to_string(),
            },
        )
        .await
        .context("Failed to emit event")?;
    let event = dapp
        .wait_for("the session event", |event| match event {
            EngineEvent::SessionEvent { event, .. } => Some(event),
            _ => None,
        })
        .await?;
    ui::ok(Side::Dapp, format!("saw {}", event.name));

    ui::step(6, "Extension");
    let expiry = wallet
        .engine
        .extend(&topic)
        .await
        .context("Failed to extend session")?;
    let seen = dapp
        .wait_for("the extension", |event| match event {
            EngineEvent::SessionExtended { expiry, .. } => Some(expiry),
            _ => None,
        })
        .await?;
    ui::ok(Side::Wallet, "extended the session");
    ui::field("expires", expiry.seconds());
    if seen != expiry {
        ui::said(Side::Dapp, format!("disagrees, has {}", seen.seconds()));
    }

    let sessions = dapp.engine.settled_sessions().await?;
    ui::field("dapp sessions", sessions.len());

    ui::step(7, "Disconnect");
    dapp.engine
        .disconnect(&topic)
        .await
        .context("Failed to disconnect")?;
    ui::said(Side::Dapp, "disconnects");
    wallet
        .wait_for("the delete", |event| match event {
            EngineEvent::SessionDeleted { .. } => Some(()),
            _ => None,
        })
        .await?;
    ui::ok(Side::Wallet, "dropped the session");
    Ok(())
}
