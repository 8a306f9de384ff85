use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use signkit_engine::{Inbound, RelayerInteractor};
use signkit_lib::crypto::KeyManagement;
use signkit_lib::rpc::{
    generate_id, methods, ClientParams, PingParams, SessionParams, SessionRequestParams,
    SessionRequestPayload, WcRequest, WcResponse,
};
use signkit_lib::storage::{InMemoryJournal, InMemoryKeyStore};
use signkit_lib::test_utils::{LoopbackClient, LoopbackRelay};
use signkit_lib::{SymmetricKey, Topic};
use tokio::sync::broadcast;

async fn connected(relay: &Arc<LoopbackRelay>) -> (RelayerInteractor, Arc<LoopbackClient>) {
    let client = relay.client();
    let relayer = RelayerInteractor::new(
        client.clone(),
        KeyManagement::new(Arc::new(InMemoryKeyStore::new())),
        Arc::new(InMemoryJournal::new()),
        16,
    );
    relayer.start();
    client.connect();
    let mut connectivity = relayer.connectivity();
    tokio::time::timeout(Duration::from_secs(2), connectivity.wait_for(|c| c.is_available()))
        .await
        .expect("relayer never connected")
        .expect("connectivity channel closed");
    (relayer, client)
}

async fn next_request(inbound: &mut broadcast::Receiver<Inbound>) -> WcRequest {
    match tokio::time::timeout(Duration::from_secs(2), inbound.recv()).await {
        Ok(Ok(Inbound::Request(request))) => request,
        other => panic!("expected a request, got {:?}", other),
    }
}

async fn next_response(inbound: &mut broadcast::Receiver<Inbound>) -> WcResponse {
    match tokio::time::timeout(Duration::from_secs(2), inbound.recv()).await {
        Ok(Ok(Inbound::Response(response))) => response,
        other => panic!("expected a response, got {:?}", other),
    }
}

async fn share_key(alice: &RelayerInteractor, bob: &RelayerInteractor, topic: &Topic) {
    let key = SymmetricKey::generate();
    alice.keys().set_symmetric_key(topic, &key).await.unwrap();
    bob.keys().set_symmetric_key(topic, &key).await.unwrap();
}

fn ping() -> ClientParams {
    SessionParams::Ping(PingParams::default()).into()
}

fn sign_request() -> ClientParams {
    SessionParams::Request(SessionRequestParams {
        request: SessionRequestPayload {
            method: "personal_sign".to_string(),
            params: json!(["0x01"]),
        },
        chain_id: "eip155:1".to_string(),
    })
    .into()
}

#[tokio::test]
async fn test_redelivered_request_is_dropped() {
    let relay = LoopbackRelay::new();
    let (alice, _alice_client) = connected(&relay).await;
    let (bob, bob_client) = connected(&relay).await;

    let topic = Topic::generate();
    share_key(&alice, &bob, &topic).await;

    let mut inbound = bob.inbound();
    let id = generate_id();
    alice.publish_request(&topic, id, &sign_request()).await.unwrap();
    bob.subscribe(&topic).await.unwrap();

    let first = next_request(&mut inbound).await;
    assert_eq!(first.id, id);

    // A fresh subscription replays the relay mailbox.
    bob_client.disconnect();
    bob_client.connect();
    let mut connectivity = bob.connectivity();
    tokio::time::timeout(Duration::from_secs(2), connectivity.wait_for(|c| c.is_available()))
        .await
        .unwrap()
        .unwrap();
    bob.subscribe(&topic).await.unwrap();

    let replay = tokio::time::timeout(Duration::from_millis(300), inbound.recv()).await;
    assert!(replay.is_err(), "duplicate request was emitted again");

    let pending = bob.pending_requests(&topic).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, id);
    assert!(alice.pending_requests(&topic).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_uncorrelated_response_is_dropped() {
    let relay = LoopbackRelay::new();
    let (alice, _alice_client) = connected(&relay).await;
    let (bob, _bob_client) = connected(&relay).await;

    let topic = Topic::generate();
    share_key(&alice, &bob, &topic).await;
    alice.subscribe(&topic).await.unwrap();

    let mut inbound = alice.inbound();
    let mut errors = alice.internal_errors();
    bob.respond_with_result(&topic, generate_id(), &sign_request(), json!(true))
        .await
        .unwrap();

    let outcome = tokio::time::timeout(Duration::from_millis(300), inbound.recv()).await;
    assert!(outcome.is_err());
    assert!(errors.try_recv().is_err());
}

#[tokio::test]
async fn test_response_on_another_topic_is_not_correlated() {
    let relay = LoopbackRelay::new();
    let (alice, _alice_client) = connected(&relay).await;
    let (bob, _bob_client) = connected(&relay).await;

    let asked = Topic::generate();
    let other = Topic::generate();
    share_key(&alice, &bob, &asked).await;
    share_key(&alice, &bob, &other).await;
    alice.subscribe(&asked).await.unwrap();
    alice.subscribe(&other).await.unwrap();

    let mut inbound = alice.inbound();
    let id = generate_id();
    alice.publish_request(&asked, id, &ping()).await.unwrap();

    bob.respond_with_result(&other, id, &ping(), json!(true))
        .await
        .unwrap();
    let stray = tokio::time::timeout(Duration::from_millis(300), inbound.recv()).await;
    assert!(stray.is_err(), "response on the wrong topic was correlated");

    bob.respond_with_result(&asked, id, &ping(), json!(true))
        .await
        .unwrap();
    let response = next_response(&mut inbound).await;
    assert_eq!(response.topic, asked);
    assert_eq!(response.response.id(), id);
    assert_eq!(response.params.method(), methods::SESSION_PING);
}

#[tokio::test]
async fn test_response_and_follow_up_request_keep_delivery_order() {
    let relay = LoopbackRelay::new();
    let (alice, _alice_client) = connected(&relay).await;
    let (bob, _bob_client) = connected(&relay).await;

    let topic = Topic::generate();
    share_key(&alice, &bob, &topic).await;
    alice.subscribe(&topic).await.unwrap();
    bob.subscribe(&topic).await.unwrap();

    let mut alice_inbound = alice.inbound();
    let mut bob_inbound = bob.inbound();
    let asked = generate_id();
    alice.publish_request(&topic, asked, &ping()).await.unwrap();

    let request = next_request(&mut bob_inbound).await;
    bob.respond_with_result(&topic, request.id, &request.params, json!(true))
        .await
        .unwrap();
    let follow_up = generate_id();
    bob.publish_request(&topic, follow_up, &sign_request())
        .await
        .unwrap();

    assert_eq!(next_response(&mut alice_inbound).await.response.id(), asked);
    assert_eq!(next_request(&mut alice_inbound).await.id, follow_up);
}
