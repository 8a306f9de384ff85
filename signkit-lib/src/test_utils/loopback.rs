//! In-process relay for end-to-end tests.
//!
//! A [`LoopbackRelay`] hub routes published envelopes to every other client
//! subscribed to the topic. Like a real relay it keeps a per-topic mailbox, so
//! a client that subscribes late still receives what was published before.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::rpc::IridiumParams;
use crate::transport::{ConnectionEvent, InboundMessage, RelayTransport, SubscriptionId};
use crate::{Result, SignError, Topic};

const CHANNEL_CAPACITY: usize = 1024;

struct Mail {
    sender: usize,
    message: String,
}

#[derive(Default)]
struct HubState {
    next_client: usize,
    next_subscription: usize,
    subscribers: HashMap<Topic, HashMap<usize, SubscriptionId>>,
    inboxes: HashMap<usize, broadcast::Sender<InboundMessage>>,
    mailboxes: HashMap<Topic, Vec<Mail>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared in-process relay.
#[derive(Default)]
pub struct LoopbackRelay {
    state: Mutex<HubState>,
}

impl LoopbackRelay {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a disconnected client of this relay.
    pub fn client(self: &Arc<Self>) -> Arc<LoopbackClient> {
        let (inbound, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (events, _) = broadcast::channel(CHANNEL_CAPACITY);
        let id = {
            let mut state = lock(&self.state);
            state.next_client += 1;
            let id = state.next_client;
            state.inboxes.insert(id, inbound.clone());
            id
        };
        Arc::new(LoopbackClient {
            id,
            hub: self.clone(),
            inbound,
            events,
            connected: AtomicBool::new(false),
            fail_publish: AtomicBool::new(false),
            subscribe_calls: AtomicUsize::new(0),
            unsubscribe_calls: AtomicUsize::new(0),
            published: Mutex::new(Vec::new()),
        })
    }

    /// Number of envelopes ever published on `topic`.
    pub fn mailbox_len(&self, topic: &Topic) -> usize {
        lock(&self.state)
            .mailboxes
            .get(topic)
            .map(|m| m.len())
            .unwrap_or(0)
    }
}

/// One relay connection.
pub struct LoopbackClient {
    id: usize,
    hub: Arc<LoopbackRelay>,
    inbound: broadcast::Sender<InboundMessage>,
    events: broadcast::Sender<ConnectionEvent>,
    connected: AtomicBool,
    fail_publish: AtomicBool,
    subscribe_calls: AtomicUsize,
    unsubscribe_calls: AtomicUsize,
    published: Mutex<Vec<(Topic, IridiumParams)>>,
}

impl LoopbackClient {
    /// Open the socket and report it.
    pub fn connect(&self) {
        self.connected.store(true, Ordering::SeqCst);
        let _ = self.events.send(ConnectionEvent::Opened);
    }

    /// Close the socket. The relay forgets this client's subscriptions.
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        {
            let mut state = lock(&self.hub.state);
            for subscribers in state.subscribers.values_mut() {
                subscribers.remove(&self.id);
            }
        }
        let _ = self.events.send(ConnectionEvent::Closed);
    }

    /// Report a connection failure without changing socket state.
    pub fn report_failure(&self, cause: &str) {
        let _ = self.events.send(ConnectionEvent::Failed {
            cause: cause.to_string(),
        });
    }

    /// Make every later publish fail.
    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    pub fn unsubscribe_calls(&self) -> usize {
        self.unsubscribe_calls.load(Ordering::SeqCst)
    }

    /// Topics and relay params of every acknowledged publish.
    pub fn published(&self) -> Vec<(Topic, IridiumParams)> {
        lock(&self.published).clone()
    }

    /// Whether the relay currently routes `topic` to this client.
    pub fn is_subscribed(&self, topic: &Topic) -> bool {
        lock(&self.hub.state)
            .subscribers
            .get(topic)
            .map(|s| s.contains_key(&self.id))
            .unwrap_or(false)
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SignError::Transport("loopback socket is closed".to_string()))
        }
    }
}

#[async_trait]
impl RelayTransport for LoopbackClient {
    async fn subscribe(&self, topic: &Topic) -> Result<SubscriptionId> {
        self.ensure_connected()?;
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);

        let mut state = lock(&self.hub.state);
        if let Some(existing) = state
            .subscribers
            .get(topic)
            .and_then(|s| s.get(&self.id))
            .cloned()
        {
            return Ok(existing);
        }

        state.next_subscription += 1;
        let subscription = SubscriptionId::new(format!("sub-{}", state.next_subscription));
        state
            .subscribers
            .entry(topic.clone())
            .or_default()
            .insert(self.id, subscription.clone());

        if let Some(mail) = state.mailboxes.get(topic) {
            for item in mail.iter().filter(|m| m.sender != self.id) {
                let _ = self.inbound.send(InboundMessage {
                    topic: topic.clone(),
                    message: item.message.clone(),
                });
            }
        }
        Ok(subscription)
    }

    async fn unsubscribe(&self, topic: &Topic, _subscription_id: &SubscriptionId) -> Result<()> {
        self.ensure_connected()?;
        self.unsubscribe_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = lock(&self.hub.state);
        if let Some(subscribers) = state.subscribers.get_mut(topic) {
            subscribers.remove(&self.id);
        }
        Ok(())
    }

    async fn publish(&self, topic: &Topic, message: &str, params: &IridiumParams) -> Result<()> {
        self.ensure_connected()?;
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(SignError::Transport("publish rejected".to_string()));
        }

        {
            let mut state = lock(&self.hub.state);
            state.mailboxes.entry(topic.clone()).or_default().push(Mail {
                sender: self.id,
                message: message.to_string(),
            });
            let recipients: Vec<usize> = state
                .subscribers
                .get(topic)
                .map(|s| s.keys().copied().filter(|id| *id != self.id).collect())
                .unwrap_or_default();
            for recipient in recipients {
                if let Some(inbox) = state.inboxes.get(&recipient) {
                    let _ = inbox.send(InboundMessage {
                        topic: topic.clone(),
                        message: message.to_string(),
                    });
                }
            }
        }
        lock(&self.published).push((topic.clone(), *params));
        Ok(())
    }

    fn inbound_messages(&self) -> broadcast::Receiver<InboundMessage> {
        self.inbound.subscribe()
    }

    fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }
}
