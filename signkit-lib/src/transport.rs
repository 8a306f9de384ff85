//! Relay transport boundary.
//!
//! The socket, its reconnect policy and the relay's own RPCs live outside this
//! crate. Hosts implement [`RelayTransport`] over whatever connection they own.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::rpc::IridiumParams;
use crate::{Result, Topic};

/// Relay-assigned identifier of a subscription.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub String);

impl SubscriptionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An encrypted envelope delivered on a subscribed topic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: Topic,
    pub message: String,
}

/// Socket state changes reported by the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    Opened,
    Closed,
    Failed { cause: String },
}

/// Bidirectional topic-addressed pub/sub channel.
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait RelayTransport: Send + Sync {
    /// Subscribe to `topic`, returning the relay's subscription id.
    async fn subscribe(&self, topic: &Topic) -> Result<SubscriptionId>;

    /// Cancel a subscription.
    async fn unsubscribe(&self, topic: &Topic, subscription_id: &SubscriptionId) -> Result<()>;

    /// Publish an envelope. `Ok` means the relay acknowledged it.
    async fn publish(&self, topic: &Topic, message: &str, params: &IridiumParams) -> Result<()>;

    /// Stream of envelopes received on subscribed topics, in delivery order.
    fn inbound_messages(&self) -> broadcast::Receiver<InboundMessage>;

    /// Stream of socket state changes.
    fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent>;
}
