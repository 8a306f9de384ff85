//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use signkit_lib::{AppMetadata, DEFAULT_RELAY_PROTOCOL};

fn default_relay_protocol() -> String {
    DEFAULT_RELAY_PROTOCOL.to_string()
}

fn default_request_timeout_ms() -> u64 {
    300_000
}

fn default_ping_timeout_ms() -> u64 {
    30_000
}

fn default_pending_proposal_capacity() -> usize {
    64
}

fn default_event_channel_capacity() -> usize {
    256
}

/// Configuration for a [`SignEngine`](crate::SignEngine).
///
/// Every field has a default, so a partial JSON document is a valid config.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Metadata this side shares with peers.
    #[serde(default)]
    pub metadata: AppMetadata,
    /// Relay protocol advertised in pairing URIs and proposals.
    #[serde(default = "default_relay_protocol")]
    pub relay_protocol: String,
    /// How long `session_request` waits for the peer's answer.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// How long `ping` waits for the peer's answer.
    #[serde(default = "default_ping_timeout_ms")]
    pub ping_timeout_ms: u64,
    /// Maximum number of proposals awaiting approval or settlement.
    #[serde(default = "default_pending_proposal_capacity")]
    pub pending_proposal_capacity: usize,
    /// Buffer size of the application event stream.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            metadata: AppMetadata::default(),
            relay_protocol: default_relay_protocol(),
            request_timeout_ms: default_request_timeout_ms(),
            ping_timeout_ms: default_ping_timeout_ms(),
            pending_proposal_capacity: default_pending_proposal_capacity(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

impl EngineConfig {
    pub fn new(metadata: AppMetadata) -> Self {
        Self {
            metadata,
            ..Default::default()
        }
    }

    pub fn with_relay_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.relay_protocol = protocol.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_pending_proposal_capacity(mut self, capacity: usize) -> Self {
        self.pending_proposal_capacity = capacity.max(1);
        self
    }

    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }
}
