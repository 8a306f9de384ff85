//! Error types for pairing and session operations.
//!
//! [`SignError`] is the single error type returned by every crate in the
//! workspace. Errors reported *by the peer* over the wire are a separate,
//! closed set: see [`crate::rpc::PeerError`].

use thiserror::Error;

/// Numeric error codes for host-application integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum SignErrorCode {
    /// Namespace shape or grant rejected
    InvalidNamespace = 1000,
    /// Pairing URI could not be parsed
    MalformedUri = 1001,
    /// Request payload rejected
    InvalidRequest = 1002,
    /// Event payload rejected
    InvalidEvent = 1003,
    /// Extension expiry rejected
    InvalidExtendRequest = 1004,
    /// Non-controller attempted a controller-only action, or chain/method not granted
    Unauthorized = 2000,
    /// Session has not completed settlement
    NotSettled = 2001,
    /// Unknown or expired topic
    SequenceNotFound = 3000,
    /// No pending proposal for the given key
    ProposalNotFound = 3001,
    /// Pairing topic already known
    PairAlreadyExists = 3002,
    /// Relay is not reachable
    NotConnected = 4000,
    /// Transport-level failure
    Transport = 4001,
    /// Bounded wait elapsed
    Timeout = 4002,
    /// Envelope failed authenticated decryption
    Decryption = 5000,
    /// Required key material missing
    KeyNotFound = 5001,
    /// Persistence failure
    Storage = 6000,
    /// Encoding or decoding failure
    Serialization = 6001,
    /// The peer answered with an error
    Peer = 7000,
    /// Internal/unexpected error
    Internal = 9999,
}

/// Error type for pairing and session operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignError {
    #[error("invalid namespace: {0}")]
    InvalidNamespace(String),

    #[error("malformed pairing uri: {0}")]
    MalformedUri(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("invalid extend request: {0}")]
    InvalidExtendRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("session {0} is not settled yet")]
    NotSettled(String),

    #[error("no valid sequence for topic {0}")]
    SequenceNotFound(String),

    #[error("no pending proposal for key {0}")]
    ProposalNotFound(String),

    #[error("pairing already exists for topic {0}")]
    PairAlreadyExists(String),

    #[error("relay connection is not available")]
    NotConnected,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        /// Operation that timed out
        operation: String,
        /// Timeout duration in milliseconds
        timeout_ms: u64,
    },

    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("peer error {code}: {message}")]
    Peer {
        /// Numeric code sent by the peer
        code: i32,
        /// Message sent by the peer
        message: String,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl SignError {
    /// Get the numeric code for this error.
    pub fn code(&self) -> SignErrorCode {
        match self {
            Self::InvalidNamespace(_) => SignErrorCode::InvalidNamespace,
            Self::MalformedUri(_) => SignErrorCode::MalformedUri,
            Self::InvalidRequest(_) => SignErrorCode::InvalidRequest,
            Self::InvalidEvent(_) => SignErrorCode::InvalidEvent,
            Self::InvalidExtendRequest(_) => SignErrorCode::InvalidExtendRequest,
            Self::Unauthorized(_) => SignErrorCode::Unauthorized,
            Self::NotSettled(_) => SignErrorCode::NotSettled,
            Self::SequenceNotFound(_) => SignErrorCode::SequenceNotFound,
            Self::ProposalNotFound(_) => SignErrorCode::ProposalNotFound,
            Self::PairAlreadyExists(_) => SignErrorCode::PairAlreadyExists,
            Self::NotConnected => SignErrorCode::NotConnected,
            Self::Transport(_) => SignErrorCode::Transport,
            Self::Timeout { .. } => SignErrorCode::Timeout,
            Self::Decryption(_) => SignErrorCode::Decryption,
            Self::KeyNotFound(_) => SignErrorCode::KeyNotFound,
            Self::Storage(_) => SignErrorCode::Storage,
            Self::Serialization(_) => SignErrorCode::Serialization,
            Self::Peer { .. } => SignErrorCode::Peer,
            Self::Internal(_) => SignErrorCode::Internal,
        }
    }

    /// Returns true if re-issuing the same operation later may succeed.
    ///
    /// Timeouts are retryable from the caller's point of view only; the
    /// engine itself never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NotConnected | Self::Transport(_) | Self::Timeout { .. } | Self::Storage(_)
        )
    }

    /// Create a transport error from any error type.
    pub fn transport<E: std::error::Error>(err: E) -> Self {
        Self::Transport(err.to_string())
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, timeout: std::time::Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Create a sequence-not-found error for a topic.
    pub fn sequence_not_found(topic: impl std::fmt::Display) -> Self {
        Self::SequenceNotFound(topic.to_string())
    }
}

impl From<serde_json::Error> for SignError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
