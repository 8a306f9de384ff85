use super::JsonRpcError;

/// Errors sent to the peer in JSON-RPC error responses.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PeerError {
    #[error("Invalid session request: {0}")]
    InvalidMethod(String),
    #[error("Invalid event request: {0}")]
    InvalidEvent(String),
    #[error("Invalid update namespace request: {0}")]
    InvalidUpdateRequest(String),
    #[error("Invalid session extend request: {0}")]
    InvalidExtendRequest(String),
    #[error("Invalid session settle request: {0}")]
    InvalidSessionSettleRequest(String),

    #[error("Unauthorized target chain id or method: {0}")]
    UnauthorizedMethod(String),
    #[error("Unauthorized target chain id or event: {0}")]
    UnauthorizedEvent(String),
    #[error("Unauthorized update namespace request: {0}")]
    UnauthorizedUpdateRequest(String),
    #[error("Unauthorized session extend request: {0}")]
    UnauthorizedExtendRequest(String),

    #[error("User rejected: {0}")]
    UserRejected(String),
    #[error("Unsupported chains: {0}")]
    UnsupportedChains(String),
    #[error("Unsupported methods: {0}")]
    UnsupportedMethods(String),
    #[error("Unsupported events: {0}")]
    UnsupportedEvents(String),
    #[error("Unsupported accounts: {0}")]
    UnsupportedAccounts(String),
    #[error("Unsupported namespace key: {0}")]
    UnsupportedNamespaceKey(String),

    #[error("User disconnected: {0}")]
    UserDisconnected(String),
    #[error("Session settlement failed: {0}")]
    SessionSettlementFailed(String),
    #[error("No matching {sequence} with topic: {topic}")]
    NoMatchingTopic { sequence: String, topic: String },

    /// Application-chosen code and message, used by `reject`.
    #[error("{message}")]
    Custom { code: i32, message: String },
}

impl PeerError {
    /// Numeric code carried on the wire.
    pub fn code(&self) -> i32 {
        match self {
            Self::InvalidMethod(_) => 1001,
            Self::InvalidEvent(_) => 1002,
            Self::InvalidUpdateRequest(_) => 1003,
            Self::InvalidExtendRequest(_) => 1004,
            Self::InvalidSessionSettleRequest(_) => 1005,
            Self::UnauthorizedMethod(_) => 3001,
            Self::UnauthorizedEvent(_) => 3002,
            Self::UnauthorizedUpdateRequest(_) => 3003,
            Self::UnauthorizedExtendRequest(_) => 3004,
            Self::UserRejected(_) => 5000,
            Self::UnsupportedChains(_) => 5100,
            Self::UnsupportedMethods(_) => 5101,
            Self::UnsupportedEvents(_) => 5102,
            Self::UnsupportedAccounts(_) => 5103,
            Self::UnsupportedNamespaceKey(_) => 5104,
            Self::UserDisconnected(_) => 6000,
            Self::SessionSettlementFailed(_) => 7000,
            Self::NoMatchingTopic { .. } => 7001,
            Self::Custom { code, .. } => *code,
        }
    }

    pub fn no_matching_session(topic: impl std::fmt::Display) -> Self {
        Self::NoMatchingTopic {
            sequence: "session".to_string(),
            topic: topic.to_string(),
        }
    }

    pub fn no_matching_pairing(topic: impl std::fmt::Display) -> Self {
        Self::NoMatchingTopic {
            sequence: "pairing".to_string(),
            topic: topic.to_string(),
        }
    }

    pub fn to_json_rpc_error(&self) -> JsonRpcError {
        JsonRpcError {
            code: self.code(),
            message: self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_and_messages() {
        let err = PeerError::no_matching_session("abc");
        assert_eq!(err.code(), 7001);
        assert_eq!(err.to_string(), "No matching session with topic: abc");

        let custom = PeerError::Custom {
            code: 5001,
            message: "declined".into(),
        };
        assert_eq!(custom.to_json_rpc_error().code, 5001);
        assert_eq!(custom.to_json_rpc_error().message, "declined");
    }
}
