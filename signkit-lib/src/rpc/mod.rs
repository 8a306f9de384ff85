//! JSON-RPC 2.0 envelopes, request ids and protocol params.

use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{now_millis, Result, SignError, Topic};

mod params;
mod peer_error;
mod relay_params;

pub use params::{
    methods, ApprovalParams, ClientParams, DeleteParams, PairingParams, Participant, PingParams,
    SessionEventParams, SessionEventPayload, SessionExtendParams, SessionParams,
    SessionProposeParams, SessionRequestParams, SessionRequestPayload, SessionSettleParams,
    SessionUpdateParams,
};
pub use peer_error::PeerError;
pub use relay_params::IridiumParams;

pub const JSON_RPC_VERSION: &str = "2.0";

static LAST_ID: AtomicU64 = AtomicU64::new(0);

/// Generate a request id.
///
/// The id is `unix_millis * 1000` plus three random digits, bumped so that
/// ids issued by this process are strictly increasing.
pub fn generate_id() -> u64 {
    let candidate = now_millis().max(0) as u64 * 1000 + rand::thread_rng().gen_range(0..1000);
    let mut last = LAST_ID.load(Ordering::Relaxed);
    loop {
        let next = candidate.max(last + 1);
        match LAST_ID.compare_exchange_weak(last, next, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(current) => last = current,
        }
    }
}

/// Millisecond timestamp embedded in a request id.
pub fn extract_timestamp(id: u64) -> i64 {
    (id / 1000) as i64
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub id: u64,
    pub jsonrpc: String,
    pub method: String,
    pub params: Value,
}

impl JsonRpcRequest {
    pub fn new(id: u64, params: &ClientParams) -> Result<Self> {
        Ok(Self {
            id,
            jsonrpc: JSON_RPC_VERSION.to_string(),
            method: params.method().to_string(),
            params: params.to_value()?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResult {
    pub id: u64,
    pub jsonrpc: String,
    pub result: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcErrorResponse {
    pub id: u64,
    pub jsonrpc: String,
    pub error: JsonRpcError,
}

/// A JSON-RPC response: either a result or an error.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcResponse {
    Result(JsonRpcResult),
    Error(JsonRpcErrorResponse),
}

impl JsonRpcResponse {
    pub fn result(id: u64, result: Value) -> Self {
        Self::Result(JsonRpcResult {
            id,
            jsonrpc: JSON_RPC_VERSION.to_string(),
            result,
        })
    }

    pub fn error(id: u64, error: JsonRpcError) -> Self {
        Self::Error(JsonRpcErrorResponse {
            id,
            jsonrpc: JSON_RPC_VERSION.to_string(),
            error,
        })
    }

    pub fn id(&self) -> u64 {
        match self {
            Self::Result(r) => r.id,
            Self::Error(e) => e.id,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// A decrypted inbound payload, classified by shape.
#[derive(Clone, Debug, PartialEq)]
pub enum InboundPayload {
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
}

/// Classify a decrypted payload as a request (has a method) or a response
/// (has a result or an error).
pub fn classify(text: &str) -> Result<InboundPayload> {
    let value: Value = serde_json::from_str(text)?;
    let object = value
        .as_object()
        .ok_or_else(|| SignError::Serialization("payload is not a JSON object".to_string()))?;

    if object.contains_key("method") {
        Ok(InboundPayload::Request(serde_json::from_value(value)?))
    } else if object.contains_key("result") || object.contains_key("error") {
        Ok(InboundPayload::Response(serde_json::from_value(value)?))
    } else {
        Err(SignError::Serialization(
            "received unknown object type".to_string(),
        ))
    }
}

/// A typed inbound peer request.
#[derive(Clone, Debug, PartialEq)]
pub struct WcRequest {
    pub topic: Topic,
    pub id: u64,
    pub params: ClientParams,
}

impl WcRequest {
    pub fn method(&self) -> &'static str {
        self.params.method()
    }
}

/// A peer response correlated with the request this client sent.
#[derive(Clone, Debug, PartialEq)]
pub struct WcResponse {
    pub topic: Topic,
    /// Params of the original request.
    pub params: ClientParams,
    pub response: JsonRpcResponse,
}

impl WcResponse {
    pub fn method(&self) -> &'static str {
        self.params.method()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ids_increase_and_embed_time() {
        let before = now_millis();
        let a = generate_id();
        let b = generate_id();
        assert!(b > a);
        assert!(extract_timestamp(a) >= before);
    }

    #[test]
    fn test_classify() {
        let request = classify(r#"{"id":1,"jsonrpc":"2.0","method":"wc_sessionPing","params":{}}"#)
            .unwrap();
        assert!(matches!(request, InboundPayload::Request(r) if r.method == "wc_sessionPing"));

        let result = classify(r#"{"id":2,"jsonrpc":"2.0","result":true}"#).unwrap();
        assert_eq!(
            result,
            InboundPayload::Response(JsonRpcResponse::result(2, json!(true)))
        );

        let error =
            classify(r#"{"id":3,"jsonrpc":"2.0","error":{"code":5000,"message":"no"}}"#).unwrap();
        match error {
            InboundPayload::Response(response) => {
                assert!(response.is_error());
                assert_eq!(response.id(), 3);
            }
            other => panic!("unexpected payload: {:?}", other),
        }

        assert!(classify(r#"{"id":4,"jsonrpc":"2.0"}"#).is_err());
        assert!(classify("[]").is_err());
    }

    #[test]
    fn test_request_envelope() {
        let params = ClientParams::Session(SessionParams::Ping(PingParams::default()));
        let request = JsonRpcRequest::new(9, &params).unwrap();
        let text = serde_json::to_string(&request).unwrap();
        assert_eq!(
            text,
            r#"{"id":9,"jsonrpc":"2.0","method":"wc_sessionPing","params":{}}"#
        );
    }
}
