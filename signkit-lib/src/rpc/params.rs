//! Typed params for every protocol method.
//!
//! Params are a closed sum type per method family. Decoding is driven by the
//! method name, so an unknown method never produces a params value.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::namespace::{ProposalNamespaces, SessionNamespaces};
use crate::{AppMetadata, PublicKey, RelayProtocolOptions, Result, SignError};

/// Method names.
pub mod methods {
    pub const PAIRING_DELETE: &str = "wc_pairingDelete";
    pub const PAIRING_PING: &str = "wc_pairingPing";
    pub const SESSION_PROPOSE: &str = "wc_sessionPropose";
    pub const SESSION_SETTLE: &str = "wc_sessionSettle";
    pub const SESSION_REQUEST: &str = "wc_sessionRequest";
    pub const SESSION_EVENT: &str = "wc_sessionEvent";
    pub const SESSION_UPDATE: &str = "wc_sessionUpdate";
    pub const SESSION_EXTEND: &str = "wc_sessionExtend";
    pub const SESSION_DELETE: &str = "wc_sessionDelete";
    pub const SESSION_PING: &str = "wc_sessionPing";
}

/// A party's public key and metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub public_key: PublicKey,
    pub metadata: AppMetadata,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionProposeParams {
    pub relays: Vec<RelayProtocolOptions>,
    pub proposer: Participant,
    pub required_namespaces: ProposalNamespaces,
}

/// Result payload of an approved proposal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalParams {
    pub relay: RelayProtocolOptions,
    pub responder_public_key: PublicKey,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSettleParams {
    pub relay: RelayProtocolOptions,
    pub controller: Participant,
    pub namespaces: SessionNamespaces,
    pub expiry: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionRequestPayload {
    pub method: String,
    pub params: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequestParams {
    pub request: SessionRequestPayload,
    pub chain_id: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionEventPayload {
    pub name: String,
    pub data: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEventParams {
    pub event: SessionEventPayload,
    pub chain_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUpdateParams {
    pub namespaces: SessionNamespaces,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionExtendParams {
    pub expiry: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteParams {
    pub code: i32,
    pub message: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingParams {}

/// Methods sent over a pairing topic.
#[derive(Clone, Debug, PartialEq)]
pub enum PairingParams {
    SessionPropose(SessionProposeParams),
    Delete(DeleteParams),
    Ping(PingParams),
}

/// Methods sent over a session topic.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionParams {
    Settle(SessionSettleParams),
    Request(SessionRequestParams),
    Event(SessionEventParams),
    Update(SessionUpdateParams),
    Extend(SessionExtendParams),
    Delete(DeleteParams),
    Ping(PingParams),
}

/// Params of any protocol request.
#[derive(Clone, Debug, PartialEq)]
pub enum ClientParams {
    Pairing(PairingParams),
    Session(SessionParams),
}

impl From<PairingParams> for ClientParams {
    fn from(params: PairingParams) -> Self {
        Self::Pairing(params)
    }
}

impl From<SessionParams> for ClientParams {
    fn from(params: SessionParams) -> Self {
        Self::Session(params)
    }
}

impl ClientParams {
    /// JSON-RPC method name for these params.
    pub fn method(&self) -> &'static str {
        match self {
            Self::Pairing(PairingParams::SessionPropose(_)) => methods::SESSION_PROPOSE,
            Self::Pairing(PairingParams::Delete(_)) => methods::PAIRING_DELETE,
            Self::Pairing(PairingParams::Ping(_)) => methods::PAIRING_PING,
            Self::Session(SessionParams::Settle(_)) => methods::SESSION_SETTLE,
            Self::Session(SessionParams::Request(_)) => methods::SESSION_REQUEST,
            Self::Session(SessionParams::Event(_)) => methods::SESSION_EVENT,
            Self::Session(SessionParams::Update(_)) => methods::SESSION_UPDATE,
            Self::Session(SessionParams::Extend(_)) => methods::SESSION_EXTEND,
            Self::Session(SessionParams::Delete(_)) => methods::SESSION_DELETE,
            Self::Session(SessionParams::Ping(_)) => methods::SESSION_PING,
        }
    }

    /// Params as a JSON value.
    pub fn to_value(&self) -> Result<Value> {
        let value = match self {
            Self::Pairing(PairingParams::SessionPropose(p)) => serde_json::to_value(p)?,
            Self::Pairing(PairingParams::Delete(p)) => serde_json::to_value(p)?,
            Self::Pairing(PairingParams::Ping(p)) => serde_json::to_value(p)?,
            Self::Session(SessionParams::Settle(p)) => serde_json::to_value(p)?,
            Self::Session(SessionParams::Request(p)) => serde_json::to_value(p)?,
            Self::Session(SessionParams::Event(p)) => serde_json::to_value(p)?,
            Self::Session(SessionParams::Update(p)) => serde_json::to_value(p)?,
            Self::Session(SessionParams::Extend(p)) => serde_json::to_value(p)?,
            Self::Session(SessionParams::Delete(p)) => serde_json::to_value(p)?,
            Self::Session(SessionParams::Ping(p)) => serde_json::to_value(p)?,
        };
        Ok(value)
    }

    /// Decode params for `method`.
    pub fn from_method(method: &str, params: Value) -> Result<Self> {
        let decoded: ClientParams = match method {
            methods::SESSION_PROPOSE => {
                PairingParams::SessionPropose(serde_json::from_value(params)?).into()
            }
            methods::PAIRING_DELETE => PairingParams::Delete(serde_json::from_value(params)?).into(),
            methods::PAIRING_PING => PairingParams::Ping(serde_json::from_value(params)?).into(),
            methods::SESSION_SETTLE => SessionParams::Settle(serde_json::from_value(params)?).into(),
            methods::SESSION_REQUEST => {
                SessionParams::Request(serde_json::from_value(params)?).into()
            }
            methods::SESSION_EVENT => SessionParams::Event(serde_json::from_value(params)?).into(),
            methods::SESSION_UPDATE => SessionParams::Update(serde_json::from_value(params)?).into(),
            methods::SESSION_EXTEND => SessionParams::Extend(serde_json::from_value(params)?).into(),
            methods::SESSION_DELETE => SessionParams::Delete(serde_json::from_value(params)?).into(),
            methods::SESSION_PING => SessionParams::Ping(serde_json::from_value(params)?).into(),
            other => {
                return Err(SignError::Serialization(format!(
                    "unknown method: {}",
                    other
                )))
            }
        };
        Ok(decoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_propose_params_wire_shape() {
        let params = SessionProposeParams {
            relays: vec![RelayProtocolOptions::default()],
            proposer: Participant {
                public_key: PublicKey([1u8; 32]),
                metadata: AppMetadata::new("dapp", "https://dapp.example"),
            },
            required_namespaces: Default::default(),
        };
        let value = ClientParams::from(PairingParams::SessionPropose(params)).to_value().unwrap();
        assert_eq!(value["relays"][0]["protocol"], "irn");
        assert_eq!(value["proposer"]["publicKey"], "01".repeat(32));
        assert!(value["requiredNamespaces"].is_object());
    }

    #[test]
    fn test_decode_by_method() {
        let params = ClientParams::from_method(
            methods::SESSION_REQUEST,
            json!({"request": {"method": "personal_sign", "params": ["0x01"]}, "chainId": "eip155:1"}),
        )
        .unwrap();
        match params {
            ClientParams::Session(SessionParams::Request(p)) => {
                assert_eq!(p.chain_id, "eip155:1");
                assert_eq!(p.request.method, "personal_sign");
            }
            other => panic!("unexpected params: {:?}", other),
        }

        assert_eq!(
            ClientParams::from_method(methods::SESSION_PING, json!({}))
                .unwrap()
                .method(),
            methods::SESSION_PING
        );
    }

    #[test]
    fn test_unknown_method_is_rejected() {
        assert!(ClientParams::from_method("wc_unknown", json!({})).is_err());
        assert!(ClientParams::from_method(methods::SESSION_EXTEND, json!({"nope": 1})).is_err());
    }
}
