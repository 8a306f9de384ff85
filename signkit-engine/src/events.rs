//! Events delivered to the application.

use signkit_lib::namespace::SessionNamespaces;
use signkit_lib::rpc::{JsonRpcError, JsonRpcResponse, SessionEventPayload, SessionRequestPayload};
use signkit_lib::sequence::Session;
use signkit_lib::{Expiry, PublicKey, SignError, Topic};

use crate::proposals::PendingProposal;

/// Which side ended a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeleteOrigin {
    Local,
    Peer,
}

/// Outcome of a settle request this side sent.
#[derive(Clone, Debug, PartialEq)]
pub enum SettleResponse {
    /// The peer acknowledged; the session is now settled on both sides.
    Result { session: Session },
    /// The peer refused; the session and its keys were removed.
    Error { topic: Topic, error: JsonRpcError },
}

/// Outcome of a namespace update this side sent.
#[derive(Clone, Debug, PartialEq)]
pub enum UpdateNamespacesResponse {
    Result {
        topic: Topic,
        namespaces: SessionNamespaces,
    },
    Error {
        topic: Topic,
        error: JsonRpcError,
    },
}

/// A single ordered stream of everything the engine reports.
#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    /// The combined transport and network signal changed.
    ConnectionStateChanged { available: bool },
    /// A peer proposed a session; answer with `approve` or `reject`.
    SessionProposal(PendingProposal),
    /// A session proposed by this side was settled by the peer.
    SessionApproved { session: Session },
    SessionSettleResponse(SettleResponse),
    /// The peer rejected a proposal sent by this side.
    SessionRejected {
        pairing_topic: Topic,
        proposer_public_key: PublicKey,
        error: JsonRpcError,
    },
    /// The controlling peer replaced the session's namespaces.
    SessionUpdateNamespaces {
        topic: Topic,
        namespaces: SessionNamespaces,
    },
    SessionUpdateNamespacesResponse(UpdateNamespacesResponse),
    /// The peer asks this side to handle a request; answer with
    /// `respond_session_request`.
    SessionRequest {
        topic: Topic,
        id: u64,
        chain_id: String,
        request: SessionRequestPayload,
    },
    /// The peer answered a request this side sent.
    SessionPayloadResponse {
        topic: Topic,
        chain_id: String,
        response: JsonRpcResponse,
    },
    SessionEvent {
        topic: Topic,
        chain_id: String,
        event: SessionEventPayload,
    },
    SessionExtended { topic: Topic, expiry: Expiry },
    SessionDeleted { topic: Topic, origin: DeleteOrigin },
    PairingDeleted { topic: Topic },
    /// Non-fatal failure: undecryptable traffic, storage hiccups, transport faults.
    InternalError { error: SignError },
}
