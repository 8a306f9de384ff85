//! Capability namespaces and their validation rules.
//!
//! A proposal lists what the proposer *requires* per namespace key (chains,
//! methods, events). A session lists what the responder *grants* (accounts,
//! methods, events). Chains follow CAIP-2 (`eip155:1`) and accounts CAIP-10
//! (`eip155:1:0xab...`).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::rpc::PeerError;
use crate::SignError;

/// Requirements for one namespace key.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalNamespace {
    pub chains: Vec<String>,
    pub methods: Vec<String>,
    pub events: Vec<String>,
}

/// Grant for one namespace key.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionNamespace {
    pub accounts: Vec<String>,
    pub methods: Vec<String>,
    pub events: Vec<String>,
}

/// Required namespaces, by key.
pub type ProposalNamespaces = BTreeMap<String, ProposalNamespace>;

/// Granted namespaces, by key.
pub type SessionNamespaces = BTreeMap<String, SessionNamespace>;

/// Why a namespace map was rejected.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum NamespaceError {
    #[error("unsupported namespace key: {0}")]
    UnsupportedNamespaceKey(String),
    #[error("unsupported chains: {0}")]
    UnsupportedChains(String),
    #[error("unsupported accounts: {0}")]
    UnsupportedAccounts(String),
    #[error("unsupported methods: {0}")]
    UnsupportedMethods(String),
    #[error("unsupported events: {0}")]
    UnsupportedEvents(String),
}

impl NamespaceError {
    /// The peer error to answer with when a peer sent the offending map.
    pub fn peer_error(&self) -> PeerError {
        match self {
            Self::UnsupportedNamespaceKey(m) => PeerError::UnsupportedNamespaceKey(m.clone()),
            Self::UnsupportedChains(m) => PeerError::UnsupportedChains(m.clone()),
            Self::UnsupportedAccounts(m) => PeerError::UnsupportedAccounts(m.clone()),
            Self::UnsupportedMethods(m) => PeerError::UnsupportedMethods(m.clone()),
            Self::UnsupportedEvents(m) => PeerError::UnsupportedEvents(m.clone()),
        }
    }
}

impl From<NamespaceError> for SignError {
    fn from(err: NamespaceError) -> Self {
        SignError::InvalidNamespace(err.to_string())
    }
}

fn is_valid_namespace_key(key: &str) -> bool {
    (3..=8).contains(&key.len())
        && key
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

fn is_valid_reference(reference: &str) -> bool {
    (1..=32).contains(&reference.len())
        && reference
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// CAIP-2 chain id check: `namespace:reference`.
pub fn is_valid_chain_id(chain_id: &str) -> bool {
    match chain_id.split_once(':') {
        Some((namespace, reference)) => {
            is_valid_namespace_key(namespace) && is_valid_reference(reference)
        }
        None => false,
    }
}

/// CAIP-10 account id check: `namespace:reference:address`.
pub fn is_valid_account_id(account: &str) -> bool {
    match account.rsplit_once(':') {
        Some((chain, address)) => {
            is_valid_chain_id(chain)
                && (1..=128).contains(&address.len())
                && address
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '%')
        }
        None => false,
    }
}

/// Chain id part of a CAIP-10 account.
pub fn chain_of_account(account: &str) -> Option<&str> {
    account.rsplit_once(':').map(|(chain, _)| chain)
}

/// Namespace key of a CAIP-2 chain id.
pub fn namespace_of_chain(chain_id: &str) -> Option<&str> {
    chain_id.split_once(':').map(|(namespace, _)| namespace)
}

/// Validate the shape of proposal namespaces before anything is sent.
pub fn validate_proposal_namespaces(namespaces: &ProposalNamespaces) -> Result<(), NamespaceError> {
    if namespaces.is_empty() {
        return Err(NamespaceError::UnsupportedNamespaceKey(
            "at least one namespace is required".to_string(),
        ));
    }
    for (key, namespace) in namespaces {
        if !is_valid_namespace_key(key) {
            return Err(NamespaceError::UnsupportedNamespaceKey(key.clone()));
        }
        if namespace.chains.is_empty() {
            return Err(NamespaceError::UnsupportedChains(format!(
                "{} lists no chains",
                key
            )));
        }
        for chain in &namespace.chains {
            if !is_valid_chain_id(chain) || namespace_of_chain(chain) != Some(key.as_str()) {
                return Err(NamespaceError::UnsupportedChains(chain.clone()));
            }
        }
    }
    Ok(())
}

/// Validate granted namespaces against the proposal's requirements.
///
/// Every required key must be granted, every required chain must have at
/// least one account and the granted methods and events must include the
/// required ones. Extra grants are allowed.
pub fn validate_session_namespaces(
    granted: &SessionNamespaces,
    required: &ProposalNamespaces,
) -> Result<(), NamespaceError> {
    for (key, namespace) in granted {
        if !is_valid_namespace_key(key) {
            return Err(NamespaceError::UnsupportedNamespaceKey(key.clone()));
        }
        if namespace.accounts.is_empty() {
            return Err(NamespaceError::UnsupportedAccounts(format!(
                "{} grants no accounts",
                key
            )));
        }
        for account in &namespace.accounts {
            let in_namespace = chain_of_account(account).and_then(namespace_of_chain)
                == Some(key.as_str());
            if !is_valid_account_id(account) || !in_namespace {
                return Err(NamespaceError::UnsupportedAccounts(account.clone()));
            }
        }
    }

    for (key, requirement) in required {
        let grant = granted
            .get(key)
            .ok_or_else(|| NamespaceError::UnsupportedNamespaceKey(format!("{} missing", key)))?;

        for chain in &requirement.chains {
            let covered = grant
                .accounts
                .iter()
                .any(|account| chain_of_account(account) == Some(chain.as_str()));
            if !covered {
                return Err(NamespaceError::UnsupportedChains(chain.clone()));
            }
        }
        if let Some(method) = requirement
            .methods
            .iter()
            .find(|m| !grant.methods.contains(m))
        {
            return Err(NamespaceError::UnsupportedMethods(method.clone()));
        }
        if let Some(event) = requirement
            .events
            .iter()
            .find(|e| !grant.events.contains(e))
        {
            return Err(NamespaceError::UnsupportedEvents(event.clone()));
        }
    }
    Ok(())
}

fn grant_for_chain<'a>(
    chain_id: &str,
    namespaces: &'a SessionNamespaces,
) -> Option<&'a SessionNamespace> {
    let grant = namespaces.get(namespace_of_chain(chain_id)?)?;
    grant
        .accounts
        .iter()
        .any(|account| chain_of_account(account) == Some(chain_id))
        .then_some(grant)
}

/// Whether `method` may be called on `chain_id` under `namespaces`.
pub fn is_method_authorized(chain_id: &str, method: &str, namespaces: &SessionNamespaces) -> bool {
    grant_for_chain(chain_id, namespaces)
        .map(|grant| grant.methods.iter().any(|m| m == method))
        .unwrap_or(false)
}

/// Whether `event` may be emitted on `chain_id` under `namespaces`.
pub fn is_event_authorized(chain_id: &str, event: &str, namespaces: &SessionNamespaces) -> bool {
    grant_for_chain(chain_id, namespaces)
        .map(|grant| grant.events.iter().any(|e| e == event))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn required() -> ProposalNamespaces {
        BTreeMap::from([(
            "eip155".to_string(),
            ProposalNamespace {
                chains: strings(&["eip155:1"]),
                methods: strings(&["personal_sign"]),
                events: strings(&["accountsChanged"]),
            },
        )])
    }

    fn granted() -> SessionNamespaces {
        BTreeMap::from([(
            "eip155".to_string(),
            SessionNamespace {
                accounts: strings(&["eip155:1:0xab16a96d359ec26a11e2c2b3d8f8b8942d5bfcdb"]),
                methods: strings(&["personal_sign", "eth_sendTransaction"]),
                events: strings(&["accountsChanged", "chainChanged"]),
            },
        )])
    }

    #[test]
    fn test_chain_and_account_ids() {
        assert!(is_valid_chain_id("eip155:1"));
        assert!(is_valid_chain_id("cosmos:cosmoshub-4"));
        assert!(!is_valid_chain_id("eip155"));
        assert!(!is_valid_chain_id("EIP155:1"));
        assert!(is_valid_account_id("eip155:1:0xabc"));
        assert!(!is_valid_account_id("eip155:1"));
        assert_eq!(chain_of_account("eip155:1:0xabc"), Some("eip155:1"));
    }

    #[test]
    fn test_proposal_shape() {
        assert!(validate_proposal_namespaces(&required()).is_ok());
        assert!(validate_proposal_namespaces(&BTreeMap::new()).is_err());

        let mut wrong_prefix = required();
        wrong_prefix.get_mut("eip155").unwrap().chains = strings(&["solana:mainnet"]);
        assert_eq!(
            validate_proposal_namespaces(&wrong_prefix),
            Err(NamespaceError::UnsupportedChains("solana:mainnet".into()))
        );

        let mut no_chains = required();
        no_chains.get_mut("eip155").unwrap().chains.clear();
        assert!(matches!(
            validate_proposal_namespaces(&no_chains),
            Err(NamespaceError::UnsupportedChains(_))
        ));
    }

    #[test]
    fn test_superset_grant_is_accepted() {
        assert!(validate_session_namespaces(&granted(), &required()).is_ok());
    }

    #[test]
    fn test_missing_requirements_are_rejected() {
        let mut missing_method = granted();
        missing_method.get_mut("eip155").unwrap().methods = strings(&["eth_sign"]);
        assert_eq!(
            validate_session_namespaces(&missing_method, &required()),
            Err(NamespaceError::UnsupportedMethods("personal_sign".into()))
        );

        let mut missing_chain = granted();
        missing_chain.get_mut("eip155").unwrap().accounts = strings(&["eip155:137:0xabc"]);
        assert!(matches!(
            validate_session_namespaces(&missing_chain, &required()),
            Err(NamespaceError::UnsupportedChains(_))
        ));

        assert!(matches!(
            validate_session_namespaces(&BTreeMap::new(), &required()),
            Err(NamespaceError::UnsupportedNamespaceKey(_))
        ));
    }

    #[test]
    fn test_authorization() {
        let namespaces = granted();
        assert!(is_method_authorized("eip155:1", "personal_sign", &namespaces));
        assert!(!is_method_authorized("eip155:1", "eth_signTypedData", &namespaces));
        assert!(!is_method_authorized("eip155:137", "personal_sign", &namespaces));
        assert!(is_event_authorized("eip155:1", "chainChanged", &namespaces));
        assert!(!is_event_authorized("solana:mainnet", "chainChanged", &namespaces));
    }
}
