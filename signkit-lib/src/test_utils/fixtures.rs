use std::collections::BTreeMap;

use crate::namespace::{ProposalNamespace, ProposalNamespaces, SessionNamespace, SessionNamespaces};

/// Account granted by [`eip155_granted`].
pub const TEST_ACCOUNT: &str = "eip155:1:0xab16a96d359ec26a11e2c2b3d8f8b8942d5bfcdb";

/// `{eip155: {chains: [eip155:1], methods: [personal_sign], events: [accountsChanged]}}`
pub fn eip155_required() -> ProposalNamespaces {
    BTreeMap::from([(
        "eip155".to_string(),
        ProposalNamespace {
            chains: vec!["eip155:1".to_string()],
            methods: vec!["personal_sign".to_string()],
            events: vec!["accountsChanged".to_string()],
        },
    )])
}

/// A grant satisfying [`eip155_required`] with one account on `eip155:1`.
pub fn eip155_granted() -> SessionNamespaces {
    BTreeMap::from([(
        "eip155".to_string(),
        SessionNamespace {
            accounts: vec![TEST_ACCOUNT.to_string()],
            methods: vec!["personal_sign".to_string()],
            events: vec!["accountsChanged".to_string()],
        },
    )])
}
