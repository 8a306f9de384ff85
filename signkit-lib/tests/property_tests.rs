//! Property-based tests for signkit-lib
//!
//! These tests use proptest to verify invariants across a wide range of inputs.

#[cfg(test)]
mod envelope_properties {
    use proptest::prelude::*;
    use signkit_lib::crypto::envelope::{decode, open, seal, split};
    use signkit_lib::crypto::{EnvelopeError, EnvelopeType};
    use signkit_lib::{PublicKey, SymmetricKey};

    fn envelope_type(sender: Option<[u8; 32]>) -> EnvelopeType {
        match sender {
            Some(bytes) => EnvelopeType::Type1 {
                sender: PublicKey(bytes),
            },
            None => EnvelopeType::Type0,
        }
    }

    proptest! {
        /// Opening with the sealing key returns the plaintext for both envelope types
        #[test]
        fn seal_open_roundtrip(
            plaintext in proptest::collection::vec(any::<u8>(), 0..512),
            key in any::<[u8; 32]>(),
            sender in proptest::option::of(any::<[u8; 32]>()),
        ) {
            let key = SymmetricKey::from_bytes(key);
            let envelope = seal(&key, &plaintext, envelope_type(sender)).unwrap();

            let bytes = decode(&envelope).unwrap();
            let parts = split(&bytes).unwrap();
            prop_assert_eq!(&parts.envelope_type, &envelope_type(sender));
            prop_assert_eq!(open(&key, &parts).unwrap(), plaintext);
        }

        /// Any other key fails authentication
        #[test]
        fn wrong_key_fails(
            plaintext in proptest::collection::vec(any::<u8>(), 0..256),
            key in any::<[u8; 32]>(),
            other in any::<[u8; 32]>(),
        ) {
            prop_assume!(key != other);
            let envelope = seal(&SymmetricKey::from_bytes(key), &plaintext, EnvelopeType::Type0).unwrap();
            let bytes = decode(&envelope).unwrap();
            let parts = split(&bytes).unwrap();
            prop_assert!(matches!(
                open(&SymmetricKey::from_bytes(other), &parts),
                Err(EnvelopeError::AuthenticationFailed)
            ));
        }

        /// Flipping any byte after the type tag is detected
        #[test]
        fn tampering_is_detected(
            plaintext in proptest::collection::vec(any::<u8>(), 1..128),
            key in any::<[u8; 32]>(),
            position in any::<prop::sample::Index>(),
            flip in 1u8..=255,
        ) {
            let key = SymmetricKey::from_bytes(key);
            let envelope = seal(&key, &plaintext, EnvelopeType::Type0).unwrap();
            let mut bytes = decode(&envelope).unwrap();
            let at = 1 + position.index(bytes.len() - 1);
            bytes[at] ^= flip;

            let parts = split(&bytes).unwrap();
            prop_assert!(open(&key, &parts).is_err());
        }
    }
}

#[cfg(test)]
mod namespace_properties {
    use proptest::prelude::*;
    use signkit_lib::namespace::{
        validate_session_namespaces, NamespaceError, ProposalNamespace, ProposalNamespaces,
        SessionNamespace, SessionNamespaces,
    };
    use std::collections::BTreeMap;

    fn names() -> impl Strategy<Value = Vec<String>> {
        proptest::collection::btree_set("[a-z][a-zA-Z_]{2,12}", 1..6)
            .prop_map(|set| set.into_iter().collect())
    }

    fn required(chains: &[u32], methods: &[String], events: &[String]) -> ProposalNamespaces {
        BTreeMap::from([(
            "eip155".to_string(),
            ProposalNamespace {
                chains: chains.iter().map(|c| format!("eip155:{}", c)).collect(),
                methods: methods.to_vec(),
                events: events.to_vec(),
            },
        )])
    }

    fn granted(chains: &[u32], methods: &[String], events: &[String]) -> SessionNamespaces {
        BTreeMap::from([(
            "eip155".to_string(),
            SessionNamespace {
                accounts: chains
                    .iter()
                    .map(|c| format!("eip155:{}:0xab16a96d359ec26a11e2c2b3d8f8b8942d5bfcdb", c))
                    .collect(),
                methods: methods.to_vec(),
                events: events.to_vec(),
            },
        )])
    }

    fn chains() -> impl Strategy<Value = Vec<u32>> {
        proptest::collection::btree_set(1u32..100_000, 1..4).prop_map(|set| set.into_iter().collect())
    }

    proptest! {
        /// A grant that covers every requirement, plus extras, is accepted
        #[test]
        fn superset_grant_is_accepted(
            chains in chains(),
            methods in names(),
            events in names(),
            extra_methods in names(),
            extra_events in names(),
        ) {
            let required = required(&chains, &methods, &events);
            let mut all_methods = methods.clone();
            all_methods.extend(extra_methods);
            let mut all_events = events.clone();
            all_events.extend(extra_events);

            prop_assert!(validate_session_namespaces(
                &granted(&chains, &all_methods, &all_events),
                &required
            )
            .is_ok());
        }

        /// Dropping any one required method is rejected with the method code
        #[test]
        fn missing_method_is_rejected(
            chains in chains(),
            methods in names(),
            events in names(),
            drop in any::<prop::sample::Index>(),
        ) {
            let required = required(&chains, &methods, &events);
            let mut partial = methods.clone();
            let dropped = partial.remove(drop.index(partial.len()));

            let result = validate_session_namespaces(&granted(&chains, &partial, &events), &required);
            prop_assert_eq!(result, Err(NamespaceError::UnsupportedMethods(dropped)));
        }

        /// A required chain without an account is rejected with the chain code
        #[test]
        fn uncovered_chain_is_rejected(
            chains in chains(),
            methods in names(),
            events in names(),
            drop in any::<prop::sample::Index>(),
        ) {
            prop_assume!(chains.len() > 1);
            let required = required(&chains, &methods, &events);
            let mut covered = chains.clone();
            covered.remove(drop.index(covered.len()));

            let result = validate_session_namespaces(&granted(&covered, &methods, &events), &required);
            prop_assert!(matches!(
                result,
                Err(NamespaceError::UnsupportedChains(_))
            ), "uncovered chain accepted");
            prop_assert_eq!(result.unwrap_err().peer_error().code(), 5100);
        }
    }
}

#[cfg(test)]
mod id_properties {
    use proptest::prelude::*;
    use signkit_lib::rpc::{extract_timestamp, generate_id};

    proptest! {
        /// Ids are strictly increasing and carry their creation time
        #[test]
        fn ids_increase(count in 2usize..200) {
            let before = signkit_lib::now_millis();
            let ids: Vec<u64> = (0..count).map(|_| generate_id()).collect();
            prop_assert!(ids.windows(2).all(|w| w[1] > w[0]));
            prop_assert!(extract_timestamp(ids[0]) >= before);
        }
    }
}
