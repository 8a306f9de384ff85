//! Key generation and X25519 key agreement backed by a [`KeyStore`].

use std::sync::Arc;

use hkdf::Hkdf;
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::Zeroizing;

use crate::storage::KeyStore;
use crate::{PublicKey, Result, SignError, SymmetricKey, Topic};

const KEYPAIR_PREFIX: &str = "keypair:";
const PARTICIPANTS_PREFIX: &str = "participants:";

fn keypair_tag(public_key: &PublicKey) -> String {
    format!("{}{}", KEYPAIR_PREFIX, public_key.to_hex())
}

fn participants_tag(topic: &Topic) -> String {
    format!("{}{}", PARTICIPANTS_PREFIX, topic)
}

/// Derive the shared symmetric key for an X25519 secret and peer key.
pub fn derive_symmetric_key(secret: &StaticSecret, peer: &PublicKey) -> Result<SymmetricKey> {
    let shared = secret.diffie_hellman(&X25519Public::from(peer.0));
    let hk = Hkdf::<Sha256>::new(None, shared.as_bytes());
    let mut okm = Zeroizing::new([0u8; 32]);
    hk.expand(&[], &mut okm[..])
        .map_err(|e| SignError::Internal(format!("key derivation failed: {}", e)))?;
    Ok(SymmetricKey::from_bytes(*okm))
}

/// Topic for a symmetric key: hex SHA-256 of the key bytes.
pub fn topic_for_key(key: &SymmetricKey) -> Topic {
    Topic::new(hex::encode(Sha256::digest(key.as_bytes())))
}

/// Key management over an abstract key store.
///
/// Private halves never leave this type; callers only ever see public keys,
/// topics and symmetric keys.
#[derive(Clone)]
pub struct KeyManagement {
    store: Arc<dyn KeyStore>,
}

impl KeyManagement {
    pub fn new(store: Arc<dyn KeyStore>) -> Self {
        Self { store }
    }

    /// Generate an X25519 key pair, persisting the private half.
    pub async fn generate_key_pair(&self) -> Result<PublicKey> {
        let secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
        let public_key = PublicKey(X25519Public::from(&secret).to_bytes());
        let secret_bytes = Zeroizing::new(secret.to_bytes());
        self.store
            .set(&keypair_tag(&public_key), &secret_bytes[..])
            .await?;
        Ok(public_key)
    }

    /// Generate a random symmetric key and bind it to `topic`.
    pub async fn generate_symmetric_key(&self, topic: &Topic) -> Result<SymmetricKey> {
        let key = SymmetricKey::generate();
        self.set_symmetric_key(topic, &key).await?;
        Ok(key)
    }

    /// Bind an existing symmetric key to `topic`.
    pub async fn set_symmetric_key(&self, topic: &Topic, key: &SymmetricKey) -> Result<()> {
        self.store.set(topic.as_str(), key.as_bytes()).await?;
        Ok(())
    }

    /// Symmetric key for `topic`, failing with `KeyNotFound` if unknown.
    pub async fn get_symmetric_key(&self, topic: &Topic) -> Result<SymmetricKey> {
        let bytes = Zeroizing::new(self.store.get_required(topic.as_str()).await?);
        let bytes: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| SignError::Storage(format!("corrupt symmetric key for {}", topic)))?;
        Ok(SymmetricKey::from_bytes(bytes))
    }

    /// Whether a symmetric key is bound to `topic`.
    pub async fn has_symmetric_key(&self, topic: &Topic) -> Result<bool> {
        Ok(self.store.exists(topic.as_str()).await?)
    }

    async fn secret_for(&self, public_key: &PublicKey) -> Result<StaticSecret> {
        let bytes = Zeroizing::new(self.store.get_required(&keypair_tag(public_key)).await?);
        let bytes: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            SignError::Storage(format!("corrupt private key for {}", public_key))
        })?;
        Ok(StaticSecret::from(bytes))
    }

    /// Key agreement between a local key pair and a peer public key.
    ///
    /// Pure derivation: nothing is persisted. Both parties compute the same
    /// topic and key independently.
    pub async fn derive_topic_and_key(
        &self,
        self_public: &PublicKey,
        peer_public: &PublicKey,
    ) -> Result<(Topic, SymmetricKey)> {
        let secret = self.secret_for(self_public).await?;
        let key = derive_symmetric_key(&secret, peer_public)?;
        Ok((topic_for_key(&key), key))
    }

    /// Key agreement that also binds the key to the derived topic and records
    /// the participants so [`KeyManagement::get_key_agreement`] can recover them.
    pub async fn generate_topic_from_key_agreement(
        &self,
        self_public: &PublicKey,
        peer_public: &PublicKey,
    ) -> Result<Topic> {
        let (topic, key) = self.derive_topic_and_key(self_public, peer_public).await?;
        self.set_symmetric_key(&topic, &key).await?;

        let mut participants = Vec::with_capacity(64);
        participants.extend_from_slice(self_public.as_bytes());
        participants.extend_from_slice(peer_public.as_bytes());
        self.store
            .set(&participants_tag(&topic), &participants)
            .await?;
        Ok(topic)
    }

    /// Self and peer public keys recorded for a key-agreement topic.
    pub async fn get_key_agreement(&self, topic: &Topic) -> Result<(PublicKey, PublicKey)> {
        let bytes = self.store.get_required(&participants_tag(topic)).await?;
        if bytes.len() != 64 {
            return Err(SignError::Storage(format!(
                "corrupt key agreement record for {}",
                topic
            )));
        }
        let mut self_key = [0u8; 32];
        let mut peer_key = [0u8; 32];
        self_key.copy_from_slice(&bytes[..32]);
        peer_key.copy_from_slice(&bytes[32..]);
        Ok((PublicKey(self_key), PublicKey(peer_key)))
    }

    /// Symmetric key for a type-1 envelope addressed to `receiver`.
    pub async fn derive_for_receiver(
        &self,
        receiver: &PublicKey,
        sender: &PublicKey,
    ) -> Result<SymmetricKey> {
        let secret = self.secret_for(receiver).await?;
        derive_symmetric_key(&secret, sender)
    }

    /// Delete a generated key pair's private half.
    pub async fn remove_key_pair(&self, public_key: &PublicKey) -> Result<()> {
        self.store.delete_if_exists(&keypair_tag(public_key)).await?;
        Ok(())
    }

    /// Delete all key material bound to `topic`.
    ///
    /// Removes the symmetric key, the participants record and the self
    /// private key named in it. Missing entries are not an error.
    pub async fn remove_keys(&self, topic: &Topic) -> Result<()> {
        if let Ok((self_public, _)) = self.get_key_agreement(topic).await {
            self.remove_key_pair(&self_public).await?;
        }
        self.store.delete_if_exists(&participants_tag(topic)).await?;
        self.store.delete_if_exists(topic.as_str()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryKeyStore;

    fn manager() -> KeyManagement {
        KeyManagement::new(Arc::new(InMemoryKeyStore::new()))
    }

    #[tokio::test]
    async fn test_both_sides_derive_same_topic() {
        let alice = manager();
        let bob = manager();
        let a = alice.generate_key_pair().await.unwrap();
        let b = bob.generate_key_pair().await.unwrap();

        let (topic_a, key_a) = alice.derive_topic_and_key(&a, &b).await.unwrap();
        let (topic_b, key_b) = bob.derive_topic_and_key(&b, &a).await.unwrap();

        assert_eq!(topic_a, topic_b);
        assert_eq!(key_a, key_b);
        assert_eq!(topic_a, topic_for_key(&key_a));
    }

    #[tokio::test]
    async fn test_key_agreement_record() {
        let keys = manager();
        let own = keys.generate_key_pair().await.unwrap();
        let peer_secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
        let peer = PublicKey(X25519Public::from(&peer_secret).to_bytes());

        let topic = keys.generate_topic_from_key_agreement(&own, &peer).await.unwrap();
        assert!(keys.has_symmetric_key(&topic).await.unwrap());
        assert_eq!(keys.get_key_agreement(&topic).await.unwrap(), (own, peer));

        keys.remove_keys(&topic).await.unwrap();
        assert!(!keys.has_symmetric_key(&topic).await.unwrap());
        assert!(keys.get_key_agreement(&topic).await.is_err());
        assert!(matches!(
            keys.derive_topic_and_key(&own, &peer).await,
            Err(SignError::KeyNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_symmetric_key_is_explicit() {
        let keys = manager();
        let err = keys.get_symmetric_key(&Topic::generate()).await.unwrap_err();
        assert!(matches!(err, SignError::KeyNotFound(_)));
    }
}
