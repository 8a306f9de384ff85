//! Topic-aware encryption of relay payloads.

use tracing::debug;

use super::envelope::{self, EnvelopeType};
use super::keys::KeyManagement;
use crate::{PublicKey, Result, SignError, Topic};

/// Encrypts and decrypts relay payloads using the keys bound to each topic.
///
/// Anything returned by [`Codec::decrypt`] has passed authenticated
/// decryption; every failure is reported as [`SignError::Decryption`].
#[derive(Clone)]
pub struct Codec {
    keys: KeyManagement,
}

impl Codec {
    pub fn new(keys: KeyManagement) -> Self {
        Self { keys }
    }

    /// Key management backing this codec.
    pub fn keys(&self) -> &KeyManagement {
        &self.keys
    }

    /// Encrypt `plaintext` with the symmetric key bound to `topic`.
    pub async fn encrypt(
        &self,
        topic: &Topic,
        plaintext: &str,
        envelope_type: EnvelopeType,
    ) -> Result<String> {
        let key = self.keys.get_symmetric_key(topic).await?;
        Ok(envelope::seal(&key, plaintext.as_bytes(), envelope_type)?)
    }

    /// Decrypt an envelope received on `topic`.
    ///
    /// Type-0 envelopes use the topic's symmetric key. Type-1 envelopes derive
    /// the key from the embedded sender key and the private key named by
    /// `receiver`, which is then required.
    pub async fn decrypt(
        &self,
        topic: &Topic,
        envelope_text: &str,
        receiver: Option<&PublicKey>,
    ) -> Result<String> {
        let bytes = envelope::decode(envelope_text)?;
        let parts = envelope::split(&bytes)?;

        let key = match (&parts.envelope_type, receiver) {
            (EnvelopeType::Type0, _) => self
                .keys
                .get_symmetric_key(topic)
                .await
                .map_err(|e| SignError::Decryption(format!("no key for topic {}: {}", topic, e)))?,
            (EnvelopeType::Type1 { sender }, Some(receiver)) => self
                .keys
                .derive_for_receiver(receiver, sender)
                .await
                .map_err(|e| SignError::Decryption(format!("key agreement failed: {}", e)))?,
            (EnvelopeType::Type1 { .. }, None) => {
                return Err(SignError::Decryption(
                    "type 1 envelope requires a receiver public key".to_string(),
                ))
            }
        };

        let plaintext = envelope::open(&key, &parts)?;
        debug!(topic = %topic, len = plaintext.len(), "decrypted envelope");
        String::from_utf8(plaintext)
            .map_err(|_| SignError::Decryption("plaintext is not valid UTF-8".to_string()))
    }
}
