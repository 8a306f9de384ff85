//! Signkit library.
//!
//! Protocol primitives for establishing pairings and namespace-scoped sessions
//! between two parties over an untrusted, topic-addressed relay.
//!
//! # Features
//!
//! - **Envelope crypto**: X25519 key agreement, HKDF-derived topic keys and
//!   ChaCha20-Poly1305 envelopes
//! - **Request journal**: idempotent request admission and response correlation
//! - **Storage abstraction**: trait-based key store and pairing/session store
//! - **Transport abstraction**: a relay trait that hosts plug their socket into
//!
//! # Example
//!
//! ```
//! use signkit_lib::uri::{format_pairing_uri, parse_pairing_uri, PairingUri};
//! use signkit_lib::{RelayProtocolOptions, SymmetricKey, Topic};
//!
//! let uri = PairingUri {
//!     topic: Topic::generate(),
//!     relay: RelayProtocolOptions::default(),
//!     sym_key: SymmetricKey::generate(),
//! };
//! let text = format_pairing_uri(&uri);
//! assert_eq!(parse_pairing_uri(&text).unwrap().topic, uri.topic);
//! ```

use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::{Zeroize, ZeroizeOnDrop};

pub mod crypto;
pub mod errors;
pub mod namespace;
pub mod rpc;
pub mod sequence;
pub mod storage;
pub mod transport;
pub mod uri;

/// Test utilities: loopback relay and fixtures.
///
/// This module is only available with the `test-utils` feature or in test builds.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use errors::{SignError, SignErrorCode};

/// Common result alias for Signkit operations.
pub type Result<T, E = SignError> = std::result::Result<T, E>;

/// Relay protocol used when none is configured.
pub const DEFAULT_RELAY_PROTOCOL: &str = "irn";

/// Addressing unit for relay traffic and storage lookups.
///
/// A topic is 32 bytes rendered as lowercase hex, either random (pairings) or
/// the SHA-256 of a key-agreement symmetric key (sessions).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    /// Wrap a topic string without validation.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Parse a topic, requiring 64 hex characters.
    pub fn parse(value: &str) -> Result<Self> {
        if value.len() != 64 || !value.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(SignError::MalformedUri(format!(
                "topic must be 64 hex characters, got {:?}",
                value
            )));
        }
        Ok(Self(value.to_ascii_lowercase()))
    }

    /// Generate a fresh random topic.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    /// Get the topic as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Topic {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An X25519 public key.
///
/// Serialized as lowercase hex, which is also how it appears on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey(pub [u8; 32]);

impl PublicKey {
    /// Parse a public key from 64 hex characters.
    pub fn from_hex(value: &str) -> Result<Self> {
        Ok(Self(decode_key_hex(value)?))
    }

    /// Hex encoding of the key.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Self::from_hex(&value).map_err(serde::de::Error::custom)
    }
}

/// A 32-byte symmetric key bound to a single topic.
///
/// Wiped from memory when dropped.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; 32]);

impl SymmetricKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Generate a fresh random key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Parse a key from 64 hex characters.
    pub fn from_hex(value: &str) -> Result<Self> {
        Ok(Self(decode_key_hex(value)?))
    }

    /// Hex encoding of the key.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey(<redacted>)")
    }
}

fn decode_key_hex(value: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(value)
        .map_err(|e| SignError::Serialization(format!("invalid key hex: {}", e)))?;
    bytes
        .try_into()
        .map_err(|_| SignError::Serialization("key must be 32 bytes".to_string()))
}

/// Absolute expiry, in unix seconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Expiry(pub i64);

impl Expiry {
    /// Expiry `ttl` from now.
    pub fn from_now(ttl: std::time::Duration) -> Self {
        Self(now_seconds() + ttl.as_secs() as i64)
    }

    /// Unix seconds.
    pub fn seconds(&self) -> i64 {
        self.0
    }

    /// True once the current time has reached the expiry.
    pub fn is_expired(&self) -> bool {
        self.0 <= now_seconds()
    }
}

/// Current unix time in seconds.
pub fn now_seconds() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Current unix time in milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Relay protocol selection carried in URIs and settle parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayProtocolOptions {
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl Default for RelayProtocolOptions {
    fn default() -> Self {
        Self {
            protocol: DEFAULT_RELAY_PROTOCOL.to_string(),
            data: None,
        }
    }
}

/// Descriptive metadata a party shares about itself.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppMetadata {
    pub name: String,
    pub description: String,
    pub url: String,
    #[serde(default)]
    pub icons: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,
}

impl AppMetadata {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_parse_rejects_short_values() {
        assert!(Topic::parse("abcd").is_err());
        let topic = Topic::generate();
        assert_eq!(Topic::parse(topic.as_str()).unwrap(), topic);
    }

    #[test]
    fn test_public_key_serializes_as_hex() {
        let key = PublicKey([7u8; 32]);
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, format!("\"{}\"", "07".repeat(32)));
        let back: PublicKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn test_symmetric_key_debug_is_redacted() {
        let key = SymmetricKey::generate();
        assert!(!format!("{:?}", key).contains(&key.to_hex()));
    }

    #[test]
    fn test_expiry() {
        assert!(Expiry(now_seconds() - 1).is_expired());
        assert!(!Expiry::from_now(std::time::Duration::from_secs(60)).is_expired());
    }
}
