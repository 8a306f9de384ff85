//! ChaCha20-Poly1305 envelopes for relay payloads.
//!
//! # Wire Format
//!
//! ```text
//! type 0: [0x00][12 bytes nonce][N bytes ciphertext][16 bytes auth tag]
//! type 1: [0x01][32 bytes sender public key][12 bytes nonce][ciphertext + tag]
//! ```
//!
//! The header (type byte, plus the sender key for type 1) is authenticated as
//! associated data. The whole envelope travels base64-encoded.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;

use crate::{PublicKey, SymmetricKey};

/// Size of the nonce in bytes.
pub const NONCE_SIZE: usize = 12;

/// Size of the authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

const KEY_SIZE: usize = 32;

/// Envelope types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnvelopeType {
    /// Symmetric key already shared on both sides.
    Type0,
    /// Carries the sender public key so the receiver can finish key agreement.
    Type1 { sender: PublicKey },
}

impl EnvelopeType {
    pub fn tag(&self) -> u8 {
        match self {
            Self::Type0 => 0,
            Self::Type1 { .. } => 1,
        }
    }

    fn header(&self) -> Vec<u8> {
        match self {
            Self::Type0 => vec![0],
            Self::Type1 { sender } => {
                let mut header = Vec::with_capacity(1 + KEY_SIZE);
                header.push(1);
                header.extend_from_slice(sender.as_bytes());
                header
            }
        }
    }
}

/// Envelope error types.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("Encryption failed: {0}")]
    EncryptFailed(String),
    #[error("Decryption failed: authentication tag mismatch")]
    AuthenticationFailed,
    #[error("Invalid envelope format")]
    InvalidFormat,
    #[error("Unsupported envelope type: {0}")]
    UnsupportedType(u8),
    #[error("Invalid base64: {0}")]
    Encoding(String),
}

impl From<EnvelopeError> for crate::SignError {
    fn from(err: EnvelopeError) -> Self {
        crate::SignError::Decryption(err.to_string())
    }
}

/// A decoded envelope before decryption.
#[derive(Debug)]
pub struct OpenedHeader<'a> {
    pub envelope_type: EnvelopeType,
    header: &'a [u8],
    nonce: &'a [u8],
    sealed: &'a [u8],
}

/// Encrypt `plaintext` and return the base64 envelope.
pub fn seal(
    key: &SymmetricKey,
    plaintext: &[u8],
    envelope_type: EnvelopeType,
) -> Result<String, EnvelopeError> {
    let cipher = ChaCha20Poly1305::new_from_slice(key.as_bytes())
        .map_err(|e| EnvelopeError::EncryptFailed(e.to_string()))?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let header = envelope_type.header();
    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad: &header,
            },
        )
        .map_err(|e| EnvelopeError::EncryptFailed(e.to_string()))?;

    let mut out = Vec::with_capacity(header.len() + NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&header);
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(STANDARD.encode(out))
}

/// Decode base64 into raw envelope bytes.
pub fn decode(envelope: &str) -> Result<Vec<u8>, EnvelopeError> {
    STANDARD
        .decode(envelope.trim())
        .map_err(|e| EnvelopeError::Encoding(e.to_string()))
}

/// Split raw envelope bytes into header, nonce and ciphertext.
pub fn split(bytes: &[u8]) -> Result<OpenedHeader<'_>, EnvelopeError> {
    let (&type_byte, _) = bytes.split_first().ok_or(EnvelopeError::InvalidFormat)?;
    let (envelope_type, header_len) = match type_byte {
        0 => (EnvelopeType::Type0, 1),
        1 => {
            let key: [u8; KEY_SIZE] = bytes
                .get(1..1 + KEY_SIZE)
                .and_then(|k| k.try_into().ok())
                .ok_or(EnvelopeError::InvalidFormat)?;
            (
                EnvelopeType::Type1 {
                    sender: PublicKey(key),
                },
                1 + KEY_SIZE,
            )
        }
        other => return Err(EnvelopeError::UnsupportedType(other)),
    };

    if bytes.len() < header_len + NONCE_SIZE + TAG_SIZE {
        return Err(EnvelopeError::InvalidFormat);
    }

    Ok(OpenedHeader {
        envelope_type,
        header: &bytes[..header_len],
        nonce: &bytes[header_len..header_len + NONCE_SIZE],
        sealed: &bytes[header_len + NONCE_SIZE..],
    })
}

/// Authenticate and decrypt a split envelope.
pub fn open(key: &SymmetricKey, parts: &OpenedHeader<'_>) -> Result<Vec<u8>, EnvelopeError> {
    let cipher = ChaCha20Poly1305::new_from_slice(key.as_bytes())
        .map_err(|_| EnvelopeError::InvalidFormat)?;
    cipher
        .decrypt(
            Nonce::from_slice(parts.nonce),
            Payload {
                msg: parts.sealed,
                aad: parts.header,
            },
        )
        .map_err(|_| EnvelopeError::AuthenticationFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_str(key: &SymmetricKey, envelope: &str) -> Result<Vec<u8>, EnvelopeError> {
        let bytes = decode(envelope)?;
        let parts = split(&bytes)?;
        open(key, &parts)
    }

    #[test]
    fn test_type0_roundtrip() {
        let key = SymmetricKey::generate();
        let sealed = seal(&key, b"{\"id\":1}", EnvelopeType::Type0).unwrap();
        assert_eq!(open_str(&key, &sealed).unwrap(), b"{\"id\":1}");
    }

    #[test]
    fn test_type1_exposes_sender() {
        let key = SymmetricKey::generate();
        let sender = PublicKey([9u8; 32]);
        let sealed = seal(&key, b"hello", EnvelopeType::Type1 { sender }).unwrap();

        let bytes = decode(&sealed).unwrap();
        let parts = split(&bytes).unwrap();
        assert_eq!(parts.envelope_type, EnvelopeType::Type1 { sender });
        assert_eq!(open(&key, &parts).unwrap(), b"hello");
    }

    #[test]
    fn test_wrong_key_fails_authentication() {
        let sealed = seal(&SymmetricKey::generate(), b"data", EnvelopeType::Type0).unwrap();
        let result = open_str(&SymmetricKey::generate(), &sealed);
        assert!(matches!(result, Err(EnvelopeError::AuthenticationFailed)));
    }

    #[test]
    fn test_tampered_header_fails_authentication() {
        let key = SymmetricKey::generate();
        let sealed = seal(
            &key,
            b"data",
            EnvelopeType::Type1 {
                sender: PublicKey([1u8; 32]),
            },
        )
        .unwrap();

        let mut bytes = decode(&sealed).unwrap();
        bytes[5] ^= 0xff;
        let parts = split(&bytes).unwrap();
        assert!(matches!(
            open(&key, &parts),
            Err(EnvelopeError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_invalid_format() {
        assert!(matches!(split(&[]), Err(EnvelopeError::InvalidFormat)));
        assert!(matches!(split(&[0u8; 10]), Err(EnvelopeError::InvalidFormat)));
        assert!(matches!(
            split(&[7u8; 64]),
            Err(EnvelopeError::UnsupportedType(7))
        ));
        assert!(matches!(decode("not base64!"), Err(EnvelopeError::Encoding(_))));
    }
}
