//! Envelope crypto: key management and authenticated encryption.

mod codec;
pub mod envelope;
mod keys;

pub use codec::Codec;
pub use envelope::{EnvelopeError, EnvelopeType};
pub use keys::{derive_symmetric_key, topic_for_key, KeyManagement};
