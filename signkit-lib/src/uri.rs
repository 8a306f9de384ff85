//! Pairing URI parsing and formatting.
//!
//! Format:
//!
//! ```text
//! wc:{topic}@2?relay-protocol={protocol}[&relay-data={data}]&symKey={64 hex}
//! ```
//!
//! The URI carries everything the second party needs to join a pairing: the
//! topic to subscribe to and the symmetric key bound to it.

use crate::{RelayProtocolOptions, Result, SignError, SymmetricKey, Topic};

const SCHEME: &str = "wc:";
const VERSION: &str = "2";

/// A parsed pairing URI.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PairingUri {
    pub topic: Topic,
    pub relay: RelayProtocolOptions,
    pub sym_key: SymmetricKey,
}

fn malformed(reason: impl Into<String>) -> SignError {
    SignError::MalformedUri(reason.into())
}

/// Parse and validate a pairing URI.
pub fn parse_pairing_uri(uri: &str) -> Result<PairingUri> {
    let uri = uri.trim();
    let rest = uri
        .strip_prefix(SCHEME)
        .ok_or_else(|| malformed("expected wc: scheme"))?;

    let (path, query) = rest
        .split_once('?')
        .ok_or_else(|| malformed("missing query parameters"))?;
    let (topic, version) = path
        .split_once('@')
        .ok_or_else(|| malformed("missing protocol version"))?;
    if version != VERSION {
        return Err(malformed(format!("unsupported version {}", version)));
    }
    let topic = Topic::parse(topic)?;

    let mut protocol = None;
    let mut data = None;
    let mut sym_key = None;
    for param in query.split('&') {
        if let Some((key, value)) = param.split_once('=') {
            match key {
                "relay-protocol" => protocol = Some(url_decode(value)?),
                "relay-data" => data = Some(url_decode(value)?),
                "symKey" => sym_key = Some(value.to_string()),
                _ => {
                    // Ignore unknown parameters
                }
            }
        }
    }

    let protocol = protocol
        .filter(|p| !p.is_empty())
        .ok_or_else(|| malformed("missing relay-protocol"))?;
    let sym_key = sym_key.ok_or_else(|| malformed("missing symKey"))?;
    if sym_key.len() != 64 {
        return Err(malformed("symKey must be 64 hex characters"));
    }
    let sym_key = SymmetricKey::from_hex(&sym_key).map_err(|e| malformed(e.to_string()))?;

    Ok(PairingUri {
        topic,
        relay: RelayProtocolOptions { protocol, data },
        sym_key,
    })
}

/// Format a pairing URI.
pub fn format_pairing_uri(uri: &PairingUri) -> String {
    let mut out = format!(
        "{}{}@{}?relay-protocol={}",
        SCHEME,
        uri.topic,
        VERSION,
        urlencoding::encode(&uri.relay.protocol)
    );
    if let Some(data) = &uri.relay.data {
        out.push_str("&relay-data=");
        out.push_str(&urlencoding::encode(data));
    }
    out.push_str("&symKey=");
    out.push_str(&uri.sym_key.to_hex());
    out
}

fn url_decode(value: &str) -> Result<String> {
    urlencoding::decode(value)
        .map(|decoded| decoded.into_owned())
        .map_err(|_| malformed("percent encoding is not UTF-8"))
}
