use std::time::Duration;

use super::params::{ClientParams, PairingParams, SessionParams};

const FIVE_MINUTES: u64 = 300;
const THIRTY_SECONDS: u64 = 30;
const ONE_DAY: u64 = 86_400;

/// Relay-level publish metadata: method tag, message TTL and push hint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IridiumParams {
    pub tag: u32,
    pub ttl: Duration,
    pub prompt: bool,
}

impl IridiumParams {
    pub const fn new(tag: u32, ttl_seconds: u64, prompt: bool) -> Self {
        Self {
            tag,
            ttl: Duration::from_secs(ttl_seconds),
            prompt,
        }
    }

    /// Metadata for publishing a request with these params.
    pub fn for_request(params: &ClientParams) -> Self {
        match params {
            ClientParams::Pairing(PairingParams::Delete(_)) => Self::new(1000, ONE_DAY, false),
            ClientParams::Pairing(PairingParams::Ping(_)) => Self::new(1002, THIRTY_SECONDS, false),
            ClientParams::Pairing(PairingParams::SessionPropose(_)) => {
                Self::new(1100, FIVE_MINUTES, true)
            }
            ClientParams::Session(SessionParams::Settle(_)) => Self::new(1102, FIVE_MINUTES, false),
            ClientParams::Session(SessionParams::Update(_)) => Self::new(1104, ONE_DAY, false),
            ClientParams::Session(SessionParams::Extend(_)) => Self::new(1106, ONE_DAY, false),
            ClientParams::Session(SessionParams::Request(_)) => Self::new(1108, FIVE_MINUTES, true),
            ClientParams::Session(SessionParams::Event(_)) => Self::new(1110, FIVE_MINUTES, true),
            ClientParams::Session(SessionParams::Delete(_)) => Self::new(1112, ONE_DAY, false),
            ClientParams::Session(SessionParams::Ping(_)) => Self::new(1114, THIRTY_SECONDS, false),
        }
    }

    /// Metadata for publishing the response to a request with these params.
    ///
    /// Response tags are the request tag plus one; responses never prompt.
    pub fn for_response(params: &ClientParams) -> Self {
        let request = Self::for_request(params);
        Self {
            tag: request.tag + 1,
            ttl: request.ttl,
            prompt: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::params::{DeleteParams, PingParams};

    #[test]
    fn test_response_tags_follow_requests() {
        let delete = ClientParams::Session(SessionParams::Delete(DeleteParams {
            code: 6000,
            message: "User disconnected".into(),
        }));
        assert_eq!(IridiumParams::for_request(&delete), IridiumParams::new(1112, 86_400, false));
        assert_eq!(IridiumParams::for_response(&delete).tag, 1113);

        let ping = ClientParams::Pairing(PairingParams::Ping(PingParams::default()));
        assert_eq!(IridiumParams::for_response(&ping).ttl, Duration::from_secs(30));
    }
}
