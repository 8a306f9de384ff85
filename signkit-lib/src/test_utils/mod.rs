//! Test utilities for Signkit.
//!
//! - An in-process loopback relay implementing [`RelayTransport`](crate::transport::RelayTransport)
//! - Namespace fixtures shared by integration tests and the demo binary

mod fixtures;
mod loopback;

pub use fixtures::{eip155_granted, eip155_required, TEST_ACCOUNT};
pub use loopback::{LoopbackClient, LoopbackRelay};
