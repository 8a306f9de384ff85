//! Signkit engine.
//!
//! Drives the pairing and session lifecycle on top of [`signkit_lib`]:
//!
//! - [`RelayerInteractor`] seals, publishes and demultiplexes relay traffic
//! - [`SignEngine`] runs the state machine and exposes the command surface
//! - [`EngineEvent`] is the single ordered stream the application consumes
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use signkit_engine::{EngineConfig, SignEngine};
//! use signkit_lib::sequence::InMemorySequenceStore;
//! use signkit_lib::storage::{InMemoryJournal, InMemoryKeyStore};
//! use signkit_lib::transport::RelayTransport;
//! use signkit_lib::AppMetadata;
//!
//! # async fn run(transport: Arc<dyn RelayTransport>) -> signkit_lib::Result<()> {
//! let engine = SignEngine::new(
//!     EngineConfig::new(AppMetadata::new("wallet", "https://wallet.example")),
//!     transport,
//!     Arc::new(InMemoryKeyStore::new()),
//!     Arc::new(InMemoryJournal::new()),
//!     Arc::new(InMemorySequenceStore::new()),
//! );
//! engine.start();
//! let pairing = engine.propose_pairing().await?;
//! println!("scan {}", pairing.uri);
//! # Ok(())
//! # }
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

mod config;
mod engine;
pub mod events;
pub mod proposals;
pub mod relayer;
mod saga;

pub use config::EngineConfig;
pub use engine::{ProposedSession, SignEngine};
pub use events::{DeleteOrigin, EngineEvent, SettleResponse, UpdateNamespacesResponse};
pub use proposals::PendingProposal;
pub use relayer::{Connectivity, Inbound, PreparedRequest, RelayerInteractor};

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
