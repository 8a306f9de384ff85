//! Storage boundaries: secret key store and request journal.
//!
//! Both are traits so hosts can back them with platform keychains or a
//! database. The in-memory implementations here are used by tests and demos.

mod journal;
mod key_store;

pub use journal::{Direction, InMemoryJournal, JournalEntry, RequestJournal};
pub use key_store::{
    InMemoryKeyStore, KeyStore, KeyStoreError, KeyStoreErrorCode, KeyStoreResult,
};
