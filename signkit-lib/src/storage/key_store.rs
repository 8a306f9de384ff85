//! Secret storage keyed by topic or tag.
//!
//! The engine never reads raw key bytes from anywhere else: symmetric topic
//! keys, private halves of generated key pairs and key-agreement participant
//! records all go through a [`KeyStore`].

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use async_trait::async_trait;
use zeroize::Zeroizing;

/// Error codes for key store operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum KeyStoreErrorCode {
    /// Key not found
    NotFound = 1000,
    /// Access denied by the backing store
    AccessDenied = 2000,
    /// Invalid key format
    InvalidKey = 4000,
    /// Internal error
    Internal = 9999,
}

/// Error type for key store operations.
#[derive(Debug, Clone)]
pub struct KeyStoreError {
    pub code: KeyStoreErrorCode,
    pub message: String,
    /// Tag related to the error (if applicable)
    pub tag: Option<String>,
}

impl KeyStoreError {
    pub fn new(code: KeyStoreErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            tag: None,
        }
    }

    /// Create a "not found" error.
    pub fn not_found(tag: impl Into<String>) -> Self {
        let tag = tag.into();
        Self {
            code: KeyStoreErrorCode::NotFound,
            message: format!("Key not found: {}", tag),
            tag: Some(tag),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.code == KeyStoreErrorCode::NotFound
    }
}

impl fmt::Display for KeyStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(tag) = &self.tag {
            write!(f, "{} (tag: {})", self.message, tag)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for KeyStoreError {}

impl From<KeyStoreError> for crate::SignError {
    fn from(err: KeyStoreError) -> Self {
        if err.is_not_found() {
            crate::SignError::KeyNotFound(err.tag.unwrap_or(err.message))
        } else {
            crate::SignError::Storage(err.to_string())
        }
    }
}

/// Result type for key store operations.
pub type KeyStoreResult<T> = Result<T, KeyStoreError>;

/// Abstract secret storage.
///
/// Implementations must be safe to share across tasks. `get` returns `None`
/// for a missing tag; callers that need the key use [`KeyStore::get_required`]
/// so absence is an explicit error rather than an empty value.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Read the bytes stored under `tag`.
    async fn get(&self, tag: &str) -> KeyStoreResult<Option<Vec<u8>>>;

    /// Store `value` under `tag`, replacing any previous value.
    async fn set(&self, tag: &str, value: &[u8]) -> KeyStoreResult<()>;

    /// Delete `tag`. Fails with `NotFound` if absent.
    async fn delete(&self, tag: &str) -> KeyStoreResult<()>;

    /// Whether `tag` is present.
    async fn exists(&self, tag: &str) -> KeyStoreResult<bool>;

    /// Read a key, returning `NotFound` if it is absent.
    async fn get_required(&self, tag: &str) -> KeyStoreResult<Vec<u8>> {
        self.get(tag)
            .await?
            .ok_or_else(|| KeyStoreError::not_found(tag))
    }

    /// Delete a key if it exists (no error if missing).
    async fn delete_if_exists(&self, tag: &str) -> KeyStoreResult<()> {
        match self.delete(tag).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// In-memory key store.
///
/// Values are zeroized when overwritten, deleted or dropped. Keys do not
/// survive the process, so this is meant for tests and short-lived demos.
pub struct InMemoryKeyStore {
    keys: RwLock<HashMap<String, Zeroizing<Vec<u8>>>>,
}

fn lock_error(context: &str) -> KeyStoreError {
    KeyStoreError::new(
        KeyStoreErrorCode::Internal,
        format!("InMemoryKeyStore: lock poisoned during {}", context),
    )
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self {
            keys: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored entries. Returns 0 if the lock is poisoned.
    pub fn len(&self) -> usize {
        self.keys.read().map(|k| k.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyStore for InMemoryKeyStore {
    async fn get(&self, tag: &str) -> KeyStoreResult<Option<Vec<u8>>> {
        let keys = self.keys.read().map_err(|_| lock_error("get"))?;
        Ok(keys.get(tag).map(|value| value.to_vec()))
    }

    async fn set(&self, tag: &str, value: &[u8]) -> KeyStoreResult<()> {
        let mut keys = self.keys.write().map_err(|_| lock_error("set"))?;
        keys.insert(tag.to_string(), Zeroizing::new(value.to_vec()));
        Ok(())
    }

    async fn delete(&self, tag: &str) -> KeyStoreResult<()> {
        let mut keys = self.keys.write().map_err(|_| lock_error("delete"))?;
        match keys.remove(tag) {
            Some(_) => Ok(()),
            None => Err(KeyStoreError::not_found(tag)),
        }
    }

    async fn exists(&self, tag: &str) -> KeyStoreResult<bool> {
        let keys = self.keys.read().map_err(|_| lock_error("exists"))?;
        Ok(keys.contains_key(tag))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SignError, SignErrorCode};

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = InMemoryKeyStore::new();
        store.set("topic-a", b"secret").await.unwrap();

        assert!(store.exists("topic-a").await.unwrap());
        assert_eq!(store.get("topic-a").await.unwrap(), Some(b"secret".to_vec()));

        store.delete("topic-a").await.unwrap();
        assert!(!store.exists("topic-a").await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_missing_key_is_explicit() {
        let store = InMemoryKeyStore::new();
        assert_eq!(store.get("missing").await.unwrap(), None);

        let err = store.get_required("missing").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.tag.as_deref(), Some("missing"));

        let err: SignError = store.delete("missing").await.unwrap_err().into();
        assert_eq!(err.code(), SignErrorCode::KeyNotFound);
    }

    #[tokio::test]
    async fn test_delete_if_exists_is_lenient() {
        let store = InMemoryKeyStore::new();
        store.delete_if_exists("missing").await.unwrap();

        store.set("k", b"v").await.unwrap();
        store.delete_if_exists("k").await.unwrap();
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let store = InMemoryKeyStore::new();
        store.set("k", b"one").await.unwrap();
        store.set("k", b"two").await.unwrap();
        assert_eq!(store.get_required("k").await.unwrap(), b"two".to_vec());
        assert_eq!(store.len(), 1);
    }
}
