//! Key-value store trait definition.

use crate::error::{StorageError, StorageResult};

/// Maximum accepted key length in bytes.
const MAX_KEY_LEN: usize = 128;

/// A durable key-value store for the sync engine.
///
/// Stores are **opaque string maps**. The engine owns all interpretation of
/// values: the persisted sync snapshot lives under one key and cached entity
/// blobs under `offline_<entity>` keys.
///
/// # Invariants
///
/// - `get` returns exactly the value passed to the last successful `set`
/// - `set` replaces the whole value; a reader never observes a partial write
/// - `remove` of an absent key succeeds
/// - Stores must be `Send + Sync` so one instance can back every trigger path
///
/// # Implementors
///
/// - [`super::InMemoryStore`] - For testing
/// - [`super::FileStore`] - For persistent storage
pub trait KeyValueStore: Send + Sync {
    /// Reads the value stored under `key`, or `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or the backing medium fails.
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// After this returns successfully the value survives process
    /// termination (for durable stores).
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or the write fails.
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Removes the value under `key`. Removing an absent key is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or the removal fails.
    fn remove(&self, key: &str) -> StorageResult<()>;

    /// Returns true if a value exists under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn contains(&self, key: &str) -> StorageResult<bool> {
        Ok(self.get(key)?.is_some())
    }
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for std::sync::Arc<S> {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        (**self).remove(key)
    }
}

/// Checks that `key` is usable by every store implementation.
///
/// Keys must be 1-128 bytes of ASCII letters, digits, `_`, `-` or `.`, and
/// must not start with `.` (reserved for store bookkeeping files).
///
/// # Errors
///
/// Returns [`StorageError::InvalidKey`] describing the first violation.
pub fn validate_key(key: &str) -> StorageResult<()> {
    let invalid = |reason| StorageError::InvalidKey {
        key: key.to_string(),
        reason,
    };

    if key.is_empty() {
        return Err(invalid("key is empty"));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(invalid("key exceeds 128 bytes"));
    }
    if key.starts_with('.') {
        return Err(invalid("key must not start with '.'"));
    }
    if !key
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'))
    {
        return Err(invalid("key contains characters outside [A-Za-z0-9_.-]"));
    }
    Ok(())
}
