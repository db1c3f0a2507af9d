//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The key cannot be stored by this backend.
    #[error("invalid storage key {key:?}: {reason}")]
    InvalidKey {
        /// The rejected key.
        key: String,
        /// Why the key was rejected.
        reason: &'static str,
    },

    /// A stored value is not valid UTF-8 or is otherwise unreadable.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// Another process holds the store's lock.
    #[error("store at {0} is locked by another process")]
    Locked(String),

    /// The store rejected the write (used by test doubles and quota limits).
    #[error("write rejected: {0}")]
    WriteRejected(String),
}
