//! Error types for the sync engine.

use crate::remote::RemoteError;
use std::fmt;
use syncore_codec::CodecError;
use syncore_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Phase of a full sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// Fetching server-side changes.
    Fetch,
    /// Applying the resolved change set.
    Apply,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncPhase::Fetch => f.write_str("fetch"),
            SyncPhase::Apply => f.write_str("apply"),
        }
    }
}

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Loading or saving persisted state failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Encoding or decoding a cached payload failed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The state snapshot could not be serialized or parsed.
    #[error("snapshot error: {0}")]
    Snapshot(#[from] serde_json::Error),

    /// A full sync run was aborted.
    #[error("sync run failed during {phase}: {source}")]
    SyncRun {
        /// Phase that failed.
        phase: SyncPhase,
        /// Underlying remote failure.
        #[source]
        source: RemoteError,
    },

    /// The scheduler is already running.
    #[error("sync scheduler is already started")]
    AlreadyStarted,

    /// The scheduler is not running.
    #[error("sync scheduler is not started")]
    NotStarted,

    /// No tokio runtime is available to spawn background work.
    #[error("no tokio runtime available")]
    NoRuntime,

    /// The configuration is invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SyncError {
    /// Creates a sync run error for the given phase.
    pub fn run(phase: SyncPhase, source: RemoteError) -> Self {
        Self::SyncRun { phase, source }
    }

    /// Returns true if this error came from persisting state.
    pub fn is_storage(&self) -> bool {
        matches!(self, SyncError::Storage(_) | SyncError::Snapshot(_))
    }
}
