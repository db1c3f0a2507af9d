//! # Syncore Protocol
//!
//! Sync data model and conflict resolution for Syncore.
//!
//! This crate provides:
//! - `SyncQueueItem` for individually delivered local mutations
//! - `OfflineChange` for locally accumulated diffs reconciled in batches
//! - `Change` / `ChangeSet` for server-side changes
//! - `SyncStatus` for caller-observable progress
//! - `ConflictResolver` for last-writer-wins reconciliation
//!
//! This is a pure crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod conflict;
mod model;

pub use conflict::{
    resolve, ChangeOrigin, ConflictRecord, ConflictResolver, ResolvedChange, ResolvedChangeSet,
    TieBreak,
};
pub use model::{
    Change, ChangeSet, OfflineChange, ParseActionError, SyncAction, SyncQueueItem, SyncStatus,
};
