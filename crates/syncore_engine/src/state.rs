//! Persisted sync snapshot.

use crate::error::SyncResult;
use crate::queue::MutationQueue;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use syncore_protocol::{OfflineChange, SyncStatus};
use syncore_storage::KeyValueStore;
use tracing::{debug, warn};

/// Everything the engine persists between runs.
///
/// Missing fields fall back to their defaults when loading, so older
/// snapshots stay readable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncState {
    /// Epoch millis of the last successful full sync; 0 if never.
    pub last_sync_timestamp: i64,
    /// True while a full sync run holds the lock.
    pub is_syncing: bool,
    /// Local mutations awaiting delivery.
    pub sync_queue: MutationQueue,
    /// Local diffs awaiting the next full sync.
    pub offline_changes: Vec<OfflineChange>,
    /// Caller-observable status.
    pub sync_status: SyncStatus,
}

impl SyncState {
    /// Inserts or replaces the pending change for `change.id`.
    pub fn record_offline_change(&mut self, change: OfflineChange) {
        match self.offline_changes.iter_mut().find(|c| c.id == change.id) {
            Some(existing) => *existing = change,
            None => self.offline_changes.push(change),
        }
    }
}

/// Loads and saves [`SyncState`] under a single storage key.
pub struct SyncStateStore<S> {
    store: Arc<S>,
    key: String,
}

impl<S: KeyValueStore> SyncStateStore<S> {
    /// Creates a state store over `store` using `key`.
    pub fn new(store: Arc<S>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    /// Storage key of the snapshot.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Reads the snapshot, failing on unreadable or corrupt data.
    ///
    /// Returns `Ok(None)` if nothing has been saved yet.
    pub fn try_load(&self) -> SyncResult<Option<SyncState>> {
        let Some(raw) = self.store.get(&self.key)? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    /// Reads the snapshot, falling back to a default state.
    ///
    /// Never fails: storage and parse errors are logged and treated as a
    /// fresh start. A persisted `is_syncing` flag is stale after a restart
    /// and is cleared.
    pub fn load(&self, max_retries: u32) -> SyncState {
        let mut state = match self.try_load() {
            Ok(Some(state)) => state,
            Ok(None) => {
                debug!(key = %self.key, "no saved sync state, starting fresh");
                SyncState::default()
            }
            Err(e) => {
                warn!(key = %self.key, error = %e, "failed to load sync state, starting fresh");
                SyncState::default()
            }
        };
        if state.is_syncing {
            debug!("clearing stale sync lock from previous session");
            state.is_syncing = false;
        }
        state.sync_queue.set_max_retries(max_retries);
        state
    }

    /// Persists the whole snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the storage write fails.
    pub fn save(&self, state: &SyncState) -> SyncResult<()> {
        let raw = serde_json::to_string(state)?;
        self.store.set(&self.key, &raw)?;
        Ok(())
    }
}
