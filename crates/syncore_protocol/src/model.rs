//! Sync data model.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Kind of mutation carried by a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncAction {
    /// A new record was created locally.
    Create,
    /// An existing record was modified locally.
    Update,
    /// A record was deleted locally.
    Delete,
}

impl SyncAction {
    /// Returns the lowercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncAction::Create => "create",
            SyncAction::Update => "update",
            SyncAction::Delete => "delete",
        }
    }
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown action name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown sync action {0:?} (expected create, update or delete)")]
pub struct ParseActionError(pub String);

impl FromStr for SyncAction {
    type Err = ParseActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(SyncAction::Create),
            "update" => Ok(SyncAction::Update),
            "delete" => Ok(SyncAction::Delete),
            other => Err(ParseActionError(other.to_string())),
        }
    }
}

/// A local mutation awaiting individual delivery to the remote.
///
/// Created with `retry_count == 0`; the count is only ever incremented by
/// the mutation queue after a failed delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncQueueItem {
    /// Unique item ID.
    pub id: String,
    /// Logical resource name (e.g. `"course"`).
    pub entity: String,
    /// Mutation kind.
    pub action: SyncAction,
    /// Opaque payload.
    pub data: Value,
    /// Enqueue time, epoch millis.
    pub timestamp: i64,
    /// Failed delivery attempts so far.
    #[serde(default)]
    pub retry_count: u32,
}

impl SyncQueueItem {
    /// Creates a new item with a random UUID and `retry_count == 0`.
    pub fn new(entity: impl Into<String>, action: SyncAction, data: Value, timestamp: i64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            entity: entity.into(),
            action,
            data,
            timestamp,
            retry_count: 0,
        }
    }

    /// Creates an item with a caller-chosen ID.
    pub fn with_id(
        id: impl Into<String>,
        entity: impl Into<String>,
        action: SyncAction,
        data: Value,
        timestamp: i64,
    ) -> Self {
        Self {
            id: id.into(),
            ..Self::new(entity, action, data, timestamp)
        }
    }
}

/// A locally accumulated change, reconciled only during a full sync run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineChange {
    /// ID of the changed record.
    pub id: String,
    /// Opaque diff or full record.
    pub changes: Value,
    /// Local mutation time, epoch millis.
    pub timestamp: i64,
}

impl OfflineChange {
    /// Creates a new offline change.
    pub fn new(id: impl Into<String>, changes: Value, timestamp: i64) -> Self {
        Self {
            id: id.into(),
            changes,
            timestamp,
        }
    }
}

/// A change to one record, as exchanged with the remote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    /// ID of the changed record.
    pub id: String,
    /// Opaque diff or full record. `Null` for deletions.
    pub changes: Value,
    /// Time the change was made, epoch millis.
    pub timestamp: i64,
    /// True if the change deletes the record.
    #[serde(default)]
    pub deleted: bool,
}

impl Change {
    /// Creates an upsert change.
    pub fn upsert(id: impl Into<String>, changes: Value, timestamp: i64) -> Self {
        Self {
            id: id.into(),
            changes,
            timestamp,
            deleted: false,
        }
    }

    /// Creates a deletion.
    pub fn delete(id: impl Into<String>, timestamp: i64) -> Self {
        Self {
            id: id.into(),
            changes: Value::Null,
            timestamp,
            deleted: true,
        }
    }
}

impl From<OfflineChange> for Change {
    fn from(change: OfflineChange) -> Self {
        Change::upsert(change.id, change.changes, change.timestamp)
    }
}

/// A batch of server-side changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Changes in server order.
    pub changes: Vec<Change>,
}

impl ChangeSet {
    /// Creates a change set.
    pub fn new(changes: Vec<Change>) -> Self {
        Self { changes }
    }

    /// Returns an empty change set.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of changes.
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Returns true if there are no changes.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

impl FromIterator<Change> for ChangeSet {
    fn from_iter<I: IntoIterator<Item = Change>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Caller-observable sync status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    /// Progress of the current or last run, 0-100.
    pub progress: u8,
    /// Description of the last failure, cleared when a run starts.
    pub error: Option<String>,
    /// Epoch millis of the last successful full sync.
    pub last_sync: i64,
}

impl SyncStatus {
    /// Returns true if the last run failed.
    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }
}
