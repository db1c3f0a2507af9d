//! Run reports, lifecycle events and counters.

use serde::Serialize;
use syncore_protocol::SyncQueueItem;

/// Result of a call to `perform_sync`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The run finished and state was committed.
    Completed(SyncRunReport),
    /// Another run held the lock; nothing was done.
    AlreadyRunning,
}

impl SyncOutcome {
    /// Returns the report if the run completed.
    pub fn report(&self) -> Option<&SyncRunReport> {
        match self {
            SyncOutcome::Completed(report) => Some(report),
            SyncOutcome::AlreadyRunning => None,
        }
    }
}

/// Summary of a completed full sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncRunReport {
    /// Server changes fetched.
    pub fetched: usize,
    /// Offline changes taken into the run.
    pub local: usize,
    /// Changes in the applied set.
    pub applied: usize,
    /// IDs changed on both sides.
    pub conflicts: usize,
    /// IDs whose local change lost to the server.
    pub local_discarded: Vec<String>,
    /// New `last_sync_timestamp`.
    pub synced_at: i64,
}

/// Summary of one pass over the mutation queue.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueRunReport {
    /// IDs acknowledged and removed.
    pub delivered: Vec<String>,
    /// IDs that failed and stay queued.
    pub retried: Vec<String>,
    /// Items dropped after their last retry.
    pub permanently_failed: Vec<PermanentFailure>,
}

impl QueueRunReport {
    /// Number of delivery attempts made.
    pub fn attempts(&self) -> usize {
        self.delivered.len() + self.retried.len() + self.permanently_failed.len()
    }
}

/// A queue item dropped after exhausting its retries.
#[derive(Debug, Clone, PartialEq)]
pub struct PermanentFailure {
    /// The dropped item, with its final retry count.
    pub item: SyncQueueItem,
    /// The last delivery error.
    pub error: String,
}

/// Notifications broadcast by the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A full sync run acquired the lock.
    SyncStarted,
    /// A full sync run committed.
    SyncCompleted(SyncRunReport),
    /// A full sync run failed.
    SyncFailed {
        /// Failure description, as stored in the status.
        error: String,
    },
    /// A queue item was acknowledged.
    ItemDelivered {
        /// Item ID.
        id: String,
    },
    /// A queue item was dropped after its last retry.
    PermanentFailure(PermanentFailure),
}

/// Running counters, reset when the process restarts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    /// Full sync runs that committed.
    pub cycles_completed: u64,
    /// Full sync runs that failed.
    pub cycles_failed: u64,
    /// Queue items acknowledged.
    pub items_delivered: u64,
    /// Failed delivery attempts, including final ones.
    pub delivery_failures: u64,
    /// Queue items dropped after their last retry.
    pub permanent_failures: u64,
    /// Most recent error of any kind.
    pub last_error: Option<String>,
}
