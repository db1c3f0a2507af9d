//! Remote endpoint abstraction for sync operations.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use syncore_protocol::{ChangeSet, ResolvedChangeSet, SyncQueueItem};
use thiserror::Error;

/// Errors reported by a [`Remote`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The remote cannot be reached.
    #[error("not connected to remote")]
    NotConnected,

    /// Network or transport failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The remote refused the request.
    #[error("remote rejected request: {0}")]
    Rejected(String),

    /// The remote failed while handling the request.
    #[error("server error: {0}")]
    Server(String),
}

impl RemoteError {
    /// Creates a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Creates a rejection error.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }

    /// Creates a server error.
    pub fn server(message: impl Into<String>) -> Self {
        Self::Server(message.into())
    }
}

/// The remote source of truth.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (HTTP, WebSocket, mock for testing, etc.). Calls are
/// expected to be bounded by the implementation; the engine adds no
/// timeouts of its own.
#[async_trait]
pub trait Remote: Send + Sync {
    /// Fetches server-side changes made after `timestamp` (epoch millis).
    async fn fetch_changes_since(&self, timestamp: i64) -> Result<ChangeSet, RemoteError>;

    /// Applies a resolved change set.
    async fn apply_change_set(&self, changes: &ResolvedChangeSet) -> Result<(), RemoteError>;

    /// Delivers one queued mutation. `Ok` is an acknowledgement.
    async fn send_queue_item(&self, item: &SyncQueueItem) -> Result<(), RemoteError>;
}

#[async_trait]
impl<R: Remote + ?Sized> Remote for std::sync::Arc<R> {
    async fn fetch_changes_since(&self, timestamp: i64) -> Result<ChangeSet, RemoteError> {
        (**self).fetch_changes_since(timestamp).await
    }

    async fn apply_change_set(&self, changes: &ResolvedChangeSet) -> Result<(), RemoteError> {
        (**self).apply_change_set(changes).await
    }

    async fn send_queue_item(&self, item: &SyncQueueItem) -> Result<(), RemoteError> {
        (**self).send_queue_item(item).await
    }
}

/// A scriptable remote for testing.
///
/// Records every call and fails on demand.
#[derive(Debug)]
pub struct MockRemote {
    connected: AtomicBool,
    server_changes: Mutex<ChangeSet>,
    fetch_error: Mutex<Option<RemoteError>>,
    apply_error: Mutex<Option<RemoteError>>,
    send_error: Mutex<Option<RemoteError>>,
    failing_items: Mutex<HashSet<String>>,
    fetch_calls: Mutex<Vec<i64>>,
    applied: Mutex<Vec<ResolvedChangeSet>>,
    delivered: Mutex<Vec<SyncQueueItem>>,
    send_attempts: AtomicUsize,
}

impl MockRemote {
    /// Creates a connected mock with no server changes.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            server_changes: Mutex::new(ChangeSet::empty()),
            fetch_error: Mutex::new(None),
            apply_error: Mutex::new(None),
            send_error: Mutex::new(None),
            failing_items: Mutex::new(HashSet::new()),
            fetch_calls: Mutex::new(Vec::new()),
            applied: Mutex::new(Vec::new()),
            delivered: Mutex::new(Vec::new()),
            send_attempts: AtomicUsize::new(0),
        }
    }

    /// Sets the changes returned by `fetch_changes_since`.
    pub fn set_server_changes(&self, changes: ChangeSet) {
        *self.server_changes.lock() = changes;
    }

    /// Makes `fetch_changes_since` fail (or succeed again with `None`).
    pub fn fail_fetch(&self, error: Option<RemoteError>) {
        *self.fetch_error.lock() = error;
    }

    /// Makes `apply_change_set` fail (or succeed again with `None`).
    pub fn fail_apply(&self, error: Option<RemoteError>) {
        *self.apply_error.lock() = error;
    }

    /// Makes every `send_queue_item` fail (or succeed again with `None`).
    pub fn fail_sends(&self, error: Option<RemoteError>) {
        *self.send_error.lock() = error;
    }

    /// Makes deliveries of the item with `id` fail.
    pub fn fail_item(&self, id: impl Into<String>) {
        self.failing_items.lock().insert(id.into());
    }

    /// Sets the connected state. A disconnected mock fails every call.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Timestamps passed to `fetch_changes_since`, in call order.
    pub fn fetch_calls(&self) -> Vec<i64> {
        self.fetch_calls.lock().clone()
    }

    /// Change sets accepted by `apply_change_set`.
    pub fn applied(&self) -> Vec<ResolvedChangeSet> {
        self.applied.lock().clone()
    }

    /// Items acknowledged by `send_queue_item`, in delivery order.
    pub fn delivered(&self) -> Vec<SyncQueueItem> {
        self.delivered.lock().clone()
    }

    /// Number of `send_queue_item` calls, successful or not.
    pub fn send_attempts(&self) -> usize {
        self.send_attempts.load(Ordering::SeqCst)
    }

    fn check_connected(&self) -> Result<(), RemoteError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RemoteError::NotConnected)
        }
    }
}

impl Default for MockRemote {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Remote for MockRemote {
    async fn fetch_changes_since(&self, timestamp: i64) -> Result<ChangeSet, RemoteError> {
        self.fetch_calls.lock().push(timestamp);
        self.check_connected()?;
        if let Some(error) = self.fetch_error.lock().clone() {
            return Err(error);
        }
        let changes = self.server_changes.lock();
        Ok(changes
            .changes
            .iter()
            .filter(|c| c.timestamp > timestamp)
            .cloned()
            .collect())
    }

    async fn apply_change_set(&self, changes: &ResolvedChangeSet) -> Result<(), RemoteError> {
        self.check_connected()?;
        if let Some(error) = self.apply_error.lock().clone() {
            return Err(error);
        }
        self.applied.lock().push(changes.clone());
        Ok(())
    }

    async fn send_queue_item(&self, item: &SyncQueueItem) -> Result<(), RemoteError> {
        self.send_attempts.fetch_add(1, Ordering::SeqCst);
        self.check_connected()?;
        if let Some(error) = self.send_error.lock().clone() {
            return Err(error);
        }
        if self.failing_items.lock().contains(&item.id) {
            return Err(RemoteError::rejected(format!("item {} refused", item.id)));
        }
        self.delivered.lock().push(item.clone());
        Ok(())
    }
}
