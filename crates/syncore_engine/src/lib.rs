//! # Syncore Engine
//!
//! Offline-first sync orchestration for Syncore.
//!
//! This crate ties the lower layers together:
//!
//! - Persists a single [`SyncState`] snapshot through a
//!   [`KeyValueStore`](syncore_storage::KeyValueStore)
//! - Delivers queued mutations one by one with bounded retries
//! - Runs full syncs: fetch server changes, resolve conflicts against
//!   offline changes (last writer wins), apply the result
//! - Schedules periodic syncs and redelivers the queue when
//!   connectivity returns
//! - Caches entity blobs for offline reads, compressing large ones
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │             SyncOrchestrator             │
//! │   perform_sync · process_sync_queue      │
//! ├──────────────┬──────────────┬────────────┤
//! │ SyncState-   │ Conflict-    │ Offline-   │
//! │ Store        │ Resolver     │ Cache      │
//! ├──────────────┴──────────────┴────────────┤
//! │   Remote · ConnectivityMonitor · Clock   │
//! └──────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use syncore_engine::{ManualConnectivity, MockRemote, SyncConfig, SyncOrchestrator};
//! use syncore_storage::FileStore;
//!
//! let store = Arc::new(FileStore::open(Path::new("./sync-data"))?);
//! let orchestrator = SyncOrchestrator::new(
//!     SyncConfig::default(),
//!     store,
//!     Arc::new(MockRemote::new()),
//!     Arc::new(ManualConnectivity::new(true)),
//! )?;
//! orchestrator.start()?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod clock;
mod config;
mod connectivity;
mod error;
mod events;
mod orchestrator;
mod queue;
mod remote;
mod scheduler;
mod state;

pub use cache::{OfflineCache, OFFLINE_KEY_PREFIX};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{SyncConfig, DEFAULT_MAX_RETRIES, DEFAULT_STATE_KEY, DEFAULT_SYNC_INTERVAL};
pub use connectivity::{ConnectivityMonitor, ManualConnectivity};
pub use error::{SyncError, SyncPhase, SyncResult};
pub use events::{
    PermanentFailure, QueueRunReport, SyncEvent, SyncOutcome, SyncRunReport, SyncStats,
};
pub use orchestrator::SyncOrchestrator;
pub use queue::MutationQueue;
pub use remote::{MockRemote, Remote, RemoteError};
pub use state::{SyncState, SyncStateStore};

// Re-export commonly used types from dependencies
pub use syncore_protocol::{
    Change, ChangeOrigin, ChangeSet, OfflineChange, ResolvedChangeSet, SyncAction, SyncQueueItem,
    SyncStatus, TieBreak,
};
