//! The sync orchestrator.

use crate::cache::OfflineCache;
use crate::clock::{Clock, SystemClock};
use crate::config::SyncConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{SyncError, SyncPhase, SyncResult};
use crate::events::{
    PermanentFailure, QueueRunReport, SyncEvent, SyncOutcome, SyncRunReport, SyncStats,
};
use crate::remote::Remote;
use crate::scheduler::Scheduler;
use crate::state::{SyncState, SyncStateStore};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use syncore_codec::PayloadCodec;
use syncore_protocol::{
    ConflictResolver, OfflineChange, ResolvedChangeSet, SyncAction, SyncQueueItem, SyncStatus,
};
use syncore_storage::KeyValueStore;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

/// Coordinates full sync runs, queue delivery and offline caching.
///
/// The orchestrator is cheap to clone; clones share one state. It has
/// three kinds of trigger:
///
/// - **Full sync** via [`perform_sync`](Self::perform_sync): fetch server
///   changes, resolve them against offline changes, apply the result
/// - **Queue delivery** via [`process_sync_queue`](Self::process_sync_queue):
///   deliver queued mutations one by one with bounded retries
/// - **Scheduling** via [`start`](Self::start): periodic full syncs and
///   queue delivery when connectivity returns
///
/// # Invariants
///
/// - At most one full sync run is in progress at a time
/// - Every state mutation is persisted before the operation returns
/// - The in-memory state lock is never held across an `.await`
///
/// # Example
///
/// ```rust,ignore
/// let orchestrator = SyncOrchestrator::new(config, store, remote, connectivity)?;
/// orchestrator.enqueue_sync_item("course", SyncAction::Create, json!({ "title": "Rust" }))?;
/// orchestrator.perform_sync().await?;
/// ```
pub struct SyncOrchestrator<S, R, C> {
    inner: Arc<Inner<S, R, C>>,
}

impl<S, R, C> Clone for SyncOrchestrator<S, R, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<S, R, C> {
    config: SyncConfig,
    states: SyncStateStore<S>,
    cache: OfflineCache<S>,
    remote: Arc<R>,
    connectivity: Arc<C>,
    clock: Arc<dyn Clock>,
    resolver: ConflictResolver,
    state: Mutex<SyncState>,
    /// Queue item IDs currently being sent by some pass.
    in_flight: Mutex<HashSet<String>>,
    status_tx: watch::Sender<SyncStatus>,
    events: broadcast::Sender<SyncEvent>,
    stats: RwLock<SyncStats>,
    scheduler: Mutex<Option<Scheduler>>,
}

/// Non-owning handle used by background tasks.
pub(crate) struct WeakOrchestrator<S, R, C> {
    inner: Weak<Inner<S, R, C>>,
}

impl<S, R, C> Clone for WeakOrchestrator<S, R, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<S, R, C> WeakOrchestrator<S, R, C> {
    pub(crate) fn upgrade(&self) -> Option<SyncOrchestrator<S, R, C>> {
        self.inner.upgrade().map(|inner| SyncOrchestrator { inner })
    }
}

/// What the fetch/resolve/apply phases produced.
struct RunOutput {
    fetched: usize,
    local: Vec<OfflineChange>,
    resolved: ResolvedChangeSet,
}

/// Error reported for items dropped without a new attempt.
const RETRY_LIMIT_REACHED: &str = "retry limit reached";

enum DeliveryFailure {
    Gone,
    Retry(u32),
    Exhausted(SyncQueueItem),
}

impl<S, R, C> SyncOrchestrator<S, R, C>
where
    S: KeyValueStore + 'static,
    R: Remote + 'static,
    C: ConnectivityMonitor + 'static,
{
    /// Creates an orchestrator using the system clock.
    ///
    /// Loads the persisted snapshot from `store`. A missing or unreadable
    /// snapshot starts from a fresh state.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidConfig`] if `config` is invalid.
    pub fn new(
        config: SyncConfig,
        store: Arc<S>,
        remote: Arc<R>,
        connectivity: Arc<C>,
    ) -> SyncResult<Self> {
        Self::with_clock(config, store, remote, connectivity, Arc::new(SystemClock))
    }

    /// Creates an orchestrator with a custom clock.
    pub fn with_clock(
        config: SyncConfig,
        store: Arc<S>,
        remote: Arc<R>,
        connectivity: Arc<C>,
        clock: Arc<dyn Clock>,
    ) -> SyncResult<Self> {
        config.validate()?;

        let states = SyncStateStore::new(Arc::clone(&store), config.state_key.clone());
        let cache = OfflineCache::new(store, PayloadCodec::new(config.compression_threshold));
        let state = states.load(config.max_retries);
        debug!(
            last_sync = state.last_sync_timestamp,
            queued = state.sync_queue.len(),
            offline_changes = state.offline_changes.len(),
            "loaded sync state"
        );

        let (status_tx, _) = watch::channel(state.sync_status.clone());
        let (events, _) = broadcast::channel(config.event_capacity);

        Ok(Self {
            inner: Arc::new(Inner {
                resolver: ConflictResolver::new(config.tie_break),
                config,
                states,
                cache,
                remote,
                connectivity,
                clock,
                state: Mutex::new(state),
                in_flight: Mutex::new(HashSet::new()),
                status_tx,
                events,
                stats: RwLock::new(SyncStats::default()),
                scheduler: Mutex::new(None),
            }),
        })
    }

    /// Runs one full sync.
    ///
    /// Returns [`SyncOutcome::AlreadyRunning`] without side effects if
    /// another run holds the lock.
    ///
    /// On success the offline changes taken into the run are cleared,
    /// `last_sync_timestamp` advances and progress is 100. Changes recorded
    /// while the run was in flight are kept for the next run.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::SyncRun`] if fetching or applying fails, after
    /// recording the failure in the status. Returns a storage error if the
    /// state cannot be persisted.
    pub async fn perform_sync(&self) -> SyncResult<SyncOutcome> {
        let inner = &*self.inner;
        let Some(lock) = SyncLock::acquire(inner)? else {
            debug!("sync already in progress, skipping");
            return Ok(SyncOutcome::AlreadyRunning);
        };
        info!("starting sync");
        inner.emit(SyncEvent::SyncStarted);

        let output = match self.run_phases().await {
            Ok(output) => output,
            Err(err) => {
                let message = err.to_string();
                let saved = lock.release(|state| state.sync_status.error = Some(message.clone()));
                self.record_run_failure(message);
                if let Err(save_err) = saved {
                    warn!(error = %save_err, "failed to persist sync failure");
                    inner.stats.write().last_error =
                        Some(format!("failed to persist sync failure: {save_err}"));
                }
                return Err(err);
            }
        };

        let committed = lock.release(|state| {
            let synced_at = inner
                .clock
                .now_millis()
                .max(state.last_sync_timestamp.saturating_add(1));
            state
                .offline_changes
                .retain(|change| !output.local.contains(change));
            state.last_sync_timestamp = synced_at;
            state.sync_status = SyncStatus {
                progress: 100,
                error: None,
                last_sync: synced_at,
            };
            SyncRunReport {
                fetched: output.fetched,
                local: output.local.len(),
                applied: output.resolved.len(),
                conflicts: output.resolved.conflicts.len(),
                local_discarded: output
                    .resolved
                    .discarded_local()
                    .map(String::from)
                    .collect(),
                synced_at,
            }
        });

        match committed {
            Ok(report) => {
                info!(
                    fetched = report.fetched,
                    applied = report.applied,
                    conflicts = report.conflicts,
                    synced_at = report.synced_at,
                    "sync completed"
                );
                inner.stats.write().cycles_completed += 1;
                inner.emit(SyncEvent::SyncCompleted(report.clone()));
                Ok(SyncOutcome::Completed(report))
            }
            Err(err) => {
                warn!(error = %err, "failed to persist sync result");
                self.record_run_failure(err.to_string());
                Err(err)
            }
        }
    }

    async fn run_phases(&self) -> SyncResult<RunOutput> {
        let inner = &*self.inner;
        let (since, local) = {
            let state = inner.state.lock();
            (state.last_sync_timestamp, state.offline_changes.clone())
        };

        debug!(since, "fetching server changes");
        let server = inner
            .remote
            .fetch_changes_since(since)
            .await
            .map_err(|e| SyncError::run(SyncPhase::Fetch, e))?;

        let resolved = inner.resolver.resolve(&server.changes, &local);
        debug!(
            server = server.len(),
            local = local.len(),
            resolved = resolved.len(),
            conflicts = resolved.conflicts.len(),
            "resolved changes"
        );

        inner
            .remote
            .apply_change_set(&resolved)
            .await
            .map_err(|e| SyncError::run(SyncPhase::Apply, e))?;

        Ok(RunOutput {
            fetched: server.len(),
            local,
            resolved,
        })
    }

    fn record_run_failure(&self, message: String) {
        {
            let mut stats = self.inner.stats.write();
            stats.cycles_failed += 1;
            stats.last_error = Some(message.clone());
        }
        self.inner.emit(SyncEvent::SyncFailed { error: message });
    }

    /// Queues a local mutation for individual delivery.
    ///
    /// The item is persisted before this returns. If the remote is
    /// reachable, a queue pass is started in the background on the
    /// current tokio runtime; the caller never waits for delivery.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the queue cannot be persisted.
    pub fn enqueue_sync_item(
        &self,
        entity: impl Into<String>,
        action: SyncAction,
        data: Value,
    ) -> SyncResult<SyncQueueItem> {
        let item = SyncQueueItem::new(entity, action, data, self.inner.clock.now_millis());
        self.inner
            .commit(|state| state.sync_queue.enqueue(item.clone()))?;
        debug!(id = %item.id, entity = %item.entity, action = %item.action, "queued sync item");

        if self.inner.connectivity.current_status() {
            self.spawn_queue_pass();
        }
        Ok(item)
    }

    fn spawn_queue_pass(&self) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("no tokio runtime, queued item waits for the next trigger");
            return;
        };
        let this = self.clone();
        handle.spawn(async move {
            if let Err(e) = this.process_sync_queue().await {
                warn!(error = %e, "background queue processing failed");
            }
        });
    }

    /// Delivers every processable queue item once, in enqueue order.
    ///
    /// Acknowledged items are removed. A failed item has its retry count
    /// incremented and is dropped (with a [`SyncEvent::PermanentFailure`])
    /// once it reaches the retry limit. Items already at the limit when the
    /// pass starts, e.g. after reloading with a lower limit, are dropped and
    /// reported without another attempt.
    ///
    /// Passes may overlap. An item being sent by one pass is skipped by the
    /// others, and items removed by a concurrent pass are skipped.
    ///
    /// # Errors
    ///
    /// Returns a storage error if a queue update cannot be persisted; the
    /// pass stops at that item.
    pub async fn process_sync_queue(&self) -> SyncResult<QueueRunReport> {
        let inner = &*self.inner;
        let mut report = QueueRunReport::default();
        self.drop_exhausted(&mut report)?;

        let items = inner.state.lock().sync_queue.processable_items();
        if items.is_empty() {
            return Ok(report);
        }
        debug!(count = items.len(), "processing sync queue");

        for snapshot in items {
            let Some(_claim) = InFlightClaim::new(&inner.in_flight, &snapshot.id) else {
                debug!(id = %snapshot.id, "sync item in flight elsewhere, skipping");
                continue;
            };
            let current = inner.state.lock().sync_queue.get(&snapshot.id).cloned();
            let Some(item) = current else {
                continue;
            };

            match inner.remote.send_queue_item(&item).await {
                Ok(()) => {
                    inner.commit(|state| state.sync_queue.remove(&item.id))?;
                    debug!(id = %item.id, "delivered sync item");
                    inner.stats.write().items_delivered += 1;
                    inner.emit(SyncEvent::ItemDelivered {
                        id: item.id.clone(),
                    });
                    report.delivered.push(item.id);
                }
                Err(err) => {
                    let error = err.to_string();
                    let failure = inner.commit(|state| {
                        let queue = &mut state.sync_queue;
                        let Some(count) = queue.increment_retry(&item.id) else {
                            return DeliveryFailure::Gone;
                        };
                        if queue.is_exhausted(&item.id) {
                            match queue.remove(&item.id) {
                                Some(dropped) => DeliveryFailure::Exhausted(dropped),
                                None => DeliveryFailure::Gone,
                            }
                        } else {
                            DeliveryFailure::Retry(count)
                        }
                    })?;

                    match failure {
                        DeliveryFailure::Gone => {
                            debug!(id = %item.id, error = %error, "sync item removed during failed delivery");
                        }
                        DeliveryFailure::Retry(count) => {
                            debug!(id = %item.id, retry_count = count, error = %error, "sync item delivery failed");
                            self.record_delivery_failure(&error);
                            report.retried.push(item.id);
                        }
                        DeliveryFailure::Exhausted(dropped) => {
                            warn!(
                                id = %dropped.id,
                                entity = %dropped.entity,
                                retry_count = dropped.retry_count,
                                error = %error,
                                "dropping sync item after final retry"
                            );
                            self.record_delivery_failure(&error);
                            self.record_permanent_failure(dropped, error, &mut report);
                        }
                    }
                }
            }
        }

        debug!(
            delivered = report.delivered.len(),
            retried = report.retried.len(),
            dropped = report.permanently_failed.len(),
            "sync queue pass finished"
        );
        Ok(report)
    }

    /// Removes items that already used up their retries and reports them.
    fn drop_exhausted(&self, report: &mut QueueRunReport) -> SyncResult<()> {
        let inner = &*self.inner;
        let limit = {
            let state = inner.state.lock();
            let queue = &state.sync_queue;
            if !queue.items().iter().any(|i| i.retry_count >= queue.max_retries()) {
                return Ok(());
            }
            queue.max_retries()
        };

        let dropped = inner.commit(|state| state.sync_queue.take_exhausted())?;
        for item in dropped {
            warn!(
                id = %item.id,
                entity = %item.entity,
                retry_count = item.retry_count,
                max_retries = limit,
                "dropping sync item at retry limit"
            );
            self.record_permanent_failure(item, RETRY_LIMIT_REACHED.to_string(), report);
        }
        Ok(())
    }

    fn record_delivery_failure(&self, error: &str) {
        let mut stats = self.inner.stats.write();
        stats.delivery_failures += 1;
        stats.last_error = Some(error.to_string());
    }

    fn record_permanent_failure(
        &self,
        item: SyncQueueItem,
        error: String,
        report: &mut QueueRunReport,
    ) {
        self.inner.stats.write().permanent_failures += 1;
        let failure = PermanentFailure { item, error };
        self.inner.emit(SyncEvent::PermanentFailure(failure.clone()));
        report.permanently_failed.push(failure);
    }

    /// Records a local diff for the next full sync.
    ///
    /// Replaces any pending change with the same ID.
    pub fn record_offline_change(
        &self,
        id: impl Into<String>,
        changes: Value,
    ) -> SyncResult<OfflineChange> {
        let change = OfflineChange::new(id, changes, self.inner.clock.now_millis());
        self.inner
            .commit(|state| state.record_offline_change(change.clone()))?;
        Ok(change)
    }

    /// Caches `data` for offline reads of `entity`.
    pub fn cache_offline_data<T: Serialize + ?Sized>(&self, entity: &str, data: &T) -> SyncResult<()> {
        self.inner.cache.save(entity, data)
    }

    /// Reads cached data for `entity`, or `None` if nothing is cached.
    pub fn load_offline_data<T: DeserializeOwned>(&self, entity: &str) -> SyncResult<Option<T>> {
        self.inner.cache.load(entity)
    }

    /// Drops cached data for `entity`.
    pub fn clear_offline_data(&self, entity: &str) -> SyncResult<()> {
        self.inner.cache.clear(entity)
    }

    /// Starts periodic syncs and reconnect-triggered queue delivery.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::AlreadyStarted`] if already running, or
    /// [`SyncError::NoRuntime`] outside a tokio runtime.
    pub fn start(&self) -> SyncResult<()> {
        let mut slot = self.inner.scheduler.lock();
        if slot.is_some() {
            return Err(SyncError::AlreadyStarted);
        }
        let handle = tokio::runtime::Handle::try_current().map_err(|_| SyncError::NoRuntime)?;
        *slot = Some(Scheduler::spawn(
            &handle,
            self.downgrade(),
            self.inner.config.sync_interval,
            self.inner.connectivity.subscribe(),
        ));
        info!(interval = ?self.inner.config.sync_interval, "sync scheduler started");
        Ok(())
    }

    /// Stops the scheduler, waiting for an in-flight run to finish.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotStarted`] if the scheduler is not running.
    pub async fn stop(&self) -> SyncResult<()> {
        let scheduler = self
            .inner
            .scheduler
            .lock()
            .take()
            .ok_or(SyncError::NotStarted)?;
        scheduler.shutdown().await;
        info!("sync scheduler stopped");
        Ok(())
    }

    /// Returns true if the scheduler is running.
    pub fn is_started(&self) -> bool {
        self.inner.scheduler.lock().is_some()
    }

    fn downgrade(&self) -> WeakOrchestrator<S, R, C> {
        WeakOrchestrator {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl<S, R, C> SyncOrchestrator<S, R, C> {
    /// Current status.
    pub fn status(&self) -> SyncStatus {
        self.inner.state.lock().sync_status.clone()
    }

    /// Subscribes to status changes.
    pub fn status_receiver(&self) -> watch::Receiver<SyncStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Subscribes to lifecycle events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    /// Copy of the in-memory state.
    pub fn state_snapshot(&self) -> SyncState {
        self.inner.state.lock().clone()
    }

    /// Returns true while a full sync run holds the lock.
    pub fn is_syncing(&self) -> bool {
        self.inner.state.lock().is_syncing
    }

    /// Number of queued mutations.
    pub fn queue_len(&self) -> usize {
        self.inner.state.lock().sync_queue.len()
    }

    /// Running counters.
    pub fn stats(&self) -> SyncStats {
        self.inner.stats.read().clone()
    }

    /// Active configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }
}

impl<S: KeyValueStore, R, C> Inner<S, R, C> {
    /// Applies `f` to the state, publishes the status and persists.
    ///
    /// The in-memory change is kept even if persisting fails.
    fn commit<T>(&self, f: impl FnOnce(&mut SyncState) -> T) -> SyncResult<T> {
        let mut state = self.state.lock();
        let out = f(&mut state);
        let status = state.sync_status.clone();
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
        self.states.save(&state)?;
        Ok(out)
    }
}

impl<S, R, C> Inner<S, R, C> {
    fn emit(&self, event: SyncEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }
}

/// Exclusive hold on the full-sync lock.
///
/// Released explicitly on the normal paths; dropping it unreleased (early
/// return, panic or a cancelled future) clears the flag as a fallback.
struct SyncLock<'a, S: KeyValueStore, R, C> {
    inner: &'a Inner<S, R, C>,
    held: bool,
}

impl<'a, S: KeyValueStore, R, C> SyncLock<'a, S, R, C> {
    fn acquire(inner: &'a Inner<S, R, C>) -> SyncResult<Option<Self>> {
        {
            let mut state = inner.state.lock();
            if state.is_syncing {
                return Ok(None);
            }
            state.is_syncing = true;
            state.sync_status.progress = 0;
            state.sync_status.error = None;
        }
        let lock = Self { inner, held: true };
        inner.commit(|_| ())?;
        Ok(Some(lock))
    }

    fn release<T>(mut self, f: impl FnOnce(&mut SyncState) -> T) -> SyncResult<T> {
        self.held = false;
        self.inner.commit(|state| {
            let out = f(state);
            state.is_syncing = false;
            out
        })
    }
}

impl<S: KeyValueStore, R, C> Drop for SyncLock<'_, S, R, C> {
    fn drop(&mut self) {
        if !self.held {
            return;
        }
        if let Err(e) = self.inner.commit(|state| state.is_syncing = false) {
            warn!(error = %e, "failed to persist sync lock release");
        }
    }
}

/// Exclusive claim on one queue item for the duration of a send.
///
/// Dropping the claim (including when the pass future is cancelled)
/// releases it.
struct InFlightClaim<'a> {
    set: &'a Mutex<HashSet<String>>,
    id: String,
}

impl<'a> InFlightClaim<'a> {
    /// Returns `None` if another pass holds the item.
    fn new(set: &'a Mutex<HashSet<String>>, id: &str) -> Option<Self> {
        if !set.lock().insert(id.to_string()) {
            return None;
        }
        Some(Self {
            set,
            id: id.to_string(),
        })
    }
}

impl Drop for InFlightClaim<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.id);
    }
}
