//! End-to-end tests for the sync orchestrator.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use syncore_codec::PayloadCodec;
use syncore_engine::{
    Change, ChangeOrigin, ChangeSet, ManualClock, ManualConnectivity, MockRemote, Remote,
    RemoteError, ResolvedChangeSet, SyncAction, SyncConfig, SyncEvent, SyncOrchestrator,
    SyncOutcome, SyncQueueItem, SyncStateStore,
};
use syncore_storage::{FileStore, InMemoryStore, KeyValueStore};
use tokio::sync::{Notify, Semaphore};

/// A remote whose fetch blocks until the test opens the gate.
struct GatedRemote {
    inner: MockRemote,
    entered: Notify,
    gate: Semaphore,
}

impl GatedRemote {
    fn new() -> Self {
        Self {
            inner: MockRemote::new(),
            entered: Notify::new(),
            gate: Semaphore::new(0),
        }
    }

    fn open(&self) {
        self.gate.add_permits(1);
    }
}

#[async_trait]
impl Remote for GatedRemote {
    async fn fetch_changes_since(&self, timestamp: i64) -> Result<ChangeSet, RemoteError> {
        self.entered.notify_one();
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| RemoteError::transport(e.to_string()))?;
        self.inner.fetch_changes_since(timestamp).await
    }

    async fn apply_change_set(&self, changes: &ResolvedChangeSet) -> Result<(), RemoteError> {
        self.inner.apply_change_set(changes).await
    }

    async fn send_queue_item(&self, item: &SyncQueueItem) -> Result<(), RemoteError> {
        self.inner.send_queue_item(item).await
    }
}

/// A remote that yields to the scheduler before every call.
struct YieldingRemote {
    inner: MockRemote,
}

#[async_trait]
impl Remote for YieldingRemote {
    async fn fetch_changes_since(&self, timestamp: i64) -> Result<ChangeSet, RemoteError> {
        tokio::task::yield_now().await;
        self.inner.fetch_changes_since(timestamp).await
    }

    async fn apply_change_set(&self, changes: &ResolvedChangeSet) -> Result<(), RemoteError> {
        tokio::task::yield_now().await;
        self.inner.apply_change_set(changes).await
    }

    async fn send_queue_item(&self, item: &SyncQueueItem) -> Result<(), RemoteError> {
        tokio::task::yield_now().await;
        self.inner.send_queue_item(item).await
    }
}

fn orchestrator<R: Remote + 'static>(
    remote: Arc<R>,
    connectivity: Arc<ManualConnectivity>,
) -> SyncOrchestrator<InMemoryStore, R, ManualConnectivity> {
    SyncOrchestrator::with_clock(
        SyncConfig::default(),
        Arc::new(InMemoryStore::new()),
        remote,
        connectivity,
        Arc::new(ManualClock::new(10_000)),
    )
    .unwrap()
}

async fn next_matching(
    events: &mut tokio::sync::broadcast::Receiver<SyncEvent>,
    pred: impl Fn(&SyncEvent) -> bool,
) -> SyncEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.unwrap();
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

#[tokio::test]
async fn enqueue_appends_one_item_and_persists() {
    let store = Arc::new(InMemoryStore::new());
    let orchestrator = SyncOrchestrator::new(
        SyncConfig::default(),
        Arc::clone(&store),
        Arc::new(MockRemote::new()),
        Arc::new(ManualConnectivity::new(false)),
    )
    .unwrap();

    let item = orchestrator
        .enqueue_sync_item("course", SyncAction::Create, json!({ "title": "Rust" }))
        .unwrap();

    let persisted = SyncStateStore::new(Arc::clone(&store), "syncState")
        .try_load()
        .unwrap()
        .unwrap();
    assert_eq!(persisted.sync_queue.len(), 1);
    assert_eq!(persisted.sync_queue.items()[0], item);
    assert_eq!(persisted.sync_queue.items()[0].retry_count, 0);
}

#[tokio::test]
async fn concurrent_perform_sync_runs_once() {
    let remote = Arc::new(GatedRemote::new());
    let orchestrator = orchestrator(Arc::clone(&remote), Arc::new(ManualConnectivity::new(false)));

    let background = orchestrator.clone();
    let first = tokio::spawn(async move { background.perform_sync().await });

    remote.entered.notified().await;
    assert!(orchestrator.is_syncing());
    assert_eq!(
        orchestrator.perform_sync().await.unwrap(),
        SyncOutcome::AlreadyRunning
    );

    remote.open();
    let first = first.await.unwrap().unwrap();
    assert!(matches!(first, SyncOutcome::Completed(_)));
    assert_eq!(remote.inner.fetch_calls().len(), 1);
    assert!(!orchestrator.is_syncing());
}

#[tokio::test]
async fn cancelled_run_releases_lock() {
    let remote = Arc::new(GatedRemote::new());
    let orchestrator = orchestrator(Arc::clone(&remote), Arc::new(ManualConnectivity::new(false)));

    let background = orchestrator.clone();
    let run = tokio::spawn(async move { background.perform_sync().await });
    remote.entered.notified().await;
    assert!(orchestrator.is_syncing());

    run.abort();
    assert!(run.await.unwrap_err().is_cancelled());
    assert!(!orchestrator.is_syncing());
    assert!(!orchestrator.state_snapshot().is_syncing);
}

#[tokio::test]
async fn item_failing_three_times_is_dropped_once() {
    let remote = Arc::new(MockRemote::new());
    let orchestrator = orchestrator(Arc::clone(&remote), Arc::new(ManualConnectivity::new(false)));
    remote.fail_sends(Some(RemoteError::server("unavailable")));
    let mut events = orchestrator.subscribe_events();

    orchestrator
        .enqueue_sync_item("lesson", SyncAction::Update, json!({ "id": 7 }))
        .unwrap();

    let mut dropped = Vec::new();
    for _ in 0..5 {
        let report = orchestrator.process_sync_queue().await.unwrap();
        dropped.extend(report.permanently_failed);
    }

    assert_eq!(remote.send_attempts(), 3);
    assert_eq!(dropped.len(), 1);
    assert_eq!(dropped[0].item.retry_count, 3);
    assert!(dropped[0].error.contains("unavailable"));
    assert_eq!(orchestrator.queue_len(), 0);

    let mut permanent = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, SyncEvent::PermanentFailure(_)) {
            permanent += 1;
        }
    }
    assert_eq!(permanent, 1);
}

#[tokio::test]
async fn queue_pass_does_not_short_circuit() {
    let remote = Arc::new(MockRemote::new());
    let orchestrator = orchestrator(Arc::clone(&remote), Arc::new(ManualConnectivity::new(false)));

    let first = orchestrator
        .enqueue_sync_item("course", SyncAction::Create, json!(1))
        .unwrap();
    let second = orchestrator
        .enqueue_sync_item("course", SyncAction::Create, json!(2))
        .unwrap();
    let third = orchestrator
        .enqueue_sync_item("course", SyncAction::Create, json!(3))
        .unwrap();
    remote.fail_item(second.id.clone());

    let report = orchestrator.process_sync_queue().await.unwrap();
    assert_eq!(report.delivered, vec![first.id.clone(), third.id.clone()]);
    assert_eq!(report.retried, vec![second.id.clone()]);

    let delivered: Vec<_> = remote.delivered().into_iter().map(|i| i.id).collect();
    assert_eq!(delivered, vec![first.id, third.id]);
    assert_eq!(orchestrator.queue_len(), 1);
}

#[tokio::test]
async fn successful_sync_advances_timestamp_and_clears_changes() {
    let remote = Arc::new(MockRemote::new());
    let orchestrator = orchestrator(Arc::clone(&remote), Arc::new(ManualConnectivity::new(false)));
    orchestrator
        .record_offline_change("c1", json!({ "title": "draft" }))
        .unwrap();
    orchestrator
        .record_offline_change("c2", json!({ "title": "notes" }))
        .unwrap();

    let before = orchestrator.state_snapshot().last_sync_timestamp;
    orchestrator.perform_sync().await.unwrap();
    let state = orchestrator.state_snapshot();

    assert!(state.last_sync_timestamp > before);
    assert!(state.offline_changes.is_empty());
    assert_eq!(state.sync_status.progress, 100);
    assert_eq!(state.sync_status.last_sync, state.last_sync_timestamp);
    assert_eq!(remote.applied()[0].len(), 2);
}

#[tokio::test]
async fn failed_sync_keeps_timestamp_and_changes() {
    let remote = Arc::new(MockRemote::new());
    let orchestrator = orchestrator(Arc::clone(&remote), Arc::new(ManualConnectivity::new(false)));
    orchestrator.record_offline_change("c1", json!(1)).unwrap();
    remote.fail_apply(Some(RemoteError::rejected("schema mismatch")));
    let mut events = orchestrator.subscribe_events();

    assert!(orchestrator.perform_sync().await.is_err());

    let state = orchestrator.state_snapshot();
    assert_eq!(state.last_sync_timestamp, 0);
    assert_eq!(state.offline_changes.len(), 1);
    assert!(state
        .sync_status
        .error
        .as_deref()
        .unwrap()
        .contains("schema mismatch"));
    assert!(!state.is_syncing);

    let failed = next_matching(&mut events, |e| matches!(e, SyncEvent::SyncFailed { .. })).await;
    assert!(matches!(failed, SyncEvent::SyncFailed { error } if error.contains("schema mismatch")));
}

#[tokio::test]
async fn newer_offline_change_wins_over_server() {
    let remote = Arc::new(MockRemote::new());
    let orchestrator = orchestrator(Arc::clone(&remote), Arc::new(ManualConnectivity::new(false)));
    remote.set_server_changes(ChangeSet::new(vec![Change::upsert(
        "course-1",
        json!({ "title": "server" }),
        5_000,
    )]));
    orchestrator
        .record_offline_change("course-1", json!({ "title": "local" }))
        .unwrap();

    let outcome = orchestrator.perform_sync().await.unwrap();
    assert_eq!(outcome.report().unwrap().conflicts, 1);

    let applied = remote.applied();
    let resolved = applied[0].get("course-1").unwrap();
    assert_eq!(resolved.origin, ChangeOrigin::Local);
    assert_eq!(resolved.change.changes, json!({ "title": "local" }));
}

#[tokio::test]
async fn later_server_change_wins_over_local() {
    let remote = Arc::new(MockRemote::new());
    let orchestrator = orchestrator(Arc::clone(&remote), Arc::new(ManualConnectivity::new(false)));
    orchestrator
        .record_offline_change("course-1", json!({ "title": "local" }))
        .unwrap();
    remote.set_server_changes(ChangeSet::new(vec![Change::upsert(
        "course-1",
        json!({ "title": "server" }),
        20_000,
    )]));

    let outcome = orchestrator.perform_sync().await.unwrap();
    assert_eq!(
        outcome.report().unwrap().local_discarded,
        vec!["course-1".to_string()]
    );
    let applied = remote.applied();
    assert_eq!(
        applied[0].get("course-1").unwrap().origin,
        ChangeOrigin::Server
    );
}

#[tokio::test]
async fn enqueue_while_disconnected_does_not_deliver() {
    let remote = Arc::new(MockRemote::new());
    let orchestrator = orchestrator(Arc::clone(&remote), Arc::new(ManualConnectivity::new(false)));

    orchestrator
        .enqueue_sync_item("course", SyncAction::Create, json!({}))
        .unwrap();
    tokio::task::yield_now().await;

    assert_eq!(remote.send_attempts(), 0);
    assert_eq!(orchestrator.queue_len(), 1);
}

#[tokio::test]
async fn enqueue_while_connected_delivers_in_background() {
    let remote = Arc::new(MockRemote::new());
    let orchestrator = orchestrator(Arc::clone(&remote), Arc::new(ManualConnectivity::new(true)));
    let mut events = orchestrator.subscribe_events();

    let item = orchestrator
        .enqueue_sync_item("course", SyncAction::Create, json!({}))
        .unwrap();

    let delivered =
        next_matching(&mut events, |e| matches!(e, SyncEvent::ItemDelivered { .. })).await;
    assert_eq!(delivered, SyncEvent::ItemDelivered { id: item.id });
    assert_eq!(orchestrator.queue_len(), 0);
}

#[tokio::test]
async fn overlapping_background_passes_send_each_item_once() {
    let remote = Arc::new(YieldingRemote {
        inner: MockRemote::new(),
    });
    let orchestrator = orchestrator(Arc::clone(&remote), Arc::new(ManualConnectivity::new(true)));
    let mut events = orchestrator.subscribe_events();

    let first = orchestrator
        .enqueue_sync_item("course", SyncAction::Create, json!({ "n": 1 }))
        .unwrap();
    let second = orchestrator
        .enqueue_sync_item("course", SyncAction::Create, json!({ "n": 2 }))
        .unwrap();
    for _ in 0..2 {
        next_matching(&mut events, |e| matches!(e, SyncEvent::ItemDelivered { .. })).await;
    }
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }

    let mut delivered: Vec<_> = remote.inner.delivered().into_iter().map(|i| i.id).collect();
    delivered.sort();
    let mut expected = vec![first.id, second.id];
    expected.sort();
    assert_eq!(delivered, expected);
    assert_eq!(remote.inner.send_attempts(), 2);
    assert_eq!(orchestrator.queue_len(), 0);
    assert_eq!(orchestrator.stats().items_delivered, 2);
}

#[tokio::test]
async fn joined_passes_stop_at_retry_limit() {
    let remote = Arc::new(YieldingRemote {
        inner: MockRemote::new(),
    });
    let orchestrator = orchestrator(Arc::clone(&remote), Arc::new(ManualConnectivity::new(false)));
    let item = orchestrator
        .enqueue_sync_item("course", SyncAction::Update, json!({}))
        .unwrap();
    remote.inner.fail_item(item.id.clone());
    for _ in 0..2 {
        orchestrator.process_sync_queue().await.unwrap();
    }

    let (a, b) = tokio::join!(
        orchestrator.process_sync_queue(),
        orchestrator.process_sync_queue()
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(remote.inner.send_attempts(), 3);
    assert_eq!(a.attempts() + b.attempts(), 1);
    assert_eq!(a.permanently_failed.len() + b.permanently_failed.len(), 1);
    assert_eq!(orchestrator.queue_len(), 0);

    let stats = orchestrator.stats();
    assert_eq!(stats.delivery_failures, 3);
    assert_eq!(stats.permanent_failures, 1);
}

#[tokio::test]
async fn reconnect_delivers_queued_item() {
    let remote = Arc::new(MockRemote::new());
    let connectivity = Arc::new(ManualConnectivity::new(false));
    let orchestrator = orchestrator(Arc::clone(&remote), Arc::clone(&connectivity));

    let item = orchestrator
        .enqueue_sync_item("course", SyncAction::Update, json!({ "id": 3 }))
        .unwrap();
    let mut events = orchestrator.subscribe_events();
    orchestrator.start().unwrap();

    connectivity.set_connected(true);
    let delivered =
        next_matching(&mut events, |e| matches!(e, SyncEvent::ItemDelivered { .. })).await;

    assert_eq!(delivered, SyncEvent::ItemDelivered { id: item.id.clone() });
    assert_eq!(orchestrator.queue_len(), 0);
    assert_eq!(remote.delivered()[0].id, item.id);
    orchestrator.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn periodic_sync_fires_on_interval() {
    let remote = Arc::new(MockRemote::new());
    let orchestrator = orchestrator(Arc::clone(&remote), Arc::new(ManualConnectivity::new(false)));
    orchestrator.start().unwrap();

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(remote.fetch_calls().is_empty());

    tokio::time::sleep(Duration::from_secs(250)).await;
    assert_eq!(remote.fetch_calls().len(), 1);

    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(remote.fetch_calls().len(), 2);
    assert_eq!(orchestrator.stats().cycles_completed, 2);

    orchestrator.stop().await.unwrap();
    tokio::time::sleep(Duration::from_secs(900)).await;
    assert_eq!(remote.fetch_calls().len(), 2);
}

#[test]
fn large_cached_payload_is_stored_smaller() {
    let store = Arc::new(InMemoryStore::new());
    let orchestrator = SyncOrchestrator::new(
        SyncConfig::default(),
        Arc::clone(&store),
        Arc::new(MockRemote::new()),
        Arc::new(ManualConnectivity::new(false)),
    )
    .unwrap();

    let lessons: Vec<Value> = (0..60)
        .map(|i| json!({ "id": i, "title": format!("Lesson {i}"), "done": i % 2 == 0 }))
        .collect();
    let raw_json = serde_json::to_string(&lessons).unwrap();
    assert!(raw_json.len() >= 2000);

    orchestrator.cache_offline_data("lessons", &lessons).unwrap();

    let stored = store.get("offline_lessons").unwrap().unwrap();
    assert!(PayloadCodec::is_compressed(&stored));
    assert!(stored.len() < raw_json.len());
    assert_eq!(
        orchestrator
            .load_offline_data::<Vec<Value>>("lessons")
            .unwrap(),
        Some(lessons)
    );
}

#[test]
fn state_survives_restart_on_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let item_id;
    {
        let store = Arc::new(FileStore::open(dir.path()).unwrap());
        let orchestrator = SyncOrchestrator::new(
            SyncConfig::default(),
            store,
            Arc::new(MockRemote::new()),
            Arc::new(ManualConnectivity::new(false)),
        )
        .unwrap();
        item_id = orchestrator
            .enqueue_sync_item("course", SyncAction::Delete, json!({ "id": 1 }))
            .unwrap()
            .id;
        orchestrator
            .record_offline_change("course-2", json!({ "title": "kept" }))
            .unwrap();
    }

    let store = Arc::new(FileStore::open(dir.path()).unwrap());
    let orchestrator = SyncOrchestrator::new(
        SyncConfig::default(),
        store,
        Arc::new(MockRemote::new()),
        Arc::new(ManualConnectivity::new(false)),
    )
    .unwrap();
    let state = orchestrator.state_snapshot();
    assert_eq!(state.sync_queue.items()[0].id, item_id);
    assert_eq!(state.offline_changes[0].id, "course-2");
}
