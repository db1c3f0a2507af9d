//! Inspect command implementation.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use syncore_engine::{SyncState, SyncStateStore, OFFLINE_KEY_PREFIX};
use syncore_storage::FileStore;
use tracing::debug;

/// Snapshot inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Snapshot key.
    pub key: String,
    /// True if a snapshot was found.
    pub has_snapshot: bool,
    /// Epoch millis of the last successful sync.
    pub last_sync_timestamp: i64,
    /// Persisted lock flag. Stale if no process holds the store.
    pub is_syncing: bool,
    /// Progress of the last run.
    pub progress: u8,
    /// Error of the last run.
    pub error: Option<String>,
    /// Number of queued mutations.
    pub queue_len: usize,
    /// Queued mutations per entity.
    pub queue_by_entity: BTreeMap<String, usize>,
    /// Queued mutations that already failed at least once.
    pub retrying: usize,
    /// Number of pending offline changes.
    pub offline_changes: usize,
    /// Entities with cached blobs.
    pub cached_entities: Vec<String>,
    /// Queued items (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<QueuedItem>>,
}

/// One queued mutation.
#[derive(Debug, Serialize)]
pub struct QueuedItem {
    /// Item ID.
    pub id: String,
    /// Entity name.
    pub entity: String,
    /// Mutation kind.
    pub action: String,
    /// Enqueue time, epoch millis.
    pub timestamp: i64,
    /// Failed attempts so far.
    pub retry_count: u32,
}

/// Runs the inspect command.
pub fn run(
    path: &Path,
    key: &str,
    show_items: bool,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let result = collect(path, key, show_items)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Reads the store and builds the summary.
pub fn collect(
    path: &Path,
    key: &str,
    show_items: bool,
) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let store = Arc::new(FileStore::open_read_only(path)?);
    let cached_entities = store
        .keys()?
        .into_iter()
        .filter_map(|k| k.strip_prefix(OFFLINE_KEY_PREFIX).map(str::to_string))
        .collect();

    let loaded = SyncStateStore::new(Arc::clone(&store), key).try_load()?;
    let has_snapshot = loaded.is_some();
    let state = loaded.unwrap_or_default();
    debug!(has_snapshot, key, "read sync snapshot");

    Ok(summarize(path, key, has_snapshot, &state, cached_entities, show_items))
}

fn summarize(
    path: &Path,
    key: &str,
    has_snapshot: bool,
    state: &SyncState,
    cached_entities: Vec<String>,
    show_items: bool,
) -> InspectResult {
    let queue = state.sync_queue.items();
    let mut queue_by_entity = BTreeMap::new();
    for item in queue {
        *queue_by_entity.entry(item.entity.clone()).or_insert(0) += 1;
    }

    let items = show_items.then(|| {
        queue
            .iter()
            .map(|item| QueuedItem {
                id: item.id.clone(),
                entity: item.entity.clone(),
                action: item.action.to_string(),
                timestamp: item.timestamp,
                retry_count: item.retry_count,
            })
            .collect()
    });

    InspectResult {
        path: path.display().to_string(),
        key: key.to_string(),
        has_snapshot,
        last_sync_timestamp: state.last_sync_timestamp,
        is_syncing: state.is_syncing,
        progress: state.sync_status.progress,
        error: state.sync_status.error.clone(),
        queue_len: queue.len(),
        queue_by_entity,
        retrying: queue.iter().filter(|i| i.retry_count > 0).count(),
        offline_changes: state.offline_changes.len(),
        cached_entities,
        items,
    }
}

fn print_text_output(result: &InspectResult) {
    println!("Sync Store Inspection");
    println!("=====================");
    println!();
    println!("Path: {}", result.path);
    println!("Key:  {}", result.key);
    println!();

    if !result.has_snapshot {
        println!("No sync snapshot found.");
        println!();
    }

    println!("Status:");
    println!("  Last sync:     {}", format_timestamp(result.last_sync_timestamp));
    println!("  Progress:      {}%", result.progress);
    println!(
        "  Error:         {}",
        result.error.as_deref().unwrap_or("none")
    );
    if result.is_syncing {
        println!("  Lock:          held (stale unless a process is running)");
    }
    println!();

    println!("Pending:");
    println!("  Queued items:    {}", result.queue_len);
    println!("  Retrying:        {}", result.retrying);
    println!("  Offline changes: {}", result.offline_changes);
    for (entity, count) in &result.queue_by_entity {
        println!("    {:<16} {}", entity, count);
    }

    if let Some(items) = &result.items {
        println!();
        println!("Queue:");
        for item in items {
            println!(
                "  {} {:<8} {:<16} retries={} at={}",
                item.id, item.action, item.entity, item.retry_count, item.timestamp
            );
        }
    }

    println!();
    println!("Cached entities: {}", result.cached_entities.len());
    for entity in &result.cached_entities {
        println!("  {}", entity);
    }
}

fn format_timestamp(millis: i64) -> String {
    if millis == 0 {
        "never".to_string()
    } else {
        format!("{} (epoch ms)", millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use syncore_engine::{OfflineChange, SyncAction, SyncQueueItem};
    use syncore_storage::KeyValueStore;

    #[test]
    fn summarizes_saved_state() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = Arc::new(FileStore::open(dir.path()).unwrap());
            let mut state = SyncState {
                last_sync_timestamp: 1_700_000_000_000,
                ..SyncState::default()
            };
            state.sync_queue.enqueue(SyncQueueItem::with_id(
                "q1",
                "course",
                SyncAction::Create,
                json!({}),
                1,
            ));
            state.sync_queue.enqueue(SyncQueueItem::with_id(
                "q2",
                "lesson",
                SyncAction::Delete,
                json!({}),
                2,
            ));
            state.sync_queue.increment_retry("q2");
            state.record_offline_change(OfflineChange::new("c1", json!(1), 3));
            SyncStateStore::new(Arc::clone(&store), "syncState")
                .save(&state)
                .unwrap();
            store.set("offline_courses", "[]").unwrap();
        }

        let result = collect(dir.path(), "syncState", true).unwrap();
        assert!(result.has_snapshot);
        assert_eq!(result.queue_len, 2);
        assert_eq!(result.retrying, 1);
        assert_eq!(result.offline_changes, 1);
        assert_eq!(result.queue_by_entity.get("lesson"), Some(&1));
        assert_eq!(result.cached_entities, vec!["courses".to_string()]);
        assert_eq!(result.items.unwrap()[1].action, "delete");
    }

    #[test]
    fn empty_store_has_no_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let result = collect(dir.path(), "syncState", false).unwrap();
        assert!(!result.has_snapshot);
        assert_eq!(result.queue_len, 0);
        assert!(result.items.is_none());
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(collect(&dir.path().join("absent"), "syncState", false).is_err());
    }
}
