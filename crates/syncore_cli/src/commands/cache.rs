//! Cache command implementation.

use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use syncore_codec::PayloadCodec;
use syncore_engine::OfflineCache;
use syncore_storage::{FileStore, KeyValueStore};

/// Runs the cache command.
pub fn run(path: &Path, entity: &str) -> Result<(), Box<dyn std::error::Error>> {
    let value = read(path, entity)?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

/// Decodes the cached blob for `entity`.
pub fn read(path: &Path, entity: &str) -> Result<Value, Box<dyn std::error::Error>> {
    let store = Arc::new(FileStore::open_read_only(path)?);
    let key = OfflineCache::<FileStore>::key(entity);
    if let Some(raw) = store.get(&key)? {
        tracing::debug!(
            key = %key,
            bytes = raw.len(),
            compressed = PayloadCodec::is_compressed(&raw),
            "read cached blob"
        );
    }

    OfflineCache::new(store, PayloadCodec::default())
        .load::<Value>(entity)?
        .ok_or_else(|| format!("No cached data for entity '{}'", entity).into())
}
