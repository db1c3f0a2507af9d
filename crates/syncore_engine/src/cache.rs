//! Per-entity offline cache of arbitrary data blobs.

use crate::error::SyncResult;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use syncore_codec::PayloadCodec;
use syncore_storage::KeyValueStore;
use tracing::trace;

/// Key prefix for cached entity blobs.
pub const OFFLINE_KEY_PREFIX: &str = "offline_";

/// Caches whole entity payloads for offline reads.
///
/// Blobs are stored through [`PayloadCodec`], so large values are
/// compressed transparently.
pub struct OfflineCache<S> {
    store: Arc<S>,
    codec: PayloadCodec,
}

impl<S: KeyValueStore> OfflineCache<S> {
    /// Creates a cache over `store`.
    pub fn new(store: Arc<S>, codec: PayloadCodec) -> Self {
        Self { store, codec }
    }

    /// Storage key for `entity`.
    pub fn key(entity: &str) -> String {
        format!("{OFFLINE_KEY_PREFIX}{entity}")
    }

    /// Replaces the cached blob for `entity`.
    pub fn save<T: Serialize + ?Sized>(&self, entity: &str, data: &T) -> SyncResult<()> {
        let payload = self.codec.encode(data)?;
        trace!(
            entity,
            bytes = payload.len(),
            compressed = PayloadCodec::is_compressed(&payload),
            "caching offline data"
        );
        self.store.set(&Self::key(entity), &payload)?;
        Ok(())
    }

    /// Reads the cached blob for `entity`, or `None` if nothing is cached.
    pub fn load<T: DeserializeOwned>(&self, entity: &str) -> SyncResult<Option<T>> {
        match self.store.get(&Self::key(entity))? {
            Some(payload) => Ok(Some(self.codec.decode(&payload)?)),
            None => Ok(None),
        }
    }

    /// Drops the cached blob for `entity`.
    pub fn clear(&self, entity: &str) -> SyncResult<()> {
        self.store.remove(&Self::key(entity))?;
        Ok(())
    }
}
