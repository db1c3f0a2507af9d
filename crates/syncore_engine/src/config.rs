//! Configuration for the sync engine.

use crate::error::{SyncError, SyncResult};
use std::time::Duration;
use syncore_codec::DEFAULT_COMPRESSION_THRESHOLD;
use syncore_protocol::TieBreak;

/// Default interval between periodic full syncs.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Default number of failed deliveries before a queue item is dropped.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default storage key of the persisted snapshot.
pub const DEFAULT_STATE_KEY: &str = "syncState";

/// Configuration for the sync orchestrator.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Interval between periodic full syncs.
    pub sync_interval: Duration,
    /// Failed deliveries after which a queue item is permanently dropped.
    pub max_retries: u32,
    /// Serialized size above which cached blobs are compressed.
    pub compression_threshold: usize,
    /// Winner of equal-timestamp conflicts.
    pub tie_break: TieBreak,
    /// Storage key of the persisted snapshot.
    pub state_key: String,
    /// Buffer size of the event channel.
    pub event_capacity: usize,
}

impl SyncConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            sync_interval: DEFAULT_SYNC_INTERVAL,
            max_retries: DEFAULT_MAX_RETRIES,
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
            tie_break: TieBreak::default(),
            state_key: DEFAULT_STATE_KEY.to_string(),
            event_capacity: 64,
        }
    }

    /// Sets the periodic sync interval.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Sets the retry limit for queue items.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the compression threshold for cached blobs.
    pub fn with_compression_threshold(mut self, threshold: usize) -> Self {
        self.compression_threshold = threshold;
        self
    }

    /// Sets the conflict tie-break rule.
    pub fn with_tie_break(mut self, tie_break: TieBreak) -> Self {
        self.tie_break = tie_break;
        self
    }

    /// Sets the snapshot storage key.
    pub fn with_state_key(mut self, key: impl Into<String>) -> Self {
        self.state_key = key.into();
        self
    }

    /// Sets the event channel capacity.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Checks that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidConfig`] naming the offending setting.
    pub fn validate(&self) -> SyncResult<()> {
        if self.sync_interval.is_zero() {
            return Err(SyncError::InvalidConfig(
                "sync_interval must be greater than zero".into(),
            ));
        }
        if self.max_retries == 0 {
            return Err(SyncError::InvalidConfig(
                "max_retries must be at least 1".into(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(SyncError::InvalidConfig(
                "event_capacity must be at least 1".into(),
            ));
        }
        syncore_storage::validate_key(&self.state_key)
            .map_err(|e| SyncError::InvalidConfig(e.to_string()))?;
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.sync_interval, Duration::from_secs(300));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.compression_threshold, 1024);
        assert_eq!(config.tie_break, TieBreak::PreferServer);
        assert_eq!(config.state_key, "syncState");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder() {
        let config = SyncConfig::new()
            .with_sync_interval(Duration::from_secs(30))
            .with_max_retries(5)
            .with_compression_threshold(2048)
            .with_tie_break(TieBreak::PreferLocal)
            .with_state_key("state_v2");

        assert_eq!(config.sync_interval, Duration::from_secs(30));
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.compression_threshold, 2048);
        assert_eq!(config.tie_break, TieBreak::PreferLocal);
        assert_eq!(config.state_key, "state_v2");
    }

    #[test]
    fn rejects_invalid_settings() {
        assert!(SyncConfig::new()
            .with_sync_interval(Duration::ZERO)
            .validate()
            .is_err());
        assert!(SyncConfig::new().with_max_retries(0).validate().is_err());
        assert!(SyncConfig::new().with_event_capacity(0).validate().is_err());
        assert!(matches!(
            SyncConfig::new().with_state_key("bad key").validate(),
            Err(SyncError::InvalidConfig(_))
        ));
    }
}
