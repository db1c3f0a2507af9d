//! Ordered queue of local mutations awaiting delivery.

use crate::config::DEFAULT_MAX_RETRIES;
use serde::{Deserialize, Serialize};
use syncore_protocol::SyncQueueItem;

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

/// FIFO queue of [`SyncQueueItem`]s with bounded retries.
///
/// Serializes as a plain array of items. The retry limit is runtime
/// configuration and is not persisted.
///
/// # Invariants
///
/// - Items keep enqueue order
/// - Item IDs are unique
/// - `retry_count` never exceeds the retry limit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MutationQueue {
    items: Vec<SyncQueueItem>,
    #[serde(skip, default = "default_max_retries")]
    max_retries: u32,
}

impl MutationQueue {
    /// Creates an empty queue.
    pub fn new(max_retries: u32) -> Self {
        Self {
            items: Vec::new(),
            max_retries,
        }
    }

    /// Retry limit for items in this queue.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Replaces the retry limit, clamping existing counts to it.
    pub fn set_max_retries(&mut self, max_retries: u32) {
        self.max_retries = max_retries;
        for item in &mut self.items {
            item.retry_count = item.retry_count.min(max_retries);
        }
    }

    /// Appends an item. An item with the same ID is replaced in place.
    pub fn enqueue(&mut self, mut item: SyncQueueItem) {
        item.retry_count = item.retry_count.min(self.max_retries);
        match self.items.iter_mut().find(|i| i.id == item.id) {
            Some(existing) => *existing = item,
            None => self.items.push(item),
        }
    }

    /// Items still eligible for delivery, in enqueue order.
    pub fn processable_items(&self) -> Vec<SyncQueueItem> {
        self.items
            .iter()
            .filter(|i| i.retry_count < self.max_retries)
            .cloned()
            .collect()
    }

    /// Looks up an item by ID.
    pub fn get(&self, id: &str) -> Option<&SyncQueueItem> {
        self.items.iter().find(|i| i.id == id)
    }

    /// Removes an item. Returns `None` if it was not queued.
    pub fn remove(&mut self, id: &str) -> Option<SyncQueueItem> {
        let pos = self.items.iter().position(|i| i.id == id)?;
        Some(self.items.remove(pos))
    }

    /// Records one failed delivery, returning the new count.
    ///
    /// Returns `None` if the item is not queued.
    pub fn increment_retry(&mut self, id: &str) -> Option<u32> {
        let max = self.max_retries;
        let item = self.items.iter_mut().find(|i| i.id == id)?;
        item.retry_count = item.retry_count.saturating_add(1).min(max);
        Some(item.retry_count)
    }

    /// Returns true if the item has used up its retries.
    pub fn is_exhausted(&self, id: &str) -> bool {
        self.get(id)
            .map(|i| i.retry_count >= self.max_retries)
            .unwrap_or(false)
    }

    /// Removes every item that has used up its retries, in enqueue order.
    ///
    /// Items reach this state when the limit is lowered on reload.
    pub fn take_exhausted(&mut self) -> Vec<SyncQueueItem> {
        let max = self.max_retries;
        let (exhausted, kept) = std::mem::take(&mut self.items)
            .into_iter()
            .partition(|i| i.retry_count >= max);
        self.items = kept;
        exhausted
    }

    /// All items in enqueue order.
    pub fn items(&self) -> &[SyncQueueItem] {
        &self.items
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl Default for MutationQueue {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use syncore_protocol::SyncAction;

    fn item(id: &str, ts: i64) -> SyncQueueItem {
        SyncQueueItem::with_id(id, "course", SyncAction::Update, json!({ "n": ts }), ts)
    }

    #[test]
    fn fifo_order() {
        let mut queue = MutationQueue::new(3);
        queue.enqueue(item("b", 2));
        queue.enqueue(item("a", 1));
        queue.enqueue(item("c", 3));

        let ids: Vec<_> = queue.processable_items().into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[test]
    fn duplicate_id_replaces_in_place() {
        let mut queue = MutationQueue::new(3);
        queue.enqueue(item("a", 1));
        queue.enqueue(item("b", 2));
        queue.enqueue(item("a", 9));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.items()[0].id, "a");
        assert_eq!(queue.items()[0].timestamp, 9);
    }

    #[test]
    fn retries_are_bounded() {
        let mut queue = MutationQueue::new(2);
        queue.enqueue(item("a", 1));

        assert_eq!(queue.increment_retry("a"), Some(1));
        assert!(!queue.is_exhausted("a"));
        assert_eq!(queue.increment_retry("a"), Some(2));
        assert!(queue.is_exhausted("a"));
        assert_eq!(queue.increment_retry("a"), Some(2));
        assert!(queue.processable_items().is_empty());

        assert_eq!(queue.increment_retry("missing"), None);
        assert!(!queue.is_exhausted("missing"));
    }

    #[test]
    fn remove_is_idempotent() {
        let mut queue = MutationQueue::new(3);
        queue.enqueue(item("a", 1));

        assert!(queue.remove("a").is_some());
        assert!(queue.remove("a").is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn lowering_limit_clamps_counts() {
        let mut queue = MutationQueue::new(5);
        queue.enqueue(item("a", 1));
        for _ in 0..4 {
            queue.increment_retry("a");
        }
        queue.set_max_retries(2);
        assert_eq!(queue.get("a").map(|i| i.retry_count), Some(2));
        assert!(queue.is_exhausted("a"));
    }

    #[test]
    fn take_exhausted_keeps_live_items() {
        let mut queue = MutationQueue::new(5);
        queue.enqueue(item("a", 1));
        queue.enqueue(item("b", 2));
        queue.enqueue(item("c", 3));
        for _ in 0..3 {
            queue.increment_retry("a");
            queue.increment_retry("c");
        }
        queue.increment_retry("b");
        queue.set_max_retries(2);

        let dropped: Vec<_> = queue.take_exhausted().into_iter().map(|i| i.id).collect();
        assert_eq!(dropped, vec!["a", "c"]);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.items()[0].id, "b");
        assert!(queue.take_exhausted().is_empty());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Enqueue(u8),
        Fail(u8),
        Remove(u8),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..6).prop_map(Op::Enqueue),
            (0u8..6).prop_map(Op::Fail),
            (0u8..6).prop_map(Op::Remove),
        ]
    }

    proptest! {
        #[test]
        fn invariants_hold_under_any_sequence(
            max in 1u32..5,
            ops in prop::collection::vec(op(), 0..64),
        ) {
            let mut queue = MutationQueue::new(max);
            for (n, op) in ops.into_iter().enumerate() {
                match op {
                    Op::Enqueue(id) => queue.enqueue(item(&id.to_string(), n as i64)),
                    Op::Fail(id) => {
                        queue.increment_retry(&id.to_string());
                    }
                    Op::Remove(id) => {
                        queue.remove(&id.to_string());
                    }
                }
            }

            let mut ids: Vec<_> = queue.items().iter().map(|i| i.id.clone()).collect();
            let total = ids.len();
            ids.sort();
            ids.dedup();
            prop_assert_eq!(ids.len(), total);
            for item in queue.items() {
                prop_assert!(item.retry_count <= max);
            }
            prop_assert!(queue
                .processable_items()
                .iter()
                .all(|i| !queue.is_exhausted(&i.id)));
        }
    }

    #[test]
    fn serializes_as_plain_array() {
        let mut queue = MutationQueue::new(7);
        queue.enqueue(item("a", 1));

        let json = serde_json::to_value(&queue).unwrap();
        assert!(json.is_array());
        assert_eq!(json[0]["id"], "a");

        let back: MutationQueue = serde_json::from_value(json).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back.max_retries(), DEFAULT_MAX_RETRIES);
    }
}
