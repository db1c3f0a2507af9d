//! Conflict detection and resolution.
//!
//! Resolution is **last-writer-wins by timestamp**, evaluated per record ID.
//! The resolver is a pure function: identical inputs always yield identical
//! output, with no hidden state.

use crate::model::{Change, OfflineChange};
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

/// Which side a change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOrigin {
    /// Fetched from the remote.
    Server,
    /// Recorded locally while offline.
    Local,
}

/// Winner when server and local timestamps are exactly equal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TieBreak {
    /// The server change wins ties.
    #[default]
    PreferServer,
    /// The local change wins ties.
    PreferLocal,
}

impl TieBreak {
    fn winner(&self) -> ChangeOrigin {
        match self {
            TieBreak::PreferServer => ChangeOrigin::Server,
            TieBreak::PreferLocal => ChangeOrigin::Local,
        }
    }
}

/// A change that survived resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedChange {
    /// The winning change.
    pub change: Change,
    /// Where the winning change came from.
    pub origin: ChangeOrigin,
}

/// A record that was changed on both sides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    /// ID of the contested record.
    pub id: String,
    /// Timestamp of the server change.
    pub server_timestamp: i64,
    /// Timestamp of the local change.
    pub local_timestamp: i64,
    /// Side whose change was kept.
    pub winner: ChangeOrigin,
}

/// Output of conflict resolution, ordered by record ID.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolvedChangeSet {
    /// Winning changes, one per record ID.
    pub changes: Vec<ResolvedChange>,
    /// Records changed on both sides and how each was decided.
    pub conflicts: Vec<ConflictRecord>,
}

impl ResolvedChangeSet {
    /// Number of resolved changes.
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Returns true if nothing needs applying.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Looks up the resolved change for `id`.
    pub fn get(&self, id: &str) -> Option<&ResolvedChange> {
        self.changes
            .binary_search_by(|c| c.change.id.as_str().cmp(id))
            .ok()
            .map(|idx| &self.changes[idx])
    }

    /// IDs of local changes that lost a conflict.
    pub fn discarded_local(&self) -> impl Iterator<Item = &str> {
        self.conflicts
            .iter()
            .filter(|c| c.winner == ChangeOrigin::Server)
            .map(|c| c.id.as_str())
    }

    /// Changes that originated from the given side.
    pub fn from_origin(&self, origin: ChangeOrigin) -> impl Iterator<Item = &Change> {
        self.changes
            .iter()
            .filter(move |c| c.origin == origin)
            .map(|c| &c.change)
    }
}

/// Reconciles server changes with local offline changes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConflictResolver {
    tie_break: TieBreak,
}

impl ConflictResolver {
    /// Creates a resolver with the given tie-break rule.
    pub fn new(tie_break: TieBreak) -> Self {
        Self { tie_break }
    }

    /// Returns the tie-break rule.
    pub fn tie_break(&self) -> TieBreak {
        self.tie_break
    }

    /// Resolves `server` against `local`.
    ///
    /// For an ID present on both sides the change with the strictly later
    /// timestamp is kept and the other discarded; equal timestamps go to the
    /// tie-break side. A server deletion follows the same rule as any other
    /// change. IDs present on only one side pass through unchanged. Multiple
    /// changes for one ID on the same side collapse to the latest (the last
    /// one listed on equal timestamps).
    pub fn resolve(&self, server: &[Change], local: &[OfflineChange]) -> ResolvedChangeSet {
        let server_latest = latest_per_id(server.iter().cloned());
        let mut local_latest = latest_per_id(local.iter().cloned().map(Change::from));

        let mut changes = Vec::with_capacity(server_latest.len() + local_latest.len());
        let mut conflicts = Vec::new();

        for (id, server_change) in server_latest {
            let Some(local_change) = local_latest.remove(&id) else {
                changes.push((id, server_change, ChangeOrigin::Server));
                continue;
            };

            let winner = match server_change.timestamp.cmp(&local_change.timestamp) {
                std::cmp::Ordering::Greater => ChangeOrigin::Server,
                std::cmp::Ordering::Less => ChangeOrigin::Local,
                std::cmp::Ordering::Equal => self.tie_break.winner(),
            };

            conflicts.push(ConflictRecord {
                id: id.clone(),
                server_timestamp: server_change.timestamp,
                local_timestamp: local_change.timestamp,
                winner,
            });

            let kept = match winner {
                ChangeOrigin::Server => server_change,
                ChangeOrigin::Local => local_change,
            };
            changes.push((id, kept, winner));
        }

        for (id, local_change) in local_latest {
            changes.push((id, local_change, ChangeOrigin::Local));
        }

        changes.sort_by(|a, b| a.0.cmp(&b.0));

        ResolvedChangeSet {
            changes: changes
                .into_iter()
                .map(|(_, change, origin)| ResolvedChange { change, origin })
                .collect(),
            conflicts,
        }
    }
}

/// Resolves with the default tie-break (server wins ties).
pub fn resolve(server: &[Change], local: &[OfflineChange]) -> ResolvedChangeSet {
    ConflictResolver::default().resolve(server, local)
}

fn latest_per_id(changes: impl Iterator<Item = Change>) -> BTreeMap<String, Change> {
    let mut latest: BTreeMap<String, Change> = BTreeMap::new();
    for change in changes {
        match latest.entry(change.id.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(change);
            }
            Entry::Occupied(mut slot) => {
                if change.timestamp >= slot.get().timestamp {
                    slot.insert(change);
                }
            }
        }
    }
    latest
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn local_newer_wins() {
        let server = vec![Change::upsert("c1", json!({"title": "server"}), 100)];
        let local = vec![OfflineChange::new("c1", json!({"title": "local"}), 200)];

        let resolved = resolve(&server, &local);
        let c1 = resolved.get("c1").unwrap();
        assert_eq!(c1.origin, ChangeOrigin::Local);
        assert_eq!(c1.change.changes, json!({"title": "local"}));
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved.discarded_local().count(), 0);
    }

    #[test]
    fn server_newer_wins() {
        let server = vec![Change::upsert("c1", json!({"title": "server"}), 300)];
        let local = vec![OfflineChange::new("c1", json!({"title": "local"}), 200)];

        let resolved = resolve(&server, &local);
        let c1 = resolved.get("c1").unwrap();
        assert_eq!(c1.origin, ChangeOrigin::Server);
        assert_eq!(resolved.discarded_local().collect::<Vec<_>>(), vec!["c1"]);
        assert_eq!(
            resolved.conflicts,
            vec![ConflictRecord {
                id: "c1".into(),
                server_timestamp: 300,
                local_timestamp: 200,
                winner: ChangeOrigin::Server,
            }]
        );
    }

    #[test]
    fn one_sided_changes_pass_through() {
        let server = vec![Change::upsert("s1", json!(1), 10)];
        let local = vec![OfflineChange::new("l1", json!(2), 20)];

        let resolved = resolve(&server, &local);
        assert_eq!(resolved.len(), 2);
        assert!(resolved.conflicts.is_empty());
        assert_eq!(resolved.get("s1").unwrap().origin, ChangeOrigin::Server);
        assert_eq!(resolved.get("l1").unwrap().origin, ChangeOrigin::Local);
        assert_eq!(resolved.from_origin(ChangeOrigin::Local).count(), 1);
    }

    #[test]
    fn ties_follow_tie_break() {
        let server = vec![Change::upsert("c1", json!("server"), 50)];
        let local = vec![OfflineChange::new("c1", json!("local"), 50)];

        let by_default = resolve(&server, &local);
        assert_eq!(by_default.get("c1").unwrap().origin, ChangeOrigin::Server);

        let prefer_local = ConflictResolver::new(TieBreak::PreferLocal).resolve(&server, &local);
        assert_eq!(prefer_local.get("c1").unwrap().origin, ChangeOrigin::Local);
    }

    #[test]
    fn server_delete_uses_timestamp_rule() {
        let local = vec![OfflineChange::new("c1", json!({"title": "edited"}), 200)];

        let older_delete = resolve(&[Change::delete("c1", 100)], &local);
        assert_eq!(older_delete.get("c1").unwrap().origin, ChangeOrigin::Local);

        let newer_delete = resolve(&[Change::delete("c1", 300)], &local);
        let c1 = newer_delete.get("c1").unwrap();
        assert_eq!(c1.origin, ChangeOrigin::Server);
        assert!(c1.change.deleted);
    }

    #[test]
    fn duplicate_ids_collapse_to_latest() {
        let server = vec![
            Change::upsert("c1", json!("v2"), 20),
            Change::upsert("c1", json!("v1"), 10),
        ];
        let resolved = resolve(&server, &[]);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved.get("c1").unwrap().change.changes, json!("v2"));
    }

    #[test]
    fn output_is_sorted_by_id() {
        let server = vec![Change::upsert("b", json!(1), 1), Change::upsert("d", json!(1), 1)];
        let local = vec![
            OfflineChange::new("c", json!(1), 1),
            OfflineChange::new("a", json!(1), 1),
        ];
        let ids: Vec<_> = resolve(&server, &local)
            .changes
            .into_iter()
            .map(|c| c.change.id)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn empty_inputs() {
        assert!(resolve(&[], &[]).is_empty());
    }

    fn server_changes() -> impl Strategy<Value = Vec<Change>> {
        prop::collection::vec(
            ("[a-e]", 0i64..50, any::<bool>()).prop_map(|(id, ts, deleted)| {
                if deleted {
                    Change::delete(id, ts)
                } else {
                    Change::upsert(id, json!({"ts": ts}), ts)
                }
            }),
            0..10,
        )
    }

    fn local_changes() -> impl Strategy<Value = Vec<OfflineChange>> {
        prop::collection::vec(
            ("[a-e]", 0i64..50).prop_map(|(id, ts)| OfflineChange::new(id, json!({"local": ts}), ts)),
            0..10,
        )
    }

    proptest! {
        #[test]
        fn resolution_is_deterministic(server in server_changes(), local in local_changes()) {
            prop_assert_eq!(resolve(&server, &local), resolve(&server, &local));
        }

        #[test]
        fn winner_is_never_older(server in server_changes(), local in local_changes()) {
            let resolved = resolve(&server, &local);
            for conflict in &resolved.conflicts {
                let kept = resolved.get(&conflict.id).unwrap();
                let other = match kept.origin {
                    ChangeOrigin::Server => conflict.local_timestamp,
                    ChangeOrigin::Local => conflict.server_timestamp,
                };
                prop_assert!(kept.change.timestamp >= other);
            }
        }

        #[test]
        fn every_id_appears_once(server in server_changes(), local in local_changes()) {
            let resolved = resolve(&server, &local);
            let mut ids: Vec<_> = server.iter().map(|c| c.id.clone())
                .chain(local.iter().map(|c| c.id.clone()))
                .collect();
            ids.sort();
            ids.dedup();
            let got: Vec<_> = resolved.changes.iter().map(|c| c.change.id.clone()).collect();
            prop_assert_eq!(got, ids);
        }
    }
}
