//! Reconciliation of the local store against a remote item set.
//!
//! The diff is a pure function of the local items and the remote items: the
//! same inputs always produce the same [`Batch`] and [`ReconcileResult`].
//!
//! # Algorithm
//!
//! 1. Validate remote items and collapse duplicate ids (newest wins)
//! 2. Partition ids into remote-only, local-only and both-present
//! 3. Remote-only items are stored as Remote origin
//! 4. Local-only items are queued for push
//! 5. Both-present items with equal content are left alone
//! 6. Otherwise the strictly newer `updatedAt` wins; a tie, or a missing
//!    timestamp on either side, becomes a pending [`ConflictRecord`]

use crate::{Batch, Item, ItemId, Origin, Store, Timestamp};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

/// Resolution state of a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResolutionState {
    /// Waiting for a user decision
    Pending,
    /// The local version was kept
    KeptLocal,
    /// The remote version was kept
    KeptRemote,
}

/// Which side the user picked for a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Choice {
    Local,
    Remote,
}

/// Both versions of an item that could not be merged automatically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRecord {
    /// Id of the conflicting item (also the conflict's id)
    pub id: ItemId,
    /// The version held by the store
    pub local: Item,
    /// The version offered by the remote
    pub remote: Item,
    /// Where the conflict stands
    pub state: ResolutionState,
}

impl ConflictRecord {
    /// Create a pending conflict.
    pub fn pending(local: Item, remote: Item) -> Self {
        Self {
            id: local.id.clone(),
            local,
            remote,
            state: ResolutionState::Pending,
        }
    }
}

/// Counts describing one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileResult {
    /// Remote versions written into the store
    pub upserted: usize,
    /// Local items that need pushing
    pub pushed: usize,
    /// Pairs left pending for the user
    pub conflicted: usize,
    /// Pairs whose content already matched
    pub unchanged: usize,
    /// Remote items rejected by validation
    pub skipped: usize,
}

impl ReconcileResult {
    /// Whether the pass wrote nothing and raised nothing.
    pub fn is_noop(&self) -> bool {
        self.upserted == 0 && self.pushed == 0 && self.conflicted == 0
    }
}

/// Outcome for a single both-present id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Unchanged,
    RemoteWins,
    LocalWins,
    Conflict,
}

fn judge(local: &Item, remote: &Item) -> Verdict {
    if local.content_eq(remote) {
        return Verdict::Unchanged;
    }
    match (local.updated_at, remote.updated_at) {
        (Some(l), Some(r)) => match r.cmp(&l) {
            Ordering::Greater => Verdict::RemoteWins,
            Ordering::Less => Verdict::LocalWins,
            Ordering::Equal => Verdict::Conflict,
        },
        _ => Verdict::Conflict,
    }
}

/// Computes the batch that merges a remote item set into a store.
pub struct Reconciler<'a> {
    store: &'a Store,
    batch: Batch,
    result: ReconcileResult,
}

impl<'a> Reconciler<'a> {
    /// Create a reconciler reading from `store`.
    pub fn new(store: &'a Store) -> Self {
        Self {
            store,
            batch: Batch::new(),
            result: ReconcileResult::default(),
        }
    }

    /// Diff `remote_items` against the store.
    ///
    /// Returns the counts and the batch to hand to [`Store::apply`]. The
    /// store itself is not touched.
    pub fn reconcile(mut self, remote_items: Vec<Item>) -> (ReconcileResult, Batch) {
        let store = self.store;
        let remote = self.collapse(remote_items);
        let remote_ids: HashSet<&str> = remote.iter().map(|item| item.id.as_str()).collect();

        // Local-only ids, in store order
        let mut to_push: Vec<ItemId> = store
            .all()
            .filter(|item| !remote_ids.contains(item.id.as_str()))
            .map(|item| item.id.clone())
            .collect();

        for remote_item in &remote {
            if let Some(ts) = remote_item.updated_at {
                self.batch.observe(ts);
            }

            let Some(local) = store.get(&remote_item.id) else {
                self.batch.put(remote_item.clone().with_origin(Origin::Remote));
                self.result.upserted += 1;
                continue;
            };

            match judge(local, remote_item) {
                Verdict::Unchanged => {
                    self.settle(&remote_item.id);
                    self.result.unchanged += 1;
                }
                Verdict::RemoteWins => {
                    self.settle(&remote_item.id);
                    self.batch
                        .put(remote_item.clone().with_origin(Origin::Remote))
                        .dequeue_push(remote_item.id.clone());
                    self.result.upserted += 1;
                }
                Verdict::LocalWins => {
                    self.settle(&remote_item.id);
                    to_push.push(remote_item.id.clone());
                }
                Verdict::Conflict => {
                    tracing::debug!(id = %remote_item.id, "conflicting versions, awaiting resolution");
                    self.batch
                        .raise_conflict(ConflictRecord::pending(
                            local.clone(),
                            remote_item.clone().with_origin(Origin::Remote),
                        ))
                        .dequeue_push(remote_item.id.clone());
                    self.result.conflicted += 1;
                }
            }
        }

        for id in to_push {
            self.settle(&id);
            self.batch.enqueue_push(id);
            self.result.pushed += 1;
        }

        (self.result, self.batch)
    }

    /// Drop a stale pending conflict for an id that no longer conflicts.
    fn settle(&mut self, id: &str) {
        if self.store.conflict(id).is_some() {
            self.batch.clear_conflict(id);
        }
    }

    /// Validate remote items and keep one version per id.
    ///
    /// On duplicate ids the strictly newer timestamp wins; otherwise the
    /// first occurrence is kept. First-occurrence order is preserved.
    fn collapse(&mut self, remote_items: Vec<Item>) -> Vec<Item> {
        let mut kept: Vec<Item> = Vec::with_capacity(remote_items.len());
        let mut positions: HashMap<ItemId, usize> = HashMap::new();

        for item in remote_items {
            if let Err(e) = item.validate() {
                tracing::warn!(id = %item.id, error = %e, "skipping invalid remote item");
                self.result.skipped += 1;
                continue;
            }
            match positions.get(&item.id) {
                Some(&pos) => {
                    if newer(item.updated_at, kept[pos].updated_at) {
                        kept[pos] = item;
                    }
                }
                None => {
                    positions.insert(item.id.clone(), kept.len());
                    kept.push(item);
                }
            }
        }

        kept
    }
}

fn newer(candidate: Option<Timestamp>, current: Option<Timestamp>) -> bool {
    match (candidate, current) {
        (Some(c), Some(k)) => c > k,
        (Some(_), None) => true,
        _ => false,
    }
}

/// Build the batch that settles `record` in favour of `choice`.
///
/// `stamp` is called only when the local version wins, to give it a
/// timestamp newer than anything either side has seen.
pub(crate) fn resolution(
    record: ConflictRecord,
    choice: Choice,
    stamp: impl FnOnce() -> Timestamp,
) -> (Batch, ConflictRecord) {
    let mut batch = Batch::new();
    let mut settled = record;

    match choice {
        Choice::Local => {
            let mut chosen = settled.local.clone().with_origin(Origin::Merged);
            chosen.updated_at = Some(stamp());
            batch.put(chosen).enqueue_push(settled.id.clone());
            settled.state = ResolutionState::KeptLocal;
        }
        Choice::Remote => {
            let chosen = settled.remote.clone().with_origin(Origin::Merged);
            batch.put(chosen).dequeue_push(settled.id.clone());
            settled.state = ResolutionState::KeptRemote;
        }
    }
    batch.clear_conflict(settled.id.clone());

    (batch, settled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryBackend;

    fn local(id: &str, text: &str, ts: Option<u64>) -> Item {
        Item::new(id, text, "X", ts, Origin::Local)
    }

    fn remote(id: &str, text: &str, ts: Option<u64>) -> Item {
        Item::new(id, text, "X", ts, Origin::Remote)
    }

    fn store_with(items: Vec<Item>) -> Store {
        let mut store = Store::new(MemoryBackend::new());
        for item in items {
            store.put(item);
        }
        store
    }

    #[test]
    fn remote_only_is_upserted_as_remote() {
        let store = store_with(vec![]);
        let mut incoming = remote("r1", "A", Some(5));
        incoming.origin = Origin::Local;
        let (result, batch) = Reconciler::new(&store).reconcile(vec![incoming]);

        assert_eq!(result.upserted, 1);
        let mut expected = Batch::new();
        expected.observe(5).put(remote("r1", "A", Some(5)));
        assert_eq!(batch, expected);
    }

    #[test]
    fn local_only_is_queued() {
        let store = store_with(vec![local("l1", "A", Some(1))]);
        let (result, batch) = Reconciler::new(&store).reconcile(vec![]);

        assert_eq!(
            result,
            ReconcileResult {
                pushed: 1,
                ..Default::default()
            }
        );
        let mut expected = Batch::new();
        expected.enqueue_push("l1");
        assert_eq!(batch, expected);
    }

    #[test]
    fn equal_content_is_unchanged() {
        let store = store_with(vec![local("1", "A", Some(1))]);
        let (result, _) = Reconciler::new(&store).reconcile(vec![remote("1", "A", Some(9))]);
        assert_eq!(result.unchanged, 1);
        assert!(result.is_noop());
    }

    #[test]
    fn newer_remote_wins() {
        let store = store_with(vec![local("1", "A", Some(10))]);
        let (result, batch) = Reconciler::new(&store).reconcile(vec![remote("1", "B", Some(20))]);
        assert_eq!(result.upserted, 1);
        assert_eq!(result.conflicted, 0);
        assert!(batch.upserts.iter().any(|i| i.text == "B"));
    }

    #[test]
    fn newer_local_wins_and_is_queued() {
        let store = store_with(vec![local("1", "A", Some(30))]);
        let (result, batch) = Reconciler::new(&store).reconcile(vec![remote("1", "B", Some(20))]);
        assert_eq!(result.pushed, 1);
        assert_eq!(result.upserted, 0);
        assert!(batch.upserts.is_empty());
        assert_eq!(batch.enqueue, vec!["1".to_string()]);
    }

    #[test]
    fn tie_becomes_conflict() {
        let store = store_with(vec![local("2", "A", Some(10))]);
        let (result, batch) = Reconciler::new(&store).reconcile(vec![remote("2", "B", Some(10))]);
        assert_eq!(result.conflicted, 1);
        assert!(batch.upserts.is_empty());
        assert_eq!(batch.conflicts[0].local.text, "A");
        assert_eq!(batch.conflicts[0].remote.text, "B");
        assert_eq!(batch.conflicts[0].state, ResolutionState::Pending);
    }

    #[test]
    fn missing_timestamp_becomes_conflict() {
        let store = store_with(vec![local("3", "A", None)]);
        let (result, _) = Reconciler::new(&store).reconcile(vec![remote("3", "B", Some(10))]);
        assert_eq!(result.conflicted, 1);

        let store = store_with(vec![local("3", "A", Some(10))]);
        let (result, _) = Reconciler::new(&store).reconcile(vec![remote("3", "B", None)]);
        assert_eq!(result.conflicted, 1);
    }

    #[test]
    fn invalid_remote_items_are_skipped() {
        let store = store_with(vec![]);
        let (result, batch) = Reconciler::new(&store).reconcile(vec![
            remote("1", "", Some(1)),
            remote("", "A", Some(1)),
            remote("2", "B", Some(1)),
        ]);
        assert_eq!(result.skipped, 2);
        assert_eq!(result.upserted, 1);
        assert_eq!(batch.upserts.len(), 1);
    }

    #[test]
    fn duplicate_remote_ids_collapse_to_newest() {
        let store = store_with(vec![]);
        let (result, batch) = Reconciler::new(&store).reconcile(vec![
            remote("1", "old", Some(1)),
            remote("1", "new", Some(2)),
            remote("1", "tie", Some(2)),
        ]);
        assert_eq!(result.upserted, 1);
        assert_eq!(batch.upserts[0].text, "new");
    }

    #[test]
    fn stale_conflict_cleared_when_remote_catches_up() {
        let mut store = store_with(vec![local("2", "A", Some(10))]);
        store.reconcile(vec![remote("2", "B", Some(10))]);
        assert!(store.conflict("2").is_some());

        let result = store.reconcile(vec![remote("2", "C", Some(11))]);
        assert_eq!(result.upserted, 1);
        assert!(store.conflict("2").is_none());
        assert_eq!(store.get("2").unwrap().text, "C");
    }

    #[test]
    fn reconcile_deterministic() {
        let store = store_with(vec![
            local("1", "A", Some(10)),
            local("2", "B", Some(5)),
            local("4", "D", None),
        ]);
        let incoming = vec![
            remote("1", "A2", Some(10)),
            remote("2", "B2", Some(6)),
            remote("3", "C", Some(1)),
        ];

        let runs: Vec<_> = (0..10)
            .map(|_| Reconciler::new(&store).reconcile(incoming.clone()))
            .collect();
        assert!(runs.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(
            runs[0].0,
            ReconcileResult {
                upserted: 2,
                pushed: 1,
                conflicted: 1,
                unchanged: 0,
                skipped: 0,
            }
        );
    }

    #[test]
    fn resolution_local_stamps_and_queues() {
        let record = ConflictRecord::pending(local("2", "A", Some(10)), remote("2", "B", Some(10)));
        let (batch, settled) = resolution(record, Choice::Local, || 11);

        assert_eq!(settled.state, ResolutionState::KeptLocal);
        assert_eq!(batch.upserts[0].origin, Origin::Merged);
        assert_eq!(batch.upserts[0].updated_at, Some(11));
        assert_eq!(batch.enqueue, vec!["2".to_string()]);
        assert_eq!(batch.cleared_conflicts, vec!["2".to_string()]);
    }

    #[test]
    fn conflict_record_serialization() {
        let record = ConflictRecord::pending(local("2", "A", Some(10)), remote("2", "B", Some(10)));
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["state"], "pending");
        assert_eq!(json["remote"]["origin"], "remote");
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;
        use std::collections::HashSet;

        fn arb_item(origin: Origin) -> impl Strategy<Value = Item> {
            (
                prop_oneof![Just("1"), Just("2"), Just("3"), Just("4"), Just("5")],
                prop_oneof![Just("A"), Just("B"), Just("C")],
                prop_oneof![Just("Life"), Just("Humor")],
                proptest::option::of(1u64..6),
            )
                .prop_map(move |(id, text, category, ts)| {
                    Item::new(id, text, category, ts, origin)
                })
        }

        fn arb_items(origin: Origin) -> impl Strategy<Value = Vec<Item>> {
            proptest::collection::vec(arb_item(origin), 0..8)
        }

        fn merged(local: &[Item], remote: &[Item]) -> (ReconcileResult, Store) {
            let mut store = store_with(local.to_vec());
            let (result, batch) = Reconciler::new(&store).reconcile(remote.to_vec());
            store.apply(batch);
            (result, store)
        }

        proptest! {
            #[test]
            fn prop_reconcile_deterministic(
                local in arb_items(Origin::Local),
                remote in arb_items(Origin::Remote),
            ) {
                let (result1, store1) = merged(&local, &remote);
                let (result2, store2) = merged(&local, &remote);

                prop_assert_eq!(result1, result2);
                prop_assert_eq!(store1.snapshot(), store2.snapshot());
            }

            #[test]
            fn prop_reconcile_idempotent(
                local in arb_items(Origin::Local),
                remote in arb_items(Origin::Remote),
            ) {
                let (_, mut store) = merged(&local, &remote);
                let before = store.snapshot();

                let (again, batch) = Reconciler::new(&store).reconcile(remote.clone());
                let report = store.apply(batch);

                prop_assert_eq!(again.upserted, 0);
                prop_assert_eq!(report.changed, 0);
                prop_assert_eq!(store.snapshot(), before);
            }

            #[test]
            fn prop_no_id_is_lost(
                local in arb_items(Origin::Local),
                remote in arb_items(Origin::Remote),
            ) {
                let (_, store) = merged(&local, &remote);

                for item in local.iter().chain(remote.iter()) {
                    prop_assert!(store.contains(&item.id));
                }
            }

            #[test]
            fn prop_conflicts_keep_both_versions(
                local in arb_items(Origin::Local),
                remote in arb_items(Origin::Remote),
            ) {
                let (_, store) = merged(&local, &remote);

                for record in store.conflicts() {
                    prop_assert_eq!(store.get(&record.id), Some(&record.local));
                    prop_assert!(!record.local.content_eq(&record.remote));
                    prop_assert!(remote.iter().any(|r| r.id == record.id && r.content_eq(&record.remote)));
                    prop_assert!(!store.outbox().contains(&record.id));
                }
            }

            #[test]
            fn prop_every_remote_id_gets_one_verdict(
                local in arb_items(Origin::Local),
                remote in arb_items(Origin::Remote),
            ) {
                let store = store_with(local.clone());
                let local_ids: HashSet<&str> = local.iter().map(|i| i.id.as_str()).collect();
                let remote_ids: HashSet<&str> = remote.iter().map(|i| i.id.as_str()).collect();
                let local_only = local_ids.difference(&remote_ids).count();

                let (result, _) = Reconciler::new(&store).reconcile(remote.clone());
                let local_wins = result.pushed - local_only;

                prop_assert_eq!(
                    result.upserted + result.conflicted + result.unchanged + local_wins,
                    remote_ids.len()
                );
            }
        }
    }
}
