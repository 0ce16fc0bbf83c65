//! Store - the authoritative local collection.
//!
//! The Store maps item ids to items, keeps the push outbox and pending
//! conflicts, and is the only writer of persisted state. Every mutation goes
//! through [`Store::apply`], which applies a [`Batch`] as a unit and flushes
//! the whole snapshot once.

use crate::{
    error::Result, reconcile, snapshot::ALL_CATEGORIES, Choice, ConflictRecord, Error, Item,
    ItemId, LogicalClock, Persistence, ReconcileResult, SnapshotMetadata, StoreSnapshot,
    Timestamp,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

/// A set of changes applied to the store as one unit.
///
/// Changes are applied in a fixed order: dequeues, re-keys, upserts,
/// enqueues, cleared conflicts, raised conflicts, clock observation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    pub(crate) dequeue: Vec<ItemId>,
    pub(crate) rekeys: Vec<(ItemId, Item)>,
    pub(crate) upserts: Vec<Item>,
    pub(crate) enqueue: Vec<ItemId>,
    pub(crate) cleared_conflicts: Vec<ItemId>,
    pub(crate) conflicts: Vec<ConflictRecord>,
    pub(crate) observed: Option<Timestamp>,
}

impl Batch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert an item keyed by its id.
    pub fn put(&mut self, item: Item) -> &mut Self {
        self.upserts.push(item);
        self
    }

    /// Replace the entry stored under `old_id` with `item` (which carries a new id).
    pub fn rekey(&mut self, old_id: impl Into<ItemId>, item: Item) -> &mut Self {
        self.rekeys.push((old_id.into(), item));
        self
    }

    /// Queue an id for push.
    pub fn enqueue_push(&mut self, id: impl Into<ItemId>) -> &mut Self {
        self.enqueue.push(id.into());
        self
    }

    /// Remove an id from the push queue.
    pub fn dequeue_push(&mut self, id: impl Into<ItemId>) -> &mut Self {
        self.dequeue.push(id.into());
        self
    }

    /// Record (or replace) a pending conflict.
    pub fn raise_conflict(&mut self, record: ConflictRecord) -> &mut Self {
        self.conflicts.push(record);
        self
    }

    /// Drop the pending conflict for an id, if any.
    pub fn clear_conflict(&mut self, id: impl Into<ItemId>) -> &mut Self {
        self.cleared_conflicts.push(id.into());
        self
    }

    /// Advance the store clock past a remote timestamp.
    pub fn observe(&mut self, timestamp: Timestamp) -> &mut Self {
        self.observed = Some(self.observed.map_or(timestamp, |t| t.max(timestamp)));
        self
    }

    /// Whether the batch carries no changes at all.
    pub fn is_empty(&self) -> bool {
        self.dequeue.is_empty()
            && self.rekeys.is_empty()
            && self.upserts.is_empty()
            && self.enqueue.is_empty()
            && self.cleared_conflicts.is_empty()
            && self.conflicts.is_empty()
            && self.observed.is_none()
    }
}

/// What applying a batch did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ApplyReport {
    /// Number of individual changes that altered state
    pub changed: usize,
    /// Whether the snapshot reached the backend
    pub flushed: bool,
}

/// The local item store.
pub struct Store {
    backend: Box<dyn Persistence>,
    clock: LogicalClock,
    items: Vec<Item>,
    index: HashMap<ItemId, usize>,
    outbox: Vec<ItemId>,
    conflicts: BTreeMap<ItemId, ConflictRecord>,
    selected_category: String,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("clock", &self.clock)
            .field("items", &self.items.len())
            .field("outbox", &self.outbox.len())
            .field("conflicts", &self.conflicts.len())
            .field("selected_category", &self.selected_category)
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Create an empty store over a backend without reading it.
    pub fn new(backend: impl Persistence + 'static) -> Self {
        Self {
            backend: Box::new(backend),
            clock: LogicalClock::new(),
            items: Vec::new(),
            index: HashMap::new(),
            outbox: Vec::new(),
            conflicts: BTreeMap::new(),
            selected_category: ALL_CATEGORIES.to_string(),
        }
    }

    /// Load the persisted collection.
    ///
    /// A missing, unreadable or unparsable payload yields an empty store; the
    /// failure is logged, never returned.
    pub fn load(backend: impl Persistence + 'static) -> Self {
        let mut store = Self::new(backend);

        let bytes = match store.backend.read_all() {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                tracing::debug!("no persisted quotes, starting empty");
                return store;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to read persisted quotes, starting empty");
                return store;
            }
        };

        match StoreSnapshot::from_bytes(&bytes) {
            Ok(snapshot) => store.restore(snapshot),
            Err(e) => {
                tracing::warn!(error = %e, "persisted quotes are malformed, starting empty");
            }
        }

        store
    }

    fn restore(&mut self, snapshot: StoreSnapshot) {
        self.clock = snapshot.clock;
        for item in snapshot.items {
            self.upsert(item);
        }
        for id in snapshot.outbox {
            self.enqueue(id);
        }
        for record in snapshot.conflicts {
            self.conflicts.insert(record.id.clone(), record);
        }
        self.selected_category = snapshot.selected_category;
        tracing::debug!(items = self.items.len(), "restored persisted quotes");
    }

    /// Upsert one item and flush.
    ///
    /// Putting an item equal to the stored one changes nothing.
    pub fn put(&mut self, item: Item) -> ApplyReport {
        let mut batch = Batch::new();
        batch.put(item);
        self.apply(batch)
    }

    /// Apply a batch as one unit, then flush if anything changed.
    pub fn apply(&mut self, batch: Batch) -> ApplyReport {
        let Batch {
            dequeue,
            rekeys,
            upserts,
            enqueue,
            cleared_conflicts,
            conflicts,
            observed,
        } = batch;

        let mut changed = 0;

        if !dequeue.is_empty() {
            let drop: HashSet<ItemId> = dequeue.into_iter().collect();
            let before = self.outbox.len();
            self.outbox.retain(|id| !drop.contains(id));
            changed += before - self.outbox.len();
        }
        for (old_id, item) in rekeys {
            changed += usize::from(self.rekey(&old_id, item));
        }
        for item in upserts {
            changed += usize::from(self.upsert(item));
        }
        for id in enqueue {
            changed += usize::from(self.enqueue(id));
        }
        for id in cleared_conflicts {
            changed += usize::from(self.conflicts.remove(&id).is_some());
        }
        for record in conflicts {
            let replaced = self.conflicts.insert(record.id.clone(), record.clone());
            changed += usize::from(replaced.as_ref() != Some(&record));
        }
        if let Some(ts) = observed {
            if ts > self.clock.counter {
                self.clock.observe(ts);
                changed += 1;
            }
        }

        let flushed = changed > 0 && self.flush();
        ApplyReport { changed, flushed }
    }

    fn upsert(&mut self, item: Item) -> bool {
        match self.index.get(&item.id) {
            Some(&pos) if self.items[pos] == item => false,
            Some(&pos) => {
                self.items[pos] = item;
                true
            }
            None => {
                self.index.insert(item.id.clone(), self.items.len());
                self.items.push(item);
                true
            }
        }
    }

    fn rekey(&mut self, old_id: &str, item: Item) -> bool {
        let Some(pos) = self.index.remove(old_id) else {
            tracing::warn!(id = old_id, "re-key of unknown item, storing as new");
            return self.upsert(item);
        };

        let new_id = item.id.clone();
        match self.index.get(&new_id).copied() {
            // The canonical id is already here: the provisional entry collapses into it.
            Some(existing) => {
                self.items[existing] = item;
                self.items.remove(pos);
                self.reindex();
            }
            None => {
                self.items[pos] = item;
                self.index.insert(new_id.clone(), pos);
            }
        }

        for queued in self.outbox.iter_mut().filter(|id| id.as_str() == old_id) {
            *queued = new_id.clone();
        }
        self.dedup_outbox();

        if let Some(mut record) = self.conflicts.remove(old_id) {
            record.id = new_id.clone();
            record.local.id = new_id.clone();
            record.remote.id = new_id.clone();
            self.conflicts.insert(new_id, record);
        }
        true
    }

    fn reindex(&mut self) {
        self.index = self
            .items
            .iter()
            .enumerate()
            .map(|(pos, item)| (item.id.clone(), pos))
            .collect();
    }

    fn enqueue(&mut self, id: ItemId) -> bool {
        if self.outbox.contains(&id) {
            return false;
        }
        self.outbox.push(id);
        true
    }

    fn dedup_outbox(&mut self) {
        let mut seen = HashSet::new();
        self.outbox.retain(|id| seen.insert(id.clone()));
    }

    /// Write the whole snapshot to the backend.
    ///
    /// Returns whether the write succeeded. Failures are logged as warnings
    /// and never retried here.
    pub fn flush(&self) -> bool {
        let bytes = match self.snapshot().to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize quotes");
                return false;
            }
        };
        match self.backend.write_all(&bytes) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "failed to persist quotes");
                false
            }
        }
    }

    /// Get an item by id.
    pub fn get(&self, id: &str) -> Option<&Item> {
        self.index.get(id).map(|&pos| &self.items[pos])
    }

    /// Check if an item exists.
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Iterate all items in insertion order.
    ///
    /// The iterator is lazy and cheap to clone; call again to restart.
    pub fn all(&self) -> std::slice::Iter<'_, Item> {
        self.items.iter()
    }

    /// Iterate items in a category. [`ALL_CATEGORIES`] matches every item.
    pub fn items_in<'a>(&'a self, category: &'a str) -> impl Iterator<Item = &'a Item> + 'a {
        self.items
            .iter()
            .filter(move |item| category == ALL_CATEGORIES || item.category == category)
    }

    /// Distinct categories in first-seen order.
    pub fn categories(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.items
            .iter()
            .map(|item| item.category.as_str())
            .filter(|category| seen.insert(*category))
            .collect()
    }

    /// Count of items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if the store has no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Ids waiting to be pushed, oldest first.
    pub fn outbox(&self) -> &[ItemId] {
        &self.outbox
    }

    /// Pending conflicts, ordered by item id.
    pub fn conflicts(&self) -> impl Iterator<Item = &ConflictRecord> {
        self.conflicts.values()
    }

    /// The pending conflict for an item.
    pub fn conflict(&self, id: &str) -> Option<&ConflictRecord> {
        self.conflicts.get(id)
    }

    /// The persisted category filter.
    pub fn selected_category(&self) -> &str {
        &self.selected_category
    }

    /// Remember the category filter and flush.
    pub fn set_selected_category(&mut self, category: impl Into<String>) -> ApplyReport {
        let category = category.into();
        if category == self.selected_category {
            return ApplyReport::default();
        }
        self.selected_category = category;
        ApplyReport {
            changed: 1,
            flushed: self.flush(),
        }
    }

    /// Get the current logical clock.
    pub fn clock(&self) -> LogicalClock {
        self.clock
    }

    /// Issue a timestamp for a local write at wall-clock time `now`.
    ///
    /// The advanced clock is persisted with the next flushed batch.
    pub fn stamp_at(&mut self, now: Timestamp) -> Timestamp {
        self.clock.tick_at(now)
    }

    /// Issue a timestamp for a local write now.
    pub fn stamp(&mut self) -> Timestamp {
        self.stamp_at(LogicalClock::wall_millis())
    }

    /// Merge remote items into the store.
    ///
    /// Diffs against the current contents, applies the outcome as a single
    /// batch, and returns the counts.
    pub fn reconcile(&mut self, remote_items: Vec<Item>) -> ReconcileResult {
        let (result, batch) = reconcile::Reconciler::new(self).reconcile(remote_items);
        let report = self.apply(batch);
        tracing::debug!(changed = report.changed, flushed = report.flushed, "applied reconcile batch");
        result
    }

    /// Settle a pending conflict with the user's choice.
    ///
    /// The chosen version is stored with origin `Merged`. Choosing the local
    /// version gives it a fresh timestamp and queues it for push.
    pub fn resolve(&mut self, id: &str, choice: Choice, now: Timestamp) -> Result<ConflictRecord> {
        let record = self
            .conflicts
            .get(id)
            .cloned()
            .ok_or_else(|| Error::ConflictNotFound(id.to_string()))?;

        let (batch, settled) = reconcile::resolution(record, choice, || self.clock.tick_at(now));
        self.apply(batch);
        tracing::info!(id, ?choice, "resolved conflict");
        Ok(settled)
    }

    /// Export the current store state as a snapshot.
    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            clock: self.clock,
            items: self.items.clone(),
            outbox: self.outbox.clone(),
            conflicts: self.conflicts.values().cloned().collect(),
            selected_category: self.selected_category.clone(),
            ..StoreSnapshot::new()
        }
    }

    /// Counts describing the current state.
    pub fn snapshot_metadata(&self) -> SnapshotMetadata {
        SnapshotMetadata::from(&self.snapshot())
    }
}
