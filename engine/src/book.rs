//! Quotebook - the facade the presentation layer talks to.
//!
//! Every user intent is a plain method call. The facade owns no widget state;
//! it returns items, categories, conflicts and pass results for rendering.

use crate::sync::{read, write};
use crate::{
    error::Result, snapshot::ALL_CATEGORIES, Batch, Choice, ConflictRecord, Error, Item, ItemId,
    LogicalClock, MemoryBackend, Persistence, PushReport, RawItem, ReconcileResult, RemoteSource,
    SnapshotMetadata, Store, SyncConfig, SyncPhase, SyncReport, Synchronizer,
};
use serde::{Deserialize, Serialize};
use std::sync::RwLock;

/// Outcome of an import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    /// Entries written into the store
    pub imported: usize,
    /// Entries that failed to parse or validate
    pub skipped: usize,
}

/// A quote collection with local persistence and remote sync.
#[derive(Debug)]
pub struct Quotebook {
    store: RwLock<Store>,
    sync: Synchronizer,
}

impl Quotebook {
    /// Open a quotebook over a persistence backend, loading what it holds.
    pub fn open(backend: impl Persistence + 'static, config: SyncConfig) -> Self {
        Self {
            store: RwLock::new(Store::load(backend)),
            sync: Synchronizer::new(config),
        }
    }

    /// Open an empty, memory-backed quotebook.
    pub fn in_memory() -> Self {
        Self::open(MemoryBackend::new(), SyncConfig::default())
    }

    /// Add a quote typed in by the user.
    ///
    /// The item gets a provisional id and a fresh timestamp, and is queued
    /// for push.
    pub fn add_item(&self, text: &str, category: &str) -> Result<Item> {
        self.add_item_at(text, category, LogicalClock::wall_millis())
    }

    /// Add a quote as if typed at wall-clock time `now`.
    pub fn add_item_at(&self, text: &str, category: &str, now: u64) -> Result<Item> {
        let mut store = write(&self.store);
        let item = Item::local(text, category, store.stamp_at(now))?;

        let mut batch = Batch::new();
        batch.put(item.clone()).enqueue_push(item.id.clone());
        store.apply(batch);

        tracing::debug!(id = %item.id, category = %item.category, "added quote");
        Ok(item)
    }

    /// Pick the category filter and return the items it shows.
    ///
    /// `"all"` clears the filter. The choice is persisted.
    pub fn select_category(&self, name: &str) -> Vec<Item> {
        let mut store = write(&self.store);
        let name = name.trim();
        let name = if name.is_empty() { ALL_CATEGORIES } else { name };
        store.set_selected_category(name);
        store.items_in(name).cloned().collect()
    }

    /// The persisted category filter.
    pub fn selected_category(&self) -> String {
        read(&self.store).selected_category().to_string()
    }

    /// Every item, in insertion order.
    pub fn items(&self) -> Vec<Item> {
        read(&self.store).all().cloned().collect()
    }

    /// Items matching the current category filter.
    pub fn visible_items(&self) -> Vec<Item> {
        let store = read(&self.store);
        let category = store.selected_category();
        store.items_in(category).cloned().collect()
    }

    /// Look up one item.
    pub fn get(&self, id: &str) -> Option<Item> {
        read(&self.store).get(id).cloned()
    }

    /// Distinct categories in first-seen order.
    pub fn categories(&self) -> Vec<String> {
        read(&self.store)
            .categories()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Conflicts waiting for the user.
    pub fn conflicts(&self) -> Vec<ConflictRecord> {
        read(&self.store).conflicts().cloned().collect()
    }

    /// Ids waiting to be pushed.
    pub fn outbox(&self) -> Vec<ItemId> {
        read(&self.store).outbox().to_vec()
    }

    /// Queued items in push order, for hosts that push on their own.
    pub fn outbox_items(&self) -> Vec<Item> {
        let store = read(&self.store);
        store
            .outbox()
            .iter()
            .filter_map(|id| store.get(id).cloned())
            .collect()
    }

    /// Counts describing the persisted state.
    pub fn metadata(&self) -> SnapshotMetadata {
        read(&self.store).snapshot_metadata()
    }

    /// Settle a conflict with the user's choice.
    pub fn resolve(&self, id: &str, choice: Choice) -> Result<ConflictRecord> {
        write(&self.store).resolve(id, choice, LogicalClock::wall_millis())
    }

    /// Current sync phase.
    pub fn phase(&self) -> SyncPhase {
        self.sync.phase()
    }

    /// Merge an already-fetched remote item set.
    pub fn reconcile_items(&self, remote_items: Vec<Item>) -> Result<ReconcileResult> {
        self.sync.reconcile_items(&self.store, remote_items)
    }

    /// Fetch from the remote and merge.
    pub async fn reconcile<R: RemoteSource + ?Sized>(&self, remote: &R) -> Result<ReconcileResult> {
        self.sync.reconcile(&self.store, remote).await
    }

    /// Push queued items to the remote.
    pub async fn push_pending<R: RemoteSource + ?Sized>(&self, remote: &R) -> Result<PushReport> {
        self.sync.push_pending(&self.store, remote).await
    }

    /// Record the remote's answer to a push the host made itself.
    ///
    /// Returns whether the item took a new canonical id.
    pub fn acknowledge_push(&self, pushed_id: &str, echo: Item) -> Result<bool> {
        self.sync.acknowledge_push(&self.store, pushed_id, echo)
    }

    /// Reconcile, then push.
    pub async fn sync<R: RemoteSource + ?Sized>(&self, remote: &R) -> Result<SyncReport> {
        self.sync.sync(&self.store, remote).await
    }

    /// Export every item as a pretty JSON array.
    pub fn export_json(&self) -> Result<String> {
        let store = read(&self.store);
        let items: Vec<&Item> = store.all().collect();
        Ok(serde_json::to_string_pretty(&items)?)
    }

    /// Import a JSON array of items.
    ///
    /// A payload that is not a JSON array fails with [`Error::Parse`] and
    /// changes nothing. Inside the array, entries that do not parse or
    /// validate are skipped. Entries without an id get a provisional one and
    /// are queued for push. Imported timestamps advance the clock, so later
    /// local edits still stamp above them.
    pub fn import_json(&self, payload: &[u8]) -> Result<ImportReport> {
        let entries: Vec<serde_json::Value> = serde_json::from_slice(payload)?;

        let mut report = ImportReport::default();
        let mut batch = Batch::new();
        for (position, entry) in entries.into_iter().enumerate() {
            let item = serde_json::from_value::<RawItem>(entry)
                .map_err(Error::from)
                .and_then(RawItem::into_item);
            match item {
                Ok(item) => {
                    if item.is_provisional() {
                        batch.enqueue_push(item.id.clone());
                    }
                    if let Some(ts) = item.updated_at {
                        batch.observe(ts);
                    }
                    batch.put(item);
                    report.imported += 1;
                }
                Err(e) => {
                    tracing::warn!(position, error = %e, "skipping invalid import entry");
                    report.skipped += 1;
                }
            }
        }

        write(&self.store).apply(batch);
        tracing::info!(imported = report.imported, skipped = report.skipped, "imported quotes");
        Ok(report)
    }
}
