//! Snapshot types for persisting and restoring store state.
//!
//! A snapshot is the only thing written to the persistence backend. It is
//! always written whole; there is no in-place patching.

use crate::{error::Result, ConflictRecord, Error, Item, ItemId, LogicalClock};
use serde::{Deserialize, Serialize};

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// Category filter value meaning "no filter".
pub const ALL_CATEGORIES: &str = "all";

fn default_category_filter() -> String {
    ALL_CATEGORIES.to_string()
}

/// A point-in-time snapshot of the store state.
///
/// Items keep store insertion order so category order survives a reload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    /// Logical clock state
    #[serde(default)]
    pub clock: LogicalClock,
    /// All items, in insertion order
    #[serde(default)]
    pub items: Vec<Item>,
    /// Ids queued for push, oldest first
    #[serde(default)]
    pub outbox: Vec<ItemId>,
    /// Conflicts awaiting a user decision
    #[serde(default)]
    pub conflicts: Vec<ConflictRecord>,
    /// Last category filter the user picked
    #[serde(default = "default_category_filter")]
    pub selected_category: String,
}

impl Default for StoreSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreSnapshot {
    /// Create a new empty snapshot.
    pub fn new() -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            clock: LogicalClock::new(),
            items: Vec::new(),
            outbox: Vec::new(),
            conflicts: Vec::new(),
            selected_category: default_category_filter(),
        }
    }

    /// Count items in the snapshot.
    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    /// Serialize to JSON bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Parse(e.to_string()))
    }

    /// Deserialize from JSON bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let snapshot: Self = serde_json::from_slice(bytes)?;

        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::Parse(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                snapshot.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        Ok(snapshot)
    }
}

/// Summary of a snapshot, for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    pub format_version: u32,
    pub clock_counter: u64,
    pub item_count: usize,
    pub outbox_count: usize,
    pub conflict_count: usize,
}

impl From<&StoreSnapshot> for SnapshotMetadata {
    fn from(snapshot: &StoreSnapshot) -> Self {
        Self {
            format_version: snapshot.format_version,
            clock_counter: snapshot.clock.counter,
            item_count: snapshot.item_count(),
            outbox_count: snapshot.outbox.len(),
            conflict_count: snapshot.conflicts.len(),
        }
    }
}
