//! The canonical item table.
//!
//! The server is the authority for item ids: anything pushed with a
//! provisional or empty id is stored under a fresh `srv-` id. Each
//! provisional id maps to exactly one canonical id, so a client that
//! retries a push whose response it never saw gets the same record back.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use quotebook_engine::{Item, Origin, Result, Timestamp};

/// Prefix of ids assigned by the server.
pub const SERVER_ID_PREFIX: &str = "srv-";

/// Quotes the server can start with.
const STARTER_QUOTES: [(&str, &str); 3] = [
    (
        "The journey of a thousand miles begins with one step.",
        "Motivation",
    ),
    (
        "Life is what happens when you're busy making other plans.",
        "Life",
    ),
    ("Be yourself; everyone else is already taken.", "Inspiration"),
];

/// Thread-safe map of canonical id to stored item.
#[derive(Debug, Default)]
pub struct ItemTable {
    items: DashMap<String, Item>,
    /// Provisional id -> canonical id it was stored under
    aliases: DashMap<String, String>,
}

impl ItemTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            items: DashMap::new(),
            aliases: DashMap::new(),
        }
    }

    /// Create an empty table wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// All stored items, ordered by id.
    pub fn all(&self) -> Vec<Item> {
        let mut items: Vec<Item> = self.items.iter().map(|e| e.value().clone()).collect();
        items.sort_by(|a, b| a.id.cmp(&b.id));
        items
    }

    /// Look up one item.
    pub fn get(&self, id: &str) -> Option<Item> {
        self.items.get(id).map(|e| e.value().clone())
    }

    /// Number of stored items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Accept a pushed item and return the canonical stored version.
    ///
    /// A known id is overwritten only by a strictly newer `updatedAt`, or
    /// when the stored version has none. Otherwise the stored version is
    /// returned untouched. A provisional id seen before resolves to the
    /// canonical id it was first stored under.
    pub fn push(&self, item: Item) -> Result<Item> {
        let mut item = item.with_origin(Origin::Remote);
        if item.id.trim().is_empty() {
            item.id = new_server_id();
        }
        item.validate()?;

        if item.is_provisional() {
            let canonical = self
                .aliases
                .entry(item.id.clone())
                .or_insert_with(new_server_id)
                .value()
                .clone();
            tracing::debug!(from = %item.id, to = %canonical, "assigning server id");
            item.id = canonical;
        }

        match self.items.entry(item.id.clone()) {
            Entry::Occupied(mut entry) => {
                if supersedes(item.updated_at, entry.get().updated_at) {
                    entry.insert(item.clone());
                    Ok(item)
                } else {
                    tracing::debug!(id = %item.id, "kept stored version");
                    Ok(entry.get().clone())
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(item.clone());
                Ok(item)
            }
        }
    }

    /// Store the starter quotes. Returns how many were added.
    pub fn seed_defaults(&self) -> usize {
        if !self.is_empty() {
            return 0;
        }
        let mut seeded = 0;
        for (text, category) in STARTER_QUOTES {
            let quote = Item::new(new_server_id(), text, category, Some(1), Origin::Remote);
            if self.push(quote).is_ok() {
                seeded += 1;
            }
        }
        seeded
    }
}

fn supersedes(incoming: Option<Timestamp>, stored: Option<Timestamp>) -> bool {
    match (incoming, stored) {
        (_, None) => true,
        (Some(i), Some(s)) => i > s,
        (None, Some(_)) => false,
    }
}

fn new_server_id() -> String {
    format!("{}{}", SERVER_ID_PREFIX, uuid::Uuid::new_v4())
}
