//! Item types: the quote records the store holds.

use crate::{error::Result, Error, ItemId, Timestamp};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix marking an id as locally generated and not yet confirmed by the remote.
pub const PROVISIONAL_PREFIX: &str = "local-";

/// Provenance of an item. Used for display only, never for merge decisions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Created or edited locally
    #[default]
    Local,
    /// Received from the remote source
    Remote,
    /// Written by an explicit conflict resolution
    Merged,
}

/// A quote record.
///
/// Identity is the `id` alone. Two items with the same text and category but
/// different ids are distinct records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    /// Stable identity
    pub id: ItemId,
    /// Quote text
    pub text: String,
    /// Category the quote is filed under
    pub category: String,
    /// Logical timestamp of the last write, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
    /// Where this version came from
    #[serde(default)]
    pub origin: Origin,
    /// Fields this engine does not know about, kept for lossless round-trips
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Item {
    /// Create an item with the given identity and content.
    ///
    /// No validation happens here; use [`Item::local`] or [`Item::validate`]
    /// at the boundary.
    pub fn new(
        id: impl Into<ItemId>,
        text: impl Into<String>,
        category: impl Into<String>,
        updated_at: Option<Timestamp>,
        origin: Origin,
    ) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            category: category.into(),
            updated_at,
            origin,
            extra: serde_json::Map::new(),
        }
    }

    /// Create a validated, locally-originated item with a provisional id.
    pub fn local(text: &str, category: &str, updated_at: Timestamp) -> Result<Self> {
        let (text, category) = validate_content(text, category)?;
        Ok(Self::new(
            provisional_id(),
            text,
            category,
            Some(updated_at),
            Origin::Local,
        ))
    }

    /// Check the boundary rules: non-empty id, text and category.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::Validation("id must not be empty".into()));
        }
        validate_content(&self.text, &self.category).map(|_| ())
    }

    /// Whether two versions carry the same content (text and category).
    pub fn content_eq(&self, other: &Item) -> bool {
        self.text == other.text && self.category == other.category
    }

    /// Whether this item still carries a locally generated id.
    pub fn is_provisional(&self) -> bool {
        is_provisional(&self.id)
    }

    /// Return this item tagged with a different origin.
    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }
}

/// An item as it appears in an import payload: every field may be missing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawItem {
    #[serde(default)]
    pub id: Option<ItemId>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
    #[serde(default)]
    pub origin: Option<Origin>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl RawItem {
    /// Validate and complete an imported entry.
    ///
    /// A missing id becomes a provisional one; a missing origin means Local.
    /// Present fields are kept exactly so export/import round-trips.
    pub fn into_item(self) -> Result<Item> {
        let text = self.text.unwrap_or_default();
        let category = self.category.unwrap_or_default();
        validate_content(&text, &category)?;

        let id = match self.id {
            Some(id) if !id.trim().is_empty() => id,
            _ => provisional_id(),
        };

        Ok(Item {
            id,
            text,
            category,
            updated_at: self.updated_at,
            origin: self.origin.unwrap_or_default(),
            extra: self.extra,
        })
    }
}

/// Trim and check user-entered content.
pub fn validate_content(text: &str, category: &str) -> Result<(String, String)> {
    let text = text.trim();
    let category = category.trim();
    if text.is_empty() {
        return Err(Error::Validation("text must not be empty".into()));
    }
    if category.is_empty() {
        return Err(Error::Validation("category must not be empty".into()));
    }
    Ok((text.to_string(), category.to_string()))
}

/// Generate a fresh provisional id.
pub fn provisional_id() -> ItemId {
    format!("{}{}", PROVISIONAL_PREFIX, Uuid::new_v4())
}

/// Whether an id was generated locally and awaits a canonical one.
pub fn is_provisional(id: &str) -> bool {
    id.starts_with(PROVISIONAL_PREFIX)
}
