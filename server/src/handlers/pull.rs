//! Pull handler - serves the canonical item set to clients.

use crate::db::ItemTable;
use quotebook_engine::{Item, ALL_CATEGORIES};
use serde::Deserialize;

/// Query parameters for pull.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullQuery {
    /// Only return items in this category (`all` or absent for everything)
    pub category: Option<String>,
}

/// Return every stored item, ordered by id.
pub fn handle_pull(table: &ItemTable, query: PullQuery) -> Vec<Item> {
    let items = table.all();
    match query.category.as_deref().map(str::trim) {
        None | Some("") | Some(ALL_CATEGORIES) => items,
        Some(category) => items
            .into_iter()
            .filter(|item| item.category == category)
            .collect(),
    }
}
