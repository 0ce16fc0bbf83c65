//! Push handler - accepts items from clients.

use crate::db::ItemTable;
use crate::error::Result;
use quotebook_engine::Item;

/// Store a pushed item and return the canonical version.
///
/// The response may differ from the request: the id can be replaced and a
/// newer stored version wins over an older push.
pub fn handle_push(table: &ItemTable, item: Item) -> Result<Item> {
    let pushed_id = item.id.clone();
    let stored = table.push(item)?;

    tracing::info!(
        pushed = %pushed_id,
        stored = %stored.id,
        category = %stored.category,
        "accepted pushed item"
    );
    Ok(stored)
}
