//! In-memory item storage.

mod items;

pub use items::*;
