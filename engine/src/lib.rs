//! # Quotebook Engine
//!
//! A local-first store and reconciler for a collection of quotes.
//!
//! This crate holds the authoritative local collection, persists it, and
//! merges it with a remote item store. The merge is deterministic - the same
//! local and remote items always produce the same outcome.
//!
//! ## Design Principles
//!
//! - **Identity by id**: two quotes are the same record only if their ids match
//! - **Deterministic merge**: last writer wins by timestamp, never by arrival
//! - **No guessing**: a timestamp tie with diverging content is a conflict the
//!   user resolves
//! - **Single writer**: one sync pass at a time; overlapping calls fail fast
//!
//! ## Core Concepts
//!
//! ### Items
//!
//! An [`Item`] has an id, text, a category, an optional logical timestamp
//! (`updatedAt`) and an [`Origin`] tag. Locally created items carry a
//! provisional id until the remote assigns a canonical one.
//!
//! ### Store
//!
//! The [`Store`] maps ids to items and is the only writer of persisted
//! state. Changes are applied as a [`Batch`] and flushed whole through a
//! [`Persistence`] backend.
//!
//! ### Reconciliation
//!
//! The [`Reconciler`] diffs a remote item set against the store:
//! - remote-only items are stored
//! - local-only items are queued for push
//! - the strictly newer `updatedAt` wins a disagreement
//! - a tie becomes a [`ConflictRecord`] awaiting [`Choice`]
//!
//! ### Sync
//!
//! The [`Synchronizer`] drives passes against a [`RemoteSource`], enforcing
//! `Idle → Fetching → Diffing → Applying → Idle`.
//!
//! ## Quick Start
//!
//! ```rust
//! use quotebook_engine::{Choice, Item, Origin, Quotebook};
//!
//! let book = Quotebook::in_memory();
//! book.import_json(br#"[{"id": "2", "text": "A", "category": "X", "updatedAt": 10}]"#)
//!     .unwrap();
//!
//! // The remote disagrees with the same timestamp: a conflict.
//! let remote = vec![Item::new("2", "B", "X", Some(10), Origin::Remote)];
//! let result = book.reconcile_items(remote).unwrap();
//! assert_eq!(result.conflicted, 1);
//!
//! book.resolve("2", Choice::Local).unwrap();
//! let item = book.get("2").unwrap();
//! assert_eq!(item.text, "A");
//! assert_eq!(item.origin, Origin::Merged);
//! ```
//!
//! ## FFI
//!
//! The [`ffi`] module provides C-compatible functions for use from other
//! languages. All data is exchanged as JSON strings.

pub mod book;
pub mod clock;
pub mod error;
pub mod ffi;
pub mod item;
pub mod persist;
pub mod reconcile;
pub mod snapshot;
pub mod store;
pub mod sync;

// Re-export main types at crate root
pub use book::{ImportReport, Quotebook};
pub use clock::LogicalClock;
pub use error::{Error, Result};
pub use item::{is_provisional, provisional_id, Item, Origin, RawItem, PROVISIONAL_PREFIX};
pub use persist::{FileBackend, MemoryBackend, Persistence};
pub use reconcile::{Choice, ConflictRecord, ReconcileResult, Reconciler, ResolutionState};
pub use snapshot::{SnapshotMetadata, StoreSnapshot, ALL_CATEGORIES, SNAPSHOT_FORMAT_VERSION};
pub use store::{ApplyReport, Batch, Store};
pub use sync::{PushReport, RemoteSource, SyncConfig, SyncPhase, SyncReport, Synchronizer};

/// Type aliases for clarity
pub type ItemId = String;
pub type Timestamp = u64;
