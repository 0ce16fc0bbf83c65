//! FFI layer for non-Rust hosts.
//!
//! This module provides C-compatible functions over a [`Quotebook`]. All
//! structured data crosses the boundary as JSON strings.
//!
//! # Memory Management
//!
//! - Strings returned by `quotebook_*` functions are allocated by Rust
//! - Caller must free them with `quotebook_string_free`
//! - Quotebook pointers must be freed with `quotebook_free`
//!
//! # Error Handling
//!
//! Functions return JSON with either:
//! - `{"ok": <result>}` on success
//! - `{"error": "<message>"}` on failure

use crate::{Choice, FileBackend, Item, Quotebook, SyncConfig};
use std::ffi::{c_char, CStr, CString};
use std::ptr;

/// Result wrapper for FFI responses.
#[derive(serde::Serialize)]
#[serde(untagged)]
enum FfiResult<T: serde::Serialize> {
    Ok { ok: T },
    Err { error: String },
}

impl<T: serde::Serialize> FfiResult<T> {
    fn ok(value: T) -> Self {
        FfiResult::Ok { ok: value }
    }

    fn err(message: impl Into<String>) -> Self {
        FfiResult::Err {
            error: message.into(),
        }
    }

    fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|e| format!(r#"{{"error":"serialization failed: {}"}}"#, e))
    }
}

/// Convert a Rust string to a C string pointer.
/// Caller must free with `quotebook_string_free`.
fn to_c_string(s: String) -> *mut c_char {
    match CString::new(s) {
        Ok(cs) => cs.into_raw(),
        Err(_) => CString::new(r#"{"error":"string contained null bytes"}"#)
            .map(CString::into_raw)
            .unwrap_or(ptr::null_mut()),
    }
}

fn respond<T: serde::Serialize>(result: crate::Result<T>) -> *mut c_char {
    match result {
        Ok(value) => to_c_string(FfiResult::ok(value).to_json()),
        Err(e) => fail(&e.to_string()),
    }
}

fn fail(message: &str) -> *mut c_char {
    to_c_string(FfiResult::<()>::err(message).to_json())
}

/// Convert a C string pointer to a Rust string.
/// Returns None if pointer is null or invalid UTF-8.
unsafe fn from_c_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Open a quotebook persisted at `path`.
///
/// A missing or malformed file yields an empty quotebook.
///
/// # Returns
/// Pointer to Quotebook, or null if `path` is invalid.
///
/// # Safety
/// - `path` must be a valid null-terminated C string or null
/// - Caller must free the returned pointer with `quotebook_free`
#[no_mangle]
pub unsafe extern "C" fn quotebook_open(path: *const c_char) -> *mut Quotebook {
    let Some(path) = from_c_string(path) else {
        return ptr::null_mut();
    };

    let book = Quotebook::open(FileBackend::new(path), SyncConfig::default());
    Box::into_raw(Box::new(book))
}

/// Free a quotebook.
///
/// # Safety
/// - `book` must be a valid pointer from `quotebook_open`
/// - Must not be called twice on the same pointer
#[no_mangle]
pub unsafe extern "C" fn quotebook_free(book: *mut Quotebook) {
    if !book.is_null() {
        drop(Box::from_raw(book));
    }
}

/// Free a string allocated by the engine.
///
/// # Safety
/// - `s` must be a valid pointer from a `quotebook_*` function
/// - Must not be called twice on the same pointer
#[no_mangle]
pub unsafe extern "C" fn quotebook_string_free(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}

// ============================================================================
// User intents
// ============================================================================

/// Add a quote.
///
/// # Returns
/// JSON string: `{"ok": Item}` or `{"error": "message"}`
///
/// # Safety
/// - `book` must be a valid pointer from `quotebook_open` or null
/// - `text` and `category` must be valid null-terminated C strings or null
/// - Caller must free the returned string with `quotebook_string_free`
#[no_mangle]
pub unsafe extern "C" fn quotebook_add(
    book: *const Quotebook,
    text: *const c_char,
    category: *const c_char,
) -> *mut c_char {
    let Some(book) = book.as_ref() else {
        return fail("null quotebook pointer");
    };
    let (Some(text), Some(category)) = (from_c_string(text), from_c_string(category)) else {
        return fail("invalid text or category");
    };

    respond(book.add_item(&text, &category))
}

/// List items.
///
/// # Arguments
/// - `visible_only`: 0 for every item, non-zero for the current category filter
///
/// # Returns
/// JSON string: `{"ok": [Item, ...]}` or `{"error": "message"}`
///
/// # Safety
/// - `book` must be a valid pointer from `quotebook_open` or null
/// - Caller must free the returned string with `quotebook_string_free`
#[no_mangle]
pub unsafe extern "C" fn quotebook_items(book: *const Quotebook, visible_only: i32) -> *mut c_char {
    let Some(book) = book.as_ref() else {
        return fail("null quotebook pointer");
    };

    let items = if visible_only != 0 {
        book.visible_items()
    } else {
        book.items()
    };
    respond(Ok(items))
}

/// List distinct categories in first-seen order.
///
/// # Safety
/// - `book` must be a valid pointer from `quotebook_open` or null
/// - Caller must free the returned string with `quotebook_string_free`
#[no_mangle]
pub unsafe extern "C" fn quotebook_categories(book: *const Quotebook) -> *mut c_char {
    let Some(book) = book.as_ref() else {
        return fail("null quotebook pointer");
    };
    respond(Ok(book.categories()))
}

/// Select the category filter; `"all"` clears it.
///
/// # Returns
/// JSON string: `{"ok": [Item, ...]}` with the items now visible
///
/// # Safety
/// - `book` must be a valid pointer from `quotebook_open` or null
/// - `name` must be a valid null-terminated C string or null
/// - Caller must free the returned string with `quotebook_string_free`
#[no_mangle]
pub unsafe extern "C" fn quotebook_select_category(
    book: *const Quotebook,
    name: *const c_char,
) -> *mut c_char {
    let Some(book) = book.as_ref() else {
        return fail("null quotebook pointer");
    };
    let Some(name) = from_c_string(name) else {
        return fail("invalid category");
    };
    respond(Ok(book.select_category(&name)))
}

// ============================================================================
// Conflicts & Reconciliation
// ============================================================================

/// List pending conflicts.
///
/// # Safety
/// - `book` must be a valid pointer from `quotebook_open` or null
/// - Caller must free the returned string with `quotebook_string_free`
#[no_mangle]
pub unsafe extern "C" fn quotebook_conflicts(book: *const Quotebook) -> *mut c_char {
    let Some(book) = book.as_ref() else {
        return fail("null quotebook pointer");
    };
    respond(Ok(book.conflicts()))
}

/// Resolve a conflict.
///
/// # Arguments
/// - `choice`: 0 keeps the local version, 1 keeps the remote version
///
/// # Returns
/// JSON string: `{"ok": ConflictRecord}` or `{"error": "message"}`
///
/// # Safety
/// - `book` must be a valid pointer from `quotebook_open` or null
/// - `id` must be a valid null-terminated C string or null
/// - Caller must free the returned string with `quotebook_string_free`
#[no_mangle]
pub unsafe extern "C" fn quotebook_resolve(
    book: *const Quotebook,
    id: *const c_char,
    choice: i32,
) -> *mut c_char {
    let Some(book) = book.as_ref() else {
        return fail("null quotebook pointer");
    };
    let Some(id) = from_c_string(id) else {
        return fail("invalid id");
    };
    let choice = match choice {
        0 => Choice::Local,
        1 => Choice::Remote,
        _ => return fail("choice must be 0 (local) or 1 (remote)"),
    };

    respond(book.resolve(&id, choice))
}

/// Merge a remote item set the host fetched itself.
///
/// # Arguments
/// - `remote_items_json`: JSON array of Items
///
/// # Returns
/// JSON string: `{"ok": ReconcileResult}` or `{"error": "message"}`
///
/// # Safety
/// - `book` must be a valid pointer from `quotebook_open` or null
/// - `remote_items_json` must be a valid null-terminated C string or null
/// - Caller must free the returned string with `quotebook_string_free`
#[no_mangle]
pub unsafe extern "C" fn quotebook_reconcile(
    book: *const Quotebook,
    remote_items_json: *const c_char,
) -> *mut c_char {
    let Some(book) = book.as_ref() else {
        return fail("null quotebook pointer");
    };
    let Some(json) = from_c_string(remote_items_json) else {
        return fail("invalid remote items JSON");
    };

    let remote_items: Vec<Item> = match serde_json::from_str(&json) {
        Ok(items) => items,
        Err(e) => return fail(&format!("parse error: {}", e)),
    };

    respond(book.reconcile_items(remote_items))
}

// ============================================================================
// Host-driven push
// ============================================================================

/// List queued items in push order.
///
/// # Returns
/// JSON string: `{"ok": [Item, ...]}` or `{"error": "message"}`
///
/// # Safety
/// - `book` must be a valid pointer from `quotebook_open` or null
/// - Caller must free the returned string with `quotebook_string_free`
#[no_mangle]
pub unsafe extern "C" fn quotebook_outbox(book: *const Quotebook) -> *mut c_char {
    let Some(book) = book.as_ref() else {
        return fail("null quotebook pointer");
    };
    respond(Ok(book.outbox_items()))
}

/// Report the remote's answer to a push the host performed.
///
/// The item leaves the outbox and takes the canonical id the remote
/// assigned, if any.
///
/// # Arguments
/// - `pushed_id`: id of the item as it was pushed
/// - `echo_json`: the Item the remote returned
///
/// # Returns
/// JSON string: `{"ok": bool}` (whether the id changed) or `{"error": "message"}`
///
/// # Safety
/// - `book` must be a valid pointer from `quotebook_open` or null
/// - `pushed_id` and `echo_json` must be valid null-terminated C strings or null
/// - Caller must free the returned string with `quotebook_string_free`
#[no_mangle]
pub unsafe extern "C" fn quotebook_push_ack(
    book: *const Quotebook,
    pushed_id: *const c_char,
    echo_json: *const c_char,
) -> *mut c_char {
    let Some(book) = book.as_ref() else {
        return fail("null quotebook pointer");
    };
    let (Some(pushed_id), Some(json)) = (from_c_string(pushed_id), from_c_string(echo_json)) else {
        return fail("invalid id or echo JSON");
    };

    let echo: Item = match serde_json::from_str(&json) {
        Ok(item) => item,
        Err(e) => return fail(&format!("parse error: {}", e)),
    };

    respond(book.acknowledge_push(&pushed_id, echo))
}

// ============================================================================
// Import / Export
// ============================================================================

/// Export every item as a JSON array.
///
/// # Returns
/// JSON string: `{"ok": "<pretty JSON array>"}` or `{"error": "message"}`
///
/// # Safety
/// - `book` must be a valid pointer from `quotebook_open` or null
/// - Caller must free the returned string with `quotebook_string_free`
#[no_mangle]
pub unsafe extern "C" fn quotebook_export(book: *const Quotebook) -> *mut c_char {
    let Some(book) = book.as_ref() else {
        return fail("null quotebook pointer");
    };
    respond(book.export_json())
}

/// Import a JSON array of items.
///
/// # Returns
/// JSON string: `{"ok": ImportReport}` or `{"error": "message"}`
///
/// # Safety
/// - `book` must be a valid pointer from `quotebook_open` or null
/// - `items_json` must be a valid null-terminated C string or null
/// - Caller must free the returned string with `quotebook_string_free`
#[no_mangle]
pub unsafe extern "C" fn quotebook_import(
    book: *const Quotebook,
    items_json: *const c_char,
) -> *mut c_char {
    let Some(book) = book.as_ref() else {
        return fail("null quotebook pointer");
    };
    let Some(json) = from_c_string(items_json) else {
        return fail("invalid items JSON");
    };
    respond(book.import_json(json.as_bytes()))
}

// ============================================================================
// Utilities
// ============================================================================

/// Summarize the persisted state.
///
/// # Returns
/// JSON string: `{"ok": SnapshotMetadata}`
///
/// # Safety
/// - `book` must be a valid pointer from `quotebook_open` or null
/// - Caller must free the returned string with `quotebook_string_free`
#[no_mangle]
pub unsafe extern "C" fn quotebook_metadata(book: *const Quotebook) -> *mut c_char {
    let Some(book) = book.as_ref() else {
        return fail("null quotebook pointer");
    };
    respond(Ok(book.metadata()))
}

/// Get the engine version.
///
/// # Safety
/// The returned pointer is static and must NOT be freed.
#[no_mangle]
pub unsafe extern "C" fn quotebook_version() -> *const c_char {
    concat!(env!("CARGO_PKG_VERSION"), "\0").as_ptr() as *const c_char
}
