//! Error types for the Quotebook engine.

use crate::sync::SyncPhase;
use crate::ItemId;
use thiserror::Error;

/// All possible errors from the Quotebook engine.
///
/// None of these is fatal: the worst outcome of any failed call is that the
/// Store is left exactly as it was.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Boundary errors
    #[error("invalid item: {0}")]
    Validation(String),

    #[error("malformed payload: {0}")]
    Parse(String),

    // Sync errors
    #[error("remote unavailable: {0}")]
    Network(String),

    #[error("sync pass already in progress (phase: {0})")]
    Busy(SyncPhase),

    // Lookup errors
    #[error("no pending conflict for item: {0}")]
    ConflictNotFound(ItemId),

    #[error("item not found: {0}")]
    ItemNotFound(ItemId),

    // Storage errors
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl Error {
    /// Whether retrying the same call later can succeed without any other change.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Network(_) | Error::Busy(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Parse(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Persistence(e.to_string())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
