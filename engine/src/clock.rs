//! Logical clock for assigning `updatedAt` to local writes.
//!
//! The clock is a single monotonic counter. It follows wall-clock time when it
//! can, and never goes backwards when it cannot: a local write always gets a
//! timestamp strictly greater than every timestamp the store has seen.

use crate::Timestamp;
use serde::{Deserialize, Serialize};

/// A monotonic logical clock.
///
/// Timestamps are only ever used to break ties during merge. They carry no
/// ordering guarantee across clients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogicalClock {
    /// Highest timestamp issued or observed so far
    pub counter: u64,
}

impl LogicalClock {
    /// Create a new clock starting at counter 0.
    pub fn new() -> Self {
        Self { counter: 0 }
    }

    /// Create a clock with a specific counter value.
    pub fn with_counter(counter: u64) -> Self {
        Self { counter }
    }

    /// Increment the clock and return the new value.
    pub fn tick(&mut self) -> Timestamp {
        self.counter = self.counter.saturating_add(1);
        self.counter
    }

    /// Advance to `now` if it is ahead, otherwise tick. Returns the new value.
    ///
    /// Saturates at `u64::MAX`.
    pub fn tick_at(&mut self, now: Timestamp) -> Timestamp {
        self.counter = self.counter.saturating_add(1).max(now);
        self.counter
    }

    /// Advance the clock past a timestamp seen on a remote item.
    pub fn observe(&mut self, seen: Timestamp) {
        self.counter = self.counter.max(seen);
    }

    /// Wall-clock milliseconds since the epoch.
    pub fn wall_millis() -> Timestamp {
        u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
    }
}
