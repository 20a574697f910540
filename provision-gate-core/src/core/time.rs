// provision-gate-core/src/core/time.rs
// ============================================================================
// Module: Provision Gate Time Model
// Description: Canonical timestamp representation for policy records.
// Purpose: Keep the evaluation core free of wall-clock reads.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Policy records carry explicit creation and update timestamps stamped by
//! the storage backend. The evaluation core never reads wall-clock time;
//! hosts supply timestamps at the persistence boundary.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Time Values
// ============================================================================

/// Unix-epoch millisecond timestamp used on policy records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp from unix-epoch milliseconds.
    #[must_use]
    pub const fn from_unix_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as unix-epoch milliseconds.
    #[must_use]
    pub const fn as_unix_millis(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
