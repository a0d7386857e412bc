//! Record identity generation
//!
//! Record ids are 64-bit, strictly increasing within a generator, and never
//! reused. Gaps are allowed: a failed write still consumes its id.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::IdentityError;

/// Unique identifier of a log record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(pub u64);

impl RecordId {
    /// Create a record id from a raw value
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the raw value
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RecordId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Lock-free generator of strictly increasing record ids
///
/// Concurrent callers never observe the same value. Exhaustion is reported
/// as an error instead of wrapping around.
#[derive(Debug)]
pub struct IdGenerator {
    /// Last id handed out (0 = none yet)
    last: AtomicU64,
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator {
    /// Create a generator whose first id is 1
    pub fn new() -> Self {
        Self {
            last: AtomicU64::new(0),
        }
    }

    /// Create a generator that continues after a persisted high-water mark
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Exhausted`] if `last` leaves no room for
    /// another id. Callers treat this as a fatal startup error.
    pub fn resume_after(last: u64) -> Result<Self, IdentityError> {
        if last == u64::MAX {
            return Err(IdentityError::Exhausted { last });
        }
        Ok(Self {
            last: AtomicU64::new(last),
        })
    }

    /// Hand out the next id
    pub fn next_id(&self) -> Result<RecordId, IdentityError> {
        self.last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| last.checked_add(1))
            .map(|previous| RecordId(previous + 1))
            .map_err(|last| IdentityError::Exhausted { last })
    }

    /// The last id handed out, if any
    pub fn last_issued(&self) -> Option<RecordId> {
        match self.last.load(Ordering::Acquire) {
            0 => None,
            last => Some(RecordId(last)),
        }
    }
}
