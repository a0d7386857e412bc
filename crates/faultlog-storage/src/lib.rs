//! # Faultlog Storage
//!
//! Time-partitioned storage for faultlog records.
//!
//! Records are grouped into fixed-width time partitions. A partition is
//! created the first time a record lands in its range and is only ever
//! removed as a whole, once its entire range has expired.
//!
//! ## Features
//!
//! - **LogStore trait**: Append, range scan, index-backed counts, inventory, purge
//! - **InMemoryLogStore**: In-memory implementation for testing/embedding
//! - **PersistentLogStore**: Durable implementation on redb
//! - **PartitionScheme**: Epoch-anchored, fixed-width partition grid
//!
//! ## Example
//!
//! ```rust,ignore
//! use faultlog_storage::{InMemoryLogStore, LogStore, PartitionScheme, RecordFilter};
//!
//! let store = InMemoryLogStore::new(PartitionScheme::default());
//! store.append(&record)?;
//!
//! let hits = store.range_scan(start, end, &RecordFilter::all().with_code(1017))?;
//! let expired = store.drop_partitions_before(cutoff);
//! ```

pub mod error;
pub mod filter;
pub mod memory;
pub mod partition;
pub mod persistent;
pub mod purge;
mod tables;

// Re-exports
pub use error::StorageError;
pub use filter::{IndexHint, RecordFilter, TagIndex};
pub use memory::InMemoryLogStore;
pub use partition::{
    DEFAULT_WIDTH_DAYS, PartitionBounds, PartitionDescriptor, PartitionScheme, key_window,
};
pub use persistent::{PersistentLogStore, PersistentLogStoreConfig};
pub use purge::PurgeReport;

use chrono::{DateTime, Utc};
use faultlog_core::{LogRecord, RecordId};

/// Time-partitioned, append-only record store
///
/// All methods are synchronous; each call is its own unit of work and never
/// joins a transaction owned by the caller. Implementations must be safe to
/// call from many threads at once.
pub trait LogStore: Send + Sync {
    /// The grid used to assign records to partitions
    fn scheme(&self) -> &PartitionScheme;

    /// Append a record, creating its partition if needed
    ///
    /// Either the record and all of its index entries are written, or
    /// nothing is.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::DuplicateKey`] if a record with the same
    /// `(occurred_at, id)` already exists, or a backend error.
    fn append(&self, record: &LogRecord) -> Result<(), StorageError>;

    /// Records with `start <= occurred_at <= end` that match `filter`
    ///
    /// Results are ordered by `(occurred_at, id)`.
    fn range_scan(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        filter: &RecordFilter,
    ) -> Result<Vec<LogRecord>, StorageError>;

    /// Number of records in `[start, end]` matching `filter`
    ///
    /// Single-dimension filters are answered from the indexes alone.
    fn count(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        filter: &RecordFilter,
    ) -> Result<u64, StorageError>;

    /// All existing partitions, ordered by range
    fn partitions(&self) -> Result<Vec<PartitionDescriptor>, StorageError>;

    /// Drop every partition whose upper bound is at or before `cutoff`
    fn drop_partitions_before(&self, cutoff: DateTime<Utc>) -> PurgeReport;

    /// Largest record id ever stored
    fn high_water_id(&self) -> Result<Option<RecordId>, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test that the LogStore trait is object-safe
    fn _assert_object_safe(_: &dyn LogStore) {}
}
