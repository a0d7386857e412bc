//! redb table definitions
//!
//! Each partition owns a family of tables named after its start (in
//! microseconds), so dropping a partition is a fixed number of table
//! deletions regardless of how many records it holds.

use redb::{ReadTransaction, ReadOnlyTable, TableDefinition, TableError};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::filter::TagIndex;
use crate::partition::{PartitionBounds, PartitionDescriptor, PartitionScheme};

// Key: partition start (micros), Value: serialized PartitionMeta
pub const PARTITIONS: TableDefinition<i64, &[u8]> = TableDefinition::new("partitions");

// Key: setting name, Value: raw bytes (see keys below)
pub const META: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");

/// META key: largest record id ever written (u64 big-endian)
pub const HIGH_WATER_KEY: &str = "id_high_water";

/// META key: serialized StoredScheme
pub const SCHEME_KEY: &str = "partition_scheme";

/// Record key: (occurred_at micros, id)
pub type RecordKey = (i64, u64);

/// Code index key: (code, occurred_at micros, id)
pub type CodeKey = (i64, i64, u64);

/// Tag index key: (value, occurred_at micros, id)
pub type TagKey = (&'static str, i64, u64);

/// Registry entry for one partition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionMeta {
    pub start_micros: i64,
    pub end_micros: i64,
    pub record_count: u64,
    pub approx_bytes: u64,
}

impl PartitionMeta {
    pub fn new(bounds: &PartitionBounds) -> Self {
        Self {
            start_micros: bounds.key(),
            end_micros: bounds.end_micros(),
            record_count: 0,
            approx_bytes: 0,
        }
    }

    pub fn bounds(&self) -> Result<PartitionBounds, StorageError> {
        PartitionBounds::from_micros(self.start_micros, self.end_micros)
    }

    pub fn descriptor(&self) -> Result<PartitionDescriptor, StorageError> {
        Ok(PartitionDescriptor::new(
            self.bounds()?,
            self.record_count,
            self.approx_bytes,
        ))
    }

    /// Whether the partition holds any key in the inclusive window
    pub fn overlaps(&self, start_us: i64, end_us: i64) -> bool {
        self.start_micros <= end_us && start_us < self.end_micros
    }
}

/// Partition scheme as persisted in META
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredScheme {
    pub epoch_micros: i64,
    pub width_micros: i64,
}

impl From<&PartitionScheme> for StoredScheme {
    fn from(scheme: &PartitionScheme) -> Self {
        Self {
            epoch_micros: scheme.epoch().timestamp_micros(),
            width_micros: scheme.width_micros(),
        }
    }
}

/// Names of the tables belonging to one partition
pub struct PartitionTables {
    records: String,
    by_code: String,
    by_username: String,
    by_object: String,
    by_event_type: String,
}

impl PartitionTables {
    pub fn for_partition(start_micros: i64) -> Self {
        Self {
            records: format!("records@{start_micros}"),
            by_code: format!("idx_code@{start_micros}"),
            by_username: format!("idx_username@{start_micros}"),
            by_object: format!("idx_object@{start_micros}"),
            by_event_type: format!("idx_event_type@{start_micros}"),
        }
    }

    pub fn records(&self) -> TableDefinition<'_, RecordKey, &'static [u8]> {
        TableDefinition::new(&self.records)
    }

    pub fn by_code(&self) -> TableDefinition<'_, CodeKey, ()> {
        TableDefinition::new(&self.by_code)
    }

    pub fn by_tag(&self, index: TagIndex) -> TableDefinition<'_, TagKey, ()> {
        let name = match index {
            TagIndex::Username => &self.by_username,
            TagIndex::ObjectName => &self.by_object,
            TagIndex::EventType => &self.by_event_type,
        };
        TableDefinition::new(name)
    }
}

/// Open a table for reading, treating a missing table as empty
pub fn open_optional<K, V>(
    txn: &ReadTransaction,
    definition: TableDefinition<'_, K, V>,
) -> Result<Option<ReadOnlyTable<K, V>>, StorageError>
where
    K: redb::Key + 'static,
    V: redb::Value + 'static,
{
    match txn.open_table(definition) {
        Ok(table) => Ok(Some(table)),
        Err(TableError::TableDoesNotExist(_)) => Ok(None),
        Err(e) => Err(e.into()),
    }
}
