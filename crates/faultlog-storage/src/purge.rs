//! Retention purge results

use chrono::{DateTime, Utc};

use crate::error::StorageError;
use crate::partition::PartitionDescriptor;

/// Outcome of dropping expired partitions
///
/// Partitions are dropped one at a time. If a drop fails, the partitions
/// already dropped stay dropped and the failure is carried here instead of
/// discarding the partial result.
#[derive(Debug)]
pub struct PurgeReport {
    /// Partitions whose upper bound is at or before this instant were eligible
    pub cutoff: DateTime<Utc>,
    /// Partitions actually dropped, oldest first
    pub dropped: Vec<PartitionDescriptor>,
    /// Records removed with the dropped partitions
    pub records_deleted: u64,
    /// The error that stopped the purge, if any
    pub failure: Option<StorageError>,
}

impl PurgeReport {
    pub fn new(cutoff: DateTime<Utc>) -> Self {
        Self {
            cutoff,
            dropped: Vec::new(),
            records_deleted: 0,
            failure: None,
        }
    }

    /// Account for one dropped partition
    pub fn record_drop(&mut self, partition: PartitionDescriptor) {
        self.records_deleted += partition.record_count;
        self.dropped.push(partition);
    }

    /// Stop with an error
    pub fn fail(mut self, error: StorageError) -> Self {
        self.failure = Some(error);
        self
    }

    pub fn partitions_dropped(&self) -> usize {
        self.dropped.len()
    }

    /// True when every eligible partition was dropped
    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
    }
}
