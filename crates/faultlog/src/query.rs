//! Read-only queries over the log

use std::sync::Arc;

use chrono::{DateTime, Utc};

use faultlog_core::LogRecord;
use faultlog_storage::{LogStore, PartitionDescriptor, RecordFilter};

use crate::error::QueryError;

/// Bounded reads by time range and a few indexed dimensions
///
/// All ranges are inclusive at both ends.
#[derive(Clone)]
pub struct QueryFacade {
    store: Arc<dyn LogStore>,
}

impl QueryFacade {
    pub fn new(store: Arc<dyn LogStore>) -> Self {
        Self { store }
    }

    /// Records in `[start, end]`, optionally restricted to one error code
    pub fn count_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        code: Option<i64>,
    ) -> Result<u64, QueryError> {
        let filter = match code {
            Some(code) => RecordFilter::all().with_code(code),
            None => RecordFilter::all(),
        };
        self.count_matching(start, end, &filter)
    }

    pub fn count_matching(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        filter: &RecordFilter,
    ) -> Result<u64, QueryError> {
        check_range(start, end)?;
        Ok(self.store.count(start, end, filter)?)
    }

    /// Matching records ordered by `(occurred_at, id)`
    pub fn list_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        filter: &RecordFilter,
    ) -> Result<Vec<LogRecord>, QueryError> {
        check_range(start, end)?;
        Ok(self.store.range_scan(start, end, filter)?)
    }

    /// Existing partitions, oldest first
    pub fn inventory(&self) -> Result<Vec<PartitionDescriptor>, QueryError> {
        Ok(self.store.partitions()?)
    }
}

fn check_range(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<(), QueryError> {
    if start > end {
        return Err(QueryError::InvalidRange { start, end });
    }
    Ok(())
}
