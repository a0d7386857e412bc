//! In-memory storage implementation
//!
//! This module provides an in-memory [`LogStore`], suitable for testing and
//! for embedding where durability is not needed.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, info, trace};

use faultlog_core::{LogRecord, RecordId};

use crate::LogStore;
use crate::error::StorageError;
use crate::filter::{IndexHint, RecordFilter, TagIndex};
use crate::partition::{PartitionBounds, PartitionDescriptor, PartitionScheme, key_window};
use crate::purge::PurgeReport;

type RecordKey = (i64, u64);

/// Records and indexes of one partition
#[derive(Debug, Default)]
struct PartitionData {
    records: BTreeMap<RecordKey, LogRecord>,
    by_code: BTreeSet<(i64, i64, u64)>,
    by_username: BTreeSet<(String, i64, u64)>,
    by_object: BTreeSet<(String, i64, u64)>,
    by_event_type: BTreeSet<(String, i64, u64)>,
    approx_bytes: u64,
}

impl PartitionData {
    fn tag_index(&self, index: TagIndex) -> &BTreeSet<(String, i64, u64)> {
        match index {
            TagIndex::Username => &self.by_username,
            TagIndex::ObjectName => &self.by_object,
            TagIndex::EventType => &self.by_event_type,
        }
    }

    fn tag_index_mut(&mut self, index: TagIndex) -> &mut BTreeSet<(String, i64, u64)> {
        match index {
            TagIndex::Username => &mut self.by_username,
            TagIndex::ObjectName => &mut self.by_object,
            TagIndex::EventType => &mut self.by_event_type,
        }
    }

    fn insert(&mut self, record: &LogRecord) -> Result<(), StorageError> {
        let key = record.key();
        let (ts, id) = key;
        if self.records.contains_key(&key) {
            return Err(StorageError::DuplicateKey {
                occurred_at_micros: ts,
                id,
            });
        }

        if let Some(code) = record.code {
            self.by_code.insert((code, ts, id));
        }
        for index in TagIndex::ALL {
            if let Some(value) = index.value_of(record) {
                self.tag_index_mut(index).insert((value.to_string(), ts, id));
            }
        }
        self.approx_bytes += record.approx_size();
        self.records.insert(key, record.clone());
        Ok(())
    }

    /// Keys in `[start, end]` selected by the index hint, in index order
    fn candidate_keys(&self, start: i64, end: i64, hint: IndexHint<'_>) -> Vec<RecordKey> {
        match hint {
            IndexHint::Time => self
                .records
                .range((start, 0)..=(end, u64::MAX))
                .map(|(key, _)| *key)
                .collect(),
            IndexHint::Code(code) => self
                .by_code
                .range((code, start, 0)..=(code, end, u64::MAX))
                .map(|&(_, ts, id)| (ts, id))
                .collect(),
            IndexHint::Tag(index, value) => self
                .tag_index(index)
                .range((value.to_string(), start, 0)..=(value.to_string(), end, u64::MAX))
                .map(|(_, ts, id)| (*ts, *id))
                .collect(),
        }
    }
}

/// One time partition with its own lock
#[derive(Debug)]
struct MemPartition {
    bounds: PartitionBounds,
    data: RwLock<PartitionData>,
}

impl MemPartition {
    fn new(bounds: PartitionBounds) -> Self {
        Self {
            bounds,
            data: RwLock::new(PartitionData::default()),
        }
    }

    fn descriptor(&self) -> PartitionDescriptor {
        let data = self.data.read();
        PartitionDescriptor::new(self.bounds, data.records.len() as u64, data.approx_bytes)
    }
}

/// In-memory implementation of LogStore
///
/// Partitions live in an ordered map keyed by range start. Appends into an
/// existing partition only take the map's read lock plus that partition's
/// write lock, so writers into different partitions do not contend. Creating
/// a partition takes the map's write lock and re-checks, so concurrent first
/// writers into the same range create it exactly once.
#[derive(Debug)]
pub struct InMemoryLogStore {
    scheme: PartitionScheme,
    partitions: RwLock<BTreeMap<i64, MemPartition>>,
    /// Number of partitions ever created
    created: AtomicUsize,
    /// Largest id appended so far (0 = none)
    high_water: AtomicU64,
}

impl Default for InMemoryLogStore {
    fn default() -> Self {
        Self::new(PartitionScheme::default())
    }
}

impl InMemoryLogStore {
    /// Create a new in-memory store
    pub fn new(scheme: PartitionScheme) -> Self {
        Self {
            scheme,
            partitions: RwLock::new(BTreeMap::new()),
            created: AtomicUsize::new(0),
            high_water: AtomicU64::new(0),
        }
    }

    /// Number of partitions created since the store was opened
    pub fn partitions_created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Number of partitions currently held
    pub fn partition_count(&self) -> usize {
        self.partitions.read().len()
    }

    /// Total records across all partitions
    pub fn total_records(&self) -> usize {
        self.partitions
            .read()
            .values()
            .map(|p| p.data.read().records.len())
            .sum()
    }

    fn collect<T>(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        filter: &RecordFilter,
        mut visit: impl FnMut(&LogRecord) -> Option<T>,
    ) -> Vec<T> {
        let Some((start_us, end_us)) = key_window(start, end) else {
            return Vec::new();
        };
        let hint = filter.index_hint();
        let partitions = self.partitions.read();
        let mut out = Vec::new();

        for partition in partitions
            .range(..=end_us)
            .map(|(_, p)| p)
            .filter(|p| p.bounds.overlaps(start, end))
        {
            let data = partition.data.read();
            let mut keys = data.candidate_keys(start_us, end_us, hint);
            keys.sort_unstable();
            out.extend(
                keys.iter()
                    .filter_map(|key| data.records.get(key))
                    .filter(|record| filter.matches(record))
                    .filter_map(&mut visit),
            );
        }
        out
    }
}

impl LogStore for InMemoryLogStore {
    fn scheme(&self) -> &PartitionScheme {
        &self.scheme
    }

    fn append(&self, record: &LogRecord) -> Result<(), StorageError> {
        let bounds = self.scheme.bounds_for(record.occurred_at)?;
        let key = bounds.key();

        {
            let partitions = self.partitions.read();
            if let Some(partition) = partitions.get(&key) {
                partition.data.write().insert(record)?;
                self.high_water.fetch_max(record.id.0, Ordering::SeqCst);
                trace!(id = %record.id, partition = %bounds.name(), "Appended record");
                return Ok(());
            }
        }

        // Slow path: the partition may not exist yet
        let mut partitions = self.partitions.write();
        let partition = partitions.entry(key).or_insert_with(|| {
            self.created.fetch_add(1, Ordering::SeqCst);
            info!(partition = %bounds.name(), end = %bounds.end, "Created partition");
            MemPartition::new(bounds)
        });
        partition.data.write().insert(record)?;
        self.high_water.fetch_max(record.id.0, Ordering::SeqCst);
        trace!(id = %record.id, partition = %bounds.name(), "Appended record");
        Ok(())
    }

    fn range_scan(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        filter: &RecordFilter,
    ) -> Result<Vec<LogRecord>, StorageError> {
        Ok(self.collect(start, end, filter, |record| Some(record.clone())))
    }

    fn count(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        filter: &RecordFilter,
    ) -> Result<u64, StorageError> {
        if !filter.index_only() {
            return Ok(self.collect(start, end, filter, |_| Some(())).len() as u64);
        }

        let Some((start_us, end_us)) = key_window(start, end) else {
            return Ok(0);
        };
        let hint = filter.index_hint();
        let partitions = self.partitions.read();
        let total = partitions
            .range(..=end_us)
            .map(|(_, p)| p)
            .filter(|p| p.bounds.overlaps(start, end))
            .map(|p| p.data.read().candidate_keys(start_us, end_us, hint).len() as u64)
            .sum();
        Ok(total)
    }

    fn partitions(&self) -> Result<Vec<PartitionDescriptor>, StorageError> {
        Ok(self
            .partitions
            .read()
            .values()
            .map(MemPartition::descriptor)
            .collect())
    }

    fn drop_partitions_before(&self, cutoff: DateTime<Utc>) -> PurgeReport {
        let mut report = PurgeReport::new(cutoff);
        let mut partitions = self.partitions.write();

        let expired: Vec<i64> = partitions
            .iter()
            .take_while(|(_, p)| p.bounds.expired_by(cutoff))
            .map(|(key, _)| *key)
            .collect();

        for key in expired {
            if let Some(partition) = partitions.remove(&key) {
                let descriptor = partition.descriptor();
                debug!(
                    partition = %descriptor.name,
                    records = descriptor.record_count,
                    "Dropped partition"
                );
                report.record_drop(descriptor);
            }
        }

        if report.partitions_dropped() > 0 {
            info!(
                cutoff = %cutoff,
                partitions = report.partitions_dropped(),
                records = report.records_deleted,
                "Dropped expired partitions"
            );
        }
        report
    }

    fn high_water_id(&self) -> Result<Option<RecordId>, StorageError> {
        Ok(match self.high_water.load(Ordering::SeqCst) {
            0 => None,
            id => Some(RecordId(id)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use faultlog_core::{EventType, NewRecord, SessionContext, Severity};

    fn ymd(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn record_at(id: u64, ts: DateTime<Utc>, code: Option<i64>) -> LogRecord {
        let mut new = NewRecord::new(EventType::Error, Severity::Error);
        new.occurred_at = Some(ts);
        new.code = code;
        new.message = Some(format!("record {id}"));
        new.actor = SessionContext::anonymous().with_username("alice");
        LogRecord::resolve(RecordId(id), new, ts)
    }

    fn weekly_store() -> InMemoryLogStore {
        InMemoryLogStore::new(PartitionScheme::weekly(ymd(2025, 1, 1)))
    }

    #[test]
    fn test_lazy_partition_creation() {
        let store = weekly_store();
        assert_eq!(store.partition_count(), 0);

        store.append(&record_at(1, ymd(2025, 1, 1), None)).unwrap();
        let parts = store.partitions().unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].start, ymd(2025, 1, 1));
        assert_eq!(parts[0].end, ymd(2025, 1, 8));

        store.append(&record_at(2, ymd(2025, 1, 10), None)).unwrap();
        let parts = store.partitions().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1].start, ymd(2025, 1, 8));
        assert_eq!(parts[1].end, ymd(2025, 1, 15));
        assert_eq!(store.partitions_created(), 2);
    }

    #[test]
    fn test_append_then_scan_round_trip() {
        let store = weekly_store();
        let record = record_at(1, ymd(2025, 1, 3) + Duration::milliseconds(250), Some(42));
        store.append(&record).unwrap();

        let found = store
            .range_scan(ymd(2025, 1, 3), ymd(2025, 1, 4), &RecordFilter::all())
            .unwrap();
        assert_eq!(found, vec![record]);
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let store = weekly_store();
        let record = record_at(5, ymd(2025, 1, 2), None);
        store.append(&record).unwrap();

        let err = store.append(&record).unwrap_err();
        assert!(matches!(err, StorageError::DuplicateKey { id: 5, .. }));
        assert_eq!(store.total_records(), 1);
    }

    #[test]
    fn test_scan_orders_by_time_then_id() {
        let store = weekly_store();
        let ts = ymd(2025, 1, 5);
        store.append(&record_at(3, ts, None)).unwrap();
        store.append(&record_at(1, ts, None)).unwrap();
        store.append(&record_at(2, ts - Duration::seconds(1), None)).unwrap();

        let ids: Vec<u64> = store
            .range_scan(ymd(2025, 1, 1), ymd(2025, 1, 8), &RecordFilter::all())
            .unwrap()
            .iter()
            .map(|r| r.id.0)
            .collect();
        assert_eq!(ids, vec![2, 1, 3]);
    }

    #[test]
    fn test_count_uses_code_index_across_partitions() {
        let store = weekly_store();
        let mut id = 0;
        for day in [2, 3, 4] {
            id += 1;
            store.append(&record_at(id, ymd(2025, 1, day), Some(1017))).unwrap();
        }
        for day in [9, 10, 11, 12, 13] {
            id += 1;
            store.append(&record_at(id, ymd(2025, 1, day), Some(1017))).unwrap();
        }
        id += 1;
        store.append(&record_at(id, ymd(2025, 1, 12), Some(600))).unwrap();

        let filter = RecordFilter::all().with_code(1017);
        assert_eq!(store.count(ymd(2025, 1, 1), ymd(2025, 1, 14), &filter).unwrap(), 8);
        assert_eq!(
            store
                .count(ymd(2025, 1, 1), ymd(2025, 1, 14), &RecordFilter::all())
                .unwrap(),
            9
        );
    }

    #[test]
    fn test_inclusive_bounds() {
        let store = weekly_store();
        store.append(&record_at(1, ymd(2025, 1, 2), None)).unwrap();

        let filter = RecordFilter::all();
        assert_eq!(store.count(ymd(2025, 1, 2), ymd(2025, 1, 2), &filter).unwrap(), 1);
        assert_eq!(
            store
                .count(ymd(2025, 1, 2) + Duration::microseconds(1), ymd(2025, 1, 3), &filter)
                .unwrap(),
            0
        );
    }

    #[test]
    fn test_multi_dimension_count_filters_records() {
        let store = weekly_store();
        store.append(&record_at(1, ymd(2025, 1, 2), Some(1))).unwrap();
        let mut other = record_at(2, ymd(2025, 1, 2), Some(1));
        other.actor.username = Some("bob".into());
        store.append(&other).unwrap();

        let filter = RecordFilter::all().with_code(1).with_username("bob");
        assert_eq!(store.count(ymd(2025, 1, 1), ymd(2025, 1, 8), &filter).unwrap(), 1);
    }

    #[test]
    fn test_drop_partitions_before_cutoff() {
        let store = weekly_store();
        store.append(&record_at(1, ymd(2025, 1, 2), None)).unwrap();
        store.append(&record_at(2, ymd(2025, 1, 3), None)).unwrap();
        store.append(&record_at(3, ymd(2025, 1, 9), None)).unwrap();
        store.append(&record_at(4, ymd(2025, 1, 20), None)).unwrap();

        // Second partition ends 2025-01-15, which is after the cutoff
        let report = store.drop_partitions_before(ymd(2025, 1, 14));
        assert!(report.is_complete());
        assert_eq!(report.partitions_dropped(), 1);
        assert_eq!(report.records_deleted, 2);

        let all = RecordFilter::all();
        assert!(store.range_scan(ymd(2025, 1, 1), ymd(2025, 1, 7), &all).unwrap().is_empty());
        assert_eq!(store.count(ymd(2025, 1, 1), ymd(2025, 2, 1), &all).unwrap(), 2);

        // Boundary: upper bound equal to cutoff is dropped
        let report = store.drop_partitions_before(ymd(2025, 1, 15));
        assert_eq!(report.partitions_dropped(), 1);
        assert_eq!(store.partition_count(), 1);
    }

    #[test]
    fn test_high_water_tracks_max_id() {
        let store = weekly_store();
        assert_eq!(store.high_water_id().unwrap(), None);
        store.append(&record_at(9, ymd(2025, 1, 2), None)).unwrap();
        store.append(&record_at(4, ymd(2025, 1, 3), None)).unwrap();
        assert_eq!(store.high_water_id().unwrap(), Some(RecordId(9)));
    }
}
