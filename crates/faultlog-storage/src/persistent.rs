//! Persistent storage implementation on redb
//!
//! Every append is a single redb write transaction: the record, its index
//! entries, the partition registry update, and the id high-water mark commit
//! together or not at all. redb admits one writer at a time, so partition
//! creation inside that transaction is an atomic compare-and-create.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use redb::{Database, Durability, ReadTransaction, ReadableTable, WriteTransaction};
use tracing::{debug, info, instrument, warn};

use faultlog_core::{LogRecord, RecordId};

use crate::LogStore;
use crate::error::StorageError;
use crate::filter::{IndexHint, RecordFilter, TagIndex};
use crate::partition::{PartitionBounds, PartitionDescriptor, PartitionScheme, key_window};
use crate::purge::PurgeReport;
use crate::tables::{
    HIGH_WATER_KEY, META, PARTITIONS, PartitionMeta, PartitionTables, RecordKey, SCHEME_KEY,
    StoredScheme, open_optional,
};

/// Configuration for the persistent store
#[derive(Debug, Clone)]
pub struct PersistentLogStoreConfig {
    /// Path to the database file
    pub db_path: PathBuf,
    /// Cache size in bytes
    pub cache_size: usize,
    /// Whether each commit is fsynced before returning
    pub sync_on_commit: bool,
}

impl Default for PersistentLogStoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/faultlog.redb"),
            cache_size: 64 * 1024 * 1024, // 64MB
            sync_on_commit: true,
        }
    }
}

/// redb-backed implementation of LogStore
pub struct PersistentLogStore {
    db: Database,
    scheme: PartitionScheme,
    config: PersistentLogStoreConfig,
}

impl std::fmt::Debug for PersistentLogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentLogStore")
            .field("scheme", &self.scheme)
            .field("config", &self.config)
            .finish()
    }
}

impl PersistentLogStore {
    /// Open or create the database
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be opened or if it was created with a
    /// different partition scheme.
    #[instrument(skip(config), fields(path = %config.db_path.display()))]
    pub fn open(
        config: PersistentLogStoreConfig,
        scheme: PartitionScheme,
    ) -> Result<Self, StorageError> {
        // Ensure parent directory exists
        if let Some(parent) = config.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::builder()
            .set_cache_size(config.cache_size)
            .create(&config.db_path)?;

        let store = Self { db, scheme, config };
        store.init_tables()?;

        info!(scheme = %store.scheme, "Opened faultlog database");
        Ok(store)
    }

    /// Get the configuration
    pub fn config(&self) -> &PersistentLogStoreConfig {
        &self.config
    }

    /// Create the fixed tables and pin the partition scheme
    fn init_tables(&self) -> Result<(), StorageError> {
        let write_txn = self.db.begin_write()?;
        {
            write_txn.open_table(PARTITIONS)?;
            let mut meta = write_txn.open_table(META)?;

            let configured = StoredScheme::from(&self.scheme);
            let stored = meta.get(SCHEME_KEY)?.map(|v| v.value().to_vec());
            match stored {
                Some(bytes) => {
                    let stored: StoredScheme = postcard::from_bytes(&bytes)?;
                    if stored != configured {
                        return Err(StorageError::SchemeMismatch {
                            stored: format!("{stored:?}"),
                            configured: format!("{configured:?}"),
                        });
                    }
                }
                None => {
                    let bytes = postcard::to_allocvec(&configured)
                        .map_err(|e| StorageError::serialization(e.to_string()))?;
                    meta.insert(SCHEME_KEY, bytes.as_slice())?;
                }
            }
        }
        write_txn.commit()?;

        debug!("Initialized redb tables");
        Ok(())
    }

    /// Write a record and its index entries inside `txn`
    ///
    /// Returns whether the partition was created by this write.
    fn write_record(
        txn: &WriteTransaction,
        bounds: &PartitionBounds,
        record: &LogRecord,
        bytes: &[u8],
    ) -> Result<bool, StorageError> {
        let tables = PartitionTables::for_partition(bounds.key());
        let (ts, id) = record.key();

        let mut partitions = txn.open_table(PARTITIONS)?;
        let existing = partitions.get(bounds.key())?.map(|v| v.value().to_vec());
        let (mut meta, created) = match existing {
            Some(raw) => (postcard::from_bytes::<PartitionMeta>(&raw)?, false),
            None => (PartitionMeta::new(bounds), true),
        };

        {
            let mut records = txn.open_table(tables.records())?;
            if records.get((ts, id))?.is_some() {
                return Err(StorageError::DuplicateKey {
                    occurred_at_micros: ts,
                    id,
                });
            }
            records.insert((ts, id), bytes)?;
        }

        // Index tables are opened unconditionally so they exist from the
        // moment the partition does.
        {
            let mut by_code = txn.open_table(tables.by_code())?;
            if let Some(code) = record.code {
                by_code.insert((code, ts, id), ())?;
            }
        }
        for index in TagIndex::ALL {
            let mut table = txn.open_table(tables.by_tag(index))?;
            if let Some(value) = index.value_of(record) {
                table.insert((value, ts, id), ())?;
            }
        }

        meta.record_count += 1;
        meta.approx_bytes += bytes.len() as u64;
        let meta_bytes =
            postcard::to_allocvec(&meta).map_err(|e| StorageError::serialization(e.to_string()))?;
        partitions.insert(bounds.key(), meta_bytes.as_slice())?;

        let mut settings = txn.open_table(META)?;
        let high_water = settings
            .get(HIGH_WATER_KEY)?
            .map(|v| decode_u64(v.value()))
            .transpose()?
            .unwrap_or(0);
        if id > high_water {
            settings.insert(HIGH_WATER_KEY, id.to_be_bytes().as_slice())?;
        }

        Ok(created)
    }

    fn load_partitions(txn: &ReadTransaction) -> Result<Vec<PartitionMeta>, StorageError> {
        let Some(table) = open_optional(txn, PARTITIONS)? else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            out.push(postcard::from_bytes::<PartitionMeta>(value.value())?);
        }
        Ok(out)
    }

    /// Keys selected by an index, or `None` when the time order drives the scan
    fn index_keys(
        txn: &ReadTransaction,
        tables: &PartitionTables,
        start: i64,
        end: i64,
        hint: IndexHint<'_>,
    ) -> Result<Option<Vec<RecordKey>>, StorageError> {
        let mut keys = Vec::new();
        match hint {
            IndexHint::Time => return Ok(None),
            IndexHint::Code(code) => {
                if let Some(table) = open_optional(txn, tables.by_code())? {
                    for entry in table.range((code, start, 0u64)..=(code, end, u64::MAX))? {
                        let (key, _) = entry?;
                        let (_, ts, id) = key.value();
                        keys.push((ts, id));
                    }
                }
            }
            IndexHint::Tag(index, value) => {
                if let Some(table) = open_optional(txn, tables.by_tag(index))? {
                    for entry in table.range((value, start, 0u64)..=(value, end, u64::MAX))? {
                        let (key, _) = entry?;
                        let (_, ts, id) = key.value();
                        keys.push((ts, id));
                    }
                }
            }
        }
        Ok(Some(keys))
    }

    fn scan_partition(
        txn: &ReadTransaction,
        meta: &PartitionMeta,
        start: i64,
        end: i64,
        filter: &RecordFilter,
        out: &mut Vec<LogRecord>,
    ) -> Result<(), StorageError> {
        let tables = PartitionTables::for_partition(meta.start_micros);
        let Some(records) = open_optional(txn, tables.records())? else {
            return Ok(());
        };

        match Self::index_keys(txn, &tables, start, end, filter.index_hint())? {
            None => {
                for entry in records.range((start, 0u64)..=(end, u64::MAX))? {
                    let (_, value) = entry?;
                    let record: LogRecord = postcard::from_bytes(value.value())?;
                    if filter.matches(&record) {
                        out.push(record);
                    }
                }
            }
            Some(keys) => {
                for key in keys {
                    if let Some(value) = records.get(key)? {
                        let record: LogRecord = postcard::from_bytes(value.value())?;
                        if filter.matches(&record) {
                            out.push(record);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn count_partition(
        txn: &ReadTransaction,
        meta: &PartitionMeta,
        start: i64,
        end: i64,
        hint: IndexHint<'_>,
    ) -> Result<u64, StorageError> {
        let tables = PartitionTables::for_partition(meta.start_micros);
        if let Some(keys) = Self::index_keys(txn, &tables, start, end, hint)? {
            return Ok(keys.len() as u64);
        }

        let Some(records) = open_optional(txn, tables.records())? else {
            return Ok(0);
        };
        let mut count = 0;
        for entry in records.range((start, 0u64)..=(end, u64::MAX))? {
            entry?;
            count += 1;
        }
        Ok(count)
    }

    /// Drop one partition's tables and registry entry in its own transaction
    fn drop_partition(&self, meta: &PartitionMeta) -> Result<(), StorageError> {
        let tables = PartitionTables::for_partition(meta.start_micros);
        let txn = self.db.begin_write()?;
        let result = (|| -> Result<(), StorageError> {
            txn.delete_table(tables.records())?;
            txn.delete_table(tables.by_code())?;
            for index in TagIndex::ALL {
                txn.delete_table(tables.by_tag(index))?;
            }
            let mut partitions = txn.open_table(PARTITIONS)?;
            partitions.remove(meta.start_micros)?;
            Ok(())
        })();

        match result {
            Ok(()) => {
                txn.commit()?;
                Ok(())
            }
            Err(e) => {
                if let Err(abort_err) = txn.abort() {
                    warn!(error = %abort_err, "Failed to abort partition drop");
                }
                Err(e)
            }
        }
    }
}

impl LogStore for PersistentLogStore {
    fn scheme(&self) -> &PartitionScheme {
        &self.scheme
    }

    fn append(&self, record: &LogRecord) -> Result<(), StorageError> {
        let bounds = self.scheme.bounds_for(record.occurred_at)?;
        let bytes =
            postcard::to_allocvec(record).map_err(|e| StorageError::serialization(e.to_string()))?;

        let mut txn = self.db.begin_write()?;
        if !self.config.sync_on_commit {
            txn.set_durability(Durability::Eventual);
        }

        match Self::write_record(&txn, &bounds, record, &bytes) {
            Ok(created) => {
                txn.commit()?;
                if created {
                    info!(partition = %bounds.name(), end = %bounds.end, "Created partition");
                }
                debug!(id = %record.id, partition = %bounds.name(), "Appended record");
                Ok(())
            }
            Err(e) => {
                if let Err(abort_err) = txn.abort() {
                    warn!(error = %abort_err, "Failed to abort append");
                }
                Err(e)
            }
        }
    }

    fn range_scan(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        filter: &RecordFilter,
    ) -> Result<Vec<LogRecord>, StorageError> {
        let Some((start_us, end_us)) = key_window(start, end) else {
            return Ok(Vec::new());
        };
        let txn = self.db.begin_read()?;
        let mut out = Vec::new();

        for meta in Self::load_partitions(&txn)?
            .iter()
            .filter(|m| m.overlaps(start_us, end_us))
        {
            let first = out.len();
            Self::scan_partition(&txn, meta, start_us, end_us, filter, &mut out)?;
            out[first..].sort_by_key(LogRecord::key);
        }
        Ok(out)
    }

    fn count(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        filter: &RecordFilter,
    ) -> Result<u64, StorageError> {
        if !filter.index_only() {
            return self.range_scan(start, end, filter).map(|r| r.len() as u64);
        }

        let Some((start_us, end_us)) = key_window(start, end) else {
            return Ok(0);
        };
        let hint = filter.index_hint();
        let txn = self.db.begin_read()?;
        let mut total = 0;
        for meta in Self::load_partitions(&txn)?
            .iter()
            .filter(|m| m.overlaps(start_us, end_us))
        {
            total += Self::count_partition(&txn, meta, start_us, end_us, hint)?;
        }
        Ok(total)
    }

    fn partitions(&self) -> Result<Vec<PartitionDescriptor>, StorageError> {
        let txn = self.db.begin_read()?;
        Self::load_partitions(&txn)?
            .iter()
            .map(PartitionMeta::descriptor)
            .collect()
    }

    fn drop_partitions_before(&self, cutoff: DateTime<Utc>) -> PurgeReport {
        let report = PurgeReport::new(cutoff);

        let expired: Vec<PartitionMeta> = match self
            .db
            .begin_read()
            .map_err(StorageError::from)
            .and_then(|txn| Self::load_partitions(&txn))
        {
            Ok(all) => all
                .into_iter()
                .filter(|m| m.end_micros <= cutoff.timestamp_micros())
                .collect(),
            Err(e) => return report.fail(e),
        };

        let mut report = report;
        for meta in expired {
            let descriptor = match meta.descriptor() {
                Ok(d) => d,
                Err(e) => return report.fail(e),
            };
            if let Err(e) = self.drop_partition(&meta) {
                warn!(partition = %descriptor.name, error = %e, "Partition drop failed");
                return report.fail(e);
            }
            debug!(
                partition = %descriptor.name,
                records = descriptor.record_count,
                "Dropped partition"
            );
            report.record_drop(descriptor);
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
        let txn = self.db.begin_read()?;
        let Some(meta) = open_optional(&txn, META)? else {
            return Ok(None);
        };
        let value = meta.get(HIGH_WATER_KEY)?;
        value
            .map(|v| decode_u64(v.value()).map(RecordId))
            .transpose()
    }
}

fn decode_u64(bytes: &[u8]) -> Result<u64, StorageError> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StorageError::deserialization("expected 8-byte integer"))?;
    Ok(u64::from_be_bytes(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use faultlog_core::{EventType, NewRecord, SessionContext, Severity};
    use tempfile::TempDir;

    fn ymd(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn scheme() -> PartitionScheme {
        PartitionScheme::weekly(ymd(2025, 1, 1))
    }

    fn create_test_store() -> (PersistentLogStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config = PersistentLogStoreConfig {
            db_path: temp_dir.path().join("test.redb"),
            ..Default::default()
        };
        let store = PersistentLogStore::open(config, scheme()).unwrap();
        (store, temp_dir)
    }

    fn record_at(id: u64, ts: DateTime<Utc>, code: Option<i64>) -> LogRecord {
        let mut new = NewRecord::new(EventType::ServerError, Severity::Error);
        new.occurred_at = Some(ts);
        new.code = code;
        new.message = Some(format!("failure {id}"));
        new.object_name = Some("ORDERS".into());
        new.actor = SessionContext::anonymous()
            .with_username("alice")
            .with_client("app-01", "10.1.2.3");
        LogRecord::resolve(RecordId(id), new, ts)
    }

    #[test]
    fn test_append_and_scan() {
        let (store, _temp) = create_test_store();
        let record = record_at(1, ymd(2025, 1, 1), Some(1017));
        store.append(&record).unwrap();

        let found = store
            .range_scan(ymd(2025, 1, 1), ymd(2025, 1, 1), &RecordFilter::all())
            .unwrap();
        assert_eq!(found, vec![record]);

        let parts = store.partitions().unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].name, "p20250101T000000Z");
        assert_eq!(parts[0].end, ymd(2025, 1, 8));
        assert_eq!(parts[0].record_count, 1);
        assert!(parts[0].approx_bytes > 0);
    }

    #[test]
    fn test_second_partition_created_on_demand() {
        let (store, _temp) = create_test_store();
        store.append(&record_at(1, ymd(2025, 1, 1), None)).unwrap();
        store.append(&record_at(2, ymd(2025, 1, 10), None)).unwrap();

        let parts = store.partitions().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1].start, ymd(2025, 1, 8));
        assert_eq!(parts[1].end, ymd(2025, 1, 15));
    }

    #[test]
    fn test_duplicate_key_leaves_no_trace() {
        let (store, _temp) = create_test_store();
        let record = record_at(1, ymd(2025, 1, 2), Some(7));
        store.append(&record).unwrap();
        assert!(matches!(
            store.append(&record),
            Err(StorageError::DuplicateKey { .. })
        ));

        let filter = RecordFilter::all().with_code(7);
        assert_eq!(store.count(ymd(2025, 1, 1), ymd(2025, 1, 8), &filter).unwrap(), 1);
        assert_eq!(store.partitions().unwrap()[0].record_count, 1);
    }

    #[test]
    fn test_index_backed_filters() {
        let (store, _temp) = create_test_store();
        store.append(&record_at(1, ymd(2025, 1, 2), Some(1017))).unwrap();
        store.append(&record_at(2, ymd(2025, 1, 3), Some(600))).unwrap();
        let mut bob = record_at(3, ymd(2025, 1, 4), Some(1017));
        bob.actor.username = Some("bob".into());
        store.append(&bob).unwrap();

        let (from, to) = (ymd(2025, 1, 1), ymd(2025, 1, 7));
        let by_code = RecordFilter::all().with_code(1017);
        assert_eq!(store.count(from, to, &by_code).unwrap(), 2);

        let by_user = RecordFilter::all().with_username("bob");
        let hits = store.range_scan(from, to, &by_user).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, RecordId(3));

        let by_type = RecordFilter::all().with_event_type(EventType::ServerError);
        assert_eq!(store.count(from, to, &by_type).unwrap(), 3);

        let by_object = RecordFilter::all().with_object_name("CUSTOMERS");
        assert_eq!(store.count(from, to, &by_object).unwrap(), 0);

        let combined = RecordFilter::all().with_code(1017).with_username("alice");
        assert_eq!(store.count(from, to, &combined).unwrap(), 1);
    }

    #[test]
    fn test_drop_partitions_before() {
        let (store, _temp) = create_test_store();
        store.append(&record_at(1, ymd(2025, 1, 2), Some(1))).unwrap();
        store.append(&record_at(2, ymd(2025, 1, 9), Some(1))).unwrap();
        store.append(&record_at(3, ymd(2025, 1, 16), Some(1))).unwrap();

        let report = store.drop_partitions_before(ymd(2025, 1, 15));
        assert!(report.is_complete());
        assert_eq!(report.partitions_dropped(), 2);
        assert_eq!(report.records_deleted, 2);

        let all = RecordFilter::all();
        assert!(store.range_scan(ymd(2025, 1, 1), ymd(2025, 1, 14), &all).unwrap().is_empty());
        let code = RecordFilter::all().with_code(1);
        assert_eq!(store.count(ymd(2025, 1, 1), ymd(2025, 2, 1), &code).unwrap(), 1);
        assert_eq!(store.partitions().unwrap().len(), 1);

        // Idempotent
        let again = store.drop_partitions_before(ymd(2025, 1, 15));
        assert_eq!(again.partitions_dropped(), 0);
    }

    #[test]
    fn test_reopen_recovers_state() {
        let temp_dir = TempDir::new().unwrap();
        let config = PersistentLogStoreConfig {
            db_path: temp_dir.path().join("reopen.redb"),
            ..Default::default()
        };

        {
            let store = PersistentLogStore::open(config.clone(), scheme()).unwrap();
            for id in 1..=5 {
                store
                    .append(&record_at(id, ymd(2025, 1, 2) + Duration::hours(id as i64), None))
                    .unwrap();
            }
        }

        let store = PersistentLogStore::open(config, scheme()).unwrap();
        assert_eq!(store.high_water_id().unwrap(), Some(RecordId(5)));
        assert_eq!(
            store
                .count(ymd(2025, 1, 1), ymd(2025, 1, 8), &RecordFilter::all())
                .unwrap(),
            5
        );
    }

    #[test]
    fn test_scheme_mismatch_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let config = PersistentLogStoreConfig {
            db_path: temp_dir.path().join("scheme.redb"),
            ..Default::default()
        };
        drop(PersistentLogStore::open(config.clone(), scheme()).unwrap());

        let daily = PartitionScheme::new(ymd(2025, 1, 1), Duration::days(1)).unwrap();
        let err = PersistentLogStore::open(config, daily).unwrap_err();
        assert!(matches!(err, StorageError::SchemeMismatch { .. }));
    }
}
