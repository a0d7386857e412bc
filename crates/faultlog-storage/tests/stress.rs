//! Stress tests for faultlog-storage
//!
//! These tests verify partition creation under concurrent first writers,
//! append throughput, and purge correctness on both backends.

use std::sync::Arc;
use std::thread;
use std::time::Instant;

use chrono::{DateTime, Duration, TimeZone, Utc};
use faultlog_core::{EventType, LogRecord, NewRecord, RecordId, SessionContext, Severity};
use faultlog_storage::{
    InMemoryLogStore, LogStore, PartitionScheme, PersistentLogStore, PersistentLogStoreConfig,
    RecordFilter,
};
use rand::Rng;
use tempfile::TempDir;

fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
}

fn record(id: u64, ts: DateTime<Utc>, code: i64, user: &str) -> LogRecord {
    let mut new = NewRecord::new(EventType::Error, Severity::Error);
    new.occurred_at = Some(ts);
    new.code = Some(code);
    new.message = Some(format!("stress record {id}"));
    new.actor = SessionContext::anonymous().with_username(user);
    LogRecord::resolve(RecordId(id), new, ts)
}

fn persistent_store(dir: &TempDir) -> PersistentLogStore {
    let config = PersistentLogStoreConfig {
        db_path: dir.path().join("stress.redb"),
        sync_on_commit: false,
        ..Default::default()
    };
    PersistentLogStore::open(config, PartitionScheme::weekly(epoch())).unwrap()
}

/// Spawn `threads` writers that all start at once and append into the same
/// fresh partition
fn race_first_writers(store: Arc<dyn LogStore>, threads: u64, per_thread: u64) {
    let barrier = Arc::new(std::sync::Barrier::new(threads as usize));
    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..per_thread {
                    let id = t * per_thread + i + 1;
                    let ts = epoch() + Duration::days(14) + Duration::seconds(id as i64);
                    store
                        .append(&record(id, ts, 1000 + (id % 3) as i64, "racer"))
                        .expect("append failed");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("writer panicked");
    }
}

// ============================================================================
// Sub-microsecond Bounds
// ============================================================================

/// Records and range ends carrying nanoseconds agree on both backends
fn check_nanosecond_bounds(store: &dyn LogStore) {
    let base = epoch() + Duration::days(7);
    let ns = Duration::nanoseconds;

    store.append(&record(1, base + ns(700), 7, "nano")).unwrap();
    store.append(&record(2, base + ns(1_500), 7, "nano")).unwrap();

    let all = RecordFilter::all();
    let by_code = RecordFilter::all().with_code(7);

    // Stored at whole microseconds
    let listed = store.range_scan(base, base + ns(300), &all).unwrap();
    assert_eq!(listed.len(), 1);
    assert!(listed.iter().all(|r| r.occurred_at <= base + ns(300)));
    assert_eq!(store.count(base, base + ns(300), &all).unwrap(), 1);
    assert_eq!(store.count(base, base + ns(300), &by_code).unwrap(), 1);

    // A start between keys rounds up, an end rounds down
    let (start, end) = (base + ns(300), base + ns(1_200));
    let listed = store.range_scan(start, end, &all).unwrap();
    assert_eq!(listed.iter().map(|r| r.id.value()).collect::<Vec<_>>(), vec![2]);
    assert_eq!(store.count(start, end, &by_code).unwrap(), 1);

    let (start, end) = (base + ns(1_600), base + ns(1_900));
    assert!(store.range_scan(start, end, &all).unwrap().is_empty());
    assert_eq!(store.count(start, end, &by_code).unwrap(), 0);
}

#[test]
fn test_nanosecond_bounds_memory() {
    check_nanosecond_bounds(&InMemoryLogStore::new(PartitionScheme::weekly(epoch())));
}

#[test]
fn test_nanosecond_bounds_persistent() {
    let temp_dir = TempDir::new().unwrap();
    check_nanosecond_bounds(&persistent_store(&temp_dir));
}

// ============================================================================
// Concurrent Partition Creation
// ============================================================================

#[test]
fn test_concurrent_first_writers_memory() {
    let store = Arc::new(InMemoryLogStore::new(PartitionScheme::weekly(epoch())));
    race_first_writers(store.clone(), 16, 50);

    assert_eq!(store.partitions_created(), 1);
    assert_eq!(store.partition_count(), 1);
    assert_eq!(store.total_records(), 16 * 50);
}

#[test]
fn test_concurrent_first_writers_persistent() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(persistent_store(&dir));
    race_first_writers(store.clone(), 8, 25);

    let parts = store.partitions().unwrap();
    assert_eq!(parts.len(), 1);
    assert_eq!(parts[0].start, epoch() + Duration::days(14));
    assert_eq!(parts[0].record_count, 8 * 25);
    assert_eq!(store.high_water_id().unwrap(), Some(RecordId(8 * 25)));
}

// ============================================================================
// Throughput
// ============================================================================

#[test]
fn test_memory_append_throughput() {
    let store = InMemoryLogStore::new(PartitionScheme::weekly(epoch()));
    let mut rng = rand::rng();
    let count: u64 = 10_000;

    let start = Instant::now();
    for id in 1..=count {
        // Spread over ~10 weeks
        let offset = rng.random_range(0..70 * 24 * 3600);
        let ts = epoch() + Duration::seconds(offset);
        store.append(&record(id, ts, rng.random_range(1..=20), "bulk")).unwrap();
    }
    let duration = start.elapsed();
    println!(
        "Appended {} records in {:?} ({:.2} records/sec)",
        count,
        duration,
        count as f64 / duration.as_secs_f64()
    );

    assert_eq!(store.total_records(), count as usize);
    assert_eq!(store.partition_count(), 10);

    let all = store
        .count(epoch(), epoch() + Duration::days(70), &RecordFilter::all())
        .unwrap();
    assert_eq!(all, count);

    let by_code: u64 = (1..=20)
        .map(|code| {
            store
                .count(
                    epoch(),
                    epoch() + Duration::days(70),
                    &RecordFilter::all().with_code(code),
                )
                .unwrap()
        })
        .sum();
    assert_eq!(by_code, count);
}

#[test]
fn test_range_scan_is_ordered_across_partitions() {
    let dir = TempDir::new().unwrap();
    let store = persistent_store(&dir);
    let mut rng = rand::rng();

    for id in 1..=500u64 {
        let ts = epoch() + Duration::minutes(rng.random_range(0..60 * 24 * 28));
        store.append(&record(id, ts, 1, "ordered")).unwrap();
    }

    let records = store
        .range_scan(epoch(), epoch() + Duration::days(28), &RecordFilter::all())
        .unwrap();
    assert_eq!(records.len(), 500);
    assert!(records.windows(2).all(|w| w[0].key() < w[1].key()));
}

// ============================================================================
// Purge
// ============================================================================

#[test]
fn test_purge_removes_only_expired_partitions() {
    let dir = TempDir::new().unwrap();
    let stores: Vec<Box<dyn LogStore>> = vec![
        Box::new(InMemoryLogStore::new(PartitionScheme::weekly(epoch()))),
        Box::new(persistent_store(&dir)),
    ];

    for store in &stores {
        // 10 records per week for 6 weeks
        for week in 0..6i64 {
            for i in 0..10i64 {
                let id = (week * 10 + i + 1) as u64;
                let ts = epoch() + Duration::weeks(week) + Duration::hours(i);
                store.append(&record(id, ts, 42, "purge")).unwrap();
            }
        }

        // Cutoff in the middle of week 3 only expires weeks 0..=2
        let cutoff = epoch() + Duration::weeks(3) + Duration::days(3);
        let report = store.drop_partitions_before(cutoff);
        assert!(report.is_complete());
        assert_eq!(report.partitions_dropped(), 3);
        assert_eq!(report.records_deleted, 30);

        let remaining = store.partitions().unwrap();
        assert_eq!(remaining.len(), 3);
        assert_eq!(remaining[0].start, epoch() + Duration::weeks(3));

        let left = store
            .count(epoch(), epoch() + Duration::weeks(6), &RecordFilter::all().with_code(42))
            .unwrap();
        assert_eq!(left, 30);
    }
}
