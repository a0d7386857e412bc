//! Isolated ingestion
//!
//! [`EventRecorder::record_event`] never fails and never rolls anything back
//! in the caller. Each record is appended on its own blocking worker, in its
//! own store transaction, bounded by the configured write timeout. When the
//! write cannot be completed the record is abandoned and reported to a
//! [`FailureReporter`] instead of being propagated.
//!
//! A timeout only abandons a write that has not started. A write already
//! inside the store is left to finish in the background; it is counted as
//! pending until it settles and reported only if it then fails.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use faultlog_core::{
    EventType, IdGenerator, IdentityError, LogRecord, NewRecord, RecordId, SessionContext,
};
use faultlog_logging::SIDE_CHANNEL_TARGET;
use faultlog_storage::{LogStore, StorageError};

use crate::config::IngestConfig;
use crate::normalize::ProducerEvent;

/// Why a record was abandoned
#[derive(Debug, Error)]
pub enum IngestFailure {
    /// No id could be assigned
    #[error("identity: {0}")]
    Identity(#[from] IdentityError),

    /// The store rejected the write
    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    /// The write was still queued when the timeout fired and was cancelled
    #[error("write timed out after {0:?}")]
    Timeout(Duration),

    /// The blocking worker panicked or was cancelled
    #[error("write worker failed: {0}")]
    Worker(String),
}

/// Everything known about an abandoned record
#[derive(Debug)]
pub struct FailureReport {
    /// Assigned id, if the record got that far
    pub record_id: Option<RecordId>,
    pub occurred_at: Option<DateTime<Utc>>,
    pub event_type: EventType,
    pub code: Option<i64>,
    pub message: Option<String>,
    /// Write attempts made, 0 if none
    pub attempts: u32,
    pub failure: IngestFailure,
}

impl FailureReport {
    fn unassigned(record: &NewRecord, failure: IngestFailure) -> Self {
        Self {
            record_id: None,
            occurred_at: record.occurred_at,
            event_type: record.event_type.clone(),
            code: record.code,
            message: record.message.clone(),
            attempts: 0,
            failure,
        }
    }

    fn abandoned(record: &LogRecord, attempts: u32, failure: IngestFailure) -> Self {
        Self {
            record_id: Some(record.id),
            occurred_at: Some(record.occurred_at),
            event_type: record.event_type.clone(),
            code: record.code,
            message: record.message.clone(),
            attempts,
            failure,
        }
    }
}

/// Last-resort sink for records that could not be written
///
/// Implementations must not block for long and must not panic; whatever
/// they do is the end of the line for the failed record.
pub trait FailureReporter: Send + Sync {
    fn report(&self, report: &FailureReport);
}

/// Reports failures as `error!` events on [`SIDE_CHANNEL_TARGET`]
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl FailureReporter for TracingReporter {
    fn report(&self, report: &FailureReport) {
        error!(
            target: SIDE_CHANNEL_TARGET,
            record_id = report.record_id.map(|id| id.value()),
            occurred_at = ?report.occurred_at,
            event_type = %report.event_type,
            code = report.code,
            record_message = report.message.as_deref(),
            attempts = report.attempts,
            failure = %report.failure,
            "Log record abandoned"
        );
    }
}

/// Counters for the ingestion path
#[derive(Debug, Default)]
pub struct IngestStats {
    committed: AtomicU64,
    suppressed: AtomicU64,
    retried: AtomicU64,
    pending: AtomicU64,
    committed_late: AtomicU64,
}

impl IngestStats {
    /// Records durably written
    pub fn committed(&self) -> u64 {
        self.committed.load(Ordering::Relaxed)
    }

    /// Records abandoned and reported
    pub fn suppressed(&self) -> u64 {
        self.suppressed.load(Ordering::Relaxed)
    }

    /// Extra attempts made after transient failures
    pub fn retried(&self) -> u64 {
        self.retried.load(Ordering::Relaxed)
    }

    /// Writes that outlived their timeout and have not settled yet
    pub fn pending(&self) -> u64 {
        self.pending.load(Ordering::Relaxed)
    }

    /// Records committed after their timeout, included in [`Self::committed`]
    pub fn committed_late(&self) -> u64 {
        self.committed_late.load(Ordering::Relaxed)
    }
}

/// Write-path limits
#[derive(Debug, Clone, Copy)]
pub struct IngestPolicy {
    pub write_timeout: Duration,
    pub max_attempts: u32,
    pub retry_backoff: Duration,
}

impl From<&IngestConfig> for IngestPolicy {
    fn from(config: &IngestConfig) -> Self {
        Self {
            write_timeout: config.write_timeout(),
            max_attempts: config.max_attempts.max(1),
            retry_backoff: config.retry_backoff(),
        }
    }
}

impl Default for IngestPolicy {
    fn default() -> Self {
        Self::from(&IngestConfig::default())
    }
}

/// Result of a blocking append that checks its cancel flag first
type WorkerResult = Option<Result<(), StorageError>>;

/// How one write attempt ended
enum Attempt {
    Finished(Result<(), IngestFailure>),
    /// Timed out after the append began; the worker owns the outcome
    InFlight(JoinHandle<WorkerResult>),
}

/// Entry point for producers
///
/// Cheap to clone; clones share the store, id generator, reporter and stats.
#[derive(Clone)]
pub struct EventRecorder {
    store: Arc<dyn LogStore>,
    ids: Arc<IdGenerator>,
    policy: IngestPolicy,
    reporter: Arc<dyn FailureReporter>,
    stats: Arc<IngestStats>,
}

impl std::fmt::Debug for EventRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRecorder")
            .field("policy", &self.policy)
            .field("stats", &self.stats)
            .finish()
    }
}

impl EventRecorder {
    /// Create a recorder reporting failures through [`TracingReporter`]
    pub fn new(store: Arc<dyn LogStore>, ids: Arc<IdGenerator>, policy: IngestPolicy) -> Self {
        Self {
            store,
            ids,
            policy,
            reporter: Arc::new(TracingReporter),
            stats: Arc::new(IngestStats::default()),
        }
    }

    /// Replace the failure reporter
    pub fn with_reporter(mut self, reporter: Arc<dyn FailureReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn stats(&self) -> &IngestStats {
        &self.stats
    }

    pub fn policy(&self) -> &IngestPolicy {
        &self.policy
    }

    /// Record an event in its own unit of work
    ///
    /// Returns once the record is committed, has been abandoned and
    /// reported, or the write timeout passed while the append was already
    /// running (see [`IngestStats::pending`]). Never returns an error and never
    /// panics on a store failure.
    pub async fn record_event(&self, event: impl Into<ProducerEvent>, session: SessionContext) {
        let new = event.into().normalize_with(&session);

        let id = match self.ids.next_id() {
            Ok(id) => id,
            Err(e) => {
                self.suppress(FailureReport::unassigned(&new, e.into()));
                return;
            }
        };
        let record = Arc::new(LogRecord::resolve(id, new, Utc::now()));

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.write_once(Arc::clone(&record)).await {
                Attempt::Finished(Ok(())) => {
                    self.stats.committed.fetch_add(1, Ordering::Relaxed);
                    debug!(id = %record.id, event_type = %record.event_type, attempt, "Recorded event");
                    return;
                }
                Attempt::Finished(Err(IngestFailure::Storage(e)))
                    if e.is_transient() && attempt < self.policy.max_attempts =>
                {
                    self.stats.retried.fetch_add(1, Ordering::Relaxed);
                    warn!(id = %record.id, attempt, error = %e, "Transient write failure, retrying");
                    tokio::time::sleep(self.policy.retry_backoff).await;
                }
                Attempt::Finished(Err(failure)) => {
                    self.suppress(FailureReport::abandoned(&record, attempt, failure));
                    return;
                }
                Attempt::InFlight(worker) => {
                    self.settle_in_background(record, attempt, worker);
                    return;
                }
            }
        }
    }

    /// Record an event without waiting for the outcome
    pub fn record_event_detached(
        &self,
        event: impl Into<ProducerEvent>,
        session: SessionContext,
    ) -> JoinHandle<()> {
        let recorder = self.clone();
        let event = event.into();
        tokio::spawn(async move { recorder.record_event(event, session).await })
    }

    /// One append on a blocking worker, bounded by the write timeout
    ///
    /// The worker and the timeout race for `claimed`. A worker that loses
    /// never touches the store.
    async fn write_once(&self, record: Arc<LogRecord>) -> Attempt {
        let store = Arc::clone(&self.store);
        let claimed = Arc::new(AtomicBool::new(false));
        let worker_claim = Arc::clone(&claimed);
        let mut worker = tokio::task::spawn_blocking(move || -> WorkerResult {
            if worker_claim.swap(true, Ordering::SeqCst) {
                return None;
            }
            Some(store.append(&record))
        });

        let finished = match tokio::time::timeout(self.policy.write_timeout, &mut worker).await {
            Ok(Ok(Some(result))) => result.map_err(IngestFailure::Storage),
            Ok(Ok(None)) => Err(IngestFailure::Timeout(self.policy.write_timeout)),
            Ok(Err(join_error)) => Err(IngestFailure::Worker(join_error.to_string())),
            Err(_) => {
                if claimed.swap(true, Ordering::SeqCst) {
                    return Attempt::InFlight(worker);
                }
                Err(IngestFailure::Timeout(self.policy.write_timeout))
            }
        };
        Attempt::Finished(finished)
    }

    /// Wait for a timed-out append off the caller's path
    fn settle_in_background(
        &self,
        record: Arc<LogRecord>,
        attempt: u32,
        worker: JoinHandle<WorkerResult>,
    ) {
        self.stats.pending.fetch_add(1, Ordering::Relaxed);
        warn!(
            id = %record.id,
            timeout = ?self.policy.write_timeout,
            "Write still running after timeout, outcome pending"
        );

        let recorder = self.clone();
        tokio::spawn(async move {
            let outcome = match worker.await {
                Ok(Some(result)) => result.map_err(IngestFailure::Storage),
                Ok(None) => Err(IngestFailure::Timeout(recorder.policy.write_timeout)),
                Err(join_error) => Err(IngestFailure::Worker(join_error.to_string())),
            };
            match outcome {
                Ok(()) => {
                    recorder.stats.committed.fetch_add(1, Ordering::Relaxed);
                    recorder.stats.committed_late.fetch_add(1, Ordering::Relaxed);
                    debug!(id = %record.id, attempt, "Recorded event after timeout");
                }
                Err(failure) => {
                    recorder.suppress(FailureReport::abandoned(&record, attempt, failure));
                }
            }
            recorder.stats.pending.fetch_sub(1, Ordering::Relaxed);
        });
    }

    fn suppress(&self, report: FailureReport) {
        self.stats.suppressed.fetch_add(1, Ordering::Relaxed);
        self.reporter.report(&report);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::{ErrorContext, LoginFailureContext};
    use chrono::TimeZone;
    use faultlog_storage::{InMemoryLogStore, PartitionScheme, RecordFilter};
    use parking_lot::Mutex;

    /// Keeps every report for inspection
    #[derive(Default)]
    struct CapturingReporter {
        reports: Mutex<Vec<String>>,
    }

    impl FailureReporter for CapturingReporter {
        fn report(&self, report: &FailureReport) {
            self.reports
                .lock()
                .push(format!("{} {} {}", report.event_type, report.attempts, report.failure));
        }
    }

    /// Fails with `Unavailable` a fixed number of times, then delegates
    /// after an optional delay
    struct FlakyStore {
        inner: InMemoryLogStore,
        failures_left: Mutex<u32>,
        delay: Duration,
    }

    impl LogStore for FlakyStore {
        fn scheme(&self) -> &PartitionScheme {
            self.inner.scheme()
        }
        fn append(&self, record: &LogRecord) -> Result<(), StorageError> {
            {
                let mut left = self.failures_left.lock();
                if *left > 0 {
                    *left -= 1;
                    return Err(StorageError::unavailable("database busy"));
                }
            }
            std::thread::sleep(self.delay);
            self.inner.append(record)
        }
        fn range_scan(
            &self,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
            filter: &RecordFilter,
        ) -> Result<Vec<LogRecord>, StorageError> {
            self.inner.range_scan(start, end, filter)
        }
        fn count(
            &self,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
            filter: &RecordFilter,
        ) -> Result<u64, StorageError> {
            self.inner.count(start, end, filter)
        }
        fn partitions(&self) -> Result<Vec<faultlog_storage::PartitionDescriptor>, StorageError> {
            self.inner.partitions()
        }
        fn drop_partitions_before(&self, cutoff: DateTime<Utc>) -> faultlog_storage::PurgeReport {
            self.inner.drop_partitions_before(cutoff)
        }
        fn high_water_id(&self) -> Result<Option<RecordId>, StorageError> {
            self.inner.high_water_id()
        }
    }

    fn flaky(failures: u32) -> Arc<FlakyStore> {
        Arc::new(FlakyStore {
            inner: InMemoryLogStore::default(),
            failures_left: Mutex::new(failures),
            delay: Duration::ZERO,
        })
    }

    fn slow(delay: Duration) -> Arc<FlakyStore> {
        Arc::new(FlakyStore {
            inner: InMemoryLogStore::default(),
            failures_left: Mutex::new(0),
            delay,
        })
    }

    fn with_timeout(recorder: EventRecorder, timeout: Duration) -> EventRecorder {
        EventRecorder {
            policy: IngestPolicy {
                write_timeout: timeout,
                ..recorder.policy
            },
            ..recorder
        }
    }

    fn recorder(store: Arc<dyn LogStore>, reporter: Arc<CapturingReporter>) -> EventRecorder {
        let policy = IngestPolicy {
            retry_backoff: Duration::from_millis(1),
            ..IngestPolicy::default()
        };
        EventRecorder::new(store, Arc::new(IdGenerator::new()), policy).with_reporter(reporter)
    }

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 3, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_record_commits_before_return() {
        let store = Arc::new(InMemoryLogStore::default());
        let reporter = Arc::new(CapturingReporter::default());
        let recorder = recorder(store.clone(), reporter.clone());

        let session = SessionContext::anonymous().with_username("scott").with_program("sqlplus");
        let event = ErrorContext::error(942, "table or view does not exist").with_occurred_at(ts());
        recorder.record_event(event, session).await;

        assert_eq!(recorder.stats().committed(), 1);
        let records = store.range_scan(ts(), ts(), &RecordFilter::all()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, RecordId(1));
        assert_eq!(records[0].username(), Some("scott"));
        assert_eq!(records[0].actor.program.as_deref(), Some("sqlplus"));
        assert!(reporter.reports.lock().is_empty());
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let store = flaky(2);
        let reporter = Arc::new(CapturingReporter::default());
        let recorder = recorder(store.clone(), reporter.clone());

        let event = ErrorContext::error(1, "boom").with_occurred_at(ts());
        recorder.record_event(event, SessionContext::anonymous()).await;

        assert_eq!(recorder.stats().committed(), 1);
        assert_eq!(recorder.stats().retried(), 2);
        assert_eq!(store.inner.total_records(), 1);
        assert!(reporter.reports.lock().is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_retries_are_reported() {
        let store = flaky(10);
        let reporter = Arc::new(CapturingReporter::default());
        let recorder = recorder(store.clone(), reporter.clone());

        let event = LoginFailureContext::new("alice", "bad password");
        recorder.record_event(event, SessionContext::anonymous()).await;

        assert_eq!(recorder.stats().committed(), 0);
        assert_eq!(recorder.stats().suppressed(), 1);
        let reports = reporter.reports.lock();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].starts_with("LOGIN_FAILURE 3 storage:"));
    }

    #[tokio::test]
    async fn test_duplicate_key_is_not_retried() {
        let store = Arc::new(InMemoryLogStore::default());
        let reporter = Arc::new(CapturingReporter::default());
        // Two generators handing out the same ids collide on the same timestamp
        let a = recorder(store.clone(), reporter.clone());
        let b = recorder(store.clone(), reporter.clone());

        let event = ErrorContext::error(1, "same").with_occurred_at(ts());
        a.record_event(event.clone(), SessionContext::anonymous()).await;
        b.record_event(event, SessionContext::anonymous()).await;

        assert_eq!(store.total_records(), 1);
        assert_eq!(b.stats().retried(), 0);
        let reports = reporter.reports.lock();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].starts_with("ERROR 1 storage:"));
    }

    #[tokio::test]
    async fn test_id_exhaustion_is_reported() {
        let store = Arc::new(InMemoryLogStore::default());
        let reporter = Arc::new(CapturingReporter::default());
        let ids = Arc::new(IdGenerator::resume_after(u64::MAX - 1).unwrap());
        let recorder = EventRecorder::new(store.clone(), ids, IngestPolicy::default())
            .with_reporter(reporter.clone());

        let session = SessionContext::anonymous();
        recorder.record_event(ErrorContext::error(1, "last"), session.clone()).await;
        recorder.record_event(ErrorContext::error(2, "one too many"), session).await;

        assert_eq!(store.total_records(), 1);
        let reports = reporter.reports.lock();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].starts_with("ERROR 0 identity:"));
    }

    #[tokio::test]
    async fn test_detached_record() {
        let store = Arc::new(InMemoryLogStore::default());
        let recorder = recorder(store.clone(), Arc::new(CapturingReporter::default()));

        let handle = recorder.record_event_detached(
            ErrorContext::error(7, "fire and forget"),
            SessionContext::anonymous(),
        );
        handle.await.unwrap();
        assert_eq!(store.total_records(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_running_write_settles_after_timeout() {
        let store = slow(Duration::from_millis(300));
        let reporter = Arc::new(CapturingReporter::default());
        let recorder = with_timeout(
            recorder(store.clone(), reporter.clone()),
            Duration::from_millis(50),
        );

        let event = ErrorContext::error(1, "slow disk").with_occurred_at(ts());
        recorder.record_event(event, SessionContext::anonymous()).await;

        // Returned on the timeout without calling the record lost
        assert_eq!(recorder.stats().pending(), 1);
        assert_eq!(recorder.stats().suppressed(), 0);

        for _ in 0..200 {
            if recorder.stats().pending() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(recorder.stats().pending(), 0);
        assert_eq!(recorder.stats().committed(), 1);
        assert_eq!(recorder.stats().committed_late(), 1);
        assert_eq!(recorder.stats().suppressed(), 0);
        assert_eq!(store.inner.total_records(), 1);
        assert!(reporter.reports.lock().is_empty());
    }

    #[test]
    fn test_queued_write_is_cancelled_on_timeout() {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(1)
            .enable_time()
            .build()
            .unwrap();

        let store = Arc::new(InMemoryLogStore::default());
        let reporter = Arc::new(CapturingReporter::default());
        let recorder = with_timeout(
            recorder(store.clone(), reporter.clone()),
            Duration::from_millis(50),
        );

        rt.block_on(async {
            // Hold the only blocking thread so the append stays queued
            let blocker = tokio::task::spawn_blocking(|| {
                std::thread::sleep(Duration::from_millis(300));
            });

            let event = ErrorContext::error(1, "queued").with_occurred_at(ts());
            recorder.record_event(event, SessionContext::anonymous()).await;
            assert_eq!(recorder.stats().suppressed(), 1);
            assert_eq!(recorder.stats().pending(), 0);

            blocker.await.unwrap();
            // Let the cancelled worker run; it must not write
            tokio::task::spawn_blocking(|| ()).await.unwrap();
        });

        assert_eq!(store.total_records(), 0);
        let reports = reporter.reports.lock();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].starts_with("ERROR 1 write timed out"));
    }
}
