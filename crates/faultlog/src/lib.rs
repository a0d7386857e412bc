//! # Faultlog
//!
//! Durable, time-partitioned error and event log.
//!
//! This crate provides [`Faultlog`], which ties together:
//! - Storage (in-memory or redb, partitioned by time)
//! - Isolated ingestion (a log write never affects the caller's outcome)
//! - Producer hooks and normalization
//! - Retention purge and read-only queries
//!
//! ## Example
//!
//! ```rust,ignore
//! use faultlog::{Faultlog, FaultlogConfig, LoginFailureContext};
//!
//! let log = Faultlog::open(FaultlogConfig::with_data_dir("./faultlog-data"))?;
//! log.start()?;
//!
//! // From an authentication subsystem
//! log.recorder()
//!     .record_event(LoginFailureContext::new("alice", "bad password"), session)
//!     .await;
//!
//! let failures = log.query().count_in_range(start, end, Some(1017))?;
//! let report = log.retention().purge_older_than(chrono::Duration::days(90)).await;
//! ```

pub mod config;
pub mod error;
pub mod hooks;
pub mod ingest;
pub mod normalize;
pub mod query;
pub mod retention;

pub use config::{FaultlogConfig, IngestConfig, RetentionConfig, StorageBackend, StorageConfig};
pub use error::{FaultlogError, FaultlogResult, QueryError};
pub use hooks::{ApplicationLogHook, LoginFailureHook, SchemaChangeHook, ServerErrorHook};
pub use ingest::{
    EventRecorder, FailureReport, FailureReporter, IngestFailure, IngestPolicy, IngestStats,
    TracingReporter,
};
pub use normalize::{
    AmbientError, ErrorContext, INVALID_CREDENTIALS_CODE, LoginFailureContext, MaintenanceContext,
    ProducerEvent, SchemaChangeContext, ServerErrorContext, StackFrame,
};
pub use query::QueryFacade;
pub use retention::{RetentionManager, RetentionTask};

pub use faultlog_core::{EventType, LogRecord, RecordId, SessionContext, Severity};
pub use faultlog_storage::{PartitionDescriptor, PurgeReport, RecordFilter};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, instrument};

use faultlog_core::IdGenerator;
use faultlog_storage::{InMemoryLogStore, LogStore, PersistentLogStore};

/// A running faultlog instance
pub struct Faultlog {
    config: FaultlogConfig,
    store: Arc<dyn LogStore>,
    recorder: EventRecorder,
    retention: Arc<RetentionManager>,
    query: QueryFacade,
    /// Shutdown signal sender
    shutdown_tx: broadcast::Sender<()>,
    /// Background retention sweep, when running
    retention_task: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
}

impl Faultlog {
    /// Open the configured store and resume id assignment after its
    /// high-water mark
    ///
    /// # Errors
    ///
    /// Fails fast on invalid configuration, an unreachable database, a
    /// database created with a different partition scheme, or an exhausted
    /// id space.
    #[instrument(skip(config), fields(backend = ?config.storage.backend))]
    pub fn open(config: FaultlogConfig) -> FaultlogResult<Self> {
        config.validate()?;
        let scheme = config.storage.scheme()?;

        let store: Arc<dyn LogStore> = match config.storage.backend {
            StorageBackend::Memory => Arc::new(InMemoryLogStore::new(scheme)),
            StorageBackend::Redb => {
                Arc::new(PersistentLogStore::open(config.persistent_store(), scheme)?)
            }
        };
        Self::with_store(config, store, Arc::new(TracingReporter))
    }

    /// Build around an already opened store and a custom failure reporter
    pub fn with_store(
        config: FaultlogConfig,
        store: Arc<dyn LogStore>,
        reporter: Arc<dyn FailureReporter>,
    ) -> FaultlogResult<Self> {
        let ids = match store.high_water_id()? {
            Some(last) => IdGenerator::resume_after(last.value())?,
            None => IdGenerator::new(),
        };
        info!(
            scheme = %store.scheme(),
            next_after = ids.last_issued().map(|id| id.value()).unwrap_or(0),
            "Faultlog opened"
        );

        let recorder = EventRecorder::new(
            Arc::clone(&store),
            Arc::new(ids),
            IngestPolicy::from(&config.ingest),
        )
        .with_reporter(reporter);
        let retention = Arc::new(RetentionManager::new(Arc::clone(&store), recorder.clone()));
        let query = QueryFacade::new(Arc::clone(&store));
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            store,
            recorder,
            retention,
            query,
            shutdown_tx,
            retention_task: Mutex::new(None),
            started: AtomicBool::new(false),
        })
    }

    /// Start background work (the retention sweep, if configured)
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> FaultlogResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(FaultlogError::AlreadyStarted);
        }

        if let Some(interval) = self.config.retention.sweep_interval() {
            let handle = RetentionTask::spawn(
                Arc::clone(&self.retention),
                interval,
                self.config.retention.horizon(),
                self.shutdown_tx.subscribe(),
            );
            *self.retention_task.lock() = Some(handle);
        }

        info!("Faultlog started");
        Ok(())
    }

    /// Stop background work and wait for it to finish
    pub async fn stop(&self) -> FaultlogResult<()> {
        if !self.started.swap(false, Ordering::SeqCst) {
            return Err(FaultlogError::NotStarted);
        }

        let _ = self.shutdown_tx.send(());
        let task = self.retention_task.lock().take();
        if let Some(handle) = task {
            let _ = handle.await;
        }

        info!("Faultlog stopped");
        Ok(())
    }

    /// Check if background work is running
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Producer entry point
    pub fn recorder(&self) -> &EventRecorder {
        &self.recorder
    }

    pub fn retention(&self) -> &Arc<RetentionManager> {
        &self.retention
    }

    pub fn query(&self) -> &QueryFacade {
        &self.query
    }

    pub fn store(&self) -> &Arc<dyn LogStore> {
        &self.store
    }

    pub fn config(&self) -> &FaultlogConfig {
        &self.config
    }

    /// Record an event; shorthand for `recorder().record_event(..)`
    pub async fn record_event(&self, event: impl Into<ProducerEvent>, session: SessionContext) {
        self.recorder.record_event(event, session).await;
    }
}
