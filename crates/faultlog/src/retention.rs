//! Retention and partition management
//!
//! Purging drops whole partitions whose range ends at or before the cutoff.
//! Every purge, including one that deletes nothing, leaves a `MAINTENANCE`
//! record behind through the normal ingestion path.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use faultlog_core::SessionContext;
use faultlog_storage::{LogStore, PartitionDescriptor, PurgeReport, StorageError};

use crate::error::QueryError;
use crate::ingest::EventRecorder;
use crate::normalize::MaintenanceContext;

/// Program name recorded on maintenance events
const RETENTION_PROGRAM: &str = "faultlog-retention";

/// Partition inventory and purge
#[derive(Clone)]
pub struct RetentionManager {
    store: Arc<dyn LogStore>,
    recorder: EventRecorder,
}

impl RetentionManager {
    pub fn new(store: Arc<dyn LogStore>, recorder: EventRecorder) -> Self {
        Self { store, recorder }
    }

    /// Drop partitions that lie entirely before `now - retention`
    pub async fn purge_older_than(&self, retention: chrono::Duration) -> PurgeReport {
        let cutoff = Utc::now()
            .checked_sub_signed(retention)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.purge_before(cutoff).await
    }

    /// Drop partitions whose upper bound is at or before `cutoff`
    pub async fn purge_before(&self, cutoff: DateTime<Utc>) -> PurgeReport {
        let store = Arc::clone(&self.store);
        let worker = tokio::task::spawn_blocking(move || store.drop_partitions_before(cutoff));
        let report = match worker.await {
            Ok(report) => report,
            Err(e) => PurgeReport::new(cutoff)
                .fail(StorageError::unavailable(format!("purge worker failed: {e}"))),
        };

        match &report.failure {
            None => info!(
                cutoff = %cutoff,
                partitions = report.partitions_dropped(),
                records = report.records_deleted,
                "Retention purge complete"
            ),
            Some(e) => warn!(
                cutoff = %cutoff,
                partitions = report.partitions_dropped(),
                records = report.records_deleted,
                error = %e,
                "Retention purge stopped early"
            ),
        }

        let session = SessionContext::anonymous().with_program(RETENTION_PROGRAM);
        self.recorder
            .record_event(MaintenanceContext::retention_purge(&report), session)
            .await;
        report
    }

    /// Existing partitions, oldest first
    pub fn inventory(&self) -> Result<Vec<PartitionDescriptor>, QueryError> {
        Ok(self.store.partitions()?)
    }
}

/// Background retention sweep
///
/// For deployments without an external scheduler. The first sweep runs
/// immediately, then once per interval until shutdown.
pub struct RetentionTask {
    manager: Arc<RetentionManager>,
    interval: Duration,
    horizon: chrono::Duration,
    shutdown_rx: broadcast::Receiver<()>,
    sweeps: u64,
}

impl RetentionTask {
    pub fn new(
        manager: Arc<RetentionManager>,
        interval: Duration,
        horizon: chrono::Duration,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            manager,
            interval,
            horizon,
            shutdown_rx,
            sweeps: 0,
        }
    }

    /// Spawn the sweep as a background task
    pub fn spawn(
        manager: Arc<RetentionManager>,
        interval: Duration,
        horizon: chrono::Duration,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let task = Self::new(manager, interval, horizon, shutdown_rx);
        tokio::spawn(async move {
            task.run().await;
        })
    }

    async fn run(mut self) {
        info!(
            interval_secs = self.interval.as_secs(),
            horizon_days = self.horizon.num_days(),
            "Retention task started"
        );

        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!(sweeps = self.sweeps, "Retention task shutting down");
                    break;
                }
                _ = interval.tick() => {
                    self.sweeps += 1;
                    let report = self.manager.purge_older_than(self.horizon).await;
                    debug!(
                        sweep = self.sweeps,
                        dropped = report.partitions_dropped(),
                        complete = report.is_complete(),
                        "Retention sweep finished"
                    );
                }
            }
        }
    }
}
