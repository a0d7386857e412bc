//! Configuration for the faultlog service
//!
//! Every section has defaults, so a TOML file only needs the keys it changes:
//!
//! ```toml
//! data_dir = "/var/lib/faultlog"
//!
//! [storage]
//! backend = "redb"
//! partition_epoch = "2025-01-01T00:00:00Z"
//! partition_width_secs = 604800
//!
//! [ingest]
//! write_timeout_ms = 2000
//!
//! [retention]
//! horizon_days = 90
//! sweep_interval_secs = 3600
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use faultlog_logging::LogConfig;
use faultlog_storage::{DEFAULT_WIDTH_DAYS, PartitionScheme, PersistentLogStoreConfig};

use crate::error::{FaultlogError, FaultlogResult};

/// Configuration for a Faultlog instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultlogConfig {
    /// Base directory for the database and log files
    pub data_dir: PathBuf,
    /// Storage backend and partition grid
    pub storage: StorageConfig,
    /// Ingestion timeouts and retry
    pub ingest: IngestConfig,
    /// Retention horizon and background sweep
    pub retention: RetentionConfig,
    /// Diagnostic logging
    pub logging: LogConfig,
}

impl Default for FaultlogConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./faultlog-data"),
            storage: StorageConfig::default(),
            ingest: IngestConfig::default(),
            retention: RetentionConfig::default(),
            logging: LogConfig::default(),
        }
    }
}

impl FaultlogConfig {
    /// Create a configuration with a custom data directory
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// In-memory configuration, nothing touches disk
    pub fn in_memory() -> Self {
        Self {
            storage: StorageConfig {
                backend: StorageBackend::Memory,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Set the storage configuration
    pub fn with_storage(mut self, storage: StorageConfig) -> Self {
        self.storage = storage;
        self
    }

    /// Set the ingestion configuration
    pub fn with_ingest(mut self, ingest: IngestConfig) -> Self {
        self.ingest = ingest;
        self
    }

    /// Set the retention configuration
    pub fn with_retention(mut self, retention: RetentionConfig) -> Self {
        self.retention = retention;
        self
    }

    /// Set the logging configuration
    pub fn with_logging(mut self, logging: LogConfig) -> Self {
        self.logging = logging;
        self
    }

    /// Parse a TOML document
    pub fn from_toml_str(text: &str) -> FaultlogResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> FaultlogResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Reject settings that cannot work
    pub fn validate(&self) -> FaultlogResult<()> {
        if self.storage.partition_width_secs == 0 {
            return Err(FaultlogError::Config("partition_width_secs must be > 0".into()));
        }
        if self.storage.cache_size_mb == 0 {
            return Err(FaultlogError::Config("cache_size_mb must be > 0".into()));
        }
        if self.ingest.write_timeout_ms == 0 {
            return Err(FaultlogError::Config("write_timeout_ms must be > 0".into()));
        }
        if self.ingest.max_attempts == 0 {
            return Err(FaultlogError::Config("max_attempts must be >= 1".into()));
        }
        if self.retention.sweep_interval_secs == Some(0) {
            return Err(FaultlogError::Config("sweep_interval_secs must be > 0".into()));
        }
        self.storage.scheme()?;
        Ok(())
    }

    /// Full path of the redb database file
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(&self.storage.db_file)
    }

    /// Settings for the redb store
    pub fn persistent_store(&self) -> PersistentLogStoreConfig {
        PersistentLogStoreConfig {
            db_path: self.db_path(),
            cache_size: self.storage.cache_size_mb * 1024 * 1024,
            sync_on_commit: self.storage.sync_on_commit,
        }
    }
}

/// Which store backs the log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process-local, lost on exit
    Memory,
    /// Durable redb database under `data_dir`
    #[default]
    Redb,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Database file name, relative to `data_dir`
    pub db_file: String,
    pub cache_size_mb: usize,
    /// fsync every commit (turn off only for bulk loads)
    pub sync_on_commit: bool,
    /// Anchor of the partition grid
    pub partition_epoch: DateTime<Utc>,
    /// Partition width in seconds
    pub partition_width_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            db_file: "faultlog.redb".to_string(),
            cache_size_mb: 64,
            sync_on_commit: true,
            partition_epoch: DateTime::<Utc>::UNIX_EPOCH,
            partition_width_secs: DEFAULT_WIDTH_DAYS as u64 * 24 * 3600,
        }
    }
}

impl StorageConfig {
    /// The partition grid these settings describe
    pub fn scheme(&self) -> FaultlogResult<PartitionScheme> {
        let secs = i64::try_from(self.partition_width_secs)
            .map_err(|_| FaultlogError::Config("partition_width_secs out of range".into()))?;
        let width = chrono::Duration::try_seconds(secs)
            .ok_or_else(|| FaultlogError::Config("partition_width_secs out of range".into()))?;
        Ok(PartitionScheme::new(self.partition_epoch, width)?)
    }
}

/// Ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Upper bound on one write attempt
    pub write_timeout_ms: u64,
    /// Attempts for transient failures, including the first
    pub max_attempts: u32,
    /// Pause between attempts
    pub retry_backoff_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            write_timeout_ms: 5_000,
            max_attempts: 3,
            retry_backoff_ms: 50,
        }
    }
}

impl IngestConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Retention configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Records older than this many days become eligible for purge
    pub horizon_days: u32,
    /// Run the purge in the background at this interval
    pub sweep_interval_secs: Option<u64>,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            horizon_days: 90,
            sweep_interval_secs: None,
        }
    }
}

impl RetentionConfig {
    pub fn horizon(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.horizon_days))
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        self.sweep_interval_secs.map(Duration::from_secs)
    }
}
