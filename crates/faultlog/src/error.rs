//! Error types for the faultlog service

use chrono::{DateTime, Utc};
use thiserror::Error;

use faultlog_core::IdentityError;
use faultlog_storage::StorageError;

/// Errors raised while opening or configuring the service
///
/// Ingestion never returns these; see [`crate::ingest`].
#[derive(Debug, Error)]
pub enum FaultlogError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The identity generator could not be seeded
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Background tasks not started
    #[error("Faultlog not started")]
    NotStarted,

    /// Background tasks already started
    #[error("Faultlog already started")]
    AlreadyStarted,
}

impl From<toml::de::Error> for FaultlogError {
    fn from(e: toml::de::Error) -> Self {
        FaultlogError::Config(e.to_string())
    }
}

/// Result type alias for service operations
pub type FaultlogResult<T> = Result<T, FaultlogError>;

/// Errors returned by read operations
#[derive(Debug, Error)]
pub enum QueryError {
    /// The range start lies after its end
    #[error("Invalid range: {start} is after {end}")]
    InvalidRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}
