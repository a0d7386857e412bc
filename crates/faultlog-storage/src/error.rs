//! Error types for faultlog-storage
//!
//! This module defines the error types used throughout the storage crate.

use thiserror::Error;

/// Errors that can occur in storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// I/O error during storage operations
    #[error("I/O error: {0}")]
    Io(String),

    /// Database engine error
    #[error("Database error: {0}")]
    Database(String),

    /// The store cannot currently accept work (locked, closed, shutting down)
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// A record with the same storage key already exists
    #[error("Duplicate record key ({occurred_at_micros}, {id})")]
    DuplicateKey { occurred_at_micros: i64, id: u64 },

    /// Error during serialization
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Error during deserialization
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Partition scheme is unusable (zero width, overflow)
    #[error("Invalid partition scheme: {0}")]
    InvalidScheme(String),

    /// The database was created with a different partition scheme
    #[error("Partition scheme mismatch: stored {stored}, configured {configured}")]
    SchemeMismatch { stored: String, configured: String },

    /// Timestamp falls outside the representable partition grid
    #[error("Timestamp out of range: {0}")]
    OutOfRange(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

impl StorageError {
    /// Create a new Unavailable error
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    /// Create a new Serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }

    /// Create a new Deserialization error
    pub fn deserialization(message: impl Into<String>) -> Self {
        Self::Deserialization(message.into())
    }

    /// Create a new I/O error
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io(message.into())
    }

    /// Whether retrying the same operation later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Unavailable(_))
    }
}

/// Convert from postcard Error to StorageError
impl From<postcard::Error> for StorageError {
    fn from(err: postcard::Error) -> Self {
        StorageError::Deserialization(err.to_string())
    }
}

impl From<redb::DatabaseError> for StorageError {
    fn from(err: redb::DatabaseError) -> Self {
        match err {
            redb::DatabaseError::DatabaseAlreadyOpen => {
                StorageError::Unavailable("database already open".into())
            }
            redb::DatabaseError::Storage(e) => e.into(),
            other => StorageError::Database(other.to_string()),
        }
    }
}

impl From<redb::TransactionError> for StorageError {
    fn from(err: redb::TransactionError) -> Self {
        StorageError::Database(err.to_string())
    }
}

impl From<redb::TableError> for StorageError {
    fn from(err: redb::TableError) -> Self {
        StorageError::Database(err.to_string())
    }
}

impl From<redb::CommitError> for StorageError {
    fn from(err: redb::CommitError) -> Self {
        StorageError::Database(err.to_string())
    }
}

impl From<redb::StorageError> for StorageError {
    fn from(err: redb::StorageError) -> Self {
        match err {
            redb::StorageError::Io(e) => StorageError::Io(e.to_string()),
            other => StorageError::Database(other.to_string()),
        }
    }
}
