//! Logging setup errors

use thiserror::Error;

/// Errors raised while installing the global subscriber
#[derive(Debug, Error)]
pub enum LoggingError {
    /// A log directory or file could not be created
    #[error("Log file error: {0}")]
    Io(#[from] std::io::Error),

    /// A level or filter directive did not parse
    #[error("Invalid filter directive: {0}")]
    InvalidFilter(String),

    /// The rolling appender could not be built
    #[error("Appender error: {0}")]
    Appender(String),

    /// A global subscriber was already installed
    #[error("Subscriber already initialized: {0}")]
    AlreadyInitialized(String),
}
