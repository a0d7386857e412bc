//! Error types shared across faultlog crates

use thiserror::Error;

/// Errors raised by the identity generator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// The 64-bit id space is used up; the generator never wraps
    #[error("Record id space exhausted after {last}")]
    Exhausted { last: u64 },
}

/// Errors when parsing record tags from text
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Unknown severity: {0}")]
    UnknownSeverity(String),

    #[error("Event type must not be empty")]
    EmptyEventType,
}
