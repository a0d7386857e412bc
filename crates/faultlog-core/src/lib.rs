//! # Faultlog Core
//!
//! Core types, identifiers, and errors for the faultlog event/error log.
//!
//! This crate holds everything the storage layer and the ingestion engine
//! agree on, and nothing else:
//!
//! ## Key Types
//!
//! - [`LogRecord`]: An immutable, fully resolved log record
//! - [`NewRecord`]: A normalized record that has not been assigned an id yet
//! - [`SessionContext`]: Actor/origin information passed explicitly by producers
//! - [`EventType`] / [`Severity`]: Record classification tags
//! - [`IdGenerator`]: Strictly increasing 64-bit record identifiers
//!
//! Text bounds for every field live in [`limits`].

pub mod error;
pub mod identity;
pub mod limits;
pub mod record;

// Re-export main types
pub use error::*;
pub use identity::*;
pub use record::*;
