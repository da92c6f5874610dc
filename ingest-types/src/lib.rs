//! Core type definitions for the ingest load stage.
//!
//! This crate defines the plain data types every other load crate shares:
//! - [`Record`]: one immutable row of standardized attributes
//! - [`stringify_value`]: stable string rendering used for keys and lookups
//! - [`Method`] and [`SubmissionOutcome`]: what happened to a record
//!
//! Nothing here talks to the network or the disk.

mod outcome;
mod record;
mod value;

pub use outcome::{Method, MethodCounts, SubmissionOutcome};
pub use record::Record;
pub use value::{is_missing, stringify_value};

/// Placeholder used for absent optional values and unreported remote ids.
pub const NOT_REPORTED: &str = "Not Reported";

/// Name of the table used when an entity type has no table of its own.
pub const DEFAULT_TABLE: &str = "default";

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, TypesError>;

/// Errors that can occur when building records.
#[derive(Debug, thiserror::Error)]
pub enum TypesError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("record must be a JSON object, got {0}")]
    NotAnObject(String),

    #[error("unknown method: {0}")]
    UnknownMethod(String),
}
