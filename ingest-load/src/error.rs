//! Error types for the load stage.

use ingest_cache::CacheError;
use ingest_model::ModelError;
use ingest_types::TypesError;
use thiserror::Error;

/// Result type for load operations.
pub type LoadResult<T> = Result<T, LoadError>;

/// Failures that abort a load.
///
/// Per-record problems (an underivable key, a duplicate) are not errors;
/// they are reported through [`crate::RecordDisposition`] and the run
/// continues.
#[derive(Debug, Error)]
pub enum LoadError {
    /// Bad settings or a malformed adapter set, detected before loading.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The target service rejected or failed a request.
    #[error("submission failed: {0}")]
    Submission(String),

    /// A remote lookup matched more than one entity.
    #[error("ambiguous query for {entity_type}: sent {sent}, found {found:?}")]
    AmbiguousMatch {
        entity_type: String,
        sent: String,
        found: Vec<String>,
    },

    /// Resume was requested but the cache ran out before the token was found.
    #[error(
        "resume target '{token}' not reached and no cached id was found for {entity_type} ({unique_key})"
    )]
    ResumeHorizon {
        token: String,
        entity_type: String,
        unique_key: String,
    },

    /// An adapter could not build a request body.
    #[error("failed to build {entity_type} body: {reason}")]
    Build { entity_type: String, reason: String },

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Types(#[from] TypesError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Transport-level failure talking to the target service.
    #[error("network error: {0}")]
    Network(String),

    /// A worker panicked while holding shared load state.
    #[error("{0} lock poisoned")]
    Poisoned(&'static str),
}

impl LoadError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}
