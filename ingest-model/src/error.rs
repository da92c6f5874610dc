use thiserror::Error;

/// Result type for key model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Configuration problems in a key composition rule set.
///
/// All of these are detected when a [`crate::KeyGraph`] is built, before
/// any record is resolved.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("no key composition rule for entity type '{0}'")]
    UnknownEntity(String),

    #[error("key composition for '{entity}' references unknown entity type '{reference}'")]
    UnknownReference { entity: String, reference: String },

    #[error("key composition for '{0}' has no components")]
    EmptyRule(String),

    #[error("key composition rules form a cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    #[error("entity type '{entity}' is ordered before its key dependency '{dependency}'")]
    OrderViolation { entity: String, dependency: String },
}
