//! Identity key model for the ingest load stage.
//!
//! Entities in a study rarely carry a natural identifier, so each entity
//! type declares how its key is composed:
//! - [`KeyComposition`]: required and optional [`KeyComponent`]s for one type
//! - [`KeyGraph`]: every rule, validated once as a DAG over entity types
//! - [`UniqueKeyResolver`]: turns a record into a [`KeyResolution`]
//!
//! A component is either a literal record attribute or another entity
//! type's unique key. The latter is a dependency edge in the graph.

mod composition;
mod error;
mod graph;
mod resolver;

pub use composition::{KEY_DELIMITER, KeyComponent, KeyComposition};
pub use error::{ModelError, ModelResult};
pub use graph::KeyGraph;
pub use resolver::{KeyResolution, UniqueKeyResolver};
