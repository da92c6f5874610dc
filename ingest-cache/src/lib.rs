//! Identity cache for the ingest load stage.
//!
//! Maps `(entity type, unique key)` to the id the target service assigned.
//! Each cache instance owns one SQLite file scoped to a single
//! `(destination, project)` pair; see [`IdentityCache::open`].

mod error;
mod store;

pub use error::{CacheError, CacheResult};
pub use store::{CACHE_FILE_SUFFIX, IdentityCache, clean_destination};
