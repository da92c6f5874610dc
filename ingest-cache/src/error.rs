use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("cache file error: {0}")]
    Io(#[from] std::io::Error),

    /// A thread panicked while holding the cache lock.
    #[error("identity cache lock poisoned")]
    Poisoned,
}
