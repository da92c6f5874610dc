//! SQLite-backed identifier cache with an in-memory tier.

use crate::{CacheError, CacheResult};
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// File name suffix shared by every identity cache file.
pub const CACHE_FILE_SUFFIX: &str = "uid_cache.db";

/// Two-tier store of remote ids keyed by `(entity type, unique key)`.
///
/// The RAM tier holds one table per entity type, primed from SQLite the
/// first time that type is touched. One mutex covers "prime if needed,
/// then read or write", so concurrent callers can never prime twice.
///
/// Writes marked `persist = false` (dry runs) only reach the RAM tier.
pub struct IdentityCache {
    state: Mutex<CacheState>,
    path: Option<PathBuf>,
}

impl fmt::Debug for IdentityCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityCache").field("path", &self.path).finish_non_exhaustive()
    }
}

struct CacheState {
    conn: Connection,
    tables: HashMap<String, HashMap<String, String>>,
}

impl IdentityCache {
    /// Opens (or creates) the cache for a destination and project under
    /// `cache_dir`.
    pub fn open(cache_dir: &Path, destination: &str, project_id: &str) -> CacheResult<Self> {
        std::fs::create_dir_all(cache_dir)?;
        let path = Self::cache_path(cache_dir, destination, project_id);
        if !path.is_file() {
            info!(
                "Target identifier cache file not found so a new one will be created: {}",
                path.display()
            );
        }
        Self::open_path(&path)
    }

    /// Opens (or creates) a cache file at an explicit path.
    pub fn open_path(path: &Path) -> CacheResult<Self> {
        let conn = Connection::open(path)?;
        Ok(Self {
            state: Mutex::new(CacheState::new(conn)),
            path: Some(path.to_path_buf()),
        })
    }

    /// Opens a cache with no file behind it (for testing).
    pub fn open_in_memory() -> CacheResult<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            state: Mutex::new(CacheState::new(conn)),
            path: None,
        })
    }

    /// Where the cache for a destination and project lives.
    ///
    /// `<cache_dir>/<clean destination>_<clean project>_uid_cache.db`. The
    /// result is always a direct child of `cache_dir`.
    pub fn cache_path(cache_dir: &Path, destination: &str, project_id: &str) -> PathBuf {
        cache_dir.join(format!(
            "{}_{}_{CACHE_FILE_SUFFIX}",
            clean_destination(destination),
            file_token(project_id)
        ))
    }

    /// Deletes the cache file for a destination and project.
    ///
    /// Must run before the cache is opened for a load. Returns whether a
    /// file was removed.
    pub fn clear(cache_dir: &Path, destination: &str, project_id: &str) -> CacheResult<bool> {
        let path = Self::cache_path(cache_dir, destination, project_id);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                info!("The identifier cache file at {} has been cleared.", path.display());
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Looks up the remote id cached for a key.
    pub fn get(&self, entity_type: &str, key: &str) -> CacheResult<Option<String>> {
        let mut state = self.lock()?;
        let table = state.primed(entity_type)?;
        Ok(table.get(key).cloned())
    }

    /// Caches a remote id for a key.
    ///
    /// Returns `true` when the stored value changed. Rewriting the same
    /// value touches neither tier.
    pub fn put(&self, entity_type: &str, key: &str, target_id: &str, persist: bool) -> CacheResult<bool> {
        let mut state = self.lock()?;
        let unchanged = state
            .primed(entity_type)?
            .get(key)
            .is_some_and(|current| current == target_id);
        if unchanged {
            return Ok(false);
        }

        if persist {
            state.conn.execute(
                &format!(
                    "INSERT OR REPLACE INTO {} (unique_id, target_id) VALUES (?1, ?2)",
                    quote_ident(entity_type)
                ),
                params![key, target_id],
            )?;
        }
        state
            .tables
            .entry(entity_type.to_string())
            .or_default()
            .insert(key.to_string(), target_id.to_string());
        Ok(true)
    }

    /// Number of keys cached for an entity type (both tiers).
    pub fn len(&self, entity_type: &str) -> CacheResult<usize> {
        let mut state = self.lock()?;
        Ok(state.primed(entity_type)?.len())
    }

    /// Number of keys for an entity type that survive to disk.
    pub fn persisted_len(&self, entity_type: &str) -> CacheResult<usize> {
        let mut state = self.lock()?;
        state.primed(entity_type)?;
        let count: Option<i64> = state
            .conn
            .query_row(
                &format!("SELECT COUNT(*) FROM {}", quote_ident(entity_type)),
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(count.unwrap_or(0) as usize)
    }

    fn lock(&self) -> CacheResult<MutexGuard<'_, CacheState>> {
        self.state.lock().map_err(|_| CacheError::Poisoned)
    }
}

impl CacheState {
    fn new(conn: Connection) -> Self {
        Self {
            conn,
            tables: HashMap::new(),
        }
    }

    /// The RAM table for an entity type, loading it from disk on first use.
    fn primed(&mut self, entity_type: &str) -> CacheResult<&mut HashMap<String, String>> {
        if !self.tables.contains_key(entity_type) {
            let table = quote_ident(entity_type);
            self.conn.execute(
                &format!("CREATE TABLE IF NOT EXISTS {table} (unique_id TEXT PRIMARY KEY, target_id TEXT)"),
                [],
            )?;
            let mut stmt = self
                .conn
                .prepare(&format!("SELECT unique_id, target_id FROM {table}"))?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
            })?;

            let mut loaded = HashMap::new();
            for row in rows {
                let (key, target_id) = row?;
                if let Some(target_id) = target_id {
                    loaded.insert(key, target_id);
                }
            }
            drop(stmt);
            debug!("Primed {entity_type} identifier cache with {} entries", loaded.len());
            self.tables.insert(entity_type.to_string(), loaded);
        }
        Ok(self.tables.entry(entity_type.to_string()).or_default())
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Normalizes a destination URL into a file-name-safe token.
///
/// Uses the URL's network location (host and port), or the whole string
/// when it has no scheme, with `:` and path separators replaced by `_`.
///
/// ```
/// use ingest_cache::clean_destination;
/// assert_eq!(clean_destination("http://localhost:5000/v1"), "localhost_5000");
/// assert_eq!(clean_destination("dataservice"), "dataservice");
/// ```
pub fn clean_destination(destination: &str) -> String {
    let location = match destination.split_once("://") {
        Some((_, rest)) => {
            let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
            match &rest[..end] {
                "" => rest,
                netloc => netloc,
            }
        }
        None => destination,
    };
    file_token(location)
}

fn file_token(raw: &str) -> String {
    raw.replace([':', '/', '\\'], "_")
}
