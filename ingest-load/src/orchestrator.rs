//! Drives a load: entity types in order, records through dedup, identity
//! resolution and submission.
//!
//! Per record, key derivation, duplicate detection and "mark seen" always
//! run on the dispatching task, so no two submissions can ever share a
//! key. The remaining steps (existing id, body, resume check, submit or
//! simulate, bookkeeping) may run concurrently on a bounded pool when
//! `use_async` is set and no resume is pending.

use crate::adapter::{AdapterSet, IdLookup, KeyComponents, KeyDerivation, LoaderVersion, TargetAdapter, reported_id};
use crate::error::{LoadError, LoadResult};
use crate::report::{LoadReport, SkipCounts};
use crate::resume::{ResumeController, ResumeStep};
use crate::sent_log::{SentMessage, sent_log_path, write_sent_log};
use crate::settings::LoadSettings;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use ingest_cache::IdentityCache;
use ingest_types::{DEFAULT_TABLE, Method, MethodCounts, NOT_REPORTED, Record, SubmissionOutcome};
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Input tables keyed by entity type name (or [`DEFAULT_TABLE`]).
pub type Tables = BTreeMap<String, Vec<Record>>;

/// Runtime switches for one load.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Submit records of one entity type concurrently.
    pub use_async: bool,
    /// Upper bound on concurrent submissions.
    pub workers: usize,
    /// Build everything, send nothing.
    pub dry_run: bool,
    /// Simulate until a cached id starting with this token, then load.
    pub resume_from: Option<String>,
    /// Delete the identity cache before loading. Ignored when resuming.
    pub clear_cache: bool,
    pub cache_dir: PathBuf,
    /// Where the sent-message log is written.
    pub output_dir: PathBuf,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            use_async: false,
            workers: 16,
            dry_run: false,
            resume_from: None,
            clear_cache: false,
            cache_dir: PathBuf::from("."),
            output_dir: PathBuf::from("."),
        }
    }
}

impl LoadOptions {
    /// Whether this load will start by replaying toward a resume token.
    pub fn resuming(&self) -> bool {
        !self.dry_run && self.resume_from.as_deref().is_some_and(|t| !t.trim().is_empty())
    }
}

/// Where and for which project a load runs.
#[derive(Debug, Clone)]
pub struct LoadTarget {
    pub target_url: String,
    /// Alternative service for version 2 remote lookups.
    pub query_url: Option<String>,
    pub project_id: String,
    /// Attribute every record is given, holding `project_id`.
    pub project_id_field: String,
    /// Restrict the load to these entity types; `None` loads all.
    pub entities_to_load: Option<Vec<String>>,
}

impl From<&LoadSettings> for LoadTarget {
    fn from(settings: &LoadSettings) -> Self {
        Self {
            target_url: settings.target_url.clone(),
            query_url: settings.query_url.clone(),
            project_id: settings.project_id.clone(),
            project_id_field: settings.project_id_field.clone(),
            entities_to_load: settings.entities_to_load.clone(),
        }
    }
}

/// How the first three steps classified a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordDisposition {
    Derived {
        unique_key: String,
        components: KeyComponents,
    },
    /// No key could be derived; the record is skipped.
    MissingRequired(String),
    /// Same key as an earlier record of this type; the record is dropped.
    Duplicate(String),
}

/// Loads standardized tables into one target for one project.
#[derive(Debug)]
pub struct LoadOrchestrator {
    adapters: AdapterSet,
    cache: IdentityCache,
    target: LoadTarget,
    options: LoadOptions,
}

impl LoadOrchestrator {
    pub fn new(adapters: AdapterSet, cache: IdentityCache, target: LoadTarget, options: LoadOptions) -> LoadResult<Self> {
        if options.workers == 0 {
            return Err(LoadError::config("workers must be at least 1"));
        }
        if target.target_url.trim().is_empty() {
            return Err(LoadError::config("target url is empty"));
        }
        adapters.validate_plan(target.entities_to_load.as_deref(), None)?;
        Ok(Self {
            adapters,
            cache,
            target,
            options,
        })
    }

    /// Prepares the identity cache under `options.cache_dir` and builds
    /// the orchestrator.
    ///
    /// `clear_cache` is honored only when not resuming. Resuming without an
    /// existing cache file is a configuration error.
    pub fn open(adapters: AdapterSet, target: LoadTarget, options: LoadOptions) -> LoadResult<Self> {
        let cache_dir = options.cache_dir.as_path();
        let path = IdentityCache::cache_path(cache_dir, &target.target_url, &target.project_id);

        if options.clear_cache {
            if options.resuming() {
                info!("Resuming a previous run, so the identifier cache is kept.");
            } else {
                IdentityCache::clear(cache_dir, &target.target_url, &target.project_id)?;
            }
        }
        if options.resuming() && !path.is_file() {
            return Err(LoadError::config(format!(
                "resume_from requires the identifier cache of a previous run, but {} does not exist",
                path.display()
            )));
        }

        let cache = IdentityCache::open(cache_dir, &target.target_url, &target.project_id)?;
        info!("Using identifier cache {}", path.display());
        Self::new(adapters, cache, target, options)
    }

    pub fn cache(&self) -> &IdentityCache {
        &self.cache
    }

    pub fn adapters(&self) -> &AdapterSet {
        &self.adapters
    }

    pub fn options(&self) -> &LoadOptions {
        &self.options
    }

    /// Loads every entity type in order.
    ///
    /// The sent-message log is written whether or not the load succeeds.
    pub async fn run(&self, tables: &Tables) -> LoadResult<LoadReport> {
        self.validate_tables(tables)?;
        info!("Loader version {}", self.adapters.version());

        let resume = ResumeController::new(self.options.resume_from.clone(), self.options.dry_run);
        if self.options.dry_run {
            info!("DRY RUN mode is ON. No entities will be loaded into the target service.");
        } else if let Some(token) = resume.token() {
            info!("Will dry run until '{token}' and then resume loading from that entity.");
        }

        let run = Run {
            adapters: &self.adapters,
            cache: &self.cache,
            target: &self.target,
            options: &self.options,
            lookup: CacheLookup {
                adapters: &self.adapters,
                cache: &self.cache,
            },
            mode: Mutex::new(RunMode {
                simulating: self.options.dry_run || resume.is_armed(),
                resume,
            }),
            log: Mutex::new(RunLog::default()),
            dry_ids: AtomicU64::new(0),
        };
        let result = run.load_all(tables).await;

        let log = run.log.into_inner().unwrap_or_else(PoisonError::into_inner);
        let mode = run.mode.into_inner().unwrap_or_else(PoisonError::into_inner);
        let path = sent_log_path(&self.options.output_dir, &self.target.target_url);
        let written = write_sent_log(&path, &log.sent);

        if let Err(e) = result {
            if let Err(write_err) = written {
                warn!("Failed to write sent messages to {}: {write_err}", path.display());
            }
            return Err(e);
        }
        written?;
        info!("Wrote {} sent messages to {}", log.sent.len(), path.display());

        let unreached = mode.resume.finish().map(String::from);
        info!(
            "Load Summary:\n{}",
            serde_json::to_string_pretty(&log.counts).unwrap_or_default()
        );

        Ok(LoadReport {
            counts: log.counts,
            skipped: log.skipped,
            sent_messages: log.sent,
            outcomes: log.outcomes,
            unreached_resume_token: unreached,
            sent_log_path: Some(path),
        })
    }

    fn validate_tables(&self, tables: &Tables) -> LoadResult<()> {
        let unknown: Vec<&str> = tables
            .keys()
            .map(String::as_str)
            .filter(|name| *name != DEFAULT_TABLE && !self.adapters.contains(name))
            .collect();
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(LoadError::config(format!(
                "input tables do not match any target entity: {unknown:?}"
            )))
        }
    }
}

// ── Per-run state ────────────────────────────────────────────────

struct RunMode {
    simulating: bool,
    resume: ResumeController,
}

#[derive(Default)]
struct RunLog {
    counts: BTreeMap<String, MethodCounts>,
    skipped: BTreeMap<String, SkipCounts>,
    sent: Vec<SentMessage>,
    outcomes: Vec<SubmissionOutcome>,
}

/// Cache-only id resolution handed to adapters.
struct CacheLookup<'a> {
    adapters: &'a AdapterSet,
    cache: &'a IdentityCache,
}

impl IdLookup for CacheLookup<'_> {
    fn cached_id(&self, entity_type: &str, unique_key: &str) -> LoadResult<Option<String>> {
        Ok(self
            .cache
            .get(entity_type, unique_key)?
            .filter(|id| id != NOT_REPORTED))
    }

    fn target_id(&self, entity_type: &str, record: &Record) -> LoadResult<Option<String>> {
        let Some(adapter) = self.adapters.get(entity_type) else {
            return Ok(None);
        };
        if let Some(id) = adapter.target_id_field().and_then(|f| reported_id(record.get(f))) {
            return Ok(Some(id));
        }
        match adapter.derive_key(record, self)? {
            KeyDerivation::Derived(components) if !components.is_empty() => {
                self.cached_id(entity_type, &components.to_key_string())
            }
            _ => Ok(None),
        }
    }
}

struct Run<'a> {
    adapters: &'a AdapterSet,
    cache: &'a IdentityCache,
    target: &'a LoadTarget,
    options: &'a LoadOptions,
    lookup: CacheLookup<'a>,
    mode: Mutex<RunMode>,
    log: Mutex<RunLog>,
    dry_ids: AtomicU64,
}

impl Run<'_> {
    async fn load_all(&self, tables: &Tables) -> LoadResult<()> {
        for adapter in self.adapters.iter() {
            let name = adapter.name();
            let wanted = self
                .target
                .entities_to_load
                .as_ref()
                .is_none_or(|list| list.iter().any(|e| e == name));
            if !wanted {
                info!("Skipping load of {name}. Not included in the entities to load.");
                continue;
            }

            info!("Begin loading {name}");
            self.log()?.counts.entry(name.to_string()).or_default();

            let table = tables
                .get_key_value(name)
                .or_else(|| tables.get_key_value(DEFAULT_TABLE));
            match table {
                Some((table_name, records)) => {
                    info!("Reading {} rows in '{table_name}' table.", records.len());
                    self.load_entity(adapter.as_ref(), records).await?;
                }
                None => info!("No '{name}' or '{DEFAULT_TABLE}' table; nothing to load."),
            }
            info!("End loading {name}");
        }
        Ok(())
    }

    async fn load_entity(&self, adapter: &dyn TargetAdapter, records: &[Record]) -> LoadResult<()> {
        let mut seen = HashSet::new();
        let mut in_flight = FuturesUnordered::new();
        let mut failure = None;

        for record in records {
            let record = record.with_field(
                self.target.project_id_field.as_str(),
                self.target.project_id.as_str(),
            );

            let (unique_key, components) = match self.admit(adapter, &record, &mut seen) {
                Ok(RecordDisposition::Derived { unique_key, components }) => (unique_key, components),
                Ok(_) => continue,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            };

            let concurrent = match self.concurrent() {
                Ok(c) => c,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            };

            if concurrent {
                while in_flight.len() >= self.options.workers {
                    if let Some(Err(e)) = next_result(&mut in_flight).await {
                        failure = Some(e);
                        break;
                    }
                }
                if failure.is_some() {
                    break;
                }
                in_flight.push(self.process(adapter, record, unique_key, components));
            } else if let Err(e) = self.process(adapter, record, unique_key, components).await {
                failure = Some(e);
                break;
            }
        }

        // drain whatever was already dispatched, keeping the first error
        while let Some(result) = next_result(&mut in_flight).await {
            if let Err(e) = result {
                failure.get_or_insert(e);
            }
        }
        failure.map_or(Ok(()), Err)
    }

    /// Steps 1 to 3: derive the key, drop duplicates, mark seen.
    fn admit(&self, adapter: &dyn TargetAdapter, record: &Record, seen: &mut HashSet<String>) -> LoadResult<RecordDisposition> {
        let name = adapter.name();
        let disposition = match adapter.derive_key(record, &self.lookup)? {
            KeyDerivation::Derived(components) if !components.is_empty() => {
                let unique_key = components.to_key_string();
                if seen.insert(unique_key.clone()) {
                    RecordDisposition::Derived { unique_key, components }
                } else {
                    RecordDisposition::Duplicate(unique_key)
                }
            }
            KeyDerivation::Derived(_) => RecordDisposition::MissingRequired("no key components".into()),
            KeyDerivation::MissingRequired(what) => RecordDisposition::MissingRequired(what),
        };

        match &disposition {
            RecordDisposition::Derived { .. } => {}
            RecordDisposition::MissingRequired(what) => {
                warn!(
                    "Skip {name}. Missing key components ({what}). Failed to construct unique key from record: {}",
                    preview(record)
                );
                self.log()?.skipped.entry(name.to_string()).or_default().missing_key += 1;
            }
            RecordDisposition::Duplicate(key) => {
                debug!("Skip {name}. Duplicate record ({key}) found in data: {}", preview(record));
                self.log()?.skipped.entry(name.to_string()).or_default().duplicate += 1;
            }
        }
        Ok(disposition)
    }

    /// Steps 4 to 9.
    async fn process(
        &self,
        adapter: &dyn TargetAdapter,
        record: Record,
        unique_key: String,
        components: KeyComponents,
    ) -> LoadResult<()> {
        let name = adapter.name();

        let existing = self.existing_id(adapter, &record, &unique_key, &components).await?;
        let method = Method::for_existing(existing.is_some());

        let body = adapter
            .build_body(&record, &unique_key, &self.lookup)
            .inspect_err(|_| info!("Failed to build {name} from record {}", preview(&record)))?;

        let simulating = self.observe_resume(name, &unique_key, existing.as_deref())?;

        let mut msg = format!("{method} {name} ({unique_key})");
        if let Some(id) = &existing {
            msg = format!("{msg} [{id}]");
        }

        let target_id = if simulating {
            debug!("Request body preview:\n{}", pretty(&body));
            msg = format!("DRY RUN - {msg}");
            let id = existing.unwrap_or_else(|| {
                let n = self.dry_ids.fetch_add(1, Ordering::SeqCst) + 1;
                format!("DRY_{name}_{n}")
            });
            self.cache.put(name, &unique_key, &id, false)?;
            id
        } else {
            let id = adapter.submit(&self.target.target_url, &body).await?;
            msg = format!("{msg} --> {id}");
            if id != NOT_REPORTED {
                self.cache.put(name, &unique_key, &id, true)?;
            }
            id
        };

        let mut log = self.log()?;
        log.sent.push(SentMessage {
            entity_type: name.to_string(),
            method,
            body: body.clone(),
            host: (adapter.version() == LoaderVersion::V1).then(|| self.target.target_url.clone()),
        });
        let counts = log.counts.entry(name.to_string()).or_default();
        counts.record(method);
        let n = counts.total();
        log.outcomes.push(SubmissionOutcome {
            entity_type: name.to_string(),
            unique_key,
            method,
            target_id,
            body,
            simulated: simulating,
        });
        info!("{msg} (#{n})");
        Ok(())
    }

    /// The record's own id, else the cache, else (version 2) the service.
    async fn existing_id(
        &self,
        adapter: &dyn TargetAdapter,
        record: &Record,
        unique_key: &str,
        components: &KeyComponents,
    ) -> LoadResult<Option<String>> {
        let name = adapter.name();
        if let Some(id) = adapter.target_id_field().and_then(|f| reported_id(record.get(f))) {
            return Ok(Some(id));
        }
        if let Some(id) = self.lookup.cached_id(name, unique_key)? {
            return Ok(Some(id));
        }
        if !adapter.queries_remote() {
            return Ok(None);
        }

        let simulating = self.mode()?.simulating;
        if simulating && self.target.query_url.is_none() {
            return Ok(None);
        }
        let host = self.target.query_url.as_deref().unwrap_or(&self.target.target_url);
        let found = adapter.query_target_ids(host, components).await?;
        if found.len() > 1 {
            return Err(LoadError::AmbiguousMatch {
                entity_type: name.to_string(),
                sent: components.to_key_string(),
                found,
            });
        }
        match found.into_iter().next().filter(|id| !id.trim().is_empty() && id != NOT_REPORTED) {
            Some(id) => {
                self.cache.put(name, unique_key, &id, !simulating)?;
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }

    fn observe_resume(&self, entity_type: &str, unique_key: &str, existing: Option<&str>) -> LoadResult<bool> {
        let mut mode = self.mode()?;
        if mode.resume.observe(entity_type, unique_key, existing)? == ResumeStep::Resumed {
            mode.simulating = false;
        }
        Ok(mode.simulating)
    }

    /// Concurrent dispatch is allowed only while no resume is pending.
    fn concurrent(&self) -> LoadResult<bool> {
        Ok(self.options.use_async && !self.mode()?.resume.is_armed())
    }

    fn mode(&self) -> LoadResult<MutexGuard<'_, RunMode>> {
        self.mode.lock().map_err(|_| LoadError::Poisoned("run mode"))
    }

    fn log(&self) -> LoadResult<MutexGuard<'_, RunLog>> {
        self.log.lock().map_err(|_| LoadError::Poisoned("load report"))
    }
}

async fn next_result<F>(in_flight: &mut FuturesUnordered<F>) -> Option<LoadResult<()>>
where
    F: Future<Output = LoadResult<()>>,
{
    in_flight.next().await
}

fn preview(record: &Record) -> String {
    serde_json::to_string(record).unwrap_or_default()
}

fn pretty(body: &crate::adapter::Body) -> String {
    serde_json::to_string_pretty(body).unwrap_or_default()
}
