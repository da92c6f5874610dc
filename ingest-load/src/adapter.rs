//! The adapter contract between the orchestrator and a target service.
//!
//! Two protocol versions exist. Version 1 entities build a key from the
//! record alone and share one module-level [`SubmitV1`] function; version 2
//! entities may use foreign ids in their keys and carry their own submit
//! and remote query. Both are served through [`TargetAdapter`], and an
//! [`AdapterSet`] is checked once before a load begins.

use crate::error::{LoadError, LoadResult};
use async_trait::async_trait;
use ingest_model::KeyGraph;
use ingest_types::{NOT_REPORTED, Record, is_missing, stringify_value};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Request body sent to the target service.
pub type Body = Map<String, Value>;

/// Adapter protocol version, declared once per adapter set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum LoaderVersion {
    V1,
    V2,
}

impl TryFrom<u8> for LoaderVersion {
    type Error = LoadError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::V1),
            2 => Ok(Self::V2),
            other => Err(LoadError::config(format!(
                "unsupported loader version {other}; expected 1 or 2"
            ))),
        }
    }
}

impl From<LoaderVersion> for u8 {
    fn from(version: LoaderVersion) -> Self {
        match version {
            LoaderVersion::V1 => 1,
            LoaderVersion::V2 => 2,
        }
    }
}

impl fmt::Display for LoaderVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u8::from(*self))
    }
}

/// The named values that identify one entity instance.
///
/// [`to_key_string`](Self::to_key_string) turns them into the unique key
/// used for dedup and caching.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyComponents(BTreeMap<String, Value>);

impl KeyComponents {
    pub fn new() -> Self {
        Self::default()
    }

    /// A key made of one component.
    pub fn single(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new().with(name, value)
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Stable string form.
    ///
    /// A single component renders as its value alone. Several render as
    /// `name=value` pairs in name order, joined by `|`. Missing values
    /// render as [`NOT_REPORTED`].
    pub fn to_key_string(&self) -> String {
        let render = |v: &Value| stringify_value(v).unwrap_or_else(|| NOT_REPORTED.to_string());
        if self.0.len() == 1 {
            if let Some(value) = self.0.values().next() {
                return render(value);
            }
        }
        self.0
            .iter()
            .map(|(name, value)| format!("{name}={}", render(value)))
            .collect::<Vec<_>>()
            .join("|")
    }

    /// Non-missing components as string query filters.
    pub fn filters(&self) -> Vec<(String, String)> {
        self.0
            .iter()
            .filter_map(|(name, value)| stringify_value(value).map(|v| (name.clone(), v)))
            .collect()
    }
}

impl fmt::Display for KeyComponents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_key_string())
    }
}

/// Result of asking an adapter for a record's key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyDerivation {
    Derived(KeyComponents),
    /// A required component was absent; the message names it.
    MissingRequired(String),
}

/// A real remote id from a raw value: present, not blank, not `Not Reported`.
pub fn reported_id(value: Option<&Value>) -> Option<String> {
    value
        .and_then(stringify_value)
        .filter(|id| id != NOT_REPORTED)
}

/// Resolves ids of already-loaded entities for foreign-key population.
///
/// Implementations consult the identity cache only and never the network.
pub trait IdLookup: Send + Sync {
    /// The cached id for a unique key of `entity_type`.
    fn cached_id(&self, entity_type: &str, unique_key: &str) -> LoadResult<Option<String>>;

    /// The id of the `entity_type` instance described by `record`.
    ///
    /// Uses the record's own id attribute when it has a reported value,
    /// otherwise derives that type's key from the record and looks it up.
    fn target_id(&self, entity_type: &str, record: &Record) -> LoadResult<Option<String>>;
}

// ── Protocol version 1 ───────────────────────────────────────────

/// A version 1 entity descriptor.
pub trait EntityV1: Send + Sync {
    fn name(&self) -> &str;

    /// Record attribute that may already hold this entity's remote id.
    fn target_id_field(&self) -> Option<&str> {
        None
    }

    fn build_key(&self, record: &Record) -> LoadResult<KeyDerivation>;

    fn build_entity(&self, record: &Record, unique_key: &str, lookup: &dyn IdLookup) -> LoadResult<Body>;
}

/// The module-level submit function shared by a version 1 adapter set.
#[async_trait]
pub trait SubmitV1: Send + Sync {
    async fn submit(&self, host: &str, entity_type: &str, body: &Body) -> LoadResult<String>;
}

// ── Protocol version 2 ───────────────────────────────────────────

/// A version 2 entity descriptor.
#[async_trait]
pub trait EntityV2: Send + Sync {
    fn name(&self) -> &str;

    fn target_id_field(&self) -> Option<&str> {
        None
    }

    fn get_key_components(&self, record: &Record, lookup: &dyn IdLookup) -> LoadResult<KeyDerivation>;

    fn build_entity(&self, record: &Record, lookup: &dyn IdLookup) -> LoadResult<Body>;

    async fn submit(&self, host: &str, body: &Body) -> LoadResult<String>;

    /// Remote ids of entities matching `key`. More than one is ambiguous.
    async fn query_target_ids(&self, host: &str, key: &KeyComponents) -> LoadResult<Vec<String>>;
}

// ── Unified contract ─────────────────────────────────────────────

/// What the orchestrator needs from one entity type, whatever its protocol.
#[async_trait]
pub trait TargetAdapter: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> LoaderVersion;

    fn target_id_field(&self) -> Option<&str>;

    fn derive_key(&self, record: &Record, lookup: &dyn IdLookup) -> LoadResult<KeyDerivation>;

    fn build_body(&self, record: &Record, unique_key: &str, lookup: &dyn IdLookup) -> LoadResult<Body>;

    async fn submit(&self, host: &str, body: &Body) -> LoadResult<String>;

    /// Whether [`query_target_ids`](Self::query_target_ids) asks the service.
    fn queries_remote(&self) -> bool {
        false
    }

    async fn query_target_ids(&self, host: &str, key: &KeyComponents) -> LoadResult<Vec<String>> {
        let _ = (host, key);
        Ok(Vec::new())
    }
}

struct V1Adapter {
    entity: Arc<dyn EntityV1>,
    submitter: Arc<dyn SubmitV1>,
}

#[async_trait]
impl TargetAdapter for V1Adapter {
    fn name(&self) -> &str {
        self.entity.name()
    }

    fn version(&self) -> LoaderVersion {
        LoaderVersion::V1
    }

    fn target_id_field(&self) -> Option<&str> {
        self.entity.target_id_field()
    }

    fn derive_key(&self, record: &Record, _lookup: &dyn IdLookup) -> LoadResult<KeyDerivation> {
        self.entity.build_key(record)
    }

    fn build_body(&self, record: &Record, unique_key: &str, lookup: &dyn IdLookup) -> LoadResult<Body> {
        self.entity.build_entity(record, unique_key, lookup)
    }

    async fn submit(&self, host: &str, body: &Body) -> LoadResult<String> {
        self.submitter.submit(host, self.entity.name(), body).await
    }
}

struct V2Adapter {
    entity: Arc<dyn EntityV2>,
}

#[async_trait]
impl TargetAdapter for V2Adapter {
    fn name(&self) -> &str {
        self.entity.name()
    }

    fn version(&self) -> LoaderVersion {
        LoaderVersion::V2
    }

    fn target_id_field(&self) -> Option<&str> {
        self.entity.target_id_field()
    }

    fn derive_key(&self, record: &Record, lookup: &dyn IdLookup) -> LoadResult<KeyDerivation> {
        self.entity.get_key_components(record, lookup)
    }

    fn build_body(&self, record: &Record, _unique_key: &str, lookup: &dyn IdLookup) -> LoadResult<Body> {
        self.entity.build_entity(record, lookup)
    }

    async fn submit(&self, host: &str, body: &Body) -> LoadResult<String> {
        self.entity.submit(host, body).await
    }

    fn queries_remote(&self) -> bool {
        true
    }

    async fn query_target_ids(&self, host: &str, key: &KeyComponents) -> LoadResult<Vec<String>> {
        self.entity.query_target_ids(host, key).await
    }
}

// ── Adapter set ──────────────────────────────────────────────────

/// Every entity adapter for one target, in processing order.
pub struct AdapterSet {
    version: LoaderVersion,
    adapters: Vec<Arc<dyn TargetAdapter>>,
    index: HashMap<String, usize>,
}

impl fmt::Debug for AdapterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterSet")
            .field("version", &self.version)
            .field("entities", &self.names().collect::<Vec<_>>())
            .finish()
    }
}

impl AdapterSet {
    pub fn builder(declared_version: u8) -> AdapterSetBuilder {
        AdapterSetBuilder {
            declared_version,
            v1: Vec::new(),
            v2: Vec::new(),
            submitter: None,
        }
    }

    pub fn version(&self) -> LoaderVersion {
        self.version
    }

    pub fn get(&self, entity_type: &str) -> Option<&Arc<dyn TargetAdapter>> {
        self.index.get(entity_type).map(|&i| &self.adapters[i])
    }

    pub fn contains(&self, entity_type: &str) -> bool {
        self.index.contains_key(entity_type)
    }

    /// Adapters in processing order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn TargetAdapter>> {
        self.adapters.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.adapters.iter().map(|a| a.name())
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Checks a load plan against this set before any record is touched.
    ///
    /// Every name in `entities_to_load` must be a known entity type, and
    /// the processing order must respect the key composition graph.
    pub fn validate_plan(&self, entities_to_load: Option<&[String]>, graph: Option<&KeyGraph>) -> LoadResult<()> {
        if let Some(wanted) = entities_to_load {
            let unknown: Vec<&str> = wanted
                .iter()
                .map(String::as_str)
                .filter(|name| !self.contains(name))
                .collect();
            if !unknown.is_empty() {
                return Err(LoadError::config(format!(
                    "entities to load are not defined by the target adapters: {unknown:?}; valid entities: {:?}",
                    self.names().collect::<Vec<_>>()
                )));
            }
        }
        if let Some(graph) = graph {
            let order: Vec<&str> = self.names().collect();
            graph.validate_order(order.as_slice())?;
        }
        Ok(())
    }
}

/// Collects entity descriptors and checks their capabilities on
/// [`build`](Self::build).
pub struct AdapterSetBuilder {
    declared_version: u8,
    v1: Vec<Arc<dyn EntityV1>>,
    v2: Vec<Arc<dyn EntityV2>>,
    submitter: Option<Arc<dyn SubmitV1>>,
}

impl AdapterSetBuilder {
    #[must_use]
    pub fn v1_entity(mut self, entity: Arc<dyn EntityV1>) -> Self {
        self.v1.push(entity);
        self
    }

    #[must_use]
    pub fn v2_entity(mut self, entity: Arc<dyn EntityV2>) -> Self {
        self.v2.push(entity);
        self
    }

    #[must_use]
    pub fn submitter(mut self, submitter: Arc<dyn SubmitV1>) -> Self {
        self.submitter = Some(submitter);
        self
    }

    pub fn build(self) -> LoadResult<AdapterSet> {
        let version = LoaderVersion::try_from(self.declared_version)?;

        let adapters: Vec<Arc<dyn TargetAdapter>> = match version {
            LoaderVersion::V1 => {
                if !self.v2.is_empty() {
                    return Err(LoadError::config(format!(
                        "loader version 1 adapter set contains version 2 entities: {:?}",
                        self.v2.iter().map(|e| e.name().to_string()).collect::<Vec<_>>()
                    )));
                }
                let submitter = self.submitter.ok_or_else(|| {
                    LoadError::config("loader version 1 adapter set has no submit function")
                })?;
                self.v1
                    .into_iter()
                    .map(|entity| {
                        Arc::new(V1Adapter {
                            entity,
                            submitter: Arc::clone(&submitter),
                        }) as Arc<dyn TargetAdapter>
                    })
                    .collect()
            }
            LoaderVersion::V2 => {
                if !self.v1.is_empty() {
                    return Err(LoadError::config(format!(
                        "loader version 2 adapter set contains version 1 entities: {:?}",
                        self.v1.iter().map(|e| e.name().to_string()).collect::<Vec<_>>()
                    )));
                }
                if self.submitter.is_some() {
                    return Err(LoadError::config(
                        "loader version 2 entities submit themselves; remove the shared submit function",
                    ));
                }
                self.v2
                    .into_iter()
                    .map(|entity| Arc::new(V2Adapter { entity }) as Arc<dyn TargetAdapter>)
                    .collect()
            }
        };

        if adapters.is_empty() {
            return Err(LoadError::config("adapter set declares no entities"));
        }

        let mut index = HashMap::with_capacity(adapters.len());
        for (i, adapter) in adapters.iter().enumerate() {
            let name = adapter.name();
            if name.trim().is_empty() {
                return Err(LoadError::config(format!("entity #{} has an empty name", i + 1)));
            }
            if index.insert(name.to_string(), i).is_some() {
                return Err(LoadError::config(format!("entity '{name}' is declared twice")));
            }
        }

        Ok(AdapterSet {
            version,
            adapters,
            index,
        })
    }
}

/// Drops null values from a body.
pub(crate) fn drop_missing(body: Body) -> Body {
    body.into_iter().filter(|(_, v)| !v.is_null()).collect()
}

pub(crate) fn value_is_missing(value: Option<&Value>) -> bool {
    value.is_none_or(is_missing)
}
