//! In-memory adapters for exercising the orchestrator without a service.
//!
//! [`ScriptedService`] plays the target: it hands out ids, remembers every
//! submission, and can be told to delay, fail, or answer remote queries.
//! [`ScriptedEntity`] is an entity descriptor backed by it that speaks
//! either protocol version.

use crate::adapter::{
    AdapterSet, Body, EntityV1, EntityV2, IdLookup, KeyComponents, KeyDerivation, SubmitV1, reported_id,
    value_is_missing,
};
use crate::error::{LoadError, LoadResult};
use async_trait::async_trait;
use ingest_types::Record;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// One request the scripted service received.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub entity_type: String,
    pub host: String,
    pub body: Body,
}

#[derive(Default)]
struct ServiceState {
    submissions: Vec<Submission>,
    issued: HashMap<String, usize>,
    remote: HashMap<(String, String), Vec<String>>,
}

/// A fake target service.
#[derive(Default)]
pub struct ScriptedService {
    state: Mutex<ServiceState>,
    prefixes: HashMap<String, String>,
    delay: Option<Duration>,
    fail_at: Option<usize>,
    queries: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every submission sleeps this long before answering.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// The `n`th submission (1-based, across all types) fails.
    #[must_use]
    pub fn failing_at(mut self, n: usize) -> Self {
        self.fail_at = Some(n);
        self
    }

    /// Id prefix for an entity type. Defaults to its first two letters.
    #[must_use]
    pub fn with_prefix(mut self, entity_type: impl Into<String>, prefix: impl Into<String>) -> Self {
        self.prefixes.insert(entity_type.into(), prefix.into());
        self
    }

    /// Ids a remote query for `key` (its key string) returns.
    #[must_use]
    pub fn with_remote(self, entity_type: impl Into<String>, key: impl Into<String>, ids: Vec<String>) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.remote.insert((entity_type.into(), key.into()), ids);
        }
        self
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.lock().map(|s| s.submissions.clone()).unwrap_or_default()
    }

    pub fn submissions_of(&self, entity_type: &str) -> Vec<Submission> {
        self.submissions()
            .into_iter()
            .filter(|s| s.entity_type == entity_type)
            .collect()
    }

    pub fn submission_count(&self) -> usize {
        self.lock().map(|s| s.submissions.len()).unwrap_or_default()
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// Most submissions ever in progress at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub async fn receive(&self, host: &str, entity_type: &str, body: &Body) -> LoadResult<String> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        let mut state = self.lock()?;
        state.submissions.push(Submission {
            entity_type: entity_type.to_string(),
            host: host.to_string(),
            body: body.clone(),
        });
        if self.fail_at == Some(state.submissions.len()) {
            return Err(LoadError::Submission(format!(
                "scripted failure on submission #{}",
                state.submissions.len()
            )));
        }
        if let Some(id) = reported_id(body.get("kf_id")) {
            return Ok(id);
        }
        let issued = state.issued.entry(entity_type.to_string()).or_default();
        *issued += 1;
        Ok(format!("{}_{:05}", self.prefix(entity_type), *issued))
    }

    pub fn query(&self, entity_type: &str, key: &KeyComponents) -> LoadResult<Vec<String>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .lock()?
            .remote
            .get(&(entity_type.to_string(), key.to_key_string()))
            .cloned()
            .unwrap_or_default())
    }

    fn prefix(&self, entity_type: &str) -> String {
        self.prefixes
            .get(entity_type)
            .cloned()
            .unwrap_or_else(|| entity_type.chars().take(2).collect::<String>().to_uppercase())
    }

    fn lock(&self) -> LoadResult<MutexGuard<'_, ServiceState>> {
        self.state.lock().map_err(|_| LoadError::Poisoned("scripted service"))
    }
}

#[async_trait]
impl SubmitV1 for ScriptedService {
    async fn submit(&self, host: &str, entity_type: &str, body: &Body) -> LoadResult<String> {
        self.receive(host, entity_type, body).await
    }
}

/// An entity whose key is a list of record attributes, all required.
pub struct ScriptedEntity {
    name: String,
    key_fields: Vec<String>,
    target_id_field: Option<String>,
    /// Body field -> entity type whose id it holds.
    links: Vec<(String, String)>,
    service: Arc<ScriptedService>,
}

impl ScriptedEntity {
    pub fn new(name: impl Into<String>, key_fields: &[&str], service: Arc<ScriptedService>) -> Self {
        Self {
            name: name.into(),
            key_fields: key_fields.iter().map(|f| f.to_string()).collect(),
            target_id_field: None,
            links: Vec::new(),
            service,
        }
    }

    #[must_use]
    pub fn with_target_id_field(mut self, attribute: impl Into<String>) -> Self {
        self.target_id_field = Some(attribute.into());
        self
    }

    #[must_use]
    pub fn with_link(mut self, field: impl Into<String>, entity_type: impl Into<String>) -> Self {
        self.links.push((field.into(), entity_type.into()));
        self
    }

    fn own_key(&self, record: &Record) -> KeyDerivation {
        let mut key = KeyComponents::new();
        for field in &self.key_fields {
            let value = record.get(field);
            if value_is_missing(value) {
                return KeyDerivation::MissingRequired(field.clone());
            }
            key.insert(field.clone(), value.cloned().unwrap_or(Value::Null));
        }
        KeyDerivation::Derived(key)
    }

    fn body(&self, record: &Record, lookup: &dyn IdLookup) -> LoadResult<Body> {
        let mut body = Body::new();
        for field in &self.key_fields {
            if let Some(value) = record.get(field) {
                body.insert(field.clone(), value.clone());
            }
        }
        for (field, entity) in &self.links {
            if let Some(id) = lookup.target_id(entity, record)? {
                body.insert(field.clone(), Value::String(id));
            }
        }
        if let Some(id) = lookup.target_id(&self.name, record)? {
            body.insert("kf_id".to_string(), Value::String(id));
        }
        Ok(body)
    }
}

impl EntityV1 for ScriptedEntity {
    fn name(&self) -> &str {
        &self.name
    }

    fn target_id_field(&self) -> Option<&str> {
        self.target_id_field.as_deref()
    }

    fn build_key(&self, record: &Record) -> LoadResult<KeyDerivation> {
        Ok(self.own_key(record))
    }

    fn build_entity(&self, record: &Record, unique_key: &str, lookup: &dyn IdLookup) -> LoadResult<Body> {
        let mut body = self.body(record, lookup)?;
        body.insert("external_id".to_string(), Value::String(unique_key.to_string()));
        Ok(body)
    }
}

#[async_trait]
impl EntityV2 for ScriptedEntity {
    fn name(&self) -> &str {
        &self.name
    }

    fn target_id_field(&self) -> Option<&str> {
        self.target_id_field.as_deref()
    }

    fn get_key_components(&self, record: &Record, lookup: &dyn IdLookup) -> LoadResult<KeyDerivation> {
        let mut key = match self.own_key(record) {
            KeyDerivation::Derived(key) => key,
            missing => return Ok(missing),
        };
        for (field, entity) in &self.links {
            let id = lookup.target_id(entity, record)?;
            key.insert(field.clone(), id.map_or(Value::Null, Value::String));
        }
        Ok(KeyDerivation::Derived(key))
    }

    fn build_entity(&self, record: &Record, lookup: &dyn IdLookup) -> LoadResult<Body> {
        self.body(record, lookup)
    }

    async fn submit(&self, host: &str, body: &Body) -> LoadResult<String> {
        self.service.receive(host, &self.name, body).await
    }

    async fn query_target_ids(&self, _host: &str, key: &KeyComponents) -> LoadResult<Vec<String>> {
        self.service.query(&self.name, key)
    }
}

/// A version 1 set of `entities` sharing `service` as submit function.
pub fn v1_set(service: &Arc<ScriptedService>, entities: Vec<ScriptedEntity>) -> LoadResult<AdapterSet> {
    entities
        .into_iter()
        .fold(AdapterSet::builder(1), |b, e| b.v1_entity(Arc::new(e)))
        .submitter(Arc::clone(service) as Arc<dyn SubmitV1>)
        .build()
}

/// A version 2 set of `entities`.
pub fn v2_set(entities: Vec<ScriptedEntity>) -> LoadResult<AdapterSet> {
    entities
        .into_iter()
        .fold(AdapterSet::builder(2), |b, e| b.v2_entity(Arc::new(e)))
        .build()
}
