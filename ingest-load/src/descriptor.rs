//! Reference adapters driven by declarative entity descriptors.
//!
//! An [`EntitySpec`] names the endpoint, which record attributes fill
//! which body fields, and which body fields hold other entities' ids.
//! The same descriptors serve both protocol versions.

use crate::adapter::{
    AdapterSet, Body, EntityV1, EntityV2, IdLookup, KeyComponents, KeyDerivation, LoaderVersion, SubmitV1,
    drop_missing, reported_id, value_is_missing,
};
use crate::client::DataServiceClient;
use crate::error::{LoadError, LoadResult};
use crate::settings::LoadSettings;
use async_trait::async_trait;
use ingest_model::{KeyComponent, KeyComposition, KeyGraph, KeyResolution, UniqueKeyResolver};
use ingest_types::Record;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

fn default_id_field() -> String {
    "kf_id".to_string()
}

/// Declarative description of one target entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySpec {
    pub name: String,
    /// Collection path on the service, e.g. `participants`.
    pub endpoint: String,
    /// Record attribute that may already carry the remote id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id_field: Option<String>,
    /// Body field holding the remote id.
    #[serde(default = "default_id_field")]
    pub id_field: String,
    /// Body field -> record attribute.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    /// Body field -> entity type whose id it holds.
    #[serde(default)]
    pub links: BTreeMap<String, String>,
    /// Version 2 key: body fields drawn from `properties` or `links`.
    #[serde(default)]
    pub key_fields: Vec<String>,
    /// Key fields that must have a value.
    #[serde(default)]
    pub required_fields: Vec<String>,
}

impl EntitySpec {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            target_id_field: None,
            id_field: default_id_field(),
            properties: BTreeMap::new(),
            links: BTreeMap::new(),
            key_fields: Vec::new(),
            required_fields: Vec::new(),
        }
    }

    #[must_use]
    pub fn target_id_field(mut self, attribute: impl Into<String>) -> Self {
        self.target_id_field = Some(attribute.into());
        self
    }

    #[must_use]
    pub fn property(mut self, field: impl Into<String>, attribute: impl Into<String>) -> Self {
        self.properties.insert(field.into(), attribute.into());
        self
    }

    #[must_use]
    pub fn link(mut self, field: impl Into<String>, entity_type: impl Into<String>) -> Self {
        self.links.insert(field.into(), entity_type.into());
        self
    }

    /// Adds a version 2 key field, optionally required.
    #[must_use]
    pub fn key_field(mut self, field: impl Into<String>, required: bool) -> Self {
        let field = field.into();
        if required {
            self.required_fields.push(field.clone());
        }
        self.key_fields.push(field);
        self
    }

    /// Checks the descriptor is usable under `version`.
    pub fn validate(&self, version: LoaderVersion) -> LoadResult<()> {
        let name = &self.name;
        if self.endpoint.trim().is_empty() {
            return Err(LoadError::config(format!("entity '{name}' has no endpoint")));
        }
        if version == LoaderVersion::V2 {
            if self.key_fields.is_empty() {
                return Err(LoadError::config(format!(
                    "version 2 entity '{name}' declares no key fields"
                )));
            }
            for field in &self.key_fields {
                if !self.properties.contains_key(field) && !self.links.contains_key(field) && *field != self.id_field {
                    return Err(LoadError::config(format!(
                        "key field '{field}' of '{name}' is neither a property nor a link"
                    )));
                }
            }
        }
        if let Some(field) = self.required_fields.iter().find(|f| !self.key_fields.contains(*f)) {
            return Err(LoadError::config(format!(
                "required field '{field}' of '{name}' is not a key field"
            )));
        }
        Ok(())
    }

    fn own_id(&self, record: &Record, lookup: &dyn IdLookup) -> LoadResult<Value> {
        Ok(lookup.target_id(&self.name, record)?.map_or(Value::Null, Value::String))
    }

    /// Properties and resolved links, nulls included.
    fn secondary_fields(&self, record: &Record, lookup: &dyn IdLookup) -> LoadResult<Body> {
        let mut body = Body::new();
        for (field, attribute) in &self.properties {
            body.insert(field.clone(), record.get(attribute).cloned().unwrap_or(Value::Null));
        }
        for (field, entity) in &self.links {
            let id = lookup.target_id(entity, record)?;
            body.insert(field.clone(), id.map_or(Value::Null, Value::String));
        }
        Ok(body)
    }
}

// ── Version 1 ────────────────────────────────────────────────────

/// Version 1 descriptor adapter: keys come from the [`UniqueKeyResolver`].
pub struct DescriptorEntityV1 {
    spec: EntitySpec,
    resolver: UniqueKeyResolver,
}

impl DescriptorEntityV1 {
    pub fn new(spec: EntitySpec, resolver: UniqueKeyResolver) -> Self {
        Self { spec, resolver }
    }
}

impl EntityV1 for DescriptorEntityV1 {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn target_id_field(&self) -> Option<&str> {
        self.spec.target_id_field.as_deref()
    }

    fn build_key(&self, record: &Record) -> LoadResult<KeyDerivation> {
        Ok(match self.resolver.resolve(&self.spec.name, record)? {
            KeyResolution::Derived(key) => KeyDerivation::Derived(KeyComponents::single("unique_key", key)),
            KeyResolution::MissingRequired { entity_type, component } => {
                KeyDerivation::MissingRequired(format!("{component} (required by the {entity_type} key)"))
            }
        })
    }

    fn build_entity(&self, record: &Record, unique_key: &str, lookup: &dyn IdLookup) -> LoadResult<Body> {
        let mut body = self.spec.secondary_fields(record, lookup)?;
        body.insert(self.spec.id_field.clone(), self.spec.own_id(record, lookup)?);
        body.insert("external_id".to_string(), Value::String(unique_key.to_string()));
        Ok(drop_missing(body))
    }
}

/// The shared version 1 submit function, routing by entity type.
pub struct DataServiceSubmitter {
    client: DataServiceClient,
    routes: HashMap<String, (String, String)>,
}

impl DataServiceSubmitter {
    pub fn new<'a>(client: DataServiceClient, specs: impl IntoIterator<Item = &'a EntitySpec>) -> Self {
        let routes = specs
            .into_iter()
            .map(|s| (s.name.clone(), (s.endpoint.clone(), s.id_field.clone())))
            .collect();
        Self { client, routes }
    }
}

#[async_trait]
impl SubmitV1 for DataServiceSubmitter {
    async fn submit(&self, host: &str, entity_type: &str, body: &Body) -> LoadResult<String> {
        let (endpoint, id_field) = self
            .routes
            .get(entity_type)
            .ok_or_else(|| LoadError::config(format!("no endpoint for entity type '{entity_type}'")))?;
        self.client.submit(host, endpoint, id_field, body).await
    }
}

// ── Version 2 ────────────────────────────────────────────────────

/// Version 2 descriptor adapter: keys come from `key_fields`, and the
/// service is queried for ids the cache does not know.
pub struct DescriptorEntityV2 {
    spec: EntitySpec,
    client: DataServiceClient,
}

impl DescriptorEntityV2 {
    pub fn new(spec: EntitySpec, client: DataServiceClient) -> Self {
        Self { spec, client }
    }

    fn key_value(&self, field: &str, record: &Record, lookup: &dyn IdLookup) -> LoadResult<Value> {
        if let Some(entity) = self.spec.links.get(field) {
            return Ok(lookup.target_id(entity, record)?.map_or(Value::Null, Value::String));
        }
        if let Some(attribute) = self.spec.properties.get(field) {
            return Ok(record.get(attribute).cloned().unwrap_or(Value::Null));
        }
        // the id field itself; validated to be the only other option
        Ok(self
            .spec
            .target_id_field
            .as_deref()
            .and_then(|f| reported_id(record.get(f)))
            .map_or(Value::Null, Value::String))
    }
}

#[async_trait]
impl EntityV2 for DescriptorEntityV2 {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn target_id_field(&self) -> Option<&str> {
        self.spec.target_id_field.as_deref()
    }

    fn get_key_components(&self, record: &Record, lookup: &dyn IdLookup) -> LoadResult<KeyDerivation> {
        let mut key = KeyComponents::new();
        for field in &self.spec.key_fields {
            let value = self.key_value(field, record, lookup)?;
            if self.spec.required_fields.contains(field) && value_is_missing(Some(&value)) {
                return Ok(KeyDerivation::MissingRequired(field.clone()));
            }
            key.insert(field.clone(), value);
        }
        Ok(KeyDerivation::Derived(key))
    }

    fn build_entity(&self, record: &Record, lookup: &dyn IdLookup) -> LoadResult<Body> {
        let key = match self.get_key_components(record, lookup)? {
            KeyDerivation::Derived(key) => key,
            KeyDerivation::MissingRequired(field) => {
                return Err(LoadError::Build {
                    entity_type: self.spec.name.clone(),
                    reason: format!("missing required key field {field}"),
                });
            }
        };
        let mut body = self.spec.secondary_fields(record, lookup)?;
        for (field, value) in key.iter() {
            body.insert(field.clone(), value.clone());
        }
        body.insert(self.spec.id_field.clone(), self.spec.own_id(record, lookup)?);
        Ok(drop_missing(body))
    }

    async fn submit(&self, host: &str, body: &Body) -> LoadResult<String> {
        self.client
            .submit(host, &self.spec.endpoint, &self.spec.id_field, body)
            .await
    }

    async fn query_target_ids(&self, host: &str, key: &KeyComponents) -> LoadResult<Vec<String>> {
        if let Some(id) = reported_id(key.get(&self.spec.id_field)) {
            return Ok(vec![id]);
        }
        self.client
            .query_ids(host, &self.spec.endpoint, &self.spec.id_field, &key.filters())
            .await
    }
}

// ── Assembly ─────────────────────────────────────────────────────

/// Key dependencies of version 2 descriptors: a key field that is also a
/// link depends on the linked entity type's id.
fn key_link_graph(entities: &[EntitySpec]) -> LoadResult<KeyGraph> {
    let rules = entities.iter().map(|spec| {
        let (required, optional): (Vec<&String>, Vec<&String>) = spec
            .key_fields
            .iter()
            .partition(|field| spec.required_fields.contains(*field));
        let component = |field: &String| match spec.links.get(field) {
            Some(linked) => KeyComponent::unique_key(linked.clone()),
            None => KeyComponent::field(field.clone()),
        };
        let composition = KeyComposition::new(required.into_iter().map(component).collect())
            .with_optional(optional.into_iter().map(component).collect());
        (spec.name.clone(), composition)
    });
    Ok(KeyGraph::new(rules)?)
}

/// Builds the descriptor adapter set described by `settings`.
pub fn build_adapter_set(settings: &LoadSettings, client: DataServiceClient) -> LoadResult<AdapterSet> {
    settings.validate()?;
    let version = settings.loader_version;

    let graph = Arc::new(match version {
        LoaderVersion::V1 => KeyGraph::new(settings.key_composition.clone())?,
        LoaderVersion::V2 => key_link_graph(&settings.entities)?,
    });

    let mut builder = AdapterSet::builder(version.into());
    match version {
        LoaderVersion::V1 => {
            let resolver = UniqueKeyResolver::new(Arc::clone(&graph));
            for spec in &settings.entities {
                builder = builder.v1_entity(Arc::new(DescriptorEntityV1::new(spec.clone(), resolver.clone())));
            }
            builder = builder.submitter(Arc::new(DataServiceSubmitter::new(client, &settings.entities)));
        }
        LoaderVersion::V2 => {
            for spec in &settings.entities {
                builder = builder.v2_entity(Arc::new(DescriptorEntityV2::new(spec.clone(), client.clone())));
            }
        }
    }

    let set = builder.build()?;
    set.validate_plan(settings.entities_to_load.as_deref(), Some(&graph))?;
    Ok(set)
}
