//! Load settings read from a JSON file.

use crate::adapter::LoaderVersion;
use crate::descriptor::EntitySpec;
use crate::error::{LoadError, LoadResult};
use ingest_model::KeyComposition;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

fn default_project_id_field() -> String {
    "PROJECT|ID".to_string()
}

/// Everything a load needs to know about its target.
///
/// `entities` is the declared processing order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadSettings {
    pub loader_version: LoaderVersion,
    pub target_url: String,
    /// Version 2 only: where remote id lookups go instead of the target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_url: Option<String>,
    pub project_id: String,
    #[serde(default = "default_project_id_field")]
    pub project_id_field: String,
    pub entities: Vec<EntitySpec>,
    #[serde(default)]
    pub key_composition: BTreeMap<String, KeyComposition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entities_to_load: Option<Vec<String>>,
}

impl LoadSettings {
    pub fn from_file(path: impl AsRef<Path>) -> LoadResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| LoadError::config(format!("cannot read settings {}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> LoadResult<Self> {
        let settings: Self = serde_json::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Checks the settings without touching the network.
    pub fn validate(&self) -> LoadResult<()> {
        if self.target_url.trim().is_empty() {
            return Err(LoadError::config("target_url is empty"));
        }
        if self.project_id.trim().is_empty() {
            return Err(LoadError::config("project_id is empty"));
        }
        if self.query_url.is_some() && self.loader_version == LoaderVersion::V1 {
            return Err(LoadError::config("query_url is only used by loader version 2"));
        }
        if self.entities.is_empty() {
            return Err(LoadError::config("no entities declared"));
        }

        let mut names = HashSet::new();
        for spec in &self.entities {
            if !names.insert(spec.name.as_str()) {
                return Err(LoadError::config(format!("entity '{}' is declared twice", spec.name)));
            }
            spec.validate(self.loader_version)?;
            for linked in spec.links.values() {
                if !self.entities.iter().any(|e| e.name == *linked) {
                    return Err(LoadError::config(format!(
                        "entity '{}' links to undeclared entity '{linked}'",
                        spec.name
                    )));
                }
            }
        }

        if self.loader_version == LoaderVersion::V1 {
            if let Some(spec) = self.entities.iter().find(|s| !self.key_composition.contains_key(&s.name)) {
                return Err(LoadError::config(format!(
                    "loader version 1 entity '{}' has no key composition",
                    spec.name
                )));
            }
        }

        if let Some(wanted) = &self.entities_to_load {
            if let Some(unknown) = wanted.iter().find(|w| !names.contains(w.as_str())) {
                return Err(LoadError::config(format!(
                    "entities_to_load names undeclared entity '{unknown}'"
                )));
            }
        }
        Ok(())
    }
}
