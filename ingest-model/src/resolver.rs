use crate::{KEY_DELIMITER, KeyComponent, KeyGraph, ModelError, ModelResult};
use ingest_types::{NOT_REPORTED, Record};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Outcome of deriving one record's unique key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyResolution {
    Derived(String),
    /// A required component had no value. `entity_type` is the type whose
    /// rule declared it, which may be a dependency of the requested type.
    MissingRequired {
        entity_type: String,
        component: String,
    },
}

impl KeyResolution {
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Derived(key) => Some(key),
            Self::MissingRequired { .. } => None,
        }
    }

    pub fn into_key(self) -> Option<String> {
        match self {
            Self::Derived(key) => Some(key),
            Self::MissingRequired { .. } => None,
        }
    }
}

/// Derives unique keys from records using a validated [`KeyGraph`].
///
/// Dependency edges are evaluated post-order against the same record and
/// memoized for the duration of one [`resolve`](Self::resolve) call, so an
/// entity type referenced several times is only expanded once.
#[derive(Debug, Clone)]
pub struct UniqueKeyResolver {
    graph: Arc<KeyGraph>,
}

impl UniqueKeyResolver {
    pub fn new(graph: Arc<KeyGraph>) -> Self {
        Self { graph }
    }

    pub fn graph(&self) -> &KeyGraph {
        &self.graph
    }

    /// Resolves the unique key of `entity_type` for `record`.
    ///
    /// Fails only when `entity_type` has no rule at all; a record lacking
    /// data is reported through [`KeyResolution::MissingRequired`].
    pub fn resolve(&self, entity_type: &str, record: &Record) -> ModelResult<KeyResolution> {
        let mut memo = HashMap::new();
        self.resolve_memo(entity_type, record, &mut memo)
    }

    fn resolve_memo<'a>(
        &'a self,
        entity_type: &'a str,
        record: &Record,
        memo: &mut HashMap<&'a str, KeyResolution>,
    ) -> ModelResult<KeyResolution> {
        if let Some(done) = memo.get(entity_type) {
            return Ok(done.clone());
        }

        let rule = self
            .graph
            .rule(entity_type)
            .ok_or_else(|| ModelError::UnknownEntity(entity_type.to_string()))?;

        if let Some(precomputed) = rule.key_field.as_deref().and_then(|f| record.get_str(f)) {
            let resolution = KeyResolution::Derived(precomputed);
            memo.insert(entity_type, resolution.clone());
            return Ok(resolution);
        }

        let mut parts = Vec::with_capacity(rule.required.len() + rule.optional.len());
        let mut missing = None;
        for (component, required) in rule.components() {
            let value = match component {
                KeyComponent::Field(name) => record.get_str(name),
                KeyComponent::UniqueKey(dependency) => {
                    match self.resolve_memo(dependency, record, memo)? {
                        KeyResolution::Derived(key) => Some(key),
                        // required anywhere in the expansion means required here
                        miss @ KeyResolution::MissingRequired { .. } => {
                            missing = Some(miss);
                            break;
                        }
                    }
                }
            };

            match value {
                Some(v) => parts.push(v),
                None if required => {
                    missing = Some(KeyResolution::MissingRequired {
                        entity_type: entity_type.to_string(),
                        component: component.label(),
                    });
                    break;
                }
                None => parts.push(NOT_REPORTED.to_string()),
            }
        }

        let resolution = match missing {
            Some(miss) => {
                debug!("Cannot derive {entity_type} key: {miss:?}");
                miss
            }
            None => KeyResolution::Derived(parts.join(KEY_DELIMITER)),
        };
        memo.insert(entity_type, resolution.clone());
        Ok(resolution)
    }
}
