use crate::value::{is_missing, stringify_value};
use crate::{TypesError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One row of an entity type's standardized input table.
///
/// Attribute names are standard concept names (e.g. `PARTICIPANT|ID`).
/// A record is never mutated in place; [`Record::with_field`] returns a copy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Builds a record from a JSON value, which must be an object.
    pub fn from_json(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(TypesError::NotAnObject(other.to_string())),
        }
    }

    /// Parses a record from a JSON string.
    pub fn from_json_str(s: &str) -> Result<Self> {
        Self::from_json(serde_json::from_str(s)?)
    }

    /// Builds a record from attribute/value pairs.
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    /// Returns a copy of this record with one attribute set.
    #[must_use]
    pub fn with_field(&self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut map = self.0.clone();
        map.insert(name.into(), value.into());
        Self(map)
    }

    /// Raw value of an attribute, if present.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Present and not null/blank.
    pub fn has_value(&self, name: &str) -> bool {
        self.0.get(name).is_some_and(|v| !is_missing(v))
    }

    /// Stable string form of an attribute, `None` if absent or missing.
    pub fn get_str(&self, name: &str) -> Option<String> {
        self.0.get(name).and_then(stringify_value)
    }

    /// Number of attributes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the record has no attributes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over attribute names and values.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}
