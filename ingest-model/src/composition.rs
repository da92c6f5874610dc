//! Key composition rules for one entity type.

use serde::{Deserialize, Serialize};

/// Joins resolved component values into a key.
pub const KEY_DELIMITER: &str = "-";

/// One piece of a unique key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyComponent {
    /// A standardized record attribute, e.g. `PARTICIPANT|ID`.
    Field(String),
    /// The unique key of another entity type, resolved against the same record.
    UniqueKey(String),
}

impl KeyComponent {
    pub fn field(name: impl Into<String>) -> Self {
        Self::Field(name.into())
    }

    pub fn unique_key(entity_type: impl Into<String>) -> Self {
        Self::UniqueKey(entity_type.into())
    }

    /// The referenced entity type, if this component is a dependency edge.
    pub fn dependency(&self) -> Option<&str> {
        match self {
            Self::UniqueKey(entity) => Some(entity),
            Self::Field(_) => None,
        }
    }

    /// Human-readable label used in logs and errors.
    pub fn label(&self) -> String {
        match self {
            Self::Field(name) => name.clone(),
            Self::UniqueKey(entity) => format!("{entity} unique key"),
        }
    }
}

/// How one entity type's unique key is built.
///
/// Required components come first, then optional ones, in declaration
/// order. A missing optional value is replaced by
/// [`ingest_types::NOT_REPORTED`] so every key has the same shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyComposition {
    #[serde(default)]
    pub required: Vec<KeyComponent>,
    #[serde(default)]
    pub optional: Vec<KeyComponent>,
    /// Attribute that may already hold a finished key for this type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_field: Option<String>,
}

impl KeyComposition {
    pub fn new(required: Vec<KeyComponent>) -> Self {
        Self {
            required,
            optional: Vec::new(),
            key_field: None,
        }
    }

    #[must_use]
    pub fn with_optional(mut self, optional: Vec<KeyComponent>) -> Self {
        self.optional = optional;
        self
    }

    #[must_use]
    pub fn with_key_field(mut self, field: impl Into<String>) -> Self {
        self.key_field = Some(field.into());
        self
    }

    /// Required then optional components, each paired with its required flag.
    pub fn components(&self) -> impl Iterator<Item = (&KeyComponent, bool)> {
        self.required
            .iter()
            .map(|c| (c, true))
            .chain(self.optional.iter().map(|c| (c, false)))
    }

    /// Entity types this rule depends on.
    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.components().filter_map(|(c, _)| c.dependency())
    }

    pub fn is_empty(&self) -> bool {
        self.required.is_empty() && self.optional.is_empty()
    }
}
