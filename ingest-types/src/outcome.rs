//! What the load stage did with a record.

use crate::TypesError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Whether a submission creates a new remote entity or updates a known one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Create,
    Update,
}

impl Method {
    /// `Update` when an existing remote id is known, `Create` otherwise.
    #[must_use]
    pub const fn for_existing(existing: bool) -> Self {
        if existing { Self::Update } else { Self::Create }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATE" => Ok(Self::Create),
            "UPDATE" => Ok(Self::Update),
            other => Err(TypesError::UnknownMethod(other.to_string())),
        }
    }
}

/// Result of loading one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionOutcome {
    /// Entity type name.
    pub entity_type: String,
    /// The record's unique key.
    pub unique_key: String,
    pub method: Method,
    /// Remote id the service returned (or a placeholder under dry run).
    pub target_id: String,
    /// The body that was sent, or would have been sent.
    pub body: Map<String, Value>,
    /// Whether this outcome was simulated.
    pub simulated: bool,
}

/// CREATE/UPDATE tallies for one entity type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodCounts {
    #[serde(rename = "CREATE")]
    pub create: usize,
    #[serde(rename = "UPDATE")]
    pub update: usize,
}

impl MethodCounts {
    pub fn record(&mut self, method: Method) {
        match method {
            Method::Create => self.create += 1,
            Method::Update => self.update += 1,
        }
    }

    #[must_use]
    pub const fn get(&self, method: Method) -> usize {
        match method {
            Method::Create => self.create,
            Method::Update => self.update,
        }
    }

    #[must_use]
    pub const fn total(&self) -> usize {
        self.create + self.update
    }
}
