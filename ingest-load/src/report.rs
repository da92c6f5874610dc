//! Summary of a load run.

use crate::sent_log::SentMessage;
use ingest_types::{Method, MethodCounts, SubmissionOutcome};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Per-record skips for one entity type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SkipCounts {
    /// Records whose key could not be derived.
    pub missing_key: usize,
    pub duplicate: usize,
}

/// Summary of a finished load.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    /// CREATE/UPDATE tallies per entity type, simulated ones included.
    pub counts: BTreeMap<String, MethodCounts>,
    pub skipped: BTreeMap<String, SkipCounts>,
    pub sent_messages: Vec<SentMessage>,
    pub outcomes: Vec<SubmissionOutcome>,
    /// Set when a resume token was given but never found.
    pub unreached_resume_token: Option<String>,
    pub sent_log_path: Option<PathBuf>,
}

impl LoadReport {
    pub fn count(&self, entity_type: &str, method: Method) -> usize {
        self.counts.get(entity_type).map_or(0, |c| c.get(method))
    }

    /// Tally for one method across every entity type.
    pub fn total(&self, method: Method) -> usize {
        self.counts.values().map(|c| c.get(method)).sum()
    }

    /// Outcomes that reached the target service.
    pub fn submitted(&self) -> impl Iterator<Item = &SubmissionOutcome> {
        self.outcomes.iter().filter(|o| !o.simulated)
    }

    pub fn skips(&self, entity_type: &str) -> SkipCounts {
        self.skipped.get(entity_type).copied().unwrap_or_default()
    }
}
