//! Dry-run-until-checkpoint recovery.
//!
//! A resume token is a full remote id or a prefix of one (`BS`, `BS_5`).
//! While armed the load simulates, replaying ids from the identity cache,
//! until a record's cached id starts with the token. That record and
//! every one after it are submitted for real.

use crate::error::{LoadError, LoadResult};
use tracing::{info, warn};

/// What the controller decided for one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeStep {
    /// No resume in progress.
    Inactive,
    /// Still before the checkpoint; keep simulating.
    Simulate,
    /// This record is the checkpoint; submit it and everything after.
    Resumed,
}

#[derive(Debug, Clone, Default)]
pub struct ResumeController {
    token: Option<String>,
}

impl ResumeController {
    /// A dry run never resumes, so `dry_run` drops the token. Blank tokens
    /// are ignored.
    pub fn new(resume_from: Option<String>, dry_run: bool) -> Self {
        let token = if dry_run {
            None
        } else {
            resume_from.filter(|t| !t.trim().is_empty())
        };
        Self { token }
    }

    pub fn is_armed(&self) -> bool {
        self.token.is_some()
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Observes a record about to be simulated.
    ///
    /// Fails when armed and the record has no known id: the cache ends
    /// before the checkpoint, so resuming cannot be done safely.
    pub fn observe(&mut self, entity_type: &str, unique_key: &str, existing_id: Option<&str>) -> LoadResult<ResumeStep> {
        let Some(token) = self.token.as_deref() else {
            return Ok(ResumeStep::Inactive);
        };
        match existing_id {
            None => Err(LoadError::ResumeHorizon {
                token: token.to_string(),
                entity_type: entity_type.to_string(),
                unique_key: unique_key.to_string(),
            }),
            Some(id) if id.starts_with(token) => {
                info!("Found resume target '{token}'. Resuming normal load.");
                self.token = None;
                Ok(ResumeStep::Resumed)
            }
            Some(_) => Ok(ResumeStep::Simulate),
        }
    }

    /// Warns when the run ended without ever reaching the checkpoint and
    /// returns the unreached token.
    pub fn finish(&self) -> Option<&str> {
        if let Some(token) = self.token() {
            warn!(
                "Could not find resume_from target '{token}'! Nothing was actually loaded into the target service."
            );
        }
        self.token()
    }
}
