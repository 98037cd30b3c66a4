//! Controller configuration.
//!
//! `TideConfig` holds the pieces the decision engine needs: the forge search
//! queries that define the candidate pool, the presubmit descriptors per
//! repository, and the dry-run flag. It is loaded once at startup from a JSON
//! file; runtime knobs (listen address, sync period) come from environment
//! variables in `main`.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::RepoId;

/// Errors from loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A presubmit job descriptor for one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presubmit {
    /// The job name, as it appears in job records.
    pub name: String,

    /// Whether the job runs on every candidate without being asked.
    #[serde(default)]
    pub always_run: bool,

    /// Whether the job's result is hidden from status reporting. Skip-report
    /// jobs do not gate merging.
    #[serde(default)]
    pub skip_report: bool,

    /// Branches the job runs against. Empty means all branches.
    #[serde(default)]
    pub branches: Vec<String>,

    /// Branches the job never runs against. Takes precedence over `branches`.
    #[serde(default)]
    pub skip_branches: Vec<String>,

    /// Labels attached to jobs constructed from this descriptor.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl Presubmit {
    /// Returns true if this presubmit applies to the given branch.
    pub fn runs_against_branch(&self, branch: &str) -> bool {
        if self.skip_branches.iter().any(|b| b == branch) {
            return false;
        }
        self.branches.is_empty() || self.branches.iter().any(|b| b == branch)
    }
}

/// Top-level controller configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TideConfig {
    /// Forge search strings, each defining part of the candidate pool.
    #[serde(default)]
    pub queries: Vec<String>,

    /// Presubmit descriptors keyed by "org/repo".
    #[serde(default)]
    pub presubmits: BTreeMap<String, Vec<Presubmit>>,

    /// When set, decisions are computed and published but no forge or
    /// substrate mutation is performed.
    #[serde(default)]
    pub dry_run: bool,
}

impl TideConfig {
    /// Loads configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Returns all presubmit descriptors configured for a repository.
    pub fn presubmits_for(&self, repo: &RepoId) -> &[Presubmit] {
        self.presubmits
            .get(&repo.to_string())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Returns the presubmits that gate merging into `branch` of `repo`:
    /// always-run, not skip-report, and applicable to the branch.
    pub fn gating_presubmits<'a>(
        &'a self,
        repo: &RepoId,
        branch: &'a str,
    ) -> impl Iterator<Item = &'a Presubmit> {
        self.presubmits_for(repo)
            .iter()
            .filter(move |ps| ps.always_run && !ps.skip_report && ps.runs_against_branch(branch))
    }
}
