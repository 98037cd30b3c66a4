//! Job records: what the job substrate has run or is running.
//!
//! A `Job` describes one test execution. Its `Refs` record what was tested:
//! the base commit of the target branch plus the ordered list of pulls that
//! were merged on top. The refs signature is the canonical identity used to
//! group batch results.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{PrNumber, Sha};

/// The kind of a job. The controller only acts on presubmit and batch jobs;
/// other kinds are carried by the substrate but ignored here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// A test of a single PR head merged onto the branch base.
    Presubmit,
    /// A speculative test of several PR heads merged together.
    Batch,
    /// Runs after a merge. Ignored by the controller.
    Postsubmit,
    /// Runs on a timer. Ignored by the controller.
    Periodic,
}

/// The execution state of a job as reported by the substrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Triggered,
    Pending,
    Success,
    Failure,
    Error,
    Aborted,
}

/// One pull within a job's refs: the PR number and its head SHA at the
/// moment the job was triggered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pull {
    pub number: PrNumber,
    pub author: String,
    pub sha: Sha,
}

/// What a job tested: base branch state plus the ordered pulls merged on top.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Refs {
    pub org: String,
    pub repo: String,
    /// Branch name, e.g. "main".
    pub base_ref: String,
    /// The branch head the job was based on.
    pub base_sha: Sha,
    #[serde(default)]
    pub pulls: Vec<Pull>,
}

impl Refs {
    /// Canonical signature of what was tested: `base_ref:base_sha` followed
    /// by `,number:sha` for each pull in order. Two jobs tested the same
    /// thing iff their signatures are equal.
    pub fn signature(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Refs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.base_ref, self.base_sha)?;
        for pull in &self.pulls {
            write!(f, ",{}:{}", pull.number.0, pull.sha)?;
        }
        Ok(())
    }
}

/// A record of one test execution on the job substrate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Unique id assigned at submission time.
    pub id: String,

    /// The configured job name (e.g., "unit-tests").
    pub name: String,

    #[serde(rename = "type")]
    pub job_type: JobType,

    pub state: JobState,

    pub refs: Refs,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    pub started_at: DateTime<Utc>,
}
