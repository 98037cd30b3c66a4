//! Job substrate capability.
//!
//! The substrate is the external system that actually runs test jobs. The
//! controller needs only two operations from it: enumerate the live job
//! records, and submit a new one. This module also owns the job-spec
//! constructors: a single-pull presubmit shape for serial triggers and a
//! multi-pull batch shape for speculative batches.

pub mod http;

use std::future::Future;

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use crate::config::Presubmit;
use crate::types::{Job, JobState, JobType, Refs};

/// Errors from job substrate operations. All are transient: the iteration
/// aborts and the next sync re-derives truth from the substrate's state.
#[derive(Debug, Error)]
pub enum SubstrateError {
    #[error("job substrate request failed: {message}")]
    Api { message: String },
}

/// The substrate operations the controller depends on.
///
/// Implemented for `&T` as well, so callers can keep hold of a concrete
/// client while lending it to the controller.
pub trait JobSubstrate {
    /// Lists all live job records.
    fn list_jobs(&self) -> impl Future<Output = Result<Vec<Job>, SubstrateError>> + Send;

    /// Submits a job for execution. Duplicate submissions under retry are
    /// acceptable; the next sync observes whatever actually started.
    fn submit_job(&self, job: Job) -> impl Future<Output = Result<Job, SubstrateError>> + Send;
}

impl<T: JobSubstrate + Sync> JobSubstrate for &T {
    async fn list_jobs(&self) -> Result<Vec<Job>, SubstrateError> {
        (**self).list_jobs().await
    }

    async fn submit_job(&self, job: Job) -> Result<Job, SubstrateError> {
        (**self).submit_job(job).await
    }
}

/// Constructs a presubmit job for a single PR from its descriptor.
///
/// The refs must carry exactly one pull; batch-shaped refs belong in
/// [`batch_job`].
pub fn presubmit_job(ps: &Presubmit, refs: Refs) -> Job {
    new_job(ps, JobType::Presubmit, refs)
}

/// Constructs a batch job over several PRs from its descriptor.
pub fn batch_job(ps: &Presubmit, refs: Refs) -> Job {
    new_job(ps, JobType::Batch, refs)
}

fn new_job(ps: &Presubmit, job_type: JobType, refs: Refs) -> Job {
    Job {
        id: Uuid::new_v4().to_string(),
        name: ps.name.clone(),
        job_type,
        state: JobState::Triggered,
        refs,
        labels: ps.labels.clone(),
        started_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PrNumber, Pull, Sha};
    use std::collections::BTreeMap;

    fn descriptor() -> Presubmit {
        Presubmit {
            name: "unit".to_string(),
            always_run: true,
            skip_report: false,
            branches: Vec::new(),
            skip_branches: Vec::new(),
            labels: BTreeMap::from([("team".to_string(), "infra".to_string())]),
        }
    }

    fn refs(pull_count: u64) -> Refs {
        Refs {
            org: "org".to_string(),
            repo: "repo".to_string(),
            base_ref: "main".to_string(),
            base_sha: Sha::parse("a".repeat(40)).unwrap(),
            pulls: (1..=pull_count)
                .map(|n| Pull {
                    number: PrNumber(n),
                    author: "octocat".to_string(),
                    sha: Sha::parse("b".repeat(40)).unwrap(),
                })
                .collect(),
        }
    }

    #[test]
    fn presubmit_job_shape() {
        let job = presubmit_job(&descriptor(), refs(1));
        assert_eq!(job.job_type, JobType::Presubmit);
        assert_eq!(job.state, JobState::Triggered);
        assert_eq!(job.name, "unit");
        assert_eq!(job.refs.pulls.len(), 1);
        assert_eq!(job.labels.get("team").map(String::as_str), Some("infra"));
    }

    #[test]
    fn batch_job_shape() {
        let job = batch_job(&descriptor(), refs(3));
        assert_eq!(job.job_type, JobType::Batch);
        assert_eq!(job.state, JobState::Triggered);
        assert_eq!(job.refs.pulls.len(), 3);
    }

    #[test]
    fn each_job_gets_a_fresh_id() {
        let a = presubmit_job(&descriptor(), refs(1));
        let b = presubmit_job(&descriptor(), refs(1));
        assert_ne!(a.id, b.id);
    }
}
