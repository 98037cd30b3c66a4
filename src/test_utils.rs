//! Shared test helpers: deterministic builders for domain objects and
//! in-memory implementations of the controller's collaborators.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;

use crate::forge::{ForgeClient, ForgeError, SearchPage};
use crate::git::{GitError, GitResult, Workspace, Workspaces};
use crate::substrate::{JobSubstrate, SubstrateError};
use crate::types::{
    CommitStatusState, Job, JobState, JobType, PrNumber, Pull, PullRequest, RepoId, Refs, Sha,
};

/// A deterministic SHA: the fill character repeated 40 times.
pub fn sha(fill: char) -> Sha {
    Sha::parse(fill.to_string().repeat(40)).unwrap()
}

/// A PR in org/repo targeting main.
pub fn pr(number: u64, head: char, status: Option<CommitStatusState>) -> PullRequest {
    PullRequest {
        number: PrNumber(number),
        author: "octocat".to_string(),
        base_ref: "main".to_string(),
        base_ref_prefix: "refs/heads/".to_string(),
        repo: RepoId::new("org", "repo"),
        head_sha: sha(head),
        head_status: status,
    }
}

/// A PR in org/repo targeting the given branch, head passing.
pub fn pr_on_branch(number: u64, head: char, branch: &str) -> PullRequest {
    PullRequest {
        base_ref: branch.to_string(),
        ..pr(number, head, Some(CommitStatusState::Success))
    }
}

/// Refs for org/repo main at the given base, with the given pulls.
pub fn job_refs(base: char, pulls: &[(u64, char)]) -> Refs {
    Refs {
        org: "org".to_string(),
        repo: "repo".to_string(),
        base_ref: "main".to_string(),
        base_sha: sha(base),
        pulls: pulls
            .iter()
            .map(|&(number, head)| Pull {
                number: PrNumber(number),
                author: "octocat".to_string(),
                sha: sha(head),
            })
            .collect(),
    }
}

/// An arbitrary job record.
pub fn job(name: &str, job_type: JobType, state: JobState, refs: Refs) -> Job {
    Job {
        id: format!("test-{}-{:?}", name, state),
        name: name.to_string(),
        job_type,
        state,
        refs,
        labels: Default::default(),
        started_at: Utc::now(),
    }
}

/// A presubmit job record for one PR.
pub fn presubmit_record(name: &str, state: JobState, number: u64, head: char, base: char) -> Job {
    job(
        name,
        JobType::Presubmit,
        state,
        job_refs(base, &[(number, head)]),
    )
}

/// A batch job record over several pulls.
pub fn batch_record(name: &str, state: JobState, base: char, pulls: &[(u64, char)]) -> Job {
    job(name, JobType::Batch, state, job_refs(base, pulls))
}

/// In-memory forge. Queries serve preset pages; refs resolve from a map;
/// merges are recorded, or rejected per configuration.
#[derive(Default)]
pub struct FakeForge {
    /// Pages served per query string; one inner Vec per page.
    pub pages: HashMap<String, Vec<Vec<PullRequest>>>,

    /// Resolved refs keyed by (repo, ref).
    pub refs: HashMap<(RepoId, String), Sha>,

    /// PRs whose merge is rejected as modified-head.
    pub modified_heads: Vec<PrNumber>,

    /// PRs whose merge is rejected as unmergeable.
    pub unmergeable: Vec<PrNumber>,

    /// PRs whose merge fails with a transient API error.
    pub merge_errors: Vec<PrNumber>,

    /// Successful merge requests, in order.
    pub merged: Mutex<Vec<(RepoId, PrNumber, Sha)>>,

    pub resolve_calls: AtomicUsize,
}

impl ForgeClient for FakeForge {
    async fn resolve_ref(&self, repo: &RepoId, r: &str) -> Result<Sha, ForgeError> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        self.refs
            .get(&(repo.clone(), r.to_string()))
            .cloned()
            .ok_or_else(|| ForgeError::Api {
                status_code: Some(404),
                message: format!("no such ref: {r}"),
            })
    }

    async fn search_page(
        &self,
        query: &str,
        cursor: Option<&str>,
    ) -> Result<SearchPage, ForgeError> {
        let pages = self.pages.get(query).cloned().unwrap_or_default();
        let index: usize = cursor.map(|c| c.parse().unwrap()).unwrap_or(0);
        let prs = pages.get(index).cloned().unwrap_or_default();
        let next_cursor = if index + 1 < pages.len() {
            Some((index + 1).to_string())
        } else {
            None
        };
        Ok(SearchPage {
            prs,
            next_cursor,
            cost: 1,
            remaining: 4999,
        })
    }

    async fn merge(
        &self,
        repo: &RepoId,
        number: PrNumber,
        head_sha: &Sha,
    ) -> Result<(), ForgeError> {
        if self.modified_heads.contains(&number) {
            return Err(ForgeError::ModifiedHead { pr: number });
        }
        if self.unmergeable.contains(&number) {
            return Err(ForgeError::Unmergeable { pr: number });
        }
        if self.merge_errors.contains(&number) {
            return Err(ForgeError::Api {
                status_code: Some(502),
                message: "bad gateway".to_string(),
            });
        }
        self.merged
            .lock()
            .unwrap()
            .push((repo.clone(), number, head_sha.clone()));
        Ok(())
    }
}

/// In-memory job substrate: lists preset jobs, records submissions.
#[derive(Default)]
pub struct FakeSubstrate {
    pub jobs: Vec<Job>,
    pub submitted: Mutex<Vec<Job>>,
    pub list_calls: AtomicUsize,
}

impl JobSubstrate for FakeSubstrate {
    async fn list_jobs(&self) -> Result<Vec<Job>, SubstrateError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.jobs.clone())
    }

    async fn submit_job(&self, job: Job) -> Result<Job, SubstrateError> {
        self.submitted.lock().unwrap().push(job.clone());
        Ok(job)
    }
}

/// In-memory workspace provider. Merges succeed unless the head is listed
/// as conflicting (reported as a conflict) or failing (reported as an
/// error). Releases are counted.
#[derive(Default)]
pub struct FakeWorkspaces {
    pub conflicting: HashSet<Sha>,
    pub failing: HashSet<Sha>,
    pub clones: AtomicUsize,
    pub cleans: std::sync::Arc<AtomicUsize>,
}

impl Workspaces for FakeWorkspaces {
    type Workspace = FakeWorkspace;

    async fn clone_repo(&self, _repo: &RepoId) -> GitResult<FakeWorkspace> {
        self.clones.fetch_add(1, Ordering::SeqCst);
        Ok(FakeWorkspace {
            conflicting: self.conflicting.clone(),
            failing: self.failing.clone(),
            merged: Mutex::new(Vec::new()),
            cleans: std::sync::Arc::clone(&self.cleans),
        })
    }
}

pub struct FakeWorkspace {
    conflicting: HashSet<Sha>,
    failing: HashSet<Sha>,
    pub merged: Mutex<Vec<Sha>>,
    cleans: std::sync::Arc<AtomicUsize>,
}

impl Workspace for FakeWorkspace {
    async fn config(&self, _key: &str, _value: &str) -> GitResult<()> {
        Ok(())
    }

    async fn checkout(&self, _sha: &Sha) -> GitResult<()> {
        Ok(())
    }

    async fn merge(&self, sha: &Sha) -> GitResult<bool> {
        if self.failing.contains(sha) {
            return Err(GitError::CommandFailed {
                command: format!("git merge {sha}"),
                stderr: "simulated failure".to_string(),
            });
        }
        if self.conflicting.contains(sha) {
            return Ok(false);
        }
        self.merged.lock().unwrap().push(sha.clone());
        Ok(true)
    }

    async fn clean(self) -> GitResult<()> {
        self.cleans.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
