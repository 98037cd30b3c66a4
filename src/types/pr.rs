//! Pull request snapshots.
//!
//! A `PullRequest` is an immutable-per-iteration snapshot of a merge
//! candidate as observed from the code forge. The controller never mutates
//! these; each sync discards the previous iteration's snapshots and observes
//! fresh ones.

use serde::{Deserialize, Serialize};

use super::ids::{PrNumber, RepoId, Sha};

/// The rolled-up commit status of a PR head, as reported by the forge.
///
/// This mirrors the forge's combined-status field for a commit. Only
/// `Success` makes a PR eligible for serial merge, serial trigger, or batch
/// inclusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommitStatusState {
    Expected,
    Error,
    Failure,
    Pending,
    Success,
}

/// A candidate pull request, snapshotted at the start of a sync iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    /// The PR number, unique within the repository.
    pub number: PrNumber,

    /// Login of the PR author.
    pub author: String,

    /// The base branch the PR targets (e.g., "main").
    pub base_ref: String,

    /// The ref prefix of the base branch (e.g., "refs/heads/").
    pub base_ref_prefix: String,

    /// The repository the PR belongs to.
    pub repo: RepoId,

    /// The head commit of the PR's source branch at observation time.
    pub head_sha: Sha,

    /// Rolled-up status of the head commit. `None` when the forge has not
    /// reported any combined status for the commit.
    pub head_status: Option<CommitStatusState>,
}

impl PullRequest {
    /// Returns true if the head commit's rolled-up status is `SUCCESS`.
    ///
    /// A missing combined status counts as not passing.
    pub fn head_passing(&self) -> bool {
        self.head_status == Some(CommitStatusState::Success)
    }

    /// Returns the fully-qualified ref of the base branch
    /// (e.g., "refs/heads/main").
    pub fn base_branch_ref(&self) -> String {
        format!("{}{}", self.base_ref_prefix, self.base_ref)
    }
}
