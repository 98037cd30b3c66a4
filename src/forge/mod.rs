//! Code-forge client capability.
//!
//! The controller only needs three operations from the forge: resolving a
//! branch ref to a commit, paging through a structured PR search, and
//! requesting a merge at an expected head. `ForgeClient` captures exactly
//! that surface so the decision engine can be exercised with in-memory fakes.
//!
//! Error taxonomy: merge requests can fail in two ways the controller
//! deliberately tolerates (the PR head moved, or the forge refuses despite a
//! green status); everything else is a transient upstream failure that aborts
//! the iteration.

pub mod github;

use std::future::Future;

use thiserror::Error;

use crate::types::{PrNumber, PullRequest, RepoId, Sha};

/// Errors from forge operations.
#[derive(Debug, Error)]
pub enum ForgeError {
    /// Upstream failure (network, API, malformed response). Aborts the
    /// iteration; the next sync retries from scratch.
    #[error("forge request failed: {message}")]
    Api {
        status_code: Option<u16>,
        message: String,
    },

    /// The PR head changed between observation and the merge request.
    #[error("merge of {pr} rejected: head was modified")]
    ModifiedHead { pr: PrNumber },

    /// The forge refused the merge even though status was green.
    #[error("merge of {pr} rejected: not mergeable")]
    Unmergeable { pr: PrNumber },
}

impl ForgeError {
    /// Returns true for the two merge rejections the executor swallows with
    /// a log entry instead of aborting the iteration.
    pub fn is_merge_rejection(&self) -> bool {
        matches!(
            self,
            ForgeError::ModifiedHead { .. } | ForgeError::Unmergeable { .. }
        )
    }
}

/// One page of a PR search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchPage {
    /// PRs on this page, at most 100.
    pub prs: Vec<PullRequest>,

    /// Cursor for the next page; `None` when this page is the last.
    pub next_cursor: Option<String>,

    /// Rate-limit points this page cost.
    pub cost: u32,

    /// Rate-limit points remaining after this page.
    pub remaining: u32,
}

/// The forge operations the controller depends on.
///
/// Implemented for `&T` as well, so callers can keep hold of a concrete
/// client while lending it to the controller.
pub trait ForgeClient {
    /// Resolves a ref (e.g. "heads/main", with no leading "refs/") to the
    /// commit it currently points at.
    fn resolve_ref(
        &self,
        repo: &RepoId,
        r: &str,
    ) -> impl Future<Output = Result<Sha, ForgeError>> + Send;

    /// Executes one page of a structured PR search. Pass the cursor from the
    /// previous page to continue.
    fn search_page(
        &self,
        query: &str,
        cursor: Option<&str>,
    ) -> impl Future<Output = Result<SearchPage, ForgeError>> + Send;

    /// Requests a merge of `number` at the expected head `head_sha`.
    fn merge(
        &self,
        repo: &RepoId,
        number: PrNumber,
        head_sha: &Sha,
    ) -> impl Future<Output = Result<(), ForgeError>> + Send;
}

impl<T: ForgeClient + Sync> ForgeClient for &T {
    async fn resolve_ref(&self, repo: &RepoId, r: &str) -> Result<Sha, ForgeError> {
        (**self).resolve_ref(repo, r).await
    }

    async fn search_page(
        &self,
        query: &str,
        cursor: Option<&str>,
    ) -> Result<SearchPage, ForgeError> {
        (**self).search_page(query, cursor).await
    }

    async fn merge(
        &self,
        repo: &RepoId,
        number: PrNumber,
        head_sha: &Sha,
    ) -> Result<(), ForgeError> {
        (**self).merge(repo, number, head_sha).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_rejections_are_classified() {
        assert!(ForgeError::ModifiedHead { pr: PrNumber(5) }.is_merge_rejection());
        assert!(ForgeError::Unmergeable { pr: PrNumber(5) }.is_merge_rejection());
        assert!(
            !ForgeError::Api {
                status_code: Some(502),
                message: "bad gateway".to_string(),
            }
            .is_merge_rejection()
        );
    }

    #[test]
    fn api_error_display_carries_the_message() {
        let err = ForgeError::Api {
            status_code: Some(502),
            message: "bad gateway".to_string(),
        };
        assert_eq!(err.to_string(), "forge request failed: bad gateway");
    }
}
