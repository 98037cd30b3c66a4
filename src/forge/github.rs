//! GitHub-backed forge client.
//!
//! Implements `ForgeClient` with octocrab: the PR search goes through the
//! GraphQL API (one page of up to 100 results per call, with the rate-limit
//! cost reported alongside), ref resolution and merging go through REST.

use serde::Deserialize;
use serde_json::json;

use crate::types::{CommitStatusState, PrNumber, PullRequest, RepoId, Sha};

use super::{ForgeError, ForgeClient, SearchPage};

/// The GraphQL document for one search page. Mirrors the shape of
/// `RawPullRequest` below.
const SEARCH_DOCUMENT: &str = r#"
query($query: String!, $searchCursor: String) {
  rateLimit { cost remaining }
  search(type: ISSUE, first: 100, after: $searchCursor, query: $query) {
    pageInfo { hasNextPage endCursor }
    nodes {
      ... on PullRequest {
        number
        author { login }
        baseRef { name prefix }
        repository { name owner { login } }
        headRef { target { oid } }
        commits(last: 1) { nodes { commit { status { state } } } }
      }
    }
  }
}
"#;

/// A GitHub API client implementing the forge capability.
#[derive(Clone)]
pub struct GithubForge {
    client: octocrab::Octocrab,
}

impl GithubForge {
    pub fn new(client: octocrab::Octocrab) -> Self {
        Self { client }
    }

    /// Creates a client authenticated with a personal access token.
    pub fn from_token(token: impl Into<String>) -> Result<Self, ForgeError> {
        let client = octocrab::Octocrab::builder()
            .personal_token(token.into())
            .build()
            .map_err(api_error)?;
        Ok(Self::new(client))
    }
}

impl ForgeClient for GithubForge {
    async fn resolve_ref(&self, repo: &RepoId, r: &str) -> Result<Sha, ForgeError> {
        let route = format!("/repos/{}/{}/git/ref/{}", repo.owner, repo.repo, r);
        let git_ref: GitRef = self.client.get(route, None::<&()>).await.map_err(api_error)?;
        Sha::parse(git_ref.object.sha).map_err(|err| ForgeError::Api {
            status_code: None,
            message: format!("ref {} of {} resolved to {}", r, repo, err),
        })
    }

    async fn search_page(
        &self,
        query: &str,
        cursor: Option<&str>,
    ) -> Result<SearchPage, ForgeError> {
        let payload = json!({
            "query": SEARCH_DOCUMENT,
            "variables": { "query": query, "searchCursor": cursor },
        });
        let response: serde_json::Value =
            self.client.graphql(&payload).await.map_err(api_error)?;

        if let Some(errors) = response.get("errors")
            && !errors.as_array().map(Vec::is_empty).unwrap_or(true)
        {
            return Err(ForgeError::Api {
                status_code: None,
                message: format!("GraphQL search failed: {errors}"),
            });
        }

        let data: SearchData = serde_json::from_value(
            response
                .get("data")
                .cloned()
                .unwrap_or(serde_json::Value::Null),
        )
        .map_err(|err| ForgeError::Api {
            status_code: None,
            message: format!("malformed search response: {err}"),
        })?;

        let mut prs = Vec::with_capacity(data.search.nodes.len());
        for node in data.search.nodes {
            // Non-PR search results deserialize as empty objects; skip them.
            if let Some(pr) = node.into_pull_request()? {
                prs.push(pr);
            }
        }

        Ok(SearchPage {
            prs,
            next_cursor: if data.search.page_info.has_next_page {
                data.search.page_info.end_cursor
            } else {
                None
            },
            cost: data.rate_limit.cost,
            remaining: data.rate_limit.remaining,
        })
    }

    async fn merge(
        &self,
        repo: &RepoId,
        number: PrNumber,
        head_sha: &Sha,
    ) -> Result<(), ForgeError> {
        let route = format!(
            "/repos/{}/{}/pulls/{}/merge",
            repo.owner, repo.repo, number.0
        );
        let body = json!({ "sha": head_sha.as_str() });
        match self
            .client
            .put::<serde_json::Value, _, _>(route, Some(&body))
            .await
        {
            Ok(_) => Ok(()),
            // 405: the forge refuses the merge; 409: the head moved since we
            // looked. Both are surfaced as distinct rejections so the
            // executor can log and continue.
            Err(err) => match status_of(&err) {
                Some(405) => Err(ForgeError::Unmergeable { pr: number }),
                Some(409) => Err(ForgeError::ModifiedHead { pr: number }),
                _ => Err(api_error(err)),
            },
        }
    }
}

fn status_of(err: &octocrab::Error) -> Option<u16> {
    match err {
        octocrab::Error::GitHub { source, .. } => Some(source.status_code.as_u16()),
        _ => None,
    }
}

fn api_error(err: octocrab::Error) -> ForgeError {
    match &err {
        octocrab::Error::GitHub { source, .. } => ForgeError::Api {
            status_code: Some(source.status_code.as_u16()),
            message: source.message.clone(),
        },
        _ => ForgeError::Api {
            status_code: None,
            message: err.to_string(),
        },
    }
}

#[derive(Debug, Deserialize)]
struct GitRef {
    object: GitRefObject,
}

#[derive(Debug, Deserialize)]
struct GitRefObject {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct SearchData {
    #[serde(rename = "rateLimit")]
    rate_limit: RateLimit,
    search: SearchConnection,
}

#[derive(Debug, Deserialize)]
struct RateLimit {
    cost: u32,
    remaining: u32,
}

#[derive(Debug, Deserialize)]
struct SearchConnection {
    #[serde(rename = "pageInfo")]
    page_info: PageInfo,
    nodes: Vec<RawPullRequest>,
}

#[derive(Debug, Deserialize)]
struct PageInfo {
    #[serde(rename = "hasNextPage")]
    has_next_page: bool,
    #[serde(rename = "endCursor")]
    end_cursor: Option<String>,
}

/// A search node as returned by GraphQL. All fields optional: nodes that are
/// not pull requests come back as empty objects, and deleted authors or
/// missing statuses come back as nulls.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawPullRequest {
    number: Option<u64>,
    author: Option<RawActor>,
    #[serde(rename = "baseRef")]
    base_ref: Option<RawBaseRef>,
    repository: Option<RawRepository>,
    #[serde(rename = "headRef")]
    head_ref: Option<RawHeadRef>,
    commits: Option<RawCommits>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawActor {
    login: String,
}

#[derive(Debug, Deserialize)]
struct RawBaseRef {
    name: String,
    prefix: String,
}

#[derive(Debug, Deserialize)]
struct RawRepository {
    name: String,
    owner: RawActor,
}

#[derive(Debug, Deserialize)]
struct RawHeadRef {
    target: RawTarget,
}

#[derive(Debug, Deserialize)]
struct RawTarget {
    oid: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawCommits {
    nodes: Vec<RawCommitNode>,
}

#[derive(Debug, Deserialize)]
struct RawCommitNode {
    commit: RawCommit,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawCommit {
    status: Option<RawStatus>,
}

#[derive(Debug, Deserialize)]
struct RawStatus {
    state: CommitStatusState,
}

impl RawPullRequest {
    /// Converts a search node into a `PullRequest`, or `None` for nodes that
    /// are not pull requests. Structurally broken PR nodes are an error: the
    /// iteration aborts rather than deciding on bad data.
    fn into_pull_request(self) -> Result<Option<PullRequest>, ForgeError> {
        let Some(number) = self.number else {
            return Ok(None);
        };
        let malformed = |what: &str| ForgeError::Api {
            status_code: None,
            message: format!("search result for PR #{number} is missing {what}"),
        };

        let base_ref = self.base_ref.ok_or_else(|| malformed("baseRef"))?;
        let repository = self.repository.ok_or_else(|| malformed("repository"))?;
        let head_ref = self.head_ref.ok_or_else(|| malformed("headRef"))?;
        let head_sha = Sha::parse(head_ref.target.oid).map_err(|err| ForgeError::Api {
            status_code: None,
            message: format!("search result for PR #{number} has {err}"),
        })?;

        let head_status = self
            .commits
            .and_then(|commits| commits.nodes.into_iter().next())
            .and_then(|node| node.commit.status)
            .map(|status| status.state);

        Ok(Some(PullRequest {
            number: PrNumber(number),
            author: self.author.unwrap_or_default().login,
            base_ref: base_ref.name,
            base_ref_prefix: base_ref.prefix,
            repo: RepoId::new(repository.owner.login, repository.name),
            head_sha,
            head_status,
        }))
    }
}
