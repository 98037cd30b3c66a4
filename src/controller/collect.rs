//! Pool collection: paging the configured forge queries.

use std::collections::HashSet;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::forge::ForgeClient;
use crate::types::{PrNumber, PullRequest, RepoId};

use super::{SyncError, ensure_live};

/// Assembles the candidate pool: the union of all query results,
/// deduplicated by (repo, number). A PR matched by several queries counts
/// once.
pub(crate) async fn collect_pool<F: ForgeClient + Sync>(
    forge: &F,
    queries: &[String],
    cancel: &CancellationToken,
) -> Result<Vec<PullRequest>, SyncError> {
    let mut pool = Vec::new();
    let mut seen: HashSet<(RepoId, PrNumber)> = HashSet::new();
    for query in queries {
        for pr in search(forge, query, cancel).await? {
            if seen.insert((pr.repo.clone(), pr.number)) {
                pool.push(pr);
            }
        }
    }
    Ok(pool)
}

/// Drives one query to exhaustion, following the pagination cursor. Any page
/// failure aborts the whole iteration; no partial pools are produced.
async fn search<F: ForgeClient + Sync>(
    forge: &F,
    query: &str,
    cancel: &CancellationToken,
) -> Result<Vec<PullRequest>, SyncError> {
    let mut prs = Vec::new();
    let mut cursor: Option<String> = None;
    let mut total_cost = 0u32;
    let mut remaining = 0u32;
    loop {
        ensure_live(cancel)?;
        let page = forge.search_page(query, cursor.as_deref()).await?;
        total_cost += page.cost;
        remaining = page.remaining;
        prs.extend(page.prs);
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    info!(query, cost = total_cost, remaining, results = prs.len(), "search complete");
    Ok(prs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FakeForge, pr};
    use crate::types::CommitStatusState;

    fn queries(qs: &[&str]) -> Vec<String> {
        qs.iter().map(|q| q.to_string()).collect()
    }

    #[tokio::test]
    async fn follows_pagination_to_the_end() {
        let mut forge = FakeForge::default();
        forge.pages.insert(
            "q".to_string(),
            vec![
                vec![pr(1, 'b', Some(CommitStatusState::Success))],
                vec![pr(2, 'c', Some(CommitStatusState::Success))],
                vec![pr(3, 'd', Some(CommitStatusState::Success))],
            ],
        );

        let pool = collect_pool(&forge, &queries(&["q"]), &CancellationToken::new())
            .await
            .unwrap();
        let numbers: Vec<u64> = pool.iter().map(|pr| pr.number.0).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn unions_queries_and_dedupes() {
        let mut forge = FakeForge::default();
        forge.pages.insert(
            "first".to_string(),
            vec![vec![
                pr(1, 'b', Some(CommitStatusState::Success)),
                pr(2, 'c', Some(CommitStatusState::Success)),
            ]],
        );
        forge.pages.insert(
            "second".to_string(),
            vec![vec![
                pr(2, 'c', Some(CommitStatusState::Success)),
                pr(3, 'd', Some(CommitStatusState::Success)),
            ]],
        );

        let pool = collect_pool(
            &forge,
            &queries(&["first", "second"]),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        let numbers: Vec<u64> = pool.iter().map(|pr| pr.number.0).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn unknown_query_yields_nothing() {
        let forge = FakeForge::default();
        let pool = collect_pool(&forge, &queries(&["q"]), &CancellationToken::new())
            .await
            .unwrap();
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn cancellation_aborts_between_pages() {
        let mut forge = FakeForge::default();
        forge
            .pages
            .insert("q".to_string(), vec![vec![pr(1, 'b', None)]]);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = collect_pool(&forge, &queries(&["q"]), &cancel).await;
        assert!(matches!(result, Err(SyncError::Cancelled)));
    }
}
