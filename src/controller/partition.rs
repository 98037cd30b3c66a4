//! Partitioning the pool into per-branch subpools.

use std::collections::BTreeMap;

use tokio_util::sync::CancellationToken;

use crate::forge::ForgeClient;
use crate::types::{Job, JobType, PullRequest};

use super::{Subpool, SyncError, ensure_live};

/// Splits the pool into one subpool per (org, repo, branch), resolving each
/// branch's current head once, and attaches only the jobs that tested that
/// exact base. Jobs recorded against an older branch head are dropped so a
/// stale batch cannot influence a fresh decision.
pub(crate) async fn divide_pool<F: ForgeClient + Sync>(
    forge: &F,
    pool: Vec<PullRequest>,
    jobs: Vec<Job>,
    cancel: &CancellationToken,
) -> Result<Vec<Subpool>, SyncError> {
    // BTreeMap keeps subpool order stable across iterations, so logs and
    // snapshots do not shuffle.
    let mut subpools: BTreeMap<String, Subpool> = BTreeMap::new();

    for pr in pool {
        let key = subpool_key(&pr.repo.owner, &pr.repo.repo, &pr.base_ref);
        if let Some(sp) = subpools.get_mut(&key) {
            sp.prs.push(pr);
            continue;
        }

        ensure_live(cancel)?;
        let branch_ref = pr.base_branch_ref();
        let r = branch_ref.strip_prefix("refs/").unwrap_or(&branch_ref);
        let base_sha = forge.resolve_ref(&pr.repo, r).await?;

        let mut sp = Subpool::new(
            pr.repo.owner.clone(),
            pr.repo.repo.clone(),
            pr.base_ref.clone(),
            base_sha,
        );
        sp.prs.push(pr);
        subpools.insert(key, sp);
    }

    for job in jobs {
        if !matches!(job.job_type, JobType::Presubmit | JobType::Batch) {
            continue;
        }
        let key = subpool_key(&job.refs.org, &job.refs.repo, &job.refs.base_ref);
        match subpools.get_mut(&key) {
            Some(sp) if sp.base_sha == job.refs.base_sha => sp.jobs.push(job),
            _ => {}
        }
    }

    Ok(subpools.into_values().collect())
}

fn subpool_key(org: &str, repo: &str, branch: &str) -> String {
    format!("{org}/{repo} {branch}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    use crate::test_utils::{FakeForge, job, job_refs, pr, pr_on_branch, sha};
    use crate::types::{CommitStatusState, JobState, RepoId};

    fn forge_with_main(base: char) -> FakeForge {
        let mut forge = FakeForge::default();
        forge.refs.insert(
            (RepoId::new("org", "repo"), "heads/main".to_string()),
            sha(base),
        );
        forge
    }

    #[tokio::test]
    async fn groups_by_branch_and_resolves_head_once() {
        let mut forge = forge_with_main('a');
        forge.refs.insert(
            (RepoId::new("org", "repo"), "heads/release".to_string()),
            sha('f'),
        );

        let pool = vec![
            pr(1, 'b', Some(CommitStatusState::Success)),
            pr_on_branch(2, 'c', "release"),
            pr(3, 'd', Some(CommitStatusState::Success)),
        ];

        let subpools = divide_pool(&forge, pool, Vec::new(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(subpools.len(), 2);
        let main = subpools.iter().find(|sp| sp.branch == "main").unwrap();
        assert_eq!(main.base_sha, sha('a'));
        assert_eq!(main.prs.len(), 2);
        let release = subpools.iter().find(|sp| sp.branch == "release").unwrap();
        assert_eq!(release.base_sha, sha('f'));
        assert_eq!(release.prs.len(), 1);

        // One resolution per distinct branch, not per PR.
        assert_eq!(forge.resolve_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn keeps_jobs_matching_the_current_base() {
        let forge = forge_with_main('a');
        let pool = vec![pr(1, 'b', Some(CommitStatusState::Success))];
        let jobs = vec![job(
            "unit",
            JobType::Presubmit,
            JobState::Success,
            job_refs('a', &[(1, 'b')]),
        )];

        let subpools = divide_pool(&forge, pool, jobs, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(subpools[0].jobs.len(), 1);
    }

    #[tokio::test]
    async fn drops_jobs_with_stale_base() {
        let forge = forge_with_main('a');
        let pool = vec![pr(1, 'b', Some(CommitStatusState::Success))];
        let jobs = vec![job(
            "unit",
            JobType::Presubmit,
            JobState::Success,
            job_refs('0', &[(1, 'b')]),
        )];

        let subpools = divide_pool(&forge, pool, jobs, &CancellationToken::new())
            .await
            .unwrap();
        assert!(subpools[0].jobs.is_empty());
    }

    #[tokio::test]
    async fn drops_jobs_for_unknown_subpools() {
        let forge = forge_with_main('a');
        let pool = vec![pr(1, 'b', Some(CommitStatusState::Success))];
        let mut refs = job_refs('a', &[(9, 'c')]);
        refs.repo = "elsewhere".to_string();
        let jobs = vec![job("unit", JobType::Presubmit, JobState::Success, refs)];

        let subpools = divide_pool(&forge, pool, jobs, &CancellationToken::new())
            .await
            .unwrap();
        assert!(subpools[0].jobs.is_empty());
    }

    #[tokio::test]
    async fn ignores_non_gating_job_types() {
        let forge = forge_with_main('a');
        let pool = vec![pr(1, 'b', Some(CommitStatusState::Success))];
        let jobs = vec![
            job(
                "deploy",
                JobType::Postsubmit,
                JobState::Success,
                job_refs('a', &[]),
            ),
            job(
                "nightly",
                JobType::Periodic,
                JobState::Success,
                job_refs('a', &[]),
            ),
        ];

        let subpools = divide_pool(&forge, pool, jobs, &CancellationToken::new())
            .await
            .unwrap();
        assert!(subpools[0].jobs.is_empty());
    }

    #[tokio::test]
    async fn unresolvable_ref_aborts() {
        let forge = FakeForge::default();
        let pool = vec![pr(1, 'b', Some(CommitStatusState::Success))];
        let result = divide_pool(&forge, pool, Vec::new(), &CancellationToken::new()).await;
        assert!(matches!(result, Err(SyncError::Forge(_))));
    }
}
