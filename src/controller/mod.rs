//! The merge-queue controller.
//!
//! One sync iteration observes the world and acts once per branch:
//!
//! 1. Collect candidate PRs from the configured forge queries.
//! 2. Partition them into per-(org, repo, branch) subpools, resolving each
//!    branch head and discarding job records that tested an older head.
//! 3. Classify each subpool: per-PR aggregate presubmit state, and whether a
//!    previously-run batch still describes a mergeable set.
//! 4. Pick exactly one action by fixed precedence and execute it.
//! 5. Publish a snapshot of every subpool for the status endpoint.
//!
//! Nothing carries over between iterations; every decision is re-derived
//! from freshly observed state, so an aborted iteration is always safe.

pub(crate) mod accumulate;
pub(crate) mod batch;
pub(crate) mod collect;
pub(crate) mod execute;
pub(crate) mod partition;


use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::TideConfig;
use crate::forge::{ForgeClient, ForgeError};
use crate::git::{GitError, Workspaces};
use crate::substrate::{JobSubstrate, SubstrateError};
use crate::types::{Job, PullRequest, RepoId, Sha};

use self::accumulate::pick_smallest_passing;

/// Errors that abort a sync iteration. All are transient in the sense that
/// the next iteration starts from scratch with no bookkeeping.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Forge(#[from] ForgeError),

    #[error(transparent)]
    Substrate(#[from] SubstrateError),

    #[error(transparent)]
    Git(#[from] GitError),

    /// The cancellation token fired; the iteration stopped at an I/O
    /// boundary.
    #[error("sync cancelled")]
    Cancelled,
}

/// Checks the cancellation token before an I/O boundary.
pub(crate) fn ensure_live(cancel: &CancellationToken) -> Result<(), SyncError> {
    if cancel.is_cancelled() {
        Err(SyncError::Cancelled)
    } else {
        Ok(())
    }
}

/// The one action a subpool gets per iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Wait,
    Trigger,
    TriggerBatch,
    Merge,
    MergeBatch,
}

/// The published outcome for one subpool.
///
/// The three PR lists partition the subpool by rolled-up presubmit state.
/// Field names are part of the endpoint's wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Pool {
    pub org: String,
    pub repo: String,
    pub branch: String,

    #[serde(rename = "SuccessPRs")]
    pub success_prs: Vec<PullRequest>,
    #[serde(rename = "PendingPRs")]
    pub pending_prs: Vec<PullRequest>,
    #[serde(rename = "MissingPRs")]
    pub missing_prs: Vec<PullRequest>,

    pub action: Action,
    pub target: Vec<PullRequest>,
}

/// Shared handle to the published pool list.
///
/// Single writer (the control loop, which holds the lock for a whole
/// iteration), few readers (the status endpoint). Readers block while an
/// iteration runs; that is a deliberate trade for strong snapshot
/// consistency on a non-latency-sensitive endpoint.
#[derive(Debug, Clone, Default)]
pub struct PoolsHandle {
    inner: Arc<Mutex<Vec<Pool>>>,
}

impl PoolsHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, Vec<Pool>> {
        self.inner.lock().await
    }

    /// Serializes the current pool list as a JSON array, under the lock.
    /// Falls back to an empty array if serialization fails.
    pub async fn render_json(&self) -> String {
        let pools = self.inner.lock().await;
        match serde_json::to_string(&*pools) {
            Ok(body) => body,
            Err(err) => {
                error!(error = %err, "failed to serialize pool snapshot");
                "[]".to_string()
            }
        }
    }
}

/// The per-iteration working unit: everything known about one branch.
#[derive(Debug, Clone)]
pub(crate) struct Subpool {
    pub org: String,
    pub repo: String,
    pub branch: String,

    /// The branch head at iteration start. Every job in `jobs` tested
    /// exactly this base.
    pub base_sha: Sha,

    pub prs: Vec<PullRequest>,
    pub jobs: Vec<Job>,
}

impl Subpool {
    pub(crate) fn new(org: String, repo: String, branch: String, base_sha: Sha) -> Self {
        Subpool {
            org,
            repo,
            branch,
            base_sha,
            prs: Vec::new(),
            jobs: Vec::new(),
        }
    }

    pub(crate) fn repo_id(&self) -> RepoId {
        RepoId::new(self.org.clone(), self.repo.clone())
    }
}

/// The controller. Generic over its three collaborators so the decision
/// engine can be exercised with in-memory fakes.
pub struct Controller<F, S, W> {
    config: TideConfig,
    forge: F,
    substrate: S,
    workspaces: W,
    pools: PoolsHandle,
}

impl<F, S, W> Controller<F, S, W>
where
    F: ForgeClient + Sync,
    S: JobSubstrate + Sync,
    W: Workspaces + Sync,
{
    pub fn new(config: TideConfig, forge: F, substrate: S, workspaces: W, pools: PoolsHandle) -> Self {
        Controller {
            config,
            forge,
            substrate,
            workspaces,
            pools,
        }
    }

    /// Handle to the published snapshot, for the status endpoint.
    pub fn pools(&self) -> PoolsHandle {
        self.pools.clone()
    }

    /// Runs one sync iteration. On error the previously published snapshot
    /// stays in place and the next iteration retries from scratch.
    pub async fn sync(&self, cancel: &CancellationToken) -> Result<(), SyncError> {
        info!("building tide pool");
        let pool = collect::collect_pool(&self.forge, &self.config.queries, cancel).await?;

        let jobs = if pool.is_empty() {
            Vec::new()
        } else {
            ensure_live(cancel)?;
            self.substrate.list_jobs().await?
        };

        let subpools = partition::divide_pool(&self.forge, pool, jobs, cancel).await?;

        // The lock is held for the rest of the iteration. Readers of the
        // status endpoint block until the new list is swapped in whole.
        let mut published = self.pools.lock().await;
        let mut next = Vec::with_capacity(subpools.len());
        for sp in subpools {
            next.push(self.sync_subpool(sp, cancel).await?);
        }
        *published = next;
        Ok(())
    }

    async fn sync_subpool(&self, sp: Subpool, cancel: &CancellationToken) -> Result<Pool, SyncError> {
        info!(
            org = %sp.org,
            repo = %sp.repo,
            branch = %sp.branch,
            prs = sp.prs.len(),
            jobs = sp.jobs.len(),
            "syncing subpool"
        );
        let repo = sp.repo_id();
        let presubmits: Vec<String> = self
            .config
            .gating_presubmits(&repo, &sp.branch)
            .map(|ps| ps.name.clone())
            .collect();

        let (successes, pendings, nones) = accumulate::accumulate(&presubmits, &sp.prs, &sp.jobs);
        let (batch_merges, batch_pending) =
            accumulate::accumulate_batch(&presubmits, &sp.prs, &sp.jobs);
        info!(
            passing = ?pr_numbers(&successes),
            pending = ?pr_numbers(&pendings),
            missing = ?pr_numbers(&nones),
            passing_batch = ?pr_numbers(&batch_merges),
            batch_pending,
            "classified subpool"
        );

        let (action, target) = self
            .take_action(&sp, batch_pending, &successes, &pendings, &nones, batch_merges, cancel)
            .await?;
        info!(?action, targets = ?pr_numbers(&target), "chose action");

        Ok(Pool {
            org: sp.org,
            repo: sp.repo,
            branch: sp.branch,
            success_prs: successes,
            pending_prs: pendings,
            missing_prs: nones,
            action,
            target,
        })
    }

    /// Picks and executes exactly one action, by fixed precedence.
    #[allow(clippy::too_many_arguments)]
    async fn take_action(
        &self,
        sp: &Subpool,
        batch_pending: bool,
        successes: &[PullRequest],
        pendings: &[PullRequest],
        nones: &[PullRequest],
        batch_merges: Vec<PullRequest>,
        cancel: &CancellationToken,
    ) -> Result<(Action, Vec<PullRequest>), SyncError> {
        // A validated batch merges first.
        if !batch_merges.is_empty() {
            if !self.config.dry_run {
                execute::merge_prs(&self.forge, sp, &batch_merges, cancel).await?;
            }
            return Ok((Action::MergeBatch, batch_merges));
        }

        // Serial merges are held back while a batch runs: merging would move
        // the base and throw away the batch's work.
        if !successes.is_empty() && !batch_pending {
            if let Some(pr) = pick_smallest_passing(successes) {
                let target = vec![pr.clone()];
                if !self.config.dry_run {
                    execute::merge_prs(&self.forge, sp, &target, cancel).await?;
                }
                return Ok((Action::Merge, target));
            }
        }

        // With nothing running and nothing passed, start one serial test.
        if !nones.is_empty() && pendings.is_empty() && successes.is_empty() {
            if let Some(pr) = pick_smallest_passing(nones) {
                let target = vec![pr.clone()];
                if !self.config.dry_run {
                    execute::trigger(&self.substrate, &self.config, sp, &target, cancel).await?;
                }
                return Ok((Action::Trigger, target));
            }
        }

        // With no batch in flight and more than one candidate, try to start
        // one speculatively.
        if sp.prs.len() > 1 && !batch_pending {
            let picked = batch::pick_batch(&self.workspaces, sp).await?;
            if picked.len() > 1 {
                if !self.config.dry_run {
                    execute::trigger(&self.substrate, &self.config, sp, &picked, cancel).await?;
                }
                return Ok((Action::TriggerBatch, picked));
            }
        }

        Ok((Action::Wait, Vec::new()))
    }
}

fn pr_numbers(prs: &[PullRequest]) -> Vec<u64> {
    prs.iter().map(|pr| pr.number.0).collect()
}
