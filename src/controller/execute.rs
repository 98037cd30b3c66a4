//! Side effects: submitting jobs and requesting merges.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::TideConfig;
use crate::forge::{ForgeClient, ForgeError};
use crate::substrate::{self, JobSubstrate};
use crate::types::{Pull, PullRequest, Refs};

use super::{Subpool, SyncError, ensure_live};

/// Submits one job per gating presubmit for the target PRs: the single-pull
/// presubmit shape for one target, the batch shape for several. A submission
/// failure aborts the iteration.
pub(crate) async fn trigger<S: JobSubstrate + Sync>(
    substrate_client: &S,
    config: &TideConfig,
    sp: &Subpool,
    prs: &[PullRequest],
    cancel: &CancellationToken,
) -> Result<(), SyncError> {
    let repo = sp.repo_id();
    for ps in config.gating_presubmits(&repo, &sp.branch) {
        let refs = Refs {
            org: sp.org.clone(),
            repo: sp.repo.clone(),
            base_ref: sp.branch.clone(),
            base_sha: sp.base_sha.clone(),
            pulls: prs
                .iter()
                .map(|pr| Pull {
                    number: pr.number,
                    author: pr.author.clone(),
                    sha: pr.head_sha.clone(),
                })
                .collect(),
        };
        let job = if prs.len() == 1 {
            substrate::presubmit_job(ps, refs)
        } else {
            substrate::batch_job(ps, refs)
        };

        ensure_live(cancel)?;
        let submitted = substrate_client.submit_job(job).await?;
        info!(job = %submitted.name, id = %submitted.id, "submitted job");
    }
    Ok(())
}

/// Requests a merge of each target PR at its observed head. Two rejections
/// are tolerated per PR: the head moved since observation, or the forge
/// refuses despite green status. Both are logged and the rest of the batch
/// proceeds; anything else aborts the iteration.
pub(crate) async fn merge_prs<F: ForgeClient + Sync>(
    forge: &F,
    sp: &Subpool,
    prs: &[PullRequest],
    cancel: &CancellationToken,
) -> Result<(), SyncError> {
    let repo = sp.repo_id();
    for pr in prs {
        ensure_live(cancel)?;
        match forge.merge(&repo, pr.number, &pr.head_sha).await {
            Ok(()) => info!(pr = %pr.number, "merged"),
            Err(err @ ForgeError::ModifiedHead { .. }) => {
                // The next iteration observes the new head and re-decides.
                info!(pr = %pr.number, error = %err, "merge failed: PR was modified");
            }
            Err(err @ ForgeError::Unmergeable { .. }) => {
                warn!(pr = %pr.number, error = %err, "merge failed: PR is unmergeable despite passing tests");
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}
