//! Speculative batch selection by local merge simulation.

use tracing::warn;

use crate::git::{GitError, Workspace, Workspaces};
use crate::types::PullRequest;

use super::Subpool;

/// Builds a candidate batch: starting from the subpool's base commit, merge
/// each passing PR's head in pool order, keeping the ones that apply
/// cleanly. Conflicting PRs are skipped; any other merge failure aborts.
pub(crate) async fn pick_batch<W: Workspaces + Sync>(
    workspaces: &W,
    sp: &Subpool,
) -> Result<Vec<PullRequest>, GitError> {
    let ws = workspaces.clone_repo(&sp.repo_id()).await?;
    let picked = simulate(&ws, sp).await;
    // The workspace is released no matter how the simulation went.
    if let Err(err) = ws.clean().await {
        warn!(error = %err, "failed to release scratch workspace");
    }
    picked
}

async fn simulate<W: Workspace>(ws: &W, sp: &Subpool) -> Result<Vec<PullRequest>, GitError> {
    ws.config("user.name", "tide").await?;
    ws.config("user.email", "tide@localhost").await?;
    ws.checkout(&sp.base_sha).await?;

    let mut batch = Vec::new();
    for pr in &sp.prs {
        if !pr.head_passing() {
            continue;
        }
        if ws.merge(&pr.head_sha).await? {
            batch.push(pr.clone());
        }
    }
    Ok(batch)
}
