//! Scratch git workspaces for merge simulation.
//!
//! The batch picker needs a disposable clone it can check out at the branch
//! base and merge candidate heads into, one after another. `Workspaces` hands
//! out such clones; `Workspace` is the narrow operation set the picker uses.
//! The local implementation shells out to `git` with system and user config
//! disabled, so behavior does not depend on the host machine.

use std::future::Future;
use std::path::Path;

use tempfile::TempDir;
use thiserror::Error;

use crate::types::{RepoId, Sha};

/// Errors from git operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// Git command failed.
    #[error("git command failed: {command}\nstderr: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for git operations.
pub type GitResult<T> = Result<T, GitError>;

/// Hands out scratch workspaces, one clone per call.
///
/// Implemented for `&T` as well, so callers can keep hold of a concrete
/// provider while lending it to the controller.
pub trait Workspaces {
    type Workspace: Workspace;

    /// Produces a fresh working clone of the repository.
    fn clone_repo(
        &self,
        repo: &RepoId,
    ) -> impl Future<Output = GitResult<Self::Workspace>> + Send;
}

impl<T: Workspaces + Sync> Workspaces for &T {
    type Workspace = T::Workspace;

    async fn clone_repo(&self, repo: &RepoId) -> GitResult<Self::Workspace> {
        (**self).clone_repo(repo).await
    }
}

/// A scratch clone. Callers must `clean` it on every exit path.
pub trait Workspace: Send + Sync {
    /// Sets a repository-local config value.
    fn config(&self, key: &str, value: &str) -> impl Future<Output = GitResult<()>> + Send;

    /// Checks out a commit (detached).
    fn checkout(&self, sha: &Sha) -> impl Future<Output = GitResult<()>> + Send;

    /// Attempts to merge a commit into the working tree. Returns true if the
    /// merge applied; false if it hit a conflict (the tree is restored to its
    /// pre-merge state). Anything else is an error.
    fn merge(&self, sha: &Sha) -> impl Future<Output = GitResult<bool>> + Send;

    /// Releases the workspace.
    fn clean(self) -> impl Future<Output = GitResult<()>> + Send;
}

/// Workspace provider that clones with the system `git` binary.
///
/// `base` is the URL root the clone source is formed from:
/// `<base>/<org>/<repo>`, so "https://github.com" works for hosted repos and
/// a local directory path works in tests.
#[derive(Debug, Clone)]
pub struct LocalWorkspaces {
    base: String,
}

impl LocalWorkspaces {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
        }
    }
}

impl Workspaces for LocalWorkspaces {
    type Workspace = LocalWorkspace;

    async fn clone_repo(&self, repo: &RepoId) -> GitResult<LocalWorkspace> {
        let dir = tempfile::Builder::new().prefix("tidepool-").tempdir()?;
        let url = format!("{}/{}/{}", self.base, repo.owner, repo.repo);
        run_git(dir.path(), &["clone", "--quiet", &url, "."]).await?;
        Ok(LocalWorkspace { dir })
    }
}

/// A scratch clone in a temporary directory.
#[derive(Debug)]
pub struct LocalWorkspace {
    dir: TempDir,
}

impl LocalWorkspace {
    /// Path of the working tree. Exposed for tests.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

impl Workspace for LocalWorkspace {
    async fn config(&self, key: &str, value: &str) -> GitResult<()> {
        run_git(self.dir.path(), &["config", key, value]).await
    }

    async fn checkout(&self, sha: &Sha) -> GitResult<()> {
        run_git(self.dir.path(), &["checkout", "--quiet", sha.as_str()]).await
    }

    async fn merge(&self, sha: &Sha) -> GitResult<bool> {
        let output = git_command(self.dir.path())
            .args(["merge", "--no-ff", "-m", "merge", sha.as_str()])
            .output()
            .await?;

        if output.status.success() {
            return Ok(true);
        }

        // Git reports conflicts on stdout, not stderr.
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let combined = format!("{stdout}{stderr}");
        if combined.contains("CONFLICT") || combined.contains("Automatic merge failed") {
            // Restore the tree so later merge attempts start clean.
            run_git(self.dir.path(), &["merge", "--abort"]).await?;
            return Ok(false);
        }

        Err(GitError::CommandFailed {
            command: format!("git merge --no-ff -m merge {sha}"),
            stderr: stderr.to_string(),
        })
    }

    async fn clean(self) -> GitResult<()> {
        self.dir.close().map_err(GitError::Io)
    }
}

/// Create a git command with a scrubbed environment (no system/user config,
/// no terminal prompts), for reproducible behavior across machines.
fn git_command(workdir: &Path) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new("git");
    cmd.current_dir(workdir);
    cmd.env("GIT_CONFIG_NOSYSTEM", "1");
    cmd.env("GIT_CONFIG_GLOBAL", "/dev/null");
    cmd.env("GIT_TERMINAL_PROMPT", "0");
    cmd
}

/// Run a git command in the given working directory, failing on non-zero exit.
async fn run_git(workdir: &Path, args: &[&str]) -> GitResult<()> {
    let output = git_command(workdir).args(args).output().await?;
    if output.status.success() {
        Ok(())
    } else {
        Err(GitError::CommandFailed {
            command: format!("git {}", args.join(" ")),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    /// Run git synchronously for test setup, panicking on failure.
    fn setup_git(workdir: &Path, args: &[&str]) {
        let output = Command::new("git")
            .current_dir(workdir)
            .env("GIT_CONFIG_NOSYSTEM", "1")
            .env("GIT_CONFIG_GLOBAL", "/dev/null")
            .args(args)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    fn setup_git_stdout(workdir: &Path, args: &[&str]) -> String {
        let output = Command::new("git")
            .current_dir(workdir)
            .env("GIT_CONFIG_NOSYSTEM", "1")
            .env("GIT_CONFIG_GLOBAL", "/dev/null")
            .args(args)
            .output()
            .unwrap();
        assert!(output.status.success());
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    fn commit_file(workdir: &Path, name: &str, content: &str, message: &str) -> Sha {
        std::fs::write(workdir.join(name), content).unwrap();
        setup_git(workdir, &["add", "."]);
        setup_git(
            workdir,
            &[
                "-c",
                "user.name=test",
                "-c",
                "user.email=test@test.com",
                "commit",
                "-m",
                message,
            ],
        );
        Sha::parse(setup_git_stdout(workdir, &["rev-parse", "HEAD"])).unwrap()
    }

    /// Creates `<root>/org/repo` with a main branch, one commit, and two
    /// feature branches: one that merges cleanly and one that conflicts.
    fn create_origin(root: &Path) -> (Sha, Sha, Sha) {
        let repo_dir = root.join("org").join("repo");
        std::fs::create_dir_all(&repo_dir).unwrap();
        setup_git(&repo_dir, &["init", "--initial-branch=main"]);

        let base = commit_file(&repo_dir, "README.md", "# test\n", "initial");

        setup_git(&repo_dir, &["checkout", "-b", "clean-branch"]);
        let clean = commit_file(&repo_dir, "feature.txt", "feature\n", "add feature");

        setup_git(&repo_dir, &["checkout", "main"]);
        setup_git(&repo_dir, &["checkout", "-b", "conflict-branch"]);
        let conflicting = commit_file(&repo_dir, "README.md", "# conflicting\n", "rewrite readme");

        setup_git(&repo_dir, &["checkout", "main"]);
        commit_file(&repo_dir, "README.md", "# moved on\n", "diverge readme");

        (base, clean, conflicting)
    }

    #[tokio::test]
    async fn clean_merge_applies() {
        let root = tempfile::tempdir().unwrap();
        let (base, clean, _) = create_origin(root.path());

        let workspaces = LocalWorkspaces::new(root.path().to_str().unwrap());
        let ws = workspaces.clone_repo(&RepoId::new("org", "repo")).await.unwrap();

        ws.config("user.name", "tide").await.unwrap();
        ws.config("user.email", "tide@localhost").await.unwrap();
        ws.checkout(&base).await.unwrap();

        assert!(ws.merge(&clean).await.unwrap());
        assert!(ws.path().join("feature.txt").exists());

        ws.clean().await.unwrap();
    }

    #[tokio::test]
    async fn conflicting_merge_reports_false_and_restores_tree() {
        let root = tempfile::tempdir().unwrap();
        let (_, clean, conflicting) = create_origin(root.path());

        let workspaces = LocalWorkspaces::new(root.path().to_str().unwrap());
        let ws = workspaces.clone_repo(&RepoId::new("org", "repo")).await.unwrap();

        ws.config("user.name", "tide").await.unwrap();
        ws.config("user.email", "tide@localhost").await.unwrap();
        // Stay on main, which diverged from conflict-branch on README.md.

        assert!(!ws.merge(&conflicting).await.unwrap());

        // The aborted merge must leave the tree usable for further attempts.
        assert!(ws.merge(&clean).await.unwrap());

        ws.clean().await.unwrap();
    }

    #[tokio::test]
    async fn clean_releases_the_directory() {
        let root = tempfile::tempdir().unwrap();
        create_origin(root.path());

        let workspaces = LocalWorkspaces::new(root.path().to_str().unwrap());
        let ws = workspaces.clone_repo(&RepoId::new("org", "repo")).await.unwrap();
        let path = ws.path().to_path_buf();
        assert!(path.exists());

        ws.clean().await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn clone_of_missing_repo_fails() {
        let root = tempfile::tempdir().unwrap();
        let workspaces = LocalWorkspaces::new(root.path().to_str().unwrap());
        let result = workspaces.clone_repo(&RepoId::new("org", "nope")).await;
        assert!(result.is_err());
    }
}
