//! Git Operations
//!
//! Typed wrappers over the `git` CLI. One method per verb; every invocation
//! targets an explicit repository path via `git -C <repo>` and passes
//! arguments as discrete argv elements.

use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum GitError {
    #[error("Not a git repository: {0}")]
    NotARepository(PathBuf),

    #[error("git {verb} failed: {stderr}")]
    CommandFailed { verb: String, stderr: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================================
// Command Output
// ============================================================================

/// Captured result of one git invocation
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Process exit code (-1 if terminated by signal)
    pub status: i32,

    /// Captured stdout, trimmed
    pub stdout: String,

    /// Captured stderr, trimmed
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

// ============================================================================
// Git Operations
// ============================================================================

/// Git operations against one repository path
#[derive(Debug, Clone)]
pub struct GitOps {
    /// Explicit repository path passed as `git -C <repo>`
    repo: PathBuf,
}

impl GitOps {
    /// Wrap a repository path. No probing happens here; use
    /// [`GitOps::work_tree_probe`] to verify the path is a usable work tree.
    pub fn new(repo: impl Into<PathBuf>) -> Self {
        Self { repo: repo.into() }
    }

    /// Repository path this handle operates on
    pub fn repo(&self) -> &Path {
        &self.repo
    }

    /// Run `git -C <repo> <args...>` and capture the output
    pub async fn run(&self, args: &[&str]) -> Result<CommandOutput, GitError> {
        Self::run_raw_in(Some(&self.repo), args).await
    }

    /// Run a bare `git <args...>` without a repository target
    async fn run_raw(args: &[&str]) -> Result<CommandOutput, GitError> {
        Self::run_raw_in(None, args).await
    }

    async fn run_raw_in(repo: Option<&Path>, args: &[&str]) -> Result<CommandOutput, GitError> {
        let mut cmd = Command::new("git");
        if let Some(repo) = repo {
            cmd.arg("-C").arg(repo);
        }
        cmd.args(args);

        debug!(?args, repo = ?repo, "git invocation");
        let output = cmd.output().await?;

        Ok(CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    /// Run a verb and map a non-zero exit to [`GitError::CommandFailed`]
    async fn run_checked(&self, verb: &str, args: &[&str]) -> Result<String, GitError> {
        let output = self.run(args).await?;
        if output.success() {
            Ok(output.stdout)
        } else {
            Err(GitError::CommandFailed {
                verb: verb.to_string(),
                stderr: output.stderr,
            })
        }
    }

    // ========================================================================
    // Probing / trust
    // ========================================================================

    /// Probe whether the path is inside a git work tree.
    ///
    /// Returns the raw output so the caller can distinguish "not a repo"
    /// from "repo owned by another user" (git's safe.directory refusal).
    pub async fn work_tree_probe(&self) -> Result<CommandOutput, GitError> {
        self.run(&["rev-parse", "--is-inside-work-tree"]).await
    }

    /// Register the repository as a trusted safe.directory.
    ///
    /// The one deliberately global git operation in this module: the trust
    /// list lives in the invoking user's configuration.
    pub async fn trust_repository(&self) -> Result<(), GitError> {
        let path = self.repo.to_string_lossy();
        let output = Self::run_raw(&["config", "--global", "--add", "safe.directory", &path]).await?;
        if output.success() {
            Ok(())
        } else {
            Err(GitError::CommandFailed {
                verb: "config safe.directory".to_string(),
                stderr: output.stderr,
            })
        }
    }

    // ========================================================================
    // Remotes
    // ========================================================================

    /// Configured remote names
    pub async fn remotes(&self) -> Result<Vec<String>, GitError> {
        let stdout = self.run_checked("remote", &["remote"]).await?;
        Ok(stdout
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }

    /// Fetch all configured remotes
    pub async fn fetch_all(&self) -> Result<(), GitError> {
        self.run_checked("fetch", &["fetch", "--all", "--prune"])
            .await?;
        Ok(())
    }

    /// Point a remote at a new URL
    pub async fn set_remote_url(&self, remote: &str, url: &str) -> Result<(), GitError> {
        self.run_checked("remote set-url", &["remote", "set-url", remote, url])
            .await?;
        Ok(())
    }

    // ========================================================================
    // Worktrees / clones
    // ========================================================================

    /// Create a worktree at `path` on a new branch
    pub async fn worktree_add(&self, path: &Path, branch: &str) -> Result<(), GitError> {
        let path_str = path.to_string_lossy();
        self.run_checked(
            "worktree add",
            &["worktree", "add", "-b", branch, &path_str, "HEAD"],
        )
        .await?;
        Ok(())
    }

    /// Paths of all registered worktrees (including the main work tree)
    pub async fn worktree_list(&self) -> Result<Vec<PathBuf>, GitError> {
        let stdout = self
            .run_checked("worktree list", &["worktree", "list", "--porcelain"])
            .await?;
        Ok(stdout
            .lines()
            .filter_map(|line| line.strip_prefix("worktree "))
            .map(PathBuf::from)
            .collect())
    }

    /// Remove a registered worktree, discarding its local changes
    pub async fn worktree_remove(&self, path: &Path) -> Result<(), GitError> {
        let path_str = path.to_string_lossy();
        self.run_checked(
            "worktree remove",
            &["worktree", "remove", "--force", &path_str],
        )
        .await?;
        Ok(())
    }

    /// Drop stale worktree registrations whose directories are gone
    pub async fn worktree_prune(&self) -> Result<(), GitError> {
        self.run_checked("worktree prune", &["worktree", "prune"])
            .await?;
        Ok(())
    }

    /// Shallow-clone `source` to `dest` (depth 1).
    ///
    /// The resulting history is a single commit; callers needing more
    /// history later will not find it here.
    pub async fn clone_shallow(source: &Path, dest: &Path) -> Result<GitOps, GitError> {
        let source_str = source.to_string_lossy();
        let dest_str = dest.to_string_lossy();
        let output =
            Self::run_raw(&["clone", "--depth", "1", &source_str, &dest_str]).await?;
        if output.success() {
            Ok(GitOps::new(dest))
        } else {
            Err(GitError::CommandFailed {
                verb: "clone".to_string(),
                stderr: output.stderr,
            })
        }
    }

    // ========================================================================
    // Branches
    // ========================================================================

    /// Current branch name
    pub async fn current_branch(&self) -> Result<String, GitError> {
        self.run_checked("rev-parse", &["rev-parse", "--abbrev-ref", "HEAD"])
            .await
    }

    /// Current HEAD commit hash
    pub async fn head(&self) -> Result<String, GitError> {
        self.run_checked("rev-parse", &["rev-parse", "HEAD"]).await
    }

    /// Whether a local branch exists
    pub async fn branch_exists(&self, branch: &str) -> Result<bool, GitError> {
        let rev = format!("refs/heads/{}", branch);
        let output = self
            .run(&["show-ref", "--verify", "--quiet", &rev])
            .await?;
        Ok(output.success())
    }

    /// Local branch names
    pub async fn branches(&self) -> Result<Vec<String>, GitError> {
        let stdout = self
            .run_checked(
                "for-each-ref",
                &["for-each-ref", "--format=%(refname:short)", "refs/heads"],
            )
            .await?;
        Ok(stdout
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }

    /// Create and switch to a new branch
    pub async fn checkout_new_branch(&self, branch: &str) -> Result<(), GitError> {
        self.run_checked("checkout", &["checkout", "-b", branch])
            .await?;
        Ok(())
    }

    // ========================================================================
    // Init / identity / commit
    // ========================================================================

    /// Initialize a repository with a deterministic default branch
    pub async fn init(path: &Path, default_branch: &str) -> Result<GitOps, GitError> {
        let path_str = path.to_string_lossy();
        let output = Self::run_raw(&[
            "init",
            "--initial-branch",
            default_branch,
            &path_str,
        ])
        .await?;
        if output.success() {
            Ok(GitOps::new(path))
        } else {
            Err(GitError::CommandFailed {
                verb: "init".to_string(),
                stderr: output.stderr,
            })
        }
    }

    /// Set a repository-scoped (non-global) commit identity
    pub async fn set_identity(&self, name: &str, email: &str) -> Result<(), GitError> {
        self.run_checked("config user.name", &["config", "user.name", name])
            .await?;
        self.run_checked("config user.email", &["config", "user.email", email])
            .await?;
        Ok(())
    }

    /// Stage all changes
    pub async fn add_all(&self) -> Result<(), GitError> {
        self.run_checked("add", &["add", "-A"]).await?;
        Ok(())
    }

    /// Create a commit; tolerates an empty tree
    pub async fn commit(&self, message: &str) -> Result<String, GitError> {
        self.run_checked("commit", &["commit", "--allow-empty", "-m", message])
            .await?;
        self.run_checked("rev-parse", &["rev-parse", "--short", "HEAD"])
            .await
    }

    /// Number of commits reachable from HEAD
    pub async fn commit_count(&self) -> Result<usize, GitError> {
        let stdout = self
            .run_checked("rev-list", &["rev-list", "--count", "HEAD"])
            .await?;
        stdout.parse().map_err(|_| {
            warn!(%stdout, "Unparseable rev-list output");
            GitError::CommandFailed {
                verb: "rev-list".to_string(),
                stderr: format!("unexpected output: {}", stdout),
            }
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    async fn init_repo(dir: &Path) -> GitOps {
        let git = GitOps::init(dir, "main").await.unwrap();
        git.set_identity("berth", "test@berth.local").await.unwrap();
        git
    }

    #[tokio::test]
    async fn test_init_and_commit() {
        let dir = tempfile::tempdir().unwrap();
        let git = init_repo(dir.path()).await;

        std::fs::write(dir.path().join("README.md"), "hello").unwrap();
        git.add_all().await.unwrap();
        let hash = git.commit("Initial commit").await.unwrap();

        assert!(!hash.is_empty());
        assert_eq!(git.current_branch().await.unwrap(), "main");
        assert_eq!(git.commit_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_work_tree_probe() {
        let dir = tempfile::tempdir().unwrap();
        let git = init_repo(dir.path()).await;
        let probe = git.work_tree_probe().await.unwrap();
        assert!(probe.success());
        assert_eq!(probe.stdout, "true");

        let plain = tempfile::tempdir().unwrap();
        let not_git = GitOps::new(plain.path());
        let probe = not_git.work_tree_probe().await.unwrap();
        assert!(!probe.success());
    }

    #[tokio::test]
    async fn test_worktree_add_list_remove() {
        let dir = tempfile::tempdir().unwrap();
        let git = init_repo(dir.path()).await;
        git.commit("Initial commit").await.unwrap();

        let out = tempfile::tempdir().unwrap();
        let wt_path = out.path().join("wt");
        git.worktree_add(&wt_path, "task-T-1-0").await.unwrap();

        let listed = git.worktree_list().await.unwrap();
        assert!(listed.iter().any(|p| p.ends_with("wt")));
        assert!(git.branch_exists("task-T-1-0").await.unwrap());

        git.worktree_remove(&wt_path).await.unwrap();
        assert!(!wt_path.exists());
        let listed = git.worktree_list().await.unwrap();
        assert!(!listed.iter().any(|p| p.ends_with("wt")));
    }

    #[tokio::test]
    async fn test_clone_shallow_has_single_commit() {
        let dir = tempfile::tempdir().unwrap();
        let git = init_repo(dir.path()).await;
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        git.add_all().await.unwrap();
        git.commit("one").await.unwrap();
        std::fs::write(dir.path().join("b.txt"), "b").unwrap();
        git.add_all().await.unwrap();
        git.commit("two").await.unwrap();

        let out = tempfile::tempdir().unwrap();
        let dest = out.path().join("clone");
        let clone = GitOps::clone_shallow(dir.path(), &dest).await.unwrap();

        assert_eq!(clone.commit_count().await.unwrap(), 1);
        assert!(dest.join("b.txt").exists());
    }

    #[tokio::test]
    async fn test_remotes_empty_for_fresh_repo() {
        let dir = tempfile::tempdir().unwrap();
        let git = init_repo(dir.path()).await;
        assert!(git.remotes().await.unwrap().is_empty());
    }
}
