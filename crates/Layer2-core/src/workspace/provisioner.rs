//! Workspace Provisioner
//!
//! Produces an isolated, branch-scoped working copy of a project repository
//! for one task. The origin repository is never mutated destructively: the
//! only new state is one uniquely named branch (and, on the worktree path,
//! one worktree registration).

use crate::git::{GitError, GitOps};
use berth_foundation::config::PathSettings;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info, warn};

// ============================================================================
// Types
// ============================================================================

/// How the workspace was materialized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceKind {
    /// Worktree registered in the origin repository (shared object store)
    Worktree,

    /// Shallow clone with `origin` re-pointed at the canonical path
    Clone,
}

/// One task's private checkout of one project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    /// Owning task
    pub task_id: String,

    /// Checked-out project
    pub project_id: String,

    /// Canonical on-disk location of the origin repository
    pub host_path: PathBuf,

    /// Location of this task's checkout
    pub output_path: PathBuf,

    /// Branch unique to this provisioning attempt
    pub branch_name: String,

    /// Worktree or clone
    pub kind: WorkspaceKind,
}

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("Project repository not found: {0}")]
    NotFound(String),

    #[error("Not a git repository: {0}")]
    NotAGitRepo(PathBuf),

    #[error("Git operation failed for task {task_id}, project {project_id}: {source}")]
    GitOperationFailed {
        task_id: String,
        project_id: String,
        #[source]
        source: GitError,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================================
// Provisioner
// ============================================================================

/// Creates and releases per-task workspaces
#[derive(Debug, Clone)]
pub struct WorkspaceProvisioner {
    paths: PathSettings,
}

impl WorkspaceProvisioner {
    pub fn new(paths: PathSettings) -> Self {
        Self { paths }
    }

    /// Branch name unique to this provisioning attempt.
    ///
    /// The creation instant is included so repeated attempts for the same
    /// task never collide with branches left by earlier attempts.
    fn branch_name(task_id: &str) -> String {
        format!("task-{}-{}", task_id, Utc::now().timestamp_micros())
    }

    /// Provision a workspace for `(task_id, project_id)`.
    ///
    /// Idempotent: a leftover output path from a previous attempt is
    /// replaced, and each attempt gets a fresh branch.
    pub async fn provision(
        &self,
        task_id: &str,
        project_id: &str,
    ) -> Result<Workspace, WorkspaceError> {
        let host_path = self.paths.project_path(project_id);
        if !host_path.exists() {
            return Err(WorkspaceError::NotFound(project_id.to_string()));
        }

        let git_err = |source: GitError| WorkspaceError::GitOperationFailed {
            task_id: task_id.to_string(),
            project_id: project_id.to_string(),
            source,
        };

        // Probe the work tree; an untrusted repository gets one
        // safe.directory registration and a single retry.
        let origin = GitOps::new(&host_path);
        let probe = origin.work_tree_probe().await.map_err(git_err)?;
        if !probe.success() {
            if probe.stderr.contains("dubious ownership")
                || probe.stderr.contains("safe.directory")
            {
                warn!(
                    project_id,
                    "Repository untrusted by git, registering safe.directory and retrying"
                );
                origin.trust_repository().await.map_err(git_err)?;
                let retry = origin.work_tree_probe().await.map_err(git_err)?;
                if !retry.success() {
                    return Err(WorkspaceError::NotAGitRepo(host_path));
                }
            } else {
                return Err(WorkspaceError::NotAGitRepo(host_path));
            }
        }

        // Replace any stale output from an earlier attempt, and drop the
        // matching worktree registration so re-provisioning stays on the
        // worktree path.
        let output_path = self.paths.workspace_path(task_id, project_id);
        if output_path.exists() {
            debug!(path = %output_path.display(), "Removing stale workspace output");
            tokio::fs::remove_dir_all(&output_path).await?;
        }
        if let Err(e) = origin.worktree_prune().await {
            warn!(project_id, error = %e, "worktree prune failed");
        }
        if let Some(parent) = output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Best-effort remote refresh. No network or credentials is a normal
        // condition and must never abort provisioning.
        match origin.remotes().await {
            Ok(remotes) if !remotes.is_empty() => {
                if let Err(e) = origin.fetch_all().await {
                    warn!(project_id, error = %e, "Remote fetch failed, continuing with local state");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(project_id, error = %e, "Could not enumerate remotes"),
        }

        let branch_name = Self::branch_name(task_id);

        // Worktree first; shallow clone on any failure (branch collision,
        // locked refs). The clone's history is depth-1 only.
        let kind = match origin.worktree_add(&output_path, &branch_name).await {
            Ok(()) => WorkspaceKind::Worktree,
            Err(e) => {
                warn!(
                    task_id,
                    project_id,
                    error = %e,
                    "Worktree checkout failed, falling back to shallow clone"
                );
                let clone = GitOps::clone_shallow(&host_path, &output_path)
                    .await
                    .map_err(git_err)?;
                clone
                    .checkout_new_branch(&branch_name)
                    .await
                    .map_err(git_err)?;
                clone
                    .set_remote_url("origin", &host_path.to_string_lossy())
                    .await
                    .map_err(git_err)?;
                WorkspaceKind::Clone
            }
        };

        // Task-scoped commit identity, repository-local only.
        let checkout = GitOps::new(&output_path);
        checkout
            .set_identity(
                &format!("berth-{}", task_id),
                &format!("{}@tasks.berth.local", task_id),
            )
            .await
            .map_err(git_err)?;

        info!(
            task_id,
            project_id,
            branch = %branch_name,
            ?kind,
            "Workspace provisioned"
        );

        Ok(Workspace {
            task_id: task_id.to_string(),
            project_id: project_id.to_string(),
            host_path,
            output_path,
            branch_name,
            kind,
        })
    }

    /// Release a workspace at teardown. Best-effort: failures are logged,
    /// never raised.
    ///
    /// A registered worktree must be removed through the origin repository;
    /// deleting the directory alone would leave a dangling registration
    /// behind. Clone directories are simply deleted.
    pub async fn release(&self, workspace: &Workspace) {
        let origin = GitOps::new(&workspace.host_path);

        let output_canonical = std::fs::canonicalize(&workspace.output_path)
            .unwrap_or_else(|_| workspace.output_path.clone());
        let registered = match origin.worktree_list().await {
            Ok(paths) => paths.iter().any(|p| {
                p == &workspace.output_path
                    || std::fs::canonicalize(p)
                        .map(|c| c == output_canonical)
                        .unwrap_or(false)
            }),
            Err(e) => {
                warn!(
                    task_id = %workspace.task_id,
                    project_id = %workspace.project_id,
                    error = %e,
                    "Could not list worktrees during release"
                );
                false
            }
        };

        if registered {
            if let Err(e) = origin.worktree_remove(&workspace.output_path).await {
                warn!(
                    task_id = %workspace.task_id,
                    project_id = %workspace.project_id,
                    error = %e,
                    "Worktree removal failed"
                );
            }
        }

        if workspace.output_path.exists() {
            if let Err(e) = tokio::fs::remove_dir_all(&workspace.output_path).await {
                warn!(
                    task_id = %workspace.task_id,
                    project_id = %workspace.project_id,
                    error = %e,
                    "Workspace directory removal failed"
                );
            }
        }

        debug!(
            task_id = %workspace.task_id,
            project_id = %workspace.project_id,
            "Workspace released"
        );
    }

    /// Rediscover workspaces of a task from its on-disk output directory.
    ///
    /// Used by teardown when in-memory tracking is gone (process restart,
    /// crashed start). Branch names are unknown at this point; only the
    /// paths matter for release.
    pub async fn discover(&self, task_id: &str) -> Vec<Workspace> {
        let projects_dir = self.paths.task_output_path(task_id).join("projects");
        let mut found = Vec::new();

        let mut entries = match tokio::fs::read_dir(&projects_dir).await {
            Ok(entries) => entries,
            Err(_) => return found,
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let output_path = entry.path();
            if !output_path.is_dir() {
                continue;
            }
            let Some(project_id) = output_path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            // `.git` is a file for worktrees, a directory for clones
            let git_marker = output_path.join(".git");
            let kind = if git_marker.is_file() {
                WorkspaceKind::Worktree
            } else {
                WorkspaceKind::Clone
            };

            found.push(Workspace {
                task_id: task_id.to_string(),
                project_id: project_id.to_string(),
                host_path: self.paths.project_path(project_id),
                output_path,
                branch_name: String::new(),
                kind,
            });
        }

        found
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::GitOps;
    use std::path::Path;

    async fn seed_origin(projects_root: &Path, project_id: &str) -> GitOps {
        let origin_path = projects_root.join(project_id);
        std::fs::create_dir_all(&origin_path).unwrap();
        let git = GitOps::init(&origin_path, "main").await.unwrap();
        git.set_identity("berth", "test@berth.local").await.unwrap();
        std::fs::write(origin_path.join("README.md"), "seed").unwrap();
        git.add_all().await.unwrap();
        git.commit("Initial commit").await.unwrap();
        git
    }

    fn test_paths(root: &Path) -> PathSettings {
        PathSettings {
            projects_root: root.join("projects"),
            output_root: root.join("output"),
            templates_root: root.join("templates"),
            extensions_root: None,
        }
    }

    #[tokio::test]
    async fn test_provision_creates_worktree() {
        let root = tempfile::tempdir().unwrap();
        let origin = seed_origin(&root.path().join("projects"), "blog").await;
        let provisioner = WorkspaceProvisioner::new(test_paths(root.path()));

        let workspace = provisioner.provision("T-1", "blog").await.unwrap();

        assert_eq!(workspace.kind, WorkspaceKind::Worktree);
        assert!(workspace.branch_name.starts_with("task-T-1-"));
        assert!(workspace.output_path.join("README.md").exists());
        assert!(workspace
            .output_path
            .ends_with(Path::new("T-1/projects/blog")));

        // Origin gained exactly the new branch, nothing else changed
        assert!(origin
            .branch_exists(&workspace.branch_name)
            .await
            .unwrap());
        assert_eq!(origin.current_branch().await.unwrap(), "main");
    }

    #[tokio::test]
    async fn test_provision_missing_project() {
        let root = tempfile::tempdir().unwrap();
        let provisioner = WorkspaceProvisioner::new(test_paths(root.path()));

        let err = provisioner.provision("T-1", "ghost").await.unwrap_err();
        assert!(matches!(err, WorkspaceError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_provision_not_a_repo() {
        let root = tempfile::tempdir().unwrap();
        let paths = test_paths(root.path());
        std::fs::create_dir_all(paths.project_path("plain")).unwrap();
        let provisioner = WorkspaceProvisioner::new(paths);

        let err = provisioner.provision("T-1", "plain").await.unwrap_err();
        assert!(matches!(err, WorkspaceError::NotAGitRepo(_)));
    }

    #[tokio::test]
    async fn test_reprovision_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let origin = seed_origin(&root.path().join("projects"), "blog").await;
        let head_before = origin.head().await.unwrap();
        let provisioner = WorkspaceProvisioner::new(test_paths(root.path()));

        let first = provisioner.provision("T-1", "blog").await.unwrap();
        let second = provisioner.provision("T-1", "blog").await.unwrap();

        assert_eq!(first.output_path, second.output_path);
        assert!(second.output_path.join("README.md").exists());

        // Default branch tip untouched by either call
        assert_eq!(origin.head().await.unwrap(), head_before);
        assert_eq!(origin.current_branch().await.unwrap(), "main");

        // One branch per provisioning call, nothing deleted
        let branches = origin.branches().await.unwrap();
        assert!(branches.contains(&"main".to_string()));
        assert_eq!(
            branches.iter().filter(|b| b.starts_with("task-T-1-")).count(),
            2
        );
    }

    #[tokio::test]
    async fn test_concurrent_tasks_are_isolated() {
        let root = tempfile::tempdir().unwrap();
        seed_origin(&root.path().join("projects"), "app").await;
        let provisioner = WorkspaceProvisioner::new(test_paths(root.path()));

        let (a, b) = tokio::join!(
            provisioner.provision("T-1", "app"),
            provisioner.provision("T-2", "app"),
        );
        let a = a.unwrap();
        let b = b.unwrap();

        assert_ne!(a.output_path, b.output_path);
        assert_ne!(a.branch_name, b.branch_name);

        std::fs::write(a.output_path.join("only-a.txt"), "a").unwrap();
        assert!(!b.output_path.join("only-a.txt").exists());
    }

    #[tokio::test]
    async fn test_release_removes_worktree_registration() {
        let root = tempfile::tempdir().unwrap();
        let origin = seed_origin(&root.path().join("projects"), "blog").await;
        let provisioner = WorkspaceProvisioner::new(test_paths(root.path()));

        let workspace = provisioner.provision("T-1", "blog").await.unwrap();
        provisioner.release(&workspace).await;

        assert!(!workspace.output_path.exists());
        let registered = origin.worktree_list().await.unwrap();
        assert!(!registered.contains(&workspace.output_path));
    }

    #[tokio::test]
    async fn test_discover_finds_provisioned_workspaces() {
        let root = tempfile::tempdir().unwrap();
        seed_origin(&root.path().join("projects"), "blog").await;
        let provisioner = WorkspaceProvisioner::new(test_paths(root.path()));

        provisioner.provision("T-1", "blog").await.unwrap();
        let found = provisioner.discover("T-1").await;

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].project_id, "blog");
        assert_eq!(found[0].kind, WorkspaceKind::Worktree);
    }
}
