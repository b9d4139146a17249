//! Project Scaffolder
//!
//! Creates a brand-new generated project: repository root, initial identity,
//! template seeding with placeholder substitution, initial commit. On any
//! failure after directory creation the directory is removed again, so a
//! half-built project is never left on disk.

use crate::git::{GitError, GitOps};
use berth_foundation::config::PathSettings;
use berth_foundation::{HistoryEntry, ProjectStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Placeholder replaced with the project's one-line description
pub const SHORT_DESCRIPTION_PLACEHOLDER: &str = "{{short_description}}";

/// Placeholder replaced with the project's long description
pub const LONG_DESCRIPTION_PLACEHOLDER: &str = "{{long_description}}";

/// Default branch for scaffolded repositories
const DEFAULT_BRANCH: &str = "main";

/// Commit identity for scaffolded repositories (repository-scoped)
const SCAFFOLD_AUTHOR: (&str, &str) = ("berth", "scaffold@berth.local");

#[derive(Debug, Error)]
pub enum ScaffoldError {
    #[error("Project not found in store: {0}")]
    NotFoundInStore(String),

    #[error("Project directory already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("Template copy failed for {project_id}: {message}")]
    TemplateCopyFailed { project_id: String, message: String },

    #[error("Git initialization failed for {project_id}: {source}")]
    GitInitFailed {
        project_id: String,
        #[source]
        source: GitError,
    },

    #[error(transparent)]
    Store(#[from] berth_foundation::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Scaffolds generated projects from templates
pub struct ProjectScaffolder {
    paths: PathSettings,
    store: Arc<dyn ProjectStore>,
}

impl ProjectScaffolder {
    pub fn new(paths: PathSettings, store: Arc<dyn ProjectStore>) -> Self {
        Self { paths, store }
    }

    /// Scaffold `project_id` into `projects_root/{project_id}`.
    ///
    /// A colliding directory is a caller error: project ids are stable
    /// identifiers chosen by the caller, so nothing is auto-renamed.
    pub async fn scaffold(&self, project_id: &str) -> Result<(), ScaffoldError> {
        let project = self
            .store
            .get_project(project_id)
            .await?
            .ok_or_else(|| ScaffoldError::NotFoundInStore(project_id.to_string()))?;

        let target = self.paths.project_path(project_id);
        if target.exists() {
            return Err(ScaffoldError::AlreadyExists(target));
        }
        std::fs::create_dir_all(&target)?;

        // Everything past this point rolls the directory back on failure.
        match self.scaffold_inner(&project, &target).await {
            Ok(()) => {
                info!(project_id, "Project scaffolded");
                Ok(())
            }
            Err(e) => {
                if let Err(rm) = std::fs::remove_dir_all(&target) {
                    warn!(project_id, error = %rm, "Rollback of project directory failed");
                }
                Err(e)
            }
        }
    }

    async fn scaffold_inner(
        &self,
        project: &berth_foundation::Project,
        target: &Path,
    ) -> Result<(), ScaffoldError> {
        let project_id = project.project_id.as_str();
        let git_err = |source: GitError| ScaffoldError::GitInitFailed {
            project_id: project_id.to_string(),
            source,
        };

        let git = GitOps::init(target, DEFAULT_BRANCH).await.map_err(git_err)?;
        git.set_identity(SCAFFOLD_AUTHOR.0, SCAFFOLD_AUTHOR.1)
            .await
            .map_err(git_err)?;

        let template = self.resolve_template(&project.project_type, project_id)?;
        let substitutions = [
            (
                SHORT_DESCRIPTION_PLACEHOLDER,
                project
                    .simple_description
                    .clone()
                    .unwrap_or_else(|| project_id.to_string()),
            ),
            (
                LONG_DESCRIPTION_PLACEHOLDER,
                project
                    .detailed_description
                    .clone()
                    .unwrap_or_else(|| project_id.to_string()),
            ),
        ];
        copy_template(&template, target, &substitutions).map_err(|e| {
            ScaffoldError::TemplateCopyFailed {
                project_id: project_id.to_string(),
                message: e.to_string(),
            }
        })?;

        git.add_all().await.map_err(git_err)?;
        git.commit("Initial commit").await.map_err(git_err)?;

        self.store
            .add_history(project_id, HistoryEntry::new("Project scaffolded"))
            .await?;

        let mut updated = project.clone();
        updated.is_ready = true;
        self.store.update_project(&updated).await?;

        Ok(())
    }

    /// Template directory for a project type, falling back to `default`
    fn resolve_template(
        &self,
        project_type: &str,
        project_id: &str,
    ) -> Result<PathBuf, ScaffoldError> {
        let named = self.paths.templates_root.join(project_type);
        if named.is_dir() {
            return Ok(named);
        }

        let fallback = self.paths.templates_root.join("default");
        if fallback.is_dir() {
            debug!(
                project_id,
                project_type, "Named template absent, using default template"
            );
            return Ok(fallback);
        }

        Err(ScaffoldError::TemplateCopyFailed {
            project_id: project_id.to_string(),
            message: format!(
                "no template for type '{}' and no default template under {}",
                project_type,
                self.paths.templates_root.display()
            ),
        })
    }
}

/// Whether placeholders are substituted in this file.
///
/// Only Markdown and manifest files are rewritten; everything else is
/// copied byte-for-byte.
fn is_substitutable(path: &Path) -> bool {
    if path.extension().and_then(|e| e.to_str()) == Some("md") {
        return true;
    }
    matches!(
        path.file_name().and_then(|n| n.to_str()),
        Some("package.json") | Some("Cargo.toml") | Some("pyproject.toml")
    )
}

fn copy_template(
    src: &Path,
    dst: &Path,
    substitutions: &[(&str, String)],
) -> std::io::Result<()> {
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let name = entry.file_name();
        if name == ".git" {
            continue;
        }
        let dst_path = dst.join(&name);

        if src_path.is_dir() {
            std::fs::create_dir_all(&dst_path)?;
            copy_template(&src_path, &dst_path, substitutions)?;
        } else if is_substitutable(&src_path) {
            let mut content = std::fs::read_to_string(&src_path)?;
            for (placeholder, value) in substitutions {
                content = content.replace(placeholder, value);
            }
            std::fs::write(&dst_path, content)?;
        } else {
            std::fs::copy(&src_path, &dst_path)?;
        }
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use berth_foundation::{MemoryProjectStore, Project};

    fn test_paths(root: &Path) -> PathSettings {
        PathSettings {
            projects_root: root.join("projects"),
            output_root: root.join("output"),
            templates_root: root.join("templates"),
            extensions_root: None,
        }
    }

    fn seed_template(templates_root: &Path, name: &str) {
        let dir = templates_root.join(name);
        std::fs::create_dir_all(dir.join("src")).unwrap();
        std::fs::write(
            dir.join("README.md"),
            "# {{short_description}}\n\n{{long_description}}\n",
        )
        .unwrap();
        std::fs::write(dir.join("src/run.sh"), "echo {{short_description}}\n").unwrap();
    }

    async fn store_with(project: Project) -> Arc<MemoryProjectStore> {
        Arc::new(MemoryProjectStore::with_projects([project]).await)
    }

    #[tokio::test]
    async fn test_scaffold_success() {
        let root = tempfile::tempdir().unwrap();
        let paths = test_paths(root.path());
        seed_template(&paths.templates_root, "web");

        let project = Project::generated("app", "web")
            .with_descriptions("My app", "A longer description of my app");
        let store = store_with(project).await;
        let scaffolder = ProjectScaffolder::new(paths.clone(), store.clone());

        scaffolder.scaffold("app").await.unwrap();

        let target = paths.project_path("app");
        let readme = std::fs::read_to_string(target.join("README.md")).unwrap();
        assert!(readme.contains("# My app"));
        assert!(readme.contains("A longer description of my app"));

        // Non-manifest files keep their placeholders untouched
        let script = std::fs::read_to_string(target.join("src/run.sh")).unwrap();
        assert!(script.contains("{{short_description}}"));

        // Exactly one commit on the deterministic default branch
        let git = GitOps::new(&target);
        assert_eq!(git.current_branch().await.unwrap(), "main");
        assert_eq!(git.commit_count().await.unwrap(), 1);

        // Store updated: ready flag set, one history entry
        let stored = store.get_project("app").await.unwrap().unwrap();
        assert!(stored.is_ready);
        assert_eq!(stored.history.len(), 1);
    }

    #[tokio::test]
    async fn test_scaffold_falls_back_to_default_template() {
        let root = tempfile::tempdir().unwrap();
        let paths = test_paths(root.path());
        seed_template(&paths.templates_root, "default");

        let store = store_with(Project::generated("app", "nonexistent-type")).await;
        let scaffolder = ProjectScaffolder::new(paths.clone(), store);

        scaffolder.scaffold("app").await.unwrap();
        assert!(paths.project_path("app").join("README.md").exists());
    }

    #[tokio::test]
    async fn test_scaffold_unknown_project() {
        let root = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryProjectStore::new());
        let scaffolder = ProjectScaffolder::new(test_paths(root.path()), store);

        let err = scaffolder.scaffold("ghost").await.unwrap_err();
        assert!(matches!(err, ScaffoldError::NotFoundInStore(_)));
    }

    #[tokio::test]
    async fn test_scaffold_collision() {
        let root = tempfile::tempdir().unwrap();
        let paths = test_paths(root.path());
        std::fs::create_dir_all(paths.project_path("app")).unwrap();

        let store = store_with(Project::generated("app", "web")).await;
        let scaffolder = ProjectScaffolder::new(paths, store);

        let err = scaffolder.scaffold("app").await.unwrap_err();
        assert!(matches!(err, ScaffoldError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_scaffold_rolls_back_on_template_failure() {
        let root = tempfile::tempdir().unwrap();
        let paths = test_paths(root.path());
        // No template directories at all: copy step must fail
        std::fs::create_dir_all(&paths.templates_root).unwrap();

        let store = store_with(Project::generated("app", "web")).await;
        let scaffolder = ProjectScaffolder::new(paths.clone(), store.clone());

        let err = scaffolder.scaffold("app").await.unwrap_err();
        assert!(matches!(err, ScaffoldError::TemplateCopyFailed { .. }));

        // Directory rolled back, readiness unchanged
        assert!(!paths.project_path("app").exists());
        let stored = store.get_project("app").await.unwrap().unwrap();
        assert!(!stored.is_ready);
        assert!(stored.history.is_empty());
    }
}
