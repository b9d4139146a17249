//! Sidecar Project Runner
//!
//! Runs an auxiliary per-project container (e.g. a preview server) for each
//! workspace that ships its own Dockerfile, and reports back the published
//! host port. Discovery is by convention: a `Dockerfile` at the workspace
//! root. Projects without one are silently skipped.

use crate::container::RuntimeCli;
use crate::naming;
use berth_foundation::config::PathSettings;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Builds and runs per-project sidecar containers
pub struct SidecarRunner {
    paths: PathSettings,
    runtime: RuntimeCli,
}

impl SidecarRunner {
    pub fn new(paths: PathSettings, runtime: RuntimeCli) -> Self {
        Self { paths, runtime }
    }

    /// Run a sidecar for every eligible project workspace of a task.
    ///
    /// Per-project failures (build, run, port inspection) are logged and the
    /// project is omitted from the returned mapping; the remaining projects
    /// are still processed.
    pub async fn run_project_containers(
        &self,
        task_id: &str,
        project_ids: &[String],
    ) -> HashMap<String, u16> {
        let mut ports = HashMap::new();

        for project_id in project_ids {
            let workspace = self.paths.workspace_path(task_id, project_id);
            if !workspace.join("Dockerfile").exists() {
                debug!(task_id, project_id = %project_id, "No Dockerfile, skipping sidecar");
                continue;
            }

            match self.run_one(task_id, project_id).await {
                Some(port) => {
                    info!(task_id, project_id = %project_id, port, "Sidecar running");
                    ports.insert(project_id.clone(), port);
                }
                None => {
                    warn!(task_id, project_id = %project_id, "Sidecar failed, omitting project");
                }
            }
        }

        ports
    }

    async fn run_one(&self, task_id: &str, project_id: &str) -> Option<u16> {
        let workspace = self.paths.workspace_path(task_id, project_id);
        let tag = naming::sidecar_image_tag(project_id, task_id);
        let name = naming::sidecar_container_name(task_id, project_id);

        match self.runtime.build_quiet(&tag, None, &workspace, false).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(task_id, project_id, tag = %tag, "Sidecar image build failed");
                return None;
            }
            Err(e) => {
                warn!(task_id, project_id, error = %e, "Sidecar image build could not run");
                return None;
            }
        }

        // Replace any leftover sidecar from a previous run of this task
        if let Ok(true) = self.runtime.exists(&name).await {
            if let Err(e) = self.runtime.remove(&name, true).await {
                debug!(container = %name, error = %e, "Stale sidecar removal failed");
            }
        }

        let spec = crate::container::ContainerSpec::new(&tag, &name)
            .auto_remove()
            .publish_all();
        if let Err(e) = self.runtime.run_detached(&spec).await {
            warn!(task_id, project_id, error = %e, "Sidecar launch failed");
            return None;
        }

        match self.runtime.published_port(&name).await {
            Ok(Some(port)) => Some(port),
            Ok(None) => {
                warn!(task_id, project_id, "Sidecar exposes no published port");
                None
            }
            Err(e) => {
                warn!(task_id, project_id, error = %e, "Sidecar port inspection failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn test_paths(root: &Path) -> PathSettings {
        PathSettings {
            projects_root: root.join("projects"),
            output_root: root.join("output"),
            templates_root: root.join("templates"),
            extensions_root: None,
        }
    }

    #[tokio::test]
    async fn test_projects_without_dockerfile_are_skipped() {
        let root = tempfile::tempdir().unwrap();
        let paths = test_paths(root.path());

        // Workspace exists but carries no Dockerfile
        std::fs::create_dir_all(paths.workspace_path("AI-1", "blog")).unwrap();

        let runner = SidecarRunner::new(paths, RuntimeCli::docker());
        let ports = runner
            .run_project_containers("AI-1", &["blog".to_string(), "missing".to_string()])
            .await;

        assert!(ports.is_empty());
    }
}
