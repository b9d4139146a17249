//! Container Lifecycle Manager
//!
//! Builds the worker image, starts worker containers bound to provisioned
//! workspaces, and tears everything down again. Teardown and bulk cleanup
//! are best-effort by contract: they log every internal failure as a
//! structured event and still report success, because one stuck container
//! must never block the shutdown of its siblings.

use crate::container::{ContainerError, ContainerRuntime, ContainerSpec, RuntimeCli, VolumeMount};
use crate::monitor::LogMonitor;
use crate::naming;
use crate::task::{Task, TaskStatus};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use berth_core::workspace::{ReadinessGate, Workspace, WorkspaceProvisioner};
use berth_foundation::{BerthConfig, ProjectStore};
use futures::future;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Grace period before the runtime force-kills a stopping container.
/// Deliberately short: fast shutdown is preferred over graceful
/// in-container cleanup.
const STOP_GRACE_SECS: u64 = 2;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Error)]
pub enum StartError {
    #[error("Invalid task: {0}")]
    InvalidTask(String),

    #[error("Failed to launch worker for task {task_id}: {source}")]
    LaunchFailed {
        task_id: String,
        #[source]
        source: ContainerError,
    },
}

/// Result of a successful worker launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartedContainer {
    /// Detached launch; the runtime's real container id
    Detached { container_id: String },

    /// Attach-stdout debug launch; synthetic handle, no real id yet
    Attached { handle: String },
}

/// One running worker as reported by `list_running`
#[derive(Debug, Clone)]
pub struct RunningWorker {
    pub task_id: String,
    pub container_id: String,
    pub command: String,
}

/// Outcome of one cleanup strategy
#[derive(Debug, Clone)]
pub struct CleanupOutcome {
    /// Strategy name
    pub pass: &'static str,

    /// Containers the strategy acted on
    pub affected: usize,
}

// ============================================================================
// Manager
// ============================================================================

/// Lifecycle manager for worker containers
pub struct ContainerManager {
    config: BerthConfig,
    runtime: RuntimeCli,
    store: Arc<dyn ProjectStore>,
    provisioner: WorkspaceProvisioner,

    /// Workspaces created per task, released at stop
    workspaces: Arc<RwLock<HashMap<String, Vec<Workspace>>>>,

    /// Container name assigned per task
    containers: Arc<RwLock<HashMap<String, String>>>,
}

impl ContainerManager {
    pub fn new(config: BerthConfig, store: Arc<dyn ProjectStore>) -> Self {
        let runtime = RuntimeCli::new(ContainerRuntime::from_name(&config.container.runtime));
        let provisioner = WorkspaceProvisioner::new(config.paths.clone());

        Self {
            config,
            runtime,
            store,
            provisioner,
            workspaces: Arc::new(RwLock::new(HashMap::new())),
            containers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Underlying runtime CLI (shared with the sidecar runner)
    pub fn runtime(&self) -> &RuntimeCli {
        &self.runtime
    }

    // ========================================================================
    // Image build
    // ========================================================================

    /// Build the worker image. Resolves true/false on the build's exit
    /// status and never errors.
    pub async fn build_image(&self, tag: Option<&str>, no_cache: bool, verbose: bool) -> bool {
        let tag = tag.unwrap_or(&self.config.container.worker_image);
        let dockerfile = &self.config.container.dockerfile;
        let context = &self.config.container.build_context;

        if !dockerfile.exists() {
            error!(
                dockerfile = %dockerfile.display(),
                "Worker Dockerfile not found, cannot build image"
            );
            return false;
        }

        info!(tag, no_cache, "Building worker image");
        let result = if verbose {
            self.runtime
                .build_streaming(tag, Some(dockerfile), context, no_cache)
                .await
        } else {
            self.runtime
                .build_quiet(tag, Some(dockerfile), context, no_cache)
                .await
        };

        match result {
            Ok(true) => {
                info!(tag, "Worker image built");
                true
            }
            Ok(false) => {
                error!(tag, "Worker image build failed");
                false
            }
            Err(e) => {
                error!(tag, error = %e, "Worker image build could not run");
                false
            }
        }
    }

    // ========================================================================
    // Start
    // ========================================================================

    /// Start the worker container for a task.
    ///
    /// Projects that are unknown, never become ready, or fail provisioning
    /// are dropped with a logged cause; one bad repository must not block an
    /// otherwise runnable task. Assigns `task.container_name`.
    pub async fn start_container(&self, task: &mut Task) -> Result<StartedContainer, StartError> {
        task.validate().map_err(StartError::InvalidTask)?;

        let candidates = self.resolve_project_set(task).await;
        let eligible = self.gate_projects(task, candidates).await;
        let workspaces = self.provision_workspaces(&task.task_id, eligible).await;
        let final_ids: Vec<String> = workspaces.iter().map(|w| w.project_id.clone()).collect();

        {
            let mut tracked = self.workspaces.write().await;
            tracked.insert(task.task_id.clone(), workspaces);
        }

        let spec = self.compose_spec(task, &final_ids);
        task.container_name = Some(spec.name.clone());
        {
            let mut containers = self.containers.write().await;
            containers.insert(task.task_id.clone(), spec.name.clone());
        }

        let launch_err = |source: ContainerError| StartError::LaunchFailed {
            task_id: task.task_id.clone(),
            source,
        };

        if self.config.container.attach_stdout {
            self.runtime.spawn_attached(&spec).map_err(launch_err)?;
            task.status = TaskStatus::Running;
            info!(task_id = %task.task_id, projects = ?final_ids, "Worker started (attached)");
            Ok(StartedContainer::Attached {
                handle: format!("attached-{}", task.task_id),
            })
        } else {
            let container_id = self.runtime.run_detached(&spec).await.map_err(launch_err)?;
            task.status = TaskStatus::Running;
            info!(
                task_id = %task.task_id,
                container_id = %container_id,
                projects = ?final_ids,
                "Worker started"
            );
            Ok(StartedContainer::Detached { container_id })
        }
    }

    /// Working project set: all known projects for the core task, otherwise
    /// the requested ids intersected with known ids, deduplicated in order.
    async fn resolve_project_set(&self, task: &Task) -> Vec<String> {
        let known = match self.store.all_project_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(task_id = %task.task_id, error = %e, "Project store unavailable");
                Vec::new()
            }
        };

        if task.is_core_task() {
            return known;
        }

        let known: HashSet<String> = known.into_iter().collect();
        let mut seen = HashSet::new();
        task.project_ids
            .iter()
            .filter(|id| {
                if !known.contains(*id) {
                    warn!(task_id = %task.task_id, project_id = %id, "Unknown project requested, dropping");
                    return false;
                }
                seen.insert((*id).clone())
            })
            .cloned()
            .collect()
    }

    /// Readiness-gate the candidate set; timed-out projects are dropped
    async fn gate_projects(&self, task: &Task, candidates: Vec<String>) -> Vec<String> {
        let checks = candidates.iter().map(|id| {
            ReadinessGate::await_ready(
                self.store.as_ref(),
                id,
                task.is_core_task(),
                task.tool,
            )
        });
        let results = future::join_all(checks).await;

        candidates
            .into_iter()
            .zip(results)
            .filter_map(|(id, ready)| {
                if ready {
                    Some(id)
                } else {
                    warn!(task_id = %task.task_id, project_id = %id, "Project not ready, dropping from this run");
                    None
                }
            })
            .collect()
    }

    /// Fan-out provisioning; failures are isolated per project
    async fn provision_workspaces(
        &self,
        task_id: &str,
        project_ids: Vec<String>,
    ) -> Vec<Workspace> {
        let attempts = project_ids
            .iter()
            .map(|id| self.provisioner.provision(task_id, id));
        let results = future::join_all(attempts).await;

        let mut workspaces = Vec::new();
        for (project_id, result) in project_ids.iter().zip(results) {
            match result {
                Ok(workspace) => workspaces.push(workspace),
                Err(e) => warn!(
                    task_id,
                    project_id = %project_id,
                    error = %e,
                    "Workspace provisioning failed, dropping project"
                ),
            }
        }
        workspaces
    }

    /// Compose the worker container's environment and mounts.
    ///
    /// The command text is transported base64-encoded: it must never
    /// participate in shell parsing, on the host or in the container.
    fn compose_spec(&self, task: &Task, project_ids: &[String]) -> ContainerSpec {
        let container = &self.config.container;
        let controller = &self.config.controller;

        let mut port_pairs: Vec<String> = task
            .project_ports
            .iter()
            .map(|(id, port)| format!("{}:{}", id, port))
            .collect();
        port_pairs.sort();

        let mut spec = ContainerSpec::new(
            &container.worker_image,
            naming::worker_container_name(&task.task_id),
        )
        .with_env("PROCESS_ID", &task.task_id)
        .with_env("PROCESS_TOOL", task.tool.as_str())
        .with_env("PROCESS_COMMAND", BASE64.encode(task.command.as_bytes()))
        .with_env("CONTROLLER_HOST", &controller.host)
        .with_env("CONTROLLER_PORT", controller.port.to_string())
        .with_env("TZ", &container.timezone)
        .with_env("PROCESS_PROJECTS", project_ids.join(","))
        .with_env("PROCESS_PROJECT_PORTS", port_pairs.join(","))
        .with_volume(VolumeMount::volume(
            &container.credentials_volume,
            "/home/worker/.credentials",
        ))
        .with_volume(VolumeMount::bind(
            self.config.paths.task_output_path(&task.task_id),
            "/workspace",
        ))
        .with_working_dir("/workspace")
        .with_network(container.network.clone());

        if let Some(extensions) = &self.config.paths.extensions_root {
            spec = spec.with_volume(
                VolumeMount::bind(extensions, "/opt/berth/extensions").read_only(),
            );
        }

        for tz_file in ["/etc/localtime", "/etc/timezone"] {
            if Path::new(tz_file).exists() {
                spec = spec.with_volume(VolumeMount::bind(tz_file, tz_file).read_only());
            }
        }

        if container.attach_stdout {
            spec = spec.attached();
        }

        spec
    }

    // ========================================================================
    // Stop
    // ========================================================================

    /// Stop a task's worker and release everything it owns.
    ///
    /// Never raises: a missing container, an unreachable runtime or a stuck
    /// worktree are each logged and treated as handled, so one failing
    /// teardown cannot block the shutdown of sibling tasks. Safe to call at
    /// any point, including mid-start.
    pub async fn stop_container(&self, task_id: &str) -> bool {
        let name = naming::worker_container_name(task_id);

        match self.runtime.exists(&name).await {
            Ok(true) => {
                if let Err(e) = self.runtime.stop(&name, STOP_GRACE_SECS).await {
                    warn!(task_id, container = %name, error = %e, "Container stop failed");
                }
                if let Err(e) = self.runtime.remove(&name, true).await {
                    warn!(task_id, container = %name, error = %e, "Container removal failed");
                }
            }
            Ok(false) => {
                debug!(task_id, "No worker container present, treating stop as success");
            }
            Err(e) => {
                warn!(task_id, error = %e, "Could not query container state");
            }
        }

        // Release workspaces: tracked if we started this task in-process,
        // rediscovered from disk otherwise. A registered worktree must be
        // removed through its origin; plain directory deletion would leave
        // a dangling registration behind.
        let tracked = { self.workspaces.write().await.remove(task_id) };
        let workspaces = match tracked {
            Some(list) if !list.is_empty() => list,
            _ => self.provisioner.discover(task_id).await,
        };
        for workspace in &workspaces {
            self.provisioner.release(workspace).await;
        }

        // Best-effort sidecar stop, by naming convention
        let prefix = naming::sidecar_task_prefix(task_id);
        match self.runtime.ps_names(&[("name", &prefix)], true).await {
            Ok(names) => {
                let stops = names.iter().map(|name| self.stop_and_remove(name));
                future::join_all(stops).await;
            }
            Err(e) => {
                debug!(task_id, error = %e, "Could not enumerate sidecar containers");
            }
        }

        self.containers.write().await.remove(task_id);
        info!(task_id, workspaces = workspaces.len(), "Task torn down");
        true
    }

    async fn stop_and_remove(&self, name: &str) {
        if let Err(e) = self.runtime.stop(name, STOP_GRACE_SECS).await {
            debug!(container = %name, error = %e, "Stop failed during cleanup");
        }
        if let Err(e) = self.runtime.remove(name, true).await {
            debug!(container = %name, error = %e, "Removal failed during cleanup");
        }
    }

    // ========================================================================
    // Bulk cleanup
    // ========================================================================

    /// Escalating sweep for process-wide shutdown. Always returns true:
    /// cleanup is advisory best-effort, and shutdown proceeds regardless.
    pub async fn cleanup_all(&self) -> bool {
        self.cleanup_report().await;
        true
    }

    /// The cleanup pipeline: ordered, individually-fallible strategies.
    /// Work within a pass runs in parallel; passes run in sequence.
    pub async fn cleanup_report(&self) -> Vec<CleanupOutcome> {
        let mut outcomes = Vec::new();

        let passes: [(&'static str, Result<usize, ContainerError>); 3] = [
            ("worker-name filter", self.sweep_by_name().await),
            ("image ancestry", self.sweep_by_ancestor().await),
            ("individual enumeration", self.sweep_individual().await),
        ];

        for (pass, result) in passes {
            match result {
                Ok(0) => {
                    info!(pass, "Cleanup pass: no containers");
                    outcomes.push(CleanupOutcome { pass, affected: 0 });
                }
                Ok(affected) => {
                    info!(pass, affected, "Cleanup pass done");
                    outcomes.push(CleanupOutcome { pass, affected });
                }
                Err(e) => {
                    warn!(pass, error = %e, "Cleanup pass failed");
                    outcomes.push(CleanupOutcome { pass, affected: 0 });
                }
            }
        }

        self.verify_clean().await;

        self.workspaces.write().await.clear();
        self.containers.write().await.clear();

        outcomes
    }

    /// Pass 1: everything matching the worker naming convention
    async fn sweep_by_name(&self) -> Result<usize, ContainerError> {
        let names = self
            .runtime
            .ps_names(&[("name", naming::WORKER_PREFIX)], true)
            .await?;
        let stops = names.iter().map(|name| self.stop_and_remove(name));
        future::join_all(stops).await;
        Ok(names.len())
    }

    /// Pass 2: anything sharing the worker image ancestry
    async fn sweep_by_ancestor(&self) -> Result<usize, ContainerError> {
        let filter = format!("ancestor={}", self.config.container.worker_image);
        let output = self
            .runtime
            .exec(&["ps", "-a", "-q", "--filter", &filter])
            .await?;
        if !output.success() {
            return Err(ContainerError::CommandFailed {
                verb: "ps".to_string(),
                stderr: output.stderr,
            });
        }

        let ids: Vec<String> = output
            .stdout
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect();
        let stops = ids.iter().map(|id| self.stop_and_remove(id));
        future::join_all(stops).await;
        Ok(ids.len())
    }

    /// Pass 3: explicit enumeration of remaining convention-matching names
    async fn sweep_individual(&self) -> Result<usize, ContainerError> {
        let all = self.runtime.ps_names(&[], true).await?;
        let matching: Vec<String> = all
            .into_iter()
            .filter(|name| naming::parse_worker_name(name).is_some())
            .collect();
        let stops = matching.iter().map(|name| self.stop_and_remove(name));
        future::join_all(stops).await;
        Ok(matching.len())
    }

    /// Final verification: log stragglers and attempt one last forced removal
    async fn verify_clean(&self) {
        match self
            .runtime
            .ps_names(&[("name", naming::WORKER_PREFIX)], true)
            .await
        {
            Ok(names) if names.is_empty() => {
                debug!("Cleanup verification: no containers remain");
            }
            Ok(names) => {
                for name in names {
                    error!(container = %name, "Container survived cleanup, forcing removal");
                    if let Err(e) = self.runtime.remove(&name, true).await {
                        error!(container = %name, error = %e, "Forced removal failed");
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Cleanup verification could not run");
            }
        }
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Enumerate running workers, recovering task id and command.
    /// Containers outside the naming convention are skipped.
    pub async fn list_running(&self) -> Vec<RunningWorker> {
        let names = match self
            .runtime
            .ps_names(
                &[("name", naming::WORKER_PREFIX), ("status", "running")],
                false,
            )
            .await
        {
            Ok(names) => names,
            Err(e) => {
                warn!(error = %e, "Could not enumerate running workers");
                return Vec::new();
            }
        };

        let mut workers = Vec::new();
        for name in names {
            let Some(task_id) = naming::parse_worker_name(&name) else {
                debug!(container = %name, "Skipping container outside naming convention");
                continue;
            };

            let container_id = self
                .runtime
                .container_id(&name)
                .await
                .unwrap_or_default();
            let command = match self.runtime.inspect_env(&name).await {
                Ok(env) => decode_command_env(&env).unwrap_or_default(),
                Err(e) => {
                    debug!(container = %name, error = %e, "Could not inspect container env");
                    String::new()
                }
            };

            workers.push(RunningWorker {
                task_id: task_id.to_string(),
                container_id,
                command,
            });
        }
        workers
    }

    /// Attach the log follower to a task's worker container
    pub fn monitor_logs(
        &self,
        task_id: &str,
        on_line: impl Fn(String) + Send + Sync + 'static,
    ) -> Result<LogMonitor, ContainerError> {
        let name = naming::worker_container_name(task_id);
        let child = self.runtime.spawn_logs_follow(&name, 100)?;
        Ok(LogMonitor::spawn(child, on_line))
    }
}

/// Recover the original command from a container's env entries
fn decode_command_env(env: &[String]) -> Option<String> {
    env.iter()
        .find_map(|line| line.strip_prefix("PROCESS_COMMAND="))
        .and_then(|encoded| BASE64.decode(encoded).ok())
        .and_then(|bytes| String::from_utf8(bytes).ok())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use berth_foundation::config::PathSettings;
    use berth_foundation::{MemoryProjectStore, Project, Tool};
    use std::path::Path;

    fn test_manager(root: &Path, store: Arc<MemoryProjectStore>) -> ContainerManager {
        let mut config = BerthConfig::default();
        config.paths = PathSettings {
            projects_root: root.join("projects"),
            output_root: root.join("output"),
            templates_root: root.join("templates"),
            extensions_root: None,
        };
        ContainerManager::new(config, store)
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_task() {
        let root = tempfile::tempdir().unwrap();
        let manager = test_manager(root.path(), Arc::new(MemoryProjectStore::new()));

        let mut task = Task::new("AI-1", "", Tool::Code);
        let err = manager.start_container(&mut task).await.unwrap_err();
        assert!(matches!(err, StartError::InvalidTask(_)));

        let mut task = Task::new("bad id!", "cmd", Tool::Code);
        let err = manager.start_container(&mut task).await.unwrap_err();
        assert!(matches!(err, StartError::InvalidTask(_)));
    }

    #[tokio::test]
    async fn test_core_task_gets_all_known_projects() {
        let root = tempfile::tempdir().unwrap();
        let store = Arc::new(
            MemoryProjectStore::with_projects([
                Project::existing("alpha"),
                Project::existing("beta"),
            ])
            .await,
        );
        let manager = test_manager(root.path(), store);

        let task = Task::new("AI-1", "cmd", Tool::Code).with_core_task_id("AI-1");
        let resolved = manager.resolve_project_set(&task).await;
        assert_eq!(resolved, vec!["alpha", "beta"]);
    }

    #[tokio::test]
    async fn test_requested_projects_intersected_and_deduped() {
        let root = tempfile::tempdir().unwrap();
        let store = Arc::new(
            MemoryProjectStore::with_projects([Project::existing("blog")]).await,
        );
        let manager = test_manager(root.path(), store);

        let task = Task::new("AI-1", "cmd", Tool::Code).with_projects(vec![
            "blog".to_string(),
            "unknown".to_string(),
            "blog".to_string(),
        ]);
        let resolved = manager.resolve_project_set(&task).await;
        assert_eq!(resolved, vec!["blog"]);
    }

    #[tokio::test]
    async fn test_compose_spec_env() {
        let root = tempfile::tempdir().unwrap();
        let manager = test_manager(root.path(), Arc::new(MemoryProjectStore::new()));

        let mut task = Task::new("AI-1", "write a blog post", Tool::Code);
        task.project_ports.insert("blog".to_string(), 49153);
        let spec =
            manager.compose_spec(&task, &["blog".to_string(), "shared".to_string()]);

        assert_eq!(spec.name, "berth-worker-AI-1");
        let env: HashMap<_, _> = spec.env.iter().cloned().collect();
        assert_eq!(env["PROCESS_ID"], "AI-1");
        assert_eq!(env["PROCESS_PROJECTS"], "blog,shared");
        assert_eq!(env["PROCESS_PROJECT_PORTS"], "blog:49153");
        assert_eq!(env["TZ"], "UTC");

        // Command is transported opaquely and decodes back to the original
        let decoded = BASE64.decode(&env["PROCESS_COMMAND"]).unwrap();
        assert_eq!(String::from_utf8(decoded).unwrap(), "write a blog post");
    }

    #[tokio::test]
    async fn test_stop_container_never_raises() {
        let root = tempfile::tempdir().unwrap();
        let manager = test_manager(root.path(), Arc::new(MemoryProjectStore::new()));

        // No container, no workspaces, possibly no runtime at all
        assert!(manager.stop_container("AI-none").await);
        assert!(manager.stop_container("AI-none").await);
    }

    #[tokio::test]
    async fn test_cleanup_all_always_succeeds() {
        let root = tempfile::tempdir().unwrap();
        let manager = test_manager(root.path(), Arc::new(MemoryProjectStore::new()));

        assert!(manager.cleanup_all().await);
        assert!(manager.cleanup_all().await);
    }

    #[test]
    fn test_decode_command_env() {
        let env = vec![
            "PATH=/usr/bin".to_string(),
            format!("PROCESS_COMMAND={}", BASE64.encode("hello world")),
        ];
        assert_eq!(decode_command_env(&env), Some("hello world".to_string()));

        assert_eq!(decode_command_env(&["PATH=/usr/bin".to_string()]), None);
        assert_eq!(
            decode_command_env(&["PROCESS_COMMAND=not-base64!!".to_string()]),
            None
        );
    }
}
