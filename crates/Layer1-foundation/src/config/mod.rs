//! Berth Config - 통합 설정
//!
//! 오케스트레이터 전체 설정을 하나의 JSON 문서로 관리

use crate::storage::JsonStore;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 설정 파일명
pub const BERTH_CONFIG_FILE: &str = "config.json";

// ============================================================================
// Path Settings
// ============================================================================

/// Fixed filesystem conventions
///
/// Origin repositories live under `projects_root/{project_id}`; per-task
/// workspaces under `output_root/{task_id}/projects/{project_id}`. These
/// layouts are relied upon by the worker image and must be preserved.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathSettings {
    /// Root directory holding origin project repositories
    #[serde(default = "default_projects_root")]
    pub projects_root: PathBuf,

    /// Root directory for per-task workspace checkouts
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,

    /// Root directory holding scaffold templates, one subdirectory per type
    #[serde(default = "default_templates_root")]
    pub templates_root: PathBuf,

    /// Optional host directory of custom extensions mounted read-only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions_root: Option<PathBuf>,
}

fn berth_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".berth")
}

fn default_projects_root() -> PathBuf {
    berth_home().join("projects")
}

fn default_output_root() -> PathBuf {
    berth_home().join("output")
}

fn default_templates_root() -> PathBuf {
    berth_home().join("templates")
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            projects_root: default_projects_root(),
            output_root: default_output_root(),
            templates_root: default_templates_root(),
            extensions_root: None,
        }
    }
}

impl PathSettings {
    /// Canonical on-disk location of a project's origin repository
    pub fn project_path(&self, project_id: &str) -> PathBuf {
        self.projects_root.join(project_id)
    }

    /// Deterministic workspace location for a (task, project) pair
    pub fn workspace_path(&self, task_id: &str, project_id: &str) -> PathBuf {
        self.output_root
            .join(task_id)
            .join("projects")
            .join(project_id)
    }

    /// Per-task output directory (mounted into the worker container)
    pub fn task_output_path(&self, task_id: &str) -> PathBuf {
        self.output_root.join(task_id)
    }
}

// ============================================================================
// Container Settings
// ============================================================================

/// 컨테이너 런타임 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSettings {
    /// Container runtime binary (docker or podman)
    #[serde(default = "default_runtime")]
    pub runtime: String,

    /// Worker image tag
    #[serde(default = "default_worker_image")]
    pub worker_image: String,

    /// Dockerfile used by `build_image`
    #[serde(default = "default_dockerfile")]
    pub dockerfile: PathBuf,

    /// Build context directory for the worker image
    #[serde(default = "default_build_context")]
    pub build_context: PathBuf,

    /// Named volume holding agent credentials
    #[serde(default = "default_credentials_volume")]
    pub credentials_volume: String,

    /// Optional docker network the worker attaches to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,

    /// Timezone passed to workers as TZ
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Launch workers attached to stdout instead of detached (debugging)
    #[serde(default)]
    pub attach_stdout: bool,
}

fn default_runtime() -> String {
    "docker".to_string()
}

fn default_worker_image() -> String {
    "berth-worker:latest".to_string()
}

fn default_dockerfile() -> PathBuf {
    PathBuf::from("docker/worker/Dockerfile")
}

fn default_build_context() -> PathBuf {
    PathBuf::from(".")
}

fn default_credentials_volume() -> String {
    "berth-credentials".to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl Default for ContainerSettings {
    fn default() -> Self {
        Self {
            runtime: default_runtime(),
            worker_image: default_worker_image(),
            dockerfile: default_dockerfile(),
            build_context: default_build_context(),
            credentials_volume: default_credentials_volume(),
            network: None,
            timezone: default_timezone(),
            attach_stdout: false,
        }
    }
}

// ============================================================================
// Controller Settings
// ============================================================================

/// 워커가 콜백하는 컨트롤러 주소
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerSettings {
    /// Hostname workers use to reach the controller
    #[serde(default = "default_controller_host")]
    pub host: String,

    /// Controller port
    #[serde(default = "default_controller_port")]
    pub port: u16,
}

fn default_controller_host() -> String {
    "host.docker.internal".to_string()
}

fn default_controller_port() -> u16 {
    3010
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            host: default_controller_host(),
            port: default_controller_port(),
        }
    }
}

// ============================================================================
// Berth Config (통합)
// ============================================================================

/// Berth 통합 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BerthConfig {
    /// 버전 (마이그레이션용)
    #[serde(default = "default_version")]
    pub version: u32,

    /// Filesystem layout
    #[serde(default)]
    pub paths: PathSettings,

    /// Container runtime
    #[serde(default)]
    pub container: ContainerSettings,

    /// Controller callback address
    #[serde(default)]
    pub controller: ControllerSettings,
}

fn default_version() -> u32 {
    1
}

impl BerthConfig {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Load / Save
    // ========================================================================

    /// 글로벌 설정 로드 (없으면 기본값)
    pub fn load() -> Result<Self> {
        let store = JsonStore::global()?;
        Ok(store.load_or_default(BERTH_CONFIG_FILE))
    }

    /// 글로벌 설정 저장
    pub fn save_global(&self) -> Result<()> {
        let store = JsonStore::global()?;
        store.save(BERTH_CONFIG_FILE, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BerthConfig::default();
        assert_eq!(config.container.runtime, "docker");
        assert_eq!(config.container.worker_image, "berth-worker:latest");
        assert_eq!(config.controller.port, 3010);
        assert!(!config.container.attach_stdout);
    }

    #[test]
    fn test_workspace_path_convention() {
        let paths = PathSettings {
            output_root: PathBuf::from("/out"),
            ..Default::default()
        };
        assert_eq!(
            paths.workspace_path("T-1", "blog"),
            PathBuf::from("/out/T-1/projects/blog")
        );
    }

    #[test]
    fn test_round_trip() {
        let config = BerthConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: BerthConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.container.worker_image, config.container.worker_image);
    }
}
