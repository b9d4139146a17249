//! Task definition
//!
//! One task = one request to run an agent command inside a worker container,
//! against zero or more project workspaces.

use berth_foundation::strings::{is_valid_project_id, is_valid_task_id};
use berth_foundation::Tool;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Task lifecycle state, mutated only by the lifecycle manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, container not yet launched
    #[default]
    Pending,

    /// Worker container launched
    Running,

    /// Worker stopped and workspaces released
    Stopped,
}

/// A task to be executed in a worker container
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Opaque identifier, globally unique per run
    pub task_id: String,

    /// Free-text instruction passed into the container (opaque transport,
    /// never interpolated into a shell string)
    pub command: String,

    /// Worker tool selecting the behavior inside the container
    pub tool: Tool,

    /// Id of the privileged "core" run, if any. When it equals `task_id`,
    /// this task is granted access to all known projects.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub core_task_id: Option<String>,

    /// Requested projects, in submission order
    #[serde(default)]
    pub project_ids: Vec<String>,

    /// projectId -> host port, populated after sidecar containers start
    #[serde(default)]
    pub project_ports: HashMap<String, u16>,

    /// Container name, assigned by the lifecycle manager on start
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,

    /// Lifecycle state
    #[serde(default)]
    pub status: TaskStatus,

    /// When the task was created
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Create a new task
    pub fn new(task_id: impl Into<String>, command: impl Into<String>, tool: Tool) -> Self {
        Self {
            task_id: task_id.into(),
            command: command.into(),
            tool,
            core_task_id: None,
            project_ids: Vec::new(),
            project_ports: HashMap::new(),
            container_name: None,
            status: TaskStatus::default(),
            created_at: Utc::now(),
        }
    }

    /// Set requested projects
    pub fn with_projects(mut self, project_ids: Vec<String>) -> Self {
        self.project_ids = project_ids;
        self
    }

    /// Mark which task id is the core run
    pub fn with_core_task_id(mut self, core_task_id: impl Into<String>) -> Self {
        self.core_task_id = Some(core_task_id.into());
        self
    }

    /// Set known project -> port mappings
    pub fn with_project_ports(mut self, ports: HashMap<String, u16>) -> Self {
        self.project_ports = ports;
        self
    }

    /// Whether this task is the privileged core run
    pub fn is_core_task(&self) -> bool {
        self.core_task_id.as_deref() == Some(self.task_id.as_str())
    }

    /// Synchronous input validation; nothing invalid reaches the runtime
    pub fn validate(&self) -> Result<(), String> {
        if self.task_id.trim().is_empty() {
            return Err("task id must not be empty".to_string());
        }
        if !is_valid_task_id(&self.task_id) {
            return Err(format!("invalid task id: {}", self.task_id));
        }
        if self.command.trim().is_empty() {
            return Err("command must not be empty".to_string());
        }
        for project_id in &self.project_ids {
            if !is_valid_project_id(project_id) {
                return Err(format!("invalid project id: {}", project_id));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_task_flag() {
        let task = Task::new("AI-1", "do things", Tool::Code).with_core_task_id("AI-1");
        assert!(task.is_core_task());

        let other = Task::new("AI-2", "do things", Tool::Code).with_core_task_id("AI-1");
        assert!(!other.is_core_task());

        let plain = Task::new("AI-3", "do things", Tool::Code);
        assert!(!plain.is_core_task());
    }

    #[test]
    fn test_validate_rejects_bad_input() {
        assert!(Task::new("", "cmd", Tool::Code).validate().is_err());
        assert!(Task::new("AI-1", "  ", Tool::Code).validate().is_err());
        assert!(Task::new("bad id", "cmd", Tool::Code).validate().is_err());
        assert!(Task::new("AI-1", "cmd", Tool::Code)
            .with_projects(vec!["../evil".to_string()])
            .validate()
            .is_err());
    }

    #[test]
    fn test_validate_accepts_good_input() {
        let task = Task::new("AI-1", "build the blog", Tool::Code)
            .with_projects(vec!["blog".to_string(), "shared-lib".to_string()]);
        assert!(task.validate().is_ok());
        assert_eq!(task.status, TaskStatus::Pending);
    }
}
