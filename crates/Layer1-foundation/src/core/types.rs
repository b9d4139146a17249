//! Shared domain types
//!
//! `Project` is the persisted description of a named, git-backed source
//! repository that tasks can check out. `Tool` selects the worker behavior
//! a task runs with.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Worker tool selected by a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tool {
    /// Coding agent
    Code,

    /// Browser automation agent
    Browser,

    /// Web search agent
    Search,

    /// Shell agent
    Shell,

    /// Project metadata/scaffolding updater
    ///
    /// A task running this tool is the one producing a project, so the
    /// readiness gate must let it through without waiting on itself.
    ProjectUpdate,
}

impl Tool {
    /// Stable string form used in container environment variables
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Browser => "browser",
            Self::Search => "search",
            Self::Shell => "shell",
            Self::ProjectUpdate => "project_update",
        }
    }
}

impl std::str::FromStr for Tool {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "code" => Ok(Self::Code),
            "browser" => Ok(Self::Browser),
            "search" => Ok(Self::Search),
            "shell" => Ok(Self::Shell),
            "project_update" => Ok(Self::ProjectUpdate),
            other => Err(format!("Unknown tool: {}", other)),
        }
    }
}

impl std::fmt::Display for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One timestamped history entry on a project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// When the entry was recorded
    pub timestamp: DateTime<Utc>,

    /// Free-text description of what happened
    pub entry: String,
}

impl HistoryEntry {
    pub fn new(entry: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            entry: entry.into(),
        }
    }
}

/// A logical, named source repository
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    /// Stable name, used as both store key and on-disk directory name
    pub project_id: String,

    /// Template selector for scaffolding
    #[serde(default = "default_project_type")]
    pub project_type: String,

    /// One-line description, substituted into scaffolded templates
    #[serde(skip_serializing_if = "Option::is_none")]
    pub simple_description: Option<String>,

    /// Longer description, substituted into scaffolded templates
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detailed_description: Option<String>,

    /// Was this project scaffolded by the system (vs. pre-existing)
    #[serde(default)]
    pub is_generated: bool,

    /// Scaffolding and initial commit complete
    ///
    /// Transitions exactly once, false -> true, set by the scaffolder.
    #[serde(default)]
    pub is_ready: bool,

    /// Append-only history of notable events
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

fn default_project_type() -> String {
    "default".to_string()
}

impl Project {
    /// Create a pre-existing (non-generated) project record
    pub fn existing(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            project_type: default_project_type(),
            simple_description: None,
            detailed_description: None,
            is_generated: false,
            is_ready: false,
            history: Vec::new(),
        }
    }

    /// Create a generated project record, not yet scaffolded
    pub fn generated(project_id: impl Into<String>, project_type: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            project_type: project_type.into(),
            simple_description: None,
            detailed_description: None,
            is_generated: true,
            is_ready: false,
            history: Vec::new(),
        }
    }

    /// Set descriptions used for template substitution
    pub fn with_descriptions(
        mut self,
        simple: impl Into<String>,
        detailed: impl Into<String>,
    ) -> Self {
        self.simple_description = Some(simple.into());
        self.detailed_description = Some(detailed.into());
        self
    }

    /// A project is usable immediately unless it is still being generated
    pub fn is_usable(&self) -> bool {
        !self.is_generated || self.is_ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_round_trip() {
        for tool in [
            Tool::Code,
            Tool::Browser,
            Tool::Search,
            Tool::Shell,
            Tool::ProjectUpdate,
        ] {
            let parsed: Tool = tool.as_str().parse().unwrap();
            assert_eq!(parsed, tool);
        }
    }

    #[test]
    fn test_existing_project_is_usable() {
        let project = Project::existing("blog");
        assert!(project.is_usable());
        assert!(!project.is_generated);
    }

    #[test]
    fn test_generated_project_needs_ready() {
        let mut project = Project::generated("app", "web");
        assert!(!project.is_usable());

        project.is_ready = true;
        assert!(project.is_usable());
    }
}
