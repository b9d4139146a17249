//! Store trait boundary
//!
//! The orchestrator treats the project store as the single source of truth
//! for `is_generated`/`is_ready`; readiness is never cached across calls.

use crate::core::types::{HistoryEntry, Project};
use crate::Result;
use async_trait::async_trait;

/// Persisted project metadata store
#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// Fetch one project by id, `None` if unknown
    async fn get_project(&self, project_id: &str) -> Result<Option<Project>>;

    /// Persist a full project record (upsert by `project_id`)
    async fn update_project(&self, project: &Project) -> Result<()>;

    /// Append one history entry to a project
    async fn add_history(&self, project_id: &str, entry: HistoryEntry) -> Result<()>;

    /// All known project ids
    async fn all_project_ids(&self) -> Result<Vec<String>>;
}
