//! ProjectStore implementations
//!
//! `JsonProjectStore` keeps one JSON document per project under a state
//! directory. `MemoryProjectStore` backs tests and embedded use.

use crate::core::{HistoryEntry, Project, ProjectStore};
use crate::storage::JsonStore;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

// ============================================================================
// JSON-backed store
// ============================================================================

/// File-per-project store: `{state_dir}/projects/{project_id}.json`
#[derive(Debug, Clone)]
pub struct JsonProjectStore {
    store: JsonStore,
}

impl JsonProjectStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            store: JsonStore::new(state_dir.into().join("projects")),
        }
    }

    /// 글로벌 상태 디렉토리 기반 스토어
    pub fn global() -> Result<Self> {
        let base = JsonStore::global()?;
        Ok(Self {
            store: JsonStore::new(base.base_dir().join("projects")),
        })
    }

    fn filename(project_id: &str) -> String {
        format!("{}.json", project_id)
    }
}

#[async_trait]
impl ProjectStore for JsonProjectStore {
    async fn get_project(&self, project_id: &str) -> Result<Option<Project>> {
        self.store.load_optional(&Self::filename(project_id))
    }

    async fn update_project(&self, project: &Project) -> Result<()> {
        self.store.save(&Self::filename(&project.project_id), project)
    }

    async fn add_history(&self, project_id: &str, entry: HistoryEntry) -> Result<()> {
        let mut project = self
            .get_project(project_id)
            .await?
            .ok_or_else(|| Error::ProjectNotFound(project_id.to_string()))?;
        project.history.push(entry);
        self.update_project(&project).await
    }

    async fn all_project_ids(&self) -> Result<Vec<String>> {
        self.store.list_files("json")
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// 메모리 기반 스토어 (테스트/임베딩용)
#[derive(Debug, Clone, Default)]
pub struct MemoryProjectStore {
    projects: Arc<RwLock<HashMap<String, Project>>>,
}

impl MemoryProjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with an initial set of projects
    pub async fn with_projects(projects: impl IntoIterator<Item = Project>) -> Self {
        let store = Self::new();
        {
            let mut map = store.projects.write().await;
            for project in projects {
                map.insert(project.project_id.clone(), project);
            }
        }
        store
    }
}

#[async_trait]
impl ProjectStore for MemoryProjectStore {
    async fn get_project(&self, project_id: &str) -> Result<Option<Project>> {
        Ok(self.projects.read().await.get(project_id).cloned())
    }

    async fn update_project(&self, project: &Project) -> Result<()> {
        self.projects
            .write()
            .await
            .insert(project.project_id.clone(), project.clone());
        Ok(())
    }

    async fn add_history(&self, project_id: &str, entry: HistoryEntry) -> Result<()> {
        let mut projects = self.projects.write().await;
        let project = projects
            .get_mut(project_id)
            .ok_or_else(|| Error::ProjectNotFound(project_id.to_string()))?;
        project.history.push(entry);
        Ok(())
    }

    async fn all_project_ids(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.projects.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_json_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonProjectStore::new(dir.path());

        let project = Project::generated("app", "web");
        store.update_project(&project).await.unwrap();

        let loaded = store.get_project("app").await.unwrap().unwrap();
        assert_eq!(loaded.project_id, "app");
        assert!(loaded.is_generated);
        assert!(!loaded.is_ready);

        assert_eq!(store.all_project_ids().await.unwrap(), vec!["app"]);
    }

    #[tokio::test]
    async fn test_json_store_history_append() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonProjectStore::new(dir.path());

        store
            .update_project(&Project::existing("blog"))
            .await
            .unwrap();
        store
            .add_history("blog", HistoryEntry::new("created"))
            .await
            .unwrap();

        let loaded = store.get_project("blog").await.unwrap().unwrap();
        assert_eq!(loaded.history.len(), 1);
        assert_eq!(loaded.history[0].entry, "created");
    }

    #[tokio::test]
    async fn test_history_for_unknown_project_fails() {
        let store = MemoryProjectStore::new();
        let err = store
            .add_history("ghost", HistoryEntry::new("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ProjectNotFound(_)));
    }

    #[tokio::test]
    async fn test_memory_store_ids_sorted() {
        let store = MemoryProjectStore::with_projects([
            Project::existing("zeta"),
            Project::existing("alpha"),
        ])
        .await;
        assert_eq!(store.all_project_ids().await.unwrap(), vec!["alpha", "zeta"]);
    }
}
