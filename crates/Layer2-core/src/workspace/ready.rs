//! Readiness Gate
//!
//! Bounded wait for projects whose repositories are still being scaffolded
//! by another task. Resolves the race where one task is generating a project
//! that a second, concurrently submitted task also wants to use.

use berth_foundation::{ProjectStore, Tool};
use std::time::Duration;
use tracing::{debug, warn};

/// Poll interval against the project store
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Maximum number of polls before the project is treated as unavailable
const MAX_POLLS: u32 = 10;

/// Bounded polling gate over the project store
pub struct ReadinessGate;

impl ReadinessGate {
    /// Wait until `project_id` is usable, up to the 10-second deadline.
    ///
    /// Immediately eligible without waiting:
    /// - projects that were not generated by the system
    /// - projects already marked ready
    /// - any project when the requesting task is the core task
    /// - any project when the requesting tool is the project updater
    ///   (the tool producing the project must not deadlock on itself)
    ///
    /// The store is re-read on every poll; readiness is never cached.
    pub async fn await_ready(
        store: &dyn ProjectStore,
        project_id: &str,
        is_core_task: bool,
        tool: Tool,
    ) -> bool {
        if is_core_task || tool == Tool::ProjectUpdate {
            return true;
        }

        let project = match store.get_project(project_id).await {
            Ok(Some(project)) => project,
            Ok(None) => {
                warn!(project_id, "Unknown project, treating as unavailable");
                return false;
            }
            Err(e) => {
                warn!(project_id, error = %e, "Project store read failed");
                return false;
            }
        };

        if project.is_usable() {
            return true;
        }

        debug!(project_id, "Project still scaffolding, polling for readiness");

        for attempt in 1..=MAX_POLLS {
            tokio::time::sleep(POLL_INTERVAL).await;

            match store.get_project(project_id).await {
                Ok(Some(project)) if project.is_usable() => {
                    debug!(project_id, attempt, "Project became ready");
                    return true;
                }
                Ok(Some(_)) => {}
                Ok(None) => {
                    warn!(project_id, "Project disappeared from store while waiting");
                    return false;
                }
                Err(e) => {
                    warn!(project_id, attempt, error = %e, "Project store read failed");
                }
            }
        }

        warn!(
            project_id,
            "Project not ready after {} seconds, dropping from this run", MAX_POLLS
        );
        false
    }
}

// ============================================================================
// Tests
// ============================================================================
