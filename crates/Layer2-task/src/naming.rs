//! Container naming conventions
//!
//! Worker and sidecar containers are discovered by name, so the conventions
//! here are load-bearing: teardown, bulk cleanup and `list_running` all
//! filter on them. Names not matching the task-id pattern are ignored,
//! which keeps unrelated containers out of every sweep.

use berth_foundation::strings::ID_PATTERN;
use regex::Regex;
use std::sync::OnceLock;

/// Prefix of every worker container name
pub const WORKER_PREFIX: &str = "berth-worker-";

/// Prefix of every sidecar (per-project preview) container name
pub const SIDECAR_PREFIX: &str = "berth-project-";

/// Name of the worker container for a task
pub fn worker_container_name(task_id: &str) -> String {
    format!("{}{}", WORKER_PREFIX, task_id)
}

/// Name of the sidecar container for a (task, project) pair
pub fn sidecar_container_name(task_id: &str, project_id: &str) -> String {
    format!("{}{}-{}", SIDECAR_PREFIX, task_id, project_id)
}

/// Prefix matching every sidecar of one task
pub fn sidecar_task_prefix(task_id: &str) -> String {
    format!("{}{}-", SIDECAR_PREFIX, task_id)
}

/// Image tag for a sidecar build. Image names must be lowercase even though
/// container names are not.
pub fn sidecar_image_tag(project_id: &str, task_id: &str) -> String {
    format!(
        "berth-project-{}-{}:latest",
        project_id.to_lowercase(),
        task_id.to_lowercase()
    )
}

fn worker_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let id = ID_PATTERN.trim_start_matches('^').trim_end_matches('$');
        Regex::new(&format!("^{}({})$", WORKER_PREFIX, id)).unwrap()
    })
}

/// Extract the task id from a worker container name, if it follows the
/// convention
pub fn parse_worker_name(container_name: &str) -> Option<&str> {
    worker_name_regex()
        .captures(container_name)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_name_round_trip() {
        let name = worker_container_name("AI-17");
        assert_eq!(name, "berth-worker-AI-17");
        assert_eq!(parse_worker_name(&name), Some("AI-17"));
    }

    #[test]
    fn test_parse_rejects_unrelated_containers() {
        assert_eq!(parse_worker_name("postgres"), None);
        assert_eq!(parse_worker_name("berth-worker-"), None);
        assert_eq!(parse_worker_name("berth-worker-has space"), None);
        assert_eq!(parse_worker_name("berth-project-AI-1-blog"), None);
    }

    #[test]
    fn test_sidecar_names() {
        assert_eq!(
            sidecar_container_name("AI-1", "blog"),
            "berth-project-AI-1-blog"
        );
        assert!(sidecar_container_name("AI-1", "blog").starts_with(&sidecar_task_prefix("AI-1")));
        assert_eq!(
            sidecar_image_tag("Blog", "AI-1"),
            "berth-project-blog-ai-1:latest"
        );
    }
}
