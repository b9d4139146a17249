//! Identifier validation
//!
//! Task and project ids end up in container names, branch names, environment
//! variables and on-disk paths, so they are validated once, up front, against
//! a conservative character set. Anything else is rejected synchronously
//! before it can reach git or the container runtime.

use regex::Regex;
use std::sync::OnceLock;

/// Pattern both task ids and project ids must match
pub const ID_PATTERN: &str = r"^[A-Za-z0-9][A-Za-z0-9_-]*$";

fn id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(ID_PATTERN).unwrap())
}

/// Check a task id (opaque string, globally unique per run)
pub fn is_valid_task_id(task_id: &str) -> bool {
    id_regex().is_match(task_id)
}

/// Check a project id (store key and directory name)
pub fn is_valid_project_id(project_id: &str) -> bool {
    id_regex().is_match(project_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_ids() {
        assert!(is_valid_task_id("AI-1"));
        assert!(is_valid_task_id("T-2"));
        assert!(is_valid_project_id("blog"));
        assert!(is_valid_project_id("my_app-2"));
    }

    #[test]
    fn test_invalid_ids() {
        assert!(!is_valid_task_id(""));
        assert!(!is_valid_task_id("-leading-dash"));
        assert!(!is_valid_task_id("has space"));
        assert!(!is_valid_project_id("../escape"));
        assert!(!is_valid_project_id("semi;colon"));
    }
}
