//! On-disk layout of an agent workspace.
//!
//! ```text
//! <root>/registry/GLOBAL_REGISTRY.json
//! <root>/<task_id>/AGENT_REGISTRY.json
//! <root>/<task_id>/progress/<agent_id>_progress.jsonl
//! <root>/<task_id>/findings/<agent_id>_findings.jsonl
//! <root>/<task_id>/logs/deploy_<agent_id>.json
//! <root>/<task_id>/output/
//! <root>/<task_id>/agent_prompt_<agent_id>.txt
//! ```

use std::path::PathBuf;

use crate::core::TaskId;

pub const GLOBAL_REGISTRY_FILE: &str = "GLOBAL_REGISTRY.json";
pub const TASK_REGISTRY_FILE: &str = "AGENT_REGISTRY.json";

#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn registry_dir(&self) -> PathBuf {
        self.root.join("registry")
    }

    pub fn global_registry_path(&self) -> PathBuf {
        self.registry_dir().join(GLOBAL_REGISTRY_FILE)
    }

    pub fn task_dir(&self, task_id: &TaskId) -> PathBuf {
        self.root.join(task_id.as_str())
    }

    pub fn task_registry_path(&self, task_id: &TaskId) -> PathBuf {
        self.task_dir(task_id).join(TASK_REGISTRY_FILE)
    }

    pub fn progress_dir(&self, task_id: &TaskId) -> PathBuf {
        self.task_dir(task_id).join("progress")
    }

    pub fn findings_dir(&self, task_id: &TaskId) -> PathBuf {
        self.task_dir(task_id).join("findings")
    }

    pub fn logs_dir(&self, task_id: &TaskId) -> PathBuf {
        self.task_dir(task_id).join("logs")
    }

    pub fn output_dir(&self, task_id: &TaskId) -> PathBuf {
        self.task_dir(task_id).join("output")
    }

    pub fn prompt_path(&self, task_id: &TaskId, agent_id: &str) -> PathBuf {
        self.task_dir(task_id)
            .join(format!("agent_prompt_{}.txt", agent_id))
    }

    pub fn deploy_log_path(&self, task_id: &TaskId, agent_id: &str) -> PathBuf {
        self.logs_dir(task_id).join(format!("deploy_{}.json", agent_id))
    }

    /// Directories created for every new task.
    pub fn task_subdirs(&self, task_id: &TaskId) -> [PathBuf; 4] {
        [
            self.progress_dir(task_id),
            self.findings_dir(task_id),
            self.logs_dir(task_id),
            self.output_dir(task_id),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let ws = Workspace::new("/ws");
        let task = TaskId("TASK-1".to_string());
        assert_eq!(
            ws.global_registry_path(),
            PathBuf::from("/ws/registry/GLOBAL_REGISTRY.json")
        );
        assert_eq!(
            ws.task_registry_path(&task),
            PathBuf::from("/ws/TASK-1/AGENT_REGISTRY.json")
        );
        assert_eq!(
            ws.prompt_path(&task, "a-1"),
            PathBuf::from("/ws/TASK-1/agent_prompt_a-1.txt")
        );
        assert_eq!(
            ws.deploy_log_path(&task, "a-1"),
            PathBuf::from("/ws/TASK-1/logs/deploy_a-1.json")
        );
    }
}
