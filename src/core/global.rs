//! The workspace-wide registry document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::agent::{AgentRecord, AgentStatus};
use super::task::{Priority, TaskDocument, TaskStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: Priority,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSummary {
    pub task_id: String,
    #[serde(rename = "type")]
    pub agent_type: String,
    pub parent: String,
    pub started_at: DateTime<Utc>,
    pub tmux_session: String,
    #[serde(default)]
    pub status: AgentStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalState {
    pub created_at: DateTime<Utc>,
    pub total_tasks: u32,
    pub active_tasks: u32,
    pub total_agents_spawned: u32,
    pub active_agents: u32,
    #[serde(default)]
    pub completed_agents: u32,
    #[serde(default)]
    pub terminated_agents: u32,
    /// Ceiling on running agents across every task.
    pub max_concurrent_agents: u32,
    pub tasks: BTreeMap<String, TaskSummary>,
    pub agents: BTreeMap<String, AgentSummary>,
}

impl GlobalState {
    pub fn new(max_concurrent_agents: u32, now: DateTime<Utc>) -> Self {
        Self {
            created_at: now,
            total_tasks: 0,
            active_tasks: 0,
            total_agents_spawned: 0,
            active_agents: 0,
            completed_agents: 0,
            terminated_agents: 0,
            max_concurrent_agents,
            tasks: BTreeMap::new(),
            agents: BTreeMap::new(),
        }
    }

    pub fn register_task(&mut self, task: &TaskDocument) {
        self.total_tasks += 1;
        self.active_tasks += 1;
        self.tasks.insert(
            task.task_id.to_string(),
            TaskSummary {
                description: task.task_description.clone(),
                created_at: task.created_at,
                status: task.status,
                priority: task.priority,
            },
        );
    }

    pub fn record_spawn(&mut self, task_id: &str, agent: &AgentRecord) {
        self.total_agents_spawned += 1;
        self.active_agents += 1;
        if let Some(summary) = self.tasks.get_mut(task_id) {
            summary.status = TaskStatus::Active;
        }
        self.agents.insert(
            agent.id.to_string(),
            AgentSummary {
                task_id: task_id.to_string(),
                agent_type: agent.agent_type.clone(),
                parent: agent.parent.clone(),
                started_at: agent.started_at,
                tmux_session: agent.tmux_session.clone(),
                status: AgentStatus::Running,
            },
        );
    }

    /// Count a `running -> completed|terminated` transition that already
    /// happened in the owning task document.
    pub fn record_exit(&mut self, agent_id: &str, status: AgentStatus) {
        self.active_agents = self.active_agents.saturating_sub(1);
        match status {
            AgentStatus::Completed => self.completed_agents += 1,
            AgentStatus::Terminated => self.terminated_agents += 1,
            AgentStatus::Running => {}
        }
        if let Some(summary) = self.agents.get_mut(agent_id) {
            summary.status = status;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::agent::{AgentId, ROOT_PARENT};
    use crate::core::task::{TaskId, TaskLimits};
    use std::path::PathBuf;

    fn task() -> TaskDocument {
        TaskDocument::new(
            TaskId::generate(),
            "global test",
            Priority::P1,
            TaskLimits {
                max_agents: 5,
                max_concurrent: 5,
                max_depth: 3,
            },
            PathBuf::from("/tmp/ws"),
            Utc::now(),
        )
    }

    #[test]
    fn test_spawn_and_exit_counters() {
        let mut global = GlobalState::new(2, Utc::now());
        let task = task();
        global.register_task(&task);
        let agent = AgentRecord::new(
            AgentId::from("a-1-1"),
            "a",
            "agent_a-1-1",
            ROOT_PARENT,
            1,
            "p",
            Utc::now(),
        );
        global.record_spawn(task.task_id.as_str(), &agent);
        assert_eq!(global.total_tasks, 1);
        assert_eq!(global.active_agents, 1);
        assert_eq!(
            global.tasks[task.task_id.as_str()].status,
            TaskStatus::Active
        );

        global.record_exit("a-1-1", AgentStatus::Terminated);
        assert_eq!(global.active_agents, 0);
        assert_eq!(global.terminated_agents, 1);
        assert_eq!(global.agents["a-1-1"].status, AgentStatus::Terminated);
    }

    #[test]
    fn test_exit_never_underflows() {
        let mut global = GlobalState::new(1, Utc::now());
        global.record_exit("ghost", AgentStatus::Completed);
        assert_eq!(global.active_agents, 0);
    }
}
