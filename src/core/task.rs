//! Task documents: metadata, limits, agents and counters of one task.
//!
//! A task document is the single source of truth for its agents. The
//! parent -> children hierarchy is derived from each agent's `parent` field
//! whenever it is needed and never stored separately.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use super::agent::{AgentId, AgentRecord, AgentStatus, CompletionSource, ROOT_PARENT};
use crate::util::hex_suffix;
use crate::{Error, Result};

/// Identifier of a task: `TASK-<YYYYmmdd>-<HHMMSS>-<8 hex>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn generate() -> Self {
        Self(format!(
            "TASK-{}-{}",
            Utc::now().format("%Y%m%d-%H%M%S"),
            hex_suffix(8)
        ))
    }

    /// Parse a caller-supplied id. Ids name directories, so anything that
    /// could escape the workspace is rejected as unknown.
    pub fn parse(s: &str) -> Result<Self> {
        let valid = !s.is_empty()
            && s.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(Error::TaskNotFound(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Priority {
    P0,
    P1,
    #[default]
    P2,
    P3,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::P0 => write!(f, "P0"),
            Priority::P1 => write!(f, "P1"),
            Priority::P2 => write!(f, "P2"),
            Priority::P3 => write!(f, "P3"),
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "P0" => Ok(Priority::P0),
            "P1" => Ok(Priority::P1),
            "P2" => Ok(Priority::P2),
            "P3" => Ok(Priority::P3),
            other => Err(Error::Validation(format!(
                "Unknown priority '{}' (expected P0-P3)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    #[default]
    Initialized,
    /// At least one agent has been admitted.
    Active,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Initialized => write!(f, "INITIALIZED"),
            TaskStatus::Active => write!(f, "ACTIVE"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskLimits {
    /// Total agents the task may ever spawn.
    pub max_agents: u32,
    /// Agents that may run at the same time.
    pub max_concurrent: u32,
    /// Deepest allowed hierarchy level; root children are depth 1.
    pub max_depth: u32,
}

/// Per-call limit overrides for task creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LimitsOverride {
    pub max_agents: Option<u32>,
    pub max_concurrent: Option<u32>,
    pub max_depth: Option<u32>,
}

impl TaskLimits {
    pub fn with_overrides(self, overrides: &LimitsOverride) -> Result<Self> {
        let limits = Self {
            max_agents: overrides.max_agents.unwrap_or(self.max_agents),
            max_concurrent: overrides.max_concurrent.unwrap_or(self.max_concurrent),
            max_depth: overrides.max_depth.unwrap_or(self.max_depth),
        };
        if limits.max_agents == 0 || limits.max_concurrent == 0 || limits.max_depth == 0 {
            return Err(Error::Validation(
                "Task limits must be at least 1".to_string(),
            ));
        }
        Ok(limits)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpiralChecks {
    pub enabled: bool,
    pub last_check: DateTime<Utc>,
    /// Spawn requests denied by admission control.
    pub violations: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDocument {
    pub task_id: TaskId,
    pub task_description: String,
    pub created_at: DateTime<Utc>,
    pub workspace: PathBuf,
    pub status: TaskStatus,
    pub priority: Priority,
    pub agents: Vec<AgentRecord>,
    #[serde(flatten)]
    pub limits: TaskLimits,
    pub total_spawned: u32,
    pub active_count: u32,
    pub completed_count: u32,
    #[serde(default)]
    pub terminated_count: u32,
    pub spiral_checks: SpiralChecks,
}

impl TaskDocument {
    pub fn new(
        task_id: TaskId,
        description: &str,
        priority: Priority,
        limits: TaskLimits,
        workspace: PathBuf,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id,
            task_description: description.to_string(),
            created_at: now,
            workspace,
            status: TaskStatus::Initialized,
            priority,
            agents: Vec::new(),
            limits,
            total_spawned: 0,
            active_count: 0,
            completed_count: 0,
            terminated_count: 0,
            spiral_checks: SpiralChecks {
                enabled: true,
                last_check: now,
                violations: 0,
            },
        }
    }

    pub fn agent(&self, agent_id: &str) -> Option<&AgentRecord> {
        self.agents.iter().find(|a| a.id.as_str() == agent_id)
    }

    pub fn agent_mut(&mut self, agent_id: &str) -> Option<&mut AgentRecord> {
        self.agents.iter_mut().find(|a| a.id.as_str() == agent_id)
    }

    pub fn require_agent(&self, agent_id: &str) -> Result<&AgentRecord> {
        self.agent(agent_id).ok_or_else(|| self.agent_not_found(agent_id))
    }

    fn agent_not_found(&self, agent_id: &str) -> Error {
        Error::AgentNotFound {
            task_id: self.task_id.to_string(),
            agent_id: agent_id.to_string(),
        }
    }

    /// Parent id -> child ids in spawn order, rebuilt from the agents.
    pub fn hierarchy(&self) -> BTreeMap<String, Vec<AgentId>> {
        let mut tree: BTreeMap<String, Vec<AgentId>> = BTreeMap::new();
        tree.insert(ROOT_PARENT.to_string(), Vec::new());
        for agent in &self.agents {
            tree.entry(agent.parent.clone())
                .or_default()
                .push(agent.id.clone());
        }
        tree
    }

    pub fn running_agents(&self) -> impl Iterator<Item = &AgentRecord> {
        self.agents.iter().filter(|a| a.is_running())
    }

    /// Append an admitted agent and count it.
    pub fn record_spawn(&mut self, agent: AgentRecord) {
        self.agents.push(agent);
        self.total_spawned += 1;
        self.active_count += 1;
        self.status = TaskStatus::Active;
    }

    pub fn record_violation(&mut self, now: DateTime<Utc>) {
        self.spiral_checks.violations += 1;
        self.spiral_checks.last_check = now;
    }

    /// Complete a running agent. Returns `true` if the agent transitioned,
    /// in which case the counters moved exactly once.
    pub fn complete_agent(
        &mut self,
        agent_id: &str,
        source: CompletionSource,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let Some(agent) = self.agent_mut(agent_id) else {
            return Err(self.agent_not_found(agent_id));
        };
        let transitioned = agent.complete(source, now);
        if transitioned {
            self.count_completion();
        }
        Ok(transitioned)
    }

    pub fn terminate_agent(
        &mut self,
        agent_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let Some(agent) = self.agent_mut(agent_id) else {
            return Err(self.agent_not_found(agent_id));
        };
        let transitioned = agent.terminate(reason, now);
        if transitioned {
            self.active_count = self.active_count.saturating_sub(1);
            self.terminated_count += 1;
        }
        Ok(transitioned)
    }

    /// Apply a self-reported progress update. Returns `true` if it
    /// completed the agent.
    pub fn record_progress(
        &mut self,
        agent_id: &str,
        reported_status: &str,
        message: &str,
        progress: u8,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let Some(agent) = self.agent_mut(agent_id) else {
            return Err(self.agent_not_found(agent_id));
        };
        let completed = agent.record_progress(reported_status, message, progress, now);
        if completed {
            self.count_completion();
        }
        Ok(completed)
    }

    fn count_completion(&mut self) {
        self.active_count = self.active_count.saturating_sub(1);
        self.completed_count += 1;
    }

    /// Counters recomputed from agent statuses, in the order
    /// `(total, active, completed, terminated)`.
    pub fn recount(&self) -> (u32, u32, u32, u32) {
        let mut counts = (self.agents.len() as u32, 0, 0, 0);
        for agent in &self.agents {
            match agent.status {
                AgentStatus::Running => counts.1 += 1,
                AgentStatus::Completed => counts.2 += 1,
                AgentStatus::Terminated => counts.3 += 1,
            }
        }
        counts
    }

    /// Stored counters agree with the agent list and with each other.
    pub fn counters_consistent(&self) -> bool {
        let stored = (
            self.total_spawned,
            self.active_count,
            self.completed_count,
            self.terminated_count,
        );
        stored == self.recount()
            && self.active_count + self.completed_count + self.terminated_count
                == self.total_spawned
    }
}
