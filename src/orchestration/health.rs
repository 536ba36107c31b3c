//! Stuck and failure detection for running agents.
//!
//! Health is diagnostic only. A stuck agent stays `running` until it is
//! killed or its session disappears; nothing here changes registry state.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

use crate::core::{AgentId, AgentRecord, TaskDocument};

/// Default time without a progress report before an agent is considered stuck.
pub const DEFAULT_STUCK_THRESHOLD_SECS: u64 = 300; // 5 minutes

#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Silence window after the last update.
    pub stuck_threshold: Duration,
    /// Case-insensitive patterns in captured output that indicate trouble.
    pub stuck_patterns: Vec<String>,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            stuck_threshold: Duration::from_secs(DEFAULT_STUCK_THRESHOLD_SECS),
            stuck_patterns: vec![
                "rate limit".to_string(),
                "rate_limit".to_string(),
                "too many requests".to_string(),
                "quota exceeded".to_string(),
                "connection refused".to_string(),
            ],
        }
    }
}

impl HealthConfig {
    pub fn with_stuck_threshold(threshold: Duration) -> Self {
        Self {
            stuck_threshold: threshold,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HealthEvent {
    /// No update for at least the stuck threshold.
    AgentStuck {
        agent_id: AgentId,
        idle_secs: u64,
        last_update: DateTime<Utc>,
    },
    /// Output matched a known failure pattern.
    AgentFailed { agent_id: AgentId, error: String },
}

impl HealthEvent {
    pub fn agent_id(&self) -> &AgentId {
        match self {
            HealthEvent::AgentStuck { agent_id, .. } => agent_id,
            HealthEvent::AgentFailed { agent_id, .. } => agent_id,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct HealthMonitor {
    config: HealthConfig,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig) -> Self {
        Self { config }
    }

    pub fn check_agent(&self, agent: &AgentRecord, now: DateTime<Utc>) -> Option<HealthEvent> {
        if !agent.is_running() {
            return None;
        }
        // Clock skew can put last_update in the future; treat it as fresh.
        let idle = (now - agent.last_update).to_std().unwrap_or(Duration::ZERO);
        if idle >= self.config.stuck_threshold {
            return Some(HealthEvent::AgentStuck {
                agent_id: agent.id.clone(),
                idle_secs: idle.as_secs(),
                last_update: agent.last_update,
            });
        }
        None
    }

    /// Stuck events for every running agent of the task.
    pub fn stuck_agents(&self, task: &TaskDocument, now: DateTime<Utc>) -> Vec<HealthEvent> {
        task.running_agents()
            .filter_map(|agent| self.check_agent(agent, now))
            .collect()
    }

    pub fn check_output(&self, agent_id: &AgentId, output: &str) -> Option<HealthEvent> {
        let lower = output.to_lowercase();
        self.config
            .stuck_patterns
            .iter()
            .find(|pattern| lower.contains(&pattern.to_lowercase()))
            .map(|pattern| HealthEvent::AgentFailed {
                agent_id: agent_id.clone(),
                error: format!("Detected stuck pattern: {}", pattern),
            })
    }
}
