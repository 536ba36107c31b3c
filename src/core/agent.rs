//! Agent records and the agent lifecycle state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::util::hex_suffix;
use crate::{Error, Result};

/// Parent sentinel for agents deployed directly by the caller.
pub const ROOT_PARENT: &str = "orchestrator";

const MAX_AGENT_TYPE_LEN: usize = 64;
const PROMPT_SUMMARY_CHARS: usize = 200;

/// Identifier of an agent, unique within its task.
///
/// Format: `<type>-<HHMMSS>-<6 hex>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn generate(agent_type: &str) -> Self {
        Self(format!(
            "{}-{}-{}",
            agent_type,
            Utc::now().format("%H%M%S"),
            hex_suffix(6)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Agent types end up in file names and session names, so they are
/// restricted to `[A-Za-z0-9_-]`.
pub fn validate_agent_type(agent_type: &str) -> Result<()> {
    if agent_type.is_empty() {
        return Err(Error::Validation("Agent type cannot be empty".to_string()));
    }
    if agent_type.len() > MAX_AGENT_TYPE_LEN {
        return Err(Error::Validation(format!(
            "Agent type too long ({} > {} characters)",
            agent_type.len(),
            MAX_AGENT_TYPE_LEN
        )));
    }
    if agent_type == ROOT_PARENT {
        return Err(Error::Validation(format!(
            "'{}' is reserved for the hierarchy root",
            ROOT_PARENT
        )));
    }
    if !agent_type
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(Error::Validation(format!(
            "Agent type '{}' may only contain letters, digits, '-' and '_'",
            agent_type
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    #[default]
    Running,
    Completed,
    Terminated,
}

impl AgentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AgentStatus::Running)
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Running => write!(f, "running"),
            AgentStatus::Completed => write!(f, "completed"),
            AgentStatus::Terminated => write!(f, "terminated"),
        }
    }
}

/// How a completed agent got there.
///
/// `SessionExited` means the session vanished without a 100% report; the
/// agent may have finished quietly or crashed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionSource {
    Reported,
    SessionExited,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: AgentId,
    #[serde(rename = "type")]
    pub agent_type: String,
    pub tmux_session: String,
    pub parent: String,
    pub depth: u32,
    pub status: AgentStatus,
    pub progress: u8,
    pub started_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion: Option<CompletionSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination_reason: Option<String>,
    /// Latest self-reported label (working, blocked, ...). Informational.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reported_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
    pub prompt: String,
}

impl AgentRecord {
    pub fn new(
        id: AgentId,
        agent_type: &str,
        tmux_session: &str,
        parent: &str,
        depth: u32,
        prompt: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            agent_type: agent_type.to_string(),
            tmux_session: tmux_session.to_string(),
            parent: parent.to_string(),
            depth,
            status: AgentStatus::Running,
            progress: 0,
            started_at: now,
            last_update: now,
            completed_at: None,
            completion: None,
            terminated_at: None,
            termination_reason: None,
            reported_status: None,
            last_message: None,
            prompt: crate::util::truncate(prompt, PROMPT_SUMMARY_CHARS),
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == AgentStatus::Running
    }

    /// Apply a self-reported progress update. Terminal agents are left
    /// untouched. Returns `true` if the update completed the agent.
    pub fn record_progress(
        &mut self,
        reported_status: &str,
        message: &str,
        progress: u8,
        now: DateTime<Utc>,
    ) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.progress = progress;
        self.reported_status = Some(reported_status.to_string());
        self.last_message = Some(message.to_string());
        self.last_update = now;
        if progress >= 100 {
            return self.complete(CompletionSource::Reported, now);
        }
        false
    }

    /// `running -> completed`. Returns `false` for an agent already terminal.
    pub fn complete(&mut self, source: CompletionSource, now: DateTime<Utc>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = AgentStatus::Completed;
        self.completion = Some(source);
        self.completed_at = Some(now);
        self.last_update = now;
        true
    }

    /// `running -> terminated`. Returns `false` for an agent already terminal.
    pub fn terminate(&mut self, reason: &str, now: DateTime<Utc>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = AgentStatus::Terminated;
        self.terminated_at = Some(now);
        self.termination_reason = Some(reason.to_string());
        self.last_update = now;
        true
    }
}
