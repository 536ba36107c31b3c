//! Core domain models: tasks, agents, and the workspace-wide registry.

pub mod agent;
pub mod global;
pub mod task;

pub use agent::{
    validate_agent_type, AgentId, AgentRecord, AgentStatus, CompletionSource, ROOT_PARENT,
};
pub use global::{AgentSummary, GlobalState, TaskSummary};
pub use task::{
    LimitsOverride, Priority, SpiralChecks, TaskDocument, TaskId, TaskLimits, TaskStatus,
};
