//! Admission control, status aggregation and the orchestrator service.

mod guard;
mod health;
mod orchestrator;
mod prompt;
mod status;

pub use guard::{Admission, LimitKind, SpawnGuard, SpawnRules, ANY_TYPE};
pub use health::{HealthConfig, HealthEvent, HealthMonitor, DEFAULT_STUCK_THRESHOLD_SECS};
pub use orchestrator::{
    AgentDeployed, AgentKilled, AgentOutput, FindingReport, Orchestrator, OwnUpdate,
    ProgressReport, Reconciled, SessionStatus, TaskCreated, SESSION_CREATE_TIMEOUT,
};
pub use prompt::AgentPrompt;
pub use status::{
    AgentStatusSummary, AgentsView, CoordinationData, CoordinationInfo, LedgerView,
    StatusAggregator, TaskCounters, TaskInfo, TaskSnapshot, Timeline, TimelineEntry,
    TimelineSpan, TimelineSummary,
};
