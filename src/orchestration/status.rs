//! Read-time composition of task documents and ledgers.
//!
//! Status views re-read everything from disk. The only write performed here
//! is liveness reconciliation: a running agent whose session is gone is
//! completed with `completion = session_exited`.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use super::health::{HealthEvent, HealthMonitor};
use crate::core::{
    AgentId, AgentRecord, AgentStatus, CompletionSource, Priority, SpiralChecks, TaskDocument,
    TaskId, TaskLimits, TaskStatus,
};
use crate::ledger::{FindingEntry, Ledger, ProgressEntry};
use crate::registry::{GlobalRegistry, TaskRegistry};
use crate::session::SessionHost;
use crate::util::blocking;
use crate::{wlog, wlog_warn, Result};

pub const SNAPSHOT_RECENT_PROGRESS: usize = 10;
pub const SNAPSHOT_RECENT_FINDINGS: usize = 5;
pub const COORDINATION_RECENT_PROGRESS: usize = 20;
pub const COORDINATION_RECENT_FINDINGS: usize = 10;

#[derive(Debug, Clone, Serialize)]
pub struct TaskCounters {
    pub total_spawned: u32,
    pub active: u32,
    pub completed: u32,
    pub terminated: u32,
}

impl From<&TaskDocument> for TaskCounters {
    fn from(task: &TaskDocument) -> Self {
        Self {
            total_spawned: task.total_spawned,
            active: task.active_count,
            completed: task.completed_count,
            terminated: task.terminated_count,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentsView {
    #[serde(flatten)]
    pub counters: TaskCounters,
    pub agents_list: Vec<AgentRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LedgerView {
    pub recent_updates: Vec<ProgressEntry>,
    pub recent_findings: Vec<FindingEntry>,
    pub total_progress_entries: usize,
    pub total_findings: usize,
}

/// Caller-facing status of one task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub task_id: TaskId,
    pub description: String,
    pub status: TaskStatus,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub workspace: PathBuf,
    pub limits: TaskLimits,
    pub agents: AgentsView,
    pub hierarchy: BTreeMap<String, Vec<AgentId>>,
    pub enhanced_progress: LedgerView,
    pub spiral_status: SpiralChecks,
    pub stuck_agents: Vec<HealthEvent>,
    /// Agents completed by the reconciliation pass of this call.
    pub reconciled: Vec<AgentId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskInfo {
    pub task_id: TaskId,
    pub description: String,
    pub status: TaskStatus,
    pub workspace: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentStatusSummary {
    #[serde(rename = "type")]
    pub agent_type: String,
    pub status: AgentStatus,
    pub progress: u8,
    pub last_update: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reported_status: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CoordinationData {
    pub recent_progress: Vec<ProgressEntry>,
    pub recent_findings: Vec<FindingEntry>,
    pub agent_status_summary: BTreeMap<String, AgentStatusSummary>,
}

/// The view returned to agents after they report, sized for peers to
/// coordinate with each other.
#[derive(Debug, Clone, Serialize)]
pub struct CoordinationInfo {
    pub task_info: TaskInfo,
    pub agents: AgentsView,
    pub coordination_data: CoordinationData,
    pub hierarchy: BTreeMap<String, Vec<AgentId>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "entry_type", rename_all = "snake_case")]
pub enum TimelineEntry {
    Progress(ProgressEntry),
    Finding(FindingEntry),
}

impl TimelineEntry {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            TimelineEntry::Progress(p) => p.timestamp,
            TimelineEntry::Finding(f) => f.timestamp,
        }
    }

    pub fn agent_id(&self) -> &str {
        match self {
            TimelineEntry::Progress(p) => &p.agent_id,
            TimelineEntry::Finding(f) => &f.agent_id,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TimelineSpan {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimelineSummary {
    pub total_progress_entries: usize,
    pub total_findings: usize,
    pub timeline_span: TimelineSpan,
    /// Distinct agents with at least one entry.
    pub agents_active: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Timeline {
    pub task_id: TaskId,
    pub timeline: Vec<TimelineEntry>,
    pub summary: TimelineSummary,
}

pub struct StatusAggregator {
    tasks: Arc<TaskRegistry>,
    global: Arc<GlobalRegistry>,
    ledger: Ledger,
    host: Arc<dyn SessionHost>,
    health: HealthMonitor,
}

impl StatusAggregator {
    pub fn new(
        tasks: Arc<TaskRegistry>,
        global: Arc<GlobalRegistry>,
        ledger: Ledger,
        host: Arc<dyn SessionHost>,
        health: HealthMonitor,
    ) -> Self {
        Self {
            tasks,
            global,
            ledger,
            host,
            health,
        }
    }

    pub fn health(&self) -> &HealthMonitor {
        &self.health
    }

    /// Complete running agents whose session no longer exists. Returns the
    /// agents this call transitioned; a second call finds none.
    pub async fn reconcile(&self, task_id: &TaskId) -> Result<Vec<AgentId>> {
        let task = self.tasks.get(task_id).await?;
        let probes = task.running_agents().map(|agent| {
            let host = Arc::clone(&self.host);
            let id = agent.id.clone();
            let session = agent.tmux_session.clone();
            async move {
                let alive = blocking(move || Ok(host.session_exists(&session))).await;
                (id, alive)
            }
        });

        let mut gone = Vec::new();
        for (id, alive) in join_all(probes).await {
            match alive {
                Ok(false) => gone.push(id),
                Ok(true) => {}
                Err(e) => wlog_warn!("Liveness probe for {} failed: {}", id, e),
            }
        }
        if gone.is_empty() {
            return Ok(Vec::new());
        }

        // A concurrent kill or report may have finished some of these
        // agents already; only those still running transition.
        let now = Utc::now();
        let mut global = self.global.begin().await?;
        let mut doc = self.tasks.begin(task_id).await?;
        let mut completed = Vec::new();
        for id in &gone {
            if doc.complete_agent(id.as_str(), CompletionSource::SessionExited, now)? {
                global.record_exit(id.as_str(), AgentStatus::Completed);
                completed.push(id.clone());
            }
        }

        if !completed.is_empty() {
            doc.commit_with(global).await?;
            wlog!(
                "Reconciled task {}: {} agent(s) exited without reporting",
                task_id,
                completed.len()
            );
        }
        Ok(completed)
    }

    pub async fn snapshot(&self, task_id: &TaskId) -> Result<TaskSnapshot> {
        let reconciled = self.reconcile(task_id).await?;
        let task = self.tasks.get(task_id).await?;
        let progress = self.ledger.read_progress(task_id).await?;
        let findings = self.ledger.read_findings(task_id).await?;

        Ok(TaskSnapshot {
            task_id: task.task_id.clone(),
            description: task.task_description.clone(),
            status: task.status,
            priority: task.priority,
            created_at: task.created_at,
            workspace: task.workspace.clone(),
            limits: task.limits,
            hierarchy: task.hierarchy(),
            enhanced_progress: LedgerView {
                total_progress_entries: progress.len(),
                total_findings: findings.len(),
                recent_updates: newest_first(progress, |p| p.timestamp, SNAPSHOT_RECENT_PROGRESS),
                recent_findings: newest_first(findings, |f| f.timestamp, SNAPSHOT_RECENT_FINDINGS),
            },
            spiral_status: task.spiral_checks.clone(),
            stuck_agents: self.health.stuck_agents(&task, Utc::now()),
            agents: AgentsView {
                counters: TaskCounters::from(&task),
                agents_list: task.agents,
            },
            reconciled,
        })
    }

    pub async fn coordination(&self, task_id: &TaskId) -> Result<CoordinationInfo> {
        let task = self.tasks.get(task_id).await?;
        let progress = self.ledger.read_progress(task_id).await?;
        let findings = self.ledger.read_findings(task_id).await?;

        let agent_status_summary = task
            .agents
            .iter()
            .map(|agent| {
                (
                    agent.id.to_string(),
                    AgentStatusSummary {
                        agent_type: agent.agent_type.clone(),
                        status: agent.status,
                        progress: agent.progress,
                        last_update: agent.last_update,
                        reported_status: agent.reported_status.clone(),
                    },
                )
            })
            .collect();

        Ok(CoordinationInfo {
            task_info: TaskInfo {
                task_id: task.task_id.clone(),
                description: task.task_description.clone(),
                status: task.status,
                workspace: task.workspace.clone(),
            },
            hierarchy: task.hierarchy(),
            coordination_data: CoordinationData {
                recent_progress: newest_first(
                    progress,
                    |p| p.timestamp,
                    COORDINATION_RECENT_PROGRESS,
                ),
                recent_findings: newest_first(
                    findings,
                    |f| f.timestamp,
                    COORDINATION_RECENT_FINDINGS,
                ),
                agent_status_summary,
            },
            agents: AgentsView {
                counters: TaskCounters::from(&task),
                agents_list: task.agents,
            },
        })
    }

    /// Every ledger entry of the task, oldest first.
    pub async fn timeline(&self, task_id: &TaskId) -> Result<Timeline> {
        // Unknown tasks fail here rather than reading as an empty timeline.
        let task = self.tasks.get(task_id).await?;
        let progress = self.ledger.read_progress(task_id).await?;
        let findings = self.ledger.read_findings(task_id).await?;
        let total_progress_entries = progress.len();
        let total_findings = findings.len();

        let mut timeline: Vec<TimelineEntry> = progress
            .into_iter()
            .map(TimelineEntry::Progress)
            .chain(findings.into_iter().map(TimelineEntry::Finding))
            .collect();
        timeline.sort_by_key(|entry| entry.timestamp());

        let agents_active = timeline
            .iter()
            .map(|entry| entry.agent_id())
            .collect::<BTreeSet<_>>()
            .len();
        let summary = TimelineSummary {
            total_progress_entries,
            total_findings,
            timeline_span: TimelineSpan {
                start: timeline.first().map(TimelineEntry::timestamp),
                end: timeline.last().map(TimelineEntry::timestamp),
            },
            agents_active,
        };

        Ok(Timeline {
            task_id: task.task_id,
            timeline,
            summary,
        })
    }
}

/// Stable sort newest first, then keep `limit` entries.
fn newest_first<T, F>(mut entries: Vec<T>, timestamp: F, limit: usize) -> Vec<T>
where
    F: Fn(&T) -> DateTime<Utc>,
{
    entries.sort_by_key(|entry| Reverse(timestamp(entry)));
    entries.truncate(limit);
    entries
}
