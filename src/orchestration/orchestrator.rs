//! The service behind every caller-facing operation.
//!
//! Locking rules:
//! - the global lock is always taken before a task lock, never after;
//! - no lock is held across a session-host call; those run on the blocking
//!   pool through [`crate::util::blocking`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::guard::{Admission, SpawnGuard};
use super::health::{HealthConfig, HealthEvent, HealthMonitor};
use super::prompt::AgentPrompt;
use super::status::{CoordinationInfo, StatusAggregator, TaskSnapshot, Timeline};
use crate::agent::AgentCommand;
use crate::config::Config;
use crate::core::{
    validate_agent_type, AgentId, AgentRecord, AgentStatus, GlobalState, LimitsOverride, Priority,
    TaskId, TaskLimits, TaskStatus, ROOT_PARENT,
};
use crate::ledger::{FindingEntry, Ledger, ProgressEntry, Severity};
use crate::registry::{GlobalRegistry, TaskRegistry};
use crate::session::SessionHost;
use crate::tmux::Tmux;
use crate::util::{blocking, blocking_with_timeout};
use crate::workspace::Workspace;
use crate::{wlog, wlog_debug, wlog_error, wlog_warn, Error, Result};

/// Upper bound on a single session creation.
pub const SESSION_CREATE_TIMEOUT: Duration = Duration::from_secs(30);

const DEFAULT_KILL_REASON: &str = "Manual termination";

#[derive(Debug, Clone, Serialize)]
pub struct TaskCreated {
    pub task_id: TaskId,
    pub description: String,
    pub priority: Priority,
    pub workspace: PathBuf,
    pub status: TaskStatus,
    pub limits: TaskLimits,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentDeployed {
    pub agent_id: AgentId,
    pub tmux_session: String,
    #[serde(rename = "type")]
    pub agent_type: String,
    pub parent: String,
    pub depth: u32,
    pub task_id: TaskId,
    pub status: &'static str,
    pub workspace: PathBuf,
    pub prompt_file: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentKilled {
    pub agent_id: AgentId,
    pub tmux_session: String,
    pub session_killed: bool,
    pub reason: String,
    /// Status after the call: `terminated`, or the earlier terminal status.
    pub status: AgentStatus,
    /// The agent had already reached a terminal state; counters untouched.
    pub already_terminal: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Terminated,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentOutput {
    pub agent_id: AgentId,
    pub tmux_session: String,
    pub session_status: SessionStatus,
    pub output: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OwnUpdate {
    pub agent_id: String,
    pub status: String,
    pub progress: u8,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// Lifecycle status after the update.
    pub agent_status: AgentStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressReport {
    pub own_update: OwnUpdate,
    pub coordination_info: CoordinationInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct FindingReport {
    pub own_finding: FindingEntry,
    pub coordination_info: CoordinationInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct Reconciled {
    pub task_id: TaskId,
    pub completed: Vec<AgentId>,
}

#[derive(Debug, Serialize)]
struct DeployLog<'a> {
    agent_id: &'a AgentId,
    task_id: &'a TaskId,
    #[serde(rename = "type")]
    agent_type: &'a str,
    parent: &'a str,
    depth: u32,
    tmux_session: &'a str,
    command: &'a [String],
    working_dir: &'a Path,
    prompt_file: &'a Path,
    deployed_at: DateTime<Utc>,
}

fn is_denial(err: &Error) -> bool {
    matches!(
        err,
        Error::LimitExceeded { .. } | Error::SpawnRuleViolation { .. }
    )
}

pub struct Orchestrator {
    config: Config,
    workspace: Workspace,
    tasks: Arc<TaskRegistry>,
    global: Arc<GlobalRegistry>,
    ledger: Ledger,
    host: Arc<dyn SessionHost>,
    guard: SpawnGuard,
    status: StatusAggregator,
    command: AgentCommand,
    working_dir: PathBuf,
    startup_grace: Duration,
    session_timeout: Duration,
}

impl Orchestrator {
    /// Build from a loaded config; the workspace root comes from
    /// [`Config::workspace_dir`].
    pub fn from_config(config: Config, host: Arc<dyn SessionHost>) -> Result<Self> {
        let root = config.workspace_dir()?;
        Self::new(config, root, host)
    }

    pub fn new(config: Config, workspace_root: PathBuf, host: Arc<dyn SessionHost>) -> Result<Self> {
        let workspace = Workspace::new(workspace_root);
        let tasks = Arc::new(TaskRegistry::new(workspace.clone()));
        let global = Arc::new(GlobalRegistry::new(&workspace, config.global_max_concurrent()));
        let ledger = Ledger::new(workspace.clone());
        let health = HealthMonitor::new(HealthConfig::with_stuck_threshold(config.stuck_threshold()));
        let status = StatusAggregator::new(
            Arc::clone(&tasks),
            Arc::clone(&global),
            ledger.clone(),
            Arc::clone(&host),
            health,
        );
        Ok(Self {
            guard: SpawnGuard::new(config.spawn_rules()),
            command: AgentCommand::from_config(&config),
            startup_grace: config.startup_grace(),
            session_timeout: SESSION_CREATE_TIMEOUT,
            working_dir: std::env::current_dir()?,
            config,
            workspace,
            tasks,
            global,
            ledger,
            host,
            status,
        })
    }

    /// Directory agent sessions start in. Defaults to the current directory.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    pub fn with_startup_grace(mut self, grace: Duration) -> Self {
        self.startup_grace = grace;
        self
    }

    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn status(&self) -> &StatusAggregator {
        &self.status
    }

    pub fn command(&self) -> &AgentCommand {
        &self.command
    }

    pub fn host_name(&self) -> &'static str {
        self.host.name()
    }

    pub async fn create_task(
        &self,
        description: &str,
        priority: Priority,
        overrides: &LimitsOverride,
    ) -> Result<TaskCreated> {
        let limits = self.config.task_limits().with_overrides(overrides)?;
        let task = self.tasks.create(description, priority, limits).await?;
        self.global
            .mutate(|global| {
                global.register_task(&task);
                Ok(())
            })
            .await?;
        Ok(TaskCreated {
            task_id: task.task_id,
            description: task.task_description,
            priority: task.priority,
            workspace: task.workspace,
            status: task.status,
            limits: task.limits,
        })
    }

    /// Admit, start and register one agent.
    ///
    /// The guard runs once without locks to fail fast, the session is
    /// started with no lock held, and the guard runs again under the global
    /// and task locks before the agent is appended. A denial at that point
    /// kills the new session and leaves the registry untouched.
    pub async fn deploy_agent(
        &self,
        task_id: &str,
        agent_type: &str,
        prompt: &str,
        parent: Option<&str>,
    ) -> Result<AgentDeployed> {
        let task_id = TaskId::parse(task_id)?;
        validate_agent_type(agent_type)?;
        if prompt.trim().is_empty() {
            return Err(Error::Validation("Prompt cannot be empty".to_string()));
        }
        let parent = parent.unwrap_or(ROOT_PARENT);

        let host = Arc::clone(&self.host);
        if !blocking(move || Ok(host.is_available())).await? {
            return Err(Error::ExternalCapabilityUnavailable(format!(
                "{} is not available on this host",
                self.host.name()
            )));
        }

        let task = self.tasks.get(&task_id).await?;
        let global = self.global.get().await?;
        let admission = match self.guard.evaluate(&global, &task, parent, agent_type) {
            Ok(admission) => admission,
            Err(e) => return Err(self.deny(&task_id, e).await),
        };

        let agent_id = AgentId::generate(agent_type);
        let session_name = Tmux::session_name(agent_id.as_str());
        let prompt_file = self.workspace.prompt_path(&task_id, agent_id.as_str());
        let full_prompt = AgentPrompt {
            agent_id: &agent_id,
            agent_type,
            task_id: &task_id,
            task_description: &task.task_description,
            parent,
            depth: admission.depth,
            max_depth: task.limits.max_depth,
            workspace: &task.workspace,
            mission: prompt,
        }
        .render();
        tokio::fs::write(&prompt_file, full_prompt).await?;
        let command = self.command.command(&prompt_file);

        if let Err(e) = self.start_session(&session_name, &command).await {
            let _ = tokio::fs::remove_file(&prompt_file).await;
            return Err(e);
        }

        let record = AgentRecord::new(
            agent_id.clone(),
            agent_type,
            &session_name,
            parent,
            admission.depth,
            prompt,
            Utc::now(),
        );
        let admission = match self.commit_spawn(&task_id, parent, record).await {
            Ok(admission) => admission,
            Err(e) => {
                self.kill_session(&session_name).await;
                let _ = tokio::fs::remove_file(&prompt_file).await;
                wlog_warn!(
                    "Deploy of {} to task {} rolled back: {}",
                    agent_id,
                    task_id,
                    e
                );
                return Err(e);
            }
        };

        let log = DeployLog {
            agent_id: &agent_id,
            task_id: &task_id,
            agent_type,
            parent,
            depth: admission.depth,
            tmux_session: &session_name,
            command: &command,
            working_dir: &self.working_dir,
            prompt_file: &prompt_file,
            deployed_at: Utc::now(),
        };
        let log_path = self.workspace.deploy_log_path(&task_id, agent_id.as_str());
        match serde_json::to_vec_pretty(&log) {
            Ok(bytes) => {
                if let Err(e) = tokio::fs::write(&log_path, bytes).await {
                    wlog_warn!("Failed to write deploy log {}: {}", log_path.display(), e);
                }
            }
            Err(e) => wlog_warn!("Failed to encode deploy log for {}: {}", agent_id, e),
        }

        wlog!(
            "Deployed {} ({}) in task {} parent={} depth={}",
            agent_id,
            agent_type,
            task_id,
            parent,
            admission.depth
        );
        Ok(AgentDeployed {
            agent_id,
            tmux_session: session_name,
            agent_type: agent_type.to_string(),
            parent: parent.to_string(),
            depth: admission.depth,
            task_id,
            status: "deployed",
            workspace: task.workspace,
            prompt_file,
        })
    }

    pub async fn spawn_child_agent(
        &self,
        task_id: &str,
        parent_agent_id: &str,
        child_agent_type: &str,
        child_prompt: &str,
    ) -> Result<AgentDeployed> {
        self.deploy_agent(task_id, child_agent_type, child_prompt, Some(parent_agent_id))
            .await
    }

    /// Start the session and confirm it survives the startup grace period.
    async fn start_session(&self, name: &str, command: &[String]) -> Result<()> {
        let host = Arc::clone(&self.host);
        let session = name.to_string();
        let cwd = self.working_dir.clone();
        let cmd = command.to_vec();
        let late_host = Arc::clone(&self.host);
        let late_session = name.to_string();
        let created = blocking_with_timeout(
            self.session_timeout,
            move || host.create_session(&session, &cwd, &cmd),
            move |created| {
                // The deploy already failed; nothing may outlive it.
                if created.is_ok() {
                    late_host.kill_session(&late_session);
                    wlog_warn!("Killed session {} that came up after its deadline", late_session);
                }
            },
        )
        .await;
        match created {
            Ok(()) => {}
            Err(e @ Error::SessionCreationFailure(_)) => return Err(e),
            Err(e @ Error::Timeout(_)) => {
                wlog_error!("Session {} was not created in time: {}", name, e);
                return Err(Error::SessionCreationFailure(e.to_string()));
            }
            Err(e) => {
                wlog_error!("Session {} could not be created: {}", name, e);
                self.kill_session(name).await;
                return Err(Error::SessionCreationFailure(e.to_string()));
            }
        }

        if !self.startup_grace.is_zero() {
            tokio::time::sleep(self.startup_grace).await;
        }
        if !self.session_alive(name).await {
            return Err(Error::SessionCreationFailure(format!(
                "Agent session {} terminated immediately after creation",
                name
            )));
        }
        wlog_debug!("Session {} is up", name);
        Ok(())
    }

    /// Re-check admission and append the agent, holding the global lock
    /// and then the task lock.
    async fn commit_spawn(
        &self,
        task_id: &TaskId,
        parent: &str,
        record: AgentRecord,
    ) -> Result<Admission> {
        let mut global = self.global.begin().await?;
        let mut task = self.tasks.begin(task_id).await?;

        let admission = match self.guard.evaluate(&global, &task, parent, &record.agent_type) {
            Ok(admission) => admission,
            Err(e) => {
                if is_denial(&e) {
                    task.record_violation(Utc::now());
                    task.commit().await?;
                }
                return Err(e);
            }
        };

        global.record_spawn(task_id.as_str(), &record);
        task.record_spawn(record);
        task.commit_with(global).await?;
        Ok(admission)
    }

    /// Count a denial against the task and hand the error back.
    async fn deny(&self, task_id: &TaskId, err: Error) -> Error {
        if is_denial(&err) {
            wlog_warn!("Spawn denied in task {}: {}", task_id, err);
            let recorded = self
                .tasks
                .mutate(task_id, |task| {
                    task.record_violation(Utc::now());
                    Ok(())
                })
                .await;
            if let Err(e) = recorded {
                wlog_warn!("Failed to record violation for {}: {}", task_id, e);
            }
        }
        err
    }

    async fn session_alive(&self, name: &str) -> bool {
        let host = Arc::clone(&self.host);
        let session = name.to_string();
        match blocking(move || Ok(host.session_exists(&session))).await {
            Ok(alive) => alive,
            Err(e) => {
                wlog_warn!("Probe of session {} failed: {}", name, e);
                false
            }
        }
    }

    async fn kill_session(&self, name: &str) -> bool {
        let host = Arc::clone(&self.host);
        let session = name.to_string();
        match blocking(move || Ok(host.kill_session(&session))).await {
            Ok(killed) => killed,
            Err(e) => {
                wlog_warn!("Kill of session {} failed: {}", name, e);
                false
            }
        }
    }

    pub async fn get_task_status(&self, task_id: &str) -> Result<TaskSnapshot> {
        self.status.snapshot(&TaskId::parse(task_id)?).await
    }

    /// Kill the agent's session, then mark it terminated whatever the kill
    /// reported. Killing a terminal agent changes nothing.
    pub async fn kill_agent(
        &self,
        task_id: &str,
        agent_id: &str,
        reason: Option<&str>,
    ) -> Result<AgentKilled> {
        let task_id = TaskId::parse(task_id)?;
        let reason = reason
            .filter(|r| !r.trim().is_empty())
            .unwrap_or(DEFAULT_KILL_REASON)
            .to_string();
        let task = self.tasks.get(&task_id).await?;
        let agent = task.require_agent(agent_id)?;
        let session_name = agent.tmux_session.clone();

        let session_killed = self.kill_session(&session_name).await;

        let mut global = self.global.begin().await?;
        let mut doc = self.tasks.begin(&task_id).await?;
        let transitioned = doc.terminate_agent(agent_id, &reason, Utc::now())?;
        let status = doc.require_agent(agent_id)?.status;
        if transitioned {
            global.record_exit(agent_id, AgentStatus::Terminated);
            doc.commit_with(global).await?;
            wlog!(
                "Terminated {} in task {} (session_killed={}): {}",
                agent_id,
                task_id,
                session_killed,
                reason
            );
        } else {
            wlog_debug!("Kill of {} ignored: already {}", agent_id, status);
        }

        Ok(AgentKilled {
            agent_id: AgentId::from(agent_id),
            tmux_session: session_name,
            session_killed,
            reason,
            status,
            already_terminal: !transitioned,
        })
    }

    pub async fn get_agent_output(&self, task_id: &str, agent_id: &str) -> Result<AgentOutput> {
        let task_id = TaskId::parse(task_id)?;
        let task = self.tasks.get(&task_id).await?;
        let agent = task.require_agent(agent_id)?;
        let session_name = agent.tmux_session.clone();

        if !self.session_alive(&session_name).await {
            return Ok(AgentOutput {
                agent_id: agent.id.clone(),
                tmux_session: session_name,
                session_status: SessionStatus::Terminated,
                output: String::new(),
            });
        }

        let host = Arc::clone(&self.host);
        let session = session_name.clone();
        let output = blocking(move || host.capture_output(&session)).await?;
        Ok(AgentOutput {
            agent_id: agent.id.clone(),
            tmux_session: session_name,
            session_status: SessionStatus::Running,
            output,
        })
    }

    /// Record an agent's self-report. The label is informational; only
    /// `progress == 100` completes a running agent.
    pub async fn update_agent_progress(
        &self,
        task_id: &str,
        agent_id: &str,
        status: &str,
        message: &str,
        progress: u8,
    ) -> Result<ProgressReport> {
        if progress > 100 {
            return Err(Error::Validation(format!(
                "Progress must be between 0 and 100, got {}",
                progress
            )));
        }
        let task_id = TaskId::parse(task_id)?;
        self.tasks.get(&task_id).await?.require_agent(agent_id)?;

        let entry = ProgressEntry {
            timestamp: Utc::now(),
            agent_id: agent_id.to_string(),
            status: status.to_string(),
            message: message.to_string(),
            progress,
        };
        self.ledger.append_progress(&task_id, &entry).await?;

        // Only a 100% report can complete an agent and touch the global
        // counters, so only that one takes the global lock.
        let global = if progress == 100 {
            Some(self.global.begin().await?)
        } else {
            None
        };
        let mut doc = self.tasks.begin(&task_id).await?;
        let completed =
            doc.record_progress(agent_id, status, message, progress, entry.timestamp)?;
        let agent_status = doc.require_agent(agent_id)?.status;
        match global {
            Some(mut global) if completed => {
                global.record_exit(agent_id, AgentStatus::Completed);
                doc.commit_with(global).await?;
                wlog!("Agent {} in task {} reported completion", agent_id, task_id);
            }
            _ => {
                doc.commit().await?;
            }
        }

        Ok(ProgressReport {
            own_update: OwnUpdate {
                agent_id: entry.agent_id,
                status: entry.status,
                progress,
                message: entry.message,
                timestamp: entry.timestamp,
                agent_status,
            },
            coordination_info: self.status.coordination(&task_id).await?,
        })
    }

    pub async fn report_finding(
        &self,
        task_id: &str,
        agent_id: &str,
        finding_type: &str,
        severity: Severity,
        message: &str,
        data: Option<serde_json::Value>,
    ) -> Result<FindingReport> {
        if finding_type.trim().is_empty() {
            return Err(Error::Validation("Finding type cannot be empty".to_string()));
        }
        let task_id = TaskId::parse(task_id)?;
        self.tasks.get(&task_id).await?.require_agent(agent_id)?;

        let entry = FindingEntry {
            timestamp: Utc::now(),
            agent_id: agent_id.to_string(),
            finding_type: finding_type.to_string(),
            severity,
            message: message.to_string(),
            data: data.unwrap_or_else(|| serde_json::json!({})),
        };
        self.ledger.append_finding(&task_id, &entry).await?;

        // A finding is activity too; it resets the silence window.
        let timestamp = entry.timestamp;
        self.tasks
            .update_agent(&task_id, agent_id, |agent| {
                if agent.is_running() {
                    agent.last_update = timestamp;
                }
            })
            .await?;
        if severity >= Severity::High {
            wlog!(
                "{} finding from {} in task {}: {}",
                severity,
                agent_id,
                task_id,
                message
            );
        }

        Ok(FindingReport {
            own_finding: entry,
            coordination_info: self.status.coordination(&task_id).await?,
        })
    }

    pub async fn reconcile(&self, task_id: &str) -> Result<Reconciled> {
        let task_id = TaskId::parse(task_id)?;
        let completed = self.status.reconcile(&task_id).await?;
        Ok(Reconciled { task_id, completed })
    }

    pub async fn list_tasks(&self) -> Result<GlobalState> {
        self.global.get().await
    }

    pub async fn timeline(&self, task_id: &str) -> Result<Timeline> {
        self.status.timeline(&TaskId::parse(task_id)?).await
    }

    /// Stuck agents plus failure patterns in the output of running agents.
    pub async fn health_report(&self, task_id: &str) -> Result<Vec<HealthEvent>> {
        let task_id = TaskId::parse(task_id)?;
        let task = self.tasks.get(&task_id).await?;
        let health = self.status.health();
        let mut events = health.stuck_agents(&task, Utc::now());

        for agent in task.running_agents() {
            let host = Arc::clone(&self.host);
            let session = agent.tmux_session.clone();
            let output = match blocking(move || host.capture_output(&session)).await {
                Ok(output) => output,
                Err(e) => {
                    wlog_debug!("No output for {}: {}", agent.id, e);
                    continue;
                }
            };
            if let Some(event) = health.check_output(&agent.id, &output) {
                events.push(event);
            }
        }
        Ok(events)
    }
}
