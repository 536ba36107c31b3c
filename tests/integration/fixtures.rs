//! Test fixtures for integration tests.

use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use warden::config::Config;
use warden::core::{LimitsOverride, Priority, TaskDocument, TaskId};
use warden::registry::TaskRegistry;
use warden::session::InMemorySessionHost;
use warden::Orchestrator;

/// An orchestrator on a throwaway workspace with an in-memory session host.
pub struct Harness {
    pub temp_dir: TempDir,
    pub host: Arc<InMemorySessionHost>,
    pub orch: Arc<Orchestrator>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self::build(config, Duration::from_secs(5))
    }

    /// An orchestrator that gives up on session creation after `timeout`.
    pub fn with_session_timeout(timeout: Duration) -> Self {
        Self::build(Config::default(), timeout)
    }

    fn build(mut config: Config, session_timeout: Duration) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        if config.command.is_none() {
            config.command = Some("cat".to_string());
        }
        let host = Arc::new(InMemorySessionHost::new());
        let orch = Orchestrator::new(
            config,
            temp_dir.path().join("workspace"),
            Arc::clone(&host) as Arc<dyn warden::session::SessionHost>,
        )
        .expect("Failed to build orchestrator")
        .with_working_dir(temp_dir.path())
        .with_startup_grace(Duration::ZERO)
        .with_session_timeout(session_timeout);
        Self {
            temp_dir,
            host,
            orch: Arc::new(orch),
        }
    }

    /// Create a task with the given limits and return its id.
    pub async fn task(&self, max_agents: u32, max_concurrent: u32, max_depth: u32) -> String {
        let limits = LimitsOverride {
            max_agents: Some(max_agents),
            max_concurrent: Some(max_concurrent),
            max_depth: Some(max_depth),
        };
        self.orch
            .create_task("integration task", Priority::P1, &limits)
            .await
            .expect("Failed to create task")
            .task_id
            .to_string()
    }

    /// Deploy a root agent and return its id.
    pub async fn deploy(&self, task_id: &str, agent_type: &str) -> String {
        self.orch
            .deploy_agent(task_id, agent_type, "do the work", None)
            .await
            .expect("Failed to deploy agent")
            .agent_id
            .to_string()
    }

    /// The stored task document, read straight from the registry.
    pub async fn document(&self, task_id: &str) -> TaskDocument {
        TaskRegistry::new(self.orch.workspace().clone())
            .get(&TaskId(task_id.to_string()))
            .await
            .expect("Failed to read task document")
    }

    pub fn session_of(&self, agent_id: &str) -> String {
        warden::tmux::Tmux::session_name(agent_id)
    }
}
