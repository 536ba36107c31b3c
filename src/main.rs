use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use warden::config::Config;
use warden::core::{LimitsOverride, Priority};
use warden::ledger::Severity;
use warden::tmux::Tmux;
use warden::tools::{self, ToolCall};
use warden::{wlog, wlog_warn, Error, Orchestrator, Result};

const DEFAULT_MONITOR_INTERVAL_SECS: u64 = 30;

/// Warden - admission control and hierarchy tracking for headless agents
#[derive(Parser, Debug)]
#[command(name = "warden")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    WARDEN_DEBUG=1       Enable debug logging (alternative to --debug)\n    WARDEN_LOG_LEVEL     Log threshold: error, warn, info, debug, trace\n    WARDEN_LOG_FILE      Log file (default ~/.warden/warden.log)\n    WARDEN_WORKSPACE     Workspace root (default ./.agent-workspace)\n    WARDEN_COMMAND       Agent command line")]
pub struct Cli {
    /// Enable debug logging (writes to ~/.warden/warden.log)
    #[arg(short = 'd', long)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Create a task workspace and register it
    CreateTask {
        description: String,

        #[arg(long, short = 'p', default_value = "P2")]
        priority: Priority,

        #[arg(long)]
        max_agents: Option<u32>,

        #[arg(long)]
        max_concurrent: Option<u32>,

        #[arg(long)]
        max_depth: Option<u32>,
    },

    /// Deploy an agent into a task
    Deploy {
        task_id: String,
        agent_type: String,
        prompt: String,

        /// Parent agent ID (defaults to the orchestrator)
        #[arg(long)]
        parent: Option<String>,
    },

    /// Deploy a child agent under an existing agent
    SpawnChild {
        task_id: String,
        parent_agent_id: String,
        child_agent_type: String,
        child_prompt: String,
    },

    /// Show a task snapshot (reconciles dead sessions first)
    Status { task_id: String },

    /// Terminate an agent and its session
    Kill {
        task_id: String,
        agent_id: String,

        #[arg(long)]
        reason: Option<String>,
    },

    /// Capture an agent's recent session output
    Output { task_id: String, agent_id: String },

    /// Report progress for an agent (100 completes it)
    Progress {
        task_id: String,
        agent_id: String,
        status: String,
        message: String,
        #[arg(default_value_t = 0)]
        progress: u32,
    },

    /// Report a finding for an agent
    Finding {
        task_id: String,
        agent_id: String,
        finding_type: String,
        severity: Severity,
        message: String,

        /// Extra JSON payload
        #[arg(long)]
        data: Option<String>,
    },

    /// List every registered task
    ListTasks,

    /// Merged progress and findings timeline for a task
    Timeline { task_id: String },

    /// Mark agents whose sessions have exited as completed
    Reconcile { task_id: String },

    /// Serve JSON-lines tool calls on stdin/stdout
    Serve,

    /// Print the effective configuration as TOML
    Config {
        /// Also write it to ~/.warden/warden.toml
        #[arg(long)]
        write: bool,
    },

    /// Periodically reconcile every task and report unhealthy agents
    Monitor {
        /// Seconds between sweeps
        #[arg(long, default_value_t = DEFAULT_MONITOR_INTERVAL_SECS)]
        interval: u64,
    },
}

impl Command {
    /// The tool call a one-shot command maps to. `None` for long-running
    /// and resource commands.
    pub fn tool_call(&self) -> Result<Option<ToolCall>> {
        let call = match self.clone() {
            Command::CreateTask {
                description,
                priority,
                max_agents,
                max_concurrent,
                max_depth,
            } => ToolCall::CreateTask {
                description,
                priority: Some(priority),
                limits: LimitsOverride {
                    max_agents,
                    max_concurrent,
                    max_depth,
                },
            },
            Command::Deploy {
                task_id,
                agent_type,
                prompt,
                parent,
            } => ToolCall::DeployAgent {
                task_id,
                agent_type,
                prompt,
                parent,
            },
            Command::SpawnChild {
                task_id,
                parent_agent_id,
                child_agent_type,
                child_prompt,
            } => ToolCall::SpawnChildAgent {
                task_id,
                parent_agent_id,
                child_agent_type,
                child_prompt,
            },
            Command::Status { task_id } => ToolCall::GetTaskStatus { task_id },
            Command::Kill {
                task_id,
                agent_id,
                reason,
            } => ToolCall::KillAgent {
                task_id,
                agent_id,
                reason,
            },
            Command::Output { task_id, agent_id } => ToolCall::GetAgentOutput { task_id, agent_id },
            Command::Progress {
                task_id,
                agent_id,
                status,
                message,
                progress,
            } => ToolCall::UpdateAgentProgress {
                task_id,
                agent_id,
                status,
                message,
                progress,
            },
            Command::Finding {
                task_id,
                agent_id,
                finding_type,
                severity,
                message,
                data,
            } => {
                let data = match data {
                    Some(raw) => Some(serde_json::from_str::<Value>(&raw).map_err(|e| {
                        Error::Validation(format!("--data is not valid JSON: {}", e))
                    })?),
                    None => None,
                };
                ToolCall::ReportAgentFinding {
                    task_id,
                    agent_id,
                    finding_type,
                    severity,
                    message,
                    data,
                }
            }
            Command::Reconcile { task_id } => ToolCall::Reconcile { task_id },
            Command::ListTasks
            | Command::Timeline { .. }
            | Command::Serve
            | Command::Config { .. }
            | Command::Monitor { .. } => return Ok(None),
        };
        Ok(Some(call))
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    warden::log::init_with_debug(cli.debug);
    if warden::log::is_debug() {
        wlog!("warden starting (debug mode enabled): {:?}", cli.command);
    } else {
        wlog!("warden starting");
    }

    let config = Config::load()?;
    if let Command::Config { write } = cli.command {
        if write {
            let path = config.save()?;
            eprintln!("Wrote {}", path.display());
        }
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    let orch = Arc::new(Orchestrator::from_config(config, Arc::new(Tmux))?);
    let deploys = matches!(
        cli.command,
        Command::Deploy { .. } | Command::SpawnChild { .. } | Command::Serve
    );
    if deploys && !orch.command().is_available() {
        wlog_warn!(
            "{} agent command '{}' not found on PATH; sessions will exit immediately",
            orch.command().name(),
            orch.command().binary()
        );
    }

    let rt = tokio::runtime::Runtime::new()?;
    let response = rt.block_on(async {
        match &cli.command {
            Command::Serve => tools::serve(Arc::clone(&orch)).await.map(|_| None),
            Command::Monitor { interval } => {
                run_monitor(&orch, Duration::from_secs((*interval).max(1)))
                    .await
                    .map(|_| None)
            }
            Command::ListTasks => Ok(Some(tools::read_resource(&orch, tools::RESOURCE_TASKS).await)),
            Command::Timeline { task_id } => Ok(Some(
                tools::read_resource(&orch, &format!("task://{}/progress-timeline", task_id)).await,
            )),
            command => match command.tool_call() {
                Ok(Some(call)) => Ok(Some(tools::execute(&orch, call).await)),
                Ok(None) => Ok(None),
                Err(e) => Ok(Some(tools::failure(&e))),
            },
        }
    })?;

    if let Some(response) = response {
        println!("{}", serde_json::to_string_pretty(&response)?);
        if response["success"] != Value::Bool(true) {
            std::process::exit(1);
        }
    }
    Ok(())
}

/// Sweep every task until ctrl-c: reconcile exited sessions, then print
/// one JSON line per health event.
async fn run_monitor(orch: &Orchestrator, interval: Duration) -> Result<()> {
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    wlog!("Monitor started (interval {:?})", interval);
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let global = orch.list_tasks().await?;
        for task_id in global.tasks.keys() {
            match orch.reconcile(task_id).await {
                Ok(reconciled) if !reconciled.completed.is_empty() => {
                    println!(
                        "{}",
                        json!({ "event": "reconciled", "task_id": task_id, "completed": reconciled.completed })
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    wlog_warn!("Monitor: reconcile of {} failed: {}", task_id, e);
                    continue;
                }
            }
            match orch.health_report(task_id).await {
                Ok(events) => {
                    for event in events {
                        wlog_warn!("Monitor: {} in task {} is unhealthy", event.agent_id(), task_id);
                        let mut line = serde_json::to_value(&event)?;
                        line["task_id"] = json!(task_id);
                        println!("{}", line);
                    }
                }
                Err(e) => wlog_warn!("Monitor: health check of {} failed: {}", task_id, e),
            }
        }
    }
    wlog!("Monitor stopped");
    Ok(())
}
