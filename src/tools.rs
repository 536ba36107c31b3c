//! Tool-call surface: request decoding, result envelopes, resource views and
//! the JSON-lines server behind `warden serve`.
//!
//! Every response is an object with `success`. Failures carry
//! `error: {kind, message, details, retryable}`.

use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::core::{LimitsOverride, Priority};
use crate::ledger::Severity;
use crate::orchestration::Orchestrator;
use crate::{wlog, wlog_debug, wlog_warn, Error, Result};

pub const RESOURCE_TASKS: &str = "tasks://list";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "tool", content = "args", rename_all = "snake_case")]
pub enum ToolCall {
    CreateTask {
        description: String,
        #[serde(default)]
        priority: Option<Priority>,
        #[serde(default)]
        limits: LimitsOverride,
    },
    DeployAgent {
        task_id: String,
        agent_type: String,
        prompt: String,
        #[serde(default)]
        parent: Option<String>,
    },
    GetTaskStatus {
        task_id: String,
    },
    KillAgent {
        task_id: String,
        agent_id: String,
        #[serde(default)]
        reason: Option<String>,
    },
    GetAgentOutput {
        task_id: String,
        agent_id: String,
    },
    UpdateAgentProgress {
        task_id: String,
        agent_id: String,
        status: String,
        message: String,
        #[serde(default)]
        progress: u32,
    },
    #[serde(alias = "report_finding")]
    ReportAgentFinding {
        task_id: String,
        agent_id: String,
        finding_type: String,
        severity: Severity,
        message: String,
        #[serde(default)]
        data: Option<Value>,
    },
    SpawnChildAgent {
        task_id: String,
        parent_agent_id: String,
        child_agent_type: String,
        child_prompt: String,
    },
    Reconcile {
        task_id: String,
    },
}

impl ToolCall {
    pub fn name(&self) -> &'static str {
        match self {
            ToolCall::CreateTask { .. } => "create_task",
            ToolCall::DeployAgent { .. } => "deploy_agent",
            ToolCall::GetTaskStatus { .. } => "get_task_status",
            ToolCall::KillAgent { .. } => "kill_agent",
            ToolCall::GetAgentOutput { .. } => "get_agent_output",
            ToolCall::UpdateAgentProgress { .. } => "update_agent_progress",
            ToolCall::ReportAgentFinding { .. } => "report_agent_finding",
            ToolCall::SpawnChildAgent { .. } => "spawn_child_agent",
            ToolCall::Reconcile { .. } => "reconcile",
        }
    }
}

/// A resource view addressed by URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    TaskList,
    TaskStatus(String),
    ProgressTimeline(String),
}

impl Resource {
    pub fn parse(uri: &str) -> Result<Self> {
        if uri == RESOURCE_TASKS {
            return Ok(Resource::TaskList);
        }
        let unknown = || Error::Validation(format!("Unknown resource '{}'", uri));
        let rest = uri.strip_prefix("task://").ok_or_else(unknown)?;
        let (task_id, view) = rest.split_once('/').ok_or_else(unknown)?;
        match view {
            "status" => Ok(Resource::TaskStatus(task_id.to_string())),
            "progress-timeline" => Ok(Resource::ProgressTimeline(task_id.to_string())),
            _ => Err(unknown()),
        }
    }
}

/// `{success: true, ...payload}`. Non-object payloads land under `result`.
pub fn success(payload: Value) -> Value {
    match payload {
        Value::Object(mut map) => {
            map.insert("success".to_string(), Value::Bool(true));
            Value::Object(map)
        }
        other => json!({ "success": true, "result": other }),
    }
}

pub fn failure(err: &Error) -> Value {
    json!({
        "success": false,
        "error": {
            "kind": err.kind(),
            "message": err.to_string(),
            "details": error_details(err),
            "retryable": err.is_retryable(),
        }
    })
}

fn error_details(err: &Error) -> Value {
    match err {
        Error::TaskNotFound(task_id) => json!({ "task_id": task_id }),
        Error::AgentNotFound { task_id, agent_id } => {
            json!({ "task_id": task_id, "agent_id": agent_id })
        }
        Error::LimitExceeded {
            limit,
            current,
            ceiling,
        } => json!({ "limit": limit, "current": current, "ceiling": ceiling }),
        Error::SpawnRuleViolation {
            parent_type,
            child_type,
        } => json!({ "parent_type": parent_type, "child_type": child_type }),
        _ => Value::Null,
    }
}

fn envelope<T: serde::Serialize>(result: Result<T>) -> Value {
    match result.and_then(|payload| Ok(serde_json::to_value(payload)?)) {
        Ok(payload) => success(payload),
        Err(e) => failure(&e),
    }
}

pub async fn execute(orch: &Orchestrator, call: ToolCall) -> Value {
    wlog_debug!("tool call {}", call.name());
    match call {
        ToolCall::CreateTask {
            description,
            priority,
            limits,
        } => envelope(
            orch.create_task(&description, priority.unwrap_or_default(), &limits)
                .await,
        ),
        ToolCall::DeployAgent {
            task_id,
            agent_type,
            prompt,
            parent,
        } => envelope(
            orch.deploy_agent(&task_id, &agent_type, &prompt, parent.as_deref())
                .await,
        ),
        ToolCall::GetTaskStatus { task_id } => envelope(orch.get_task_status(&task_id).await),
        ToolCall::KillAgent {
            task_id,
            agent_id,
            reason,
        } => envelope(
            orch.kill_agent(&task_id, &agent_id, reason.as_deref())
                .await,
        ),
        ToolCall::GetAgentOutput { task_id, agent_id } => {
            envelope(orch.get_agent_output(&task_id, &agent_id).await)
        }
        ToolCall::UpdateAgentProgress {
            task_id,
            agent_id,
            status,
            message,
            progress,
        } => {
            // Out-of-range values saturate and are rejected downstream.
            let progress = u8::try_from(progress).unwrap_or(u8::MAX);
            envelope(
                orch.update_agent_progress(&task_id, &agent_id, &status, &message, progress)
                    .await,
            )
        }
        ToolCall::ReportAgentFinding {
            task_id,
            agent_id,
            finding_type,
            severity,
            message,
            data,
        } => envelope(
            orch.report_finding(&task_id, &agent_id, &finding_type, severity, &message, data)
                .await,
        ),
        ToolCall::SpawnChildAgent {
            task_id,
            parent_agent_id,
            child_agent_type,
            child_prompt,
        } => envelope(
            orch.spawn_child_agent(&task_id, &parent_agent_id, &child_agent_type, &child_prompt)
                .await,
        ),
        ToolCall::Reconcile { task_id } => envelope(orch.reconcile(&task_id).await),
    }
}

pub async fn read_resource(orch: &Orchestrator, uri: &str) -> Value {
    match Resource::parse(uri) {
        Ok(Resource::TaskList) => envelope(orch.list_tasks().await),
        Ok(Resource::TaskStatus(task_id)) => envelope(orch.get_task_status(&task_id).await),
        Ok(Resource::ProgressTimeline(task_id)) => envelope(orch.timeline(&task_id).await),
        Err(e) => failure(&e),
    }
}

/// Handle one request line: `{"id", "tool", "args"}` or `{"id", "resource"}`.
/// The request `id` is echoed back unchanged.
pub async fn handle_line(orch: &Orchestrator, line: &str) -> Value {
    let mut request: Map<String, Value> = match serde_json::from_str(line) {
        Ok(map) => map,
        Err(e) => return failure(&Error::Validation(format!("Invalid request: {}", e))),
    };
    let id = request.remove("id");

    let mut response = match request.get("resource").and_then(Value::as_str) {
        Some(uri) => read_resource(orch, uri).await,
        None => match serde_json::from_value::<ToolCall>(Value::Object(request)) {
            Ok(call) => execute(orch, call).await,
            Err(e) => failure(&Error::Validation(format!("Invalid tool call: {}", e))),
        },
    };
    if let (Some(id), Value::Object(map)) = (id, &mut response) {
        map.insert("id".to_string(), id);
    }
    response
}

/// Serve JSON-lines requests from stdin until EOF.
pub async fn serve(orch: Arc<Orchestrator>) -> Result<()> {
    wlog!("Serving tool calls on stdin ({} session host)", orch.host_name());
    serve_lines(orch, BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await?;
    wlog!("stdin closed, server exiting");
    Ok(())
}

/// Answer every request line from `input` on `output`. Requests run
/// concurrently; responses are written one per line as they complete.
/// Returns the writer once the input is exhausted and every response is out.
pub async fn serve_lines<R, W>(orch: Arc<Orchestrator>, input: R, output: W) -> Result<W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<Value>();

    let writer = tokio::spawn(async move {
        let mut output = output;
        while let Some(response) = rx.recv().await {
            let mut line = match serde_json::to_string(&response) {
                Ok(line) => line,
                Err(e) => {
                    wlog_warn!("Dropping unencodable response: {}", e);
                    continue;
                }
            };
            line.push('\n');
            if output.write_all(line.as_bytes()).await.is_err() || output.flush().await.is_err() {
                break;
            }
        }
        output
    });

    let mut lines = input.lines();
    let mut requests = JoinSet::new();
    while let Some(line) = lines.next_line().await? {
        while let Some(done) = requests.try_join_next() {
            reap(done);
        }
        if line.trim().is_empty() {
            continue;
        }
        let orch = Arc::clone(&orch);
        let tx = tx.clone();
        requests.spawn(async move {
            let response = handle_line(&orch, &line).await;
            let _ = tx.send(response);
        });
    }

    while let Some(done) = requests.join_next().await {
        reap(done);
    }
    drop(tx);
    writer.await.map_err(|e| Error::TaskJoin(e.to_string()))
}

fn reap(done: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = done {
        wlog_warn!("Request task failed: {}", e);
    }
}
