//! Agent lifecycle: kill, liveness reconciliation, and session start failures.

use std::time::Duration;

use warden::core::{AgentStatus, CompletionSource, TaskId};
use warden::Error;

use crate::fixtures::Harness;

fn prompt_files(h: &Harness, task_id: &str) -> Vec<String> {
    let dir = h.orch.workspace().task_dir(&TaskId(task_id.to_string()));
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|name| name.starts_with("agent_prompt_"))
        .collect()
}

/// Killing an agent whose session already exited still terminates it, and
/// a second kill leaves the counters alone.
#[tokio::test]
async fn test_kill_after_session_exit() {
    let h = Harness::new();
    let task = h.task(10, 5, 3).await;
    let agent = h.deploy(&task, "builder").await;
    h.deploy(&task, "builder").await;

    assert!(h.host.exit(&h.session_of(&agent)));

    let killed = h
        .orch
        .kill_agent(&task, &agent, Some("no longer needed"))
        .await
        .unwrap();
    assert_eq!(killed.status, AgentStatus::Terminated);
    assert!(!killed.session_killed);
    assert!(!killed.already_terminal);
    assert_eq!(killed.reason, "no longer needed");

    let doc = h.document(&task).await;
    assert_eq!(doc.active_count, 1);
    assert_eq!(doc.terminated_count, 1);

    let again = h.orch.kill_agent(&task, &agent, None).await.unwrap();
    assert!(again.already_terminal);
    assert_eq!(again.status, AgentStatus::Terminated);

    let doc = h.document(&task).await;
    assert_eq!(doc.active_count, 1);
    assert_eq!(doc.terminated_count, 1);
    let record = doc.agent(&agent).unwrap();
    assert_eq!(record.termination_reason.as_deref(), Some("no longer needed"));
    assert!(doc.counters_consistent());

    let global = h.orch.list_tasks().await.unwrap();
    assert_eq!(global.active_agents, 1);
    assert_eq!(global.terminated_agents, 1);
}

#[tokio::test]
async fn test_kill_live_session() {
    let h = Harness::new();
    let task = h.task(10, 5, 3).await;
    let agent = h.deploy(&task, "builder").await;

    let killed = h.orch.kill_agent(&task, &agent, None).await.unwrap();
    assert!(killed.session_killed);
    assert_eq!(killed.reason, "Manual termination");
    assert!(h.host.live_sessions().is_empty());
}

#[tokio::test]
async fn test_kill_unknown_agent() {
    let h = Harness::new();
    let task = h.task(10, 5, 3).await;
    let err = h
        .orch
        .kill_agent(&task, "ghost-000000-abcdef", None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AgentNotFound { .. }));
}

/// A vanished session is reconciled to completed once; later reads are
/// no-ops with identical counters.
#[tokio::test]
async fn test_reconciliation_is_idempotent() {
    let h = Harness::new();
    let task = h.task(10, 5, 3).await;
    let gone = h.deploy(&task, "builder").await;
    let alive = h.deploy(&task, "builder").await;
    h.host.exit(&h.session_of(&gone));

    let first = h.orch.get_task_status(&task).await.unwrap();
    assert_eq!(first.reconciled.len(), 1);
    assert_eq!(first.reconciled[0].as_str(), gone);
    assert_eq!(first.agents.counters.active, 1);
    assert_eq!(first.agents.counters.completed, 1);

    let record = first
        .agents
        .agents_list
        .iter()
        .find(|a| a.id.as_str() == gone)
        .unwrap();
    assert_eq!(record.status, AgentStatus::Completed);
    assert_eq!(record.completion, Some(CompletionSource::SessionExited));

    let second = h.orch.get_task_status(&task).await.unwrap();
    assert!(second.reconciled.is_empty());
    assert_eq!(second.agents.counters.active, 1);
    assert_eq!(second.agents.counters.completed, 1);
    assert_eq!(second.agents.agents_list, first.agents.agents_list);

    let explicit = h.orch.reconcile(&task).await.unwrap();
    assert!(explicit.completed.is_empty());

    let global = h.orch.list_tasks().await.unwrap();
    assert_eq!(global.active_agents, 1);
    assert_eq!(global.completed_agents, 1);
    assert_eq!(
        global.agents[alive.as_str()].status,
        AgentStatus::Running
    );
}

/// An agent that reported 100% keeps `reported` even after its session ends.
#[tokio::test]
async fn test_reported_completion_survives_session_exit() {
    let h = Harness::new();
    let task = h.task(10, 5, 3).await;
    let agent = h.deploy(&task, "builder").await;

    h.orch
        .update_agent_progress(&task, &agent, "completed", "all done", 100)
        .await
        .unwrap();
    h.host.exit(&h.session_of(&agent));

    let snapshot = h.orch.get_task_status(&task).await.unwrap();
    assert!(snapshot.reconciled.is_empty());
    let record = &snapshot.agents.agents_list[0];
    assert_eq!(record.completion, Some(CompletionSource::Reported));
    assert_eq!(snapshot.agents.counters.completed, 1);
}

#[tokio::test]
async fn test_failed_session_creation_leaves_no_trace() {
    let h = Harness::new();
    let task = h.task(10, 5, 3).await;
    h.host.fail_creates(Some("no server running"));

    let err = h
        .orch
        .deploy_agent(&task, "builder", "x", None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "SessionCreationFailure");

    let doc = h.document(&task).await;
    assert_eq!(doc.total_spawned, 0);
    assert!(doc.agents.is_empty());
    assert!(prompt_files(&h, &task).is_empty());
    assert_eq!(h.orch.list_tasks().await.unwrap().total_agents_spawned, 0);

    h.host.fail_creates(None);
    h.deploy(&task, "builder").await;
    assert_eq!(h.document(&task).await.total_spawned, 1);
}

/// A session that only appears after the creation deadline is killed, so
/// the failed deploy leaves nothing running outside the registry.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_slow_session_creation_is_cleaned_up() {
    let h = Harness::with_session_timeout(Duration::from_millis(50));
    let task = h.task(10, 5, 3).await;
    h.host.set_create_delay(Duration::from_millis(300));

    let err = h
        .orch
        .deploy_agent(&task, "builder", "x", None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "SessionCreationFailure");

    let doc = h.document(&task).await;
    assert_eq!(doc.total_spawned, 0);
    assert!(prompt_files(&h, &task).is_empty());

    // Outlast the abandoned create; its session must not survive it.
    tokio::time::sleep(Duration::from_millis(600)).await;
    let live = h.host.live_sessions();
    assert!(live.is_empty(), "left running: {:?}", live);
    assert_eq!(h.orch.list_tasks().await.unwrap().active_agents, 0);

    h.host.set_create_delay(Duration::ZERO);
    h.deploy(&task, "builder").await;
    assert_eq!(h.host.live_sessions().len(), 1);
}

#[tokio::test]
async fn test_session_dies_during_startup() {
    let h = Harness::new();
    let task = h.task(10, 5, 3).await;
    h.host.exit_on_start(true);

    let err = h
        .orch
        .deploy_agent(&task, "builder", "x", None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SessionCreationFailure(_)));
    assert_eq!(h.document(&task).await.total_spawned, 0);
    assert!(prompt_files(&h, &task).is_empty());
}

#[tokio::test]
async fn test_host_unavailable() {
    let h = Harness::new();
    let task = h.task(10, 5, 3).await;
    h.host.set_available(false);

    let err = h
        .orch
        .deploy_agent(&task, "builder", "x", None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "ExternalCapabilityUnavailable");
    assert!(!err.is_retryable());
}
