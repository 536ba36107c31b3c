//! Concurrent deploys and reports against a single task.

use std::sync::Arc;

use futures::future::join_all;
use warden::ledger::Severity;

use crate::fixtures::Harness;

/// Many deploys racing for a task with room for four: exactly four win,
/// every loser gets a limit error, and no record is lost.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_deploys_respect_limits() {
    let h = Harness::new();
    let task = h.task(50, 4, 3).await;

    let attempts = (0..16).map(|i| {
        let orch = Arc::clone(&h.orch);
        let task = task.clone();
        tokio::spawn(async move {
            orch.deploy_agent(&task, "builder", &format!("job {}", i), None)
                .await
        })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let admitted = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(admitted, 4);
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert_eq!(err.kind(), "LimitExceeded");
    }

    let doc = h.document(&task).await;
    assert_eq!(doc.agents.len(), 4);
    assert_eq!(doc.total_spawned, 4);
    assert_eq!(doc.active_count, 4);
    assert_eq!(doc.spiral_checks.violations, 12);
    assert!(doc.counters_consistent());

    // Denied deploys must not leave sessions behind.
    assert_eq!(h.host.live_sessions().len(), 4);

    let global = h.orch.list_tasks().await.unwrap();
    assert_eq!(global.active_agents, 4);
    assert_eq!(global.agents.len(), 4);
}

/// Parallel reports from every agent are all kept.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reports_are_not_lost() {
    let h = Harness::new();
    let task = h.task(10, 10, 3).await;
    let mut agents = Vec::new();
    for _ in 0..4 {
        agents.push(h.deploy(&task, "builder").await);
    }

    let mut handles = Vec::new();
    for agent in &agents {
        for step in 1..=5u8 {
            let orch = Arc::clone(&h.orch);
            let task = task.clone();
            let agent = agent.clone();
            handles.push(tokio::spawn(async move {
                orch.update_agent_progress(&task, &agent, "working", "step", step * 10)
                    .await
                    .map(|_| ())?;
                orch.report_finding(&task, &agent, "insight", Severity::Medium, "note", None)
                    .await
                    .map(|_| ())
            }));
        }
    }
    for handle in join_all(handles).await {
        handle.unwrap().unwrap();
    }

    let timeline = h.orch.timeline(&task).await.unwrap();
    assert_eq!(timeline.summary.total_progress_entries, 20);
    assert_eq!(timeline.summary.total_findings, 20);
    assert_eq!(timeline.summary.agents_active, 4);

    let doc = h.document(&task).await;
    assert_eq!(doc.active_count, 4);
    assert!(doc.agents.iter().all(|a| a.progress > 0));
}

/// Kills racing with reconciliation count each agent exactly once.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_kill_races_reconcile() {
    let h = Harness::new();
    let task = h.task(10, 10, 3).await;
    let mut agents = Vec::new();
    for _ in 0..6 {
        agents.push(h.deploy(&task, "builder").await);
    }
    for agent in &agents {
        h.host.exit(&h.session_of(agent));
    }

    let mut handles = Vec::new();
    for agent in &agents {
        let orch = Arc::clone(&h.orch);
        let kill_task = task.clone();
        let agent = agent.clone();
        handles.push(tokio::spawn(async move {
            orch.kill_agent(&kill_task, &agent, None).await.map(|_| ())
        }));
        let orch = Arc::clone(&h.orch);
        let reconcile_task = task.clone();
        handles.push(tokio::spawn(async move {
            orch.reconcile(&reconcile_task).await.map(|_| ())
        }));
    }
    for handle in join_all(handles).await {
        handle.unwrap().unwrap();
    }

    let doc = h.document(&task).await;
    assert_eq!(doc.active_count, 0);
    assert_eq!(doc.completed_count + doc.terminated_count, 6);
    assert!(doc.counters_consistent());

    let global = h.orch.list_tasks().await.unwrap();
    assert_eq!(global.active_agents, 0);
    assert_eq!(global.completed_agents + global.terminated_agents, 6);
}
