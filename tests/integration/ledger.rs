//! Progress and finding reports, and the views composed from the ledgers.

use std::io::Write;

use serde_json::json;
use warden::core::TaskId;
use warden::ledger::{Ledger, LedgerKind, Severity};
use warden::orchestration::TimelineEntry;
use warden::tools;

use crate::fixtures::Harness;

#[tokio::test]
async fn test_reports_feed_coordination_info() {
    let h = Harness::new();
    let task = h.task(10, 5, 3).await;
    let a = h.deploy(&task, "frontend").await;
    let b = h.deploy(&task, "backend").await;

    h.orch
        .update_agent_progress(&task, &a, "working", "layout done", 40)
        .await
        .unwrap();
    let report = h
        .orch
        .report_finding(
            &task,
            &b,
            "issue",
            Severity::Critical,
            "schema mismatch",
            Some(json!({"table": "users"})),
        )
        .await
        .unwrap();

    assert_eq!(report.own_finding.data["table"], "users");
    let info = report.coordination_info;
    assert_eq!(info.coordination_data.recent_progress.len(), 1);
    assert_eq!(info.coordination_data.recent_findings.len(), 1);
    let summary = &info.coordination_data.agent_status_summary[a.as_str()];
    assert_eq!(summary.progress, 40);
    assert_eq!(summary.reported_status.as_deref(), Some("working"));
    assert_eq!(info.agents.counters.active, 2);
    assert_eq!(info.hierarchy["orchestrator"].len(), 2);
}

#[tokio::test]
async fn test_snapshot_and_timeline() {
    let h = Harness::new();
    let task = h.task(10, 5, 3).await;
    let a = h.deploy(&task, "builder").await;

    for pct in [10u8, 50, 90] {
        h.orch
            .update_agent_progress(&task, &a, "working", &format!("{}%", pct), pct)
            .await
            .unwrap();
    }
    h.orch
        .report_finding(&task, &a, "insight", Severity::Low, "cache helps", None)
        .await
        .unwrap();

    let snapshot = h.orch.get_task_status(&task).await.unwrap();
    let ledger = &snapshot.enhanced_progress;
    assert_eq!(ledger.total_progress_entries, 3);
    assert_eq!(ledger.total_findings, 1);
    assert_eq!(ledger.recent_updates[0].progress, 90);
    assert_eq!(ledger.recent_findings[0].data, json!({}));

    let timeline = h.orch.timeline(&task).await.unwrap();
    assert_eq!(timeline.timeline.len(), 4);
    assert_eq!(timeline.summary.agents_active, 1);
    assert!(timeline
        .timeline
        .windows(2)
        .all(|w| w[0].timestamp() <= w[1].timestamp()));
    assert!(matches!(
        timeline.timeline.last(),
        Some(TimelineEntry::Finding(_))
    ));
    assert_eq!(
        timeline.summary.timeline_span.start,
        Some(timeline.timeline[0].timestamp())
    );

    let resource = tools::read_resource(&h.orch, &format!("task://{}/progress-timeline", task)).await;
    assert_eq!(resource["success"], true);
    assert_eq!(resource["timeline"][0]["entry_type"], "progress");
}

#[tokio::test]
async fn test_malformed_ledger_line_is_skipped() {
    let h = Harness::new();
    let task = h.task(10, 5, 3).await;
    let a = h.deploy(&task, "builder").await;

    h.orch
        .update_agent_progress(&task, &a, "working", "before", 10)
        .await
        .unwrap();

    let ledger = Ledger::new(h.orch.workspace().clone());
    let path = ledger.file_path(&TaskId(task.clone()), &a, LedgerKind::Progress);
    let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
    writeln!(file, "{{\"timestamp\": \"truncated").unwrap();
    drop(file);

    h.orch
        .update_agent_progress(&task, &a, "working", "after", 20)
        .await
        .unwrap();

    let entries = ledger.read_progress(&TaskId(task.clone())).await.unwrap();
    let messages: Vec<&str> = entries.iter().map(|e| e.message.as_str()).collect();
    assert_eq!(messages, vec!["before", "after"]);
}

#[tokio::test]
async fn test_report_validation() {
    let h = Harness::new();
    let task = h.task(10, 5, 3).await;
    let a = h.deploy(&task, "builder").await;

    let err = h
        .orch
        .report_finding(&task, &a, "  ", Severity::Low, "m", None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "Validation");

    let err = h
        .orch
        .update_agent_progress(&task, "ghost-000000-abcdef", "working", "m", 10)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "AgentNotFound");

    let timeline = h.orch.timeline(&task).await.unwrap();
    assert!(timeline.timeline.is_empty());
    assert_eq!(timeline.summary.timeline_span.start, None);
}

/// Reports from a terminated agent are logged but do not revive it.
#[tokio::test]
async fn test_progress_after_kill_is_recorded_only() {
    let h = Harness::new();
    let task = h.task(10, 5, 3).await;
    let a = h.deploy(&task, "builder").await;
    h.orch.kill_agent(&task, &a, None).await.unwrap();

    let report = h
        .orch
        .update_agent_progress(&task, &a, "completed", "late", 100)
        .await
        .unwrap();
    assert_eq!(
        report.own_update.agent_status,
        warden::core::AgentStatus::Terminated
    );
    let doc = h.document(&task).await;
    assert_eq!(doc.completed_count, 0);
    assert_eq!(doc.terminated_count, 1);
    assert_eq!(h.orch.timeline(&task).await.unwrap().timeline.len(), 1);
}
