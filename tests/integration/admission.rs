//! Admission control: concurrency, total, depth, and spawn-rule limits.

use std::collections::BTreeMap;

use warden::config::Config;
use warden::core::AgentStatus;
use warden::orchestration::LimitKind;
use warden::Error;

use crate::fixtures::Harness;

/// Two agents fill a task with max_concurrent=2; completing one frees the
/// slot for the third.
#[tokio::test]
async fn test_task_concurrency_limit_and_release() {
    let h = Harness::new();
    let task = h.task(10, 2, 3).await;

    let first = h.deploy(&task, "builder").await;
    h.deploy(&task, "builder").await;

    let err = h
        .orch
        .deploy_agent(&task, "builder", "third", None)
        .await
        .unwrap_err();
    match err {
        Error::LimitExceeded {
            limit,
            current,
            ceiling,
        } => {
            assert_eq!(limit, LimitKind::TaskConcurrency);
            assert_eq!(current, 2);
            assert_eq!(ceiling, 2);
        }
        other => panic!("Expected LimitExceeded, got {:?}", other),
    }

    let report = h
        .orch
        .update_agent_progress(&task, &first, "completed", "done", 100)
        .await
        .unwrap();
    assert_eq!(report.own_update.agent_status, AgentStatus::Completed);
    assert_eq!(report.coordination_info.agents.counters.active, 1);

    h.orch
        .deploy_agent(&task, "builder", "third", None)
        .await
        .expect("slot should be free after completion");

    let doc = h.document(&task).await;
    assert_eq!(doc.total_spawned, 3);
    assert_eq!(doc.active_count, 2);
    assert_eq!(doc.completed_count, 1);
    assert_eq!(doc.spiral_checks.violations, 1);
    assert!(doc.counters_consistent());
}

/// Depth 1 -> 2 -> 3 is admitted with max_depth=3; depth 4 is not.
#[tokio::test]
async fn test_hierarchy_depth_limit() {
    let h = Harness::new();
    let task = h.task(10, 10, 3).await;

    let root = h.orch.deploy_agent(&task, "lead", "plan", None).await.unwrap();
    assert_eq!(root.depth, 1);
    assert_eq!(root.parent, "orchestrator");

    let child = h
        .orch
        .spawn_child_agent(&task, root.agent_id.as_str(), "worker", "part a")
        .await
        .unwrap();
    assert_eq!(child.depth, 2);

    let grandchild = h
        .orch
        .spawn_child_agent(&task, child.agent_id.as_str(), "worker", "part a.1")
        .await
        .unwrap();
    assert_eq!(grandchild.depth, 3);

    let err = h
        .orch
        .spawn_child_agent(&task, grandchild.agent_id.as_str(), "worker", "too deep")
        .await
        .unwrap_err();
    assert!(
        matches!(
            err,
            Error::LimitExceeded {
                limit: LimitKind::HierarchyDepth,
                current: 4,
                ceiling: 3
            }
        ),
        "unexpected error: {:?}",
        err
    );

    let doc = h.document(&task).await;
    for agent in &doc.agents {
        let parent_depth = doc.agent(&agent.parent).map(|p| p.depth).unwrap_or(0);
        assert_eq!(agent.depth, parent_depth + 1);
    }
    let hierarchy = doc.hierarchy();
    assert_eq!(hierarchy[root.agent_id.as_str()], vec![child.agent_id.clone()]);
    assert_eq!(hierarchy[child.agent_id.as_str()], vec![grandchild.agent_id.clone()]);
}

#[tokio::test]
async fn test_task_total_limit() {
    let h = Harness::new();
    let task = h.task(2, 2, 3).await;

    let a = h.deploy(&task, "builder").await;
    h.deploy(&task, "builder").await;
    h.orch.kill_agent(&task, &a, None).await.unwrap();

    // A free concurrency slot does not help once the total is spent.
    let err = h
        .orch
        .deploy_agent(&task, "builder", "third", None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::LimitExceeded {
            limit: LimitKind::TaskTotal,
            ..
        }
    ));
}

#[tokio::test]
async fn test_global_ceiling_spans_tasks() {
    let h = Harness::with_config(Config {
        global_max_concurrent: Some(2),
        ..Default::default()
    });
    let one = h.task(10, 10, 3).await;
    let two = h.task(10, 10, 3).await;

    h.deploy(&one, "builder").await;
    h.deploy(&two, "builder").await;

    let err = h
        .orch
        .deploy_agent(&two, "builder", "over", None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::LimitExceeded {
            limit: LimitKind::GlobalConcurrency,
            current: 2,
            ceiling: 2
        }
    ));

    let global = h.orch.list_tasks().await.unwrap();
    assert_eq!(global.active_agents, 2);
    assert_eq!(global.total_agents_spawned, 2);
}

#[tokio::test]
async fn test_spawn_rules() {
    let mut rules = BTreeMap::new();
    rules.insert("lead".to_string(), vec!["worker".to_string()]);
    rules.insert("orchestrator".to_string(), vec!["*".to_string()]);
    let h = Harness::with_config(Config {
        spawn_rules: Some(rules),
        ..Default::default()
    });
    let task = h.task(10, 10, 5).await;

    let lead = h.deploy(&task, "lead").await;
    h.orch
        .spawn_child_agent(&task, &lead, "worker", "ok")
        .await
        .unwrap();

    let err = h
        .orch
        .spawn_child_agent(&task, &lead, "reviewer", "not allowed")
        .await
        .unwrap_err();
    match err {
        Error::SpawnRuleViolation {
            parent_type,
            child_type,
        } => {
            assert_eq!(parent_type, "lead");
            assert_eq!(child_type, "reviewer");
        }
        other => panic!("Expected SpawnRuleViolation, got {:?}", other),
    }

    // worker has no entry and there is no wildcard entry: deny.
    let worker = h.document(&task).await.agents[1].id.to_string();
    let err = h
        .orch
        .spawn_child_agent(&task, &worker, "worker", "nope")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "SpawnRuleViolation");
    assert_eq!(h.document(&task).await.spiral_checks.violations, 2);
}

#[tokio::test]
async fn test_unknown_parent() {
    let h = Harness::new();
    let task = h.task(10, 10, 3).await;

    let err = h
        .orch
        .spawn_child_agent(&task, "ghost-000000-abcdef", "worker", "x")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AgentNotFound { .. }));
    assert_eq!(h.document(&task).await.total_spawned, 0);
    assert!(h.host.live_sessions().is_empty());
}
