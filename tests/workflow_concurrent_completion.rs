//! Exercises spec.md §8 scenario 2 under genuine concurrency: two tasks
//! racing to complete the same step with the same `event_id` must still
//! produce exactly one transition, proven with `tokio::join!` rather than
//! two sequential `.await`s on one task.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use nexus_orchestrator::state_store::FilesystemStateStore;
use nexus_orchestrator::workflow::{AgentRef, StepCompletion, StepStatus, WorkflowDefinition, WorkflowEngine};
use nexus_orchestrator::{Clock, EventBus, FixedClock, IdempotencyLedger, StateStore};

fn definition() -> WorkflowDefinition {
    WorkflowDefinition {
        name: "standard".to_string(),
        steps: vec![
            AgentRef {
                name: "developer".to_string(),
                display_name: "Developer".to_string(),
                agent_type: "developer".to_string(),
            },
            AgentRef {
                name: "reviewer".to_string(),
                display_name: "Reviewer".to_string(),
                agent_type: "reviewer".to_string(),
            },
        ],
    }
}

async fn engine() -> (tempfile::TempDir, WorkflowEngine) {
    let dir = tempfile::TempDir::new().unwrap();
    let store: Arc<dyn StateStore> = Arc::new(FilesystemStateStore::new(dir.path()));
    let ledger = Arc::new(IdempotencyLedger::load(store.clone()).await.unwrap());
    let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(Utc::now()));
    let terminal: HashSet<String> = ["".to_string(), "done".to_string(), "complete".to_string()]
        .into_iter()
        .collect();
    let engine = WorkflowEngine::new(store, ledger, EventBus::default(), clock, terminal);
    (dir, engine)
}

#[tokio::test]
async fn concurrent_duplicate_completions_apply_exactly_once() {
    let (_dir, engine) = engine().await;
    let engine = Arc::new(engine);

    let workflow_id = engine
        .create_workflow_for_issue("77", "nexus", "acme/widgets", "standard", &definition(), "https://example.com/77")
        .await
        .unwrap();
    engine.start_workflow(&workflow_id, "77").await.unwrap();

    let a = {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine
                .complete_step(
                    "77",
                    "developer",
                    serde_json::json!({"status": "complete", "next_agent": "reviewer"}),
                    "evt-race",
                )
                .await
        })
    };
    let b = {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine
                .complete_step(
                    "77",
                    "developer",
                    serde_json::json!({"status": "complete", "next_agent": "reviewer"}),
                    "evt-race",
                )
                .await
        })
    };

    let (a, b) = tokio::join!(a, b);
    let results = [a.unwrap().unwrap(), b.unwrap().unwrap()];

    let advanced = results.iter().filter(|r| matches!(r, StepCompletion::NextAgent(_))).count();
    let duplicated = results.iter().filter(|r| matches!(r, StepCompletion::DuplicateIgnored)).count();
    assert_eq!(advanced, 1, "exactly one racer should advance the workflow");
    assert_eq!(duplicated, 1, "the other racer should observe the duplicate");

    let workflow = engine.get_workflow("77").await.unwrap();
    let developer_step = workflow.step(1).unwrap();
    assert_eq!(developer_step.status, StepStatus::Complete);
    assert_eq!(workflow.current_step_num, 2);
}

#[tokio::test]
async fn concurrent_distinct_events_both_apply_in_sequence() {
    let (_dir, engine) = engine().await;
    let engine = Arc::new(engine);

    let workflow_id = engine
        .create_workflow_for_issue("78", "nexus", "acme/widgets", "standard", &definition(), "https://example.com/78")
        .await
        .unwrap();
    engine.start_workflow(&workflow_id, "78").await.unwrap();

    let first = engine
        .complete_step(
            "78",
            "developer",
            serde_json::json!({"status": "complete", "next_agent": "reviewer"}),
            "evt-1",
        )
        .await
        .unwrap();
    assert!(matches!(first, StepCompletion::NextAgent(ref next) if next == "reviewer"));

    let second = engine
        .complete_step("78", "reviewer", serde_json::json!({"status": "complete"}), "evt-2")
        .await
        .unwrap();
    assert_eq!(second, StepCompletion::Terminal);
}
