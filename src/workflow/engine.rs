//! `WorkflowEngine`: owns per-issue workflow state (spec.md §4.E).
//!
//! Grounded on `workflows/state_machine.rs`'s `StateTransition`/
//! `TransitionResult` framing, generalized from the teacher's fixed
//! GitHub-label state machine to the spec's ordered multi-step-per-issue
//! model. Persistence goes through `StateStore`; state-level validity is
//! delegated to `state_machine::apply`. Per-issue mutation is linearized
//! with a lock keyed by `issue_id` (spec.md §5), released before events
//! are emitted on the shared `EventBus`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::alerts::{EventBus, LifecycleEvent};
use crate::clock::Clock;
use crate::error::{OrchestratorError, Result};
use crate::idempotency::{IdempotencyKey, IdempotencyLedger};
use crate::state_store::{keys, StateStore};

use super::state_machine::{self, WorkflowEvent};
use super::types::{
    AgentRef, Step, StepCompletion, StepStatus, Workflow, WorkflowDefinition, WorkflowMetadata,
    WorkflowState, WorkflowStatus,
};

fn workflow_key(workflow_id: &str) -> String {
    format!("workflow:{workflow_id}")
}

pub struct WorkflowEngine {
    store: Arc<dyn StateStore>,
    ledger: Arc<IdempotencyLedger>,
    events: EventBus,
    clock: Arc<dyn Clock>,
    terminal_agents: HashSet<String>,
    issue_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl WorkflowEngine {
    pub fn new(
        store: Arc<dyn StateStore>,
        ledger: Arc<IdempotencyLedger>,
        events: EventBus,
        clock: Arc<dyn Clock>,
        terminal_agents: HashSet<String>,
    ) -> Self {
        Self {
            store,
            ledger,
            events,
            clock,
            terminal_agents,
            issue_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn issue_lock(&self, issue_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.issue_locks.lock().await;
        locks
            .entry(issue_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn is_terminal_agent(&self, next_agent: &str) -> bool {
        let normalized = AgentRef::normalize(next_agent);
        self.terminal_agents.contains(&normalized)
            || normalized.is_empty()
            || self.terminal_agents.contains(next_agent)
    }

    async fn load_mappings(&self) -> Result<HashMap<String, String>> {
        match self.store.load(keys::WORKFLOW_MAPPINGS).await? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(HashMap::new()),
        }
    }

    async fn save_mappings(&self, mappings: &HashMap<String, String>) -> Result<()> {
        self.store
            .save(keys::WORKFLOW_MAPPINGS, serde_json::to_value(mappings)?)
            .await
    }

    async fn load_workflow(&self, workflow_id: &str) -> Result<Workflow> {
        let doc = self
            .store
            .load(&workflow_key(workflow_id))
            .await?
            .ok_or_else(|| OrchestratorError::WorkflowNotFound {
                issue_id: workflow_id.to_string(),
            })?;
        Ok(serde_json::from_value(doc)?)
    }

    async fn save_workflow(&self, workflow: &Workflow) -> Result<()> {
        self.store
            .save(&workflow_key(&workflow.workflow_id), serde_json::to_value(workflow)?)
            .await
    }

    async fn load_workflow_for_issue(&self, issue_id: &str) -> Result<Workflow> {
        let mappings = self.load_mappings().await?;
        let workflow_id =
            mappings
                .get(issue_id)
                .ok_or_else(|| OrchestratorError::WorkflowNotFound {
                    issue_id: issue_id.to_string(),
                })?;
        self.load_workflow(workflow_id).await
    }

    /// Pure constructor: builds the step list from `workflow_definition`,
    /// persists the workflow document and the issue→workflow mapping
    /// atomically under the per-issue lock.
    pub async fn create_workflow_for_issue(
        &self,
        issue_id: &str,
        project_key: &str,
        repo_key: &str,
        tier: &str,
        workflow_definition: &WorkflowDefinition,
        issue_url: &str,
    ) -> Result<String> {
        let lock = self.issue_lock(issue_id).await;
        let _guard = lock.lock().await;

        let workflow_id = format!("{project_key}-{issue_id}-{tier}");
        let steps = workflow_definition
            .steps
            .iter()
            .enumerate()
            .map(|(idx, agent)| Step {
                step_num: (idx + 1) as u32,
                name: agent.display_name.clone(),
                agent: agent.clone(),
                status: StepStatus::Pending,
                started_at: None,
                completed_at: None,
                outputs: None,
            })
            .collect();

        let workflow = Workflow {
            workflow_id: workflow_id.clone(),
            issue_id: issue_id.to_string(),
            project_key: project_key.to_string(),
            repo_key: repo_key.to_string(),
            tier: tier.to_string(),
            state: WorkflowState::Pending,
            steps,
            current_step_num: 1,
            metadata: WorkflowMetadata {
                issue_url: issue_url.to_string(),
                created_at: self.clock.now(),
            },
        };

        self.save_workflow(&workflow).await?;

        let mut mappings = self.load_mappings().await?;
        mappings.insert(issue_id.to_string(), workflow_id.clone());
        self.save_mappings(&mappings).await?;

        Ok(workflow_id)
    }

    pub async fn start_workflow(&self, workflow_id: &str, issue_id: &str) -> Result<()> {
        let lock = self.issue_lock(issue_id).await;
        let _guard = lock.lock().await;

        let mut workflow = self.load_workflow(workflow_id).await?;
        let next = state_machine::apply(workflow.state, &WorkflowEvent::Start).ok_or_else(|| {
            OrchestratorError::StateTransitionInvalid(format!(
                "cannot start workflow in state {:?}",
                workflow.state
            ))
        })?;
        workflow.state = next;
        if let Some(first) = workflow.step_mut(1) {
            first.status = StepStatus::Running;
            first.started_at = Some(self.clock.now());
        }
        self.save_workflow(&workflow).await?;

        self.events.publish(LifecycleEvent::StepStatusChanged {
            issue_id: issue_id.to_string(),
            project_key: workflow.project_key.clone(),
            step_num: 1,
            step_name: workflow.steps.first().map(|s| s.name.clone()).unwrap_or_default(),
            status: "running".to_string(),
        });
        Ok(())
    }

    /// §4.E `complete_step`. Returns without side effects on a duplicate
    /// event; fails with `WorkflowNotFound`/`StepAgentMismatch` without
    /// mutating state on a mismatch.
    pub async fn complete_step(
        &self,
        issue_id: &str,
        completed_agent: &str,
        outputs: serde_json::Value,
        event_id: &str,
    ) -> Result<StepCompletion> {
        let lock = self.issue_lock(issue_id).await;
        let _guard = lock.lock().await;

        let mut workflow = self.load_workflow_for_issue(issue_id).await?;

        let running_step_num = workflow
            .running_step()
            .map(|s| s.step_num)
            .ok_or_else(|| {
                OrchestratorError::StateTransitionInvalid(format!(
                    "workflow for issue {issue_id} has no running step"
                ))
            })?;

        let key = IdempotencyKey::new(issue_id, running_step_num, completed_agent, event_id);
        if self.ledger.is_duplicate(&key).await {
            return Ok(StepCompletion::DuplicateIgnored);
        }

        {
            let running = workflow.running_step().expect("checked above");
            if !running.agent.matches(completed_agent) {
                return Err(OrchestratorError::StepAgentMismatch {
                    expected: running.agent.name.clone(),
                    actual: AgentRef::normalize(completed_agent),
                });
            }
        }

        let failed = outputs
            .get("status")
            .and_then(|v| v.as_str())
            .map(|s| s == "failed")
            .unwrap_or(false);
        let now = self.clock.now();

        {
            let running = workflow.running_step_mut().expect("checked above");
            running.status = if failed { StepStatus::Failed } else { StepStatus::Complete };
            running.completed_at = Some(now);
            running.outputs = Some(outputs.clone());
        }

        self.events.publish(LifecycleEvent::StepStatusChanged {
            issue_id: issue_id.to_string(),
            project_key: workflow.project_key.clone(),
            step_num: running_step_num,
            step_name: workflow
                .step_mut(running_step_num)
                .map(|s| s.name.clone())
                .unwrap_or_default(),
            status: if failed { "failed".to_string() } else { "complete".to_string() },
        });

        let next_agent = outputs
            .get("next_agent")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();

        // Per spec.md §4.E steps 4-6: `outputs.status=="failed"` only
        // changes the *step* status (handled above). Whether the workflow
        // itself terminates is governed solely by `next_agent` being a
        // terminal sentinel; a failed step naming a real next agent (e.g.
        // an error-handler) still chains per step 6. A failed step that
        // *is* terminal ends the workflow in `Failed`, not `Completed`.
        let completion = if self.is_terminal_agent(&next_agent) {
            let event = if failed { WorkflowEvent::Fail } else { WorkflowEvent::CompleteStep };
            let next_state = state_machine::apply(workflow.state, &event).ok_or_else(|| {
                OrchestratorError::StateTransitionInvalid(format!(
                    "cannot terminate workflow in state {:?}",
                    workflow.state
                ))
            })?;
            workflow.state = next_state;
            self.save_workflow(&workflow).await?;
            self.events.publish(LifecycleEvent::WorkflowCompleted {
                issue_id: issue_id.to_string(),
                project_key: workflow.project_key.clone(),
            });
            StepCompletion::Terminal
        } else {
            let next_step_num = workflow
                .find_step_by_agent(&next_agent)
                .map(|s| s.step_num)
                .ok_or_else(|| {
                    OrchestratorError::StateTransitionInvalid(format!(
                        "no step found for next agent `{next_agent}`"
                    ))
                })?;

            {
                let next_step = workflow.step_mut(next_step_num).expect("checked above");
                next_step.status = StepStatus::Running;
                next_step.started_at = Some(now);
            }
            workflow.current_step_num = next_step_num;
            self.save_workflow(&workflow).await?;

            self.events.publish(LifecycleEvent::StepStatusChanged {
                issue_id: issue_id.to_string(),
                project_key: workflow.project_key.clone(),
                step_num: next_step_num,
                step_name: workflow
                    .step_mut(next_step_num)
                    .map(|s| s.name.clone())
                    .unwrap_or_default(),
                status: "running".to_string(),
            });
            StepCompletion::NextAgent(next_agent)
        };

        self.ledger.record(&key).await?;
        Ok(completion)
    }

    /// Freezes auto-chaining without altering step statuses.
    pub async fn pause_workflow(&self, issue_id: &str, reason: &str) -> Result<()> {
        let lock = self.issue_lock(issue_id).await;
        let _guard = lock.lock().await;

        let mut workflow = self.load_workflow_for_issue(issue_id).await?;
        let next = state_machine::apply(workflow.state, &WorkflowEvent::Pause).ok_or_else(|| {
            OrchestratorError::StateTransitionInvalid(format!(
                "cannot pause workflow in state {:?}",
                workflow.state
            ))
        })?;
        workflow.state = next;
        self.save_workflow(&workflow).await?;

        self.events.alert(crate::alerts::Alert::new(
            "workflow_engine",
            crate::alerts::Severity::Info,
            format!("workflow paused: {reason}"),
        ).for_issue(workflow.project_key.clone(), issue_id.parse().unwrap_or(0)));
        Ok(())
    }

    pub async fn resume_workflow(&self, issue_id: &str) -> Result<()> {
        let lock = self.issue_lock(issue_id).await;
        let _guard = lock.lock().await;

        let mut workflow = self.load_workflow_for_issue(issue_id).await?;
        let next = state_machine::apply(workflow.state, &WorkflowEvent::Resume).ok_or_else(|| {
            OrchestratorError::StateTransitionInvalid(format!(
                "cannot resume workflow in state {:?}",
                workflow.state
            ))
        })?;
        workflow.state = next;
        self.save_workflow(&workflow).await
    }

    pub async fn stop_workflow(&self, issue_id: &str) -> Result<()> {
        let lock = self.issue_lock(issue_id).await;
        let _guard = lock.lock().await;

        let mut workflow = self.load_workflow_for_issue(issue_id).await?;
        let next = state_machine::apply(workflow.state, &WorkflowEvent::Stop).ok_or_else(|| {
            OrchestratorError::StateTransitionInvalid(format!(
                "cannot stop workflow in state {:?}",
                workflow.state
            ))
        })?;
        workflow.state = next;
        self.save_workflow(&workflow).await
    }

    pub async fn cancel_workflow(&self, issue_id: &str) -> Result<()> {
        let lock = self.issue_lock(issue_id).await;
        let _guard = lock.lock().await;

        let mut workflow = self.load_workflow_for_issue(issue_id).await?;
        let next = state_machine::apply(workflow.state, &WorkflowEvent::Cancel).ok_or_else(|| {
            OrchestratorError::StateTransitionInvalid(format!(
                "cannot cancel workflow in state {:?}",
                workflow.state
            ))
        })?;
        workflow.state = next;
        self.save_workflow(&workflow).await
    }

    /// Read access for collaborators (the reconciler) that need to inspect
    /// the running step's agent or full step list without mutating it.
    pub async fn get_workflow(&self, issue_id: &str) -> Result<Workflow> {
        self.load_workflow_for_issue(issue_id).await
    }

    /// Every issue with a workflow mapping, for listing/status commands.
    pub async fn list_tracked_issue_ids(&self) -> Result<Vec<String>> {
        Ok(self.load_mappings().await?.into_keys().collect())
    }

    pub async fn get_workflow_status(&self, issue_id: &str) -> Result<WorkflowStatus> {
        let workflow = self.load_workflow_for_issue(issue_id).await?;
        Ok(WorkflowStatus {
            state: workflow.state,
            current_step_num: workflow.current_step_num,
            total_steps: workflow.steps.len() as u32,
            current_step_name: workflow
                .step(workflow.current_step_num)
                .map(|s| s.name.clone()),
            workflow_name: workflow.tier.clone(),
        })
    }

    /// Operator escape hatch (spec.md §4.E): finds the first step whose
    /// agent equals `target_agent`, sets it to `running`, all later steps
    /// to `pending`, all earlier steps to `complete`.
    pub async fn reset_workflow_to_agent(&self, issue_id: &str, target_agent: &str) -> Result<bool> {
        let lock = self.issue_lock(issue_id).await;
        let _guard = lock.lock().await;

        let mut workflow = self.load_workflow_for_issue(issue_id).await?;
        let Some(target_step_num) = workflow.find_step_by_agent(target_agent).map(|s| s.step_num)
        else {
            return Ok(false);
        };

        let now = self.clock.now();
        for step in workflow.steps.iter_mut() {
            if step.step_num < target_step_num {
                step.status = StepStatus::Complete;
                if step.completed_at.is_none() {
                    step.completed_at = Some(now);
                }
            } else if step.step_num == target_step_num {
                step.status = StepStatus::Running;
                step.started_at = Some(now);
                step.completed_at = None;
            } else {
                step.status = StepStatus::Pending;
                step.started_at = None;
                step.completed_at = None;
            }
        }
        workflow.current_step_num = target_step_num;
        if workflow.state.is_terminal() || workflow.state == WorkflowState::Paused {
            workflow.state = WorkflowState::Running;
        }
        self.save_workflow(&workflow).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::state_store::FilesystemStateStore;
    use serde_json::json;

    fn definition() -> WorkflowDefinition {
        WorkflowDefinition {
            name: "full".to_string(),
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
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let terminal = ["", "done", "complete", "reviewer-complete"]
            .into_iter()
            .map(String::from)
            .collect();
        let engine = WorkflowEngine::new(store, ledger, EventBus::default(), clock, terminal);
        (dir, engine)
    }

    #[tokio::test]
    async fn complete_step_chains_to_the_next_agent() {
        let (_dir, engine) = engine().await;
        let workflow_id = engine
            .create_workflow_for_issue("42", "nexus", "acme/nexus-core", "full", &definition(), "https://x/42")
            .await
            .unwrap();
        engine.start_workflow(&workflow_id, "42").await.unwrap();

        let result = engine
            .complete_step("42", "developer", json!({"next_agent": "reviewer"}), "comment-789")
            .await
            .unwrap();
        assert_eq!(result, StepCompletion::NextAgent("reviewer".to_string()));

        let status = engine.get_workflow_status("42").await.unwrap();
        assert_eq!(status.current_step_name.as_deref(), Some("Reviewer"));
    }

    #[tokio::test]
    async fn duplicate_completion_is_a_no_op() {
        let (_dir, engine) = engine().await;
        let workflow_id = engine
            .create_workflow_for_issue("42", "nexus", "acme/nexus-core", "full", &definition(), "https://x/42")
            .await
            .unwrap();
        engine.start_workflow(&workflow_id, "42").await.unwrap();

        let first = engine
            .complete_step("42", "developer", json!({"next_agent": "reviewer"}), "comment-789")
            .await
            .unwrap();
        let second = engine
            .complete_step("42", "developer", json!({"next_agent": "reviewer"}), "comment-789")
            .await
            .unwrap();

        assert_eq!(first, StepCompletion::NextAgent("reviewer".to_string()));
        assert_eq!(second, StepCompletion::DuplicateIgnored);
    }

    #[tokio::test]
    async fn mismatched_agent_fails_without_mutation() {
        let (_dir, engine) = engine().await;
        let workflow_id = engine
            .create_workflow_for_issue("42", "nexus", "acme/nexus-core", "full", &definition(), "https://x/42")
            .await
            .unwrap();
        engine.start_workflow(&workflow_id, "42").await.unwrap();

        let result = engine
            .complete_step("42", "reviewer", json!({"next_agent": "reviewer"}), "comment-1")
            .await;
        assert!(matches!(result, Err(OrchestratorError::StepAgentMismatch { .. })));

        let status = engine.get_workflow_status("42").await.unwrap();
        assert_eq!(status.current_step_name.as_deref(), Some("Developer"));
    }

    #[tokio::test]
    async fn terminal_next_agent_completes_the_workflow() {
        let (_dir, engine) = engine().await;
        let workflow_id = engine
            .create_workflow_for_issue("42", "nexus", "acme/nexus-core", "full", &definition(), "https://x/42")
            .await
            .unwrap();
        engine.start_workflow(&workflow_id, "42").await.unwrap();
        engine
            .complete_step("42", "developer", json!({"next_agent": "reviewer"}), "c1")
            .await
            .unwrap();
        let result = engine
            .complete_step("42", "reviewer", json!({"next_agent": "reviewer-complete"}), "c2")
            .await
            .unwrap();
        assert_eq!(result, StepCompletion::Terminal);

        let status = engine.get_workflow_status("42").await.unwrap();
        assert_eq!(status.state, WorkflowState::Completed);
    }

    #[tokio::test]
    async fn failed_step_with_terminal_next_agent_ends_the_workflow_failed() {
        let (_dir, engine) = engine().await;
        let workflow_id = engine
            .create_workflow_for_issue("42", "nexus", "acme/nexus-core", "full", &definition(), "https://x/42")
            .await
            .unwrap();
        engine.start_workflow(&workflow_id, "42").await.unwrap();

        let result = engine
            .complete_step("42", "developer", json!({"status": "failed", "next_agent": "done"}), "c1")
            .await
            .unwrap();
        assert_eq!(result, StepCompletion::Terminal);

        let status = engine.get_workflow_status("42").await.unwrap();
        assert_eq!(status.state, WorkflowState::Failed);
    }

    #[tokio::test]
    async fn failed_step_with_a_real_next_agent_still_chains() {
        let (_dir, engine) = engine().await;
        let workflow_id = engine
            .create_workflow_for_issue("42", "nexus", "acme/nexus-core", "full", &definition(), "https://x/42")
            .await
            .unwrap();
        engine.start_workflow(&workflow_id, "42").await.unwrap();

        let result = engine
            .complete_step("42", "developer", json!({"status": "failed", "next_agent": "reviewer"}), "c1")
            .await
            .unwrap();
        assert_eq!(result, StepCompletion::NextAgent("reviewer".to_string()));

        let workflow = engine.load_workflow_for_issue("42").await.unwrap();
        assert_eq!(workflow.step(1).unwrap().status, StepStatus::Failed);
        assert_eq!(workflow.state, WorkflowState::Running);
        let status = engine.get_workflow_status("42").await.unwrap();
        assert_eq!(status.current_step_name.as_deref(), Some("Reviewer"));
    }

    #[tokio::test]
    async fn complete_step_on_unknown_issue_fails_without_touching_ledger() {
        let (_dir, engine) = engine().await;
        let result = engine
            .complete_step("999", "developer", json!({"next_agent": "reviewer"}), "c1")
            .await;
        assert!(matches!(result, Err(OrchestratorError::WorkflowNotFound { .. })));
    }

    #[tokio::test]
    async fn pause_then_resume_leaves_step_statuses_unchanged() {
        let (_dir, engine) = engine().await;
        let workflow_id = engine
            .create_workflow_for_issue("42", "nexus", "acme/nexus-core", "full", &definition(), "https://x/42")
            .await
            .unwrap();
        engine.start_workflow(&workflow_id, "42").await.unwrap();

        let before = engine.load_workflow_for_issue("42").await.unwrap();
        engine.pause_workflow("42", "operator request").await.unwrap();
        engine.resume_workflow("42").await.unwrap();
        let after = engine.load_workflow_for_issue("42").await.unwrap();

        for (b, a) in before.steps.iter().zip(after.steps.iter()) {
            assert_eq!(b.status, a.status);
        }
    }

    #[tokio::test]
    async fn reset_to_agent_treats_earlier_steps_as_complete() {
        let (_dir, engine) = engine().await;
        let workflow_id = engine
            .create_workflow_for_issue("42", "nexus", "acme/nexus-core", "full", &definition(), "https://x/42")
            .await
            .unwrap();
        engine.start_workflow(&workflow_id, "42").await.unwrap();

        let ok = engine.reset_workflow_to_agent("42", "reviewer").await.unwrap();
        assert!(ok);

        let workflow = engine.load_workflow_for_issue("42").await.unwrap();
        assert_eq!(workflow.step(1).unwrap().status, StepStatus::Complete);
        assert_eq!(workflow.step(2).unwrap().status, StepStatus::Running);

        let result = engine
            .complete_step("42", "reviewer", json!({"next_agent": "reviewer-complete"}), "c1")
            .await
            .unwrap();
        assert_eq!(result, StepCompletion::Terminal);
    }
}
