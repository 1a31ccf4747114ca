//! `WatchService`: per-subscriber live event forwarding (spec.md §4.L),
//! plus the Mermaid workflow-diagram builder.
//!
//! Grounded on `original_source/.../telegram_workflow_probe_service.py`
//! (subscription map keyed by `"<chat>:<user>"`, throttle window,
//! `workflow_completed` unsubscribe-on-match) and
//! `mermaid_render_service.py`'s `build_mermaid_diagram` (text-only —
//! rendering to PNG via an external `mmdc` binary is out of scope here).
//! A chat front-end is itself out of scope (spec.md §1); subscribers get a
//! `tokio::mpsc` receiver instead of a delivered chat message.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, RwLock};

use crate::alerts::{EventBus, LifecycleEvent};
use crate::clock::Clock;
use crate::error::Result;
use crate::state_store::{keys, StateStore};
use crate::workflow::{StepStatus, Workflow};

/// Persisted half of a subscription (spec.md §6 `workflow_watch_subscriptions`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    pub project_key: String,
    pub issue: u64,
    pub workflow_id: String,
    pub mermaid_enabled: bool,
    #[serde(default)]
    pub last_sent_hash: Option<String>,
}

#[derive(Debug, Clone)]
pub enum WatchNotification {
    StepStatusChanged {
        step_num: u32,
        step_name: String,
        status: String,
    },
    WorkflowCompleted,
    MermaidDiagram {
        diagram: String,
    },
}

struct ActiveSubscriber {
    record: SubscriptionRecord,
    last_sent_at: Option<DateTime<Utc>>,
    sender: mpsc::UnboundedSender<WatchNotification>,
}

/// Keyed by `"<chat>:<user>"` (spec.md §4.L), tracked both in a persisted
/// `StateStore` document and an in-memory forwarding table — channels
/// don't survive a restart, but the subscription intent does.
pub struct WatchService {
    store: Arc<dyn StateStore>,
    events: EventBus,
    clock: Arc<dyn Clock>,
    throttle: Duration,
    subscribers: RwLock<HashMap<String, ActiveSubscriber>>,
}

impl WatchService {
    pub fn new(store: Arc<dyn StateStore>, events: EventBus, clock: Arc<dyn Clock>, throttle: Duration) -> Self {
        Self {
            store,
            events,
            clock,
            throttle,
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    async fn load_persisted(&self) -> Result<HashMap<String, SubscriptionRecord>> {
        match self.store.load(keys::WATCH_SUBSCRIPTIONS).await? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(HashMap::new()),
        }
    }

    async fn save_persisted(&self, records: &HashMap<String, SubscriptionRecord>) -> Result<()> {
        self.store
            .save(keys::WATCH_SUBSCRIPTIONS, serde_json::to_value(records)?)
            .await
    }

    /// Registers `key` as a watcher of `(project_key, issue)`, returning
    /// the receiver end it should poll for forwarded events.
    pub async fn subscribe(
        &self,
        key: &str,
        project_key: &str,
        issue: u64,
        workflow_id: &str,
        mermaid_enabled: bool,
    ) -> Result<mpsc::UnboundedReceiver<WatchNotification>> {
        let record = SubscriptionRecord {
            project_key: project_key.to_string(),
            issue,
            workflow_id: workflow_id.to_string(),
            mermaid_enabled,
            last_sent_hash: None,
        };

        let mut persisted = self.load_persisted().await?;
        persisted.insert(key.to_string(), record.clone());
        self.save_persisted(&persisted).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscribers = self.subscribers.write().await;
        subscribers.insert(
            key.to_string(),
            ActiveSubscriber {
                record,
                last_sent_at: None,
                sender: tx,
            },
        );
        Ok(rx)
    }

    pub async fn unsubscribe(&self, key: &str) -> Result<()> {
        let mut persisted = self.load_persisted().await?;
        persisted.remove(key);
        self.save_persisted(&persisted).await?;

        self.subscribers.write().await.remove(key);
        Ok(())
    }

    /// Consumes the event bus forever; intended to run as its own task.
    pub async fn run(self: Arc<Self>) {
        let mut rx = self.events.subscribe();
        loop {
            match rx.recv().await {
                Ok(event) => self.dispatch(event).await,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    async fn dispatch(&self, event: LifecycleEvent) {
        match event {
            LifecycleEvent::StepStatusChanged {
                issue_id,
                project_key,
                step_num,
                step_name,
                status,
            } => {
                let Ok(issue) = issue_id.parse::<u64>() else { return };
                self.forward_throttled(
                    &project_key,
                    issue,
                    WatchNotification::StepStatusChanged {
                        step_num,
                        step_name,
                        status,
                    },
                )
                .await;
            }
            LifecycleEvent::WorkflowCompleted { issue_id, project_key } => {
                let Ok(issue) = issue_id.parse::<u64>() else { return };
                self.forward_unthrottled(&project_key, issue, WatchNotification::WorkflowCompleted)
                    .await;
                self.unsubscribe_matching(&project_key, issue).await;
            }
            LifecycleEvent::MermaidDiagram {
                issue_id,
                project_key,
                diagram,
                content_hash,
            } => {
                let Ok(issue) = issue_id.parse::<u64>() else { return };
                self.forward_mermaid(&project_key, issue, diagram, content_hash).await;
            }
            LifecycleEvent::Alert(_) => {}
        }
    }

    async fn forward_throttled(&self, project_key: &str, issue: u64, notification: WatchNotification) {
        let now = self.clock.now();
        let mut subscribers = self.subscribers.write().await;
        for sub in subscribers.values_mut() {
            if sub.record.project_key != project_key || sub.record.issue != issue {
                continue;
            }
            if let Some(last) = sub.last_sent_at {
                if now - last < chrono::Duration::from_std(self.throttle).unwrap_or_default() {
                    continue;
                }
            }
            if sub.sender.send(notification.clone()).is_ok() {
                sub.last_sent_at = Some(now);
            }
        }
    }

    async fn forward_unthrottled(&self, project_key: &str, issue: u64, notification: WatchNotification) {
        let subscribers = self.subscribers.read().await;
        for sub in subscribers.values() {
            if sub.record.project_key == project_key && sub.record.issue == issue {
                let _ = sub.sender.send(notification.clone());
            }
        }
    }

    async fn forward_mermaid(&self, project_key: &str, issue: u64, diagram: String, content_hash: String) {
        let mut subscribers = self.subscribers.write().await;
        for sub in subscribers.values_mut() {
            if sub.record.project_key != project_key || sub.record.issue != issue || !sub.record.mermaid_enabled {
                continue;
            }
            if sub.record.last_sent_hash.as_deref() == Some(content_hash.as_str()) {
                continue;
            }
            if sub
                .sender
                .send(WatchNotification::MermaidDiagram { diagram: diagram.clone() })
                .is_ok()
            {
                sub.record.last_sent_hash = Some(content_hash.clone());
            }
        }
    }

    /// `workflow_completed` unsubscribes only the `(project_key, issue)`
    /// subscribers, per spec.md §4.L — other issues' watchers are untouched.
    async fn unsubscribe_matching(&self, project_key: &str, issue: u64) {
        let mut subscribers = self.subscribers.write().await;
        let dead: Vec<String> = subscribers
            .iter()
            .filter(|(_, sub)| sub.record.project_key == project_key && sub.record.issue == issue)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &dead {
            subscribers.remove(key);
        }
        drop(subscribers);

        if let Ok(mut persisted) = self.load_persisted().await {
            let before = persisted.len();
            persisted.retain(|_, r| !(r.project_key == project_key && r.issue == issue));
            if persisted.len() != before {
                let _ = self.save_persisted(&persisted).await;
            }
        }
    }
}

/// Renders a workflow's steps as a Mermaid `graph TD` string, diffed by
/// content hash for dedup (`mermaid_render_service.py::build_mermaid_diagram`).
pub fn build_mermaid_diagram(workflow: &Workflow) -> String {
    let mut lines = vec!["graph TD".to_string()];
    for (idx, step) in workflow.steps.iter().enumerate() {
        let node = format!("S{}", step.step_num);
        let shape = match step.status {
            StepStatus::Running => format!("{node}((\"{}\"))", step.name),
            StepStatus::Complete => format!("{node}[\"{}\"]", step.name),
            StepStatus::Failed => format!("{node}{{\"{}\"}}", step.name),
            _ => format!("{node}[\"{}\"]", step.name),
        };
        lines.push(format!("    {shape}"));
        if let Some(next) = workflow.steps.get(idx + 1) {
            lines.push(format!("    S{} --> S{}", step.step_num, next.step_num));
        }
    }
    lines.join("\n")
}

pub fn mermaid_content_hash(diagram: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(diagram.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::state_store::FilesystemStateStore;
    use crate::workflow::{AgentRef, Step, WorkflowMetadata, WorkflowState};

    fn sample_workflow() -> Workflow {
        Workflow {
            workflow_id: "nexus-42-full".to_string(),
            issue_id: "42".to_string(),
            project_key: "nexus".to_string(),
            repo_key: "acme/nexus-core".to_string(),
            tier: "full".to_string(),
            state: WorkflowState::Running,
            current_step_num: 1,
            steps: vec![Step {
                step_num: 1,
                name: "Developer".to_string(),
                agent: AgentRef {
                    name: "developer".to_string(),
                    display_name: "Developer".to_string(),
                    agent_type: "developer".to_string(),
                },
                status: StepStatus::Running,
                started_at: None,
                completed_at: None,
                outputs: None,
            }],
            metadata: WorkflowMetadata {
                issue_url: "https://x/42".to_string(),
                created_at: Utc::now(),
            },
        }
    }

    #[test]
    fn mermaid_diagram_contains_every_step() {
        let diagram = build_mermaid_diagram(&sample_workflow());
        assert!(diagram.starts_with("graph TD"));
        assert!(diagram.contains("Developer"));
    }

    #[test]
    fn mermaid_hash_is_stable_for_identical_content() {
        let a = mermaid_content_hash("graph TD\n    S1[\"x\"]");
        let b = mermaid_content_hash("graph TD\n    S1[\"x\"]");
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn workflow_completed_unsubscribes_only_the_matching_issue() {
        let dir = tempfile::TempDir::new().unwrap();
        let store: Arc<dyn StateStore> = Arc::new(FilesystemStateStore::new(dir.path()));
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let service = Arc::new(WatchService::new(store, EventBus::default(), clock, Duration::from_secs(5)));

        let mut rx_a = service.subscribe("chat:1", "nexus", 42, "nexus-42-full", false).await.unwrap();
        let mut rx_b = service.subscribe("chat:2", "nexus", 99, "nexus-99-full", false).await.unwrap();

        service
            .dispatch(LifecycleEvent::WorkflowCompleted {
                issue_id: "42".to_string(),
                project_key: "nexus".to_string(),
            })
            .await;

        assert!(matches!(rx_a.recv().await, Some(WatchNotification::WorkflowCompleted)));
        assert_eq!(service.subscribers.read().await.len(), 1);
        assert!(service.subscribers.read().await.contains_key("chat:2"));
        drop(rx_b);
    }

    #[tokio::test]
    async fn mermaid_dedup_skips_repeated_content_hash() {
        let dir = tempfile::TempDir::new().unwrap();
        let store: Arc<dyn StateStore> = Arc::new(FilesystemStateStore::new(dir.path()));
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let service = Arc::new(WatchService::new(store, EventBus::default(), clock, Duration::from_secs(5)));

        let mut rx = service.subscribe("chat:1", "nexus", 42, "nexus-42-full", true).await.unwrap();
        let diagram = "graph TD\n    S1[\"x\"]".to_string();
        let hash = mermaid_content_hash(&diagram);

        service
            .dispatch(LifecycleEvent::MermaidDiagram {
                issue_id: "42".to_string(),
                project_key: "nexus".to_string(),
                diagram: diagram.clone(),
                content_hash: hash.clone(),
            })
            .await;
        service
            .dispatch(LifecycleEvent::MermaidDiagram {
                issue_id: "42".to_string(),
                project_key: "nexus".to_string(),
                diagram,
                content_hash: hash,
            })
            .await;

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }
}
