//! Lifecycle event bus and alert records.
//!
//! Design Note §9: "process-wide mutable globals ... bundled into a
//! `ProcessorRuntimeState` value owned by the scheduler; reads/writes go
//! through methods." `EventBus` is the typed replacement for the source's
//! ad-hoc pub/sub (`alerted_agents`, watch-subscription fan-out, the
//! Telegram lifecycle notifications). `WatchService` and any future
//! front-end subscribe to the same bus; the orchestration core only
//! produces events.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// A structured alert record (spec.md §7, "User-visible surface").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub message: String,
    pub severity: Severity,
    pub source: String,
    pub project_key: Option<String>,
    pub issue_number: Option<u64>,
}

impl Alert {
    pub fn new(source: impl Into<String>, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity,
            source: source.into(),
            project_key: None,
            issue_number: None,
        }
    }

    pub fn for_issue(mut self, project_key: impl Into<String>, issue_number: u64) -> Self {
        self.project_key = Some(project_key.into());
        self.issue_number = Some(issue_number);
        self
    }
}

/// Lifecycle events emitted by the orchestration core (spec.md §4.E, §4.L).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LifecycleEvent {
    StepStatusChanged {
        issue_id: String,
        project_key: String,
        step_num: u32,
        step_name: String,
        status: String,
    },
    WorkflowCompleted {
        issue_id: String,
        project_key: String,
    },
    MermaidDiagram {
        issue_id: String,
        project_key: String,
        diagram: String,
        content_hash: String,
    },
    Alert(Alert),
}

/// Simple broadcast-backed event bus. Multiple subscribers (e.g. multiple
/// `WatchService` instances, a future CLI tail) each get every event;
/// backpressure is handled by dropping the oldest events for slow
/// subscribers, matching `tokio::sync::broadcast` semantics.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }

    /// Best-effort publish: an event bus with no subscribers is a no-op,
    /// matching a lifecycle notification nobody is listening for.
    pub fn publish(&self, event: LifecycleEvent) {
        let _ = self.sender.send(event);
    }

    pub fn alert(&self, alert: Alert) {
        tracing::warn!(source = %alert.source, severity = ?alert.severity, "{}", alert.message);
        self.publish(LifecycleEvent::Alert(alert));
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.publish(LifecycleEvent::WorkflowCompleted {
            issue_id: "42".into(),
            project_key: "nexus".into(),
        });
        let event = rx.recv().await.unwrap();
        matches!(event, LifecycleEvent::WorkflowCompleted { .. });
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.publish(LifecycleEvent::WorkflowCompleted {
            issue_id: "1".into(),
            project_key: "nexus".into(),
        });
    }
}
