//! Data model for `Workflow`/`Step` (spec.md §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowState {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
    Stopped,
}

impl WorkflowState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkflowState::Completed
                | WorkflowState::Failed
                | WorkflowState::Cancelled
                | WorkflowState::Stopped
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Complete,
    Failed,
    Skipped,
    Paused,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRef {
    pub name: String,
    pub display_name: String,
    pub agent_type: String,
}

impl AgentRef {
    /// Normalized for comparisons: strip a leading `@`, lowercase, trim
    /// surrounding backticks (spec.md §4.E step 3).
    pub fn normalize(raw: &str) -> String {
        raw.trim()
            .trim_start_matches('@')
            .trim_matches('`')
            .to_lowercase()
    }

    pub fn matches(&self, raw: &str) -> bool {
        self.name.to_lowercase() == Self::normalize(raw)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub step_num: u32,
    pub name: String,
    pub agent: AgentRef,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub outputs: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowMetadata {
    pub issue_url: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub workflow_id: String,
    pub issue_id: String,
    pub project_key: String,
    pub repo_key: String,
    pub tier: String,
    pub state: WorkflowState,
    pub steps: Vec<Step>,
    pub current_step_num: u32,
    pub metadata: WorkflowMetadata,
}

impl Workflow {
    pub fn running_step(&self) -> Option<&Step> {
        self.steps.iter().find(|s| s.status == StepStatus::Running)
    }

    pub fn running_step_mut(&mut self) -> Option<&mut Step> {
        self.steps.iter_mut().find(|s| s.status == StepStatus::Running)
    }

    pub fn step_mut(&mut self, step_num: u32) -> Option<&mut Step> {
        self.steps.iter_mut().find(|s| s.step_num == step_num)
    }

    pub fn step(&self, step_num: u32) -> Option<&Step> {
        self.steps.iter().find(|s| s.step_num == step_num)
    }

    pub fn find_step_by_agent(&self, agent_name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.agent.matches(agent_name))
    }
}

/// A named, ordered sequence of agents selected per issue (the "tier").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    pub steps: Vec<AgentRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStatus {
    pub state: WorkflowState,
    pub current_step_num: u32,
    pub total_steps: u32,
    pub current_step_name: Option<String>,
    pub workflow_name: String,
}

/// Outcome of `WorkflowEngine::complete_step`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepCompletion {
    Terminal,
    NextAgent(String),
    DuplicateIgnored,
}
