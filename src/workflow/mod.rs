//! `Workflow`/`Step` data model, state machine and the `WorkflowEngine`
//! that drives them (spec.md §4.E).

pub mod engine;
pub mod state_machine;
pub mod types;

pub use engine::WorkflowEngine;
pub use types::{
    AgentRef, Step, StepCompletion, StepStatus, Workflow, WorkflowDefinition, WorkflowMetadata,
    WorkflowState, WorkflowStatus,
};
