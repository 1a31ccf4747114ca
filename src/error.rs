//! Top-level domain error taxonomy.
//!
//! Each orchestration-core component raises its own narrow error enum;
//! `OrchestratorError` is the union surfaced across component boundaries
//! (e.g. from `WorkflowEngine::complete_step` to the `Scheduler` tick).
//! Leaves (platform calls, state store I/O) retry internally per spec.md
//! §7; this type represents what's left after retry is exhausted or not
//! applicable.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("workflow not found for issue {issue_id}")]
    WorkflowNotFound { issue_id: String },

    #[error("step agent mismatch: expected `{expected}`, completion reported `{actual}`")]
    StepAgentMismatch { expected: String, actual: String },

    #[error("invalid state transition: {0}")]
    StateTransitionInvalid(String),

    #[error("duplicate event absorbed: {0}")]
    DuplicateEvent(String),

    #[error("project boundary mismatch: {0}")]
    ProjectBoundaryMismatch(String),

    #[error("retries exhausted after {attempts} attempt(s): {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<OrchestratorError>,
    },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("state store error: {0}")]
    StateStore(String),

    #[error("queue error: {0}")]
    Queue(String),

    #[error("git platform error: {0}")]
    Platform(String),

    #[error("launcher error: {0}")]
    Launcher(String),

    #[error("router error: {0}")]
    Router(String),

    #[error("webhook error: {0}")]
    Webhook(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

impl OrchestratorError {
    /// Transient I/O errors (per spec.md §7) are retryable; domain errors are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OrchestratorError::Io(_) | OrchestratorError::Platform(_) | OrchestratorError::StateStore(_)
        )
    }
}
