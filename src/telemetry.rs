//! Structured logging bootstrap.
//!
//! Grounded on the teacher's `telemetry.rs`: JSON-formatted `tracing`
//! output plus a correlation-id helper and a coordination span builder,
//! retargeted from per-agent spans to per-task/per-issue ones.

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// Initialize structured logging. Safe to call once at process start; a
/// second call (e.g. in a test harness) is a silent no-op if a global
/// subscriber is already installed.
///
/// `tracing-opentelemetry`/`opentelemetry-stdout` stay in `Cargo.toml` for
/// when an OTel collector is wired up; until then this stays plain
/// `tracing` + the JSON layer, same as upstream.
pub fn init_telemetry() -> Result<()> {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true),
        )
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .try_init();

    tracing::info!("nexus-orchestrator telemetry initialized");
    Ok(())
}

/// Generate a correlation id for linking a task through queue claim,
/// workflow creation, agent launch, and reconciliation.
pub fn generate_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Span covering one unit of orchestration work: a queue claim, a
/// `complete_step` call, or a reconciliation pass over one issue.
pub fn create_orchestration_span(
    operation: &str,
    issue_number: Option<u64>,
    project_key: Option<&str>,
    correlation_id: Option<&str>,
) -> tracing::Span {
    tracing::info_span!(
        "orchestration",
        operation = operation,
        issue.number = issue_number,
        project.key = project_key,
        correlation.id = correlation_id,
        otel.kind = "internal"
    )
}

pub fn shutdown_telemetry() {
    tracing::info!("nexus-orchestrator telemetry shutdown complete");
}
