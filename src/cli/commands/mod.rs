//! Operator CLI subcommands (spec.md §4.M `CommandContract`, CLI half).
//!
//! Grounded on the teacher's `cli/commands/mod.rs` shape (one module per
//! subcommand) but retargeted: every command here goes through
//! `cli::context::Context::bootstrap()` instead of the teacher's
//! `with_agent_router` helper, since the orchestration core has many more
//! collaborators than a single GitHub-backed `AgentRouter`.

pub mod doctor;
pub mod serve;
pub mod status;
pub mod tracking;
pub mod watch;
pub mod workflow_ops;
