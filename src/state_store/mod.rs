//! `StateStore`: load/save named JSON documents (spec.md §4.A).
//!
//! Grounded on the teacher's `database.rs::DatabaseManager` for the
//! relational backend shape, and `fs/mod.rs::FileSystemOperations` for the
//! filesystem backend's IO seam. Two backends share one trait so callers
//! (`WorkflowEngine`, `InboxQueue`, `Router`, `WatchService`) never know
//! which one is active.

pub mod filesystem;
#[cfg(feature = "database")]
pub mod relational;

use crate::error::Result;
use async_trait::async_trait;

/// Well-known document keys (spec.md §6 "Persisted state keys").
pub mod keys {
    pub const LAUNCHED_AGENTS: &str = "launched_agents";
    pub const TRACKED_ISSUES: &str = "tracked_issues";
    pub const WORKFLOW_MAPPINGS: &str = "workflow_mappings";
    pub const MERGE_QUEUE: &str = "merge_queue";
    pub const WATCH_SUBSCRIPTIONS: &str = "workflow_watch_subscriptions";
    pub const IDEMPOTENCY_LEDGER: &str = "idempotency_ledger";
    pub const FEATURE_REGISTRY: &str = "feature_registry";
}

/// Load/save abstraction over a named-JSON-document store.
///
/// `save` must be atomic with respect to concurrent `load`: a reader must
/// observe either the old or the new document, never a partial write.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<serde_json::Value>>;
    async fn save(&self, key: &str, document: serde_json::Value) -> Result<()>;
}

pub use filesystem::FilesystemStateStore;
#[cfg(feature = "database")]
pub use relational::RelationalStateStore;
