//! `InboxQueue`: durable FIFO of task payloads (spec.md §4.C).
//!
//! Grounded on the teacher's `StateStore`-adjacent `database.rs` table
//! style for the relational backend, and a single JSON document guarded
//! by an in-process mutex for the filesystem backend — `claim` needs a
//! read-decide-write transaction that a plain `StateStore::save` alone
//! cannot provide.

pub mod filesystem;
#[cfg(feature = "database")]
pub mod relational;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub project_key: String,
    pub workspace: String,
    pub filename: String,
    pub markdown_content: String,
    pub status: TaskStatus,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub attempt_count: u32,
    pub error: Option<String>,
}

pub const DUPLICATE_SUPPRESSED_ERROR: &str = "Duplicate queue row suppressed";

#[async_trait]
pub trait InboxQueue: Send + Sync {
    /// Append a pending row. Duplicate `(project_key, filename)` pending
    /// rows are permitted on insert; they're resolved at `claim` time.
    async fn enqueue(
        &self,
        project_key: &str,
        workspace: &str,
        filename: &str,
        markdown_content: &str,
    ) -> Result<i64>;

    /// Atomically select up to `limit` pending rows, oldest first.
    /// For each selected row's `(project_key, filename)`, every other
    /// pending row sharing that key is marked `done` with
    /// [`DUPLICATE_SUPPRESSED_ERROR`]; the oldest is marked `processing`.
    async fn claim(&self, limit: usize, worker_id: &str) -> Result<Vec<Task>>;

    async fn mark_done(&self, id: i64) -> Result<()>;
    async fn mark_failed(&self, id: i64, error: &str) -> Result<()>;

    /// Rows stuck in `processing` past `stale_seconds` (a crashed worker
    /// never called `mark_done`/`mark_failed`) are reclaimed to `pending`.
    async fn reclaim_stale(&self, stale_seconds: u64) -> Result<Vec<Task>>;
}

pub use filesystem::FilesystemInboxQueue;
#[cfg(feature = "database")]
pub use relational::RelationalInboxQueue;
