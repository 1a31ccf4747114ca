use crate::error::Result;
use crate::state_store::StateStore;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{InboxQueue, Task, TaskStatus, DUPLICATE_SUPPRESSED_ERROR};

const QUEUE_KEY: &str = "inbox_queue";

/// Filesystem-backed queue: the whole task list lives in one `StateStore`
/// document. A process-local mutex makes `claim` a true
/// read-decide-write transaction; the document save is still what makes
/// the on-disk state atomic with respect to concurrent readers.
pub struct FilesystemInboxQueue {
    store: Arc<dyn StateStore>,
    write_lock: Mutex<()>,
}

impl FilesystemInboxQueue {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    async fn load_tasks(&self) -> Result<Vec<Task>> {
        match self.store.load(QUEUE_KEY).await? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(Vec::new()),
        }
    }

    async fn save_tasks(&self, tasks: &[Task]) -> Result<()> {
        self.store.save(QUEUE_KEY, serde_json::to_value(tasks)?).await
    }
}

#[async_trait]
impl InboxQueue for FilesystemInboxQueue {
    async fn enqueue(
        &self,
        project_key: &str,
        workspace: &str,
        filename: &str,
        markdown_content: &str,
    ) -> Result<i64> {
        let _guard = self.write_lock.lock().await;
        let mut tasks = self.load_tasks().await?;
        let next_id = tasks.iter().map(|t| t.id).max().unwrap_or(0) + 1;
        tasks.push(Task {
            id: next_id,
            project_key: project_key.to_string(),
            workspace: workspace.to_string(),
            filename: filename.to_string(),
            markdown_content: markdown_content.to_string(),
            status: TaskStatus::Pending,
            claimed_by: None,
            claimed_at: None,
            attempt_count: 0,
            error: None,
        });
        self.save_tasks(&tasks).await?;
        Ok(next_id)
    }

    async fn claim(&self, limit: usize, worker_id: &str) -> Result<Vec<Task>> {
        let _guard = self.write_lock.lock().await;
        let mut tasks = self.load_tasks().await?;

        let mut pending_ids: Vec<i64> = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .map(|t| t.id)
            .collect();
        pending_ids.sort_unstable();
        let selected_ids: Vec<i64> = pending_ids.into_iter().take(limit).collect();

        let mut claimed = Vec::new();
        for &id in &selected_ids {
            let key = {
                let task = tasks.iter().find(|t| t.id == id).unwrap();
                (task.project_key.clone(), task.filename.clone())
            };

            let mut sibling_pending_ids: Vec<i64> = tasks
                .iter()
                .filter(|t| {
                    t.status == TaskStatus::Pending
                        && t.project_key == key.0
                        && t.filename == key.1
                })
                .map(|t| t.id)
                .collect();
            sibling_pending_ids.sort_unstable();

            let Some(&oldest_id) = sibling_pending_ids.first() else {
                continue;
            };

            for &sibling_id in &sibling_pending_ids[1..] {
                if let Some(task) = tasks.iter_mut().find(|t| t.id == sibling_id) {
                    task.status = TaskStatus::Done;
                    task.error = Some(DUPLICATE_SUPPRESSED_ERROR.to_string());
                }
            }

            if let Some(task) = tasks.iter_mut().find(|t| t.id == oldest_id) {
                if task.status == TaskStatus::Pending {
                    task.status = TaskStatus::Processing;
                    task.claimed_by = Some(worker_id.to_string());
                    task.claimed_at = Some(Utc::now());
                    claimed.push(task.clone());
                }
            }
        }

        self.save_tasks(&tasks).await?;
        Ok(claimed)
    }

    async fn mark_done(&self, id: i64) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut tasks = self.load_tasks().await?;
        if let Some(task) = tasks.iter_mut().find(|t| t.id == id) {
            task.status = TaskStatus::Done;
        }
        self.save_tasks(&tasks).await
    }

    async fn mark_failed(&self, id: i64, error: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut tasks = self.load_tasks().await?;
        if let Some(task) = tasks.iter_mut().find(|t| t.id == id) {
            task.status = TaskStatus::Failed;
            task.error = Some(error.to_string());
            task.attempt_count += 1;
        }
        self.save_tasks(&tasks).await
    }

    async fn reclaim_stale(&self, stale_seconds: u64) -> Result<Vec<Task>> {
        let _guard = self.write_lock.lock().await;
        let mut tasks = self.load_tasks().await?;
        let threshold = Utc::now() - chrono::Duration::seconds(stale_seconds as i64);

        let mut reclaimed = Vec::new();
        for task in tasks.iter_mut() {
            if task.status == TaskStatus::Processing {
                if let Some(claimed_at) = task.claimed_at {
                    if claimed_at < threshold {
                        task.status = TaskStatus::Pending;
                        task.claimed_by = None;
                        task.claimed_at = None;
                        reclaimed.push(task.clone());
                    }
                }
            }
        }

        self.save_tasks(&tasks).await?;
        Ok(reclaimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_store::FilesystemStateStore;

    fn new_queue() -> (tempfile::TempDir, FilesystemInboxQueue) {
        let dir = tempfile::TempDir::new().unwrap();
        let store = Arc::new(FilesystemStateStore::new(dir.path()));
        (dir, FilesystemInboxQueue::new(store))
    }

    #[tokio::test]
    async fn duplicate_pending_rows_are_suppressed_on_claim() {
        let (_dir, queue) = new_queue();

        let first = queue.enqueue("nexus", "workspace-a", "task_901.md", "body").await.unwrap();
        let _second = queue.enqueue("nexus", "workspace-a", "task_901.md", "body").await.unwrap();

        let claimed = queue.claim(10, "w-1").await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, first);
        assert_eq!(claimed[0].status, TaskStatus::Processing);

        let tasks = queue.load_tasks().await.unwrap();
        let suppressed = tasks.iter().find(|t| t.id != first).unwrap();
        assert_eq!(suppressed.status, TaskStatus::Done);
        assert_eq!(suppressed.error.as_deref(), Some(DUPLICATE_SUPPRESSED_ERROR));
    }

    #[tokio::test]
    async fn claim_on_empty_queue_returns_empty_list() {
        let (_dir, queue) = new_queue();
        let claimed = queue.claim(10, "w-1").await.unwrap();
        assert!(claimed.is_empty());
    }

    #[tokio::test]
    async fn enqueue_claim_mark_done_removes_pending_row() {
        let (_dir, queue) = new_queue();
        let id = queue.enqueue("nexus", "workspace-a", "task_1.md", "body").await.unwrap();
        let claimed = queue.claim(10, "w-1").await.unwrap();
        assert_eq!(claimed.len(), 1);
        queue.mark_done(id).await.unwrap();

        let tasks = queue.load_tasks().await.unwrap();
        assert!(!tasks.iter().any(|t| t.status == TaskStatus::Pending));
    }

    #[tokio::test]
    async fn stale_processing_rows_are_reclaimed() {
        let (_dir, queue) = new_queue();
        let id = queue.enqueue("nexus", "workspace-a", "task_1.md", "body").await.unwrap();
        queue.claim(10, "w-1").await.unwrap();

        {
            let mut tasks = queue.load_tasks().await.unwrap();
            let task = tasks.iter_mut().find(|t| t.id == id).unwrap();
            task.claimed_at = Some(Utc::now() - chrono::Duration::seconds(700));
            queue.save_tasks(&tasks).await.unwrap();
        }

        let reclaimed = queue.reclaim_stale(600).await.unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].status, TaskStatus::Pending);
    }
}
