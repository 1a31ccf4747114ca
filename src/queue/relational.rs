//! Relational `InboxQueue` backend: claim runs inside one sqlx transaction,
//! matching the teacher's `database.rs` pool-per-manager style.

use crate::error::{OrchestratorError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use super::{InboxQueue, Task, TaskStatus, DUPLICATE_SUPPRESSED_ERROR};

pub struct RelationalInboxQueue {
    pool: SqlitePool,
}

impl RelationalInboxQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_to_task(row: &sqlx::sqlite::SqliteRow) -> Task {
    let status: String = row.get("status");
    let claimed_at: Option<String> = row.get("claimed_at");
    Task {
        id: row.get::<i64, _>("id"),
        project_key: row.get("project_key"),
        workspace: row.get("workspace"),
        filename: row.get("filename"),
        markdown_content: row.get("markdown_content"),
        status: parse_status(&status),
        claimed_by: row.get("claimed_by"),
        claimed_at: claimed_at.and_then(|s| DateTime::parse_from_rfc3339(&s).ok().map(|d| d.with_timezone(&Utc))),
        attempt_count: row.get::<i64, _>("attempt_count") as u32,
        error: row.get("error"),
    }
}

fn parse_status(s: &str) -> TaskStatus {
    match s {
        "processing" => TaskStatus::Processing,
        "done" => TaskStatus::Done,
        "failed" => TaskStatus::Failed,
        _ => TaskStatus::Pending,
    }
}

#[async_trait]
impl InboxQueue for RelationalInboxQueue {
    async fn enqueue(
        &self,
        project_key: &str,
        workspace: &str,
        filename: &str,
        markdown_content: &str,
    ) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO queue_tasks (project_key, workspace, filename, markdown_content, status)
            VALUES (?1, ?2, ?3, ?4, 'pending')
            "#,
        )
        .bind(project_key)
        .bind(workspace)
        .bind(filename)
        .bind(markdown_content)
        .execute(&self.pool)
        .await
        .map_err(|e| OrchestratorError::Queue(e.to_string()))?;

        Ok(result.last_insert_rowid())
    }

    async fn claim(&self, limit: usize, worker_id: &str) -> Result<Vec<Task>> {
        let mut tx = self.pool.begin().await.map_err(|e| OrchestratorError::Queue(e.to_string()))?;

        let pending_rows = sqlx::query(
            "SELECT id, project_key, filename FROM queue_tasks WHERE status = 'pending' ORDER BY id ASC LIMIT ?1",
        )
        .bind(limit as i64)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| OrchestratorError::Queue(e.to_string()))?;

        let mut claimed_ids = Vec::new();
        for row in &pending_rows {
            let id: i64 = row.get("id");
            let project_key: String = row.get("project_key");
            let filename: String = row.get("filename");

            let siblings = sqlx::query(
                "SELECT id FROM queue_tasks WHERE status = 'pending' AND project_key = ?1 AND filename = ?2 ORDER BY id ASC",
            )
            .bind(&project_key)
            .bind(&filename)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| OrchestratorError::Queue(e.to_string()))?;

            let Some(oldest) = siblings.first() else { continue };
            let oldest_id: i64 = oldest.get("id");
            if oldest_id != id {
                continue;
            }

            for sibling in siblings.iter().skip(1) {
                let sibling_id: i64 = sibling.get("id");
                sqlx::query("UPDATE queue_tasks SET status = 'done', error = ?1 WHERE id = ?2")
                    .bind(DUPLICATE_SUPPRESSED_ERROR)
                    .bind(sibling_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| OrchestratorError::Queue(e.to_string()))?;
            }

            sqlx::query(
                "UPDATE queue_tasks SET status = 'processing', claimed_by = ?1, claimed_at = ?2 WHERE id = ?3 AND status = 'pending'",
            )
            .bind(worker_id)
            .bind(Utc::now().to_rfc3339())
            .bind(oldest_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| OrchestratorError::Queue(e.to_string()))?;

            claimed_ids.push(oldest_id);
        }

        let mut claimed = Vec::new();
        for id in claimed_ids {
            if let Some(row) = sqlx::query("SELECT * FROM queue_tasks WHERE id = ?1")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| OrchestratorError::Queue(e.to_string()))?
            {
                claimed.push(row_to_task(&row));
            }
        }

        tx.commit().await.map_err(|e| OrchestratorError::Queue(e.to_string()))?;
        Ok(claimed)
    }

    async fn mark_done(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE queue_tasks SET status = 'done' WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| OrchestratorError::Queue(e.to_string()))?;
        Ok(())
    }

    async fn mark_failed(&self, id: i64, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE queue_tasks SET status = 'failed', error = ?1, attempt_count = attempt_count + 1 WHERE id = ?2",
        )
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| OrchestratorError::Queue(e.to_string()))?;
        Ok(())
    }

    async fn reclaim_stale(&self, stale_seconds: u64) -> Result<Vec<Task>> {
        let threshold = (Utc::now() - chrono::Duration::seconds(stale_seconds as i64)).to_rfc3339();
        let rows = sqlx::query(
            "SELECT * FROM queue_tasks WHERE status = 'processing' AND claimed_at < ?1",
        )
        .bind(&threshold)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| OrchestratorError::Queue(e.to_string()))?;

        let mut reclaimed = Vec::new();
        for row in &rows {
            let id: i64 = row.get("id");
            sqlx::query(
                "UPDATE queue_tasks SET status = 'pending', claimed_by = NULL, claimed_at = NULL WHERE id = ?1",
            )
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| OrchestratorError::Queue(e.to_string()))?;

            let mut task = row_to_task(row);
            task.status = TaskStatus::Pending;
            task.claimed_by = None;
            task.claimed_at = None;
            reclaimed.push(task);
        }

        Ok(reclaimed)
    }
}
