//! Relational `StateStore` backend, grounded on the teacher's
//! `database.rs::DatabaseManager` (same `SqlitePool` + migration pattern).

use crate::error::{OrchestratorError, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use super::StateStore;

pub struct RelationalStateStore {
    pool: SqlitePool,
}

impl RelationalStateStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StateStore for RelationalStateStore {
    async fn load(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let row = sqlx::query("SELECT document FROM state_documents WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| OrchestratorError::StateStore(e.to_string()))?;

        match row {
            Some(row) => {
                let document: String = row.get("document");
                Ok(Some(serde_json::from_str(&document)?))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, key: &str, document: serde_json::Value) -> Result<()> {
        let serialized = document.to_string();
        sqlx::query(
            r#"
            INSERT INTO state_documents (key, document, updated_at)
            VALUES (?1, ?2, datetime('now'))
            ON CONFLICT(key) DO UPDATE SET document = excluded.document, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(serialized)
        .execute(&self.pool)
        .await
        .map_err(|e| OrchestratorError::StateStore(e.to_string()))?;

        Ok(())
    }
}
