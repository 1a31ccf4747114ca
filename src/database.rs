//! Relational backend bootstrap for the `database` feature.
//!
//! Grounded on the teacher's `database.rs` (`DatabaseManager`): same
//! create-if-missing + migrate-on-startup sequence, trimmed to just the
//! connection pool the `relational` `StateStore`/`InboxQueue` backends need
//! — the teacher's per-table helper methods (`store_agent_state`,
//! `store_bundle_state`, ...) have no counterpart here since those tables
//! don't exist; `state_store::RelationalStateStore` and
//! `queue::RelationalInboxQueue` own their own schema.

#[cfg(feature = "database")]
use anyhow::Result;
#[cfg(feature = "database")]
use sqlx::{migrate::MigrateDatabase, SqlitePool};
#[cfg(feature = "database")]
use tracing::info;

#[cfg(feature = "database")]
pub async fn connect(database_url: &str, auto_migrate: bool) -> Result<SqlitePool> {
    if !sqlx::Sqlite::database_exists(database_url).await.unwrap_or(false) {
        info!(%database_url, "creating database");
        sqlx::Sqlite::create_database(database_url).await?;
    }

    let pool = SqlitePool::connect(database_url).await?;

    if auto_migrate {
        info!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;
    }

    Ok(pool)
}

#[cfg(feature = "database")]
pub async fn shutdown(pool: &SqlitePool) {
    info!("closing database connection pool");
    pool.close().await;
}
