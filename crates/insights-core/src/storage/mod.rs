//! SQLite storage layer for the insights pipeline.
//!
//! Provides database initialization, connection pooling, and query
//! functions for conversations, tweets, insights, and the analysis cache.
//! Uses SQLx with WAL mode for concurrent access.

pub mod cache;
pub mod insights;
pub mod threads;

use crate::error::StorageError;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use std::str::FromStr;
use std::time::Duration;

/// Type alias for the SQLite connection pool.
pub type DbPool = sqlx::SqlitePool;

/// Initializes the SQLite database from a `DATABASE_URL` connection string.
///
/// Configures WAL mode for concurrent read/write performance, runs embedded
/// migrations, and returns a connection pool sized for this service's single
/// analyzer task plus concurrent HTTP readers.
pub async fn init_db(database_url: &str) -> Result<DbPool, StorageError> {
    let connect_options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| StorageError::Unavailable { source: e })?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5))
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .min_connections(1)
        .idle_timeout(Duration::from_secs(300))
        .connect_with(connect_options)
        .await
        .map_err(|e| StorageError::Unavailable { source: e })?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| StorageError::Migration { source: e })?;

    Ok(pool)
}

/// Initializes an in-memory SQLite database for testing.
///
/// Uses a shared cache so multiple connections can access the same
/// in-memory database within a test process.
#[cfg(any(test, feature = "test-helpers"))]
pub async fn init_test_db() -> Result<DbPool, StorageError> {
    let connect_options = SqliteConnectOptions::from_str("sqlite::memory:")
        .map_err(|e| StorageError::Unavailable { source: e })?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(connect_options)
        .await
        .map_err(|e| StorageError::Unavailable { source: e })?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| StorageError::Migration { source: e })?;

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn init_test_db_creates_all_tables() {
        let pool = init_test_db().await.expect("init test db");

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' AND name != '_sqlx_migrations' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .expect("query tables");

        let table_names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        assert!(table_names.contains(&"conversations"));
        assert!(table_names.contains(&"tweets"));
        assert!(table_names.contains(&"insights"));
        assert!(table_names.contains(&"analysis_cache"));
    }

    #[tokio::test]
    async fn init_test_db_idempotent() {
        let pool = init_test_db().await.expect("first init");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("second migration run");
    }

    #[tokio::test]
    async fn init_db_creates_file() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}", db_path.to_string_lossy());

        let pool = init_db(&url).await.expect("init db");
        assert!(db_path.exists());
        pool.close().await;
    }
}
