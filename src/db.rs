//! SQLite pool behind [`SqliteDownloadStore`](crate::SqliteDownloadStore).
//!
//! File databases run in WAL mode with a busy timeout so the writer task and
//! a restore read never trip over each other. Migrations are embedded.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use tracing::{debug, instrument};

/// One writer task plus the occasional restore read.
const MAX_CONNECTIONS: u32 = 2;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Database-related errors.
#[derive(Error, Debug)]
pub enum DbError {
    /// Failed to open or configure the database.
    #[error("failed to connect to database: {0}")]
    Connection(#[from] sqlx::Error),

    /// Failed to run migrations.
    #[error("failed to run migrations: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Migrated SQLite pool holding persisted download items.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens the database at `db_path`, creating the file and its parent
    /// directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Connection`] if the file cannot be opened and
    /// [`DbError::Migration`] if the schema cannot be brought up to date.
    #[instrument(skip(db_path), fields(path = %db_path.display()))]
    pub async fn new(db_path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DbError::Connection(sqlx::Error::Io(e)))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);
        Self::open(options, MAX_CONNECTIONS).await
    }

    /// In-memory database for tests; one connection so every query sees
    /// the same memory.
    ///
    /// # Errors
    ///
    /// Same as [`Database::new`].
    pub async fn new_in_memory() -> Result<Self, DbError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        Self::open(options, 1).await
    }

    async fn open(options: SqliteConnectOptions, max_connections: u32) -> Result<Self, DbError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        debug!(max_connections, "download database ready");
        Ok(Self { pool })
    }

    /// Returns the underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    async fn journal_mode(db: &Database) -> String {
        let (mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(db.pool())
            .await
            .unwrap();
        mode.to_lowercase()
    }

    #[tokio::test]
    async fn test_in_memory_database_has_items_table() {
        let db = Database::new_in_memory().await.unwrap();

        sqlx::query(
            "INSERT INTO download_items (id, library_item_id, document) VALUES ('li_1', 'li_1', '{}')",
        )
        .execute(db.pool())
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_malformed_document_is_rejected() {
        let db = Database::new_in_memory().await.unwrap();

        let result = sqlx::query(
            "INSERT INTO download_items (id, library_item_id, document) VALUES ('li_1', 'li_1', 'not json')",
        )
        .execute(db.pool())
        .await;

        assert!(result.is_err(), "CHECK (json_valid) should reject the row");
    }

    #[tokio::test]
    async fn test_file_database_uses_wal_in_nested_directory() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("nested/state/downloads.db");

        let db = Database::new(&db_path).await.unwrap();

        assert!(db_path.exists());
        assert_eq!(journal_mode(&db).await, "wal");
    }

    #[tokio::test]
    async fn test_reopening_keeps_rows() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("downloads.db");

        {
            let db = Database::new(&db_path).await.unwrap();
            sqlx::query(
                "INSERT INTO download_items (id, library_item_id, document) VALUES ('li_1', 'li_1', '{}')",
            )
            .execute(db.pool())
            .await
            .unwrap();
            db.pool().close().await;
        }

        let db = Database::new(&db_path).await.unwrap();
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM download_items")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
