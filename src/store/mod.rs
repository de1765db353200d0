//! Durable storage for queued download items.
//!
//! The queue manager hands items to a [`DownloadStore`] when they are queued
//! and when they settle, so a restarted process can pick them up again with
//! [`DownloadQueueManager::restore_incomplete_downloads`].
//!
//! [`DownloadQueueManager::restore_incomplete_downloads`]: crate::manager::DownloadQueueManager::restore_incomplete_downloads

use async_trait::async_trait;
use sqlx::Row;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::db::Database;
use crate::model::DownloadItem;

/// Errors from the persistence collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database query failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Item could not be encoded or decoded.
    #[error("failed to encode item {item_id}: {source}")]
    Encode {
        /// Item id.
        item_id: String,
        /// The underlying serde error.
        #[source]
        source: serde_json::Error,
    },
}

/// Persistence collaborator for queue state.
#[async_trait]
pub trait DownloadStore: Send + Sync {
    /// Inserts or replaces the item.
    async fn save_item(&self, item: &DownloadItem) -> Result<(), StoreError>;

    /// Removes the item. Unknown ids are not an error.
    async fn remove_item(&self, item_id: &str) -> Result<(), StoreError>;

    /// Loads every stored item, oldest first.
    async fn load_items(&self) -> Result<Vec<DownloadItem>, StoreError>;
}

/// [`DownloadStore`] backed by the SQLite `download_items` table.
#[derive(Debug, Clone)]
pub struct SqliteDownloadStore {
    db: Database,
}

impl SqliteDownloadStore {
    /// Wraps an open database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl DownloadStore for SqliteDownloadStore {
    #[instrument(skip(self, item), fields(item_id = %item.id))]
    async fn save_item(&self, item: &DownloadItem) -> Result<(), StoreError> {
        let document = serde_json::to_string(item).map_err(|source| StoreError::Encode {
            item_id: item.id.clone(),
            source,
        })?;

        sqlx::query(
            r"INSERT INTO download_items (id, library_item_id, episode_id, document)
              VALUES (?, ?, ?, ?)
              ON CONFLICT(id) DO UPDATE SET
                  document = excluded.document,
                  updated_at = datetime('now')",
        )
        .bind(&item.id)
        .bind(&item.library_item_id)
        .bind(item.episode_id.as_deref())
        .bind(document)
        .execute(self.db.pool())
        .await?;

        debug!("item saved");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove_item(&self, item_id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM download_items WHERE id = ?")
            .bind(item_id)
            .execute(self.db.pool())
            .await?;
        debug!(rows = result.rows_affected(), "item removed");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn load_items(&self) -> Result<Vec<DownloadItem>, StoreError> {
        let rows = sqlx::query("SELECT id, document FROM download_items ORDER BY created_at, rowid")
            .fetch_all(self.db.pool())
            .await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id")?;
            let document: String = row.try_get("document")?;
            match serde_json::from_str::<DownloadItem>(&document) {
                Ok(item) => items.push(item),
                Err(error) => warn!(item_id = %id, error = %error, "skipping unreadable stored item"),
            }
        }
        debug!(count = items.len(), "items loaded");
        Ok(items)
    }
}
