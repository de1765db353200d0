//! Error types for the queue manager's command surface.

use thiserror::Error;

use crate::config::ConfigError;
use crate::model::ItemError;
use crate::store::StoreError;

/// Errors returned by [`DownloadQueueManager`](super::DownloadQueueManager) commands.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// The item failed structural validation and was not queued.
    #[error("invalid download item: {0}")]
    Item(#[from] ItemError),

    /// Not enough free space for the item plus headroom; nothing was started.
    #[error(
        "insufficient storage for {item_id}: need {required} bytes but only {available} bytes available"
    )]
    InsufficientStorage {
        /// Item that was rejected.
        item_id: String,
        /// Item size plus headroom.
        required: u64,
        /// Free bytes on the destination volume.
        available: u64,
    },

    /// The manager configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// The manager was built outside a tokio runtime.
    #[error("no tokio runtime available: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),

    /// Persisted items could not be loaded.
    #[error("persistence error: {0}")]
    Store(#[from] StoreError),
}

impl ManagerError {
    /// Creates an insufficient-storage error.
    pub fn insufficient_storage(item_id: &str, required: u64, available: u64) -> Self {
        Self::InsufficientStorage {
            item_id: item_id.to_string(),
            required,
            available,
        }
    }
}
