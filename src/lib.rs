//! Bookshelf Downloader Core Library
//!
//! Download orchestration for an audiobook and podcast library client:
//! library items are split into parts (one per file), parts are transferred
//! with resume support under a fixed concurrency cap, and finished files are
//! moved into the user's library folder.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`model`] - Download items, parts and their identity rules
//! - [`download`] - Resumable single-file transfer engine over HTTP
//! - [`manager`] - Queue, admission control, retries and completion handling
//! - [`notification`] - Persistent indicator backed by a resource hold
//! - [`store`] - Persisted queue state across restarts
//! - [`db`] - Database connection and schema management
//! - [`config`] - Tunables loadable from a config file

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod db;
pub mod download;
pub mod manager;
pub mod model;
pub mod notification;
pub mod store;
#[cfg(test)]
pub mod test_support;

// Re-export commonly used types
pub use config::{ConfigError, ManagerConfig};
pub use db::{Database, DbError};
pub use download::{
    DownloadError, HttpClient, PartTransport, RetryPolicy, TransferEngine, TransferJob,
    TransferOutcome, TransferProgress,
};
pub use manager::{
    AddItemOutcome, DownloadErrorCode, DownloadEventSink, DownloadQueueManager, HostLifecycle,
    LifecycleFlag, ManagerError,
};
pub use model::{DownloadItem, DownloadItemPart, ItemError, LocalFolder, PartKind, PartSpec};
pub use notification::{NotificationCoordinator, ResourceHold, TimedHold};
pub use store::{DownloadStore, SqliteDownloadStore, StoreError};
