//! Outbound event contract.

use std::fmt;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::model::{DownloadItem, DownloadItemPart};

/// Structured error codes carried by [`DownloadEventSink::on_download_error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DownloadErrorCode {
    /// Preflight found too little free space; nothing was started.
    InsufficientStorage,
    /// A part failed terminally or exhausted its retries.
    DownloadFailed,
    /// The server rejected the session token.
    TokenExpired,
    /// A completed part could not be moved to its destination.
    MoveFailed,
}

impl DownloadErrorCode {
    /// Returns the wire name of the code.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InsufficientStorage => "INSUFFICIENT_STORAGE",
            Self::DownloadFailed => "DOWNLOAD_FAILED",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::MoveFailed => "MOVE_FAILED",
        }
    }
}

impl fmt::Display for DownloadErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receiver of queue lifecycle events.
///
/// Called from worker tasks after the queue lock is released; implementations
/// may call back into the manager.
pub trait DownloadEventSink: Send + Sync {
    /// An item was queued.
    fn on_download_item(&self, item: &DownloadItem);

    /// A part's progress or status changed.
    fn on_download_item_part_update(&self, part: &DownloadItemPart);

    /// Every part of the item is delivered or failed.
    fn on_download_item_complete(&self, item: &DownloadItem, success: bool);

    /// A reportable error occurred.
    fn on_download_error(&self, code: DownloadErrorCode, details: &str);
}

/// Event sink that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl DownloadEventSink for TracingEventSink {
    fn on_download_item(&self, item: &DownloadItem) {
        info!(item_id = %item.id, parts = item.parts.len(), "download item queued");
    }

    fn on_download_item_part_update(&self, part: &DownloadItemPart) {
        debug!(part_id = %part.id, progress = part.progress, bytes = part.bytes_downloaded, "part update");
    }

    fn on_download_item_complete(&self, item: &DownloadItem, success: bool) {
        info!(item_id = %item.id, success, "download item complete");
    }

    fn on_download_error(&self, code: DownloadErrorCode, details: &str) {
        warn!(code = %code, details, "download error");
    }
}

/// Event collected under the queue lock, delivered after it is released.
#[derive(Debug)]
pub(crate) enum ManagerEvent {
    Queued(DownloadItem),
    PartUpdate(DownloadItemPart),
    Complete(DownloadItem, bool),
    Error(DownloadErrorCode, String),
}

impl ManagerEvent {
    pub(crate) fn deliver(self, sink: &dyn DownloadEventSink) {
        match self {
            Self::Queued(item) => sink.on_download_item(&item),
            Self::PartUpdate(part) => sink.on_download_item_part_update(&part),
            Self::Complete(item, success) => sink.on_download_item_complete(&item, success),
            Self::Error(code, details) => sink.on_download_error(code, &details),
        }
    }
}
