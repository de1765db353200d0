//! Progress UI (bars) driven by the queue's event contract.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use bookshelf_downloader::manager::{DownloadErrorCode, DownloadEventSink};
use bookshelf_downloader::model::{DownloadItem, DownloadItemPart};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use parking_lot::Mutex;
use tracing::{info, warn};

const BAR_TEMPLATE: &str = "{msg:30!} [{bar:30}] {bytes}/{total_bytes} ({eta})";

/// One bar per part; hidden when `quiet`.
pub struct ProgressEventSink {
    bars: MultiProgress,
    parts: Mutex<HashMap<String, ProgressBar>>,
    failures: AtomicUsize,
}

impl ProgressEventSink {
    pub fn new(quiet: bool) -> Self {
        let bars = if quiet {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        } else {
            MultiProgress::new()
        };
        Self {
            bars,
            parts: Mutex::new(HashMap::new()),
            failures: AtomicUsize::new(0),
        }
    }

    /// Items that settled with failures plus errors reported outside items.
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    fn style() -> ProgressStyle {
        ProgressStyle::with_template(BAR_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ")
    }
}

impl DownloadEventSink for ProgressEventSink {
    fn on_download_item(&self, item: &DownloadItem) {
        let mut parts = self.parts.lock();
        for part in &item.parts {
            let bar = self.bars.add(ProgressBar::new(part.file_size));
            bar.set_style(Self::style());
            bar.set_message(part.filename.clone());
            bar.set_position(part.bytes_downloaded);
            parts.insert(part.id.clone(), bar);
        }
        info!(item = %item.item_title, parts = item.parts.len(), "queued");
    }

    fn on_download_item_part_update(&self, part: &DownloadItemPart) {
        let parts = self.parts.lock();
        let Some(bar) = parts.get(&part.id) else {
            return;
        };
        if bar.length() == Some(0) && part.bytes_downloaded > 0 {
            bar.set_length(part.bytes_downloaded);
        }
        bar.set_position(part.bytes_downloaded);
        if part.moved {
            bar.finish();
        } else if part.failed {
            bar.abandon_with_message(format!("{} (failed)", part.filename));
        }
    }

    fn on_download_item_complete(&self, item: &DownloadItem, success: bool) {
        let mut parts = self.parts.lock();
        for part in &item.parts {
            if let Some(bar) = parts.remove(&part.id)
                && !bar.is_finished()
            {
                bar.abandon();
            }
        }
        if success {
            info!(item = %item.item_title, "download complete");
        } else {
            self.failures.fetch_add(1, Ordering::SeqCst);
            warn!(item = %item.item_title, "download finished with failed parts");
        }
    }

    fn on_download_error(&self, code: DownloadErrorCode, details: &str) {
        if code == DownloadErrorCode::InsufficientStorage {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }
        let _ = self.bars.println(format!("error {code}: {details}"));
    }
}
