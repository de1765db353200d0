//! A single physical file transfer belonging to a download item.

use std::fmt;
use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

/// Extension used for staged (not yet moved) part files.
const TEMP_EXTENSION: &str = "part";

/// What a part carries; used for logging and for server URL quirks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartKind {
    /// An audio track of a book or podcast episode.
    AudioTrack,
    /// An ebook file (epub, pdf, ...).
    EbookFile,
    /// The item's cover image.
    CoverImage,
}

impl PartKind {
    /// Returns the serialized label.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AudioTrack => "audio_track",
            Self::EbookFile => "ebook_file",
            Self::CoverImage => "cover_image",
        }
    }
}

impl fmt::Display for PartKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Caller-supplied description of one file to fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartSpec {
    /// Name of the file at its final destination.
    pub filename: String,
    /// Path on the server, e.g. `/api/items/li_1/file/3`.
    pub server_path: String,
    /// Expected size in bytes, `0` when unknown.
    #[serde(default)]
    pub file_size: u64,
    /// What the file is.
    pub kind: PartKind,
}

/// One physical file transfer.
///
/// The queue manager is the only writer of `completed`, `moved`, `is_moving`,
/// `failed` and `download_id`. Progress counters are written on behalf of the
/// transfer that currently owns the part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadItemPart {
    /// Stable identity derived from `final_path`.
    pub id: String,
    /// Id of the owning [`DownloadItem`](super::DownloadItem).
    pub download_item_id: String,
    /// File name at the final destination.
    pub filename: String,
    /// Server path the bytes are fetched from.
    pub server_path: String,
    /// Expected size in bytes, `0` when unknown.
    pub file_size: u64,
    /// What the file is.
    pub kind: PartKind,
    /// Staging location the transfer writes into.
    pub temp_path: PathBuf,
    /// Where the file lives once moved.
    pub final_path: PathBuf,
    /// Subfolder (relative to the local folder) of `final_path`.
    pub final_subfolder: String,
    /// Transfer finished and byte count reached the expected size.
    pub completed: bool,
    /// File reached `final_path`.
    pub moved: bool,
    /// A move from `temp_path` to `final_path` is running.
    pub is_moving: bool,
    /// Part failed terminally; it will not be admitted again.
    pub failed: bool,
    /// Set while a transfer owns the part.
    pub download_id: Option<u64>,
    /// 0-100.
    pub progress: u8,
    /// Bytes present in `temp_path`.
    pub bytes_downloaded: u64,
}

impl DownloadItemPart {
    /// Creates a fresh, unadmitted part.
    ///
    /// `item_folder` is the absolute directory the file ends up in and
    /// `subfolder` its path relative to the local folder root.
    #[must_use]
    pub fn new(
        download_item_id: &str,
        spec: PartSpec,
        temp_dir: &Path,
        item_folder: &Path,
        subfolder: &str,
    ) -> Self {
        let final_path = item_folder.join(&spec.filename);
        let id = part_id_for(&final_path);
        let temp_path = temp_dir.join(format!("{id}.{TEMP_EXTENSION}"));

        Self {
            id,
            download_item_id: download_item_id.to_string(),
            filename: spec.filename,
            server_path: spec.server_path,
            file_size: spec.file_size,
            kind: spec.kind,
            temp_path,
            final_path,
            final_subfolder: subfolder.to_string(),
            completed: false,
            moved: false,
            is_moving: false,
            failed: false,
            download_id: None,
            progress: 0,
            bytes_downloaded: 0,
        }
    }

    /// Waiting for admission: not owned, not completed, not failed.
    #[must_use]
    pub fn is_admissible(&self) -> bool {
        self.download_id.is_none() && !self.completed && !self.failed
    }

    /// Reached a terminal state: delivered to its final path, or failed.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        !self.is_moving && (self.failed || (self.completed && self.moved))
    }

    /// Clears fields that only make sense inside a running process.
    ///
    /// A part that finished transferring but never finished moving is sent
    /// back through the transfer, which finds its bytes already staged.
    pub fn reset_transient_state(&mut self) {
        self.download_id = None;
        if self.is_moving || (self.completed && !self.moved) {
            self.is_moving = false;
            self.completed = false;
        }
    }
}

impl fmt::Display for DownloadItemPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DownloadItemPart {{ id: {}, file: {}, progress: {}% }}",
            self.id, self.filename, self.progress
        )
    }
}

/// Derives the part id from its final absolute destination path.
#[must_use]
pub fn part_id_for(final_path: &Path) -> String {
    URL_SAFE_NO_PAD.encode(final_path.to_string_lossy().as_bytes())
}
