//! Item manifests accepted by the command line driver.

use std::path::PathBuf;

use bookshelf_downloader::model::{
    DownloadItem, ItemError, LocalFolder, MediaType, PartSpec, ServerConnection,
};
use serde::Deserialize;

/// One library item as described in a JSON manifest.
///
/// ```json
/// {
///   "library_item_id": "li_1",
///   "title": "Dune",
///   "parts": [
///     { "filename": "01.mp3", "server_path": "/api/items/li_1/file/1", "file_size": 1048576, "kind": "audio_track" }
///   ]
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    pub library_item_id: String,
    #[serde(default)]
    pub episode_id: Option<String>,
    #[serde(default)]
    pub media_type: MediaType,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub subfolder: Option<String>,
    pub parts: Vec<PartSpec>,
}

impl Manifest {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Builds the queue item for this manifest.
    pub fn into_item(
        self,
        server: ServerConnection,
        output_dir: PathBuf,
        temp_dir: PathBuf,
    ) -> Result<DownloadItem, ItemError> {
        let local_folder = LocalFolder {
            id: "local".to_string(),
            name: "Library".to_string(),
            path: output_dir,
        };
        let mut builder = DownloadItem::builder(self.library_item_id, server, local_folder)
            .media_type(self.media_type)
            .temp_dir(temp_dir)
            .parts(self.parts);
        if let Some(episode_id) = self.episode_id {
            builder = builder.episode(episode_id);
        }
        if let Some(title) = self.title {
            builder = builder.title(title);
        }
        if let Some(subfolder) = self.subfolder {
            builder = builder.subfolder(subfolder);
        }
        builder.build()
    }
}
