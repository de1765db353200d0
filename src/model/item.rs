//! Download item, server connection and builder.

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use url::Url;

use super::error::ItemError;
use super::part::{DownloadItemPart, PartSpec};

/// Query parameter carrying the session token.
const TOKEN_QUERY_PARAM: &str = "token";

/// Cover endpoints are asked for JPEG so every client gets the same format.
const COVER_PATH_SUFFIX: &str = "/cover";

/// Media library type of the item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    /// Audiobook or ebook.
    #[default]
    Book,
    /// Podcast episode.
    Podcast,
}

/// Server the item is fetched from.
///
/// The session token is never serialized; restored items get the current
/// token applied before they are re-admitted.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConnection {
    /// Base address, e.g. `https://abs.example.com`.
    pub address: String,
    /// Server-side user id.
    pub user_id: String,
    /// Id of the saved connection config on this device.
    pub config_id: String,
    /// Bearer-style token sent as a query parameter.
    #[serde(skip)]
    pub token: Option<String>,
}

impl ServerConnection {
    /// Creates a connection reference.
    pub fn new(
        address: impl Into<String>,
        user_id: impl Into<String>,
        config_id: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            user_id: user_id.into(),
            config_id: config_id.into(),
            token: None,
        }
    }

    /// Sets the session token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Builds the download URL for a server path.
    ///
    /// # Errors
    ///
    /// Returns [`url::ParseError`] if address and path do not form a valid URL.
    pub fn download_url(&self, server_path: &str) -> Result<Url, url::ParseError> {
        let base = self.address.trim_end_matches('/');
        let mut url = Url::parse(&format!("{base}{server_path}"))?;
        let is_cover = url.path().ends_with(COVER_PATH_SUFFIX);

        if self.token.is_some() || is_cover {
            let mut pairs = url.query_pairs_mut();
            if let Some(token) = &self.token {
                pairs.append_pair(TOKEN_QUERY_PARAM, token);
            }
            if is_cover {
                pairs.append_pair("format", "jpeg");
            }
        }

        Ok(url)
    }
}

impl fmt::Debug for ServerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConnection")
            .field("address", &self.address)
            .field("user_id", &self.user_id)
            .field("config_id", &self.config_id)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Destination root folder on the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalFolder {
    /// Folder id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Absolute path of the folder root.
    pub path: PathBuf,
}

/// One logical library item being downloaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadItem {
    /// Stable id, see [`DownloadItem::derive_id`].
    pub id: String,
    /// Server library item id.
    pub library_item_id: String,
    /// Podcast episode id, when downloading a single episode.
    pub episode_id: Option<String>,
    /// Where the bytes come from.
    pub server: ServerConnection,
    /// Library media type.
    pub media_type: MediaType,
    /// Display title.
    pub item_title: String,
    /// Folder (relative to `local_folder`) the item's files land in.
    pub item_subfolder: String,
    /// Destination root.
    pub local_folder: LocalFolder,
    /// Files, in declaration order.
    pub parts: Vec<DownloadItemPart>,
}

impl DownloadItem {
    /// Derives the item id from the library item and optional episode.
    #[must_use]
    pub fn derive_id(library_item_id: &str, episode_id: Option<&str>) -> String {
        match episode_id {
            Some(episode) if !episode.is_empty() => format!("{library_item_id}-{episode}"),
            _ => library_item_id.to_string(),
        }
    }

    /// Starts building an item.
    #[must_use]
    pub fn builder(
        library_item_id: impl Into<String>,
        server: ServerConnection,
        local_folder: LocalFolder,
    ) -> DownloadItemBuilder {
        DownloadItemBuilder::new(library_item_id.into(), server, local_folder)
    }

    /// True iff every part completed and none is mid-move.
    #[must_use]
    pub fn is_download_finished(&self) -> bool {
        self.parts.iter().all(|part| part.completed && !part.is_moving)
    }

    /// True once every part is delivered or failed.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.parts.iter().all(DownloadItemPart::is_settled)
    }

    /// True if any part failed terminally.
    #[must_use]
    pub fn has_failed_parts(&self) -> bool {
        self.parts.iter().any(|part| part.failed)
    }

    /// Sum of the expected part sizes (unknown sizes count as zero).
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.parts
            .iter()
            .fold(0u64, |acc, part| acc.saturating_add(part.file_size))
    }

    /// Up to `limit` admissible parts, in declaration order.
    pub fn next_parts_mut(&mut self, limit: usize) -> Vec<&mut DownloadItemPart> {
        self.parts
            .iter_mut()
            .filter(|part| part.is_admissible())
            .take(limit)
            .collect()
    }

    /// Looks up a part by id.
    #[must_use]
    pub fn part(&self, part_id: &str) -> Option<&DownloadItemPart> {
        self.parts.iter().find(|part| part.id == part_id)
    }

    /// Looks up a part by id for mutation.
    pub fn part_mut(&mut self, part_id: &str) -> Option<&mut DownloadItemPart> {
        self.parts.iter_mut().find(|part| part.id == part_id)
    }

    /// Checks the structural invariants the queue relies on.
    ///
    /// # Errors
    ///
    /// Returns [`ItemError`] for an empty item, an empty filename or a
    /// repeated part id.
    pub fn validate(&self) -> Result<(), ItemError> {
        if self.parts.is_empty() {
            return Err(ItemError::empty(&self.id));
        }
        let mut seen = HashSet::with_capacity(self.parts.len());
        for part in &self.parts {
            if part.filename.trim().is_empty() {
                return Err(ItemError::EmptyFilename {
                    item_id: self.id.clone(),
                });
            }
            if !seen.insert(part.id.as_str()) {
                return Err(ItemError::duplicate_part(&self.id, &part.id));
            }
        }
        Ok(())
    }

    /// Prepares a persisted item for re-admission after a restart.
    pub fn reset_transient_state(&mut self) {
        for part in &mut self.parts {
            part.reset_transient_state();
        }
    }
}

impl fmt::Display for DownloadItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DownloadItem {{ id: {}, title: {}, parts: {} }}",
            self.id,
            self.item_title,
            self.parts.len()
        )
    }
}

/// Builder returned by [`DownloadItem::builder`].
#[derive(Debug, Clone)]
pub struct DownloadItemBuilder {
    library_item_id: String,
    episode_id: Option<String>,
    server: ServerConnection,
    local_folder: LocalFolder,
    media_type: MediaType,
    title: Option<String>,
    subfolder: Option<String>,
    temp_dir: Option<PathBuf>,
    specs: Vec<PartSpec>,
}

impl DownloadItemBuilder {
    fn new(library_item_id: String, server: ServerConnection, local_folder: LocalFolder) -> Self {
        Self {
            library_item_id,
            episode_id: None,
            server,
            local_folder,
            media_type: MediaType::default(),
            title: None,
            subfolder: None,
            temp_dir: None,
            specs: Vec::new(),
        }
    }

    /// Downloads a single podcast episode of the item.
    #[must_use]
    pub fn episode(mut self, episode_id: impl Into<String>) -> Self {
        self.episode_id = Some(episode_id.into());
        self
    }

    /// Sets the media type.
    #[must_use]
    pub fn media_type(mut self, media_type: MediaType) -> Self {
        self.media_type = media_type;
        self
    }

    /// Sets the display title; also the default subfolder.
    #[must_use]
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Overrides the subfolder under the local folder.
    #[must_use]
    pub fn subfolder(mut self, subfolder: impl Into<String>) -> Self {
        self.subfolder = Some(subfolder.into());
        self
    }

    /// Staging directory for part files. Defaults to `<local folder>/.downloads`.
    #[must_use]
    pub fn temp_dir(mut self, temp_dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(temp_dir.into());
        self
    }

    /// Adds one file.
    #[must_use]
    pub fn part(mut self, spec: PartSpec) -> Self {
        self.specs.push(spec);
        self
    }

    /// Adds several files, keeping their order.
    #[must_use]
    pub fn parts(mut self, specs: impl IntoIterator<Item = PartSpec>) -> Self {
        self.specs.extend(specs);
        self
    }

    /// Builds and validates the item.
    ///
    /// # Errors
    ///
    /// Returns [`ItemError`] if the item fails [`DownloadItem::validate`].
    pub fn build(self) -> Result<DownloadItem, ItemError> {
        let id = DownloadItem::derive_id(&self.library_item_id, self.episode_id.as_deref());
        let title = self.title.unwrap_or_else(|| self.library_item_id.clone());
        let subfolder = self.subfolder.unwrap_or_else(|| title.clone());
        let item_folder = self.local_folder.path.join(&subfolder);
        let temp_dir = self
            .temp_dir
            .unwrap_or_else(|| self.local_folder.path.join(".downloads"));

        let parts = self
            .specs
            .into_iter()
            .map(|spec| DownloadItemPart::new(&id, spec, &temp_dir, &item_folder, &subfolder))
            .collect();

        let item = DownloadItem {
            id,
            library_item_id: self.library_item_id,
            episode_id: self.episode_id,
            server: self.server,
            media_type: self.media_type,
            item_title: title,
            item_subfolder: subfolder,
            local_folder: self.local_folder,
            parts,
        };
        item.validate()?;
        Ok(item)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::PartKind;

    fn server() -> ServerConnection {
        ServerConnection::new("https://abs.example.com/", "user_1", "cfg_1").with_token("tok")
    }

    fn folder() -> LocalFolder {
        LocalFolder {
            id: "local_1".to_string(),
            name: "Books".to_string(),
            path: PathBuf::from("/storage/books"),
        }
    }

    fn spec(name: &str, size: u64) -> PartSpec {
        PartSpec {
            filename: name.to_string(),
            server_path: format!("/api/items/li_1/file/{name}"),
            file_size: size,
            kind: PartKind::AudioTrack,
        }
    }

    fn item_with_parts(n: usize) -> DownloadItem {
        DownloadItem::builder("li_1", server(), folder())
            .title("Dune")
            .parts((0..n).map(|i| spec(&format!("{i:02}.mp3"), 100)))
            .build()
            .unwrap()
    }

    #[test]
    fn test_derive_id_with_and_without_episode() {
        assert_eq!(DownloadItem::derive_id("li_1", None), "li_1");
        assert_eq!(DownloadItem::derive_id("li_1", Some("ep_9")), "li_1-ep_9");
        assert_eq!(DownloadItem::derive_id("li_1", Some("")), "li_1");
    }

    #[test]
    fn test_builder_rejects_empty_item() {
        let result = DownloadItem::builder("li_1", server(), folder()).build();
        assert_eq!(result.unwrap_err(), ItemError::empty("li_1"));
    }

    #[test]
    fn test_builder_rejects_duplicate_destination() {
        let result = DownloadItem::builder("li_1", server(), folder())
            .part(spec("a.mp3", 1))
            .part(spec("a.mp3", 1))
            .build();
        assert!(matches!(result, Err(ItemError::DuplicatePart { .. })));
    }

    #[test]
    fn test_builder_lays_out_paths() {
        let item = item_with_parts(1);
        let part = &item.parts[0];
        assert_eq!(item.item_subfolder, "Dune");
        assert_eq!(
            part.final_path,
            PathBuf::from("/storage/books/Dune/00.mp3")
        );
        assert!(part.temp_path.starts_with("/storage/books/.downloads"));
        assert_eq!(part.download_item_id, "li_1");
    }

    #[test]
    fn test_is_download_finished_requires_all_completed_and_not_moving() {
        let mut item = item_with_parts(2);
        assert!(!item.is_download_finished());

        item.parts[0].completed = true;
        assert!(!item.is_download_finished());

        item.parts[1].completed = true;
        assert!(item.is_download_finished());

        item.parts[1].is_moving = true;
        assert!(!item.is_download_finished());
    }

    #[test]
    fn test_next_parts_respects_limit_and_order() {
        let mut item = item_with_parts(4);
        item.parts[0].completed = true;
        item.parts[1].download_id = Some(1);

        let next: Vec<String> = item
            .next_parts_mut(5)
            .into_iter()
            .map(|p| p.filename.clone())
            .collect();
        assert_eq!(next, vec!["02.mp3", "03.mp3"]);

        assert_eq!(item.next_parts_mut(1).len(), 1);
        assert!(item.next_parts_mut(0).is_empty());
    }

    #[test]
    fn test_total_size_sums_parts() {
        let item = item_with_parts(3);
        assert_eq!(item.total_size(), 300);
    }

    #[test]
    fn test_download_url_carries_token() {
        let url = server().download_url("/api/items/li_1/file/3").unwrap();
        assert_eq!(
            url.as_str(),
            "https://abs.example.com/api/items/li_1/file/3?token=tok"
        );
    }

    #[test]
    fn test_download_url_forces_jpeg_cover() {
        let url = server().download_url("/api/items/li_1/cover").unwrap();
        assert_eq!(
            url.as_str(),
            "https://abs.example.com/api/items/li_1/cover?token=tok&format=jpeg"
        );
    }

    #[test]
    fn test_download_url_without_token_has_no_query() {
        let server = ServerConnection::new("http://localhost:13378", "u", "c");
        let url = server.download_url("/api/items/li_1/file/1").unwrap();
        assert_eq!(url.query(), None);
    }

    #[test]
    fn test_debug_redacts_token() {
        let debug = format!("{:?}", server());
        assert!(!debug.contains("tok\""), "token leaked: {debug}");
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_serialized_item_omits_token() {
        let item = item_with_parts(1);
        let json = serde_json::to_string(&item).unwrap();
        assert!(!json.contains("\"token\""));

        let restored: DownloadItem = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.server.token, None);
        assert_eq!(restored.parts, item.parts);
    }
}
