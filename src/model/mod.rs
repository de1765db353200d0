//! Download items and their parts.
//!
//! A [`DownloadItem`] is one logical library item (a book, an episode); each
//! of its [`DownloadItemPart`]s is one physical file. Part ids are derived
//! from the final destination path so a restarted process recognises the
//! same transfer.

mod error;
mod item;
mod part;

pub use error::ItemError;
pub use item::{DownloadItem, DownloadItemBuilder, LocalFolder, MediaType, ServerConnection};
pub use part::{DownloadItemPart, PartKind, PartSpec, part_id_for};
