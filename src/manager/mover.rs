//! Moves staged parts to their final destination.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};

/// Moves a finished staging file into the library.
#[async_trait]
pub trait PartMover: Send + Sync {
    /// Moves `from` to `to`, replacing `to`.
    ///
    /// # Errors
    ///
    /// Returns the I/O error that stopped the move. `to` is left as it was.
    async fn move_part(&self, from: &Path, to: &Path) -> io::Result<()>;
}

/// [`PartMover`] on the local file system.
///
/// Renames first. Only when staging and destination sit on different
/// volumes does it copy into a sibling of `to` and rename that into place,
/// so a failed copy never touches an existing destination.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsPartMover;

#[async_trait]
impl PartMover for FsPartMover {
    async fn move_part(&self, from: &Path, to: &Path) -> io::Result<()> {
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        match tokio::fs::rename(from, to).await {
            Ok(()) => return Ok(()),
            Err(error) if error.kind() == io::ErrorKind::CrossesDevices => {
                debug!(error = %error, "staging file on another volume, copying");
            }
            Err(error) => return Err(error),
        }

        let sibling = copy_sibling(to);
        let copied = match tokio::fs::copy(from, &sibling).await {
            Ok(_) => tokio::fs::rename(&sibling, to).await,
            Err(error) => Err(error),
        };
        if let Err(error) = copied {
            if let Err(cleanup) = tokio::fs::remove_file(&sibling).await
                && cleanup.kind() != io::ErrorKind::NotFound
            {
                warn!(path = %sibling.display(), error = %cleanup, "failed to remove partial copy");
            }
            return Err(error);
        }

        if let Err(error) = tokio::fs::remove_file(from).await {
            warn!(path = %from.display(), error = %error, "moved part but could not remove staging file");
        }
        Ok(())
    }
}

fn copy_sibling(to: &Path) -> PathBuf {
    let mut name = to.file_name().map_or_else(OsString::new, ToOwned::to_owned);
    name.push(".moving");
    to.with_file_name(name)
}
