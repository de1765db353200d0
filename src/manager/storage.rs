//! Storage-space preflight.
//!
//! An item is only started when the destination volume can hold all of its
//! parts plus headroom: `max(floor, size * percent / 100)`. The floor
//! protects small items, the fraction protects very large ones.

use std::io;
use std::path::Path;

use tracing::{debug, warn};

const BYTES_PER_MIB: u64 = 1024 * 1024;

/// Source of free-space figures.
pub trait StorageProbe: Send + Sync {
    /// Free bytes available to this process on the volume holding `path`.
    ///
    /// # Errors
    ///
    /// Returns the I/O error of the underlying query.
    fn available_space(&self, path: &Path) -> io::Result<u64>;
}

/// [`StorageProbe`] that asks the file system via `fs2`.
///
/// Destinations that do not exist yet are measured at their nearest existing
/// ancestor.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsStorageProbe;

impl StorageProbe for FsStorageProbe {
    fn available_space(&self, path: &Path) -> io::Result<u64> {
        let existing = path
            .ancestors()
            .find(|candidate| candidate.exists())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no existing ancestor for {}", path.display()),
                )
            })?;
        fs2::available_space(existing)
    }
}

/// Outcome of a failed preflight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageShortfall {
    /// Item size plus headroom.
    pub required: u64,
    /// Free bytes found.
    pub available: u64,
}

impl StorageShortfall {
    /// User-facing description, in MiB.
    #[must_use]
    pub fn describe(&self) -> String {
        format!(
            "Need {}MB but only {}MB available.",
            self.required / BYTES_PER_MIB,
            self.available / BYTES_PER_MIB
        )
    }
}

/// Headroom demanded on top of `total_size`.
#[must_use]
pub fn required_headroom(total_size: u64, floor_bytes: u64, percent: u8) -> u64 {
    let fractional = u128::from(total_size) * u128::from(percent) / 100;
    floor_bytes.max(u64::try_from(fractional).unwrap_or(u64::MAX))
}

/// Checks that `destination` can take `total_size` bytes plus headroom.
///
/// A failed free-space query counts as no space.
///
/// # Errors
///
/// Returns the [`StorageShortfall`] when space is insufficient.
pub fn preflight(
    probe: &dyn StorageProbe,
    destination: &Path,
    total_size: u64,
    floor_bytes: u64,
    percent: u8,
) -> Result<(), StorageShortfall> {
    let available = probe.available_space(destination).unwrap_or_else(|error| {
        warn!(
            path = %destination.display(),
            error = %error,
            "free-space query failed, treating as full"
        );
        0
    });
    let required =
        total_size.saturating_add(required_headroom(total_size, floor_bytes, percent));

    debug!(
        path = %destination.display(),
        total_size,
        required,
        available,
        "storage preflight"
    );

    if available < required {
        return Err(StorageShortfall {
            required,
            available,
        });
    }
    Ok(())
}
