//! Tunables for the queue manager and transfer engine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::download::{
    CALL_TIMEOUT_SECS, CONNECT_TIMEOUT_SECS, ClientOptions, READ_TIMEOUT_SECS, RetryPolicy,
};

/// Default admission cap.
pub const DEFAULT_MAX_CONCURRENT_PARTS: usize = 3;
/// Default re-admissions after a transient failure.
pub const DEFAULT_MAX_PART_RETRIES: u32 = 3;
/// Default in-place socket-level attempts per admission.
pub const DEFAULT_SOCKET_RETRY_ATTEMPTS: u32 = 3;
/// Fixed floor of the storage headroom (100 MiB).
pub const DEFAULT_STORAGE_BUFFER_FLOOR_BYTES: u64 = 100 * 1024 * 1024;
/// Fractional storage headroom, in percent of the item size.
pub const DEFAULT_STORAGE_BUFFER_PERCENT: u8 = 5;

const MAX_CONCURRENT_PARTS_RANGE: (usize, usize) = (1, 16);
const MAX_PART_RETRIES_RANGE: (u32, u32) = (0, 10);
const SOCKET_RETRY_ATTEMPTS_RANGE: (u32, u32) = (1, 10);

/// Invalid configuration value.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A numeric setting is outside its accepted range.
    #[error("invalid {field} value {value}: expected {expected}")]
    OutOfRange {
        /// Setting name as written in the config file.
        field: &'static str,
        /// Offending value.
        value: u64,
        /// Human-readable accepted range.
        expected: &'static str,
    },
}

impl ConfigError {
    fn out_of_range(field: &'static str, value: impl TryInto<u64>, expected: &'static str) -> Self {
        Self::OutOfRange {
            field,
            value: value.try_into().unwrap_or(u64::MAX),
            expected,
        }
    }
}

/// Queue manager settings, loadable from a JSON config file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Admission cap.
    pub max_concurrent_parts: usize,
    /// Re-admissions allowed after a transient failure before the part fails.
    pub max_part_retries: u32,
    /// In-place attempts per admission.
    pub socket_retry_attempts: u32,
    /// Connect timeout.
    pub connect_timeout_secs: u64,
    /// Read-stall timeout; never zero.
    pub read_timeout_secs: u64,
    /// Whole-call ceiling.
    pub call_timeout_secs: u64,
    /// Resource hold auto-release safeguard.
    pub hold_timeout_secs: u64,
    /// Minimum spacing between progress events per part.
    pub progress_interval_ms: u64,
    /// Staging directory for part files; defaults to `<local folder>/.downloads`.
    pub temp_dir: Option<PathBuf>,
    /// Fixed floor of the storage headroom.
    pub storage_buffer_floor_bytes: u64,
    /// Fractional storage headroom in percent.
    pub storage_buffer_percent: u8,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_parts: DEFAULT_MAX_CONCURRENT_PARTS,
            max_part_retries: DEFAULT_MAX_PART_RETRIES,
            socket_retry_attempts: DEFAULT_SOCKET_RETRY_ATTEMPTS,
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            read_timeout_secs: READ_TIMEOUT_SECS,
            call_timeout_secs: CALL_TIMEOUT_SECS,
            hold_timeout_secs: CALL_TIMEOUT_SECS,
            progress_interval_ms: 500,
            temp_dir: None,
            storage_buffer_floor_bytes: DEFAULT_STORAGE_BUFFER_FLOOR_BYTES,
            storage_buffer_percent: DEFAULT_STORAGE_BUFFER_PERCENT,
        }
    }
}

impl ManagerConfig {
    /// Parses a JSON config document; missing fields take defaults.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error for malformed input.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Checks every setting against its accepted range.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError::OutOfRange`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let (min, max) = MAX_CONCURRENT_PARTS_RANGE;
        if !(min..=max).contains(&self.max_concurrent_parts) {
            return Err(ConfigError::out_of_range(
                "max_concurrent_parts",
                self.max_concurrent_parts,
                "1..=16",
            ));
        }
        let (min, max) = MAX_PART_RETRIES_RANGE;
        if !(min..=max).contains(&self.max_part_retries) {
            return Err(ConfigError::out_of_range(
                "max_part_retries",
                self.max_part_retries,
                "0..=10",
            ));
        }
        let (min, max) = SOCKET_RETRY_ATTEMPTS_RANGE;
        if !(min..=max).contains(&self.socket_retry_attempts) {
            return Err(ConfigError::out_of_range(
                "socket_retry_attempts",
                self.socket_retry_attempts,
                "1..=10",
            ));
        }
        for (field, value) in [
            ("connect_timeout_secs", self.connect_timeout_secs),
            ("read_timeout_secs", self.read_timeout_secs),
            ("call_timeout_secs", self.call_timeout_secs),
            ("hold_timeout_secs", self.hold_timeout_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::out_of_range(field, value, "at least 1 second"));
            }
        }
        if self.storage_buffer_percent > 100 {
            return Err(ConfigError::out_of_range(
                "storage_buffer_percent",
                self.storage_buffer_percent,
                "0..=100",
            ));
        }
        Ok(())
    }

    /// Transfer settings derived from this config.
    #[must_use]
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            read_timeout: Duration::from_secs(self.read_timeout_secs),
            call_timeout: Duration::from_secs(self.call_timeout_secs),
            socket_retry: RetryPolicy::with_max_attempts(self.socket_retry_attempts),
            progress_interval: self.progress_interval(),
        }
    }

    /// Progress spacing as a [`Duration`].
    #[must_use]
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    /// Hold safeguard as a [`Duration`].
    #[must_use]
    pub fn hold_timeout(&self) -> Duration {
        Duration::from_secs(self.hold_timeout_secs)
    }

    /// Staging directory for an item whose destination root is `local_folder`.
    #[must_use]
    pub fn temp_dir_for(&self, local_folder: &Path) -> PathBuf {
        self.temp_dir
            .clone()
            .unwrap_or_else(|| local_folder.join(".downloads"))
    }
}
