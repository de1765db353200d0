//! Error types for the download module.
//!
//! Every variant that carries a URL stores it with the query string removed,
//! so the session token never reaches logs or events.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during a single file transfer.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network-level error (DNS resolution, connection refused/reset, TLS, ...).
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The URL that failed, without query.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Connect, read-stall or call timeout elapsed.
    #[error("timeout downloading {url}")]
    Timeout {
        /// The URL that timed out, without query.
        url: String,
    },

    /// Non-success HTTP response.
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        /// The URL that returned an error status, without query.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// Server rejected the session token.
    #[error(
        "[AUTH] server rejected the session token (HTTP {status}) downloading {url}\n  Suggestion: sign in again to refresh the token"
    )]
    AuthRequired {
        /// The URL that was refused, without query.
        url: String,
        /// 401 or 403.
        status: u16,
    },

    /// Resume offset lies beyond the server's copy of the file.
    #[error("range starting at byte {offset} not satisfiable for {url}")]
    RangeNotSatisfiable {
        /// The URL, without query.
        url: String,
        /// Requested start offset.
        offset: u64,
    },

    /// File system error while staging the download.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The download URL is malformed.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL, without query.
        url: String,
    },

    /// Staged file size does not match the expected size.
    #[error(
        "integrity check failed for {path}: expected {expected_bytes} bytes, got {actual_bytes}"
    )]
    Integrity {
        /// Staged file that failed verification.
        path: PathBuf,
        /// Expected size in bytes.
        expected_bytes: u64,
        /// Actual size in bytes.
        actual_bytes: u64,
    },
}

impl DownloadError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: &str, source: reqwest::Error) -> Self {
        Self::Network {
            url: redact_url(url),
            source,
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: &str, status: u16) -> Self {
        Self::HttpStatus {
            url: redact_url(url),
            status,
        }
    }

    /// Creates an auth error for a 401/403 answer.
    pub fn auth_required(url: &str, status: u16) -> Self {
        Self::AuthRequired {
            url: redact_url(url),
            status,
        }
    }

    /// Creates a range-not-satisfiable error.
    pub fn range_not_satisfiable(url: &str, offset: u64) -> Self {
        Self::RangeNotSatisfiable {
            url: redact_url(url),
            offset,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: &str) -> Self {
        Self::Timeout {
            url: redact_url(url),
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: &str) -> Self {
        Self::InvalidUrl {
            url: redact_url(url),
        }
    }

    /// Creates an integrity mismatch error.
    pub fn integrity(path: impl Into<PathBuf>, expected_bytes: u64, actual_bytes: u64) -> Self {
        Self::Integrity {
            path: path.into(),
            expected_bytes,
            actual_bytes,
        }
    }

    /// Maps a reqwest send/stream error, keeping timeouts distinct.
    pub fn from_reqwest(url: &str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::timeout(url)
        } else {
            Self::network(url, source)
        }
    }
}

/// Strips query and fragment from a URL string.
#[must_use]
pub fn redact_url(url: &str) -> String {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    url[..end].to_string()
}
