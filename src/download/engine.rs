//! Resumable single-file transfer engine.
//!
//! A [`TransferEngine`] streams one part from the server into its staging
//! file. It resumes from whatever bytes are already staged, retries socket
//! level failures in place with exponential backoff, and hands the queue
//! manager a [`TransferOutcome`] it can act on.
//!
//! # Resume protocol
//!
//! | Staged bytes | Request | Response | Action |
//! |---|---|---|---|
//! | 0 | plain GET | 200 | write from zero |
//! | N | `Range: bytes=N-` | 206 | append |
//! | N | `Range: bytes=N-` | 200 | server ignored the range, truncate and restart |
//! | N | `Range: bytes=N-` | 416 | discard staged bytes, transient failure |
//! | == expected | none | - | already complete |
//! | > expected | plain GET | 200 | discard staged bytes, restart |

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::{CONTENT_LENGTH, RANGE};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::constants::PROGRESS_INTERVAL;
use super::error::{DownloadError, redact_url};
use super::progress::{ProgressSink, ProgressThrottle, TransferProgress};
use super::retry::{FailureType, RetryDecision, RetryPolicy, classify_error};
use crate::model::{DownloadItemPart, ServerConnection};

/// Everything a transfer needs to know about one part.
#[derive(Debug, Clone)]
pub struct TransferJob {
    /// Part id, for logging.
    pub part_id: String,
    /// Fully built download URL (may carry the session token).
    pub url: Url,
    /// Staging file the bytes are written to.
    pub temp_path: PathBuf,
    /// Expected size in bytes, `0` when unknown.
    pub expected_size: u64,
}

impl TransferJob {
    /// Builds the job for a part fetched from `server`.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InvalidUrl`] if the server address and part
    /// path do not form a valid URL.
    pub fn for_part(
        part: &DownloadItemPart,
        server: &ServerConnection,
    ) -> Result<Self, DownloadError> {
        let url = server.download_url(&part.server_path).map_err(|_| {
            DownloadError::invalid_url(&format!("{}{}", server.address, part.server_path))
        })?;
        Ok(Self {
            part_id: part.id.clone(),
            url,
            temp_path: part.temp_path.clone(),
            expected_size: part.file_size,
        })
    }

    fn expected(&self) -> Option<u64> {
        (self.expected_size > 0).then_some(self.expected_size)
    }

    fn redacted_url(&self) -> String {
        redact_url(self.url.as_str())
    }
}

/// Result of a transfer, as seen by the queue manager.
#[derive(Debug)]
pub enum TransferOutcome {
    /// The staging file holds the complete part.
    Success {
        /// Final size of the staging file.
        bytes: u64,
    },
    /// Socket-level retries are exhausted; the part may be re-admitted.
    TransientFailure(DownloadError),
    /// Retrying cannot help (4xx, rejected token, local write failure).
    TerminalFailure(DownloadError),
    /// The transfer observed its cancellation token.
    Canceled,
}

impl TransferOutcome {
    /// Returns true for [`TransferOutcome::Success`].
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Seam between the queue manager and whatever moves the bytes.
///
/// The manager calls `transfer` once per admission, on the part's own task.
#[async_trait]
pub trait PartTransport: Send + Sync {
    /// Runs one admission of a part to a terminal outcome.
    async fn transfer(
        &self,
        job: TransferJob,
        progress: ProgressSink,
        cancel: CancellationToken,
    ) -> TransferOutcome;
}

/// Result of one HTTP attempt.
enum AttemptResult {
    Complete(u64),
    Canceled,
}

/// One resumable transfer.
///
/// Engines are cheap: they share the pooled [`Client`] and own only the
/// staging file writer of the transfer in progress.
#[derive(Debug)]
pub struct TransferEngine {
    client: Client,
    retry_policy: RetryPolicy,
    progress_interval: Duration,
    writer: Option<BufWriter<File>>,
}

impl TransferEngine {
    /// Creates an engine on a pooled client.
    #[must_use]
    pub fn new(client: Client, retry_policy: RetryPolicy) -> Self {
        Self {
            client,
            retry_policy,
            progress_interval: PROGRESS_INTERVAL,
            writer: None,
        }
    }

    /// Sets the minimum spacing between progress reports.
    #[must_use]
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Streams the job's URL into its staging file, resuming and retrying.
    #[instrument(skip(self, job, progress, cancel), fields(part_id = %job.part_id, url = %job.redacted_url()))]
    pub async fn transfer(
        &mut self,
        job: &TransferJob,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> TransferOutcome {
        let mut attempt = 1;
        loop {
            if cancel.is_cancelled() {
                debug!("transfer canceled before attempt");
                return TransferOutcome::Canceled;
            }

            let result = self.attempt(job, progress, cancel).await;
            self.release_writer().await;

            let error = match result {
                Ok(AttemptResult::Complete(bytes)) => {
                    info!(bytes, "transfer complete");
                    return TransferOutcome::Success { bytes };
                }
                Ok(AttemptResult::Canceled) => {
                    debug!("transfer canceled");
                    return TransferOutcome::Canceled;
                }
                Err(error) => error,
            };

            let failure = classify_error(&error);
            match self.retry_policy.should_retry(failure, attempt) {
                RetryDecision::Retry {
                    delay,
                    attempt: next,
                } => {
                    warn!(
                        attempt,
                        next_attempt = next,
                        delay_ms = delay.as_millis(),
                        error = %error,
                        "transfer attempt failed, retrying"
                    );
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => return TransferOutcome::Canceled,
                        () = tokio::time::sleep(delay) => {}
                    }
                    attempt = next;
                }
                RetryDecision::DoNotRetry { reason } => {
                    warn!(attempt, reason = %reason, error = %error, "transfer failed");
                    return match failure {
                        FailureType::Transient => TransferOutcome::TransientFailure(error),
                        FailureType::Permanent | FailureType::NeedsAuth => {
                            TransferOutcome::TerminalFailure(error)
                        }
                    };
                }
            }
        }
    }

    /// Releases the staging file handle. Safe to call at any time, any number of times.
    pub fn close(&mut self) {
        if self.writer.take().is_some() {
            debug!("transfer engine closed with an open staging file");
        }
    }

    async fn attempt(
        &mut self,
        job: &TransferJob,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<AttemptResult, DownloadError> {
        let path = job.temp_path.as_path();
        let url = job.url.as_str();
        let expected = job.expected();

        let mut offset = staged_len(path).await?;
        if let Some(expected) = expected {
            if offset == expected {
                debug!(bytes = offset, "staging file already complete");
                progress(TransferProgress::new(offset, Some(expected)));
                return Ok(AttemptResult::Complete(offset));
            }
            if offset > expected {
                warn!(
                    staged = offset,
                    expected, "staging file larger than expected, restarting from zero"
                );
                remove_staged(path).await?;
                offset = 0;
            }
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DownloadError::io(parent, e))?;
        }

        let mut request = self.client.get(job.url.clone());
        if offset > 0 {
            debug!(offset, "requesting resume");
            request = request.header(RANGE, format!("bytes={offset}-"));
        }

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(AttemptResult::Canceled),
            response = request.send() => response.map_err(|e| DownloadError::from_reqwest(url, e))?,
        };

        let status = response.status().as_u16();
        let append = match status {
            206 if offset > 0 => true,
            200..=299 => {
                if offset > 0 {
                    info!(
                        offset,
                        status, "server ignored range request, restarting from zero"
                    );
                    offset = 0;
                }
                false
            }
            416 => {
                remove_staged(path).await?;
                return Err(DownloadError::range_not_satisfiable(url, offset));
            }
            401 | 403 => return Err(DownloadError::auth_required(url, status)),
            _ => return Err(DownloadError::http_status(url, status)),
        };

        let total = expected.or_else(|| {
            response
                .headers()
                .get(CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|remaining| offset.saturating_add(remaining))
        });

        let file = if append {
            OpenOptions::new().append(true).open(path).await
        } else {
            File::create(path).await
        }
        .map_err(|e| DownloadError::io(path, e))?;
        self.writer = Some(BufWriter::new(file));

        let mut throttle = ProgressThrottle::new(self.progress_interval);
        let mut written = offset;
        let mut stream = response.bytes_stream();

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(AttemptResult::Canceled),
                next = stream.next() => next,
            };
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk.map_err(|e| DownloadError::from_reqwest(url, e))?;
            self.writer_mut(path)?
                .write_all(&chunk)
                .await
                .map_err(|e| DownloadError::io(path, e))?;
            written = written.saturating_add(chunk.len() as u64);

            if throttle.should_report() {
                progress(TransferProgress::new(written, total));
            }
        }

        if let Some(mut writer) = self.writer.take() {
            writer
                .flush()
                .await
                .map_err(|e| DownloadError::io(path, e))?;
        }

        if let Some(total) = total
            && written != total
        {
            return Err(DownloadError::integrity(path, total, written));
        }

        progress(TransferProgress::new(written, total));
        Ok(AttemptResult::Complete(written))
    }

    fn writer_mut(&mut self, path: &Path) -> Result<&mut BufWriter<File>, DownloadError> {
        self.writer.as_mut().ok_or_else(|| {
            DownloadError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::NotConnected, "staging file closed"),
            )
        })
    }

    /// Flushes whatever is buffered so the next attempt resumes from it.
    async fn release_writer(&mut self) {
        if let Some(mut writer) = self.writer.take()
            && let Err(error) = writer.flush().await
        {
            debug!(error = %error, "failed to flush staging file on release");
        }
    }
}

impl Drop for TransferEngine {
    fn drop(&mut self) {
        self.close();
    }
}

async fn staged_len(path: &Path) -> Result<u64, DownloadError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(meta.len()),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(error) => Err(DownloadError::io(path, error)),
    }
}

async fn remove_staged(path: &Path) -> Result<(), DownloadError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(DownloadError::io(path, error)),
    }
}
