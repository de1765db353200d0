//! Resumable HTTP transfer of single parts.
//!
//! This module provides the [`TransferEngine`], which streams one part into
//! its staging file, and the pooled [`HttpClient`] that hands out engines to
//! the queue manager through the [`PartTransport`] seam.
//!
//! # Features
//!
//! - Streaming writes (memory-efficient for multi-gigabyte audiobooks)
//! - `Range` resume from staged bytes, with fallback to a full restart
//! - Bounded timeouts (60s connect, 5min read stall, 6h call ceiling)
//! - In-place socket-level retries with exponential backoff
//! - Throttled progress reports
//!
//! # Example
//!
//! ```no_run
//! use bookshelf_downloader::download::{
//!     ClientOptions, HttpClient, TransferJob, TransferOutcome, discard_progress,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(job: TransferJob) -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpClient::new(ClientOptions::default())?;
//! let mut engine = client.engine();
//! match engine.transfer(&job, &discard_progress(), &CancellationToken::new()).await {
//!     TransferOutcome::Success { bytes } => println!("staged {bytes} bytes"),
//!     other => println!("transfer ended: {other:?}"),
//! }
//! engine.close();
//! # Ok(())
//! # }
//! ```

mod client;
mod constants;
mod engine;
mod error;
mod progress;
mod retry;

pub use client::{ClientOptions, HttpClient};
pub use constants::{CALL_TIMEOUT_SECS, CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
pub use engine::{PartTransport, TransferEngine, TransferJob, TransferOutcome};
pub use error::{DownloadError, redact_url};
pub use progress::{
    ProgressSink, ProgressThrottle, TransferProgress, discard_progress, percent,
};
pub use retry::{
    DEFAULT_SOCKET_RETRY_ATTEMPTS, FailureType, RetryDecision, RetryPolicy, classify_error,
};
