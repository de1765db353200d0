//! Pooled HTTP client shared by every transfer.
//!
//! [`HttpClient`] owns one `reqwest::Client` (connection pool, keep-alive,
//! bounded timeouts) and spawns a fresh [`TransferEngine`] per admitted part.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use super::constants::{
    CALL_TIMEOUT_SECS, CONNECT_TIMEOUT_SECS, POOL_IDLE_TIMEOUT, POOL_MAX_IDLE_PER_HOST,
    PROGRESS_INTERVAL, READ_TIMEOUT_SECS, TCP_KEEPALIVE,
};
use super::engine::{PartTransport, TransferEngine, TransferJob, TransferOutcome};
use super::progress::ProgressSink;
use super::retry::{DEFAULT_SOCKET_RETRY_ATTEMPTS, RetryPolicy};

/// User-Agent sent with every request.
const USER_AGENT: &str = concat!("bookshelf-downloader/", env!("CARGO_PKG_VERSION"));

/// Timeouts and retry settings for [`HttpClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// TCP/TLS connect timeout.
    pub connect_timeout: Duration,
    /// Maximum stall between two reads.
    pub read_timeout: Duration,
    /// Ceiling for one whole request, body included.
    pub call_timeout: Duration,
    /// In-place socket-level attempts per admission.
    pub socket_retry: RetryPolicy,
    /// Minimum spacing between progress reports.
    pub progress_interval: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(READ_TIMEOUT_SECS),
            call_timeout: Duration::from_secs(CALL_TIMEOUT_SECS),
            socket_retry: RetryPolicy::with_max_attempts(DEFAULT_SOCKET_RETRY_ATTEMPTS),
            progress_interval: PROGRESS_INTERVAL,
        }
    }
}

/// HTTP client for part transfers.
///
/// Create once and share; clones share the connection pool.
///
/// # Example
///
/// ```no_run
/// use bookshelf_downloader::download::{ClientOptions, HttpClient};
///
/// # fn example() -> Result<(), reqwest::Error> {
/// let client = HttpClient::new(ClientOptions::default())?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    options: ClientOptions,
}

impl HttpClient {
    /// Builds the pooled client.
    ///
    /// # Errors
    ///
    /// Returns the `reqwest` builder error if the TLS backend cannot be
    /// initialised.
    #[instrument(level = "debug", skip(options))]
    pub fn new(options: ClientOptions) -> Result<Self, reqwest::Error> {
        debug!(
            connect_secs = options.connect_timeout.as_secs(),
            read_secs = options.read_timeout.as_secs(),
            call_secs = options.call_timeout.as_secs(),
            socket_attempts = options.socket_retry.max_attempts(),
            "building HTTP client"
        );
        let client = Client::builder()
            .connect_timeout(options.connect_timeout)
            .read_timeout(options.read_timeout)
            .timeout(options.call_timeout)
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
            .tcp_keepalive(TCP_KEEPALIVE)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client, options })
    }

    /// Returns the configured options.
    #[must_use]
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Creates an engine for one transfer on the shared pool.
    #[must_use]
    pub fn engine(&self) -> TransferEngine {
        TransferEngine::new(self.client.clone(), self.options.socket_retry.clone())
            .with_progress_interval(self.options.progress_interval)
    }
}

#[async_trait]
impl PartTransport for HttpClient {
    async fn transfer(
        &self,
        job: TransferJob,
        progress: ProgressSink,
        cancel: CancellationToken,
    ) -> TransferOutcome {
        let mut engine = self.engine();
        let outcome = engine.transfer(&job, &progress, &cancel).await;
        engine.close();
        outcome
    }
}
