//! Retry logic with exponential backoff for socket-level transfer failures.
//!
//! When an attempt fails, the error is classified into a [`FailureType`]:
//! - [`FailureType::Transient`] - timeouts, resets, 5xx; worth another attempt
//! - [`FailureType::Permanent`] - 4xx, malformed URL, local write failures
//! - [`FailureType::NeedsAuth`] - the session token was refused
//!
//! The [`RetryPolicy`] decides whether the engine retries in place (same
//! partial file) and how long it waits first.
//!
//! # Example
//!
//! ```
//! use bookshelf_downloader::download::{
//!     DownloadError, RetryPolicy, RetryDecision, classify_error
//! };
//!
//! let policy = RetryPolicy::default();
//! let error = DownloadError::http_status("https://abs.example.com/file.mp3", 503);
//!
//! match policy.should_retry(classify_error(&error), 1) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         println!("Retrying in {:?} (attempt {})", delay, attempt);
//!     }
//!     RetryDecision::DoNotRetry { reason } => {
//!         println!("Not retrying: {}", reason);
//!     }
//! }
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

use super::DownloadError;

/// Default attempts per transfer before the queue manager sees a transient failure.
pub const DEFAULT_SOCKET_RETRY_ATTEMPTS: u32 = 3;

/// Default base delay for exponential backoff (1 second).
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default maximum delay cap (32 seconds).
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(32);

/// Default backoff multiplier (doubles each attempt).
const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;

/// Maximum jitter added to delays (500ms), further capped by the base delay.
const MAX_JITTER: Duration = Duration::from_millis(500);

/// Classification of transfer failure types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary failure that may succeed on retry.
    Transient,
    /// Failure that won't succeed regardless of retries.
    Permanent,
    /// The server refused the session token.
    NeedsAuth,
}

/// Decision on whether to retry a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Attempt number of the retry (1-indexed, so the first retry is 2).
        attempt: u32,
    },

    /// Do not retry.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Configuration for retry behavior with exponential backoff.
///
/// ```text
/// delay = min(base_delay * multiplier^(attempt-1), max_delay) + jitter
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    max_attempts: u32,
    /// Base delay for the first retry.
    base_delay: Duration,
    /// Maximum delay cap.
    max_delay: Duration,
    /// Multiplier applied each attempt.
    backoff_multiplier: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_SOCKET_RETRY_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl RetryPolicy {
    /// Creates a new retry policy with custom settings.
    ///
    /// `max_attempts` is clamped to at least 1.
    #[must_use]
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f32,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            backoff_multiplier,
        }
    }

    /// Creates a policy with a custom `max_attempts`, using defaults for other settings.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// A policy that retries immediately; used where backoff would only slow tests.
    #[must_use]
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, Duration::ZERO, 1.0)
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Determines whether to retry after attempt number `attempt` (1-indexed) failed.
    #[instrument(level = "debug", skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        match failure_type {
            FailureType::Permanent => {
                return RetryDecision::DoNotRetry {
                    reason: "permanent failure - retry would not help".to_string(),
                };
            }
            FailureType::NeedsAuth => {
                return RetryDecision::DoNotRetry {
                    reason: "authentication required - token must be refreshed".to_string(),
                };
            }
            FailureType::Transient => {}
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = self.calculate_delay(attempt);
        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let multiplier = f64::from(self.backoff_multiplier);
        let exponent = f64::from(attempt.saturating_sub(1));
        let delay_ms = base_ms * multiplier.powf(exponent);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);

        Duration::from_millis(capped_ms as u64) + self.calculate_jitter()
    }

    #[allow(clippy::cast_possible_truncation)]
    fn calculate_jitter(&self) -> Duration {
        let bound = MAX_JITTER.min(self.base_delay).as_millis() as u64;
        if bound == 0 {
            return Duration::ZERO;
        }
        let mut rng = rand::thread_rng();
        Duration::from_millis(rng.gen_range(0..=bound))
    }
}

/// Classifies a transfer error for retry decisions.
///
/// | Error | Type |
/// |-------|------|
/// | 408, 429, 5xx | Transient |
/// | 401, 403 | NeedsAuth |
/// | other 4xx | Permanent |
/// | Timeout, Network | Transient |
/// | Network (TLS, request builder) | Permanent |
/// | Range not satisfiable, Integrity | Transient (restart from zero) |
/// | Io, InvalidUrl | Permanent |
#[instrument(level = "debug")]
pub fn classify_error(error: &DownloadError) -> FailureType {
    match error {
        DownloadError::HttpStatus { status, .. } => classify_http_status(*status),
        DownloadError::AuthRequired { .. } => FailureType::NeedsAuth,
        DownloadError::Timeout { .. }
        | DownloadError::RangeNotSatisfiable { .. }
        | DownloadError::Integrity { .. } => FailureType::Transient,
        DownloadError::Network { source, .. } => {
            if source.is_builder() || is_tls_error(source) {
                FailureType::Permanent
            } else {
                FailureType::Transient
            }
        }
        DownloadError::Io { .. } | DownloadError::InvalidUrl { .. } => FailureType::Permanent,
    }
}

#[allow(clippy::match_same_arms)]
fn classify_http_status(status: u16) -> FailureType {
    match status {
        401 | 403 => FailureType::NeedsAuth,
        408 | 429 => FailureType::Transient,
        status if (400..500).contains(&status) => FailureType::Permanent,
        status if (500..600).contains(&status) => FailureType::Transient,
        _ => FailureType::Permanent,
    }
}

fn is_tls_error(error: &reqwest::Error) -> bool {
    let error_string = error.to_string().to_lowercase();
    error_string.contains("certificate")
        || error_string.contains("tls")
        || error_string.contains("ssl")
        || error_string.contains("handshake")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_default_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(32));
        assert!((policy.backoff_multiplier - 2.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_retry_policy_max_attempts_minimum_is_one() {
        let policy = RetryPolicy::with_max_attempts(0);
        assert_eq!(policy.max_attempts(), 1);
    }

    #[test]
    fn test_delay_calculation_grows_and_caps() {
        let policy = RetryPolicy::new(10, Duration::from_secs(1), Duration::from_secs(5), 2.0);

        let first = policy.calculate_delay(1);
        assert!(first >= Duration::from_secs(1));
        assert!(first <= Duration::from_millis(1500));

        let third = policy.calculate_delay(3);
        assert!(third >= Duration::from_secs(4));
        assert!(third <= Duration::from_millis(4500));

        let capped = policy.calculate_delay(6);
        assert!(capped >= Duration::from_secs(5));
        assert!(capped <= Duration::from_millis(5500));
    }

    #[test]
    fn test_jitter_within_bounds() {
        let policy = RetryPolicy::default();
        for _ in 0..100 {
            assert!(policy.calculate_jitter() <= MAX_JITTER);
        }
    }

    #[test]
    fn test_immediate_policy_has_no_delay() {
        let policy = RetryPolicy::immediate(3);
        match policy.should_retry(FailureType::Transient, 1) {
            RetryDecision::Retry { delay, attempt } => {
                assert_eq!(delay, Duration::ZERO);
                assert_eq!(attempt, 2);
            }
            other => panic!("expected retry, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_http_statuses() {
        let cases = [
            (400, FailureType::Permanent),
            (401, FailureType::NeedsAuth),
            (403, FailureType::NeedsAuth),
            (404, FailureType::Permanent),
            (408, FailureType::Transient),
            (410, FailureType::Permanent),
            (429, FailureType::Transient),
            (500, FailureType::Transient),
            (502, FailureType::Transient),
            (503, FailureType::Transient),
            (504, FailureType::Transient),
            (302, FailureType::Permanent),
        ];
        for (status, expected) in cases {
            let error = DownloadError::http_status("http://example.com", status);
            assert_eq!(classify_error(&error), expected, "status {status}");
        }
    }

    #[test]
    fn test_classify_non_http_errors() {
        assert_eq!(
            classify_error(&DownloadError::timeout("http://example.com")),
            FailureType::Transient
        );
        assert_eq!(
            classify_error(&DownloadError::invalid_url("not-a-url")),
            FailureType::Permanent
        );
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert_eq!(
            classify_error(&DownloadError::io("/stage/file.part", io_err)),
            FailureType::Permanent
        );
        assert_eq!(
            classify_error(&DownloadError::range_not_satisfiable("http://h/f", 10)),
            FailureType::Transient
        );
        assert_eq!(
            classify_error(&DownloadError::integrity("/stage/f.part", 10, 9)),
            FailureType::Transient
        );
        assert_eq!(
            classify_error(&DownloadError::auth_required("http://h/f", 401)),
            FailureType::NeedsAuth
        );
    }

    #[test]
    fn test_should_retry_respects_max_attempts() {
        let policy = RetryPolicy::with_max_attempts(3);
        assert!(matches!(
            policy.should_retry(FailureType::Transient, 1),
            RetryDecision::Retry { .. }
        ));
        assert!(matches!(
            policy.should_retry(FailureType::Transient, 2),
            RetryDecision::Retry { .. }
        ));
        match policy.should_retry(FailureType::Transient, 3) {
            RetryDecision::DoNotRetry { reason } => assert!(reason.contains("exhausted")),
            other => panic!("expected no retry, got {other:?}"),
        }
    }

    #[test]
    fn test_should_retry_permanent_and_auth_do_not_retry() {
        let policy = RetryPolicy::default();
        match policy.should_retry(FailureType::Permanent, 1) {
            RetryDecision::DoNotRetry { reason } => assert!(reason.contains("permanent")),
            other => panic!("expected no retry, got {other:?}"),
        }
        match policy.should_retry(FailureType::NeedsAuth, 1) {
            RetryDecision::DoNotRetry { reason } => assert!(reason.contains("authentication")),
            other => panic!("expected no retry, got {other:?}"),
        }
    }
}
