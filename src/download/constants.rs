//! Constants for the transfer engine (timeouts, pooling, progress cadence).

use std::time::Duration;

/// Default HTTP connect timeout (60 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 60;

/// Default read-stall timeout (5 minutes). Never zero.
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Default whole-call ceiling (6 hours), equal to the resource hold timeout.
pub const CALL_TIMEOUT_SECS: u64 = 6 * 60 * 60;

/// Idle pooled connections are dropped after this long.
pub const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Idle connections kept per host.
pub const POOL_MAX_IDLE_PER_HOST: usize = 8;

/// TCP keep-alive probe interval.
pub const TCP_KEEPALIVE: Duration = Duration::from_secs(30);

/// Default minimum spacing between progress reports for one part.
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);
