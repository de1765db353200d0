//! Progress reporting for a running transfer.

use std::sync::Arc;
use std::time::{Duration, Instant};

/// Snapshot of one part's transfer progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    /// Bytes present in the staging file.
    pub bytes_downloaded: u64,
    /// Total bytes, when known.
    pub total_bytes: Option<u64>,
    /// 0-100; stays 0 while the total is unknown.
    pub progress: u8,
}

impl TransferProgress {
    /// Builds a snapshot, deriving the percentage.
    #[must_use]
    pub fn new(bytes_downloaded: u64, total_bytes: Option<u64>) -> Self {
        Self {
            bytes_downloaded,
            total_bytes,
            progress: percent(bytes_downloaded, total_bytes),
        }
    }
}

/// Callback invoked with progress snapshots; runs on the transfer's task.
pub type ProgressSink = Arc<dyn Fn(TransferProgress) + Send + Sync>;

/// Returns a sink that drops every report.
#[must_use]
pub fn discard_progress() -> ProgressSink {
    Arc::new(|_| {})
}

/// Integer percentage, clamped to 100.
#[must_use]
pub fn percent(bytes: u64, total: Option<u64>) -> u8 {
    match total {
        Some(0) | None => 0,
        Some(total) => {
            let pct = (u128::from(bytes) * 100 / u128::from(total)).min(100);
            u8::try_from(pct).unwrap_or(100)
        }
    }
}

/// Rate limiter for progress reports: at most one per interval.
///
/// The first call always reports.
#[derive(Debug)]
pub struct ProgressThrottle {
    interval: Duration,
    last: Option<Instant>,
}

impl ProgressThrottle {
    /// Creates a throttle with the given minimum spacing.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// Returns true (and arms the throttle) if a report is due.
    pub fn should_report(&mut self) -> bool {
        self.should_report_at(Instant::now())
    }

    fn should_report_at(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_handles_unknown_and_overflow() {
        assert_eq!(percent(50, None), 0);
        assert_eq!(percent(50, Some(0)), 0);
        assert_eq!(percent(50, Some(100)), 50);
        assert_eq!(percent(150, Some(100)), 100);
        assert_eq!(percent(u64::MAX, Some(u64::MAX)), 100);
    }

    #[test]
    fn test_throttle_spaces_reports() {
        let mut throttle = ProgressThrottle::new(Duration::from_millis(500));
        let start = Instant::now();

        assert!(throttle.should_report_at(start));
        assert!(!throttle.should_report_at(start + Duration::from_millis(100)));
        assert!(!throttle.should_report_at(start + Duration::from_millis(499)));
        assert!(throttle.should_report_at(start + Duration::from_millis(500)));
        assert!(!throttle.should_report_at(start + Duration::from_millis(600)));
    }

    #[test]
    fn test_zero_interval_reports_every_time() {
        let mut throttle = ProgressThrottle::new(Duration::ZERO);
        assert!(throttle.should_report());
        assert!(throttle.should_report());
    }

    #[test]
    fn test_transfer_progress_derives_percentage() {
        let progress = TransferProgress::new(256, Some(1024));
        assert_eq!(progress.progress, 25);
    }
}
