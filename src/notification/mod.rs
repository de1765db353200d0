//! Persistent download indicator.
//!
//! The [`NotificationCoordinator`] keeps exactly one [`ResourceHold`] alive
//! while any part is transferring and renders a short status line for it.
//! It holds no queue knowledge of its own: the queue manager drives it with
//! active counts and the current file name, always under the queue lock.

mod hold;

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

pub use hold::{HoldError, ResourceHold, TimedHold};

/// Status shown before any part is transferring.
pub const PREPARING_TEXT: &str = "Preparing downloads...";

/// Default safeguard timeout for the hold (6 hours).
pub const DEFAULT_HOLD_TIMEOUT: Duration = Duration::from_secs(6 * 60 * 60);

/// Renders the status line for `active_count` transfers.
#[must_use]
pub fn status_text(active_count: usize, current_file: Option<&str>) -> String {
    let current_file = current_file.filter(|name| !name.is_empty());
    match (active_count, current_file) {
        (0, _) => PREPARING_TEXT.to_string(),
        (1, Some(name)) => format!("Downloading: {name}"),
        (1, None) => "Downloading 1 file".to_string(),
        (count, _) => format!("Downloading {count} files"),
    }
}

/// Owns the single persistent indicator for the download queue.
pub struct NotificationCoordinator {
    hold: Arc<dyn ResourceHold>,
    hold_timeout: Option<Duration>,
    visible: bool,
}

impl std::fmt::Debug for NotificationCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationCoordinator")
            .field("hold_timeout", &self.hold_timeout)
            .field("visible", &self.visible)
            .finish_non_exhaustive()
    }
}

impl NotificationCoordinator {
    /// Creates a stopped coordinator.
    #[must_use]
    pub fn new(hold: Arc<dyn ResourceHold>, hold_timeout: Option<Duration>) -> Self {
        Self {
            hold,
            hold_timeout,
            visible: false,
        }
    }

    /// True between `start` and `stop`.
    #[must_use]
    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Acquires the hold and shows the preparing state. No-op if already started.
    ///
    /// A refused hold is logged; the indicator still counts as visible so
    /// `stop` releases whatever the platform may have granted.
    pub fn start(&mut self) {
        if self.visible {
            debug!("notification already started");
            return;
        }
        if let Err(err) = self.hold.acquire(self.hold_timeout) {
            error!(error = %err, "failed to acquire resource hold, continuing without it");
        }
        self.visible = true;
        self.hold.render_status(0, PREPARING_TEXT);
        info!("download notification started");
    }

    /// Re-renders the status line. No-op before `start`.
    pub fn update(&mut self, active_count: usize, current_file: Option<&str>) {
        if !self.visible {
            debug!(active_count, "notification update before start ignored");
            return;
        }
        self.hold
            .render_status(active_count, &status_text(active_count, current_file));
    }

    /// Hides the indicator and releases the hold. No-op if not started.
    pub fn stop(&mut self) {
        if !self.visible {
            debug!("notification already stopped");
            return;
        }
        self.visible = false;
        let hold = Arc::clone(&self.hold);
        if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| hold.release())) {
            error!(panic = ?panic_message(panic.as_ref()), "resource hold release panicked");
            return;
        }
        info!("download notification stopped");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
