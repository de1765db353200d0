//! Resource hold contract and a timer-backed implementation.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Errors a platform hold can report on acquire.
#[derive(Debug, Error)]
pub enum HoldError {
    /// The platform refused to grant the hold.
    #[error("resource hold unavailable: {reason}")]
    Unavailable {
        /// Platform-supplied reason.
        reason: String,
    },
}

impl HoldError {
    /// Creates an unavailable error.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }
}

/// OS-level "stay alive" guarantee kept for the life of active transfers.
///
/// Implementations must not reference-count: one `release` undoes any number
/// of `acquire` calls. `release` must be safe to call when not held. Calls
/// happen under the queue lock, so implementations must not block.
pub trait ResourceHold: Send + Sync {
    /// Acquires the hold, auto-releasing after `timeout` if given.
    ///
    /// # Errors
    ///
    /// Returns [`HoldError`] if the platform refuses the hold.
    fn acquire(&self, timeout: Option<Duration>) -> Result<(), HoldError>;

    /// Releases the hold. No-op when not held.
    fn release(&self);

    /// Renders the user-visible status line.
    fn render_status(&self, active_count: usize, label: &str);

    /// True while held.
    fn is_held(&self) -> bool;
}

#[derive(Debug, Default)]
struct HoldState {
    held: bool,
    generation: u64,
    timer: Option<JoinHandle<()>>,
    status: Option<String>,
}

/// Non-reference-counted hold with an auto-release safeguard timer.
///
/// The timer of an older session never releases a newer one: each acquire
/// bumps a generation and the timer only fires for its own generation.
#[derive(Debug, Clone, Default)]
pub struct TimedHold {
    state: Arc<Mutex<HoldState>>,
}

impl TimedHold {
    /// Creates a released hold.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Last rendered status line.
    #[must_use]
    pub fn status(&self) -> Option<String> {
        self.state.lock().status.clone()
    }

    fn arm_timer(&self, generation: u64, timeout: Duration) -> Option<JoinHandle<()>> {
        let Ok(handle) = Handle::try_current() else {
            warn!("no async runtime, resource hold will not auto-release");
            return None;
        };
        let state = Arc::clone(&self.state);
        Some(handle.spawn(async move {
            tokio::time::sleep(timeout).await;
            let mut state = state.lock();
            if state.held && state.generation == generation {
                state.held = false;
                state.timer = None;
                warn!(
                    timeout_secs = timeout.as_secs(),
                    "resource hold auto-released after timeout"
                );
            }
        }))
    }
}

impl ResourceHold for TimedHold {
    fn acquire(&self, timeout: Option<Duration>) -> Result<(), HoldError> {
        let generation = {
            let mut state = self.state.lock();
            if state.held {
                debug!("resource hold already held");
                return Ok(());
            }
            state.held = true;
            state.generation += 1;
            state.generation
        };
        let timer = timeout.and_then(|timeout| self.arm_timer(generation, timeout));

        let mut state = self.state.lock();
        if state.generation == generation {
            if let Some(previous) = std::mem::replace(&mut state.timer, timer) {
                previous.abort();
            }
        } else if let Some(timer) = timer {
            timer.abort();
        }
        info!(generation, "resource hold acquired");
        Ok(())
    }

    fn release(&self) {
        let mut state = self.state.lock();
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        if state.held {
            state.held = false;
            info!(generation = state.generation, "resource hold released");
        } else {
            debug!("resource hold release requested while not held");
        }
    }

    fn render_status(&self, active_count: usize, label: &str) {
        debug!(active_count, status = label, "status");
        self.state.lock().status = Some(label.to_string());
    }

    fn is_held(&self) -> bool {
        self.state.lock().held
    }
}
