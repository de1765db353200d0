//! Host application lifecycle guard.

use std::sync::atomic::{AtomicBool, Ordering};

/// Tells the manager whether its owning application is going away.
///
/// While tearing down, new download requests are dropped and the resource
/// hold is not (re)acquired.
pub trait HostLifecycle: Send + Sync {
    /// True once the host started finishing or was destroyed.
    fn is_tearing_down(&self) -> bool;
}

/// [`HostLifecycle`] backed by an atomic flag the host flips.
#[derive(Debug, Default)]
pub struct LifecycleFlag {
    tearing_down: AtomicBool,
}

impl LifecycleFlag {
    /// Creates a flag for a live host.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the host as tearing down.
    pub fn begin_teardown(&self) {
        self.tearing_down.store(true, Ordering::SeqCst);
    }
}

impl HostLifecycle for LifecycleFlag {
    fn is_tearing_down(&self) -> bool {
        self.tearing_down.load(Ordering::SeqCst)
    }
}
