//! Run control signals.
//!
//! Carries the two cooperative signals a run responds to: graceful shutdown
//! (drain and stop, without corrupting checkpoints or partially written
//! batches) and pause/resume. Workers check both between queries at defined
//! suspension points; nothing is interrupted preemptively.

use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::info;

/// Shared handle to the run signals.
pub type SharedSignals = Arc<RunSignals>;

static GLOBAL_SIGNALS: OnceCell<SharedSignals> = OnceCell::new();

/// Register a global signal handle so subsystems can discover it lazily.
pub fn set_global_signals(handle: SharedSignals) {
    let _ = GLOBAL_SIGNALS.set(handle);
}

/// Retrieve the registered global signal handle, if available.
pub fn get_global_signals() -> Option<SharedSignals> {
    GLOBAL_SIGNALS.get().cloned()
}

/// Cooperative shutdown and pause/resume signals shared across tasks.
#[derive(Debug, Default)]
pub struct RunSignals {
    shutdown: AtomicBool,
    shutdown_notify: Notify,
    paused: AtomicBool,
    pause_notify: Notify,
}

impl RunSignals {
    /// Create new signals.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create new shared signals wrapped in [`Arc`].
    pub fn shared() -> SharedSignals {
        Arc::new(Self::new())
    }

    /// Request graceful shutdown. Wakes all waiters, including paused ones,
    /// exactly once.
    pub fn request_shutdown(&self) {
        if !self.shutdown.swap(true, Ordering::SeqCst) {
            self.shutdown_notify.notify_waiters();
            self.pause_notify.notify_waiters();
        }
    }

    /// Whether shutdown has been requested.
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Wait until shutdown is requested. Returns immediately if already set.
    pub async fn wait_for_shutdown(&self) {
        // Register the waiter before checking the flag so a request landing
        // between the check and the await is not missed.
        let notified = self.shutdown_notify.notified();
        if self.is_shutdown_requested() {
            return;
        }
        notified.await;
    }

    /// Request that workers stop claiming new work after their in-flight
    /// query finishes.
    pub fn pause(&self) {
        if !self.paused.swap(true, Ordering::SeqCst) {
            info!("pause requested - workers will hold after their current query");
        }
    }

    /// Resume a paused run.
    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::SeqCst) {
            info!("resume requested");
            self.pause_notify.notify_waiters();
        }
    }

    /// Flip between paused and running.
    pub fn toggle_pause(&self) {
        if self.is_paused() {
            self.resume();
        } else {
            self.pause();
        }
    }

    /// Whether a pause is in effect.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Block while paused. Returns when the run is resumed or shutdown is
    /// requested, whichever comes first.
    pub async fn wait_while_paused(&self) {
        loop {
            if self.is_shutdown_requested() || !self.is_paused() {
                return;
            }
            let resumed = self.pause_notify.notified();
            // Re-check after registering the waiter; resume() or shutdown
            // may have landed in between.
            if self.is_shutdown_requested() || !self.is_paused() {
                return;
            }
            resumed.await;
        }
    }
}

/// Sleep for `duration` unless shutdown is requested first.
///
/// Returns `true` if the full duration elapsed, `false` if the sleep was cut
/// short by shutdown.
pub async fn sleep_interruptible(duration: Duration, signals: &RunSignals) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = signals.wait_for_shutdown() => false,
    }
}
