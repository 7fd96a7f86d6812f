//! Shutdown coordination shared by the signal handler, the accept loops and
//! the application.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::info;

/// Two-phase shutdown flags.
///
/// Phase one (`initiated`) stops admission of new sessions; phase two
/// (`complete`) is set once world pipelines have drained.
#[derive(Debug, Clone)]
pub struct ShutdownState {
    initiated: Arc<AtomicBool>,
    complete: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownState {
    pub fn new() -> Self {
        Self {
            initiated: Arc::new(AtomicBool::new(false)),
            complete: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.initiated.load(Ordering::Acquire)
    }

    pub fn is_shutdown_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }

    /// Stops admission and wakes everyone waiting in
    /// [`ShutdownState::initiated`]. Only the first call logs.
    pub fn initiate_shutdown(&self) {
        if !self.initiated.swap(true, Ordering::AcqRel) {
            info!("🛑 Shutdown initiated - no new sessions will be admitted");
        }
        self.notify.notify_waiters();
    }

    pub fn complete_shutdown(&self) {
        self.complete.store(true, Ordering::Release);
        info!("✅ World pipelines drained - ready for final cleanup");
    }

    /// Resolves once shutdown has been initiated.
    pub async fn initiated(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_shutdown_initiated() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for ShutdownState {
    fn default() -> Self {
        Self::new()
    }
}
