//! Signal handling for graceful shutdown.
//!
//! The first SIGINT or SIGTERM sets a global flag. Long operations (the
//! ping scheduler in particular) check it through a [`ShutdownToken`] and
//! stop starting new work; `main` then exits with status 130.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

/// Exit status used after an interrupt (128 + SIGINT).
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Global flag indicating whether a shutdown has been requested.
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Check if shutdown has been requested.
#[inline]
pub fn is_shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::Relaxed)
}

/// Request a shutdown (called from the signal task).
pub fn request_shutdown() {
    SHUTDOWN_REQUESTED.store(true, Ordering::Relaxed);
}

#[cfg(test)]
pub fn reset_shutdown() {
    SHUTDOWN_REQUESTED.store(false, Ordering::Relaxed);
}

/// Spawns a task listening for SIGINT and SIGTERM.
///
/// If the handlers cannot be registered the guard is still created and the
/// default signal disposition applies.
pub struct ShutdownGuard {
    _marker: (),
}

impl ShutdownGuard {
    pub fn new() -> Self {
        tokio::spawn(async move {
            let sigint = signal(SignalKind::interrupt())
                .map_err(|e| warn!("Failed to register SIGINT handler: {}", e))
                .ok();
            let sigterm = signal(SignalKind::terminate())
                .map_err(|e| warn!("Failed to register SIGTERM handler: {}", e))
                .ok();

            match (sigint, sigterm) {
                (Some(mut int), Some(mut term)) => {
                    tokio::select! {
                        _ = int.recv() => info!("Interrupted, finishing current step..."),
                        _ = term.recv() => info!("Terminated, finishing current step..."),
                    }
                }
                (Some(mut int), None) => {
                    int.recv().await;
                    info!("Interrupted, finishing current step...");
                }
                (None, Some(mut term)) => {
                    term.recv().await;
                    info!("Terminated, finishing current step...");
                }
                (None, None) => {
                    warn!("No signal handlers registered - graceful shutdown disabled");
                    return;
                }
            }
            request_shutdown();
        });

        Self { _marker: () }
    }
}

impl Default for ShutdownGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// A token that can be shared across tasks to check for shutdown.
#[derive(Clone)]
pub struct ShutdownToken {
    flag: Arc<AtomicBool>,
    follow_global: bool,
}

impl ShutdownToken {
    /// Token cancelled by [`cancel`](Self::cancel) or by a process signal.
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            follow_global: true,
        }
    }

    /// Token that ignores the process-wide flag.
    #[cfg(test)]
    pub fn isolated() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            follow_global: false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed) || (self.follow_global && is_shutdown_requested())
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }
}

impl Default for ShutdownToken {
    fn default() -> Self {
        Self::new()
    }
}
