//! Process stop coordination.
//!
//! `Router::stop_server` only invokes a callback; the binary wires that
//! callback to [`ShutdownController::trigger_shutdown`] and waits on the
//! controller before stopping the worker pool.

use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::watch;

/// Lifecycle of the process, as seen by the stop path.
///
/// State machine: Running -> Stopping -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    /// Services are being created and messages routed.
    Running,
    /// A stop was requested; the pool is being torn down.
    Stopping,
    /// Every worker has exited.
    Stopped,
}

/// Broadcasts a single stop request to any number of listeners.
#[derive(Debug)]
pub struct ShutdownController {
    shutdown_signal: watch::Sender<bool>,
    state: Arc<ArcSwap<ShutdownState>>,
}

impl ShutdownController {
    /// Creates a controller in the `Running` state.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            shutdown_signal: tx,
            state: Arc::new(ArcSwap::from_pointee(ShutdownState::Running)),
        }
    }

    /// Returns a receiver that flips to `true` once shutdown is triggered.
    #[must_use]
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_signal.subscribe()
    }

    /// Moves to `Stopping` and wakes every listener. Later calls are no-ops.
    pub fn trigger_shutdown(&self) {
        let previous = self.state.rcu(|state| match **state {
            ShutdownState::Running => ShutdownState::Stopping,
            other => other,
        });
        if *previous == ShutdownState::Running {
            tracing::info!("shutdown triggered");
        }
        self.shutdown_signal.send_replace(true);
    }

    /// Records that the worker pool has fully stopped.
    pub fn mark_stopped(&self) {
        self.state.store(Arc::new(ShutdownState::Stopped));
    }

    #[must_use]
    pub fn state(&self) -> ShutdownState {
        **self.state.load()
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_signal.borrow()
    }

    /// Resolves once [`ShutdownController::trigger_shutdown`] has been called.
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.shutdown_receiver();
        // The sender lives in `self`, so this only ends on a `true` value.
        let _ = rx.wait_for(|stopping| *stopping).await;
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}
