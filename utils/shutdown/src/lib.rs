//! Coordinated graceful shutdown for long running tokio tasks.
//!
//! A single process-wide [`Shutdown`] handle is shared by every task spawned
//! at startup (the reconciler, the phase synchronizer, the readiness
//! notifier). Each task selects on [`Shutdown::wait`] alongside its own work
//! and returns once a SIGTERM/SIGINT is observed, so the process exits only
//! after every in-flight reconcile has had a chance to finish its current
//! step.

use std::sync::Arc;
use tokio::sync::Notify;
use tracing::info;

lazy_static::lazy_static! {
    static ref SHUTDOWN: Arc<Notify> = Arc::new(Notify::new());
}

/// Handle to the process-wide shutdown signal. Cheap to clone.
#[derive(Clone, Default)]
pub struct Shutdown;

impl Shutdown {
    /// Resolves once a shutdown has been requested. Safe to call from
    /// multiple tasks; every waiter is woken.
    pub async fn wait(&self) {
        SHUTDOWN.notified().await;
    }

    /// Requests shutdown, waking every task currently waiting on
    /// [`Shutdown::wait`].
    pub fn shutdown(&self) {
        SHUTDOWN.notify_waiters();
    }
}

/// Installs SIGTERM/SIGINT handlers (SIGINT only on platforms without
/// `signal::unix`) and requests shutdown on receipt of either. Returns once
/// the first signal arrives.
pub async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = sigint.recv() => info!("received SIGINT"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("received ctrl-c");
    }
    Shutdown.shutdown();
}
