//! Graceful shutdown coordinator.
//!
//! Workers already drain in-flight jobs against a `watch::Receiver<bool>`
//! (see `worker::run_poll_loop`); this module's job is narrower — own the
//! `watch::Sender`, listen for SIGTERM/SIGINT, and enforce the shutdown
//! grace period (default 30s) before the process forces exit.

use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// The two ways a shutdown can be requested. `Signal` covers SIGTERM/SIGINT;
/// `Immediate` is reserved for programmatic callers (tests, supervisors)
/// that want to skip waiting on an OS signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Signal,
    Immediate,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownSignal::Signal => write!(f, "signal"),
            ShutdownSignal::Immediate => write!(f, "immediate"),
        }
    }
}

/// Coordinates a single shutdown broadcast and the grace period workers
/// get to drain in-flight jobs before the caller should force-exit.
pub struct GracefulShutdown {
    grace_period: Duration,
    cancel_tx: watch::Sender<bool>,
    cancel_rx: watch::Receiver<bool>,
}

impl GracefulShutdown {
    pub fn new(grace_period: Duration) -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        Self {
            grace_period,
            cancel_tx,
            cancel_rx,
        }
    }

    pub fn with_default_grace_period() -> Self {
        Self::new(Duration::from_secs(30))
    }

    /// Handed to every worker/server component at startup; they select on
    /// `changed()` and begin draining once it flips to `true`.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.cancel_rx.clone()
    }

    /// Waits for SIGTERM (unix) or Ctrl+C, then broadcasts cancellation.
    pub async fn wait_for_os_signal(&self) {
        wait_for_shutdown_signal().await;
        self.trigger(ShutdownSignal::Signal);
    }

    pub fn trigger(&self, signal: ShutdownSignal) {
        info!(%signal, "shutdown requested");
        let _ = self.cancel_tx.send(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Runs `drain` (expected to resolve once all in-flight jobs have
    /// finished or been abandoned) against the grace period, logging and
    /// returning either way so the caller can proceed to force-exit.
    pub async fn drain_within_grace_period<F>(&self, drain: F)
    where
        F: std::future::Future<Output = ()>,
    {
        match tokio::time::timeout(self.grace_period, drain).await {
            Ok(()) => info!("drained all in-flight work before grace period elapsed"),
            Err(_) => warn!(
                grace_period_secs = self.grace_period.as_secs(),
                "grace period elapsed with work still in flight, forcing exit"
            ),
        }
    }
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = &mut ctrl_c => info!("received SIGINT"),
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("received Ctrl+C");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_signal_display() {
        assert_eq!(ShutdownSignal::Signal.to_string(), "signal");
        assert_eq!(ShutdownSignal::Immediate.to_string(), "immediate");
    }

    #[tokio::test]
    async fn trigger_flips_subscribers() {
        let shutdown = GracefulShutdown::with_default_grace_period();
        let mut rx = shutdown.subscribe();
        assert!(!*rx.borrow());

        shutdown.trigger(ShutdownSignal::Immediate);
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn drain_within_grace_period_resolves_once_drain_completes() {
        let shutdown = GracefulShutdown::new(Duration::from_millis(200));
        shutdown.drain_within_grace_period(async {}).await;
    }

    #[tokio::test]
    async fn drain_within_grace_period_times_out_on_stuck_drain() {
        let shutdown = GracefulShutdown::new(Duration::from_millis(20));
        shutdown
            .drain_within_grace_period(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
            })
            .await;
    }
}
