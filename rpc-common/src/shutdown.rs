//! Graceful Shutdown Module
//!
//! A [`ShutdownTrigger`] / [`ShutdownSignal`] pair stops a running
//! [`crate::GrpcServer`] programmatically; [`wait_for_signal`] covers
//! SIGINT and SIGTERM.

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

/// Create a connected trigger and signal.
#[must_use]
pub fn channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, ShutdownSignal { rx })
}

/// Sending side of a shutdown channel.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    /// Ask every subscribed signal to resolve.
    pub fn trigger(&self) {
        info!("Initiating graceful shutdown");
        self.tx.send_replace(true);
    }

    /// Another signal for the same trigger.
    #[must_use]
    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }
}

/// Shutdown signal receiver
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Waits for the trigger to fire.
    ///
    /// Dropping the trigger without firing it counts as a shutdown request.
    pub async fn recv(mut self) {
        // Err means the trigger is gone, which also ends the wait.
        let _ = self.rx.wait_for(|stop| *stop).await;
    }

    /// Checks if shutdown has been signaled (non-blocking)
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }
}

/// Waits for SIGTERM or SIGINT
pub async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            info!("Received SIGTERM, initiating shutdown");
        }
    }
}

/// Resolves on SIGINT, SIGTERM, or when `signal` fires.
pub async fn signal_or(signal: ShutdownSignal) {
    tokio::select! {
        () = wait_for_signal() => {}
        () = signal.recv() => {}
    }
}
