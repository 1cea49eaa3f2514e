//! Cancellation shared by every task of the bridge.
//!
//! The signal is a `watch` channel carrying `true` once shutdown is requested.
//! A dropped sender counts as a shutdown request too.

use eyre::{Result, WrapErr};
use tokio::signal;
use tokio::sync::watch;
use tracing::info;

pub type Shutdown = watch::Receiver<bool>;

/// Create a shutdown sender and its first receiver.
pub fn channel() -> (watch::Sender<bool>, Shutdown) {
    watch::channel(false)
}

/// Resolves once shutdown has been requested. Cancel safe.
pub async fn cancelled(shutdown: &mut Shutdown) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Non-blocking check.
pub fn is_cancelled(shutdown: &Shutdown) -> bool {
    *shutdown.borrow() || shutdown.has_changed().is_err()
}

/// Wait for SIGINT or SIGTERM.
pub async fn shutdown_signal() -> Result<()> {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .wrap_err("Failed to install Ctrl+C handler")
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .wrap_err("Failed to install SIGTERM handler")?
            .recv()
            .await;
        Ok::<(), eyre::Report>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Result<()>>();

    tokio::select! {
        result = ctrl_c => {
            result?;
            info!("Received Ctrl+C, initiating shutdown...");
        },
        result = terminate => {
            result?;
            info!("Received SIGTERM, initiating shutdown...");
        },
    }

    Ok(())
}
