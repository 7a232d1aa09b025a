//! SIGINT/SIGTERM handling.
//!
//! A signal requests cancellation; runs inside a freeze window still thaw
//! before they stop.

use tokio::sync::watch;
use tracing::warn;

/// Flip `cancel` on the first SIGINT or SIGTERM.
pub async fn cancel_on_signal(cancel: watch::Sender<bool>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    warn!("Shutdown signal received, cancelling runs");
    let _ = cancel.send(true);
}
