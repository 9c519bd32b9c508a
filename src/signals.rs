use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Cancel `token` on the first SIGINT or SIGTERM.
///
/// Spawned once at startup; later signals are ignored so the grace period of
/// the in-flight check is not cut short.
pub fn cancel_on_shutdown_signal(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let signal = wait_for_signal().await;
        info!(signal, "Shutdown signal received");
        token.cancel();
    })
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            warn!(error = %e, "Failed to install SIGTERM handler, only Ctrl+C will stop the process");
            return ctrl_c().await;
        }
    };

    tokio::select! {
        name = ctrl_c() => name,
        _ = sigterm.recv() => "SIGTERM",
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    ctrl_c().await
}

async fn ctrl_c() -> &'static str {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    "SIGINT"
}
