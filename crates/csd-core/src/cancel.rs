//! Cancellation driven by OS signals.
//!
//! A single [`CancellationToken`] is created per top-level operation and
//! handed explicitly to whichever loop needs to observe it (the daemon's serve
//! loop, the session loop's wait step).

use tokio_util::sync::CancellationToken;

/// Create a token that is cancelled on SIGINT or SIGTERM.
///
/// Must be called from within a Tokio runtime.
#[must_use]
pub fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    spawn_signal_listener(token.clone());
    token
}

/// Cancel `token` when the process receives SIGINT or SIGTERM.
pub fn spawn_signal_listener(token: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            () = token.cancelled() => {}
            signal = wait_for_signal() => {
                tracing::info!(%signal, "Received signal");
                token.cancel();
            }
        }
    });
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!("Failed to install SIGTERM handler: {e}");
            return wait_for_ctrl_c().await;
        }
    };

    tokio::select! {
        name = wait_for_ctrl_c() => name,
        _ = sigterm.recv() => "SIGTERM",
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    wait_for_ctrl_c().await
}

async fn wait_for_ctrl_c() -> &'static str {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for interrupt: {e}");
        std::future::pending::<()>().await;
    }
    "SIGINT"
}
