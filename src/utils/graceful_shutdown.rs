use std::{net::SocketAddr, time::Duration};

use axum::Router;
use eyre::{Result, WrapErr};
use tokio::{net::TcpListener, signal, time::timeout};
use tokio_util::sync::CancellationToken;

/// Why the process is shutting down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT (Ctrl+C)
    Interrupt,
    /// SIGTERM
    Terminate,
}

/// Wait for SIGINT or SIGTERM.
///
/// Failing to install a handler is logged and that signal is ignored; the
/// other one still works.
pub async fn wait_for_signal() -> ShutdownReason {
    tokio::select! {
        result = signal::ctrl_c() => {
            match result {
                Ok(()) => tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown..."),
                Err(e) => {
                    tracing::error!(error = %e, "failed to listen for SIGINT");
                    std::future::pending::<()>().await;
                }
            }
            ShutdownReason::Interrupt
        }
        _ = wait_for_sigterm() => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
            ShutdownReason::Terminate
        }
    }
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to register SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    // Only Ctrl+C exists here
    std::future::pending::<()>().await;
}

/// Bind a TCP listener, naming the address on failure.
pub async fn bind_listener(addr: &str) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("failed to bind {addr}"))
}

/// Serve `router` on `listener` until `token` is cancelled.
///
/// After cancellation, in-flight requests get `grace` to finish; anything
/// still open after that is abandoned and the call returns `Ok`.
pub async fn serve_until_cancelled(
    listener: TcpListener,
    router: Router,
    token: CancellationToken,
    grace: Duration,
) -> Result<()> {
    let server = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(token.clone().cancelled_owned())
    .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => return result.wrap_err("server terminated unexpectedly"),
        _ = token.cancelled() => {}
    }

    match timeout(grace, server).await {
        Ok(result) => result.wrap_err("server failed while draining"),
        Err(_) => {
            tracing::warn!(grace = ?grace, "shutdown grace period elapsed, dropping open connections");
            Ok(())
        }
    }
}
