//! Graceful shutdown and signal handling.
//!
//! Shutdown has two independent outcomes: draining the open connections
//! within the timeout, and the accept loop task ending. Both are always
//! inspected and merged, so a fault on one side is never hidden by success
//! on the other.
//!
//! Handles:
//! - SIGTERM/SIGINT: cancellation signal for the server and client loops
//! - SIGHUP: certificate reload from disk

use std::sync::Arc;
use std::time::Duration;

use axum_server::Handle;
use tokio::task::JoinError;

use crate::config::SHUTDOWN_DRAIN_POLL_MS;
use crate::tls::FileProvider;

/// Errors reported while stopping a server.
#[derive(Debug, thiserror::Error)]
pub enum ShutdownError {
    #[error("graceful shutdown did not finish within {0:?}, remaining connections were closed")]
    Timeout(Duration),

    #[error("accept loop failed: {0}")]
    AcceptLoop(#[source] std::io::Error),

    #[error("accept loop aborted: {0}")]
    AcceptLoopAborted(#[source] JoinError),

    #[error("{}", describe_all(.0))]
    Multiple(Vec<ShutdownError>),
}

impl ShutdownError {
    /// The individual failures; a single error yields itself.
    pub fn causes(&self) -> &[ShutdownError] {
        match self {
            ShutdownError::Multiple(errors) => errors,
            other => std::slice::from_ref(other),
        }
    }

    /// True if connections had to be closed forcibly.
    pub fn is_timeout(&self) -> bool {
        self.causes()
            .iter()
            .any(|e| matches!(e, ShutdownError::Timeout(_)))
    }
}

fn describe_all(errors: &[ShutdownError]) -> String {
    let mut out = format!("{} errors occurred during shutdown:", errors.len());
    for e in errors {
        out.push_str("\n\t* ");
        out.push_str(&e.to_string());
    }
    out
}

/// Combine the drain outcome with the accept loop outcome.
///
/// A drain failure comes first; an accept loop fault is appended to it
/// rather than dropped.
pub(crate) fn merge(
    drain: Result<(), ShutdownError>,
    accept_loop: Result<(), ShutdownError>,
) -> Result<(), ShutdownError> {
    match (drain, accept_loop) {
        (Ok(()), outcome) => outcome,
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(accept)) => Err(ShutdownError::Multiple(vec![e, accept])),
    }
}

/// Normalize the joined accept loop task.
///
/// The serve future resolves to `Ok` when the listener was closed through
/// the handle, so only real faults come out as errors.
pub(crate) fn accept_loop_outcome(
    joined: Result<std::io::Result<()>, JoinError>,
) -> Result<(), ShutdownError> {
    match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ShutdownError::AcceptLoop(e)),
        Err(e) => Err(ShutdownError::AcceptLoopAborted(e)),
    }
}

/// Wait for every connection tracked by `handle` to close.
///
/// Must be called after `graceful_shutdown` was requested on the handle.
/// Returns [`ShutdownError::Timeout`] if connections are still open when the
/// timeout elapses; closing them is left to the caller.
pub(crate) async fn drain_connections(
    handle: &Handle,
    timeout: Duration,
) -> Result<(), ShutdownError> {
    let drained = async {
        while handle.connection_count() > 0 {
            tokio::time::sleep(Duration::from_millis(SHUTDOWN_DRAIN_POLL_MS)).await;
        }
    };

    tokio::time::timeout(timeout, drained)
        .await
        .map_err(|_| ShutdownError::Timeout(timeout))
}

/// Resolves on the first SIGINT (Ctrl+C) or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}

/// Setup SIGHUP handler for certificate reload.
///
/// When SIGHUP is received, the provider re-reads its certificate and key
/// files without waiting for a modification time change.
#[cfg(unix)]
pub fn setup_reload_handler(provider: Arc<FileProvider>) {
    tokio::spawn(async move {
        let mut sighup =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()) {
                Ok(signal) => signal,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to install SIGHUP handler");
                    return;
                }
            };

        loop {
            sighup.recv().await;
            tracing::info!("Received SIGHUP, reloading TLS certificates");

            match provider.reload() {
                Ok(()) => {
                    tracing::info!(cert = %provider.cert_path().display(), "TLS certificates reloaded");
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        cert = %provider.cert_path().display(),
                        "Failed to reload TLS certificates"
                    );
                }
            }
        }
    });
}

/// No-op reload handler for non-Unix platforms.
#[cfg(not(unix))]
pub fn setup_reload_handler(_provider: Arc<FileProvider>) {
    tracing::warn!("Certificate reload via SIGHUP not supported on this platform");
}
