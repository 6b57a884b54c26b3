//! mTLS HTTP server lifecycle.
//!
//! A [`Server`] moves through `Idle → Serving → ShuttingDown → Stopped`.
//! `serve` binds the listener, runs the accept loop as its own task, waits
//! for the cancellation signal, then drains connections within the shutdown
//! timeout and joins the accept loop before returning.

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::Router;
use axum_server::tls_rustls::{RustlsAcceptor, RustlsConfig};
use axum_server::Handle;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinError;

use crate::tls::{build_server_config, CertificateProvider, TlsConfigError};

use super::acceptor::HandshakeLogger;
use super::shutdown::{accept_loop_outcome, drain_connections, merge, ShutdownError};

/// Lifecycle of a [`Server`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Constructed, not listening
    Idle,
    /// Listener bound, accept loop running
    Serving,
    /// No new connections, in-flight requests draining
    ShuttingDown,
    /// Accept loop has exited
    Stopped,
}

/// Everything needed to construct a [`Server`].
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Address to listen on, host:port
    pub bind: String,
    /// Name the server's certificate is requested under
    pub identity: String,
    /// PEM root CA bundle used to verify client certificates
    pub trust_bundle: PathBuf,
    /// Upper bound on draining in-flight requests at shutdown
    pub shutdown_timeout: Duration,
}

/// Server startup and lifecycle error
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to load TLS configuration: {0}")]
    Tls(#[from] TlsConfigError),

    #[error("Failed to bind server to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server has already been started")]
    AlreadyStarted,

    #[error(transparent)]
    Shutdown(#[from] ShutdownError),
}

/// HTTPS server that only talks to clients holding a trusted certificate.
pub struct Server {
    options: ServerOptions,
    router: Router,
    tls: Arc<rustls::ServerConfig>,
    handle: Handle,
    started: AtomicBool,
    local_addr: OnceLock<SocketAddr>,
    state: watch::Sender<ServerState>,
    /// Set once draining has timed out; aborts handshakes still in progress.
    force_close: watch::Sender<bool>,
}

impl Server {
    /// Build the TLS configuration; no socket is bound yet.
    pub fn new(
        options: ServerOptions,
        handler: Router,
        provider: Arc<dyn CertificateProvider>,
    ) -> Result<Self, ServerError> {
        let tls = build_server_config(&options.identity, &options.trust_bundle, provider)?;
        let (state, _) = watch::channel(ServerState::Idle);
        let (force_close, _) = watch::channel(false);

        Ok(Self {
            options,
            router: handler,
            tls: Arc::new(tls),
            handle: Handle::new(),
            started: AtomicBool::new(false),
            local_addr: OnceLock::new(),
            state,
            force_close,
        })
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    /// Wait until `serve` has bound its listener.
    ///
    /// Returns the bound address, or `None` if binding failed.
    pub async fn listening(&self) -> Option<SocketAddr> {
        let mut state = self.state.subscribe();
        state
            .wait_for(|s| *s != ServerState::Idle)
            .await
            .ok()?;
        self.local_addr.get().copied()
    }

    /// Bind, serve until `signal` resolves, then shut down gracefully.
    ///
    /// Returns once both the connection drain and the accept loop have
    /// finished. Only the first call does anything; later calls get
    /// [`ServerError::AlreadyStarted`].
    pub async fn serve<F>(&self, signal: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyStarted);
        }

        // Bind first: a bind failure never enters Serving
        let (listener, addr) = match self.bind().await {
            Ok(bound) => bound,
            Err(e) => {
                self.state.send_replace(ServerState::Stopped);
                return Err(e);
            }
        };
        let _ = self.local_addr.set(addr);

        // TLS acceptor with mandatory client auth, wrapped to log rejections
        let acceptor = HandshakeLogger::new(
            RustlsAcceptor::new(RustlsConfig::from_config(Arc::clone(&self.tls))),
            self.force_close.subscribe(),
        );
        let server = axum_server::from_tcp(listener)
            .acceptor(acceptor)
            .handle(self.handle.clone());
        let app = self.router.clone().into_make_service();

        // Accept loop runs as its own task; its JoinHandle is the completion signal
        let mut accept_loop = tokio::spawn(server.serve(app));
        self.state.send_replace(ServerState::Serving);
        tracing::info!(%addr, identity = %self.options.identity, "Serving HTTPS with client authentication");

        tokio::select! {
            _ = signal => {}
            joined = &mut accept_loop => return self.stopped_early(joined),
        }

        // Setup graceful shutdown: stop accepting, let in-flight requests finish
        self.state.send_replace(ServerState::ShuttingDown);
        let timeout = self.options.shutdown_timeout;
        tracing::info!(?timeout, "Graceful shutdown initiated, draining connections");

        self.handle.graceful_shutdown(None);
        let drained = drain_connections(&self.handle, timeout).await;
        if let Err(e) = &drained {
            tracing::warn!(
                error = %e,
                open = self.handle.connection_count(),
                "Connections did not drain in time, closing them"
            );
            // Handshakes in progress are not covered by the handle
            self.force_close.send_replace(true);
            self.handle.shutdown();
        }

        // Always join the accept loop so its own fault is not lost
        let accepted = accept_loop_outcome(accept_loop.await);
        self.state.send_replace(ServerState::Stopped);

        match merge(drained, accepted) {
            Ok(()) => {
                tracing::info!("Server stopped");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// The accept loop ended before cancellation was requested.
    fn stopped_early(
        &self,
        joined: Result<std::io::Result<()>, JoinError>,
    ) -> Result<(), ServerError> {
        self.state.send_replace(ServerState::Stopped);
        let outcome = accept_loop_outcome(joined);
        match &outcome {
            Ok(()) => tracing::info!("Accept loop stopped before shutdown was requested"),
            Err(e) => {
                tracing::error!(error = %e, "Accept loop failed before shutdown was requested")
            }
        }
        outcome.map_err(ServerError::from)
    }

    async fn bind(&self) -> Result<(std::net::TcpListener, SocketAddr), ServerError> {
        let bind_error = |source: std::io::Error| ServerError::Bind {
            addr: self.options.bind.clone(),
            source,
        };

        let listener = TcpListener::bind(self.options.bind.as_str())
            .await
            .map_err(bind_error)?;
        let addr = listener.local_addr().map_err(bind_error)?;
        let listener = listener.into_std().map_err(bind_error)?;
        Ok((listener, addr))
    }
}
