//! Acceptor wrapper that reports rejected TLS handshakes.
//!
//! The rustls acceptor drops a connection whose handshake fails (untrusted,
//! missing or expired client certificate) without a trace. Wrapping it here
//! logs the rejection with the peer address; the connection is still
//! dropped and the server keeps running.
//!
//! A handshake still in progress when the server force-closes its
//! connections is abandoned, so a peer that never sends a ClientHello cannot
//! hold shutdown open.

use std::io;
use std::net::SocketAddr;

use axum_server::accept::Accept;
use futures::future::BoxFuture;
use tokio::net::TcpStream;
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct HandshakeLogger<A> {
    inner: A,
    force_close: watch::Receiver<bool>,
}

impl<A> HandshakeLogger<A> {
    /// `force_close` flips to `true` when open connections must be dropped.
    pub fn new(inner: A, force_close: watch::Receiver<bool>) -> Self {
        Self { inner, force_close }
    }
}

impl<A, S> Accept<TcpStream, S> for HandshakeLogger<A>
where
    A: Accept<TcpStream, S>,
    A::Future: Send + 'static,
    A::Stream: Send + 'static,
    A::Service: Send + 'static,
{
    type Stream = A::Stream;
    type Service = A::Service;
    type Future = BoxFuture<'static, io::Result<(Self::Stream, Self::Service)>>;

    fn accept(&self, stream: TcpStream, service: S) -> Self::Future {
        let peer: Option<SocketAddr> = stream.peer_addr().ok();
        let handshake = self.inner.accept(stream, service);
        let mut force_close = self.force_close.clone();

        Box::pin(async move {
            tokio::select! {
                result = handshake => {
                    if let Err(e) = &result {
                        tracing::warn!(peer = ?peer, error = %e, "TLS handshake rejected");
                    }
                    result
                }
                // A dropped sender means the server is gone; abandon as well
                _ = force_close.wait_for(|closed| *closed) => {
                    tracing::debug!(peer = ?peer, "TLS handshake abandoned at shutdown");
                    Err(io::Error::new(
                        io::ErrorKind::ConnectionAborted,
                        "server shut down during TLS handshake",
                    ))
                }
            }
        })
    }
}
