//! Shared fixtures: throwaway PKI and servers bound to ephemeral ports.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use bytes::Bytes;
use http::Request;
use http_body_util::Full;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use tandem::http::{Server, ServerError, ServerOptions, SniClient};
use tandem::tls::{CertificateProvider, StaticProvider};

#[path = "../../src/tls/test_pki.rs"]
mod test_pki;

pub(crate) use test_pki::TestPki;

pub const IDENTITY: &str = "my.server";

/// Write the CA certificate to `dir/<file>`.
pub fn write_ca(pki: &TestPki, dir: &Path, file: &str) -> PathBuf {
    let path = dir.join(file);
    std::fs::write(&path, pki.ca_pem()).unwrap();
    path
}

/// Provider holding a fresh leaf for `name`, usable as client or server.
pub fn provider(pki: &TestPki, name: &str) -> Arc<dyn CertificateProvider> {
    let leaf = pki.leaf(name);
    let provider =
        StaticProvider::from_pem(leaf.cert_pem.as_bytes(), leaf.key_pem.as_bytes()).unwrap();
    Arc::new(provider)
}

/// A server running in the background until `stop` is called.
pub struct Running {
    pub server: Arc<Server>,
    pub addr: SocketAddr,
    stop: watch::Sender<bool>,
    task: JoinHandle<Result<(), ServerError>>,
}

impl Running {
    /// Fire the cancellation signal. Safe to call more than once.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    /// Wait for `serve` to return.
    pub async fn join(self) -> Result<(), ServerError> {
        tokio::time::timeout(Duration::from_secs(10), self.task)
            .await
            .expect("server did not stop")
            .expect("server task panicked")
    }

    pub fn url(&self, path: &str) -> String {
        format!("https://{}{}", self.addr, path)
    }
}

pub async fn start(
    router: Router,
    provider: Arc<dyn CertificateProvider>,
    trust_bundle: PathBuf,
    shutdown_timeout: Duration,
) -> Running {
    let options = ServerOptions {
        bind: "127.0.0.1:0".to_string(),
        identity: IDENTITY.to_string(),
        trust_bundle,
        shutdown_timeout,
    };
    let server = Arc::new(Server::new(options, router, provider).unwrap());

    let (stop, mut stopped) = watch::channel(false);
    let signal = async move {
        let _ = stopped.wait_for(|stop| *stop).await;
    };

    let task = tokio::spawn({
        let server = Arc::clone(&server);
        async move { server.serve(signal).await }
    });
    let addr = server.listening().await.expect("server failed to bind");

    Running {
        server,
        addr,
        stop,
        task,
    }
}

pub fn client(
    trust_bundle: &Path,
    provider: Arc<dyn CertificateProvider>,
    identity: &str,
) -> SniClient {
    SniClient::new(identity, trust_bundle, provider).unwrap()
}

pub fn get(url: &str) -> Request<Full<Bytes>> {
    Request::get(url).body(Full::new(Bytes::new())).unwrap()
}
