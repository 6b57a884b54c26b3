//! HTTPS client that authenticates a fixed server identity.
//!
//! When several hosts with different addresses share one certificate, the
//! name to verify is not the name in the URL. This client dials whatever
//! address the request URI carries, but sends IdentityName as SNI, verifies
//! the server certificate against it, and sets it as the `Host` header. It
//! also presents a client certificate from a [`CertificateProvider`].
//!
//! Requests to hosts whose certificate is not valid for IdentityName fail
//! during the handshake.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{HeaderValue, HOST, USER_AGENT};
use http::{Request, Response};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper_rustls::{FixedServerNameResolver, HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use crate::config::{
    CLIENT_CONNECT_TIMEOUT_SECS, CLIENT_POOL_IDLE_TIMEOUT_SECS, CLIENT_POOL_MAX_IDLE_PER_HOST,
    USER_AGENT as USER_AGENT_VALUE,
};
use crate::tls::{build_client_config, CertificateProvider, TlsConfigError};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Failed to load TLS configuration: {0}")]
    Tls(#[from] TlsConfigError),

    /// Connection, handshake or protocol failure. The handshake cause is
    /// reachable through `source()`.
    #[error("Request failed: {0}")]
    Transport(#[from] hyper_util::client::legacy::Error),

    #[error("Failed to read response body: {0}")]
    Body(#[from] hyper::Error),
}

/// Pooled mTLS client bound to one server identity.
#[derive(Clone)]
pub struct SniClient {
    inner: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
    identity: String,
    host: HeaderValue,
}

impl SniClient {
    /// Build a client that authenticates servers as `identity`.
    pub fn new(
        identity: &str,
        trust_bundle: impl AsRef<Path>,
        provider: Arc<dyn CertificateProvider>,
    ) -> Result<Self, ClientError> {
        let tls = build_client_config(identity, trust_bundle, provider)?;
        let host = HeaderValue::from_str(identity)
            .map_err(|_| TlsConfigError::InvalidIdentity(identity.to_string()))?;

        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_nodelay(true);
        http.set_connect_timeout(Some(Duration::from_secs(CLIENT_CONNECT_TIMEOUT_SECS)));

        let https = HttpsConnectorBuilder::new()
            .with_tls_config(tls.config)
            .https_only()
            .with_server_name_resolver(FixedServerNameResolver::new(tls.server_name))
            .enable_http1()
            .wrap_connector(http);

        let inner = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(CLIENT_POOL_IDLE_TIMEOUT_SECS))
            .pool_max_idle_per_host(CLIENT_POOL_MAX_IDLE_PER_HOST)
            .build(https);

        Ok(Self {
            inner,
            identity: identity.to_string(),
            host,
        })
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Overwrite the request's `Host` header with the client identity.
    ///
    /// This mutates the caller's request in place. Any previous `Host` value
    /// is lost, so a request prepared for this client should not be reused
    /// elsewhere without resetting it.
    pub fn rewrite_host<B>(&self, request: &mut Request<B>) {
        request.headers_mut().insert(HOST, self.host.clone());
    }

    /// Send a request to the address in its URI, authenticating as IdentityName.
    ///
    /// The request is consumed; build a fresh one for every call.
    pub async fn execute(
        &self,
        mut request: Request<Full<Bytes>>,
    ) -> Result<Response<Incoming>, ClientError> {
        self.rewrite_host(&mut request);
        request
            .headers_mut()
            .entry(USER_AGENT)
            .or_insert(HeaderValue::from_static(USER_AGENT_VALUE));

        let response = self.inner.request(request).await?;
        Ok(response)
    }
}

/// Send a request and collect the whole response body.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, request: Request<Full<Bytes>>) -> Result<Response<Bytes>, ClientError>;
}

#[async_trait]
impl Fetch for SniClient {
    async fn fetch(&self, request: Request<Full<Bytes>>) -> Result<Response<Bytes>, ClientError> {
        let (parts, body) = self.execute(request).await?.into_parts();
        let body = body.collect().await?.to_bytes();
        Ok(Response::from_parts(parts, body))
    }
}
