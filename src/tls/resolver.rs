//! Glue between a [`CertificateProvider`] and the rustls certificate callbacks.

use std::sync::Arc;

use rustls::client::ResolvesClientCert;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::SignatureScheme;

use super::provider::{CertificateProvider, HandshakeInfo};

/// Presents the provider's client certificate on outbound handshakes.
///
/// A provider failure leaves the handshake without a certificate, which a
/// server requiring client authentication rejects.
#[derive(Debug)]
pub struct ClientCertResolver {
    provider: Arc<dyn CertificateProvider>,
}

impl ClientCertResolver {
    pub fn new(provider: Arc<dyn CertificateProvider>) -> Self {
        Self { provider }
    }
}

impl ResolvesClientCert for ClientCertResolver {
    fn resolve(
        &self,
        _root_hint_subjects: &[&[u8]],
        _sigschemes: &[SignatureScheme],
    ) -> Option<Arc<CertifiedKey>> {
        match self.provider.client_certificate() {
            Ok(key) => Some(key),
            Err(e) => {
                tracing::warn!(error = %e, "Certificate provider returned no client certificate");
                None
            }
        }
    }

    fn has_certs(&self) -> bool {
        true
    }
}

/// Presents the provider's server certificate on inbound handshakes.
#[derive(Debug)]
pub struct ServerCertResolver {
    identity: String,
    provider: Arc<dyn CertificateProvider>,
}

impl ServerCertResolver {
    pub fn new(identity: impl Into<String>, provider: Arc<dyn CertificateProvider>) -> Self {
        Self {
            identity: identity.into(),
            provider,
        }
    }
}

impl ResolvesServerCert for ServerCertResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let info = HandshakeInfo {
            identity: &self.identity,
            server_name: client_hello.server_name(),
        };

        if info.server_name.is_some_and(|sni| sni != self.identity) {
            tracing::debug!(
                identity = %self.identity,
                sni = ?info.server_name,
                "Client requested a different server name"
            );
        }

        match self.provider.server_certificate(&info) {
            Ok(key) => Some(key),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    identity = %self.identity,
                    "Certificate provider returned no server certificate"
                );
                None
            }
        }
    }
}
