//! rustls client and server configuration for mutual TLS.
//!
//! Both sides trust the same root bundle. Certificates are never loaded up
//! front: a [`CertificateProvider`] is installed as the certificate callback
//! and consulted on every handshake.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use rustls::client::danger::HandshakeSignatureValid;
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::server::{VerifierBuilderError, WebPkiClientVerifier};
use rustls::{
    CertificateError, ClientConfig, DigitallySignedStruct, DistinguishedName, RootCertStore,
    ServerConfig, SignatureScheme, SupportedProtocolVersion,
};
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};

use super::provider::CertificateProvider;
use super::resolver::{ClientCertResolver, ServerCertResolver};

/// TLS 1.2 is the floor.
static PROTOCOL_VERSIONS: &[&SupportedProtocolVersion] =
    &[&rustls::version::TLS13, &rustls::version::TLS12];

/// ALPN protocols offered by the server, most preferred first.
const SERVER_ALPN: &[&[u8]] = &[b"h2", b"http/1.1"];

/// The crypto provider used for every config built here.
pub fn crypto_provider() -> Arc<CryptoProvider> {
    static PROVIDER: OnceLock<Arc<CryptoProvider>> = OnceLock::new();
    Arc::clone(PROVIDER.get_or_init(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider())))
}

/// Errors that can occur while building TLS configuration.
#[derive(Debug, thiserror::Error)]
pub enum TlsConfigError {
    #[error("failed to read trust bundle {path}: {source}")]
    TrustBundleUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid identity name: {0}")]
    InvalidIdentity(String),

    #[error("failed to build config: {0}")]
    Rustls(#[from] rustls::Error),

    #[error("failed to build client verifier: {0}")]
    Verifier(#[from] VerifierBuilderError),
}

/// Root CA certificates used to verify the peer.
///
/// Malformed PEM input does not fail: parsing stops at the first bad block
/// and whatever was read up to that point is kept, possibly nothing. An
/// empty bundle trusts no one; check [`TrustBundle::is_empty`] if that
/// should be fatal.
#[derive(Debug, Clone)]
pub struct TrustBundle {
    roots: Arc<RootCertStore>,
}

impl TrustBundle {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TlsConfigError> {
        let path = path.as_ref();
        let pem = std::fs::read(path).map_err(|source| TlsConfigError::TrustBundleUnreadable {
            path: path.to_path_buf(),
            source,
        })?;

        let bundle = Self::from_pem(&pem);
        if bundle.is_empty() {
            tracing::warn!(path = %path.display(), "Trust bundle contains no usable certificates");
        } else {
            tracing::debug!(path = %path.display(), roots = bundle.len(), "Loaded trust bundle");
        }
        Ok(bundle)
    }

    pub fn from_pem(pem: &[u8]) -> Self {
        let certs: Vec<CertificateDer<'static>> = CertificateDer::pem_slice_iter(pem)
            .map_while(Result::ok)
            .collect();

        let mut roots = RootCertStore::empty();
        let (_, ignored) = roots.add_parsable_certificates(certs);
        if ignored > 0 {
            tracing::warn!(ignored, "Skipped unparsable certificates in trust bundle");
        }

        Self {
            roots: Arc::new(roots),
        }
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn roots(&self) -> Arc<RootCertStore> {
        Arc::clone(&self.roots)
    }
}

/// Client configuration plus the name every connection authenticates against.
#[derive(Debug)]
pub struct ClientTlsConfig {
    pub config: ClientConfig,
    pub server_name: ServerName<'static>,
}

/// Build the client side of an mTLS connection.
///
/// `identity` is the name the server's certificate must carry, independent
/// of the address that ends up being dialled.
pub fn build_client_config(
    identity: &str,
    trust_bundle: impl AsRef<Path>,
    provider: Arc<dyn CertificateProvider>,
) -> Result<ClientTlsConfig, TlsConfigError> {
    client_config(identity, &TrustBundle::load(trust_bundle)?, provider)
}

pub fn client_config(
    identity: &str,
    bundle: &TrustBundle,
    provider: Arc<dyn CertificateProvider>,
) -> Result<ClientTlsConfig, TlsConfigError> {
    let server_name = ServerName::try_from(identity.to_string())
        .map_err(|_| TlsConfigError::InvalidIdentity(identity.to_string()))?;

    let config = ClientConfig::builder_with_provider(crypto_provider())
        .with_protocol_versions(PROTOCOL_VERSIONS)?
        .with_root_certificates(bundle.roots())
        .with_client_cert_resolver(Arc::new(ClientCertResolver::new(provider)));

    Ok(ClientTlsConfig {
        config,
        server_name,
    })
}

/// Build the server side of an mTLS connection.
///
/// Clients must present a certificate chaining to the bundle; there is no
/// anonymous fallback.
pub fn build_server_config(
    identity: &str,
    trust_bundle: impl AsRef<Path>,
    provider: Arc<dyn CertificateProvider>,
) -> Result<ServerConfig, TlsConfigError> {
    server_config(identity, &TrustBundle::load(trust_bundle)?, provider)
}

pub fn server_config(
    identity: &str,
    bundle: &TrustBundle,
    provider: Arc<dyn CertificateProvider>,
) -> Result<ServerConfig, TlsConfigError> {
    let verifier: Arc<dyn ClientCertVerifier> = if bundle.is_empty() {
        tracing::warn!("Empty trust bundle, all client certificates will be rejected");
        Arc::new(RejectAllClients::new(crypto_provider()))
    } else {
        WebPkiClientVerifier::builder_with_provider(bundle.roots(), crypto_provider()).build()?
    };

    let mut config = ServerConfig::builder_with_provider(crypto_provider())
        .with_protocol_versions(PROTOCOL_VERSIONS)?
        .with_client_cert_verifier(verifier)
        .with_cert_resolver(Arc::new(ServerCertResolver::new(identity, provider)));
    config.alpn_protocols = SERVER_ALPN.iter().map(|p| p.to_vec()).collect();

    Ok(config)
}

/// Client verifier for a server that trusts nothing.
///
/// The WebPKI verifier refuses to build without trust anchors, so an empty
/// bundle gets this instead: client auth is still requested and every
/// certificate fails with `UnknownIssuer`.
#[derive(Debug)]
struct RejectAllClients {
    provider: Arc<CryptoProvider>,
}

impl RejectAllClients {
    fn new(provider: Arc<CryptoProvider>) -> Self {
        Self { provider }
    }
}

impl ClientCertVerifier for RejectAllClients {
    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        Err(rustls::Error::InvalidCertificate(
            CertificateError::UnknownIssuer,
        ))
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::provider::StaticProvider;
    use crate::tls::test_pki::TestPki;

    fn provider(pki: &TestPki, name: &str) -> Arc<dyn CertificateProvider> {
        let leaf = pki.leaf(name);
        Arc::new(
            StaticProvider::from_pem(leaf.cert_pem.as_bytes(), leaf.key_pem.as_bytes()).unwrap(),
        )
    }

    #[test]
    fn unreadable_trust_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let err = TrustBundle::load(dir.path().join("missing.crt")).unwrap_err();
        assert!(matches!(err, TlsConfigError::TrustBundleUnreadable { .. }));
    }

    #[test]
    fn malformed_trust_bundle_is_empty() {
        let bundle = TrustBundle::from_pem(b"this is not PEM at all");
        assert!(bundle.is_empty());

        let bundle = TrustBundle::from_pem(
            b"-----BEGIN CERTIFICATE-----\nnot base64!\n-----END CERTIFICATE-----\n",
        );
        assert!(bundle.is_empty());
    }

    #[test]
    fn trust_bundle_skips_non_certificate_sections() {
        let pki = TestPki::new();
        let leaf = pki.leaf("unused");
        let pem = format!("{}{}", leaf.key_pem, pki.ca_pem());

        let bundle = TrustBundle::from_pem(pem.as_bytes());
        assert_eq!(bundle.len(), 1);
    }

    #[test]
    fn trust_bundle_loads_from_file() {
        let pki = TestPki::new();
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), pki.ca_pem()).unwrap();

        let bundle = TrustBundle::load(file.path()).unwrap();
        assert_eq!(bundle.len(), 1);
    }

    #[test]
    fn trust_bundle_keeps_every_root() {
        let first = TestPki::new();
        let second = TestPki::named("second test CA");
        let pem = format!("{}{}", first.ca_pem(), second.ca_pem());

        assert_eq!(TrustBundle::from_pem(pem.as_bytes()).len(), 2);
    }

    #[test]
    fn client_config_presents_provider_certificate() {
        let pki = TestPki::new();
        let bundle = TrustBundle::from_pem(pki.ca_pem().as_bytes());

        let tls = client_config("my.server", &bundle, provider(&pki, "my.client")).unwrap();
        assert!(tls.config.client_auth_cert_resolver.has_certs());
        assert_eq!(
            tls.server_name,
            ServerName::try_from("my.server".to_string()).unwrap()
        );
    }

    #[test]
    fn client_config_rejects_invalid_identity() {
        let pki = TestPki::new();
        let bundle = TrustBundle::from_pem(pki.ca_pem().as_bytes());

        let err = client_config("not a name", &bundle, provider(&pki, "my.client")).unwrap_err();
        assert!(matches!(err, TlsConfigError::InvalidIdentity(_)));
    }

    #[test]
    fn server_config_advertises_alpn() {
        let pki = TestPki::new();
        let bundle = TrustBundle::from_pem(pki.ca_pem().as_bytes());

        let config = server_config("my.server", &bundle, provider(&pki, "my.server")).unwrap();
        assert_eq!(
            config.alpn_protocols,
            vec![b"h2".to_vec(), b"http/1.1".to_vec()]
        );
    }

    #[test]
    fn server_config_with_empty_bundle_still_builds() {
        let pki = TestPki::new();
        let bundle = TrustBundle::from_pem(b"");

        assert!(server_config("my.server", &bundle, provider(&pki, "my.server")).is_ok());
    }

    #[test]
    fn reject_all_verifier_requires_and_rejects() {
        let pki = TestPki::new();
        let leaf = pki.leaf("my.client");
        let verifier = RejectAllClients::new(crypto_provider());

        assert!(verifier.offer_client_auth());
        assert!(verifier.client_auth_mandatory());
        let result = verifier.verify_client_cert(
            &CertificateDer::from(leaf.cert_der),
            &[],
            UnixTime::now(),
        );
        assert!(result.is_err());
    }
}
