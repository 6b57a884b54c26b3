//! Certificate providers.
//!
//! A provider supplies the identity a principal presents during a TLS
//! handshake. It is consulted lazily, once per handshake, so a provider that
//! renews its certificate behind the scenes is picked up without rebuilding
//! any TLS configuration.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant, SystemTime};

use rustls::sign::CertifiedKey;
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use sha2::{Digest, Sha256};

use crate::config::PROVIDER_RELOAD_DEBOUNCE_MS;

use super::config::crypto_provider;

/// Details of an inbound handshake handed to [`CertificateProvider::server_certificate`].
#[derive(Debug, Clone, Copy)]
pub struct HandshakeInfo<'a> {
    /// Name the server was configured to authenticate as.
    pub identity: &'a str,
    /// SNI value sent by the peer, if any.
    pub server_name: Option<&'a str>,
}

/// Source of the certificates a client or server presents.
///
/// Implementations are expected to cache their certificate and renew it
/// before it expires; both methods are called on every handshake.
pub trait CertificateProvider: fmt::Debug + Send + Sync {
    /// Certificate presented to servers when acting as a client.
    fn client_certificate(&self) -> Result<Arc<CertifiedKey>, ProviderError>;

    /// Certificate presented to inbound connections.
    fn server_certificate(&self, info: &HandshakeInfo<'_>)
        -> Result<Arc<CertifiedKey>, ProviderError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no certificates found in {0}")]
    NoCertificates(PathBuf),

    #[error("invalid PEM data: {0}")]
    Pem(#[from] rustls_pki_types::pem::Error),

    #[error("unusable private key: {0}")]
    Key(#[from] rustls::Error),

    #[error("no certificate available: {0}")]
    Unavailable(String),
}

/// Provider holding one fixed key, used for both directions.
#[derive(Debug, Clone)]
pub struct StaticProvider {
    key: Arc<CertifiedKey>,
}

impl StaticProvider {
    pub fn new(key: Arc<CertifiedKey>) -> Self {
        Self { key }
    }

    /// Build from a PEM certificate chain and a PEM private key.
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self, ProviderError> {
        let chain = CertificateDer::pem_slice_iter(cert_pem).collect::<Result<Vec<_>, _>>()?;
        if chain.is_empty() {
            return Err(ProviderError::NoCertificates(PathBuf::from("<memory>")));
        }
        let key = PrivateKeyDer::from_pem_slice(key_pem)?;
        Ok(Self::new(certified_key(chain, key)?))
    }
}

impl CertificateProvider for StaticProvider {
    fn client_certificate(&self) -> Result<Arc<CertifiedKey>, ProviderError> {
        Ok(Arc::clone(&self.key))
    }

    fn server_certificate(
        &self,
        _info: &HandshakeInfo<'_>,
    ) -> Result<Arc<CertifiedKey>, ProviderError> {
        Ok(Arc::clone(&self.key))
    }
}

/// Provider backed by a certificate/key pair on disk.
///
/// Whatever renews the certificate (a CA agent, cron job, operator) rewrites
/// the files; a newer modification time is noticed on the next handshake and
/// the new key is swapped in. When a reload fails the previous key keeps
/// being served.
#[derive(Debug)]
pub struct FileProvider {
    cert_path: PathBuf,
    key_path: PathBuf,
    state: RwLock<LoadedKey>,
}

#[derive(Debug)]
struct LoadedKey {
    key: Arc<CertifiedKey>,
    modified: SystemTime,
    checked: Instant,
}

impl FileProvider {
    pub fn new(
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
    ) -> Result<Self, ProviderError> {
        let cert_path = cert_path.into();
        let key_path = key_path.into();
        let key = load_key_pair(&cert_path, &key_path)?;
        let modified = latest_modified(&cert_path, &key_path)?;

        Ok(Self {
            cert_path,
            key_path,
            state: RwLock::new(LoadedKey {
                key,
                modified,
                checked: Instant::now(),
            }),
        })
    }

    pub fn cert_path(&self) -> &Path {
        &self.cert_path
    }

    /// Re-read both files unconditionally.
    pub fn reload(&self) -> Result<(), ProviderError> {
        let key = load_key_pair(&self.cert_path, &self.key_path)?;
        let modified = latest_modified(&self.cert_path, &self.key_path)?;

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.key = key;
        state.modified = modified;
        state.checked = Instant::now();
        Ok(())
    }

    fn current(&self) -> Arc<CertifiedKey> {
        if self.check_due() {
            if let Err(e) = self.reload_if_changed() {
                tracing::warn!(
                    error = %e,
                    cert = %self.cert_path.display(),
                    "Certificate reload failed, keeping previous certificate"
                );
            }
        }
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&state.key)
    }

    fn check_due(&self) -> bool {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.checked.elapsed() >= Duration::from_millis(PROVIDER_RELOAD_DEBOUNCE_MS)
    }

    fn reload_if_changed(&self) -> Result<(), ProviderError> {
        // Claim this check so concurrent handshakes skip it
        let seen = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            if state.checked.elapsed() < Duration::from_millis(PROVIDER_RELOAD_DEBOUNCE_MS) {
                return Ok(());
            }
            state.checked = Instant::now();
            state.modified
        };

        let modified = latest_modified(&self.cert_path, &self.key_path)?;
        if modified <= seen {
            return Ok(());
        }

        // Files are read without holding the lock
        let key = load_key_pair(&self.cert_path, &self.key_path)?;

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if modified > state.modified {
            state.key = key;
            state.modified = modified;
        }
        Ok(())
    }
}

impl CertificateProvider for FileProvider {
    fn client_certificate(&self) -> Result<Arc<CertifiedKey>, ProviderError> {
        Ok(self.current())
    }

    fn server_certificate(
        &self,
        _info: &HandshakeInfo<'_>,
    ) -> Result<Arc<CertifiedKey>, ProviderError> {
        Ok(self.current())
    }
}

/// Pair a certificate chain with its private key.
pub fn certified_key(
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> Result<Arc<CertifiedKey>, ProviderError> {
    let signing_key = crypto_provider().key_provider.load_private_key(key)?;
    Ok(Arc::new(CertifiedKey::new(chain, signing_key)))
}

/// Hex SHA-256 of a DER certificate, as shown in log lines.
pub fn fingerprint(cert: &CertificateDer<'_>) -> String {
    Sha256::digest(cert.as_ref())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

fn load_key_pair(cert_path: &Path, key_path: &Path) -> Result<Arc<CertifiedKey>, ProviderError> {
    let cert_pem = read(cert_path)?;
    let key_pem = read(key_path)?;

    let chain = CertificateDer::pem_slice_iter(&cert_pem).collect::<Result<Vec<_>, _>>()?;
    let Some(leaf) = chain.first() else {
        return Err(ProviderError::NoCertificates(cert_path.to_path_buf()));
    };
    tracing::info!(
        cert = %cert_path.display(),
        fingerprint = %fingerprint(leaf),
        chain_len = chain.len(),
        "Loaded TLS certificate"
    );

    let key = PrivateKeyDer::from_pem_slice(&key_pem)?;
    certified_key(chain, key)
}

fn read(path: &Path) -> Result<Vec<u8>, ProviderError> {
    std::fs::read(path).map_err(|source| ProviderError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn latest_modified(cert_path: &Path, key_path: &Path) -> Result<SystemTime, ProviderError> {
    let modified = |path: &Path| {
        std::fs::metadata(path)
            .and_then(|m| m.modified())
            .map_err(|source| ProviderError::Read {
                path: path.to_path_buf(),
                source,
            })
    };
    Ok(modified(cert_path)?.max(modified(key_path)?))
}
