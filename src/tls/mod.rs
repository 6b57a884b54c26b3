//! Mutual TLS building blocks.
//!
//! - [`provider`]: where certificates come from
//! - [`resolver`]: rustls callbacks wrapping a provider
//! - [`config`]: trust bundle loading and client/server configuration

pub mod config;
pub mod provider;
pub mod resolver;

#[cfg(test)]
pub(crate) mod test_pki;

pub use config::{
    build_client_config, build_server_config, client_config, server_config, ClientTlsConfig,
    TlsConfigError, TrustBundle,
};
pub use provider::{
    certified_key, fingerprint, CertificateProvider, FileProvider, HandshakeInfo, ProviderError,
    StaticProvider,
};
