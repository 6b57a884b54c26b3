//! Configuration loading and constants.
//!
//! Everything the binaries need is carried in an explicit [`AppConfig`]
//! passed into constructors. Values come from built-in defaults, an optional
//! TOML file, and finally command-line overrides applied in `main`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use const_format::formatcp;
use serde::Deserialize;

// =============================================================================
// Network Defaults
// =============================================================================

/// Port used by both the server bind address and the client target
pub const DEFAULT_PORT: u16 = 5000;

/// Address the server binds to
pub const DEFAULT_BIND_ADDR: &str = formatcp!("0.0.0.0:{}", DEFAULT_PORT);

/// Address the client dials
pub const DEFAULT_SERVER_ADDR: &str = formatcp!("0.0.0.0:{}", DEFAULT_PORT);

/// Name the server certificate is issued for and the client authenticates against
pub const DEFAULT_SERVER_IDENTITY: &str = "my.server";

/// Path polled by the client
pub const DEFAULT_REQUEST_PATH: &str = "/hello";

/// User-Agent sent by the client
pub const USER_AGENT: &str = formatcp!("tandem/{}", env!("CARGO_PKG_VERSION"));

// =============================================================================
// Timing
// =============================================================================

/// Upper bound on draining in-flight requests at shutdown
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 5;

/// Delay between client requests
pub const DEFAULT_REQUEST_INTERVAL_MS: u64 = 1000;

/// How often the connection count is checked while draining
pub const SHUTDOWN_DRAIN_POLL_MS: u64 = 10;

/// Minimum gap between modification-time checks of certificate files
pub const PROVIDER_RELOAD_DEBOUNCE_MS: u64 = 1000;

// =============================================================================
// Client Connection Pool
// =============================================================================

/// Idle pooled connections are closed after this many seconds
pub const CLIENT_POOL_IDLE_TIMEOUT_SECS: u64 = 90;

/// Maximum idle connections kept per host
pub const CLIENT_POOL_MAX_IDLE_PER_HOST: usize = 100;

/// TCP connect timeout
pub const CLIENT_CONNECT_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// Default Paths and Strings
// =============================================================================

/// Root CA bundle used to verify peers
pub const DEFAULT_CA_CERT_PATH: &str = "cert/ca.crt";

/// Certificate chain presented to peers
pub const DEFAULT_CERT_PATH: &str = "cert/tls.crt";

/// Private key for the presented certificate
pub const DEFAULT_KEY_PATH: &str = "cert/tls.key";

/// Default log filter when RUST_LOG is not set
pub const DEFAULT_LOG_FILTER: &str = "tandem=info";

/// Default log format (text or json)
pub const DEFAULT_LOG_FORMAT: &str = "text";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub client: ClientSettings,
    #[serde(default)]
    pub tls: TlsSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Settings for the `server` subcommand
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "ServerSettings::default_bind")]
    pub bind: String,
    /// Name the server's certificate is issued for
    #[serde(default = "default_identity")]
    pub identity: String,
    #[serde(default = "ServerSettings::default_shutdown_timeout")]
    pub shutdown_timeout_seconds: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: Self::default_bind(),
            identity: default_identity(),
            shutdown_timeout_seconds: Self::default_shutdown_timeout(),
        }
    }
}

impl ServerSettings {
    fn default_bind() -> String {
        DEFAULT_BIND_ADDR.to_string()
    }

    fn default_shutdown_timeout() -> u64 {
        DEFAULT_SHUTDOWN_TIMEOUT_SECS
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }
}

/// Settings for the `client` subcommand
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSettings {
    /// Network address dialled, host:port
    #[serde(default = "ClientSettings::default_server")]
    pub server: String,
    /// Name the server's certificate must carry (sent as SNI and Host)
    #[serde(default = "default_identity")]
    pub identity: String,
    #[serde(default = "ClientSettings::default_path")]
    pub path: String,
    #[serde(default = "ClientSettings::default_interval")]
    pub request_interval_ms: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server: Self::default_server(),
            identity: default_identity(),
            path: Self::default_path(),
            request_interval_ms: Self::default_interval(),
        }
    }
}

impl ClientSettings {
    fn default_server() -> String {
        DEFAULT_SERVER_ADDR.to_string()
    }

    fn default_path() -> String {
        DEFAULT_REQUEST_PATH.to_string()
    }

    fn default_interval() -> u64 {
        DEFAULT_REQUEST_INTERVAL_MS
    }

    pub fn request_interval(&self) -> Duration {
        Duration::from_millis(self.request_interval_ms)
    }

    /// URL requested on every tick
    pub fn url(&self) -> String {
        format!("https://{}{}", self.server, self.path)
    }
}

/// Certificate material shared by both subcommands
#[derive(Debug, Clone, Deserialize)]
pub struct TlsSettings {
    #[serde(default = "TlsSettings::default_ca_cert")]
    pub ca_cert: PathBuf,
    #[serde(default = "TlsSettings::default_cert")]
    pub cert: PathBuf,
    #[serde(default = "TlsSettings::default_key")]
    pub key: PathBuf,
}

impl Default for TlsSettings {
    fn default() -> Self {
        Self {
            ca_cert: Self::default_ca_cert(),
            cert: Self::default_cert(),
            key: Self::default_key(),
        }
    }
}

impl TlsSettings {
    fn default_ca_cert() -> PathBuf {
        PathBuf::from(DEFAULT_CA_CERT_PATH)
    }

    fn default_cert() -> PathBuf {
        PathBuf::from(DEFAULT_CERT_PATH)
    }

    fn default_key() -> PathBuf {
        PathBuf::from(DEFAULT_KEY_PATH)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "text" (human-readable, default) or "json" (structured)
    #[serde(default = "LoggingConfig::default_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: DEFAULT_LOG_FORMAT.to_string(),
        }
    }
}

impl LoggingConfig {
    fn default_format() -> String {
        DEFAULT_LOG_FORMAT.to_string()
    }

    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

fn default_identity() -> String {
    DEFAULT_SERVER_IDENTITY.to_string()
}

impl AppConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.shutdown_timeout_seconds == 0 {
            return Err(ConfigError::Validation(
                "server.shutdown_timeout_seconds must be greater than zero".to_string(),
            ));
        }
        if self.client.request_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "client.request_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.server.identity.is_empty() || self.client.identity.is_empty() {
            return Err(ConfigError::Validation(
                "identity names must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Configuration error: {0}")]
    Validation(String),
}
