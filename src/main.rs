//! Tandem: mTLS server and client sharing one identity.
//!
//! This is the application entry point. It initializes tracing, loads the
//! optional TOML configuration, applies command-line overrides, then runs
//! either the HTTPS server or the polling client until SIGINT/SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args as ClapArgs, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tandem::config::{AppConfig, TlsSettings, DEFAULT_LOG_FILTER};
use tandem::http::{
    setup_reload_handler, shutdown_signal, Server, ServerOptions, SniClient,
};
use tandem::poll::request_loop;
use tandem::routes::create_router;
use tandem::tls::FileProvider;

/// Tandem: mutually authenticated HTTPS with a fixed server identity
#[derive(Parser, Debug)]
#[command(name = "tandem", version, about)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level filter (e.g., "tandem=debug,rustls=info")
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve /hello over HTTPS, requiring client certificates
    Server(ServerArgs),
    /// Request /hello from a server once per interval
    Client(ClientArgs),
}

#[derive(ClapArgs, Debug)]
struct ServerArgs {
    /// The ip:port to bind the API server to
    #[arg(long)]
    bind: Option<String>,

    /// Name the server certificate is issued for
    #[arg(long)]
    server_name: Option<String>,

    #[command(flatten)]
    tls: TlsArgs,
}

#[derive(ClapArgs, Debug)]
struct ClientArgs {
    /// The ip:port of the API server
    #[arg(long)]
    server: Option<String>,

    /// Name the server certificate must carry
    #[arg(long)]
    server_name: Option<String>,

    #[command(flatten)]
    tls: TlsArgs,
}

#[derive(ClapArgs, Debug)]
struct TlsArgs {
    /// Path to the root CA certificate
    #[arg(long)]
    ca_cert: Option<PathBuf>,

    /// Path to this process's certificate chain
    #[arg(long)]
    cert: Option<PathBuf>,

    /// Path to this process's private key
    #[arg(long)]
    key: Option<PathBuf>,
}

impl TlsArgs {
    fn apply(self, tls: &mut TlsSettings) {
        if let Some(ca_cert) = self.ca_cert {
            tls.ca_cert = ca_cert;
        }
        if let Some(cert) = self.cert {
            tls.cert = cert;
        }
        if let Some(key) = self.key {
            tls.key = key;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };

    // Initialize tracing with priority: CLI > env > default
    let log_filter = args
        .log_level
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

    let registry =
        tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::new(&log_filter));
    if config.logging.is_json() {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    let result = match args.command {
        Command::Server(server_args) => {
            if let Some(bind) = server_args.bind {
                config.server.bind = bind;
            }
            if let Some(identity) = server_args.server_name {
                config.server.identity = identity;
            }
            server_args.tls.apply(&mut config.tls);
            config.validate()?;
            run_server(config).await
        }
        Command::Client(client_args) => {
            if let Some(server) = client_args.server {
                config.client.server = server;
            }
            if let Some(identity) = client_args.server_name {
                config.client.identity = identity;
            }
            client_args.tls.apply(&mut config.tls);
            config.validate()?;
            run_client(config).await
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Exiting with error");
    }
    result
}

async fn run_server(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let provider = Arc::new(FileProvider::new(&config.tls.cert, &config.tls.key)?);
    setup_reload_handler(Arc::clone(&provider));

    let options = ServerOptions {
        bind: config.server.bind.clone(),
        identity: config.server.identity.clone(),
        trust_bundle: config.tls.ca_cert.clone(),
        shutdown_timeout: config.server.shutdown_timeout(),
    };

    let server = Server::new(options, create_router(), provider)?;
    tracing::info!(bind = %config.server.bind, "Starting API server");

    server.serve(shutdown_signal()).await?;
    Ok(())
}

async fn run_client(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let provider = Arc::new(FileProvider::new(&config.tls.cert, &config.tls.key)?);
    setup_reload_handler(Arc::clone(&provider));

    let client = SniClient::new(&config.client.identity, &config.tls.ca_cert, provider)?;
    let url = config.client.url();
    tracing::info!(
        %url,
        identity = %client.identity(),
        interval = ?config.client.request_interval(),
        "Starting request loop"
    );

    request_loop(&client, config.client.request_interval(), &url, shutdown_signal()).await?;
    Ok(())
}
