//! HTTPS over mutual TLS.
//!
//! - [`client`]: pooled client that authenticates a fixed server identity
//!   regardless of the dialled address
//! - [`server`]: bind/serve/shutdown lifecycle requiring client certificates
//! - [`shutdown`]: signal handling and merged shutdown errors

mod acceptor;
pub mod client;
pub mod server;
pub mod shutdown;

pub use client::{ClientError, Fetch, SniClient};
pub use server::{Server, ServerError, ServerOptions, ServerState};
pub use shutdown::{setup_reload_handler, shutdown_signal, ShutdownError};
