//! Tandem: mutually authenticated HTTPS between services sharing one identity.
//!
//! Every server presents a certificate for the same IdentityName and every
//! client presents its own certificate signed by a shared root CA. The client
//! dials any server address while verifying, and announcing, that one name.

pub mod config;
pub mod http;
pub mod middleware;
pub mod poll;
pub mod routes;
pub mod tls;
