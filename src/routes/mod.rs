//! HTTP route handlers served behind mutual TLS.
//!
//! Request tracing is enabled via middleware that generates a unique request ID
//! for each incoming request, allowing correlation of all logs within a request.

pub mod health;
pub mod hello;

use axum::{middleware, routing::get, Router};

use crate::middleware::request_id_layer;

/// Build the application router.
pub fn create_router() -> Router {
    Router::new()
        .route("/hello", get(hello::hello))
        .route("/health", get(health::health))
        // Request ID layer must be outermost to wrap all request processing
        .layer(middleware::from_fn(request_id_layer))
}
