//! Liveness check.

/// Returns "ok" whenever the process can answer over mTLS.
pub async fn health() -> &'static str {
    "ok"
}
