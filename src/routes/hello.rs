use axum::Extension;

use crate::middleware::RequestId;

pub const HELLO_BODY: &str = "hello world";

pub async fn hello(Extension(RequestId(id)): Extension<RequestId>) -> &'static str {
    tracing::info!(request_id = %id, "request received");
    HELLO_BODY
}
