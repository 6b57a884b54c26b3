//! Periodic request loop driven by the `client` subcommand.

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use http::Request;
use http_body_util::Full;

use crate::http::{ClientError, Fetch};

#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("build request: {0}")]
    Request(#[from] http::Error),

    #[error("do request: {0}")]
    Fetch(#[from] ClientError),
}

/// GET `url` every `interval` until `shutdown` resolves.
///
/// The first request goes out one interval after the call. Each response's
/// status and body are logged. A failed request ends the loop with an error;
/// the shutdown signal ends it cleanly, cancelling a request in flight.
pub async fn request_loop<C, F>(
    client: &C,
    interval: Duration,
    url: &str,
    shutdown: F,
) -> Result<(), PollError>
where
    C: Fetch + ?Sized,
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    loop {
        let tick = async {
            tokio::time::sleep(interval).await;
            let request = Request::get(url).body(Full::new(Bytes::new()))?;
            let response = client.fetch(request).await?;
            tracing::info!(
                status = response.status().as_u16(),
                body = %String::from_utf8_lossy(response.body()),
                "Response received"
            );
            Ok::<(), PollError>(())
        };

        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Request loop stopped");
                return Ok(());
            }
            result = tick => result?,
        }
    }
}
