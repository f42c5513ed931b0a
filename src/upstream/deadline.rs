//! Deadline wrapper and the one-retry composition used on the rendering path.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use super::{Upstream, UpstreamError};
use crate::http::{Request, Response};

/// Runs `call` and fails with [`UpstreamError::Timeout`] if it does not finish
/// within `deadline`.
///
/// No retry happens here. The timed-out future is dropped, which cancels the
/// in-flight request.
pub async fn with_deadline<F, T>(
    upstream: &str,
    deadline: Duration,
    call: F,
) -> Result<T, UpstreamError>
where
    F: Future<Output = Result<T, UpstreamError>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(UpstreamError::Timeout {
            upstream: upstream.to_owned(),
            deadline,
        }),
    }
}

/// Sends `request` under `deadline`, retrying exactly once on failure.
///
/// Both timeouts and transport failures are retried; a second failure is
/// returned to the caller. `on_retry` observes the first failure before the
/// retry is issued.
pub async fn send_with_retry<R>(
    upstream: &dyn Upstream,
    request: &Request,
    deadline: Duration,
    on_retry: R,
) -> Result<Response, UpstreamError>
where
    R: FnOnce(&UpstreamError),
{
    let first = with_deadline(upstream.name(), deadline, upstream.send(request.clone())).await;
    let err = match first {
        Ok(response) => return Ok(response),
        Err(err) => err,
    };

    warn!(
        upstream = upstream.name(),
        path = %request.path(),
        timeout = err.is_timeout(),
        error = %err,
        "upstream call failed, retrying once"
    );
    on_retry(&err);

    with_deadline(upstream.name(), deadline, upstream.send(request.clone())).await
}
