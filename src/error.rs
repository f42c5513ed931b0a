//! Request-level failures and how they look on the wire.
//!
//! Every variant maps to an explicit status code and a stable reason tag.
//! Clients receive a small JSON body and an `X-Router-Error` header, never
//! internal detail beyond the error's display text.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::http::{Response, StatusCode};
use crate::upstream::UpstreamError;

/// Header carrying the machine-readable reason on failed or shed requests.
pub const ROUTER_ERROR_HEADER: &str = "X-Router-Error";

/// Which side of the edge a failure happened on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Origin,
    Renderer,
}

impl Backend {
    fn as_str(self) -> &'static str {
        match self {
            Self::Origin => "origin",
            Self::Renderer => "renderer",
        }
    }
}

#[derive(Debug, Error)]
pub enum EdgeError {
    /// Deadline exceeded on an upstream call (after the retry, on the rendering path).
    #[error("{backend:?} timed out: {source}")]
    Timeout {
        backend: Backend,
        #[source]
        source: UpstreamError,
    },

    /// Non-timeout transport failure on an upstream call.
    #[error("{backend:?} unavailable: {source}")]
    Upstream {
        backend: Backend,
        #[source]
        source: UpstreamError,
    },

    /// A required backend binding is absent.
    #[error("{0:?} backend is not configured")]
    Configuration(Backend),

    /// The concurrency gate shed the request.
    #[error("too many in-flight render calls")]
    Overloaded { retry_after: Duration },
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
}

impl EdgeError {
    /// Classifies an upstream failure against the backend it came from.
    pub fn from_upstream(backend: Backend, source: UpstreamError) -> Self {
        if source.is_timeout() {
            Self::Timeout { backend, source }
        } else {
            Self::Upstream { backend, source }
        }
    }

    /// Stable machine-readable tag, e.g. `render_timeout`.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Timeout {
                backend: Backend::Origin,
                ..
            } => "origin_timeout",
            Self::Timeout {
                backend: Backend::Renderer,
                ..
            } => "render_timeout",
            Self::Upstream {
                backend: Backend::Origin,
                ..
            } => "origin_unavailable",
            Self::Upstream {
                backend: Backend::Renderer,
                ..
            } => "render_failed",
            Self::Configuration(Backend::Origin) => "origin_unconfigured",
            Self::Configuration(Backend::Renderer) => "renderer_unconfigured",
            Self::Overloaded { .. } => "overloaded",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Timeout {
                backend: Backend::Origin,
                ..
            } => StatusCode::GATEWAY_TIMEOUT,
            Self::Upstream {
                backend: Backend::Origin,
                ..
            } => StatusCode::BAD_GATEWAY,
            Self::Timeout {
                backend: Backend::Renderer,
                ..
            }
            | Self::Upstream {
                backend: Backend::Renderer,
                ..
            }
            | Self::Overloaded { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn into_response(self) -> Response {
        let message = match &self {
            Self::Timeout { backend, .. } => format!("{} did not respond in time", backend.as_str()),
            Self::Upstream { backend, .. } => format!("{} is unavailable", backend.as_str()),
            Self::Configuration(backend) => format!("{} is not configured", backend.as_str()),
            Self::Overloaded { .. } => "server is busy, retry shortly".to_owned(),
        };
        let reason = self.reason();
        let mut response = Response::json(
            self.status(),
            &ErrorBody {
                error: reason,
                message,
            },
        )
        .header(ROUTER_ERROR_HEADER, reason);

        if let Self::Overloaded { retry_after } = self {
            response.add_header("Retry-After", retry_after.as_secs().max(1).to_string());
        }
        response
    }
}
