//! Upstream backends: the content origin and the rendering service.
//!
//! Both backends sit behind the object-safe [`Upstream`] trait so the edge
//! never depends on a concrete HTTP client. Every call the edge makes goes
//! through [`with_deadline`]; retry is composed at the call site with
//! [`send_with_retry`].

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::http::{Request, Response};

mod client;
mod deadline;
#[cfg(test)]
pub(crate) mod fake;

pub use client::HttpUpstream;
pub use deadline::{send_with_retry, with_deadline};

/// Failure of a single upstream call.
///
/// A response with a non-success status is *not* an error here: it is a
/// valid answer that is relayed or refused by cache admission.
#[derive(Debug, Clone, Error)]
pub enum UpstreamError {
    #[error("{upstream} did not answer within {}ms", deadline.as_millis())]
    Timeout { upstream: String, deadline: Duration },

    #[error("{upstream} request failed: {message}")]
    Transport { upstream: String, message: String },
}

impl UpstreamError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Name of the backend that failed.
    pub fn upstream(&self) -> &str {
        match self {
            Self::Timeout { upstream, .. } | Self::Transport { upstream, .. } => upstream,
        }
    }
}

/// A backend that accepts a forwarded request and answers with a full response.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Short name used in logs, error tags and probe reports.
    fn name(&self) -> &str;

    /// Sends `request` and buffers the whole response.
    ///
    /// Implementations impose no deadline of their own; callers wrap this in
    /// [`with_deadline`].
    async fn send(&self, request: Request) -> Result<Response, UpstreamError>;
}
