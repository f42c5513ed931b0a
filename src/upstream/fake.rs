//! Scripted in-process upstream for tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::{Upstream, UpstreamError};
use crate::http::{Request, Response, StatusCode};

type Responder = Box<dyn Fn(usize, &Request) -> Result<Response, UpstreamError> + Send + Sync>;

/// Answers through `responder(call_index, request)` after an optional
/// per-call delay, recording every request it receives.
pub(crate) struct FakeUpstream {
    name: String,
    delays: Vec<Duration>,
    calls: AtomicUsize,
    seen: Mutex<Vec<Request>>,
    responder: Responder,
}

impl FakeUpstream {
    pub(crate) fn new<F>(name: &str, responder: F) -> Self
    where
        F: Fn(usize, &Request) -> Result<Response, UpstreamError> + Send + Sync + 'static,
    {
        Self {
            name: name.to_owned(),
            delays: Vec::new(),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            responder: Box::new(responder),
        }
    }

    /// Always answers `200` with `body` as `application/json`.
    pub(crate) fn json(name: &str, body: &str) -> Self {
        let body = body.to_owned();
        Self::new(name, move |_, _| {
            Ok(Response::new(StatusCode::OK)
                .header("Content-Type", "application/json")
                .body(body.clone()))
        })
    }

    /// Always answers `200` with an HTML page naming the call index.
    pub(crate) fn html(name: &str) -> Self {
        Self::new(name, |n, req| {
            Ok(Response::new(StatusCode::OK)
                .header("Content-Type", "text/html; charset=utf-8")
                .body(format!("<html>{} #{n}</html>", req.path())))
        })
    }

    /// Always fails at the transport level.
    pub(crate) fn refusing(name: &str) -> Self {
        let upstream = name.to_owned();
        Self::new(name, move |_, _| {
            Err(UpstreamError::Transport {
                upstream: upstream.clone(),
                message: "connection refused".into(),
            })
        })
    }

    /// Delay applied to the n-th call; calls past the list are immediate.
    pub(crate) fn with_delays(mut self, delays: Vec<Duration>) -> Self {
        self.delays = delays;
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn requests(&self) -> Vec<Request> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Upstream for FakeUpstream {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, request: Request) -> Result<Response, UpstreamError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delays.get(n) {
            tokio::time::sleep(*delay).await;
        }
        (self.responder)(n, &request)
    }
}
