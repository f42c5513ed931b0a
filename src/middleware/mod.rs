//! Middleware pipeline: composable before/after request handler logic.
//!
//! The edge runs every request through the same ordered chain:
//!
//! 1. [`LoggerMiddleware`]: one access-log line per request.
//! 2. [`ClassifyMiddleware`]: counts the request, classifies it, and
//!    short-circuits blocked traffic with `403`.
//! 3. the terminal dispatcher installed by [`EdgeService`](crate::edge::EdgeService).
//!
//! ## Core types
//!
//! - [`Middleware`]: trait implemented by all middleware.
//! - [`Next`]: cursor into the remaining middleware chain; call [`Next::run`] to
//!   advance to the next layer.
//! - [`MiddlewareHandler`]: type-erased, cheaply-cloneable middleware function.
//! - [`from_middleware`]: converts a [`Middleware`] into a [`MiddlewareHandler`].

use std::{future::Future, pin::Pin, sync::Arc};

use serde_json::json;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::cache::CACHE_STATUS_HEADER;
use crate::context::Context;
use crate::error::ROUTER_ERROR_HEADER;
use crate::http::{Response, StatusCode};
use crate::router::{BlockReason, Classification, Classifier};
use crate::stats::Stats;

/// A cursor into the remaining middleware chain for a single request.
///
/// `Next` is consumed on each call to [`run`](Self::run), so it cannot be called
/// more than once per middleware invocation.
pub struct Next {
    middlewares: Arc<[MiddlewareHandler]>,
    // Tracks which middleware to invoke on the next `run` call.
    index: usize,
}

/// Boxed response future returned by every middleware.
pub type ResponseFuture = Pin<Box<dyn Future<Output = Response> + Send>>;

/// A type-erased, reference-counted middleware function.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use frontdoor::{context::Context, middleware::{MiddlewareHandler, Next, ResponseFuture}};
///
/// let handler: MiddlewareHandler = Arc::new(|ctx: Context, next: Next| {
///     Box::pin(async move { next.run(ctx).await }) as ResponseFuture
/// });
/// ```
pub type MiddlewareHandler =
    Arc<dyn Fn(Context, Next) -> ResponseFuture + Send + Sync + 'static>;

/// Converts a [`Middleware`] implementation into a [`MiddlewareHandler`].
pub fn from_middleware<M>(middleware: Arc<M>) -> MiddlewareHandler
where
    M: Middleware + 'static,
{
    Arc::new(move |ctx: Context, next: Next| middleware.handle(ctx, next))
}

impl Next {
    /// Creates a new `Next` positioned at the start of the given chain.
    pub fn new(middlewares: Arc<[MiddlewareHandler]>) -> Self {
        Self {
            middlewares,
            index: 0,
        }
    }

    /// Invokes the next middleware in the chain and returns its response.
    ///
    /// An exhausted chain answers `500`; a correctly assembled pipeline always
    /// ends in a handler that does not call `next`.
    pub async fn run(mut self, ctx: Context) -> Response {
        match self.middlewares.get(self.index).cloned() {
            Some(handler) => {
                self.index += 1;
                handler(ctx, self).await
            }
            None => Response::new(StatusCode::INTERNAL_SERVER_ERROR)
                .body("No response generated by middleware pipeline"),
        }
    }
}

/// The core trait for all middleware.
///
/// Implementors receive a [`Context`] and a [`Next`] cursor. They may:
///
/// - **Pass through**: call `next.run(ctx).await` without modification.
/// - **Short-circuit**: return a [`Response`] directly without calling `next`.
/// - **Decorate**: call `next.run(ctx).await`, inspect the response, and return
///   a modified copy.
pub trait Middleware: Send + Sync {
    fn handle(&self, ctx: Context, next: Next) -> ResponseFuture;
}

/// Logs each request's method, path, status, cache status and duration.
///
/// Never short-circuits.
pub struct LoggerMiddleware;

impl Middleware for LoggerMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> ResponseFuture {
        Box::pin(async move {
            let start = Instant::now();
            let method = ctx.request().method().as_str().to_owned();
            let path = ctx.request().path().to_owned();

            let response = next.run(ctx).await;

            let headers = response.headers();
            info!(
                %method,
                %path,
                status = response.status().as_u16(),
                cache = headers.get(CACHE_STATUS_HEADER).unwrap_or("-"),
                error = headers.get(ROUTER_ERROR_HEADER).unwrap_or("-"),
                duration_ms = start.elapsed().as_millis() as u64,
                "request"
            );

            response
        })
    }
}

/// Counts the request, attaches its [`Classification`] to the context
/// extensions, and answers blocked traffic with `403` on the spot.
pub struct ClassifyMiddleware {
    classifier: Arc<Classifier>,
    stats: Arc<Stats>,
}

impl ClassifyMiddleware {
    pub fn new(classifier: Arc<Classifier>, stats: Arc<Stats>) -> Self {
        Self { classifier, stats }
    }
}

impl Middleware for ClassifyMiddleware {
    fn handle(&self, mut ctx: Context, next: Next) -> ResponseFuture {
        self.stats.record_request();
        let classification = self.classifier.classify(ctx.request());

        if let Classification::Blocked(reason) = &classification {
            let tag = match reason {
                BlockReason::Honeypot => {
                    self.stats.record_honeypot_blocked();
                    "honeypot"
                }
                BlockReason::Bot(signature) => {
                    self.stats.record_bot_blocked();
                    debug!(%signature, "user agent blocked");
                    "bot_blocked"
                }
            };
            return Box::pin(async move { forbidden(tag) });
        }

        ctx.extensions_mut().insert(classification);
        Box::pin(async move { next.run(ctx).await })
    }
}

fn forbidden(tag: &str) -> Response {
    Response::json(
        StatusCode::FORBIDDEN,
        &json!({ "error": tag, "message": "Forbidden" }),
    )
    .header(ROUTER_ERROR_HEADER, tag)
}
