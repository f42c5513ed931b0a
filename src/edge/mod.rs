//! The edge request handler: pipeline assembly and the three serving branches.
//!
//! ```text
//! request ─► logger ─► classify ─┬─ Blocked        → 403 (short-circuit)
//!                                ├─ Diagnostic     → status / probe
//!                                ├─ ContentOrigin  → API SWR cache │ pass-through
//!                                └─ Application    → asset cache ─► gate → render (+1 retry)
//! ```

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;
use url::Url;

use crate::background::TaskQueue;
use crate::cache::{
    CacheEngine, CacheKey, CacheStore, Fetch, MemoryStore, Refresh, SwrPolicy, TtlPolicy, fetch_fn,
};
use crate::config::Settings;
use crate::context::Context;
use crate::diagnostics::Diagnostics;
use crate::error::{Backend, EdgeError};
use crate::gate::ConcurrencyGate;
use crate::http::{Method, Request, Response, StatusCode};
use crate::middleware::{
    ClassifyMiddleware, LoggerMiddleware, MiddlewareHandler, Next, ResponseFuture, from_middleware,
};
use crate::router::{Classification, Classifier, DiagnosticPath};
use crate::security::AbuseFilter;
use crate::stats::{Stats, Tier};
use crate::upstream::{HttpUpstream, Upstream, send_with_retry, with_deadline};

/// The two optional backend bindings.
#[derive(Clone, Default)]
pub struct Backends {
    pub origin: Option<Arc<dyn Upstream>>,
    pub renderer: Option<Arc<dyn Upstream>>,
}

impl Backends {
    /// Builds `reqwest`-backed upstreams for every configured base URL.
    pub fn from_settings(settings: &Settings) -> Result<Self, reqwest::Error> {
        let origin = match settings.origin.base_url.clone() {
            Some(base) => Some(Arc::new(HttpUpstream::new(
                "origin",
                base,
                settings.origin.host.clone(),
            )?) as Arc<dyn Upstream>),
            None => None,
        };
        let renderer = match settings.renderer.base_url.clone() {
            Some(base) => {
                Some(Arc::new(HttpUpstream::new("renderer", base, None)?) as Arc<dyn Upstream>)
            }
            None => None,
        };
        Ok(Self { origin, renderer })
    }
}

/// A rendering-service call under the gate: shed when full, otherwise one
/// deadline-bounded attempt plus one retry. Pages and asset fills both go
/// through here.
#[derive(Clone)]
struct RenderCall {
    gate: Arc<ConcurrencyGate>,
    stats: Arc<Stats>,
    deadline: Duration,
    retry_after: Duration,
}

impl RenderCall {
    async fn send(&self, renderer: &dyn Upstream, request: &Request) -> Result<Response, EdgeError> {
        let Some(_permit) = self.gate.try_acquire() else {
            self.stats.record_load_shed();
            debug!(
                path = %request.path(),
                in_flight = self.gate.in_flight(),
                "render gate full, shedding"
            );
            return Err(EdgeError::Overloaded {
                retry_after: self.retry_after,
            });
        };

        send_with_retry(renderer, request, self.deadline, |_| {
            self.stats.record_render_retry()
        })
        .await
        .map_err(|err| EdgeError::from_upstream(Backend::Renderer, err))
    }
}

struct Branches {
    stats: Arc<Stats>,
    gate: Arc<ConcurrencyGate>,
    api: CacheEngine<SwrPolicy>,
    assets: CacheEngine<TtlPolicy>,
    diagnostics: Diagnostics,
    backends: Backends,
    public_origin: Url,
    // Host header for cache fills, taken from the public origin.
    fill_host: String,
    origin_deadline: Duration,
    renders: RenderCall,
}

/// Shared, cheaply cloneable request handler for the whole edge.
#[derive(Clone)]
pub struct EdgeService {
    core: Arc<Branches>,
    chain: Arc<[MiddlewareHandler]>,
    queue: TaskQueue,
}

impl EdgeService {
    /// Assembles the edge with an in-memory cache store.
    pub fn new(settings: &Settings, backends: Backends) -> Self {
        Self::with_store(settings, backends, Arc::new(MemoryStore::new()))
    }

    pub fn with_store(settings: &Settings, backends: Backends, store: Arc<dyn CacheStore>) -> Self {
        let stats = Arc::new(Stats::new());
        let queue = TaskQueue::new();
        let gate = Arc::new(ConcurrencyGate::new(settings.gate.ceiling.get()));

        let api = CacheEngine::new(
            Arc::clone(&store),
            SwrPolicy::json(
                settings.cache.api_fresh,
                settings.cache.api_store,
                settings.cache.min_body_bytes,
            ),
            Arc::clone(&stats),
            queue.clone(),
        );
        let assets = CacheEngine::new(
            Arc::clone(&store),
            TtlPolicy {
                tier: Tier::Asset,
                ttl: settings.cache.asset_ttl,
            },
            Arc::clone(&stats),
            queue.clone(),
        );
        let diagnostics = Diagnostics::new(
            settings,
            Arc::clone(&stats),
            Arc::clone(&gate),
            store,
            queue.clone(),
            backends.origin.clone(),
            backends.renderer.clone(),
        );

        let classifier = Arc::new(Classifier::new(
            settings.routes.clone(),
            AbuseFilter::new(
                &settings.filter.honeypot_paths,
                &settings.filter.bot_signatures,
                &settings.site.domain,
            ),
        ));

        let public_origin = settings.site.public_origin.clone();
        let fill_host = authority(&public_origin);
        let renders = RenderCall {
            gate: Arc::clone(&gate),
            stats: Arc::clone(&stats),
            deadline: settings.renderer.deadline,
            retry_after: settings.gate.retry_after,
        };
        let core = Arc::new(Branches {
            stats: Arc::clone(&stats),
            gate,
            api,
            assets,
            diagnostics,
            backends,
            public_origin,
            fill_host,
            origin_deadline: settings.origin.deadline,
            renders,
        });

        let dispatcher: MiddlewareHandler = {
            let core = Arc::clone(&core);
            Arc::new(move |ctx: Context, _next: Next| {
                let core = Arc::clone(&core);
                Box::pin(async move { core.dispatch(ctx).await }) as ResponseFuture
            })
        };
        let chain: Arc<[MiddlewareHandler]> = Arc::from(vec![
            from_middleware(Arc::new(LoggerMiddleware)),
            from_middleware(Arc::new(ClassifyMiddleware::new(classifier, stats))),
            dispatcher,
        ]);

        Self { core, chain, queue }
    }

    /// Runs one request through the full pipeline.
    pub async fn handle(&self, request: Request) -> Response {
        Next::new(Arc::clone(&self.chain))
            .run(Context::new(request))
            .await
    }

    /// Schedules a background refresh of the API entry for `target` unless it
    /// is already fresh. Never waits for the refresh.
    pub async fn warm(&self, target: &str) -> Result<Refresh, EdgeError> {
        self.core.warm(target).await
    }

    pub fn stats(&self) -> &Arc<Stats> {
        &self.core.stats
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.core.gate
    }

    /// Background jobs spawned by this edge, drained at shutdown.
    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }
}

fn upstream_fetch(
    backend: Backend,
    upstream: Arc<dyn Upstream>,
    request: Request,
    deadline: Duration,
) -> Fetch {
    fetch_fn(move || {
        let upstream = Arc::clone(&upstream);
        let request = request.clone();
        async move {
            with_deadline(upstream.name(), deadline, upstream.send(request))
                .await
                .map_err(|err| EdgeError::from_upstream(backend, err))
        }
    })
}

fn render_fetch(renders: RenderCall, renderer: Arc<dyn Upstream>, request: Request) -> Fetch {
    fetch_fn(move || {
        let renders = renders.clone();
        let renderer = Arc::clone(&renderer);
        let request = request.clone();
        async move { renders.send(renderer.as_ref(), &request).await }
    })
}

/// `host[:port]` of `url`, with the port omitted when it is the scheme default.
fn authority(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_owned(),
    }
}

impl Branches {
    async fn dispatch(&self, ctx: Context) -> Response {
        let classification = ctx.extensions().get::<Classification>().cloned();
        let (request, _) = ctx.into_parts();

        let outcome = match classification {
            Some(Classification::Diagnostic(DiagnosticPath::Status)) => {
                Ok(self.diagnostics.status().await)
            }
            Some(Classification::Diagnostic(DiagnosticPath::Probe)) => {
                Ok(self.diagnostics.probe().await)
            }
            Some(Classification::ContentOrigin { cacheable: true }) => {
                self.origin_cached(request).await
            }
            Some(Classification::ContentOrigin { cacheable: false }) => {
                self.origin_passthrough(request).await
            }
            Some(Classification::Application { asset: true }) => self.asset(request).await,
            Some(Classification::Application { asset: false }) => self.render(request).await,
            Some(Classification::Blocked(_)) | None => {
                Ok(Response::new(StatusCode::INTERNAL_SERVER_ERROR).body("unclassified request"))
            }
        };

        outcome.unwrap_or_else(EdgeError::into_response)
    }

    fn origin(&self) -> Result<Arc<dyn Upstream>, EdgeError> {
        self.backends
            .origin
            .clone()
            .ok_or(EdgeError::Configuration(Backend::Origin))
    }

    fn renderer(&self) -> Result<Arc<dyn Upstream>, EdgeError> {
        self.backends
            .renderer
            .clone()
            .ok_or(EdgeError::Configuration(Backend::Renderer))
    }

    // A cached response is shared by every client, so a fill carries nothing
    // from the client: the Host is the public origin's.
    fn fill_request(&self, target: &str, accept: Option<&str>) -> Request {
        let request = Request::new(Method::Get, target).header("Host", self.fill_host.as_str());
        match accept {
            Some(accept) => request.header("Accept", accept),
            None => request,
        }
    }

    fn key_for(&self, request: &Request) -> Option<CacheKey> {
        match CacheKey::for_target(&Method::Get, &self.public_origin, &request.target()) {
            Ok(key) => Some(key),
            Err(err) => {
                debug!(target = %request.target(), error = %err, "no cache key for request");
                None
            }
        }
    }

    async fn origin_cached(&self, request: Request) -> Result<Response, EdgeError> {
        let Some(key) = self.key_for(&request) else {
            return self.origin_passthrough(request).await;
        };
        let fetch = upstream_fetch(
            Backend::Origin,
            self.origin()?,
            self.fill_request(&request.target(), Some("application/json")),
            self.origin_deadline,
        );
        self.api.serve(key, request.wants_uncached(), fetch).await
    }

    async fn origin_passthrough(&self, request: Request) -> Result<Response, EdgeError> {
        let origin = self.origin()?;
        with_deadline(origin.name(), self.origin_deadline, origin.send(request))
            .await
            .map_err(|err| EdgeError::from_upstream(Backend::Origin, err))
    }

    // Asset hits are served before the gate and never hold a render slot;
    // misses and bypasses reach the renderer only through it.
    async fn asset(&self, request: Request) -> Result<Response, EdgeError> {
        let renderer = self.renderer()?;
        let Some(key) = self.key_for(&request) else {
            return self.render(request).await;
        };
        let fetch = render_fetch(
            self.renders.clone(),
            renderer,
            self.fill_request(&request.target(), None),
        );
        self.assets.serve(key, request.wants_uncached(), fetch).await
    }

    async fn render(&self, request: Request) -> Result<Response, EdgeError> {
        let renderer = self.renderer()?;
        self.renders.send(renderer.as_ref(), &request).await
    }

    async fn warm(&self, target: &str) -> Result<Refresh, EdgeError> {
        let origin = self.origin()?;
        let request = Request::new(Method::Get, target);
        let Some(key) = self.key_for(&request) else {
            return Ok(Refresh::AlreadyFresh);
        };
        let fetch = upstream_fetch(
            Backend::Origin,
            origin,
            self.fill_request(target, Some("application/json")),
            self.origin_deadline,
        );
        Ok(self.api.refresh_if_needed(key, fetch).await)
    }
}
