//! Read-only introspection endpoints.
//!
//! - **status**: effective configuration, counters, gate occupancy, store
//!   size and pending background jobs. Pure read, no side effects.
//! - **probe**: one live request to each backend under a short deadline.
//!   The report is cached for a few seconds through a [`TtlPolicy`] engine so
//!   frequent polling does not turn into backend load. A failing probe is a
//!   field in the report, never an error response.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Value, json};
use tokio::time::Instant;
use url::Url;

use crate::background::TaskQueue;
use crate::cache::{CacheEngine, CacheKey, CacheStore, TtlPolicy, fetch_fn};
use crate::config::Settings;
use crate::gate::ConcurrencyGate;
use crate::http::{Method, Request, Response, StatusCode};
use crate::stats::{Stats, StatsSnapshot, Tier};
use crate::upstream::{Upstream, with_deadline};

/// Origin path hit by the probe: the API index, cheap and uncached upstream.
pub const ORIGIN_PROBE_PATH: &str = "/wp-json/";
/// Renderer path hit by the probe.
pub const RENDERER_PROBE_PATH: &str = "/";
const PROBE_USER_AGENT: &str = "frontdoor-probe";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    pub name: &'static str,
    pub configured: bool,
    /// Reached and answered with a non-5xx status.
    pub ok: bool,
    pub status: Option<u16>,
    pub latency_ms: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct ProbeReport {
    origin: ProbeResult,
    renderer: ProbeResult,
}

#[derive(Serialize)]
struct StatusReport<'a> {
    config: &'a Value,
    stats: StatsSnapshot,
    gate: GateReport,
    cache: CacheReport,
    background: BackgroundReport,
}

#[derive(Serialize)]
struct GateReport {
    in_flight: usize,
    ceiling: usize,
}

#[derive(Serialize)]
struct CacheReport {
    entries: Option<usize>,
}

#[derive(Serialize)]
struct BackgroundReport {
    pending: usize,
}

#[derive(Clone)]
struct ProbeTarget {
    name: &'static str,
    path: &'static str,
    upstream: Option<Arc<dyn Upstream>>,
}

pub struct Diagnostics {
    config: Value,
    stats: Arc<Stats>,
    gate: Arc<ConcurrencyGate>,
    store: Arc<dyn CacheStore>,
    queue: TaskQueue,
    probes: CacheEngine<TtlPolicy>,
    probe_key: CacheKey,
    origin: ProbeTarget,
    renderer: ProbeTarget,
    deadline: Duration,
}

impl Diagnostics {
    pub fn new(
        settings: &Settings,
        stats: Arc<Stats>,
        gate: Arc<ConcurrencyGate>,
        store: Arc<dyn CacheStore>,
        queue: TaskQueue,
        origin: Option<Arc<dyn Upstream>>,
        renderer: Option<Arc<dyn Upstream>>,
    ) -> Self {
        let probes = CacheEngine::new(
            Arc::clone(&store),
            TtlPolicy {
                tier: Tier::Probe,
                ttl: settings.cache.probe_ttl,
            },
            Arc::clone(&stats),
            queue.clone(),
        );
        let mut probe_url = settings.site.public_origin.clone();
        probe_url.set_path(&settings.routes.probe_path);
        probe_url.set_query(None);

        Self {
            config: config_snapshot(settings),
            stats,
            gate,
            store,
            queue,
            probes,
            probe_key: CacheKey::new(&Method::Get, &probe_url),
            origin: ProbeTarget {
                name: "origin",
                path: ORIGIN_PROBE_PATH,
                upstream: origin,
            },
            renderer: ProbeTarget {
                name: "renderer",
                path: RENDERER_PROBE_PATH,
                upstream: renderer,
            },
            deadline: settings.renderer.probe_deadline,
        }
    }

    /// Configuration and counters snapshot.
    pub async fn status(&self) -> Response {
        let report = StatusReport {
            config: &self.config,
            stats: self.stats.snapshot(),
            gate: GateReport {
                in_flight: self.gate.in_flight(),
                ceiling: self.gate.ceiling(),
            },
            cache: CacheReport {
                entries: self.store.approximate_len(),
            },
            background: BackgroundReport {
                pending: self.queue.pending(),
            },
        };
        Response::json(StatusCode::OK, &report).header("Cache-Control", "no-store")
    }

    /// Probes both backends, or replays a report younger than the probe TTL.
    ///
    /// Request cache directives are ignored here: the diagnostic paths sit in
    /// front of the abuse filter, so every caller shares the cached report.
    pub async fn probe(&self) -> Response {
        let origin = self.origin.clone();
        let renderer = self.renderer.clone();
        let deadline = self.deadline;

        let fetch = fetch_fn(move || {
            let origin = origin.clone();
            let renderer = renderer.clone();
            async move {
                let (origin, renderer) =
                    tokio::join!(probe_one(&origin, deadline), probe_one(&renderer, deadline));
                Ok(Response::json(StatusCode::OK, &ProbeReport { origin, renderer }))
            }
        });

        self.probes
            .serve(self.probe_key.clone(), false, fetch)
            .await
            .unwrap_or_else(|err| err.into_response())
    }
}

async fn probe_one(target: &ProbeTarget, deadline: Duration) -> ProbeResult {
    let Some(upstream) = target.upstream.as_ref() else {
        return ProbeResult {
            name: target.name,
            configured: false,
            ok: false,
            status: None,
            latency_ms: 0,
            error: Some("not configured".into()),
        };
    };

    let request = Request::new(Method::Get, target.path).header("User-Agent", PROBE_USER_AGENT);
    let started = Instant::now();
    let outcome = with_deadline(upstream.name(), deadline, upstream.send(request)).await;
    let latency_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(response) => {
            let status = response.status().as_u16();
            ProbeResult {
                name: target.name,
                configured: true,
                ok: status < 500,
                status: Some(status),
                latency_ms,
                error: None,
            }
        }
        Err(err) => ProbeResult {
            name: target.name,
            configured: true,
            ok: false,
            status: None,
            latency_ms,
            error: Some(err.to_string()),
        },
    }
}

fn redacted(url: &Url) -> String {
    let mut url = url.clone();
    let _ = url.set_password(None);
    let _ = url.set_username("");
    url.to_string()
}

fn config_snapshot(settings: &Settings) -> Value {
    let routes = &settings.routes;
    json!({
        "site": {
            "public_origin": redacted(&settings.site.public_origin),
            "domain": settings.site.domain,
        },
        "origin": {
            "configured": settings.origin.base_url.is_some(),
            "base_url": settings.origin.base_url.as_ref().map(redacted),
            "host": settings.origin.host,
            "deadline_ms": settings.origin.deadline.as_millis() as u64,
        },
        "renderer": {
            "configured": settings.renderer.base_url.is_some(),
            "base_url": settings.renderer.base_url.as_ref().map(redacted),
            "deadline_ms": settings.renderer.deadline.as_millis() as u64,
            "probe_deadline_ms": settings.renderer.probe_deadline.as_millis() as u64,
        },
        "cache": {
            "api_fresh_seconds": settings.cache.api_fresh.as_secs(),
            "api_store_seconds": settings.cache.api_store.as_secs(),
            "min_body_bytes": settings.cache.min_body_bytes,
            "asset_ttl_seconds": settings.cache.asset_ttl.as_secs(),
            "probe_ttl_seconds": settings.cache.probe_ttl.as_secs(),
        },
        "gate": {
            "ceiling": settings.gate.ceiling.get(),
            "retry_after_seconds": settings.gate.retry_after.as_secs(),
        },
        "filter": {
            "honeypot_paths": settings.filter.honeypot_paths.len(),
            "bot_signatures": settings.filter.bot_signatures.len(),
        },
        "routes": {
            "status_path": routes.status_path,
            "probe_path": routes.probe_path,
            "origin_prefixes": routes.origin_prefixes.len(),
            "api_prefixes": routes.api_prefixes.len(),
        },
        "warmer": {
            "enabled": settings.warmer.enabled,
            "interval_seconds": settings.warmer.interval.as_secs(),
            "endpoints": settings.warmer.endpoints,
        },
    })
}
