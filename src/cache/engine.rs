use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, warn};

use super::{AdmissionRejected, CacheKey, CachePolicy, CacheStore, CachedResponse, Freshness};
use crate::background::TaskQueue;
use crate::error::EdgeError;
use crate::http::Response;
use crate::stats::{CacheStatus, Stats};

/// Header reporting how a response was served.
pub const CACHE_STATUS_HEADER: &str = "X-Cache";

/// Re-runnable upstream fetch, shared between the foreground read and any
/// background revalidation it schedules.
pub type Fetch = Arc<
    dyn Fn() -> Pin<Box<dyn Future<Output = Result<Response, EdgeError>> + Send>>
        + Send
        + Sync
        + 'static,
>;

/// Wraps an async closure as a [`Fetch`].
pub fn fetch_fn<F, Fut>(f: F) -> Fetch
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, EdgeError>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()))
}

/// Result of a key lookup.
#[derive(Debug, Clone)]
pub enum Lookup {
    Miss,
    Fresh(CachedResponse),
    Stale(CachedResponse),
}

/// What [`CacheEngine::refresh_if_needed`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refresh {
    AlreadyFresh,
    Scheduled,
}

struct EngineInner<P> {
    store: Arc<dyn CacheStore>,
    policy: P,
    stats: Arc<Stats>,
    queue: TaskQueue,
}

/// Read-through cache for one tier, parameterized by its [`CachePolicy`].
///
/// Miss and Fresh reads are terminal. A Stale read returns the stored body at
/// once and, when the policy revalidates, schedules one background refresh.
/// Concurrent stale reads of the same key each schedule their own refresh;
/// writes are idempotent overwrites, so the last one wins.
pub struct CacheEngine<P> {
    inner: Arc<EngineInner<P>>,
}

impl<P> Clone for CacheEngine<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: CachePolicy> CacheEngine<P> {
    pub fn new(store: Arc<dyn CacheStore>, policy: P, stats: Arc<Stats>, queue: TaskQueue) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                store,
                policy,
                stats,
                queue,
            }),
        }
    }

    pub fn policy(&self) -> &P {
        &self.inner.policy
    }

    /// Classifies the entry under `key`. A failing store reads as a miss.
    pub async fn lookup(&self, key: &CacheKey) -> Lookup {
        let entry = match self.inner.store.get(key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return Lookup::Miss,
            Err(err) => {
                warn!(key = %key, error = %err, "cache read failed, treating as miss");
                return Lookup::Miss;
            }
        };
        match entry.freshness(Instant::now()) {
            Freshness::Fresh => Lookup::Fresh(entry),
            Freshness::Stale if self.inner.policy.revalidates() => Lookup::Stale(entry),
            Freshness::Stale => Lookup::Fresh(entry),
            Freshness::Expired => Lookup::Miss,
        }
    }

    /// Serves `key` from the cache, falling through to `fetch` on a miss.
    ///
    /// With `bypass` set the cache is neither read nor written. Every
    /// response carries the [`CACHE_STATUS_HEADER`].
    pub async fn serve(&self, key: CacheKey, bypass: bool, fetch: Fetch) -> Result<Response, EdgeError> {
        let tier = self.inner.policy.tier();

        if bypass {
            self.inner.stats.record_lookup(tier, CacheStatus::Bypass);
            let response = fetch().await?;
            return Ok(tagged(response, CacheStatus::Bypass));
        }

        match self.lookup(&key).await {
            Lookup::Fresh(entry) => {
                self.inner.stats.record_lookup(tier, CacheStatus::Hit);
                Ok(tagged(entry.to_response(), CacheStatus::Hit))
            }
            Lookup::Stale(entry) => {
                self.inner.stats.record_lookup(tier, CacheStatus::Stale);
                self.schedule_revalidation(key, fetch);
                Ok(tagged(entry.to_response(), CacheStatus::Stale))
            }
            Lookup::Miss => {
                self.inner.stats.record_lookup(tier, CacheStatus::Miss);
                let response = fetch().await?;
                if let Err(reason) = self.admit_and_store(key.clone(), &response).await {
                    debug!(key = %key, %reason, "response not cached");
                }
                Ok(tagged(response, CacheStatus::Miss))
            }
        }
    }

    /// Queues a detached refresh of `key`. Failures are logged and swallowed;
    /// whatever is cached keeps being served.
    pub fn schedule_revalidation(&self, key: CacheKey, fetch: Fetch) {
        self.inner.stats.record_revalidation_scheduled();
        let engine = self.clone();
        self.inner.queue.spawn("revalidate", async move {
            engine.revalidate(key, fetch).await;
        });
    }

    /// Schedules a refresh unless the entry is already fresh. Never waits for
    /// the refresh itself.
    pub async fn refresh_if_needed(&self, key: CacheKey, fetch: Fetch) -> Refresh {
        match self.lookup(&key).await {
            Lookup::Fresh(_) => Refresh::AlreadyFresh,
            Lookup::Stale(_) | Lookup::Miss => {
                self.schedule_revalidation(key, fetch);
                Refresh::Scheduled
            }
        }
    }

    async fn revalidate(&self, key: CacheKey, fetch: Fetch) {
        match fetch().await {
            Ok(response) => match self.admit_and_store(key.clone(), &response).await {
                Ok(()) => debug!(key = %key, "revalidated"),
                Err(reason) => {
                    self.inner.stats.record_revalidation_failed();
                    warn!(key = %key, %reason, "revalidation response not admitted");
                }
            },
            Err(err) => {
                self.inner.stats.record_revalidation_failed();
                warn!(key = %key, error = %err, "revalidation failed, keeping stale entry");
            }
        }
    }

    async fn admit_and_store(&self, key: CacheKey, response: &Response) -> Result<(), AdmissionRejected> {
        let policy = &self.inner.policy;
        let verdict = policy.admit(response);
        self.inner
            .stats
            .record_admission(policy.tier(), verdict.is_ok());
        verdict?;

        let entry = CachedResponse::new(
            key,
            response,
            Instant::now(),
            policy.fresh_for(),
            policy.store_for(),
        );
        if let Err(err) = self.inner.store.put(entry).await {
            warn!(error = %err, "cache write failed");
        }
        Ok(())
    }
}

fn tagged(mut response: Response, status: CacheStatus) -> Response {
    response.set_header(CACHE_STATUS_HEADER, status.as_str());
    response
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use url::Url;

    use super::*;
    use crate::cache::{MemoryStore, SwrPolicy, TtlPolicy};
    use crate::error::Backend;
    use crate::http::{Method, StatusCode};
    use crate::stats::Tier;
    use crate::upstream::UpstreamError;

    struct Harness {
        engine: CacheEngine<SwrPolicy>,
        queue: TaskQueue,
        stats: Arc<Stats>,
        calls: Arc<AtomicUsize>,
        body: Arc<std::sync::Mutex<String>>,
    }

    fn json_array(tag: &str) -> String {
        let items: Vec<String> = (0..25).map(|i| format!(r#"{{"id":{i},"t":"{tag}"}}"#)).collect();
        format!("[{}]", items.join(","))
    }

    fn harness() -> Harness {
        let queue = TaskQueue::new();
        let stats = Arc::new(Stats::new());
        let engine = CacheEngine::new(
            Arc::new(MemoryStore::new()),
            SwrPolicy::json(Duration::from_secs(120), Duration::from_secs(86_400), 50),
            Arc::clone(&stats),
            queue.clone(),
        );
        Harness {
            engine,
            queue,
            stats,
            calls: Arc::new(AtomicUsize::new(0)),
            body: Arc::new(std::sync::Mutex::new(json_array("v1"))),
        }
    }

    impl Harness {
        fn fetch(&self) -> Fetch {
            let calls = Arc::clone(&self.calls);
            let body = Arc::clone(&self.body);
            fetch_fn(move || {
                let calls = Arc::clone(&calls);
                let body = body.lock().unwrap().clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    Ok(Response::new(StatusCode::OK)
                        .header("Content-Type", "application/json")
                        .body(body))
                }
            })
        }

        fn set_body(&self, body: String) {
            *self.body.lock().unwrap() = body;
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    fn key() -> CacheKey {
        CacheKey::for_target(
            &Method::Get,
            &Url::parse("https://www.example.com").unwrap(),
            "/api/posts",
        )
        .unwrap()
    }

    fn cache_status(response: &Response) -> &str {
        response.headers().get(CACHE_STATUS_HEADER).unwrap_or_default()
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_reads_never_call_upstream() {
        let h = harness();
        let first = h.engine.serve(key(), false, h.fetch()).await.unwrap();
        assert_eq!(cache_status(&first), "MISS");

        for _ in 0..5 {
            tokio::time::advance(Duration::from_secs(10)).await;
            let again = h.engine.serve(key(), false, h.fetch()).await.unwrap();
            assert_eq!(cache_status(&again), "HIT");
            assert_eq!(again.body_ref(), first.body_ref());
        }
        assert_eq!(h.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_then_refreshed_scenario() {
        let h = harness();
        let first = h.engine.serve(key(), false, h.fetch()).await.unwrap();
        assert_eq!(cache_status(&first), "MISS");
        let original = first.body_ref().clone();

        h.set_body(json_array("v2"));
        tokio::time::advance(Duration::from_secs(121)).await;

        let started = Instant::now();
        let stale = h.engine.serve(key(), false, h.fetch()).await.unwrap();
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(cache_status(&stale), "STALE");
        assert_eq!(stale.body_ref(), &original);
        assert_eq!(h.queue.pending(), 1);

        tokio::time::advance(Duration::from_secs(4)).await;
        h.queue.settle().await;

        let refreshed = h.engine.serve(key(), false, h.fetch()).await.unwrap();
        assert_eq!(cache_status(&refreshed), "HIT");
        assert_eq!(&refreshed.body_ref()[..], json_array("v2").as_bytes());
        assert_eq!(h.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn each_stale_read_schedules_one_revalidation() {
        let h = harness();
        h.engine.serve(key(), false, h.fetch()).await.unwrap();
        tokio::time::advance(Duration::from_secs(130)).await;

        h.engine.serve(key(), false, h.fetch()).await.unwrap();
        h.engine.serve(key(), false, h.fetch()).await.unwrap();
        assert_eq!(h.stats.snapshot().revalidations_scheduled, 2);

        h.queue.settle().await;
        assert_eq!(h.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn degenerate_body_never_cached() {
        let h = harness();
        h.set_body("[]".to_owned());
        for _ in 0..3 {
            let response = h.engine.serve(key(), false, h.fetch()).await.unwrap();
            assert_eq!(cache_status(&response), "MISS");
            assert_eq!(&response.body_ref()[..], b"[]");
        }
        assert_eq!(h.calls(), 3);
        assert!(matches!(h.engine.lookup(&key()).await, Lookup::Miss));
        assert_eq!(h.stats.snapshot().api.rejected, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn degenerate_revalidation_keeps_stale_entry() {
        let h = harness();
        h.engine.serve(key(), false, h.fetch()).await.unwrap();
        tokio::time::advance(Duration::from_secs(121)).await;

        h.set_body("[]".to_owned());
        let stale = h.engine.serve(key(), false, h.fetch()).await.unwrap();
        h.queue.settle().await;

        let still = h.engine.serve(key(), false, h.fetch()).await.unwrap();
        assert_eq!(cache_status(&still), "STALE");
        assert_eq!(still.body_ref(), stale.body_ref());
        assert_eq!(h.stats.snapshot().revalidations_failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_revalidation_is_swallowed() {
        let h = harness();
        h.engine.serve(key(), false, h.fetch()).await.unwrap();
        tokio::time::advance(Duration::from_secs(121)).await;

        let failing = fetch_fn(|| async {
            Err(EdgeError::from_upstream(
                Backend::Origin,
                UpstreamError::Timeout {
                    upstream: "origin".into(),
                    deadline: Duration::from_secs(5),
                },
            ))
        });
        let stale = h.engine.serve(key(), false, failing).await.unwrap();
        assert_eq!(cache_status(&stale), "STALE");
        h.queue.settle().await;

        assert_eq!(h.stats.snapshot().revalidations_failed, 1);
        assert!(matches!(h.engine.lookup(&key()).await, Lookup::Stale(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn bypass_ignores_fresh_entry_and_does_not_write() {
        let h = harness();
        h.engine.serve(key(), false, h.fetch()).await.unwrap();

        h.set_body(json_array("ground-truth"));
        let direct = h.engine.serve(key(), true, h.fetch()).await.unwrap();
        assert_eq!(cache_status(&direct), "BYPASS");
        assert_eq!(&direct.body_ref()[..], json_array("ground-truth").as_bytes());

        let cached = h.engine.serve(key(), false, h.fetch()).await.unwrap();
        assert_eq!(cache_status(&cached), "HIT");
        assert_eq!(&cached.body_ref()[..], json_array("v1").as_bytes());
        assert_eq!(h.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn miss_propagates_upstream_failure() {
        let h = harness();
        let failing = fetch_fn(|| async { Err(EdgeError::Configuration(Backend::Origin)) });
        let err = h.engine.serve(key(), false, failing).await.unwrap_err();
        assert_eq!(err.reason(), "origin_unconfigured");
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_if_needed_skips_fresh_entries() {
        let h = harness();
        assert_eq!(
            h.engine.refresh_if_needed(key(), h.fetch()).await,
            Refresh::Scheduled
        );
        h.queue.settle().await;
        assert_eq!(
            h.engine.refresh_if_needed(key(), h.fetch()).await,
            Refresh::AlreadyFresh
        );
        assert_eq!(h.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_tier_expires_without_revalidation() {
        let queue = TaskQueue::new();
        let engine = CacheEngine::new(
            Arc::new(MemoryStore::new()),
            TtlPolicy {
                tier: Tier::Asset,
                ttl: Duration::from_secs(60),
            },
            Arc::new(Stats::new()),
            queue.clone(),
        );
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let fetch = fetch_fn(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(Response::new(StatusCode::OK).body("body{}")) }
        });

        engine.serve(key(), false, Arc::clone(&fetch)).await.unwrap();
        tokio::time::advance(Duration::from_secs(59)).await;
        let hit = engine.serve(key(), false, Arc::clone(&fetch)).await.unwrap();
        assert_eq!(cache_status(&hit), "HIT");
        assert_eq!(queue.pending(), 0);

        tokio::time::advance(Duration::from_secs(2)).await;
        let miss = engine.serve(key(), false, fetch).await.unwrap();
        assert_eq!(cache_status(&miss), "MISS");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
