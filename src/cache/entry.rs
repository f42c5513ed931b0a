use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;

use super::CacheKey;
use crate::http::{Headers, Response, StatusCode};

/// Where an entry sits in its lifecycle at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// `now < fresh_until`: served as-is.
    Fresh,
    /// `fresh_until <= now < stored_until`: served while a refresh runs.
    Stale,
    /// `stored_until <= now`: treated as absent.
    Expired,
}

/// A stored upstream response.
///
/// Invariant: `fresh_until <= stored_until`.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    key: CacheKey,
    status: StatusCode,
    headers: Headers,
    body: Bytes,
    fresh_until: Instant,
    stored_until: Instant,
}

impl CachedResponse {
    /// Captures `response` at `now`. A fresh window longer than the store
    /// window is clamped to it.
    pub fn new(
        key: CacheKey,
        response: &Response,
        now: Instant,
        fresh_for: Duration,
        store_for: Duration,
    ) -> Self {
        let stored_until = now + store_for;
        let fresh_until = (now + fresh_for).min(stored_until);
        Self {
            key,
            status: response.status(),
            headers: response.headers().end_to_end(&["set-cookie"]),
            body: response.body_ref().clone(),
            fresh_until,
            stored_until,
        }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn fresh_until(&self) -> Instant {
        self.fresh_until
    }

    pub fn stored_until(&self) -> Instant {
        self.stored_until
    }

    pub fn freshness(&self, now: Instant) -> Freshness {
        if now < self.fresh_until {
            Freshness::Fresh
        } else if now < self.stored_until {
            Freshness::Stale
        } else {
            Freshness::Expired
        }
    }

    /// Rebuilds a response carrying the stored status, headers and body.
    pub fn to_response(&self) -> Response {
        Response::from_parts(self.status, self.headers.clone(), self.body.clone())
    }
}

#[cfg(test)]
mod tests {
    use url::Url;

    use super::*;
    use crate::http::Method;

    fn key() -> CacheKey {
        CacheKey::new(&Method::Get, &Url::parse("https://example.com/api").unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn lifecycle_follows_windows() {
        let now = Instant::now();
        let response = Response::new(StatusCode::OK).body("[1,2,3]");
        let entry = CachedResponse::new(
            key(),
            &response,
            now,
            Duration::from_secs(120),
            Duration::from_secs(86_400),
        );

        assert_eq!(entry.freshness(now), Freshness::Fresh);
        assert_eq!(entry.freshness(now + Duration::from_secs(120)), Freshness::Stale);
        assert_eq!(
            entry.freshness(now + Duration::from_secs(86_400)),
            Freshness::Expired
        );
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_window_is_clamped_to_store_window() {
        let now = Instant::now();
        let response = Response::new(StatusCode::OK);
        let entry = CachedResponse::new(
            key(),
            &response,
            now,
            Duration::from_secs(600),
            Duration::from_secs(60),
        );
        assert_eq!(entry.fresh_until(), entry.stored_until());
    }

    #[tokio::test(start_paused = true)]
    async fn set_cookie_is_never_stored() {
        let response = Response::new(StatusCode::OK)
            .header("Set-Cookie", "session=abc")
            .header("Content-Type", "application/json")
            .body("{}");
        let entry = CachedResponse::new(
            key(),
            &response,
            Instant::now(),
            Duration::from_secs(1),
            Duration::from_secs(2),
        );
        let replay = entry.to_response();
        assert!(!replay.headers().contains("set-cookie"));
        assert_eq!(replay.headers().get("content-type"), Some("application/json"));
    }
}
