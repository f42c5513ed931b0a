use std::time::Duration;

use thiserror::Error;

use crate::http::Response;
use crate::stats::Tier;

/// Why a successfully fetched response was not written to the cache.
///
/// This is a policy outcome, not a failure: the response is still returned
/// to the caller unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionRejected {
    #[error("status {0} is not a success")]
    NotSuccess(u16),

    #[error("content type {found:?} is not {expected}")]
    ContentType {
        expected: &'static str,
        found: Option<String>,
    },

    #[error("body of {len} bytes is below the {min} byte minimum")]
    TooSmall { len: usize, min: usize },

    #[error("response sets a cookie")]
    SetsCookie,
}

/// Freshness and admission rules for one cache tier.
///
/// Tiers share key construction and storage; only these rules differ.
pub trait CachePolicy: Send + Sync + 'static {
    fn tier(&self) -> Tier;

    /// How long a new entry is served without revalidation.
    fn fresh_for(&self) -> Duration;

    /// How long a new entry may be served at all.
    fn store_for(&self) -> Duration;

    /// Whether stale reads schedule a background refresh.
    fn revalidates(&self) -> bool {
        self.fresh_for() < self.store_for()
    }

    fn admit(&self, response: &Response) -> Result<(), AdmissionRejected>;
}

/// Stale-while-revalidate policy for JSON API responses.
#[derive(Debug, Clone)]
pub struct SwrPolicy {
    pub fresh_for: Duration,
    pub store_for: Duration,
    /// Bodies at or below this size are refused, so an empty collection
    /// returned by an overloaded origin never replaces real content.
    pub min_body_bytes: usize,
    pub media_type: &'static str,
}

impl SwrPolicy {
    pub fn json(fresh_for: Duration, store_for: Duration, min_body_bytes: usize) -> Self {
        Self {
            fresh_for,
            store_for,
            min_body_bytes,
            media_type: "application/json",
        }
    }
}

impl CachePolicy for SwrPolicy {
    fn tier(&self) -> Tier {
        Tier::Api
    }

    fn fresh_for(&self) -> Duration {
        self.fresh_for
    }

    fn store_for(&self) -> Duration {
        self.store_for
    }

    fn admit(&self, response: &Response) -> Result<(), AdmissionRejected> {
        let status = response.status();
        if !status.is_success() {
            return Err(AdmissionRejected::NotSuccess(status.as_u16()));
        }
        let media_type = response.media_type();
        if media_type.as_deref() != Some(self.media_type) {
            return Err(AdmissionRejected::ContentType {
                expected: self.media_type,
                found: media_type,
            });
        }
        let len = response.body_ref().len();
        if len <= self.min_body_bytes {
            return Err(AdmissionRejected::TooSmall {
                len,
                min: self.min_body_bytes,
            });
        }
        if response.headers().contains("set-cookie") {
            return Err(AdmissionRejected::SetsCookie);
        }
        Ok(())
    }
}

/// Plain TTL policy: entries are fresh until they expire, never revalidated.
#[derive(Debug, Clone)]
pub struct TtlPolicy {
    pub tier: Tier,
    pub ttl: Duration,
}

impl CachePolicy for TtlPolicy {
    fn tier(&self) -> Tier {
        self.tier
    }

    fn fresh_for(&self) -> Duration {
        self.ttl
    }

    fn store_for(&self) -> Duration {
        self.ttl
    }

    fn admit(&self, response: &Response) -> Result<(), AdmissionRejected> {
        // 206 is a success but only a slice of the resource
        let status = response.status().as_u16();
        if status != 200 && status != 203 {
            return Err(AdmissionRejected::NotSuccess(status));
        }
        if response.headers().contains("set-cookie") {
            return Err(AdmissionRejected::SetsCookie);
        }
        Ok(())
    }
}
