//! Process-local counters for the diagnostics endpoint.
//!
//! Counters are observability only: they reset on restart, are never shared
//! across instances and never drive a decision.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// A cache tier, used to label per-tier counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Content-origin JSON API responses (stale-while-revalidate).
    Api,
    /// Static assets relayed from the rendering service (plain TTL).
    Asset,
    /// Backend probe reports from the diagnostics endpoint (plain TTL).
    Probe,
}

/// Outcome of one cache read, also sent to clients as the cache-status header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CacheStatus {
    Hit,
    Miss,
    Stale,
    Bypass,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "HIT",
            Self::Miss => "MISS",
            Self::Stale => "STALE",
            Self::Bypass => "BYPASS",
        }
    }
}

#[derive(Debug, Default)]
struct TierCounters {
    hit: AtomicU64,
    miss: AtomicU64,
    stale: AtomicU64,
    bypass: AtomicU64,
    admitted: AtomicU64,
    rejected: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TierSnapshot {
    pub hit: u64,
    pub miss: u64,
    pub stale: u64,
    pub bypass: u64,
    pub admitted: u64,
    pub rejected: u64,
}

impl TierCounters {
    fn snapshot(&self) -> TierSnapshot {
        TierSnapshot {
            hit: self.hit.load(Ordering::Relaxed),
            miss: self.miss.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            bypass: self.bypass.load(Ordering::Relaxed),
            admitted: self.admitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Default)]
pub struct Stats {
    requests: AtomicU64,
    bot_blocked: AtomicU64,
    honeypot_blocked: AtomicU64,
    load_shed: AtomicU64,
    render_retries: AtomicU64,
    revalidations_scheduled: AtomicU64,
    revalidations_failed: AtomicU64,
    api: TierCounters,
    asset: TierCounters,
    probe: TierCounters,
}

/// Point-in-time copy of [`Stats`], serialized by the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub requests: u64,
    pub bot_blocked: u64,
    pub honeypot_blocked: u64,
    pub load_shed: u64,
    pub render_retries: u64,
    pub revalidations_scheduled: u64,
    pub revalidations_failed: u64,
    pub api: TierSnapshot,
    pub asset: TierSnapshot,
    pub probe: TierSnapshot,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    fn tier(&self, tier: Tier) -> &TierCounters {
        match tier {
            Tier::Api => &self.api,
            Tier::Asset => &self.asset,
            Tier::Probe => &self.probe,
        }
    }

    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bot_blocked(&self) {
        self.bot_blocked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_honeypot_blocked(&self) {
        self.honeypot_blocked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_load_shed(&self) {
        self.load_shed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_render_retry(&self) {
        self.render_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_revalidation_scheduled(&self) {
        self.revalidations_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_revalidation_failed(&self) {
        self.revalidations_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lookup(&self, tier: Tier, status: CacheStatus) {
        let counters = self.tier(tier);
        let counter = match status {
            CacheStatus::Hit => &counters.hit,
            CacheStatus::Miss => &counters.miss,
            CacheStatus::Stale => &counters.stale,
            CacheStatus::Bypass => &counters.bypass,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_admission(&self, tier: Tier, admitted: bool) {
        let counters = self.tier(tier);
        let counter = if admitted {
            &counters.admitted
        } else {
            &counters.rejected
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            bot_blocked: self.bot_blocked.load(Ordering::Relaxed),
            honeypot_blocked: self.honeypot_blocked.load(Ordering::Relaxed),
            load_shed: self.load_shed.load(Ordering::Relaxed),
            render_retries: self.render_retries.load(Ordering::Relaxed),
            revalidations_scheduled: self.revalidations_scheduled.load(Ordering::Relaxed),
            revalidations_failed: self.revalidations_failed.load(Ordering::Relaxed),
            api: self.api.snapshot(),
            asset: self.asset.snapshot(),
            probe: self.probe.snapshot(),
        }
    }
}
