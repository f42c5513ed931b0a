use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::Refresh;
use crate::edge::EdgeService;

/// Outcome of one warm-up pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WarmReport {
    /// Entries that were already fresh and left alone.
    pub fresh: usize,
    /// Entries handed to the background queue for refresh.
    pub scheduled: usize,
    /// Endpoints that could not be scheduled at all.
    pub failed: usize,
}

/// Keeps a fixed set of hot API endpoints at worst stale, so a visitor is
/// rarely the one who takes a cache miss.
pub struct Warmer {
    edge: EdgeService,
    endpoints: Vec<String>,
    interval: Duration,
}

impl Warmer {
    pub fn new(edge: EdgeService, endpoints: Vec<String>, interval: Duration) -> Self {
        Self {
            edge,
            endpoints,
            interval,
        }
    }

    /// Checks every endpoint once. Refreshes run on the edge's task queue and
    /// are not awaited.
    pub async fn tick(&self) -> WarmReport {
        let mut report = WarmReport::default();
        for endpoint in &self.endpoints {
            match self.edge.warm(endpoint).await {
                Ok(Refresh::AlreadyFresh) => report.fresh += 1,
                Ok(Refresh::Scheduled) => {
                    debug!(%endpoint, "warm refresh scheduled");
                    report.scheduled += 1;
                }
                Err(err) => {
                    warn!(%endpoint, error = %err, "warm-up skipped");
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Ticks on the configured interval until `shutdown` fires. The first
    /// pass runs immediately.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            endpoints = self.endpoints.len(),
            interval_secs = self.interval.as_secs(),
            "cache warmer started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let report = self.tick().await;
                    info!(
                        fresh = report.fresh,
                        scheduled = report.scheduled,
                        failed = report.failed,
                        "cache warm pass"
                    );
                }
            }
        }
        info!("cache warmer stopped");
    }
}
