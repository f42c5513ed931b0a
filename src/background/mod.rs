//! Background work detached from the request/response lifecycle.
//!
//! Cache revalidations are handed to a [`TaskQueue`] and keep running after
//! the response that triggered them has been written. At shutdown the queue
//! is closed and drained, so every job that was accepted is at least
//! attempted before the process exits.

use std::future::Future;
use std::time::Duration;

use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

mod warmer;

pub use warmer::{WarmReport, Warmer};

/// Tracked set of detached jobs.
///
/// Cloning is cheap and every clone feeds the same tracker.
#[derive(Debug, Clone, Default)]
pub struct TaskQueue {
    tracker: TaskTracker,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns `job` on the runtime and tracks it until completion.
    ///
    /// Jobs spawned after [`shutdown`](Self::shutdown) has begun still run;
    /// they are simply not waited for once the grace period has elapsed.
    pub fn spawn<F>(&self, label: &'static str, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        debug!(job = label, pending = self.tracker.len(), "background job queued");
        self.tracker.spawn(job);
    }

    /// Number of jobs not yet finished.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Waits until every job spawned so far has finished, then reopens the
    /// queue for new work.
    #[cfg(test)]
    pub(crate) async fn settle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Closes the queue and waits up to `grace` for outstanding jobs.
    ///
    /// Returns `true` if everything finished in time.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.tracker.close();
        let pending = self.tracker.len();
        if pending > 0 {
            info!(pending, grace_ms = grace.as_millis() as u64, "draining background jobs");
        }
        match tokio::time::timeout(grace, self.tracker.wait()).await {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    abandoned = self.tracker.len(),
                    "background jobs still running after shutdown grace"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn job_outlives_the_spawning_scope() {
        let queue = TaskQueue::new();
        let done = Arc::new(AtomicUsize::new(0));

        {
            let done = Arc::clone(&done);
            queue.spawn("test", async move {
                tokio::time::sleep(Duration::from_secs(3)).await;
                done.fetch_add(1, Ordering::SeqCst);
            });
        }

        assert_eq!(queue.pending(), 1);
        queue.settle().await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_reports_abandoned_work() {
        let queue = TaskQueue::new();
        queue.spawn("slow", async {
            tokio::time::sleep(Duration::from_secs(600)).await;
        });
        assert!(!queue.shutdown(Duration::from_secs(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_drains_finished_work() {
        let queue = TaskQueue::new();
        queue.spawn("quick", async {
            tokio::time::sleep(Duration::from_millis(5)).await;
        });
        assert!(queue.shutdown(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn settle_reopens_the_queue() {
        let queue = TaskQueue::new();
        queue.settle().await;
        let ran = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&ran);
        queue.spawn("after-settle", async move {
            flag.fetch_add(1, Ordering::SeqCst);
        });
        queue.settle().await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
