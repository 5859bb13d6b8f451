//! Job claiming and the inter-tick sleep

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, instrument, trace};

use crate::job::ClaimedJob;
use crate::persistence::{JobQueue, StoreError};

/// Claims work from the shared queue and waits between ticks
///
/// The wait returns early when shutdown is signalled.
pub struct JobPoller {
    queue: Arc<dyn JobQueue>,
    shutdown_rx: watch::Receiver<bool>,
}

impl JobPoller {
    pub fn new(queue: Arc<dyn JobQueue>, shutdown_rx: watch::Receiver<bool>) -> Self {
        Self { queue, shutdown_rx }
    }

    /// Claim up to `available` jobs, oldest first
    #[instrument(skip(self))]
    pub async fn claim(&self, available: usize) -> Result<Vec<ClaimedJob>, StoreError> {
        if available == 0 || self.is_shutdown() {
            return Ok(vec![]);
        }

        let jobs = self.queue.claim_jobs(available, Utc::now()).await?;
        if jobs.is_empty() {
            trace!("No jobs waiting");
        } else {
            debug!(count = jobs.len(), "Claimed jobs");
        }
        Ok(jobs)
    }

    /// Sleep for `interval`
    ///
    /// Returns `true` if shutdown was signalled instead.
    pub async fn wait(&self, interval: Duration) -> bool {
        if self.is_shutdown() {
            return true;
        }
        let mut shutdown_rx = self.shutdown_rx.clone();
        tokio::select! {
            _ = tokio::time::sleep(interval) => false,
            changed = shutdown_rx.changed() => {
                debug!("Shutdown signal received during wait");
                changed.is_err() || *shutdown_rx.borrow()
            }
        }
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_rx.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryJobQueue;

    #[tokio::test]
    async fn test_claim_respects_available_slots() {
        let queue = Arc::new(InMemoryJobQueue::new());
        for _ in 0..3 {
            queue.insert_created("export", "{}", Utc::now());
        }
        let (_tx, rx) = watch::channel(false);
        let poller = JobPoller::new(queue.clone(), rx);

        assert!(poller.claim(0).await.unwrap().is_empty());
        assert_eq!(poller.claim(2).await.unwrap().len(), 2);
        assert_eq!(poller.claim(5).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_wait_returns_early_on_shutdown() {
        let (tx, rx) = watch::channel(false);
        let poller = JobPoller::new(Arc::new(InMemoryJobQueue::new()), rx);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = tx.send(true);
        });

        let started = std::time::Instant::now();
        assert!(poller.wait(Duration::from_secs(30)).await);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(poller.is_shutdown());
    }

    #[tokio::test]
    async fn test_wait_sleeps_without_shutdown() {
        let (_tx, rx) = watch::channel(false);
        let poller = JobPoller::new(Arc::new(InMemoryJobQueue::new()), rx);

        assert!(!poller.wait(Duration::from_millis(20)).await);
    }
}
