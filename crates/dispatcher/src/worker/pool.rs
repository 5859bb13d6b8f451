//! Bounded execution pool for job work units

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::debug;

/// Runs at most `capacity` work units at once
///
/// Units past capacity are spawned anyway and wait for a permit inside their own
/// task. Capacity can change at runtime: growing adds permits immediately,
/// shrinking retires permits as running units release them.
pub struct JobPool {
    permits: Arc<Semaphore>,
    capacity: Mutex<usize>,
}

impl JobPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity: Mutex::new(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        *self.capacity.lock()
    }

    /// Permits not held by running units
    #[cfg(test)]
    fn idle_slots(&self) -> usize {
        self.permits.available_permits()
    }

    /// Change the concurrency limit
    pub fn resize(&self, capacity: usize) {
        let mut current = self.capacity.lock();
        if capacity == *current {
            return;
        }

        if capacity > *current {
            self.permits.add_permits(capacity - *current);
        } else {
            let excess = *current - capacity;
            let retired = self.permits.forget_permits(excess);
            let outstanding = excess - retired;
            if outstanding > 0 {
                let permits = Arc::clone(&self.permits);
                tokio::spawn(async move {
                    if let Ok(held) = permits.acquire_many_owned(outstanding as u32).await {
                        held.forget();
                    }
                });
            }
        }

        debug!(from = *current, to = capacity, "Resized job pool");
        *current = capacity;
    }

    /// Spawn a work unit; it starts once a permit is free
    pub fn spawn<F>(&self, work: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        tokio::spawn(async move {
            let _permit = permits.acquire_owned().await.ok();
            work.await;
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    async fn run_units(pool: &JobPool, units: usize) -> usize {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();

        for _ in 0..units {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            handles.push(pool.spawn(async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        peak.load(Ordering::SeqCst)
    }

    #[tokio::test]
    async fn test_pool_limits_concurrency() {
        let pool = JobPool::new(2);
        let peak = run_units(&pool, 6).await;
        assert!(peak <= 2, "peak {}", peak);
        assert_eq!(pool.idle_slots(), 2);
    }

    #[tokio::test]
    async fn test_grow_pool() {
        let pool = JobPool::new(1);
        pool.resize(3);
        assert_eq!(pool.capacity(), 3);
        assert_eq!(pool.idle_slots(), 3);
    }

    #[tokio::test]
    async fn test_shrink_idle_pool() {
        let pool = JobPool::new(4);
        pool.resize(1);
        assert_eq!(pool.capacity(), 1);
        assert_eq!(pool.idle_slots(), 1);
        let peak = run_units(&pool, 3).await;
        assert_eq!(peak, 1);
    }

    #[tokio::test]
    async fn test_shrink_busy_pool_retires_permits_later() {
        let pool = JobPool::new(2);
        let gate = Arc::new(tokio::sync::Notify::new());

        let mut handles = Vec::new();
        for _ in 0..2 {
            let gate = Arc::clone(&gate);
            handles.push(pool.spawn(async move { gate.notified().await }));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(pool.idle_slots(), 0);

        pool.resize(1);
        gate.notify_waiters();
        for handle in handles {
            handle.await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(pool.idle_slots(), 1);
    }
}
