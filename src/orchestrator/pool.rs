//! Bounded recognition pool
//!
//! The main loop acquires a permit before spawning each recognition task;
//! when every worker is busy the acquire waits, which throttles frame
//! dispatch instead of queueing frames.

use crate::error::{Error, Result};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Upper bound for `RECOGNITION_WORKERS`
pub const MAX_RECOGNITION_WORKERS: usize = 256;

pub struct RecognitionPool {
    semaphore: Arc<Semaphore>,
    workers: usize,
}

impl RecognitionPool {
    pub fn new(workers: usize) -> Self {
        let workers = workers.clamp(1, MAX_RECOGNITION_WORKERS);
        Self {
            semaphore: Arc::new(Semaphore::new(workers)),
            workers,
        }
    }

    /// Wait for a free worker slot
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| Error::Internal(format!("Semaphore error: {}", e)))
    }

    /// Recognition tasks currently holding a permit
    pub fn in_flight(&self) -> usize {
        self.workers - self.semaphore.available_permits()
    }

    /// Wait until every in-flight task has finished
    pub async fn drain(&self) {
        let in_flight = self.in_flight();
        if in_flight > 0 {
            tracing::debug!(in_flight, "Waiting for in-flight recognition tasks");
        }
        // Closed semaphore can't happen here; nothing calls close()
        let _ = self.semaphore.acquire_many(self.workers as u32).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_acquire_blocks_when_saturated() {
        let pool = RecognitionPool::new(2);
        let a = pool.acquire().await.unwrap();
        let _b = pool.acquire().await.unwrap();
        assert_eq!(pool.in_flight(), 2);

        let blocked = tokio::time::timeout(Duration::from_millis(100), pool.acquire()).await;
        assert!(blocked.is_err());

        drop(a);
        let third = tokio::time::timeout(Duration::from_millis(100), pool.acquire()).await;
        assert!(third.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_waits_for_in_flight() {
        let pool = RecognitionPool::new(2);
        let permit = pool.acquire().await.unwrap();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            drop(permit);
        });

        let started = tokio::time::Instant::now();
        pool.drain().await;
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_count_is_clamped() {
        let single = RecognitionPool::new(0);
        let _permit = single.acquire().await.unwrap();
        assert!(tokio::time::timeout(Duration::from_millis(10), single.acquire())
            .await
            .is_err());

        let capped = RecognitionPool::new(usize::MAX);
        assert_eq!(capped.in_flight(), 0);
        assert_eq!(capped.semaphore.available_permits(), MAX_RECOGNITION_WORKERS);
    }
}
