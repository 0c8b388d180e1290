//! Concurrency control for uploads.
//!
//! Spooling an upload ties up memory (up to the buffering threshold) and a file descriptor for
//! its whole duration, so deployments can bound how many run at once.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::UploadLimitsConfig;
use crate::errors::{Error, Result};

/// Controls concurrent upload capacity.
///
/// A bounded queue with configurable concurrency, waiting capacity and timeout. When limits are
/// exceeded, requests receive HTTP 429 (Too Many Requests).
#[derive(Debug)]
pub struct UploadLimiter {
    semaphore: Arc<Semaphore>,
    /// Current number of requests waiting for a permit
    waiting_count: AtomicUsize,
    /// None = unlimited
    max_waiting: Option<usize>,
    max_wait: Duration,
}

impl UploadLimiter {
    /// Creates a limiter from configuration.
    ///
    /// If `max_concurrent_uploads` is 0, returns `None` (unlimited uploads).
    /// If `max_waiting_uploads` is 0, unlimited waiting is allowed.
    pub fn new(config: &UploadLimitsConfig) -> Option<Self> {
        if config.max_concurrent_uploads == 0 {
            return None;
        }

        Some(Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_uploads)),
            waiting_count: AtomicUsize::new(0),
            max_waiting: (config.max_waiting_uploads != 0).then_some(config.max_waiting_uploads),
            max_wait: config.max_upload_wait,
        })
    }

    /// Waits for an upload slot.
    ///
    /// Fails with [`Error::TooManyRequests`] when the waiting queue is full or the wait times out.
    pub async fn acquire(&self) -> Result<UploadPermit> {
        if let Ok(permit) = self.semaphore.clone().try_acquire_owned() {
            return Ok(UploadPermit { _permit: permit });
        }

        let current_waiting = self.waiting_count.fetch_add(1, Ordering::SeqCst);
        // Leaves the queue on every exit, including when the request future is dropped mid-wait
        let _waiting = scopeguard::guard(&self.waiting_count, |count| {
            count.fetch_sub(1, Ordering::SeqCst);
        });

        if let Some(max_waiting) = self.max_waiting
            && current_waiting >= max_waiting
        {
            tracing::debug!(waiting = current_waiting, max_waiting, "Upload queue full");
            return Err(Error::TooManyRequests {
                message: "Too many uploads in progress. Please retry later.".to_string(),
            });
        }

        // A permit may have been released while we were joining the queue
        if let Ok(permit) = self.semaphore.clone().try_acquire_owned() {
            return Ok(UploadPermit { _permit: permit });
        }

        if self.max_wait.is_zero() {
            return Err(Error::TooManyRequests {
                message: "Too many uploads in progress. Please retry later.".to_string(),
            });
        }

        match tokio::time::timeout(self.max_wait, self.semaphore.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(UploadPermit { _permit: permit }),
            Ok(Err(_)) => Err(Error::TooManyRequests {
                message: "Upload service temporarily unavailable.".to_string(),
            }),
            Err(_) => Err(Error::TooManyRequests {
                message: "Timed out waiting for upload slot. Please retry later.".to_string(),
            }),
        }
    }
}

/// Releases the upload slot when dropped.
#[must_use]
pub struct UploadPermit {
    _permit: OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(max_concurrent: usize, max_waiting: usize, max_wait: Duration) -> UploadLimitsConfig {
        UploadLimitsConfig {
            max_concurrent_uploads: max_concurrent,
            max_waiting_uploads: max_waiting,
            max_upload_wait: max_wait,
        }
    }

    #[test]
    fn test_zero_concurrency_disables_limiter() {
        let config = test_config(0, 20, Duration::from_secs(60));
        assert!(UploadLimiter::new(&config).is_none());
    }

    #[tokio::test]
    async fn test_acquire_when_available() {
        let limiter = UploadLimiter::new(&test_config(2, 10, Duration::from_secs(60))).unwrap();

        let _first = limiter.acquire().await.unwrap();
        let _second = limiter.acquire().await.unwrap();
    }

    #[tokio::test]
    async fn test_waiter_gets_released_slot() {
        let limiter = Arc::new(UploadLimiter::new(&test_config(1, 10, Duration::from_secs(5))).unwrap());

        let held = limiter.acquire().await.unwrap();

        let waiter = limiter.clone();
        let handle = tokio::spawn(async move { waiter.acquire().await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(held);

        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_rejects_when_queue_full() {
        let limiter = Arc::new(UploadLimiter::new(&test_config(1, 1, Duration::from_secs(60))).unwrap());

        let _held = limiter.acquire().await.unwrap();

        let waiter = limiter.clone();
        let _queued = tokio::spawn(async move { waiter.acquire().await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        match limiter.acquire().await {
            Err(Error::TooManyRequests { message }) => assert!(message.contains("Too many uploads")),
            Err(e) => panic!("Expected TooManyRequests, got {e:?}"),
            Ok(_) => panic!("Expected TooManyRequests, got a permit"),
        }
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let limiter = UploadLimiter::new(&test_config(1, 10, Duration::from_millis(200))).unwrap();

        let _held = limiter.acquire().await.unwrap();

        let start = std::time::Instant::now();
        let result = limiter.acquire().await;

        assert!(start.elapsed() >= Duration::from_millis(200));
        match result {
            Err(Error::TooManyRequests { message }) => assert!(message.contains("Timed out")),
            Err(e) => panic!("Expected TooManyRequests, got {e:?}"),
            Ok(_) => panic!("Expected TooManyRequests, got a permit"),
        }
    }

    #[tokio::test]
    async fn test_zero_wait_rejects_immediately() {
        let limiter = UploadLimiter::new(&test_config(1, 10, Duration::ZERO)).unwrap();

        let _held = limiter.acquire().await.unwrap();

        let start = std::time::Instant::now();
        assert!(limiter.acquire().await.is_err());
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_cancelled_waiter_leaves_queue() {
        let limiter = Arc::new(UploadLimiter::new(&test_config(1, 1, Duration::from_secs(60))).unwrap());

        let held = limiter.acquire().await.unwrap();

        // Client goes away while queued: the handler future is dropped mid-wait
        let waiter = limiter.clone();
        let abandoned = tokio::spawn(async move { waiter.acquire().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(limiter.waiting_count.load(Ordering::SeqCst), 1);
        abandoned.abort();
        match abandoned.await {
            Err(e) => assert!(e.is_cancelled()),
            Ok(_) => panic!("Expected the queued acquire to be cancelled"),
        }
        assert_eq!(limiter.waiting_count.load(Ordering::SeqCst), 0);

        // The freed queue slot is usable by the next upload
        let waiter = limiter.clone();
        let next = tokio::spawn(async move { waiter.acquire().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(held);

        assert!(next.await.unwrap().is_ok());
        assert_eq!(limiter.waiting_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rejected_waiter_leaves_queue() {
        let limiter = UploadLimiter::new(&test_config(1, 10, Duration::ZERO)).unwrap();

        let _held = limiter.acquire().await.unwrap();
        assert!(limiter.acquire().await.is_err());

        assert_eq!(limiter.waiting_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_permit_released_on_drop() {
        let limiter = UploadLimiter::new(&test_config(1, 10, Duration::from_secs(1))).unwrap();

        drop(limiter.acquire().await.unwrap());

        assert!(limiter.acquire().await.is_ok());
    }
}
