//! # Engine Concurrency Limiter
//!
//! Process-wide counting gate in front of the recognition engine. However
//! many sessions are connected, at most `max_concurrent` engine invocations
//! run at once; everyone else waits their turn at the gate.
//!
//! ## Key Rust Concepts:
//! - **Semaphore**: `tokio::sync::Semaphore` hands out permits; holders run,
//!   waiters suspend without blocking a thread
//! - **RAII lease**: the permit is wrapped in a `Lease` that returns it on
//!   `Drop`, so every exit path (success, failure, panic unwind) releases
//!   exactly once and can never release twice

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::transcription::TranscribeError;

/// One unit of admission through the limiter. Dropping the lease returns the
/// permit.
pub struct Lease {
    _permit: OwnedSemaphorePermit,
}

/// Counting gate shared by every session in the process.
#[derive(Clone)]
pub struct ConcurrencyLimiter {
    permits: Arc<Semaphore>,
}

impl ConcurrencyLimiter {
    /// Create a limiter admitting at most `max_concurrent` holders. Values
    /// below 1 are clamped to 1 so the gate can never deadlock the process.
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Wait for a permit or for the cancellation signal, whichever comes
    /// first. A cancelled acquire consumes no permit.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<Lease, TranscribeError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(TranscribeError::Cancelled),
            permit = Arc::clone(&self.permits).acquire_owned() => {
                // The semaphore is never closed; a close can only mean the
                // process is shutting down, which callers treat as cancelled.
                permit
                    .map(|permit| Lease { _permit: permit })
                    .map_err(|_| TranscribeError::Cancelled)
            }
        }
    }

    /// Permits currently available (used by tests and the health surface).
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_acquire_and_release() {
        let limiter = ConcurrencyLimiter::new(2);
        let cancel = CancellationToken::new();

        let first = limiter.acquire(&cancel).await.unwrap();
        let _second = limiter.acquire(&cancel).await.unwrap();
        assert_eq!(limiter.available_permits(), 0);

        drop(first);
        assert_eq!(limiter.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_acquire_blocks_at_capacity() {
        let limiter = ConcurrencyLimiter::new(1);
        let cancel = CancellationToken::new();

        let _held = limiter.acquire(&cancel).await.unwrap();

        let waiting = limiter.acquire(&cancel);
        assert!(
            timeout(Duration::from_millis(100), waiting).await.is_err(),
            "acquire should wait while all permits are held"
        );
    }

    #[tokio::test]
    async fn test_cancelled_acquire_consumes_no_permit() {
        let limiter = ConcurrencyLimiter::new(1);
        let cancel = CancellationToken::new();

        let held = limiter.acquire(&cancel).await.unwrap();

        let waiter = tokio::spawn({
            let limiter = limiter.clone();
            let cancel = cancel.clone();
            async move { limiter.acquire(&cancel).await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let result = timeout(Duration::from_secs(1), waiter)
            .await
            .expect("cancelled acquire should return promptly")
            .unwrap();
        assert!(matches!(result, Err(TranscribeError::Cancelled)));

        // Releasing the held lease restores full capacity: the cancelled
        // waiter did not leak a permit.
        drop(held);
        assert_eq!(limiter.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_zero_is_clamped_to_one() {
        let limiter = ConcurrencyLimiter::new(0);
        let cancel = CancellationToken::new();
        let _lease = limiter.acquire(&cancel).await.unwrap();
    }
}
