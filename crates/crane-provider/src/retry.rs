//! Fixed-interval bounded retry shared by provider backends.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::{Error, Result, TRACING_TARGET_RETRY};

/// Configuration for a bounded fixed-interval retry loop.
///
/// Cloud APIs and readiness probes carry separate instances of this config:
/// "running" according to the API does not imply "reachable", so the two
/// budgets must never be shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of attempts (at least 1 is always made)
    pub max_attempts: u32,
    /// Fixed pause between attempts
    pub interval: Duration,
}

impl RetryConfig {
    /// Create a new retry configuration.
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    /// Create a configuration that makes a single attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            interval: Duration::ZERO,
        }
    }

    /// Run an async operation under this configuration.
    ///
    /// The operation receives the 1-based attempt number. Cancellation is
    /// observed between attempts: a token fired mid-sleep aborts the loop
    /// promptly with [`Error::Cancelled`], and an operation that itself
    /// returns `Cancelled` is never retried.
    pub async fn run<F, Fut, T>(&self, cancel: &CancellationToken, mut operation: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(err) => {
                    tracing::debug!(
                        target: TRACING_TARGET_RETRY,
                        attempt = attempt,
                        max_attempts = max_attempts,
                        interval_ms = self.interval.as_millis() as u64,
                        error = %err,
                        "attempt failed"
                    );
                    last_error = Some(err);

                    // Don't sleep after the last attempt.
                    if attempt < max_attempts {
                        tokio::select! {
                            () = cancel.cancelled() => return Err(Error::Cancelled),
                            () = tokio::time::sleep(self.interval) => {}
                        }
                    }
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| Error::operation("retry", "all attempts exhausted with no error")))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test]
    async fn succeeds_on_first_attempt() {
        let config = RetryConfig::new(3, Duration::from_millis(5));
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();

        let calls_clone = calls.clone();
        let result = config
            .run(&cancel, |_attempt| {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, Error>(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn succeeds_after_retries() {
        let config = RetryConfig::new(5, Duration::from_millis(2));
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();

        let calls_clone = calls.clone();
        let result = config
            .run(&cancel, |_attempt| {
                let calls = calls_clone.clone();
                async move {
                    let current = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if current < 3 {
                        Err(Error::timeout(Duration::from_millis(1)))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_budget_and_keeps_last_error() {
        let config = RetryConfig::new(3, Duration::from_millis(1));
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        let calls_clone = calls.clone();
        let result: Result<()> = config
            .run(&cancel, |attempt| {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(Error::start(format!("boom {attempt}")))
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(Error::Start { reason }) => assert_eq!(reason, "boom 3"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn attempt_numbers_strictly_increase() {
        let config = RetryConfig::new(4, Duration::from_millis(1));
        let cancel = CancellationToken::new();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));

        let seen_clone = seen.clone();
        let _: Result<()> = config
            .run(&cancel, |attempt| {
                let seen = seen_clone.clone();
                async move {
                    seen.lock().unwrap().push(attempt);
                    Err(Error::timeout(Duration::from_millis(1)))
                }
            })
            .await;

        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn cancellation_aborts_between_attempts() {
        let config = RetryConfig::new(10, Duration::from_secs(60));
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel_clone.cancel();
        });

        let calls_clone = calls.clone();
        let result: Result<()> = config
            .run(&cancel, |_attempt| {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(Error::timeout(Duration::from_millis(1)))
                }
            })
            .await;

        // One attempt ran, then the token fired during the sleep.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn cancelled_operation_is_not_retried() {
        let config = RetryConfig::new(5, Duration::from_millis(1));
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        let calls_clone = calls.clone();
        let result: Result<()> = config
            .run(&cancel, |_attempt| {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(Error::Cancelled)
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
