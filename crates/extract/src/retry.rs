use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    max_retries: usize,
    initial_backoff: Duration,
    max_backoff: Duration,
}

/// The last error once a policy has given up, with the number of attempts made.
#[derive(Debug, Error)]
#[error("{operation} failed after {attempts} attempt(s): {error}")]
pub struct RetryError<E> {
    pub operation: &'static str,
    pub attempts: usize,
    pub error: E,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, 1000, 10000)
    }
}

impl RetryPolicy {
    pub fn new(max_retries: usize, initial_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            max_retries,
            initial_backoff: Duration::from_millis(initial_backoff_ms),
            max_backoff: Duration::from_millis(max_backoff_ms),
        }
    }

    pub fn no_retry() -> Self {
        Self::new(0, 0, 0)
    }

    /// Retry a future with exponential backoff
    pub async fn retry<F, Fut, T, E>(
        &self,
        operation_name: &'static str,
        f: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.retry_if(operation_name, f, |_| true).await
    }

    /// Like [`RetryPolicy::retry`], but gives up immediately on errors for
    /// which `should_retry` returns false.
    pub async fn retry_if<F, Fut, T, E, P>(
        &self,
        operation_name: &'static str,
        mut f: F,
        should_retry: P,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        P: Fn(&E) -> bool,
    {
        let mut attempt = 0;
        let mut backoff = self.initial_backoff;

        loop {
            match f().await {
                Ok(result) => {
                    if attempt > 0 {
                        info!(
                            operation = operation_name,
                            attempts = attempt + 1,
                            "Operation succeeded after retries"
                        );
                    }
                    return Ok(result);
                }
                Err(e) => {
                    attempt += 1;
                    if attempt > self.max_retries || !should_retry(&e) {
                        warn!(
                            operation = operation_name,
                            attempts = attempt,
                            error = %e,
                            "Operation failed, giving up"
                        );
                        return Err(RetryError {
                            operation: operation_name,
                            attempts: attempt,
                            error: e,
                        });
                    }

                    warn!(
                        operation = operation_name,
                        attempt = attempt,
                        max_retries = self.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Operation failed, retrying"
                    );

                    sleep(backoff).await;

                    backoff = std::cmp::min(backoff * 2, self.max_backoff);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicUsize::new(0);
        let calls = &calls;
        let policy = RetryPolicy::new(3, 1, 2);

        let result = policy
            .retry("flaky", || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err("not yet")
                } else {
                    Ok(42)
                }
            })
            .await
            .unwrap();

        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let calls = AtomicUsize::new(0);
        let calls = &calls;
        let policy = RetryPolicy::new(2, 1, 1);

        let err = policy
            .retry("always_failing", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>("boom")
            })
            .await
            .unwrap_err();

        assert_eq!(err.attempts, 3);
        assert_eq!(err.error, "boom");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_errors_stop_immediately() {
        let calls = AtomicUsize::new(0);
        let calls = &calls;
        let policy = RetryPolicy::new(5, 1, 1);

        let err = policy
            .retry_if(
                "config",
                || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("fatal")
                },
                |e| *e != "fatal",
            )
            .await
            .unwrap_err();

        assert_eq!(err.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
