use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use immich_core::ImmichError;
use tracing::warn;

pub const DEFAULT_ATTEMPTS: u32 = 3;
const DEFAULT_UNIT: Duration = Duration::from_millis(200);

/// Errors that say whether another attempt could succeed.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for ImmichError {
    fn is_retryable(&self) -> bool {
        ImmichError::is_retryable(self)
    }
}

/// Bounded retry with quadratic backoff: after failed attempt `n` the next
/// try waits `n² × unit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_ATTEMPTS, DEFAULT_UNIT)
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, unit: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            unit,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        self.unit.saturating_mul(attempt.saturating_mul(attempt))
    }

    /// Runs `op` until it succeeds, fails permanently or the attempt budget
    /// is spent, returning the last error. `op` receives the 1-based attempt
    /// number.
    pub async fn run<T, E, F, Fut>(&self, what: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display + Retryable,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if attempt >= self.attempts || !err.is_retryable() => return Err(err),
                Err(err) => {
                    let delay = self.delay(attempt);
                    warn!(
                        what,
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %err,
                        "attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, PartialEq)]
    struct Failure {
        message: String,
        retryable: bool,
    }

    impl Failure {
        fn transient(message: String) -> Self {
            Self {
                message,
                retryable: true,
            }
        }
    }

    impl fmt::Display for Failure {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(&self.message)
        }
    }

    impl Retryable for Failure {
        fn is_retryable(&self) -> bool {
            self.retryable
        }
    }

    #[test]
    fn delay_grows_quadratically() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(2), Duration::from_millis(800));
        assert_eq!(policy.delay(3), Duration::from_millis(1800));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();
        let result: Result<&str, Failure> = RetryPolicy::default()
            .run("test", |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(Failure::transient(format!("fail {n}")))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(1000));
        assert!(elapsed < Duration::from_millis(1100));
    }

    #[tokio::test(start_paused = true)]
    async fn returns_last_error_when_exhausted() {
        let result: Result<(), Failure> = RetryPolicy::new(3, Duration::from_millis(10))
            .run("test", |attempt| async move {
                Err(Failure::transient(format!("attempt {attempt}")))
            })
            .await;
        assert_eq!(result.unwrap_err().message, "attempt 3");
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), Failure> = RetryPolicy::default()
            .run("test", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(Failure {
                        message: "not found".into(),
                        retryable: false,
                    })
                }
            })
            .await;
        assert_eq!(result.unwrap_err().message, "not found");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn zero_attempts_still_runs_once() {
        assert_eq!(RetryPolicy::new(0, DEFAULT_UNIT).attempts(), 1);
    }
}
