//! Fixed-delay retry around a fallible async operation.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use lambda_core::config::{InvokeConfig, LoadConfig};
use tracing::warn;

use crate::error::HostError;

/// How an attempt failed.
#[derive(Debug)]
pub enum Retry<E> {
    /// Worth another attempt.
    Transient(E),
    /// Surface immediately.
    Fatal(E),
}

impl Retry<HostError> {
    pub fn classify(error: HostError) -> Self {
        if error.is_transient() {
            Retry::Transient(error)
        } else {
            Retry::Fatal(error)
        }
    }
}

#[derive(Debug)]
pub enum RetryFailure<E> {
    /// Every attempt failed transiently; carries the last cause.
    Exhausted { attempts: u32, last: E },
    Fatal(E),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }

    /// Call `op` with the 1-based attempt number until it succeeds, fails
    /// fatally, or the attempt budget is spent.
    pub async fn run<T, E, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, RetryFailure<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, Retry<E>>>,
        E: fmt::Display,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(Retry::Fatal(e)) => return Err(RetryFailure::Fatal(e)),
                Err(Retry::Transient(e)) if attempt >= attempts => {
                    warn!(%operation, attempts, error = %e, "giving up");
                    return Err(RetryFailure::Exhausted { attempts, last: e });
                }
                Err(Retry::Transient(e)) => {
                    warn!(
                        %operation,
                        attempt,
                        max_attempts = attempts,
                        error = %e,
                        "attempt failed, retrying"
                    );
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl From<&LoadConfig> for RetryPolicy {
    fn from(config: &LoadConfig) -> Self {
        Self::new(config.attempts, config.delay)
    }
}

impl From<&InvokeConfig> for RetryPolicy {
    fn from(config: &InvokeConfig) -> Self {
        Self::new(config.attempts, config.delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        let started = Instant::now();

        let result = policy
            .run("test", |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(Retry::Transient("refused"))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Two sleeps between three attempts.
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_with_last_cause() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        let result: Result<(), _> = policy
            .run("test", |attempt| async move {
                Err(Retry::Transient(format!("failure {attempt}")))
            })
            .await;

        match result {
            Err(RetryFailure::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert_eq!(last, "failure 3");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_stops_immediately() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, Duration::from_secs(1));
        let result: Result<(), _> = policy
            .run("test", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Retry::Fatal("user error")) }
            })
            .await;

        assert!(matches!(result, Err(RetryFailure::Fatal("user error"))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn zero_attempts_still_tries_once() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).attempts, 1);
    }

    #[test]
    fn host_errors_are_classified() {
        assert!(matches!(
            Retry::classify(HostError::NotLoaded),
            Retry::Transient(_)
        ));
        assert!(matches!(
            Retry::classify(HostError::Rejected("bad".into())),
            Retry::Fatal(_)
        ));
    }
}
