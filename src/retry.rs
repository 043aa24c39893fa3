//! Bounded exponential backoff with jitter for fallible downstream work.
//!
//! The executor is deliberately error-agnostic: it never classifies failures
//! as retryable versus fatal. Any error from the wrapped work triggers the
//! same policy until the attempt budget is spent. Backoff state is scoped to
//! one unit of work; nothing is shared across batches.

use std::future::Future;
use std::time::Duration;

use rand::RngExt;

/// Backoff policy: attempt the work up to `max_retries + 1` times, waiting
/// `retry_min_seconds * 2^attempt + uniform(0, 1)` seconds between attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_min_seconds: u64,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, retry_min_seconds: u64) -> Self {
        Self {
            max_retries,
            retry_min_seconds,
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self
            .retry_min_seconds
            .saturating_mul(2u64.saturating_pow(attempt));
        let jitter: f64 = rand::rng().random_range(0.0..1.0);
        Duration::from_secs_f64(base as f64 + jitter)
    }

    /// Drives `work` to a terminal outcome under this policy.
    ///
    /// Attempts are strictly sequential; the only suspension points are the
    /// work itself and the backoff sleeps.
    pub async fn run<T, E, F, Fut>(&self, mut work: F) -> RetryOutcome<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut state = RetryState::Attempting { attempt: 0 };
        loop {
            state = match state {
                RetryState::Attempting { attempt } => match work().await {
                    Ok(value) => {
                        return RetryOutcome::Succeeded {
                            value,
                            attempts: attempt + 1,
                        };
                    }
                    Err(error) if attempt == self.max_retries => {
                        return RetryOutcome::Exhausted {
                            last_error: error,
                            attempts: attempt + 1,
                        };
                    }
                    Err(error) => RetryState::Backoff { attempt, error },
                },
                RetryState::Backoff { attempt, error } => {
                    let wait = self.backoff_delay(attempt);
                    tracing::warn!(
                        error = %error,
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        wait_s = wait.as_secs_f64(),
                        "attempt failed, backing off before retry"
                    );
                    tokio::time::sleep(wait).await;
                    RetryState::Attempting { attempt: attempt + 1 }
                }
            };
        }
    }
}

/// Per-attempt state of one retried unit of work.
enum RetryState<E> {
    Attempting { attempt: u32 },
    Backoff { attempt: u32, error: E },
}

/// Terminal outcome of a retried unit of work.
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    /// The work succeeded; `attempts` counts the successful one.
    Succeeded { value: T, attempts: u32 },
    /// Every attempt failed; carries the final error.
    Exhausted { last_error: E, attempts: u32 },
}

impl<T, E> RetryOutcome<T, E> {
    /// Number of attempts consumed, terminal one included.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Succeeded { attempts, .. } => *attempts,
            RetryOutcome::Exhausted { attempts, .. } => *attempts,
        }
    }

    /// Returns `true` for a terminal success.
    pub fn is_success(&self) -> bool {
        matches!(self, RetryOutcome::Succeeded { .. })
    }
}
