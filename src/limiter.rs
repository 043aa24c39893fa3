//! Sliding-window rate limiting for downstream requests.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

const WINDOW: Duration = Duration::from_secs(1);

/// Admits at most `ceiling` requests in any trailing one-second window.
///
/// The window of admission timestamps lives behind an async mutex that stays
/// held across the admission sleep. Serializing admissions this way is the
/// point: concurrent callers cannot all observe free capacity and push the
/// trailing window over the ceiling together. Admission has no error
/// outcome, only delay.
#[derive(Debug)]
pub struct RateLimiter {
    ceiling: usize,
    window: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// # Panics
    ///
    /// Panics when `ceiling` is zero: a zero ceiling admits nothing and
    /// `admit` would suspend forever.
    pub fn new(ceiling: usize) -> Self {
        assert!(ceiling > 0, "rate limiter ceiling must be positive");
        Self {
            ceiling,
            window: Mutex::new(VecDeque::with_capacity(ceiling)),
        }
    }

    /// Configured requests-per-second ceiling.
    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Suspends until one more request fits under the ceiling, then records
    /// the admission.
    pub async fn admit(&self) {
        let mut window = self.window.lock().await;
        loop {
            let now = Instant::now();
            while window
                .front()
                .is_some_and(|&oldest| now.duration_since(oldest) >= WINDOW)
            {
                window.pop_front();
            }
            if window.len() < self.ceiling {
                window.push_back(now);
                return;
            }
            let oldest = window[0];
            let wait = WINDOW.saturating_sub(now.duration_since(oldest));
            tracing::debug!(
                wait_ms = wait.as_millis() as u64,
                ceiling = self.ceiling,
                "rate limiter sleeping before next admission"
            );
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    #[should_panic(expected = "ceiling must be positive")]
    fn zero_ceiling_is_rejected() {
        let _ = RateLimiter::new(0);
    }

    #[tokio::test(start_paused = true)]
    async fn admissions_under_the_ceiling_do_not_wait() {
        let limiter = RateLimiter::new(5);
        let start = Instant::now();
        for _ in 0..5 {
            limiter.admit().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn sixth_admission_waits_for_the_window_to_clear() {
        let limiter = RateLimiter::new(5);
        let start = Instant::now();
        for _ in 0..6 {
            limiter.admit().await;
        }
        assert!(start.elapsed() >= WINDOW);
    }

    #[tokio::test(start_paused = true)]
    async fn trailing_window_never_exceeds_ceiling() {
        let ceiling = 3;
        let limiter = RateLimiter::new(ceiling);
        let mut admissions = Vec::new();
        for _ in 0..10 {
            limiter.admit().await;
            admissions.push(Instant::now());
        }

        // Any admission and the one `ceiling` places later are at least one
        // window apart, so no trailing window holds more than `ceiling`.
        for pair in admissions.windows(ceiling + 1) {
            let span = pair[ceiling].duration_since(pair[0]);
            assert!(span >= WINDOW, "window of {ceiling} exceeded: {span:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_respect_the_ceiling() {
        let ceiling = 4;
        let limiter = Arc::new(RateLimiter::new(ceiling));
        let times = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for _ in 0..12 {
            let limiter = Arc::clone(&limiter);
            let times = Arc::clone(&times);
            handles.push(tokio::spawn(async move {
                limiter.admit().await;
                times.lock().await.push(Instant::now());
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let mut admissions = times.lock().await.clone();
        admissions.sort();
        for pair in admissions.windows(ceiling + 1) {
            assert!(pair[ceiling].duration_since(pair[0]) >= WINDOW);
        }
    }
}
