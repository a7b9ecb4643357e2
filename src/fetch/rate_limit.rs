use crate::config::RateLimit;
use crate::fetch::error::FetchError;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};

/// Sliding-window request budget.
///
/// `acquire` suspends the caller until a slot frees up instead of issuing
/// the call early; the suspension is bounded by the caller's timeout.
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    issued: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(limit: RateLimit) -> Self {
        // A zero budget would never admit a request.
        let max_requests = limit.max_requests.max(1);
        Self {
            max_requests,
            window: limit.window,
            issued: Mutex::new(VecDeque::with_capacity(max_requests as usize)),
        }
    }

    /// Claims one request slot, waiting for window replenishment if the
    /// budget is spent. Fails with [`FetchError::Timeout`] when the wait
    /// would exceed `timeout`.
    pub async fn acquire(&self, timeout: Duration) -> Result<(), FetchError> {
        let deadline = Instant::now() + timeout;
        loop {
            let wait_until = {
                let mut issued = self.issued.lock().await;
                let now = Instant::now();
                while let Some(front) = issued.front() {
                    if *front + self.window <= now {
                        issued.pop_front();
                    } else {
                        break;
                    }
                }
                match issued.front() {
                    Some(front) if issued.len() as u32 >= self.max_requests => *front + self.window,
                    _ => {
                        issued.push_back(now);
                        return Ok(());
                    }
                }
            };
            if wait_until > deadline {
                return Err(FetchError::Timeout {
                    reason: "rate budget replenishment",
                    limit: timeout,
                });
            }
            sleep_until(wait_until).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_requests: u32, window_secs: u64) -> RateLimiter {
        RateLimiter::new(RateLimit {
            max_requests,
            window: Duration::from_secs(window_secs),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn budget_admits_up_to_max_without_waiting() {
        let limiter = limiter(3, 60);
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire(Duration::from_secs(300)).await.unwrap();
        }
        assert_eq!(Instant::now(), start);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_budget_suspends_until_replenishment() {
        let limiter = limiter(2, 60);
        let start = Instant::now();
        for _ in 0..2 {
            limiter.acquire(Duration::from_secs(300)).await.unwrap();
        }
        limiter.acquire(Duration::from_secs(300)).await.unwrap();
        assert!(Instant::now() >= start + Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_beyond_timeout_fails_instead_of_suspending() {
        let limiter = limiter(1, 60);
        limiter.acquire(Duration::from_secs(300)).await.unwrap();
        let err = limiter.acquire(Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, FetchError::Timeout { .. }));
    }
}
