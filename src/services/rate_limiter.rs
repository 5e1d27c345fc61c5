use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::{sleep, Duration, Instant};

/// Rate limiter to control outbound request frequency.
///
/// Two call sites share budgets through this type: quote lookups (one request
/// per 12 s against the quote provider) and LLM calls (100 ms spacing across
/// every capability, so pipeline and monitor callers draw from one bucket).
pub struct RateLimiter {
    /// Semaphore to limit concurrent requests
    semaphore: Arc<Semaphore>,
    /// Last request timestamp to enforce minimum delay between requests
    last_request: Arc<Mutex<Instant>>,
    /// Minimum delay between requests
    min_delay: Duration,
}

impl RateLimiter {
    /// `max_concurrent` bounds in-flight requests; `min_delay` is the minimum
    /// spacing between consecutive request starts.
    pub fn new(max_concurrent: usize, min_delay: Duration) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            last_request: Arc::new(Mutex::new(Instant::now() - min_delay)),
            min_delay,
        }
    }

    /// Convenience constructor from a requests-per-minute budget.
    pub fn per_minute(max_concurrent: usize, requests_per_minute: u32) -> Self {
        Self::new(
            max_concurrent,
            Duration::from_millis(60_000 / requests_per_minute.max(1) as u64),
        )
    }

    /// Acquire permission to make a request.
    ///
    /// Blocks until a concurrency permit is free and the minimum spacing since
    /// the previous request has elapsed. Returns a guard that releases the
    /// permit when dropped.
    pub async fn acquire(&self) -> RateLimitGuard {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("rate limiter semaphore closed");

        loop {
            let wait_time = {
                let mut last = self.last_request.lock();
                let elapsed = last.elapsed();

                if elapsed < self.min_delay {
                    Some(self.min_delay - elapsed)
                } else {
                    *last = Instant::now();
                    None
                }
            }; // Lock is dropped here

            match wait_time {
                Some(delay) => sleep(delay).await,
                None => break,
            }
        }

        RateLimitGuard { _permit: permit }
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// Guard that holds a rate limit permit.
/// The permit is automatically released when this is dropped.
pub struct RateLimitGuard {
    _permit: tokio::sync::OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant as StdInstant;

    #[tokio::test]
    async fn test_rate_limiter_enforces_delay() {
        let limiter = RateLimiter::new(2, Duration::from_millis(200));

        let start = StdInstant::now();

        let guard1 = limiter.acquire().await;
        assert!(start.elapsed().as_millis() < 100, "first acquire is immediate");
        drop(guard1);

        let _guard2 = limiter.acquire().await;
        assert!(
            start.elapsed().as_millis() >= 180,
            "second acquire waits out the spacing"
        );
    }

    #[tokio::test]
    async fn test_concurrent_limit() {
        let limiter = Arc::new(RateLimiter::new(2, Duration::from_millis(50)));

        let mut handles = Vec::new();
        for _ in 0..3 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                let _guard = limiter.acquire().await;
                sleep(Duration::from_millis(50)).await;
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_per_minute_constructor() {
        let limiter = RateLimiter::per_minute(3, 60);
        assert_eq!(limiter.available_permits(), 3);
        assert_eq!(limiter.min_delay, Duration::from_millis(1000));
    }
}
