//! Per-minute request budget for HTTP-backed sources, on top of `governor`.

use std::fmt;
use std::num::NonZeroU32;
use std::time::Duration;

use governor::clock::Clock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as Governor};
use tracing::debug;

/// governor clock reading tokio time, so a paused runtime controls it.
#[derive(Debug, Clone)]
struct TokioClock {
    origin: tokio::time::Instant,
}

impl TokioClock {
    fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    type Instant = Duration;

    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

type DirectLimiter = Governor<NotKeyed, InMemoryState, TokioClock, NoOpMiddleware<Duration>>;

/// Allows bursts of up to `requests_per_minute`, then one request every
/// `60s / requests_per_minute`.
pub struct RateLimiter {
    limiter: DirectLimiter,
    clock: TokioClock,
    per_minute: NonZeroU32,
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("per_minute", &self.per_minute)
            .finish()
    }
}

impl RateLimiter {
    /// Limiter with a per-minute budget; zero is raised to one.
    pub fn per_minute(requests: usize) -> Self {
        let per_minute = u32::try_from(requests)
            .ok()
            .and_then(NonZeroU32::new)
            .unwrap_or(NonZeroU32::MIN);
        let clock = TokioClock::new();
        Self {
            limiter: Governor::direct_with_clock(Quota::per_minute(per_minute), clock.clone()),
            clock,
            per_minute,
        }
    }

    /// Wait until the quota admits one more request.
    ///
    /// `until_ready` sleeps on wall-clock timers; this loop sleeps on tokio time.
    pub async fn acquire(&self) {
        while let Err(not_until) = self.limiter.check() {
            let wait = not_until.wait_time_from(self.clock.now());
            debug!(wait_ms = wait.as_millis() as u64, "rate limit reached");
            tokio::time::sleep(wait).await;
        }
    }

    pub fn max_requests(&self) -> usize {
        self.per_minute.get() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_acquire_within_budget_does_not_wait() {
        let limiter = RateLimiter::per_minute(3);
        let start = Instant::now();

        for _ in 0..3 {
            limiter.acquire().await;
        }

        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_over_budget_waits_for_replenishment() {
        let limiter = RateLimiter::per_minute(2);
        let start = Instant::now();

        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;

        // Two per minute replenish one slot every 30 seconds.
        assert!(start.elapsed() >= Duration::from_secs(30));
        assert!(start.elapsed() < Duration::from_secs(31));
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_recovers_after_idle_minute() {
        let limiter = RateLimiter::per_minute(2);
        limiter.acquire().await;
        limiter.acquire().await;

        tokio::time::advance(Duration::from_secs(61)).await;

        let before = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert_eq!(before.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_zero_budget_is_raised_to_one() {
        let limiter = RateLimiter::per_minute(0);
        assert_eq!(limiter.max_requests(), 1);
    }
}
