use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::clock::{Clock, SystemClock};
use crate::error::WeirError;
use crate::limit::{check_ctx, Limiter};

/// Fixed-window limiter: at most `rate` admissions per `interval`.
///
/// State is two atomics, the window start timestamp and the in-window
/// counter; the window advances by compare-and-swap, so there is no lock on
/// the admission path. Each `allow` increments the counter exactly once.
pub struct FixedWindow {
    interval_nanos: u64,
    rate: u64,
    start: AtomicU64,
    count: AtomicU64,
    closed: AtomicBool,
    clock: Arc<dyn Clock>,
}

impl FixedWindow {
    pub fn new(interval: Duration, rate: u64) -> Self {
        Self::with_clock(interval, rate, Arc::new(SystemClock::new()))
    }

    /// Override the clock (useful for deterministic tests).
    pub fn with_clock(interval: Duration, rate: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            interval_nanos: u64::try_from(interval.as_nanos()).unwrap_or(u64::MAX),
            rate,
            start: AtomicU64::new(clock.now_nanos()),
            count: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            clock,
        }
    }
}

#[async_trait]
impl Limiter for FixedWindow {
    async fn allow(&self, ctx: &CancellationToken) -> Result<bool, WeirError> {
        check_ctx(ctx)?;
        if self.closed.load(Ordering::Acquire) {
            return Err(WeirError::Closed);
        }

        let now = self.clock.now_nanos();
        let start = self.start.load(Ordering::Acquire);
        // Window expired: whoever wins the CAS resets the counter.
        if now >= start.saturating_add(self.interval_nanos)
            && self
                .start
                .compare_exchange(start, now, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            self.count.store(0, Ordering::Release);
        }

        let cnt = self.count.fetch_add(1, Ordering::AcqRel) + 1;
        if cnt > self.rate {
            return Err(WeirError::OverMaxLimit);
        }
        Ok(true)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn window(interval: Duration, rate: u64) -> (FixedWindow, ManualClock) {
        let clock = ManualClock::new();
        let limiter = FixedWindow::with_clock(interval, rate, Arc::new(clock.clone()));
        (limiter, clock)
    }

    #[tokio::test]
    async fn admits_rate_per_window() {
        let (limiter, _clock) = window(Duration::from_secs(5), 3);
        let ctx = CancellationToken::new();

        for _ in 0..3 {
            assert_eq!(limiter.allow(&ctx).await, Ok(true));
        }
        assert_eq!(limiter.allow(&ctx).await, Err(WeirError::OverMaxLimit));
    }

    #[tokio::test]
    async fn rate_one_admits_exactly_one() {
        let (limiter, clock) = window(Duration::from_secs(5), 1);
        let ctx = CancellationToken::new();

        assert_eq!(limiter.allow(&ctx).await, Ok(true));
        assert_eq!(limiter.allow(&ctx).await, Err(WeirError::OverMaxLimit));

        clock.advance(Duration::from_secs(5));
        assert_eq!(limiter.allow(&ctx).await, Ok(true));
        assert_eq!(limiter.allow(&ctx).await, Err(WeirError::OverMaxLimit));
    }

    #[tokio::test]
    async fn window_reset_clears_counter() {
        let (limiter, clock) = window(Duration::from_secs(1), 2);
        let ctx = CancellationToken::new();

        assert_eq!(limiter.allow(&ctx).await, Ok(true));
        assert_eq!(limiter.allow(&ctx).await, Ok(true));
        assert_eq!(limiter.allow(&ctx).await, Err(WeirError::OverMaxLimit));

        clock.advance(Duration::from_millis(1500));
        for _ in 0..2 {
            assert_eq!(limiter.allow(&ctx).await, Ok(true));
        }
        assert_eq!(limiter.allow(&ctx).await, Err(WeirError::OverMaxLimit));
    }

    #[tokio::test]
    async fn close_is_one_way() {
        let (limiter, clock) = window(Duration::from_secs(1), 5);
        let ctx = CancellationToken::new();

        limiter.close();
        limiter.close();
        clock.advance(Duration::from_secs(10));
        assert_eq!(limiter.allow(&ctx).await, Err(WeirError::Closed));
    }

    #[tokio::test]
    async fn cancellation_reported_before_admission() {
        let (limiter, _clock) = window(Duration::from_secs(1), 5);
        let ctx = CancellationToken::new();
        ctx.cancel();
        assert_eq!(limiter.allow(&ctx).await, Err(WeirError::Cancelled));
    }

    #[tokio::test]
    async fn concurrent_allows_never_exceed_rate() {
        let clock = ManualClock::new();
        let limiter =
            Arc::new(FixedWindow::with_clock(Duration::from_secs(60), 50, Arc::new(clock)));
        let ctx = CancellationToken::new();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let limiter = limiter.clone();
            let ctx = ctx.clone();
            handles.push(tokio::spawn(async move {
                let mut admitted = 0u64;
                for _ in 0..25 {
                    if limiter.allow(&ctx).await.is_ok() {
                        admitted += 1;
                    }
                }
                admitted
            }));
        }

        let mut total = 0;
        for handle in handles {
            total += handle.await.unwrap();
        }
        assert_eq!(total, 50);
    }
}
