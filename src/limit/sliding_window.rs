use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::clock::{Clock, SystemClock};
use crate::error::WeirError;
use crate::limit::{check_ctx, Limiter};

/// Sliding-window limiter: at most `rate` admissions inside any trailing
/// `interval`.
///
/// Admission timestamps live in a mutex-guarded deque; each `allow` first
/// expires entries older than `now - interval`, then admits only if fewer
/// than `rate` remain.
pub struct SlidingWindow {
    interval_nanos: u64,
    rate: usize,
    admissions: Mutex<VecDeque<u64>>,
    closed: AtomicBool,
    clock: Arc<dyn Clock>,
}

impl SlidingWindow {
    pub fn new(interval: Duration, rate: usize) -> Self {
        Self::with_clock(interval, rate, Arc::new(SystemClock::new()))
    }

    /// Override the clock (useful for deterministic tests).
    pub fn with_clock(interval: Duration, rate: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            interval_nanos: u64::try_from(interval.as_nanos()).unwrap_or(u64::MAX),
            rate,
            admissions: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
            clock,
        }
    }
}

#[async_trait]
impl Limiter for SlidingWindow {
    async fn allow(&self, ctx: &CancellationToken) -> Result<bool, WeirError> {
        check_ctx(ctx)?;
        if self.closed.load(Ordering::Acquire) {
            return Err(WeirError::Closed);
        }

        let now = self.clock.now_nanos();
        let window_start = now.saturating_sub(self.interval_nanos);

        let mut admissions = self.admissions.lock().expect("admission lock poisoned");
        while admissions.front().is_some_and(|&ts| ts <= window_start) {
            admissions.pop_front();
        }
        if admissions.len() >= self.rate {
            return Err(WeirError::OverMaxLimit);
        }
        admissions.push_back(now);
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

    fn window(interval: Duration, rate: usize) -> (SlidingWindow, ManualClock) {
        let clock = ManualClock::new();
        let limiter = SlidingWindow::with_clock(interval, rate, Arc::new(clock.clone()));
        (limiter, clock)
    }

    #[tokio::test]
    async fn admits_up_to_rate_within_window() {
        let (limiter, _clock) = window(Duration::from_secs(1), 3);
        let ctx = CancellationToken::new();

        for _ in 0..3 {
            assert_eq!(limiter.allow(&ctx).await, Ok(true));
        }
        assert_eq!(limiter.allow(&ctx).await, Err(WeirError::OverMaxLimit));
    }

    #[tokio::test]
    async fn window_slides_rather_than_resets() {
        let (limiter, clock) = window(Duration::from_secs(1), 2);
        let ctx = CancellationToken::new();

        assert_eq!(limiter.allow(&ctx).await, Ok(true));
        clock.advance(Duration::from_millis(600));
        assert_eq!(limiter.allow(&ctx).await, Ok(true));
        assert_eq!(limiter.allow(&ctx).await, Err(WeirError::OverMaxLimit));

        // The first admission ages out at t=1.6s; the second is still live.
        clock.advance(Duration::from_millis(500));
        assert_eq!(limiter.allow(&ctx).await, Ok(true));
        assert_eq!(limiter.allow(&ctx).await, Err(WeirError::OverMaxLimit));
    }

    #[tokio::test]
    async fn expired_entries_are_dropped() {
        let (limiter, clock) = window(Duration::from_secs(1), 2);
        let ctx = CancellationToken::new();

        assert_eq!(limiter.allow(&ctx).await, Ok(true));
        assert_eq!(limiter.allow(&ctx).await, Ok(true));
        clock.advance(Duration::from_secs(2));
        assert_eq!(limiter.allow(&ctx).await, Ok(true));
        assert_eq!(limiter.allow(&ctx).await, Ok(true));
        assert_eq!(limiter.allow(&ctx).await, Err(WeirError::OverMaxLimit));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_final() {
        let (limiter, _clock) = window(Duration::from_secs(1), 2);
        let ctx = CancellationToken::new();
        limiter.close();
        limiter.close();
        assert_eq!(limiter.allow(&ctx).await, Err(WeirError::Closed));
    }

    #[tokio::test]
    async fn shared_across_tasks() {
        let clock = ManualClock::new();
        let limiter =
            Arc::new(SlidingWindow::with_clock(Duration::from_secs(60), 40, Arc::new(clock)));
        let ctx = CancellationToken::new();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let limiter = limiter.clone();
            let ctx = ctx.clone();
            handles.push(tokio::spawn(async move {
                let mut admitted = 0usize;
                for _ in 0..10 {
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
        assert_eq!(total, 40);
    }
}
