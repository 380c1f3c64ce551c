//! Retry support for rate-store writes.
//!
//! The control loop publishes threshold adjustments through the
//! [`RateStore`](crate::store::RateStore); transient store failures are
//! retried under a small policy with a configurable backoff. Exhaustion
//! surfaces [`WeirError::OverMaxRetries`].

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::WeirError;

/// Delay schedule between attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay before every retry. A zero delay retries immediately.
    Constant { delay: Duration },
    /// Doubling delay with an optional cap.
    Exponential { base: Duration, max: Option<Duration> },
}

impl Backoff {
    pub fn constant(delay: Duration) -> Self {
        Backoff::Constant { delay }
    }

    pub fn exponential(base: Duration) -> Self {
        Backoff::Exponential { base, max: None }
    }

    /// Cap the exponential schedule. No effect on `Constant`.
    pub fn with_max(self, cap: Duration) -> Self {
        match self {
            Backoff::Exponential { base, .. } => Backoff::Exponential { base, max: Some(cap) },
            constant => constant,
        }
    }

    /// Delay before retry number `attempt` (1-indexed).
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Backoff::Constant { delay } => *delay,
            Backoff::Exponential { base, max } => {
                let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
                let delay = base.checked_mul(factor).unwrap_or(Duration::MAX);
                match max {
                    Some(cap) => delay.min(*cap),
                    None => delay,
                }
            }
        }
    }
}

/// Bounded-attempt retry wrapper.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Backoff,
}

impl RetryPolicy {
    /// Policy with `max_attempts >= 1` total attempts.
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self { max_attempts: max_attempts.max(1), backoff }
    }

    /// One attempt, no retries.
    pub fn none() -> Self {
        Self::new(1, Backoff::constant(Duration::ZERO))
    }

    /// Run `operation` until it succeeds, the attempts are exhausted
    /// (`OverMaxRetries`), or `ctx` fires (`Cancelled`).
    pub async fn execute<T, Fut, Op>(
        &self,
        ctx: &CancellationToken,
        mut operation: Op,
    ) -> Result<T, WeirError>
    where
        Fut: Future<Output = Result<T, WeirError>>,
        Op: FnMut() -> Fut,
    {
        for attempt in 1..=self.max_attempts {
            if ctx.is_cancelled() {
                return Err(WeirError::Cancelled);
            }
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if attempt == self.max_attempts {
                        tracing::warn!(%err, attempts = self.max_attempts, "retries exhausted");
                        return Err(WeirError::OverMaxRetries);
                    }
                    tracing::debug!(%err, attempt, "retrying after failure");
                    tokio::time::sleep(self.backoff.delay(attempt)).await;
                }
            }
        }
        Err(WeirError::OverMaxRetries)
    }
}
