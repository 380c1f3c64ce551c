//! Local limiter algorithms.
//!
//! Every algorithm implements the same narrow [`Limiter`] contract: a
//! non-blocking admission check plus an idempotent close. The four shipped
//! implementations are:
//! - [`TokenBucket`]: a producer task feeds a bounded token pool.
//! - [`LeakyBucket`]: a periodic tick gates one admission at a time.
//! - [`FixedWindow`]: an atomic counter reset at window boundaries.
//! - [`SlidingWindow`]: a mutex-guarded deque of admission timestamps.
//!
//! Per-user and per-IP scopes shard their limiter instances across the
//! [`ConsistentHash`](crate::ring::ConsistentHash) ring; the limiter itself
//! is oblivious to sharding.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::WeirError;

pub mod fixed_window;
pub mod leaky_bucket;
pub mod sliding_window;
pub mod token_bucket;

pub use fixed_window::FixedWindow;
pub use leaky_bucket::LeakyBucket;
pub use sliding_window::SlidingWindow;
pub use token_bucket::TokenBucket;

/// Uniform admission contract.
#[async_trait]
pub trait Limiter: Send + Sync {
    /// Attempt to admit one request. Returns `Ok(true)` on admission and
    /// fails with [`WeirError::OverMaxLimit`] when the limit is exhausted,
    /// [`WeirError::Closed`] after [`close`](Limiter::close), or
    /// [`WeirError::Cancelled`] when `ctx` has fired. Never blocks.
    async fn allow(&self, ctx: &CancellationToken) -> Result<bool, WeirError>;

    /// Transition `Active → Closed`. Idempotent; all subsequent `allow`
    /// calls fail with [`WeirError::Closed`].
    fn close(&self);
}

pub(crate) fn check_ctx(ctx: &CancellationToken) -> Result<(), WeirError> {
    if ctx.is_cancelled() {
        return Err(WeirError::Cancelled);
    }
    Ok(())
}
