use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, TryAcquireError};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::WeirError;
use crate::limit::{check_ctx, Limiter};

/// Token-bucket limiter.
///
/// A background producer deposits one token per `interval` into a pool
/// bounded at `capacity`; deposits against a full pool are dropped. The
/// bucket starts empty, so the first admission becomes possible one
/// interval after construction.
///
/// Must be constructed inside a Tokio runtime (the producer is spawned).
pub struct TokenBucket {
    tokens: Arc<Semaphore>,
    shutdown: CancellationToken,
}

impl TokenBucket {
    pub fn new(interval: Duration, capacity: usize) -> Self {
        let tokens = Arc::new(Semaphore::new(0));
        let shutdown = CancellationToken::new();

        let producer_tokens = tokens.clone();
        let producer_shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = producer_shutdown.cancelled() => return,
                    _ = ticker.tick() => {
                        if producer_tokens.available_permits() < capacity {
                            producer_tokens.add_permits(1);
                        }
                    }
                }
            }
        });

        Self { tokens, shutdown }
    }
}

#[async_trait]
impl Limiter for TokenBucket {
    async fn allow(&self, ctx: &CancellationToken) -> Result<bool, WeirError> {
        check_ctx(ctx)?;
        match self.tokens.try_acquire() {
            Ok(permit) => {
                permit.forget();
                Ok(true)
            }
            Err(TryAcquireError::NoPermits) => Err(WeirError::OverMaxLimit),
            Err(TryAcquireError::Closed) => Err(WeirError::Closed),
        }
    }

    /// Halts the producer and drains the pool.
    fn close(&self) {
        self.shutdown.cancel();
        self.tokens.close();
    }
}

impl Drop for TokenBucket {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
