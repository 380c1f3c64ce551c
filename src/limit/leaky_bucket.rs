use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, TryAcquireError};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::WeirError;
use crate::limit::{check_ctx, Limiter};

/// Leaky-bucket limiter.
///
/// An internal tick every `interval` arms a single admission slot; `allow`
/// succeeds only while a tick is pending. At most one tick is ever pending,
/// so bursts drain at exactly one request per interval.
///
/// Must be constructed inside a Tokio runtime (the ticker is spawned).
pub struct LeakyBucket {
    gate: Arc<Semaphore>,
    shutdown: CancellationToken,
}

impl LeakyBucket {
    pub fn new(interval: Duration) -> Self {
        let gate = Arc::new(Semaphore::new(0));
        let shutdown = CancellationToken::new();

        let ticker_gate = gate.clone();
        let ticker_shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker_shutdown.cancelled() => return,
                    _ = ticker.tick() => {
                        if ticker_gate.available_permits() == 0 {
                            ticker_gate.add_permits(1);
                        }
                    }
                }
            }
        });

        Self { gate, shutdown }
    }
}

#[async_trait]
impl Limiter for LeakyBucket {
    async fn allow(&self, ctx: &CancellationToken) -> Result<bool, WeirError> {
        check_ctx(ctx)?;
        match self.gate.try_acquire() {
            Ok(permit) => {
                permit.forget();
                Ok(true)
            }
            Err(TryAcquireError::NoPermits) => Err(WeirError::OverMaxLimit),
            Err(TryAcquireError::Closed) => Err(WeirError::Closed),
        }
    }

    /// Stops the ticker; safe to call more than once.
    fn close(&self) {
        self.shutdown.cancel();
        self.gate.close();
    }
}

impl Drop for LeakyBucket {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
