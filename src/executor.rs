//! The executor: scope registry, metric fan-in, and the control loop that
//! drives decisions into the rate store.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::WeirError;
use crate::metrics::Metrics;
use crate::retry::RetryPolicy;
use crate::rule::Scope;
use crate::store::RateStore;
use crate::strategy::{Decision, DecisionStrategy};

/// Hard deadline for a single decision evaluation.
const DECISION_TIMEOUT: Duration = Duration::from_secs(2);

type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::Receiver<Metrics>>>;

struct ScopeEntry {
    tx: mpsc::Sender<Metrics>,
    /// The receiving half, locked by whichever tick is evaluating this
    /// scope; holding it across the evaluation keeps per-scope decisions
    /// serialized and store writes in arrival order.
    rx: SharedReceiver,
}

/// Adaptive rate controller.
///
/// Worker nodes push [`Metrics`] into per-scope bounded queues obtained via
/// [`notify`](Executor::notify); the control loop started by
/// [`dynamic_controller`](Executor::dynamic_controller) drains one sample
/// per scope per tick, consults the [`DecisionStrategy`], and publishes any
/// new threshold through the [`RateStore`].
///
/// Each executor is an independent value; there is no process-wide state.
pub struct Executor {
    scopes: RwLock<HashMap<String, ScopeEntry>>,
    store: Arc<dyn RateStore>,
    strategy: Arc<dyn DecisionStrategy>,
    retry: RetryPolicy,
    shutdown: CancellationToken,
}

impl Executor {
    pub fn new(store: Arc<dyn RateStore>, strategy: Arc<dyn DecisionStrategy>) -> Self {
        Self {
            scopes: RwLock::new(HashMap::new()),
            store,
            strategy,
            retry: RetryPolicy::none(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Retry policy for store writes made by the control loop.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Register a scope: create its bounded metric queue and publish the
    /// initial rate. Fails if the store write fails, in which case nothing
    /// is registered.
    pub async fn register(
        &self,
        ctx: &CancellationToken,
        scope: &Scope,
        rate: u64,
        capacity: usize,
    ) -> Result<(), WeirError> {
        if ctx.is_cancelled() {
            return Err(WeirError::Cancelled);
        }
        if self.shutdown.is_cancelled() {
            return Err(WeirError::Closed);
        }

        let key = scope.key();
        self.store.set(ctx, &key, rate).await?;

        let (tx, rx) = mpsc::channel(capacity.max(1));
        let entry = ScopeEntry { tx, rx: Arc::new(tokio::sync::Mutex::new(rx)) };
        self.scopes.write().expect("scope lock poisoned").insert(key.clone(), entry);
        tracing::debug!(scope = %key, rate, capacity, "scope registered");
        Ok(())
    }

    /// Drop a scope's queue and its published rate.
    pub async fn unregister(
        &self,
        ctx: &CancellationToken,
        scope: &Scope,
    ) -> Result<(), WeirError> {
        if ctx.is_cancelled() {
            return Err(WeirError::Cancelled);
        }

        let key = scope.key();
        self.scopes.write().expect("scope lock poisoned").remove(&key);
        self.store.del(ctx, &key).await?;
        tracing::debug!(scope = %key, "scope unregistered");
        Ok(())
    }

    /// The writable end of a scope's metric queue.
    pub fn notify(
        &self,
        ctx: &CancellationToken,
        scope: &Scope,
    ) -> Result<mpsc::Sender<Metrics>, WeirError> {
        if ctx.is_cancelled() {
            return Err(WeirError::Cancelled);
        }

        self.scopes
            .read()
            .expect("scope lock poisoned")
            .get(&scope.key())
            .map(|entry| entry.tx.clone())
            .ok_or(WeirError::MetricsChannelNotExists)
    }

    /// Run the control loop until [`close`](Executor::close). Ticks every
    /// `interval`; each tick performs a non-blocking read of at most one
    /// pending sample per registered scope and evaluates it under the
    /// 2-second decision deadline. Evaluations of different scopes run
    /// concurrently; per-scope evaluations never overlap.
    pub async fn dynamic_controller(self: Arc<Self>, interval: Duration) {
        let mut ticker =
            tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!("received close signal");
                    return;
                }
                _ = ticker.tick() => self.clone().sweep(),
            }
        }
    }

    /// One controller tick over every registered scope.
    fn sweep(self: Arc<Self>) {
        let entries: Vec<(String, SharedReceiver)> = {
            let scopes = self.scopes.read().expect("scope lock poisoned");
            scopes.iter().map(|(key, entry)| (key.clone(), entry.rx.clone())).collect()
        };

        for (scope, rx) in entries {
            // A held lock means the previous evaluation for this scope is
            // still in flight; it will pick up the sample next tick.
            let Ok(mut guard) = rx.try_lock_owned() else { continue };
            let Ok(metrics) = guard.try_recv() else { continue };

            let executor = self.clone();
            tokio::spawn(async move {
                executor.evaluate(&scope, metrics).await;
                drop(guard);
            });
        }
    }

    async fn evaluate(&self, scope: &str, metrics: Metrics) {
        let ctx = self.shutdown.child_token();
        let decision = tokio::time::timeout(
            DECISION_TIMEOUT,
            self.strategy.adjust_rate(&ctx, scope, &metrics),
        )
        .await;

        match decision {
            Err(_) => {
                tracing::error!(scope, "decision evaluation exceeded its deadline");
            }
            Ok(Err(err)) => {
                // The scope keeps its previous rate.
                tracing::error!(scope, %err, "decision evaluation failed");
            }
            Ok(Ok(Decision::Hold)) => {}
            Ok(Ok(Decision::Adjust { rate })) => {
                let rounded = rate.round() as u64;
                let write = self
                    .retry
                    .execute(&ctx, || self.store.set(&ctx, scope, rounded))
                    .await;
                match write {
                    Ok(()) => tracing::info!(scope, rate = rounded, "request rate adjusted"),
                    Err(err) => {
                        tracing::error!(scope, %err, "failed to publish adjusted rate")
                    }
                }
            }
        }
    }

    /// Signal shutdown; the control loop exits at the next tick boundary.
    /// Idempotent.
    pub fn close(&self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::ScopeType;
    use crate::store::MemoryRateStore;
    use crate::strategy::ThresholdStrategy;

    fn executor_with_store() -> (Arc<Executor>, Arc<MemoryRateStore>) {
        let store = Arc::new(MemoryRateStore::new());
        let strategy = Arc::new(ThresholdStrategy::new(&[]));
        (Arc::new(Executor::new(store.clone(), strategy)), store)
    }

    #[tokio::test]
    async fn register_publishes_initial_rate() {
        let (executor, store) = executor_with_store();
        let ctx = CancellationToken::new();
        let scope = Scope::new(ScopeType::Service, "orders");

        executor.register(&ctx, &scope, 1000, 8).await.unwrap();
        assert_eq!(store.get("service:orders"), Some(1000));
        assert!(executor.notify(&ctx, &scope).is_ok());
    }

    #[tokio::test]
    async fn notify_unknown_scope_fails() {
        let (executor, _store) = executor_with_store();
        let ctx = CancellationToken::new();
        let scope = Scope::new(ScopeType::Api, "/ghost");
        assert_eq!(
            executor.notify(&ctx, &scope).unwrap_err(),
            WeirError::MetricsChannelNotExists
        );
    }

    #[tokio::test]
    async fn unregister_removes_queue_and_rate() {
        let (executor, store) = executor_with_store();
        let ctx = CancellationToken::new();
        let scope = Scope::new(ScopeType::Service, "orders");

        executor.register(&ctx, &scope, 1000, 8).await.unwrap();
        executor.unregister(&ctx, &scope).await.unwrap();
        assert_eq!(store.get("service:orders"), None);
        assert_eq!(
            executor.notify(&ctx, &scope).unwrap_err(),
            WeirError::MetricsChannelNotExists
        );
        // A second unregister has no rate left to delete.
        assert_eq!(executor.unregister(&ctx, &scope).await, Err(WeirError::DelConfig));
    }

    #[tokio::test]
    async fn cancelled_context_rejected() {
        let (executor, _store) = executor_with_store();
        let ctx = CancellationToken::new();
        ctx.cancel();
        let scope = Scope::new(ScopeType::Service, "orders");
        assert_eq!(
            executor.register(&ctx, &scope, 1, 1).await,
            Err(WeirError::Cancelled)
        );
        assert_eq!(executor.notify(&ctx, &scope).unwrap_err(), WeirError::Cancelled);
    }

    #[tokio::test]
    async fn queue_capacity_is_bounded() {
        let (executor, _store) = executor_with_store();
        let ctx = CancellationToken::new();
        let scope = Scope::new(ScopeType::Service, "orders");

        executor.register(&ctx, &scope, 100, 2).await.unwrap();
        let tx = executor.notify(&ctx, &scope).unwrap();
        assert!(tx.try_send(Metrics::default()).is_ok());
        assert!(tx.try_send(Metrics::default()).is_ok());
        assert!(tx.try_send(Metrics::default()).is_err());
    }
}
