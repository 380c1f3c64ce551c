//! Rate store facade.
//!
//! The executor publishes each scope's effective rate through this narrow
//! contract. Production deployments back it with a shared KV service (a
//! hash table on a cache server, a key under a coordination service);
//! those adapters live outside the core. [`MemoryRateStore`] ships for
//! tests and single-process use.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::WeirError;

/// Set/delete of a scope's published rate.
#[async_trait]
pub trait RateStore: Send + Sync {
    /// Publish `rate` for `scope`, creating or overwriting.
    async fn set(&self, ctx: &CancellationToken, scope: &str, rate: u64)
        -> Result<(), WeirError>;

    /// Remove the published rate. Fails with [`WeirError::DelConfig`] when
    /// the key was never set.
    async fn del(&self, ctx: &CancellationToken, scope: &str) -> Result<(), WeirError>;
}

/// In-memory rate store.
#[derive(Debug, Default)]
pub struct MemoryRateStore {
    rates: Mutex<HashMap<String, u64>>,
}

impl MemoryRateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read back a published rate; test helper, not part of the facade.
    pub fn get(&self, scope: &str) -> Option<u64> {
        self.rates.lock().expect("rate lock poisoned").get(scope).copied()
    }
}

#[async_trait]
impl RateStore for MemoryRateStore {
    async fn set(
        &self,
        ctx: &CancellationToken,
        scope: &str,
        rate: u64,
    ) -> Result<(), WeirError> {
        if ctx.is_cancelled() {
            return Err(WeirError::Cancelled);
        }
        self.rates.lock().expect("rate lock poisoned").insert(scope.to_string(), rate);
        Ok(())
    }

    async fn del(&self, ctx: &CancellationToken, scope: &str) -> Result<(), WeirError> {
        if ctx.is_cancelled() {
            return Err(WeirError::Cancelled);
        }
        match self.rates.lock().expect("rate lock poisoned").remove(scope) {
            Some(_) => Ok(()),
            None => Err(WeirError::DelConfig),
        }
    }
}
