#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # Weir
//!
//! Adaptive rate limiting for distributed services: hierarchical rules,
//! a boolean trigger DSL over machine metrics, a control loop that turns
//! metric streams into threshold adjustments, pluggable local limiter
//! algorithms, and weighted consistent-hash sharding for per-key state.
//!
//! ## Features
//!
//! - **Rule trees** scoped to services, APIs, users, and IPs, loaded from
//!   JSON/YAML/TOML and compiled into immutable evaluable trees
//! - **Trigger DSL** (`cpu_usage > 0.8 OR mem_usage > 0.8`) with a total
//!   lexer and standard `AND`/`OR` precedence
//! - **Adaptive control loop** with per-scope FIFO metric queues, bounded
//!   decision latency, and gray recovery after throttling
//! - **Limiter algorithms**: token bucket, leaky bucket, fixed window,
//!   sliding window, all behind one non-blocking `Limiter` contract
//! - **Consistent hashing** with weighted virtual nodes for key → shard
//!   routing
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use weir::{
//!     build_rule_trees, parse_conf, DataType, Executor, MemoryRateStore, Metrics, Scope,
//!     ScopeType, ThresholdStrategy,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), weir::WeirError> {
//!     let doc = std::fs::read("rules.json").expect("config file");
//!     let conf = parse_conf(&doc, DataType::Json)?;
//!     let trees = build_rule_trees(&conf.rules)?;
//!
//!     let store = Arc::new(MemoryRateStore::new());
//!     let strategy = Arc::new(ThresholdStrategy::new(&trees));
//!     let executor = Arc::new(Executor::new(store, strategy));
//!
//!     let ctx = CancellationToken::new();
//!     let scope = Scope::new(ScopeType::Service, "order_service");
//!     executor.register(&ctx, &scope, 1000, 64).await?;
//!
//!     tokio::spawn(executor.clone().dynamic_controller(Duration::from_secs(1)));
//!
//!     // Worker nodes report samples through the scope's queue.
//!     let samples = executor.notify(&ctx, &scope)?;
//!     samples.try_send(Metrics { cpu_usage: 0.93, ..Default::default() }).ok();
//!
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod error;
pub mod executor;
pub mod limit;
pub mod metrics;
pub mod retry;
pub mod ring;
pub mod rule;
pub mod source;
pub mod store;
pub mod strategy;
pub mod timespec;
pub mod trigger;

// Re-exports
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::WeirError;
pub use executor::Executor;
pub use limit::{FixedWindow, LeakyBucket, Limiter, SlidingWindow, TokenBucket};
pub use metrics::{MetricName, Metrics, MetricsSnapshot};
pub use retry::{Backoff, RetryPolicy};
pub use ring::{ConsistentHash, Node, Weight};
pub use rule::tree::{build_rule_trees, RuleTree};
pub use rule::{
    AlgorithmType, Conf, PriorityType, Rule, Scope, ScopeType, StrategyType,
};
pub use source::{parse_conf, ConfSource, DataType, FileSource, SourceType};
pub use store::{MemoryRateStore, RateStore};
pub use strategy::{Decision, DecisionStrategy, LimitPhase, ThresholdStrategy};
pub use timespec::{format_period, parse_period};
pub use trigger::{parse_trigger, Expr};
