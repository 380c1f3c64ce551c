//! Rule configuration model and validation.
//!
//! A configuration document is a forest of [`Rule`]s scoped to services,
//! APIs, users, or IPs. Validation is pure and fails the whole load on the
//! first offending field; nothing is partially applied.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::WeirError;
use crate::metrics::MetricName;
use crate::timespec::parse_period;
use crate::trigger::parse_trigger;

pub mod tree;

/// The dimension a rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeType {
    Service,
    Api,
    User,
    Ip,
}

impl ScopeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeType::Service => "service",
            ScopeType::Api => "api",
            ScopeType::User => "user",
            ScopeType::Ip => "ip",
        }
    }

    /// Per-key scopes route through the hash ring and are restricted to
    /// limiter algorithms that keep per-key state cheap.
    pub fn is_keyed(&self) -> bool {
        matches!(self, ScopeType::User | ScopeType::Ip)
    }
}

impl fmt::Display for ScopeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A concrete scope: `{type, value}`. `value = "*"` means "any".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    #[serde(rename = "type")]
    pub scope_type: ScopeType,
    pub value: String,
}

impl Scope {
    pub fn new(scope_type: ScopeType, value: impl Into<String>) -> Self {
        Self { scope_type, value: value.into() }
    }

    /// Canonical key used by the executor and the rate store,
    /// e.g. `api:/api/v1/order`.
    pub fn key(&self) -> String {
        format!("{}:{}", self.scope_type, self.value)
    }

    fn check(&self) -> Result<(), WeirError> {
        if self.value.is_empty() {
            return Err(WeirError::invalid(format!(
                "scope of type `{}` has an empty value",
                self.scope_type
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scope_type, self.value)
    }
}

/// What the threshold counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyType {
    Qps,
    Concurrency,
    Total,
}

impl StrategyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyType::Qps => "qps",
            StrategyType::Concurrency => "concurrency",
            StrategyType::Total => "total",
        }
    }
}

impl fmt::Display for StrategyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relative importance when multiple rules contend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityType {
    Low,
    Medium,
    High,
}

/// Local limiter algorithm backing a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlgorithmType {
    TokenBucket,
    LeakBucket,
    FixedWindow,
    SlidingWindow,
}

impl AlgorithmType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlgorithmType::TokenBucket => "TokenBucket",
            AlgorithmType::LeakBucket => "LeakBucket",
            AlgorithmType::FixedWindow => "FixedWindow",
            AlgorithmType::SlidingWindow => "SlidingWindow",
        }
    }

    fn check(&self, scope: &Scope) -> Result<(), WeirError> {
        if scope.scope_type.is_keyed()
            && !matches!(self, AlgorithmType::TokenBucket | AlgorithmType::SlidingWindow)
        {
            return Err(WeirError::invalid(format!(
                "scope `{}` only supports TokenBucket or SlidingWindow, got {}",
                scope,
                self.as_str()
            )));
        }
        Ok(())
    }
}

impl fmt::Display for AlgorithmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The only adjustment action currently recognized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestrictionAction {
    Decrease,
}

/// One reduction applied when its metric crosses `threshold` while the
/// rule's trigger is firing.
///
/// `amount` is a percentage of the current rate for `qps` rules and an
/// absolute count for `concurrency`/`total` rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Restriction {
    pub metric: MetricName,
    pub threshold: f64,
    pub action: RestrictionAction,
    pub amount: u64,
}

impl Restriction {
    fn check(&self, strategy: StrategyType) -> Result<(), WeirError> {
        if self.amount == 0 {
            return Err(WeirError::invalid(format!(
                "restriction on `{}` has a zero amount",
                self.metric
            )));
        }
        if strategy == StrategyType::Qps && self.amount > 100 {
            return Err(WeirError::invalid(format!(
                "restriction on `{}` is a percentage under the qps strategy, got {}",
                self.metric, self.amount
            )));
        }
        Ok(())
    }
}

/// Gray-recovery schedule: how a throttled scope climbs back to its base
/// threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrayRecover {
    /// Multiplier applied to the rate at each completed step; must be > 1.
    pub gray_scale: f64,
    /// How long metrics must stay quiet while throttled before recovery
    /// starts. Period literal.
    pub recover_after: String,
    /// Hold time of each recovery step. Period literals, at least one.
    pub steps: Vec<String>,
    /// On a re-trigger during recovery: step back one step instead of
    /// falling all the way back to the throttled rate.
    #[serde(default)]
    pub rollback: bool,
}

impl GrayRecover {
    fn check(&self) -> Result<(), WeirError> {
        if self.gray_scale <= 1.0 {
            return Err(WeirError::invalid(format!(
                "gray_scale must be greater than 1, got {}",
                self.gray_scale
            )));
        }
        parse_period(&self.recover_after)?;
        if self.steps.is_empty() {
            return Err(WeirError::invalid("gray recovery needs at least one step"));
        }
        for step in &self.steps {
            parse_period(step)?;
        }
        Ok(())
    }
}

/// One node of the rule forest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub scope: Scope,
    pub base_threshold: u64,
    #[serde(default)]
    pub min_threshold: u64,
    pub strategy: StrategyType,
    pub period: String,
    pub priority: PriorityType,
    /// Trigger DSL source; a rule without one never adjusts.
    #[serde(default)]
    pub trigger: Option<String>,
    #[serde(default)]
    pub algorithm: Option<AlgorithmType>,
    #[serde(default)]
    pub restrictions: Vec<Restriction>,
    #[serde(default)]
    pub gray_recover: Option<GrayRecover>,
    #[serde(default)]
    pub children: Vec<Rule>,
}

impl Rule {
    /// Validate this rule and, recursively, its children.
    pub fn check(&self) -> Result<(), WeirError> {
        self.scope.check()?;
        if self.min_threshold > self.base_threshold {
            return Err(WeirError::invalid(format!(
                "scope `{}`: min_threshold {} exceeds base_threshold {}",
                self.scope, self.min_threshold, self.base_threshold
            )));
        }
        parse_period(&self.period)?;
        if let Some(algorithm) = &self.algorithm {
            algorithm.check(&self.scope)?;
        }
        if let Some(trigger) = &self.trigger {
            parse_trigger(trigger)?;
        }
        for restriction in &self.restrictions {
            restriction.check(self.strategy)?;
        }
        if let Some(gray) = &self.gray_recover {
            gray.check()?;
        }
        for child in &self.children {
            child.check()?;
        }
        Ok(())
    }
}

/// A whole configuration document: defaults at the top level plus the rule
/// forest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conf {
    pub base_threshold: u64,
    #[serde(default)]
    pub min_threshold: u64,
    pub strategy: StrategyType,
    pub period: String,
    pub priority: PriorityType,
    pub rules: Vec<Rule>,
}

impl Conf {
    /// Validate the document. Top-level fields first, then every rule;
    /// top-level rules are validated on parallel threads since rule
    /// validation is pure.
    pub fn check(&self) -> Result<(), WeirError> {
        parse_period(&self.period)?;
        if self.min_threshold > self.base_threshold {
            return Err(WeirError::invalid(format!(
                "min_threshold {} exceeds base_threshold {}",
                self.min_threshold, self.base_threshold
            )));
        }
        if self.rules.is_empty() {
            return Err(WeirError::invalid("rules must not be empty"));
        }

        let mut results: Vec<Result<(), WeirError>> = Vec::with_capacity(self.rules.len());
        std::thread::scope(|s| {
            let handles: Vec<_> =
                self.rules.iter().map(|rule| s.spawn(move || rule.check())).collect();
            for handle in handles {
                results.push(handle.join().unwrap_or_else(|_| {
                    Err(WeirError::invalid("rule validation thread panicked"))
                }));
            }
        });
        results.into_iter().collect()
    }
}
