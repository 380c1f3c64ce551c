//! Decision strategies: turning a metric sample into a rate adjustment.
//!
//! [`ThresholdStrategy`] is the shipping implementation. Per scope it walks
//! a three-phase state machine:
//!
//! ```text
//! Normal --trigger fires--> Throttling --quiet for recover_after--> Recovering
//!   ^                           ^                                      |
//!   |                           +----re-trigger (no rollback)----------+
//!   +------------all recovery steps complete----------------------------+
//! ```
//!
//! While `Throttling`, each matching restriction decreases the rate; while
//! `Recovering`, the rate climbs by `gray_scale` per step until it reaches
//! the base threshold. Every produced rate is clamped to
//! `[min_threshold, base_threshold]`.

use arc_swap::ArcSwap;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::clock::{Clock, SystemClock};
use crate::error::WeirError;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::rule::tree::RuleTree;
use crate::rule::{Restriction, RestrictionAction, StrategyType};
use crate::timespec::parse_period;
use crate::trigger::Expr;

/// Outcome of one decision evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    /// Leave the scope's published rate untouched.
    Hold,
    /// Publish `rate` for the scope.
    Adjust { rate: f64 },
}

impl Decision {
    pub fn is_adjust(&self) -> bool {
        matches!(self, Decision::Adjust { .. })
    }
}

/// Decides whether a scope's rate should move, and to what.
#[async_trait]
pub trait DecisionStrategy: Send + Sync {
    /// Evaluate one metric sample for `scope`. Returns promptly with
    /// [`WeirError::Cancelled`] once `ctx` fires.
    async fn adjust_rate(
        &self,
        ctx: &CancellationToken,
        scope: &str,
        metrics: &Metrics,
    ) -> Result<Decision, WeirError>;
}

/// Per-scope limiting phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LimitPhase {
    #[default]
    Normal,
    Throttling,
    Recovering,
}

/// Mutable per-scope state, created lazily on the first throttling event
/// and dropped once the scope returns to `Normal`.
#[derive(Debug, Clone)]
struct LimitState {
    phase: LimitPhase,
    current_rate: f64,
    /// Rate at the moment throttling settled; recovery falls back here.
    throttled_rate: f64,
    throttled_since: u64,
    /// First quiet observation while throttled, if any.
    quiet_since: Option<u64>,
    step_started: u64,
    current_step: usize,
}

/// One rule node flattened for scope-key lookup.
struct CompiledRule {
    base: f64,
    min: f64,
    strategy: StrategyType,
    trigger: Option<Expr>,
    restrictions: Vec<Restriction>,
    gray: Option<GraySchedule>,
}

struct GraySchedule {
    scale: f64,
    recover_after: Duration,
    steps: Vec<Duration>,
    rollback: bool,
}

/// Trigger-driven strategy over a compiled rule forest.
///
/// The rule map sits behind an `ArcSwap` so a configuration reload swaps it
/// atomically under live evaluations: readers always see either the old
/// forest or the new one, never a mix.
pub struct ThresholdStrategy {
    rules: ArcSwap<HashMap<String, CompiledRule>>,
    states: Mutex<HashMap<String, LimitState>>,
    clock: Arc<dyn Clock>,
}

impl ThresholdStrategy {
    pub fn new(trees: &[RuleTree]) -> Self {
        Self::with_clock(trees, Arc::new(SystemClock::new()))
    }

    /// Override the clock (useful for deterministic tests).
    pub fn with_clock(trees: &[RuleTree], clock: Arc<dyn Clock>) -> Self {
        Self {
            rules: ArcSwap::from_pointee(compile_forest(trees)),
            states: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Replace the rule forest, e.g. after a configuration reload.
    /// Limiting state is reset; every scope restarts from `Normal` against
    /// the new thresholds.
    pub fn reload(&self, trees: &[RuleTree]) {
        self.rules.store(Arc::new(compile_forest(trees)));
        self.states.lock().expect("state lock poisoned").clear();
    }

    /// Current phase of a scope; scopes without state are `Normal`.
    pub fn phase(&self, scope: &str) -> LimitPhase {
        self.states
            .lock()
            .expect("state lock poisoned")
            .get(scope)
            .map(|state| state.phase)
            .unwrap_or_default()
    }
}

fn compile_forest(trees: &[RuleTree]) -> HashMap<String, CompiledRule> {
    let mut rules = HashMap::new();
    for tree in trees {
        tree.walk(&mut |node| {
            rules.insert(node.scope.key(), compile(node));
        });
    }
    rules
}

/// Exact-key lookup with a wildcard fallback inside the same scope type
/// (`user:alice` falls back to `user:*`).
fn rule_for<'a>(rules: &'a HashMap<String, CompiledRule>, scope: &str) -> Option<&'a CompiledRule> {
    if let Some(rule) = rules.get(scope) {
        return Some(rule);
    }
    let scope_type = scope.split_once(':')?.0;
    rules.get(&format!("{}:*", scope_type))
}

fn compile(node: &RuleTree) -> CompiledRule {
    CompiledRule {
        base: node.base_threshold as f64,
        min: node.min_threshold as f64,
        strategy: node.strategy,
        trigger: node.trigger().cloned(),
        restrictions: node.restrictions.clone(),
        gray: node.gray_recover.as_ref().map(|gray| GraySchedule {
            scale: gray.gray_scale,
            // Validated at config check; re-parse cannot fail here.
            recover_after: parse_period(&gray.recover_after).unwrap_or(Duration::ZERO),
            steps: gray
                .steps
                .iter()
                .map(|step| parse_period(step).unwrap_or(Duration::ZERO))
                .collect(),
            rollback: gray.rollback,
        }),
    }
}

/// Apply every matching restriction to `rate`, clamped to the rule's band.
fn apply_restrictions(
    rule: &CompiledRule,
    snapshot: &MetricsSnapshot,
    rate: f64,
) -> Result<f64, WeirError> {
    let mut new_rate = rate;
    for restriction in &rule.restrictions {
        let sampled = snapshot.get(restriction.metric).ok_or_else(|| {
            WeirError::eval(format!(
                "metric `{}` missing from snapshot",
                restriction.metric
            ))
        })?;
        if sampled < restriction.threshold {
            continue;
        }
        match restriction.action {
            RestrictionAction::Decrease => {
                let delta = match rule.strategy {
                    // Percentage of the current rate for qps rules,
                    // absolute count otherwise.
                    StrategyType::Qps => new_rate * restriction.amount as f64 / 100.0,
                    StrategyType::Concurrency | StrategyType::Total => {
                        restriction.amount as f64
                    }
                };
                new_rate -= delta;
            }
        }
    }
    Ok(new_rate.clamp(rule.min, rule.base))
}

#[async_trait]
impl DecisionStrategy for ThresholdStrategy {
    async fn adjust_rate(
        &self,
        ctx: &CancellationToken,
        scope: &str,
        metrics: &Metrics,
    ) -> Result<Decision, WeirError> {
        if ctx.is_cancelled() {
            return Err(WeirError::Cancelled);
        }

        let rules = self.rules.load();
        let Some(rule) = rule_for(&rules, scope) else {
            return Ok(Decision::Hold);
        };
        let Some(trigger) = &rule.trigger else {
            return Ok(Decision::Hold);
        };

        let snapshot = MetricsSnapshot::from(metrics);
        let triggered = trigger.evaluate(&snapshot)?;
        let now = self.clock.now_nanos();

        let mut states = self.states.lock().expect("state lock poisoned");
        if triggered {
            let state = states.entry(scope.to_string()).or_insert_with(|| LimitState {
                phase: LimitPhase::Normal,
                current_rate: rule.base,
                throttled_rate: rule.base,
                throttled_since: now,
                quiet_since: None,
                step_started: now,
                current_step: 0,
            });
            state.quiet_since = None;

            match state.phase {
                LimitPhase::Normal | LimitPhase::Throttling => {
                    let reduced = apply_restrictions(rule, &snapshot, state.current_rate)?;
                    if reduced >= state.current_rate && state.phase == LimitPhase::Throttling {
                        // Already at the floor; nothing new to publish.
                        return Ok(Decision::Hold);
                    }
                    if reduced >= state.current_rate {
                        // Trigger fired but no restriction matched; the rate
                        // stands and the scope stays in its current phase.
                        states.remove(scope);
                        return Ok(Decision::Hold);
                    }
                    state.phase = LimitPhase::Throttling;
                    state.current_rate = reduced;
                    state.throttled_rate = reduced;
                    state.throttled_since = now;
                    Ok(Decision::Adjust { rate: reduced })
                }
                LimitPhase::Recovering => {
                    let gray = rule.gray.as_ref().expect("recovering without a schedule");
                    if gray.rollback && state.current_step > 0 {
                        // Step back one notch instead of losing the whole climb.
                        state.current_step -= 1;
                        state.step_started = now;
                        state.current_rate =
                            (state.current_rate / gray.scale).max(state.throttled_rate);
                        Ok(Decision::Adjust { rate: state.current_rate })
                    } else {
                        state.phase = LimitPhase::Throttling;
                        state.current_step = 0;
                        state.current_rate = state.throttled_rate;
                        state.throttled_since = now;
                        Ok(Decision::Adjust { rate: state.current_rate })
                    }
                }
            }
        } else {
            let Some(state) = states.get_mut(scope) else {
                return Ok(Decision::Hold);
            };

            match state.phase {
                LimitPhase::Normal => Ok(Decision::Hold),
                LimitPhase::Throttling => {
                    let Some(gray) = rule.gray.as_ref() else {
                        // No recovery schedule: restore the base rate as soon
                        // as the trigger goes quiet.
                        states.remove(scope);
                        return Ok(Decision::Adjust { rate: rule.base });
                    };
                    let quiet_since = *state.quiet_since.get_or_insert(now);
                    if now.saturating_sub(quiet_since) < as_nanos(gray.recover_after) {
                        return Ok(Decision::Hold);
                    }
                    state.phase = LimitPhase::Recovering;
                    state.current_step = 0;
                    state.step_started = now;
                    state.current_rate = (state.current_rate * gray.scale).min(rule.base);
                    tracing::debug!(
                        scope,
                        rate = state.current_rate,
                        throttled_nanos = now.saturating_sub(state.throttled_since),
                        "gray recovery started"
                    );
                    Ok(Decision::Adjust { rate: state.current_rate })
                }
                LimitPhase::Recovering => {
                    let gray = rule.gray.as_ref().expect("recovering without a schedule");
                    let hold = gray
                        .steps
                        .get(state.current_step)
                        .copied()
                        .unwrap_or(Duration::ZERO);
                    if now.saturating_sub(state.step_started) < as_nanos(hold) {
                        return Ok(Decision::Hold);
                    }
                    state.current_step += 1;
                    if state.current_step >= gray.steps.len() {
                        // Fully recovered.
                        states.remove(scope);
                        return Ok(Decision::Adjust { rate: rule.base });
                    }
                    state.step_started = now;
                    state.current_rate = (state.current_rate * gray.scale).min(rule.base);
                    Ok(Decision::Adjust { rate: state.current_rate })
                }
            }
        }
    }
}

fn as_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}
