//! Compilation of validated rules into immutable, evaluable trees.

use std::time::Duration;

use crate::error::WeirError;
use crate::rule::{
    AlgorithmType, GrayRecover, PriorityType, Restriction, Rule, Scope, StrategyType,
};
use crate::timespec::parse_period;
use crate::trigger::{parse_trigger, Expr};

/// Builder guard against runaway nesting. Real configurations are a handful
/// of levels deep.
const MAX_DEPTH: usize = 64;

/// Compiled counterpart of [`Rule`]: same fields, with the period parsed,
/// the trigger compiled, and children compiled recursively. Immutable after
/// build and safe to share behind an `Arc`.
#[derive(Debug, Clone)]
pub struct RuleTree {
    pub scope: Scope,
    pub base_threshold: u64,
    pub min_threshold: u64,
    pub strategy: StrategyType,
    pub period: Duration,
    pub priority: PriorityType,
    pub algorithm: AlgorithmType,
    pub restrictions: Vec<Restriction>,
    pub gray_recover: Option<GrayRecover>,
    trigger_ast: Option<Expr>,
    children: Vec<RuleTree>,
}

impl RuleTree {
    pub fn trigger(&self) -> Option<&Expr> {
        self.trigger_ast.as_ref()
    }

    pub fn children(&self) -> &[RuleTree] {
        &self.children
    }

    /// Depth-first walk over this node and everything below it.
    pub fn walk(&self, visit: &mut dyn FnMut(&RuleTree)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }
}

/// Compile a validated rule forest.
///
/// Fails if any node has a zero `base_threshold`, a floor above its base,
/// a trigger that does not compile, or nesting beyond the depth bound.
pub fn build_rule_trees(rules: &[Rule]) -> Result<Vec<RuleTree>, WeirError> {
    rules.iter().map(|rule| build_node(rule, 0)).collect()
}

fn build_node(rule: &Rule, depth: usize) -> Result<RuleTree, WeirError> {
    if depth >= MAX_DEPTH {
        return Err(WeirError::invalid(format!(
            "rule tree exceeds maximum depth {} at scope `{}`",
            MAX_DEPTH, rule.scope
        )));
    }
    if rule.base_threshold == 0 {
        return Err(WeirError::invalid(format!(
            "scope `{}` has a zero base_threshold",
            rule.scope
        )));
    }
    if rule.min_threshold > rule.base_threshold {
        return Err(WeirError::invalid(format!(
            "scope `{}`: min_threshold {} exceeds base_threshold {}",
            rule.scope, rule.min_threshold, rule.base_threshold
        )));
    }

    let trigger_ast = rule.trigger.as_deref().map(parse_trigger).transpose()?;
    let children = rule
        .children
        .iter()
        .map(|child| build_node(child, depth + 1))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(RuleTree {
        scope: rule.scope.clone(),
        base_threshold: rule.base_threshold,
        min_threshold: rule.min_threshold,
        strategy: rule.strategy,
        period: parse_period(&rule.period)?,
        priority: rule.priority,
        algorithm: rule.algorithm.unwrap_or_else(|| default_algorithm(&rule.scope)),
        restrictions: rule.restrictions.clone(),
        gray_recover: rule.gray_recover.clone(),
        trigger_ast,
        children,
    })
}

/// Keyed scopes shard their limiter state across the ring, so they default
/// to the cheapest per-key algorithm; everything else gets a fixed window.
fn default_algorithm(scope: &Scope) -> AlgorithmType {
    if scope.scope_type.is_keyed() {
        AlgorithmType::TokenBucket
    } else {
        AlgorithmType::FixedWindow
    }
}
