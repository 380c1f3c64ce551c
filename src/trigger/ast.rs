use std::fmt;
use std::str::FromStr;

use crate::error::WeirError;
use crate::metrics::{MetricName, MetricsSnapshot};

/// Comparison operator of a condition leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
}

impl CompareOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Eq => "=",
        }
    }

    /// IEEE-754 comparison: every operator is false when either side is NaN.
    fn apply(&self, lhs: f64, rhs: f64) -> bool {
        match self {
            CompareOp::Gt => lhs > rhs,
            CompareOp::Ge => lhs >= rhs,
            CompareOp::Lt => lhs < rhs,
            CompareOp::Le => lhs <= rhs,
            CompareOp::Eq => lhs == rhs,
        }
    }
}

impl FromStr for CompareOp {
    type Err = WeirError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            ">" => Ok(CompareOp::Gt),
            ">=" => Ok(CompareOp::Ge),
            "<" => Ok(CompareOp::Lt),
            "<=" => Ok(CompareOp::Le),
            "=" => Ok(CompareOp::Eq),
            other => Err(WeirError::invalid(format!("expected operator, got `{}`", other))),
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logical connective of an interior node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicOp {
    And,
    Or,
}

impl LogicOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogicOp::And => "AND",
            LogicOp::Or => "OR",
        }
    }
}

impl fmt::Display for LogicOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A compiled trigger expression.
///
/// Parentheses only shape the tree; they are not a node kind of their own.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A leaf such as `cpu_usage > 0.8`.
    Condition { field: MetricName, op: CompareOp, value: f64 },
    /// A binary interior node such as `<left> AND <right>`.
    Logical { op: LogicOp, left: Box<Expr>, right: Box<Expr> },
}

impl Expr {
    /// Evaluate against a metric snapshot.
    ///
    /// Logical nodes short-circuit: `AND` skips the right arm when the left
    /// is false, `OR` when it is true. A condition over a field the snapshot
    /// does not carry is an evaluation error.
    pub fn evaluate(&self, ctx: &MetricsSnapshot) -> Result<bool, WeirError> {
        match self {
            Expr::Condition { field, op, value } => {
                let sampled = ctx
                    .get(*field)
                    .ok_or_else(|| {
                        WeirError::eval(format!("metric `{}` missing from snapshot", field))
                    })?;
                Ok(op.apply(sampled, *value))
            }
            Expr::Logical { op, left, right } => {
                let l = left.evaluate(ctx)?;
                match op {
                    LogicOp::And if !l => Ok(false),
                    LogicOp::Or if l => Ok(true),
                    _ => right.evaluate(ctx),
                }
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Condition { field, op, value } => write!(f, "{} {} {}", field, op, value),
            Expr::Logical { op, left, right } => write!(f, "({} {} {})", left, op, right),
        }
    }
}
