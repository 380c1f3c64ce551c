//! Machine/application metric samples and the snapshots triggers evaluate
//! against.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::WeirError;

/// The closed set of metric fields a trigger expression may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricName {
    CpuUsage,
    MemUsage,
    ErrRate,
    MemUsed,
    RequestLatency,
    ActiveConns,
}

impl MetricName {
    pub const ALL: [MetricName; 6] = [
        MetricName::CpuUsage,
        MetricName::MemUsage,
        MetricName::ErrRate,
        MetricName::MemUsed,
        MetricName::RequestLatency,
        MetricName::ActiveConns,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::CpuUsage => "cpu_usage",
            MetricName::MemUsage => "mem_usage",
            MetricName::ErrRate => "err_rate",
            MetricName::MemUsed => "mem_used",
            MetricName::RequestLatency => "request_latency",
            MetricName::ActiveConns => "active_conns",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricName {
    type Err = WeirError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MetricName::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| WeirError::invalid(format!("unknown metric field `{}`", s)))
    }
}

/// One metric sample reported by a worker node.
///
/// Usage fields are fractions in `[0, 1]`, `request_latency` is in whatever
/// unit the reporter configured, counters are widened to `f64` when a
/// snapshot is taken.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    #[serde(default)]
    pub cpu_usage: f64,
    #[serde(default)]
    pub mem_usage: f64,
    /// Used memory size in bytes.
    #[serde(default)]
    pub mem_used: u64,
    /// Only meaningful for api-scoped rules.
    #[serde(default)]
    pub request_latency: f64,
    #[serde(default)]
    pub err_rate: f64,
    #[serde(default)]
    pub active_conns: u64,
}

/// Immutable snapshot a trigger AST evaluates against.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    values: HashMap<MetricName, f64>,
}

impl MetricsSnapshot {
    /// Build a snapshot from explicit values. Fields left out are absent,
    /// and evaluating a trigger that references them fails.
    pub fn from_values<I>(values: I) -> Self
    where
        I: IntoIterator<Item = (MetricName, f64)>,
    {
        Self { values: values.into_iter().collect() }
    }

    pub fn get(&self, name: MetricName) -> Option<f64> {
        self.values.get(&name).copied()
    }
}

impl From<&Metrics> for MetricsSnapshot {
    fn from(m: &Metrics) -> Self {
        Self::from_values([
            (MetricName::CpuUsage, m.cpu_usage),
            (MetricName::MemUsage, m.mem_usage),
            (MetricName::MemUsed, m.mem_used as f64),
            (MetricName::RequestLatency, m.request_latency),
            (MetricName::ErrRate, m.err_rate),
            (MetricName::ActiveConns, m.active_conns as f64),
        ])
    }
}
