//! Metric samples and the control/treatment comparison result (spec §3,
//! §4.7, §4.8).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `(timestamp, value)` pair keyed by `(metric_name, service, version)`
/// at the call site (spec §3 MetricSample).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MetricSample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Verdict for one metric's control-vs-treatment comparison (spec §3, §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Improved,
    Degraded,
    Unchanged,
}

/// `{metric, control_mean, treatment_mean, baseline, improvement_pct,
/// ci_low, ci_high, p_value, significant, verdict}` (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricComparison {
    pub metric: String,
    pub control_mean: f64,
    pub treatment_mean: f64,
    pub baseline: f64,
    pub improvement_pct: f64,
    pub ci_low: f64,
    pub ci_high: f64,
    pub p_value: f64,
    pub significant: bool,
    pub verdict: Verdict,
}

/// Result of one health gate evaluation (spec §4.7). `Unknown` is returned
/// when the metrics backend has no data for the query window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GateStatus {
    Passed,
    Failed { detail: String },
    Unknown,
}

impl GateStatus {
    pub fn is_passed(&self) -> bool {
        matches!(self, GateStatus::Passed)
    }
}
