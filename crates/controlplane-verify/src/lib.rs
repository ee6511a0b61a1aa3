//! Verification engine: simultaneous control-vs-treatment comparison with
//! bootstrap confidence intervals, stability analysis, and the pass/fail
//! vote (spec §4.8).
//!
//! Grounded in `examples/original_source/examples/post_deployment_verifier.py`'s
//! `PostDeploymentVerifier` (traffic-split determination, per-metric
//! comparison loop with budget checks, multi-signal vote) and
//! `metric_stability_analyzer.py`'s `MetricStabilityAnalyzer` (stability
//! sub-check, see [`stability`]). Bootstrap CI and the t-test live in
//! [`compare`]; the budget tracker lives in [`budget`].
//!
//! Before/after comparison is unsound (traffic patterns, upstream load,
//! time-of-day all confound), so every metric is fetched for a control
//! group (still on the previous version) and a treatment group (the new
//! version) over the *same* wall-clock window, per spec §4.8's premise.

pub mod budget;
pub mod compare;
pub mod stability;

use std::time::Duration;

use chrono::{DateTime, Utc};
use controlplane_types::metrics::{MetricComparison, Verdict};
use serde::{Deserialize, Serialize};

pub use budget::VerificationBudget;
pub use compare::{Direction, VerdictThresholds};
pub use stability::{StabilityConfig, StabilityResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationStatus {
    Passed,
    Failed,
    PartiallyResolved,
    BudgetExceeded,
    Inconclusive,
}

/// One metric's raw input for a verification pass (spec §4.8 step 3).
/// `treatment_series` is `(minutes_since_window_start, value)`, used only
/// for the stability sub-check (spec §4.8 "Stability sub-check").
#[derive(Debug, Clone)]
pub struct MetricWindow {
    pub metric: String,
    pub control: Vec<f64>,
    pub treatment: Vec<f64>,
    pub baseline: f64,
    pub treatment_series: Vec<(f64, f64)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationConfig {
    pub thresholds: SerializableThresholds,
    pub stability: SerializableStability,
    /// Fraction of traffic kept on the previous version after full rollout
    /// (spec §4.8 step 1, default 10%).
    pub residual_control_pct: f64,
    pub stabilize: Duration,
}

/// Serde-friendly mirror of [`VerdictThresholds`] (which itself is `Copy`
/// but not `Serialize`, since it lives in a module with no serde derive
/// dependency burden for the math-only types).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SerializableThresholds {
    pub improvement_threshold: f64,
    pub degradation_threshold: f64,
    pub alpha: f64,
    pub bootstrap_resamples: usize,
}

impl From<SerializableThresholds> for VerdictThresholds {
    fn from(t: SerializableThresholds) -> Self {
        VerdictThresholds {
            improvement_threshold: t.improvement_threshold,
            degradation_threshold: t.degradation_threshold,
            alpha: t.alpha,
            bootstrap_resamples: t.bootstrap_resamples,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SerializableStability {
    pub min_stable_minutes: f64,
    pub max_coefficient_of_variation: f64,
    pub max_oscillation_per_minute: f64,
    pub trend_significance_level: f64,
}

impl From<SerializableStability> for StabilityConfig {
    fn from(s: SerializableStability) -> Self {
        StabilityConfig {
            min_stable_minutes: s.min_stable_minutes,
            max_coefficient_of_variation: s.max_coefficient_of_variation,
            max_oscillation_per_minute: s.max_oscillation_per_minute,
            trend_significance_level: s.trend_significance_level,
        }
    }
}

impl Default for VerificationConfig {
    fn default() -> Self {
        let d = VerdictThresholds::default();
        let s = StabilityConfig::default();
        Self {
            thresholds: SerializableThresholds {
                improvement_threshold: d.improvement_threshold,
                degradation_threshold: d.degradation_threshold,
                alpha: d.alpha,
                bootstrap_resamples: d.bootstrap_resamples,
            },
            stability: SerializableStability {
                min_stable_minutes: s.min_stable_minutes,
                max_coefficient_of_variation: s.max_coefficient_of_variation,
                max_oscillation_per_minute: s.max_oscillation_per_minute,
                trend_significance_level: s.trend_significance_level,
            },
            residual_control_pct: 10.0,
            stabilize: Duration::from_secs(120),
        }
    }
}

/// Per-metric comparison plus whether the stability sub-check downgraded
/// its verdict, so callers (and tests) can see why.
#[derive(Debug, Clone)]
pub struct MetricVerdict {
    pub comparison: MetricComparison,
    pub stability: StabilityResult,
    pub downgraded_for_instability: bool,
}

#[derive(Debug, Clone)]
pub struct VerificationResult {
    pub status: VerificationStatus,
    pub metric_verdicts: Vec<MetricVerdict>,
    pub overall_improvement_pct: f64,
    pub improved_ratio: f64,
    pub degraded_ratio: f64,
    pub decision_reasons: Vec<String>,
    pub top_signals: Vec<String>,
    pub confidence_score: f64,
}

/// Metric importance weights for the overall-improvement summary (spec
/// §4.8 has no explicit weighting rule; carried over from the original's
/// `_calculate_overall_improvement`).
fn metric_weight(metric: &str) -> f64 {
    match metric {
        "error_rate" => 0.35,
        "p99_latency" => 0.25,
        "p95_latency" => 0.20,
        "throughput" => 0.10,
        "cpu_usage" | "cpu" => 0.05,
        "memory_usage" | "memory" => 0.05,
        _ => 0.10,
    }
}

/// Determines `(control_pct, treatment_pct)` for verification (spec §4.8
/// step 1). During canary, control is whatever isn't on canary traffic;
/// after full rollout, a configured residual slice stays on the previous
/// version so verification always has a live control group.
pub fn traffic_split(canary_pct: Option<u8>, residual_control_pct: f64) -> (f64, f64) {
    match canary_pct {
        Some(pct) if pct < 100 => (100.0 - pct as f64, pct as f64),
        _ => (residual_control_pct, 100.0 - residual_control_pct),
    }
}

pub struct VerificationEngine {
    pub config: VerificationConfig,
}

impl VerificationEngine {
    pub fn new(config: VerificationConfig) -> Self {
        Self { config }
    }

    /// Runs the full protocol (spec §4.8 steps 3-4) over one window per
    /// metric, aborting with [`VerificationStatus::BudgetExceeded`] the
    /// instant `budget` trips mid-loop (spec §4.8 step 5).
    pub fn verify(&self, windows: &[MetricWindow], budget: &mut VerificationBudget) -> VerificationResult {
        if windows.is_empty() {
            // spec §8 boundary: zero samples is always INCONCLUSIVE, never PASSED.
            return VerificationResult {
                status: VerificationStatus::Inconclusive,
                metric_verdicts: Vec::new(),
                overall_improvement_pct: 0.0,
                improved_ratio: 0.0,
                degraded_ratio: 0.0,
                decision_reasons: vec!["no metrics supplied for verification".to_string()],
                top_signals: Vec::new(),
                confidence_score: 40.0,
            };
        }

        let thresholds: VerdictThresholds = self.config.thresholds.into();
        let stability_cfg: StabilityConfig = self.config.stability.into();
        let mut verdicts = Vec::with_capacity(windows.len());

        for window in windows {
            if budget.is_exceeded() {
                return self.budget_exceeded_result(verdicts);
            }

            let direction = compare::direction_for(&window.metric);
            let comparison = compare::compare_metric(
                &window.metric,
                &window.control,
                &window.treatment,
                window.baseline,
                &thresholds,
            );
            let stability = stability::analyze(&window.treatment_series, direction, &stability_cfg);

            // spec §4.8 "A metric failing stability contributes UNCHANGED
            // (not IMPROVED) even if its means differ."
            let downgraded = !stability.is_stable_enough && comparison.verdict != Verdict::Unchanged;
            let comparison = if downgraded {
                MetricComparison { verdict: Verdict::Unchanged, ..comparison }
            } else {
                comparison
            };

            verdicts.push(MetricVerdict { comparison, stability, downgraded_for_instability: downgraded });
        }

        self.vote(verdicts)
    }

    fn budget_exceeded_result(&self, verdicts: Vec<MetricVerdict>) -> VerificationResult {
        VerificationResult {
            status: VerificationStatus::BudgetExceeded,
            metric_verdicts: verdicts,
            overall_improvement_pct: 0.0,
            improved_ratio: 0.0,
            degraded_ratio: 0.0,
            decision_reasons: vec!["verification budget exceeded before all metrics were evaluated".to_string()],
            top_signals: Vec::new(),
            confidence_score: 0.0,
        }
    }

    /// Multi-signal vote over the per-metric verdicts (spec §4.8 step 4).
    fn vote(&self, verdicts: Vec<MetricVerdict>) -> VerificationResult {
        let total = verdicts.len() as f64;
        let improved = verdicts.iter().filter(|v| v.comparison.verdict == Verdict::Improved).count() as f64;
        let degraded = verdicts.iter().filter(|v| v.comparison.verdict == Verdict::Degraded).count() as f64;
        let improved_ratio = improved / total;
        let degraded_ratio = degraded / total;

        let mut decision_reasons = Vec::new();
        let (status, confidence_score) = if degraded_ratio > 0.3 {
            decision_reasons.push(format!("{:.0}% of metrics degraded", degraded_ratio * 100.0));
            (VerificationStatus::Failed, degraded_ratio * 100.0)
        } else if improved_ratio >= 0.7 {
            decision_reasons.push(format!("{:.0}% of metrics improved significantly", improved_ratio * 100.0));
            (VerificationStatus::Passed, improved_ratio * 100.0)
        } else if improved_ratio >= 0.5 && degraded_ratio < 0.2 {
            decision_reasons.push(format!(
                "partial improvement: {:.0}% improved, {:.0}% degraded",
                improved_ratio * 100.0,
                degraded_ratio * 100.0
            ));
            (VerificationStatus::PartiallyResolved, 60.0)
        } else {
            decision_reasons.push("insufficient evidence of improvement".to_string());
            (VerificationStatus::Inconclusive, 40.0)
        };

        let mut signals: Vec<(String, f64)> = verdicts
            .iter()
            .map(|v| {
                (
                    format!(
                        "{}: {:?} ({:+.1}%, p={:.3})",
                        v.comparison.metric, v.comparison.verdict, v.comparison.improvement_pct, v.comparison.p_value
                    ),
                    v.comparison.improvement_pct.abs(),
                )
            })
            .collect();
        signals.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
        let top_signals: Vec<String> = signals.into_iter().take(3).map(|(s, _)| s).collect();

        let weighted_sum: f64 = verdicts.iter().map(|v| v.comparison.improvement_pct * metric_weight(&v.comparison.metric)).sum();
        let total_weight: f64 = verdicts.iter().map(|v| metric_weight(&v.comparison.metric)).sum();
        let overall_improvement_pct = if total_weight > 0.0 { weighted_sum / total_weight } else { 0.0 };

        VerificationResult {
            status,
            metric_verdicts: verdicts,
            overall_improvement_pct,
            improved_ratio,
            degraded_ratio,
            decision_reasons,
            top_signals,
            confidence_score,
        }
    }
}

/// Wall-clock window bounds for fetching control/treatment samples (spec
/// §4.8 step 3a: "same window" for both groups).
pub fn verification_window(now: DateTime<Utc>, duration_minutes: i64) -> (DateTime<Utc>, DateTime<Utc>) {
    (now - chrono::Duration::minutes(duration_minutes), now)
}
