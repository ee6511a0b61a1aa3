//! Control-vs-treatment metric comparison (spec §4.8 steps 3a-3f).
//!
//! Grounded in `examples/original_source/examples/post_deployment_verifier.py`'s
//! `_compare_metric`/`_bootstrap_confidence_interval`/`_calculate_p_value`:
//! bootstrap-resampled confidence interval on the improvement percentage,
//! plus a two-sample t-test p-value. The original calls `scipy.stats.ttest_ind`;
//! this reimplements Welch's t-test directly (no equal-variance assumption)
//! and uses [`statrs`]'s [`StudentsT`] only for the CDF lookup, since no
//! ready-made two-sample test exists in the Rust statistics crates the
//! pack reaches for.

use controlplane_types::metrics::{MetricComparison, Verdict};
use rand::Rng;
use statrs::distribution::{ContinuousCDF, StudentsT};

/// Metrics where a larger raw value is better (throughput, success rate).
/// Everything else ("lower is better": error rate, latency, saturation)
/// is the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    LowerIsBetter,
    HigherIsBetter,
}

pub fn direction_for(metric: &str) -> Direction {
    match metric {
        "throughput" | "success_rate" => Direction::HigherIsBetter,
        _ => Direction::LowerIsBetter,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct VerdictThresholds {
    /// Fraction, e.g. 0.10 for 10% (spec §4.8 `improvement_threshold_pct`).
    pub improvement_threshold: f64,
    /// Fraction, e.g. 0.05 for 5% (spec §4.8 `degradation_threshold_pct`).
    pub degradation_threshold: f64,
    /// Significance level alpha (spec §4.8 step 3f), default 0.05.
    pub alpha: f64,
    /// Bootstrap resample count B, default 1000 (spec §4.8 step 3d).
    pub bootstrap_resamples: usize,
}

impl Default for VerdictThresholds {
    fn default() -> Self {
        Self {
            improvement_threshold: 0.10,
            degradation_threshold: 0.05,
            alpha: 0.05,
            bootstrap_resamples: 1000,
        }
    }
}

fn mean(samples: &[f64]) -> f64 {
    samples.iter().sum::<f64>() / samples.len() as f64
}

fn variance(samples: &[f64], mean: f64) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (samples.len() - 1) as f64
}

/// Signed improvement percentage of treatment relative to control, sign
/// flipped for "higher is better" metrics so positive always means "the
/// new version is better" (spec §4.8 step 3c).
fn improvement_pct(control_mean: f64, treatment_mean: f64, direction: Direction) -> f64 {
    if control_mean == 0.0 {
        return 0.0;
    }
    let raw = (control_mean - treatment_mean) / control_mean.abs() * 100.0;
    match direction {
        Direction::LowerIsBetter => raw,
        Direction::HigherIsBetter => -raw,
    }
}

/// Bootstrap-resampled 95% CI for the improvement percentage (spec §4.8
/// step 3d): resample both groups with replacement `b` times, compute the
/// improvement for each resample, report the 2.5th/97.5th percentiles.
pub fn bootstrap_ci(
    control: &[f64],
    treatment: &[f64],
    direction: Direction,
    b: usize,
) -> (f64, f64) {
    let control_mean = mean(control);
    if control_mean == 0.0 || control.is_empty() || treatment.is_empty() {
        return (0.0, 0.0);
    }
    let mut rng = rand::rng();
    let mut improvements: Vec<f64> = Vec::with_capacity(b);
    for _ in 0..b {
        let c_resample: Vec<f64> =
            (0..control.len()).map(|_| control[rng.random_range(0..control.len())]).collect();
        let t_resample: Vec<f64> =
            (0..treatment.len()).map(|_| treatment[rng.random_range(0..treatment.len())]).collect();
        let cm = mean(&c_resample);
        if cm == 0.0 {
            continue;
        }
        improvements.push(improvement_pct(cm, mean(&t_resample), direction));
    }
    percentile_ci(&mut improvements)
}

fn percentile_ci(improvements: &mut [f64]) -> (f64, f64) {
    if improvements.is_empty() {
        return (0.0, 0.0);
    }
    improvements.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let lo = percentile(improvements, 2.5);
    let hi = percentile(improvements, 97.5);
    (lo, hi)
}

fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = (pct / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = rank - lo as f64;
        sorted[lo] + (sorted[hi] - sorted[lo]) * frac
    }
}

/// Welch's two-sample t-test p-value (two-sided), testing the null
/// hypothesis that the control and treatment means are equal. Falls back
/// to `1.0` (conservative: not significant) when either sample has fewer
/// than two points, matching the original's exception handler.
pub fn welch_p_value(control: &[f64], treatment: &[f64]) -> f64 {
    if control.len() < 2 || treatment.len() < 2 {
        return 1.0;
    }
    let m1 = mean(control);
    let m2 = mean(treatment);
    let v1 = variance(control, m1);
    let v2 = variance(treatment, m2);
    let n1 = control.len() as f64;
    let n2 = treatment.len() as f64;

    let se2 = v1 / n1 + v2 / n2;
    if se2 <= 0.0 {
        return if m1 == m2 { 1.0 } else { 0.0 };
    }
    let t_stat = (m1 - m2) / se2.sqrt();

    let df_numer = se2.powi(2);
    let df_denom = (v1 / n1).powi(2) / (n1 - 1.0) + (v2 / n2).powi(2) / (n2 - 1.0);
    let df = if df_denom > 0.0 { df_numer / df_denom } else { 1.0 };

    let dist = match StudentsT::new(0.0, 1.0, df.max(1.0)) {
        Ok(d) => d,
        Err(_) => return 1.0,
    };
    let two_sided = 2.0 * (1.0 - dist.cdf(t_stat.abs()));
    two_sided.clamp(0.0, 1.0)
}

/// Full comparison for one metric (spec §4.8 steps 3a-3f / §3
/// MetricComparison). `baseline` is the pre-deployment value, carried
/// through for reporting but not used in the verdict.
#[allow(clippy::too_many_arguments)]
pub fn compare_metric(
    metric: &str,
    control: &[f64],
    treatment: &[f64],
    baseline: f64,
    thresholds: &VerdictThresholds,
) -> MetricComparison {
    let direction = direction_for(metric);
    let control_mean = mean(control);
    let treatment_mean = mean(treatment);
    let improvement = improvement_pct(control_mean, treatment_mean, direction);
    let (ci_low, ci_high) = bootstrap_ci(control, treatment, direction, thresholds.bootstrap_resamples);
    let p_value = welch_p_value(control, treatment);
    let significant = p_value < thresholds.alpha;

    let verdict = if improvement > thresholds.improvement_threshold * 100.0 && significant {
        Verdict::Improved
    } else if improvement < -thresholds.degradation_threshold * 100.0 && significant {
        Verdict::Degraded
    } else {
        Verdict::Unchanged
    };

    MetricComparison {
        metric: metric.to_string(),
        control_mean,
        treatment_mean,
        baseline,
        improvement_pct: improvement,
        ci_low,
        ci_high,
        p_value,
        significant,
        verdict,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(mean: f64, n: usize) -> Vec<f64> {
        vec![mean; n]
    }

    #[test]
    fn identical_distributions_are_unchanged() {
        let control = samples(100.0, 50);
        let treatment = samples(100.0, 50);
        let c = compare_metric("error_rate", &control, &treatment, 100.0, &VerdictThresholds::default());
        assert_eq!(c.verdict, Verdict::Unchanged);
    }

    #[test]
    fn large_lower_is_better_improvement_is_improved() {
        // Control noisy around 100, treatment noisy around 50: a clear,
        // significant improvement for a "lower is better" metric.
        let control: Vec<f64> = (0..60).map(|i| 100.0 + (i % 5) as f64).collect();
        let treatment: Vec<f64> = (0..60).map(|i| 50.0 + (i % 5) as f64).collect();
        let c = compare_metric("p95_latency", &control, &treatment, 100.0, &VerdictThresholds::default());
        assert_eq!(c.verdict, Verdict::Improved);
        assert!(c.significant);
        assert!(c.improvement_pct > 0.0);
    }

    #[test]
    fn higher_is_better_metric_flips_sign() {
        let control: Vec<f64> = (0..60).map(|i| 1000.0 + (i % 5) as f64).collect();
        let treatment: Vec<f64> = (0..60).map(|i| 1300.0 + (i % 5) as f64).collect();
        let c = compare_metric("throughput", &control, &treatment, 1000.0, &VerdictThresholds::default());
        assert_eq!(c.verdict, Verdict::Improved);
    }

    #[test]
    fn degraded_error_rate_is_flagged() {
        let control: Vec<f64> = (0..60).map(|i| 2.0 + (i % 3) as f64 * 0.1).collect();
        let treatment: Vec<f64> = (0..60).map(|i| 8.0 + (i % 3) as f64 * 0.1).collect();
        let c = compare_metric("error_rate", &control, &treatment, 2.0, &VerdictThresholds::default());
        assert_eq!(c.verdict, Verdict::Degraded);
    }

    #[test]
    fn too_few_samples_is_conservatively_not_significant() {
        let p = welch_p_value(&[1.0], &[100.0]);
        assert_eq!(p, 1.0);
    }

    #[test]
    fn bootstrap_ci_is_ordered() {
        let control: Vec<f64> = (0..100).map(|i| 100.0 + (i % 7) as f64).collect();
        let treatment: Vec<f64> = (0..100).map(|i| 90.0 + (i % 7) as f64).collect();
        let (lo, hi) = bootstrap_ci(&control, &treatment, Direction::LowerIsBetter, 500);
        assert!(lo <= hi);
    }
}
