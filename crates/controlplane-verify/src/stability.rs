//! Stability sub-check applied to each time series used in a verification
//! (spec §4.8 "Stability sub-check").
//!
//! Grounded in `examples/original_source/examples/metric_stability_analyzer.py`'s
//! `MetricStabilityAnalyzer` (`_analyze_trend`/`_analyze_oscillation`/
//! `_analyze_variance`/`_determine_stability`): linear-regression trend
//! significance, z-normalized peak-count oscillation detection, and
//! coefficient-of-variation variance, combined into one stability verdict.
//!
//! Unlike the original, trend direction is evaluated against the metric's
//! [`crate::compare::Direction`] so that a "higher is better" metric (e.g.
//! throughput) trending upward is never misclassified as degrading -- the
//! original's `_analyze_trend` ignores `direction` entirely and only uses
//! it to reword the reason string, which would call an improving throughput
//! series DEGRADING. See `DESIGN.md`.

use crate::compare::Direction;
use statrs::distribution::{ContinuousCDF, StudentsT};

#[derive(Debug, Clone, Copy)]
pub struct StabilityConfig {
    pub min_stable_minutes: f64,
    pub max_coefficient_of_variation: f64,
    pub max_oscillation_per_minute: f64,
    pub trend_significance_level: f64,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            min_stable_minutes: 5.0,
            max_coefficient_of_variation: 0.15,
            max_oscillation_per_minute: 0.5,
            trend_significance_level: 0.05,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StabilityStatus {
    Stable,
    Improving,
    Degrading,
    Oscillating,
    InsufficientData,
}

#[derive(Debug, Clone)]
pub struct StabilityResult {
    pub status: StabilityStatus,
    pub slope_per_minute: f64,
    pub r_squared: f64,
    pub trend_significant: bool,
    pub peak_count: usize,
    pub oscillation_per_minute: f64,
    pub is_oscillating: bool,
    pub coefficient_of_variation: f64,
    pub variance_acceptable: bool,
    pub duration_minutes: f64,
    pub duration_acceptable: bool,
    pub is_stable_enough: bool,
    pub reasons: Vec<String>,
}

fn insufficient_data() -> StabilityResult {
    StabilityResult {
        status: StabilityStatus::InsufficientData,
        slope_per_minute: 0.0,
        r_squared: 0.0,
        trend_significant: false,
        peak_count: 0,
        oscillation_per_minute: 0.0,
        is_oscillating: false,
        coefficient_of_variation: 0.0,
        variance_acceptable: false,
        duration_minutes: 0.0,
        duration_acceptable: false,
        is_stable_enough: false,
        reasons: vec!["fewer than 10 samples: insufficient data for stability analysis".to_string()],
    }
}

fn mean(v: &[f64]) -> f64 {
    v.iter().sum::<f64>() / v.len() as f64
}

fn std_dev(v: &[f64], m: f64) -> f64 {
    if v.len() < 2 {
        return 0.0;
    }
    (v.iter().map(|x| (x - m).powi(2)).sum::<f64>() / v.len() as f64).sqrt()
}

/// Ordinary least squares: returns `(slope, intercept, r_squared, slope_std_err)`.
fn linear_regression(xs: &[f64], ys: &[f64]) -> (f64, f64, f64, f64) {
    let n = xs.len() as f64;
    let x_mean = mean(xs);
    let y_mean = mean(ys);
    let ss_xx: f64 = xs.iter().map(|x| (x - x_mean).powi(2)).sum();
    let ss_xy: f64 = xs.iter().zip(ys).map(|(x, y)| (x - x_mean) * (y - y_mean)).sum();
    if ss_xx == 0.0 {
        return (0.0, y_mean, 0.0, 0.0);
    }
    let slope = ss_xy / ss_xx;
    let intercept = y_mean - slope * x_mean;

    let ss_tot: f64 = ys.iter().map(|y| (y - y_mean).powi(2)).sum();
    let ss_res: f64 = xs.iter().zip(ys).map(|(x, y)| (y - (slope * x + intercept)).powi(2)).sum();
    let r_squared = if ss_tot > 0.0 { 1.0 - ss_res / ss_tot } else { 0.0 };

    let df = (n - 2.0).max(1.0);
    let mse = ss_res / df;
    let slope_std_err = if ss_xx > 0.0 { (mse / ss_xx).sqrt() } else { 0.0 };

    (slope, intercept, r_squared, slope_std_err)
}

fn trend_p_value(slope: f64, slope_std_err: f64, n: usize) -> f64 {
    if slope_std_err == 0.0 {
        return if slope == 0.0 { 1.0 } else { 0.0 };
    }
    let t_stat = slope / slope_std_err;
    let df = (n as f64 - 2.0).max(1.0);
    match StudentsT::new(0.0, 1.0, df) {
        Ok(dist) => (2.0 * (1.0 - dist.cdf(t_stat.abs()))).clamp(0.0, 1.0),
        Err(_) => 1.0,
    }
}

/// Local-maxima peak count on a z-normalized series, counting peaks in
/// both the series and its negation (so dips count as peaks too, matching
/// `find_peaks` applied to `normalized` and `-normalized` in the original).
fn count_peaks(normalized: &[f64], prominence: f64) -> usize {
    let mut peaks = 0;
    for window in normalized.windows(3) {
        let (a, b, c) = (window[0], window[1], window[2]);
        if b > a && b > c && (b - a.max(c)) >= prominence {
            peaks += 1;
        }
    }
    for window in normalized.windows(3) {
        let (a, b, c) = (-window[0], -window[1], -window[2]);
        if b > a && b > c && (b - a.max(c)) >= prominence {
            peaks += 1;
        }
    }
    peaks
}

fn is_degrading(slope: f64, significant: bool, direction: Direction) -> bool {
    if !significant || slope.abs() < 0.01 {
        return false;
    }
    match direction {
        Direction::LowerIsBetter => slope > 0.0,
        Direction::HigherIsBetter => slope < 0.0,
    }
}

fn is_improving(slope: f64, significant: bool, direction: Direction) -> bool {
    if !significant || slope.abs() < 0.01 {
        return false;
    }
    match direction {
        Direction::LowerIsBetter => slope < 0.0,
        Direction::HigherIsBetter => slope > 0.0,
    }
}

/// `samples` are `(minutes_since_window_start, value)` pairs, already
/// sorted ascending by time (spec §4.8 "Stability sub-check").
pub fn analyze(samples: &[(f64, f64)], direction: Direction, config: &StabilityConfig) -> StabilityResult {
    if samples.len() < 10 {
        return insufficient_data();
    }

    let xs: Vec<f64> = samples.iter().map(|(t, _)| *t).collect();
    let ys: Vec<f64> = samples.iter().map(|(_, v)| *v).collect();
    let duration_minutes = xs.last().copied().unwrap_or(0.0) - xs.first().copied().unwrap_or(0.0);
    let duration_acceptable = duration_minutes >= config.min_stable_minutes;

    let (slope, _intercept, r_squared, slope_std_err) = linear_regression(&xs, &ys);
    let p_value = trend_p_value(slope, slope_std_err, samples.len());
    let trend_significant = p_value < config.trend_significance_level;

    let y_mean = mean(&ys);
    let y_std = std_dev(&ys, y_mean);
    let normalized: Vec<f64> = ys.iter().map(|y| (y - y_mean) / (y_std + 1e-9)).collect();
    let peak_count = count_peaks(&normalized, 0.5);
    let oscillation_per_minute = if duration_minutes > 0.0 { peak_count as f64 / duration_minutes } else { 0.0 };
    let is_oscillating = oscillation_per_minute > config.max_oscillation_per_minute;

    let coefficient_of_variation = if y_mean > 0.0 { y_std / y_mean } else { f64::INFINITY };
    let variance_acceptable = coefficient_of_variation <= config.max_coefficient_of_variation;

    let degrading = is_degrading(slope, trend_significant, direction);
    let improving = is_improving(slope, trend_significant, direction);

    let mut reasons = Vec::new();
    reasons.push(if duration_acceptable {
        format!("duration sufficient: {duration_minutes:.1} min")
    } else {
        format!("duration too short: {duration_minutes:.1} min < {} min required", config.min_stable_minutes)
    });

    let status = if is_oscillating {
        reasons.push(format!(
            "oscillating: {oscillation_per_minute:.2} peaks/min (threshold {:.2})",
            config.max_oscillation_per_minute
        ));
        StabilityStatus::Oscillating
    } else if degrading {
        reasons.push(format!("trending worse: slope {slope:+.4}/min, p={p_value:.3}"));
        StabilityStatus::Degrading
    } else if improving {
        reasons.push(format!("trending better: slope {slope:+.4}/min, p={p_value:.3}"));
        StabilityStatus::Improving
    } else {
        reasons.push(format!("trend stable: slope {slope:+.4}/min"));
        StabilityStatus::Stable
    };

    if variance_acceptable {
        reasons.push(format!("acceptable variance: cv={:.1}%", coefficient_of_variation * 100.0));
    } else {
        reasons.push(format!(
            "high variance: cv={:.1}% (threshold {:.1}%)",
            coefficient_of_variation * 100.0,
            config.max_coefficient_of_variation * 100.0
        ));
    }

    let is_stable_enough = duration_acceptable && !is_oscillating && variance_acceptable && !degrading;

    StabilityResult {
        status,
        slope_per_minute: slope,
        r_squared,
        trend_significant,
        peak_count,
        oscillation_per_minute,
        is_oscillating,
        coefficient_of_variation,
        variance_acceptable,
        duration_minutes,
        duration_acceptable,
        is_stable_enough,
        reasons,
    }
}
