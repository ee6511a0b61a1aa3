//! Rollback decision engine (spec §4.9a).
//!
//! Grounded in `examples/original_source/examples/rollback_decision_engine.py`'s
//! `RollbackDecisionEngine`: a severity score built from degraded metrics
//! and active alerts, four "don't roll back" guardrails that can veto a
//! rollback even when verification failed, and a strategy/urgency table
//! keyed off the verification status and severity.

use controlplane_types::metrics::Verdict;
use controlplane_verify::{VerificationResult, VerificationStatus};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RollbackUrgency {
    Immediate,
    High,
    Medium,
    Low,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RollbackStrategy {
    Instant,
    Gradual,
    Partial,
    None,
    Escalate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Critical,
    Warning,
    Info,
}

/// Alerts the orchestrator forwards to the decision engine get tagged by
/// kind, since an infrastructure or external-dependency alert changes
/// whether rolling back the *service* would even help (spec §4.9a
/// guardrails 2 and 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Infrastructure,
    Application,
    External,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub severity: AlertSeverity,
    pub kind: AlertKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PreviousVersionHealth {
    pub error_rate_pct: f64,
    pub p99_latency_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackDecision {
    pub should_rollback: bool,
    pub strategy: RollbackStrategy,
    pub urgency: RollbackUrgency,
    pub confidence: f64,
    pub primary_reason: String,
    pub all_reasons: Vec<String>,
    pub risk_factors: Vec<String>,
    pub guardrails_triggered: Vec<String>,
    pub safe_to_rollback: bool,
    pub alternative_actions: Vec<String>,
    pub severity_score: f64,
    pub blast_radius_pct: f64,
    pub service_criticality: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct DecisionThresholds {
    pub critical_error_rate_pct: f64,
    pub high_error_rate_pct: f64,
    pub critical_blast_radius_pct: f64,
    pub high_blast_radius_pct: f64,
}

impl Default for DecisionThresholds {
    fn default() -> Self {
        Self {
            critical_error_rate_pct: 5.0,
            high_error_rate_pct: 2.0,
            critical_blast_radius_pct: 10.0,
            high_blast_radius_pct: 5.0,
        }
    }
}

/// Severity in `[0, 100]`; higher means more severe degradation (spec
/// §4.9a). Error-rate degradation dominates, latency is next, everything
/// else contributes a flat 5 points; active alerts add on top.
fn calculate_severity(result: &VerificationResult, alerts: &[Alert], thresholds: &DecisionThresholds) -> f64 {
    let mut severity = 0.0;
    for verdict in &result.metric_verdicts {
        let comp = &verdict.comparison;
        if comp.verdict != Verdict::Degraded {
            continue;
        }
        if comp.metric == "error_rate" {
            severity += if comp.improvement_pct < -thresholds.critical_error_rate_pct {
                40.0
            } else if comp.improvement_pct < -thresholds.high_error_rate_pct {
                25.0
            } else {
                10.0
            };
        } else if comp.metric.contains("latency") {
            severity += if comp.improvement_pct < -100.0 {
                30.0
            } else if comp.improvement_pct < -50.0 {
                15.0
            } else {
                5.0
            };
        } else {
            severity += 5.0;
        }
    }

    let critical_alerts = alerts.iter().filter(|a| a.severity == AlertSeverity::Critical).count();
    let warning_alerts = alerts.iter().filter(|a| a.severity == AlertSeverity::Warning).count();
    severity += critical_alerts as f64 * 15.0;
    severity += warning_alerts as f64 * 5.0;

    severity.min(100.0)
}

/// Checks the four guardrails and returns `(triggered, safe_to_rollback)`.
/// Any of "previous version unhealthy", "infrastructure-wide alerts", or
/// "both versions worse than baseline" clears `safe_to_rollback`; an
/// external-dependency alert is surfaced but doesn't block by itself,
/// since rolling back is still harmless even if it won't help.
fn check_guardrails(
    result: &VerificationResult,
    previous_health: Option<&PreviousVersionHealth>,
    alerts: &[Alert],
    thresholds: &DecisionThresholds,
) -> (Vec<String>, bool) {
    let mut guardrails = Vec::new();
    let mut safe = true;

    if let Some(health) = previous_health {
        if health.error_rate_pct > thresholds.high_error_rate_pct {
            guardrails.push(format!("previous version has high error rate: {:.2}%", health.error_rate_pct));
            safe = false;
        }
        if health.p99_latency_ms > 2000.0 {
            guardrails.push(format!("previous version has high latency: {:.0}ms", health.p99_latency_ms));
        }
    }

    let infra_alerts = alerts.iter().filter(|a| a.kind == AlertKind::Infrastructure).count();
    if infra_alerts > 0 {
        guardrails.push(format!("infrastructure issues detected: {infra_alerts} alerts"));
        safe = false;
    }

    let degraded_vs_baseline = result
        .metric_verdicts
        .iter()
        .filter(|v| {
            let c = &v.comparison;
            c.baseline > 0.0 && ((c.treatment_mean - c.baseline) / c.baseline) * 100.0 > 20.0
        })
        .count();
    if !result.metric_verdicts.is_empty() && degraded_vs_baseline * 2 >= result.metric_verdicts.len() {
        guardrails.push("both versions are worse than baseline: possible infrastructure issue".to_string());
        safe = false;
    }

    let external_alerts = alerts
        .iter()
        .filter(|a| a.kind == AlertKind::External || a.message.to_lowercase().contains("downstream"))
        .count();
    if external_alerts > 0 {
        guardrails.push(format!("external dependency issues: {external_alerts} alerts"));
    }

    (guardrails, safe)
}

pub struct RollbackDecisionEngine {
    pub thresholds: DecisionThresholds,
}

impl Default for RollbackDecisionEngine {
    fn default() -> Self {
        Self { thresholds: DecisionThresholds::default() }
    }
}

impl RollbackDecisionEngine {
    pub fn new(thresholds: DecisionThresholds) -> Self {
        Self { thresholds }
    }

    /// Decides whether, and how, to roll back a deployment given its
    /// verification result (spec §4.9a). `blast_radius_pct` is the
    /// percentage of traffic on the new version at decision time (the
    /// canary percentage mid-rollout, 100 after full promotion).
    pub fn make_decision(
        &self,
        result: &VerificationResult,
        service_criticality: f64,
        blast_radius_pct: f64,
        previous_health: Option<&PreviousVersionHealth>,
        alerts: &[Alert],
    ) -> RollbackDecision {
        let severity_score = calculate_severity(result, alerts, &self.thresholds);
        let (guardrails_triggered, safe_to_rollback) =
            check_guardrails(result, previous_health, alerts, &self.thresholds);

        self.evaluate(result, severity_score, blast_radius_pct, service_criticality, guardrails_triggered, safe_to_rollback)
    }

    fn evaluate(
        &self,
        result: &VerificationResult,
        severity_score: f64,
        blast_radius_pct: f64,
        criticality: f64,
        guardrails_triggered: Vec<String>,
        safe_to_rollback: bool,
    ) -> RollbackDecision {
        if result.status == VerificationStatus::Passed {
            return RollbackDecision {
                should_rollback: false,
                strategy: RollbackStrategy::None,
                urgency: RollbackUrgency::None,
                confidence: result.confidence_score,
                primary_reason: "verification passed: deployment is successful".to_string(),
                all_reasons: vec!["metrics improved significantly".to_string(), "all health gates passed".to_string()],
                risk_factors: Vec::new(),
                guardrails_triggered,
                safe_to_rollback,
                alternative_actions: vec!["monitor for the next 30 minutes in cooldown".to_string()],
                severity_score,
                blast_radius_pct,
                service_criticality: criticality,
            };
        }

        if !safe_to_rollback {
            let mut reasons = vec!["rollback guardrails triggered".to_string()];
            reasons.extend(guardrails_triggered.iter().cloned());
            return RollbackDecision {
                should_rollback: false,
                strategy: RollbackStrategy::Escalate,
                urgency: RollbackUrgency::High,
                confidence: 85.0,
                primary_reason: "cannot roll back: previous version is also unhealthy".to_string(),
                all_reasons: reasons,
                risk_factors: vec![
                    "previous version has issues".to_string(),
                    "possible infrastructure problem".to_string(),
                ],
                guardrails_triggered,
                safe_to_rollback: false,
                alternative_actions: vec![
                    "escalate to the on-call engineer".to_string(),
                    "check infrastructure health".to_string(),
                    "review external dependencies".to_string(),
                    "consider an emergency hotfix".to_string(),
                ],
                severity_score,
                blast_radius_pct,
                service_criticality: criticality,
            };
        }

        if result.status == VerificationStatus::PartiallyResolved {
            if severity_score < 30.0 {
                return RollbackDecision {
                    should_rollback: false,
                    strategy: RollbackStrategy::None,
                    urgency: RollbackUrgency::Low,
                    confidence: 65.0,
                    primary_reason: "partial success: issues are minor".to_string(),
                    all_reasons: vec![
                        "most metrics improved".to_string(),
                        "some metrics degraded but within acceptable limits".to_string(),
                        format!("overall improvement: {:+.1}%", result.overall_improvement_pct),
                    ],
                    risk_factors: vec!["some metrics still degraded".to_string()],
                    guardrails_triggered,
                    safe_to_rollback,
                    alternative_actions: vec![
                        "open a follow-up incident for tuning".to_string(),
                        "monitor closely for the next hour".to_string(),
                        "consider a gradual rollout to 50% if issues persist".to_string(),
                    ],
                    severity_score,
                    blast_radius_pct,
                    service_criticality: criticality,
                };
            }
            return self.rollback_decision(
                RollbackStrategy::Partial,
                RollbackUrgency::Medium,
                "partial success with significant issues".to_string(),
                vec![
                    "some metrics significantly degraded".to_string(),
                    format!("severity score: {severity_score:.1}/100"),
                    "recommend a partial rollback to reduce blast radius".to_string(),
                ],
                severity_score,
                blast_radius_pct,
                criticality,
                guardrails_triggered,
                safe_to_rollback,
                vec![
                    "roll back to 50% traffic".to_string(),
                    "investigate and hotfix".to_string(),
                    "full rollback if issues continue".to_string(),
                ],
            );
        }

        if result.status == VerificationStatus::Failed {
            let (urgency, strategy, reasons) = if severity_score >= 70.0 || (criticality >= 0.9 && severity_score >= 50.0) {
                (
                    RollbackUrgency::Immediate,
                    RollbackStrategy::Instant,
                    vec![
                        format!("critical severity: {severity_score:.1}/100"),
                        format!("service criticality: {criticality:.2}"),
                        format!("blast radius: {blast_radius_pct:.1}%"),
                    ],
                )
            } else if severity_score >= 50.0 || blast_radius_pct >= self.thresholds.critical_blast_radius_pct {
                (
                    RollbackUrgency::High,
                    RollbackStrategy::Instant,
                    vec![format!("high severity: {severity_score:.1}/100"), format!("blast radius: {blast_radius_pct:.1}%")],
                )
            } else if severity_score >= 30.0 {
                (
                    RollbackUrgency::Medium,
                    RollbackStrategy::Gradual,
                    vec![format!("medium severity: {severity_score:.1}/100"), "gradual rollback recommended".to_string()],
                )
            } else {
                (
                    RollbackUrgency::Low,
                    RollbackStrategy::Gradual,
                    vec![format!("low severity: {severity_score:.1}/100"), "manual review recommended".to_string()],
                )
            };

            return self.rollback_decision(
                strategy,
                urgency,
                format!("verification failed: {:?}", result.status),
                reasons,
                severity_score,
                blast_radius_pct,
                criticality,
                guardrails_triggered,
                safe_to_rollback,
                vec!["emergency hotfix if root cause is identified".to_string(), "scale out if it's a capacity issue".to_string()],
            );
        }

        // BudgetExceeded or Inconclusive: roll back gradually as a precaution.
        self.rollback_decision(
            RollbackStrategy::Gradual,
            RollbackUrgency::Medium,
            format!("verification {:?}: rolling back as a precaution", result.status),
            vec![
                format!("status: {:?}", result.status),
                "cannot confirm the deployment succeeded".to_string(),
                "rolling back to be safe".to_string(),
            ],
            severity_score,
            blast_radius_pct,
            criticality,
            guardrails_triggered,
            safe_to_rollback,
            vec!["extend the verification window".to_string(), "manual investigation".to_string()],
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn rollback_decision(
        &self,
        strategy: RollbackStrategy,
        urgency: RollbackUrgency,
        primary_reason: String,
        reasons: Vec<String>,
        severity_score: f64,
        blast_radius_pct: f64,
        criticality: f64,
        guardrails_triggered: Vec<String>,
        safe_to_rollback: bool,
        alternatives: Vec<String>,
    ) -> RollbackDecision {
        // Confidence rises with severity and criticality: a severe, critical-service
        // failure is an easy call; a borderline one deserves more hedging.
        let confidence = (50.0 + severity_score * 0.3 + criticality * 20.0).clamp(50.0, 98.0);
        RollbackDecision {
            should_rollback: true,
            strategy,
            urgency,
            confidence,
            primary_reason,
            all_reasons: reasons,
            risk_factors: vec![format!("blast radius {blast_radius_pct:.1}%"), format!("service criticality {criticality:.2}")],
            guardrails_triggered,
            safe_to_rollback,
            alternative_actions: alternatives,
            severity_score,
            blast_radius_pct,
            service_criticality: criticality,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use controlplane_types::metrics::MetricComparison;
    use controlplane_verify::stability::{StabilityResult, StabilityStatus};
    use controlplane_verify::MetricVerdict;

    fn stable_result() -> StabilityResult {
        StabilityResult {
            status: StabilityStatus::Stable,
            slope_per_minute: 0.0,
            r_squared: 0.0,
            trend_significant: false,
            peak_count: 0,
            oscillation_per_minute: 0.0,
            is_oscillating: false,
            coefficient_of_variation: 0.0,
            variance_acceptable: true,
            duration_minutes: 10.0,
            duration_acceptable: true,
            is_stable_enough: true,
            reasons: Vec::new(),
        }
    }

    fn verdict(metric: &str, improvement_pct: f64, verdict: Verdict, baseline: f64, treatment_mean: f64) -> MetricVerdict {
        MetricVerdict {
            comparison: MetricComparison {
                metric: metric.to_string(),
                control_mean: baseline,
                treatment_mean,
                baseline,
                improvement_pct,
                ci_low: 0.0,
                ci_high: 0.0,
                p_value: 0.01,
                significant: true,
                verdict,
            },
            stability: stable_result(),
            downgraded_for_instability: false,
        }
    }

    fn result_with(status: VerificationStatus, verdicts: Vec<MetricVerdict>) -> VerificationResult {
        VerificationResult {
            status,
            metric_verdicts: verdicts,
            overall_improvement_pct: 0.0,
            improved_ratio: 0.0,
            degraded_ratio: 0.0,
            decision_reasons: Vec::new(),
            top_signals: Vec::new(),
            confidence_score: 90.0,
        }
    }

    #[test]
    fn passed_verification_never_rolls_back() {
        let engine = RollbackDecisionEngine::default();
        let result = result_with(VerificationStatus::Passed, Vec::new());
        let decision = engine.make_decision(&result, 0.95, 100.0, None, &[]);
        assert!(!decision.should_rollback);
        assert_eq!(decision.strategy, RollbackStrategy::None);
    }

    #[test]
    fn unhealthy_previous_version_escalates_instead_of_rolling_back() {
        let engine = RollbackDecisionEngine::default();
        let result = result_with(
            VerificationStatus::Failed,
            vec![verdict("error_rate", -10.0, Verdict::Degraded, 1.0, 11.0)],
        );
        let prev = PreviousVersionHealth { error_rate_pct: 9.0, p99_latency_ms: 100.0 };
        let decision = engine.make_decision(&result, 0.95, 100.0, Some(&prev), &[]);
        assert!(!decision.should_rollback);
        assert_eq!(decision.strategy, RollbackStrategy::Escalate);
        assert!(!decision.safe_to_rollback);
    }

    #[test]
    fn critical_service_severe_failure_is_instant_and_immediate() {
        let engine = RollbackDecisionEngine::default();
        let result = result_with(
            VerificationStatus::Failed,
            vec![verdict("error_rate", -10.0, Verdict::Degraded, 1.0, 11.0)],
        );
        let decision = engine.make_decision(&result, 0.95, 100.0, None, &[]);
        assert!(decision.should_rollback);
        assert_eq!(decision.strategy, RollbackStrategy::Instant);
        assert_eq!(decision.urgency, RollbackUrgency::Immediate);
    }

    #[test]
    fn minor_partial_resolution_does_not_roll_back() {
        let engine = RollbackDecisionEngine::default();
        let result = result_with(
            VerificationStatus::PartiallyResolved,
            vec![verdict("cpu_usage", -2.0, Verdict::Degraded, 50.0, 51.0)],
        );
        let decision = engine.make_decision(&result, 0.5, 50.0, None, &[]);
        assert!(!decision.should_rollback);
        assert_eq!(decision.urgency, RollbackUrgency::Low);
    }

    #[test]
    fn budget_exceeded_falls_back_to_precautionary_gradual_rollback() {
        let engine = RollbackDecisionEngine::default();
        let result = result_with(VerificationStatus::BudgetExceeded, Vec::new());
        let decision = engine.make_decision(&result, 0.5, 25.0, None, &[]);
        assert!(decision.should_rollback);
        assert_eq!(decision.strategy, RollbackStrategy::Gradual);
        assert_eq!(decision.urgency, RollbackUrgency::Medium);
    }

    #[test]
    fn infrastructure_alert_blocks_even_with_high_severity() {
        let engine = RollbackDecisionEngine::default();
        let result = result_with(
            VerificationStatus::Failed,
            vec![verdict("error_rate", -10.0, Verdict::Degraded, 1.0, 11.0)],
        );
        let alerts = vec![Alert {
            severity: AlertSeverity::Critical,
            kind: AlertKind::Infrastructure,
            message: "node disk pressure".to_string(),
        }];
        let decision = engine.make_decision(&result, 0.95, 100.0, None, &alerts);
        assert_eq!(decision.strategy, RollbackStrategy::Escalate);
    }
}
