//! Safety gate checker and risk scorer (spec §4.5, §4.10).
//!
//! Five gates, all of which must pass before a deployment proceeds: error
//! budget, blast radius, cooldown, risk score, and proof-of-safety. A failing
//! gate at severity HIGH or above routes the orchestrator to
//! `PAUSED_FOR_HUMAN_REVIEW` rather than `FAILED`.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use controlplane_depgraph::DependencyGraph;
use controlplane_types::MetricBackend;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SafetyError {
    #[error("no safety artifact found for commit {0}")]
    ArtifactMissing(String),
    #[error("safety artifact self-hash does not verify for commit {0}")]
    ArtifactHashMismatch(String),
    #[error("metric query failed: {0}")]
    MetricQueryFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateSeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateOutcome {
    pub name: String,
    pub passed: bool,
    pub reason: String,
    pub severity: GateSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SafetyOutcome {
    Proceed,
    PausedForHumanReview,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyCheckResult {
    pub gates: Vec<GateOutcome>,
    pub overall_passed: bool,
    pub outcome: SafetyOutcome,
}

/// Thresholds that tune the five gates. Loaded by the caller from
/// `controlplane-config`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyThresholds {
    pub error_budget_pct: f64,
    pub blast_radius_max_pct: f64,
    pub cooldown: Duration,
    pub risk_score_max: f64,
}

impl Default for SafetyThresholds {
    fn default() -> Self {
        Self {
            error_budget_pct: 5.0,
            blast_radius_max_pct: 25.0,
            cooldown: Duration::minutes(15),
            risk_score_max: 75.0,
        }
    }
}

/// Service-tier classification used by the risk scorer, `criticality ∈ [1,5]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CriticalityTier {
    Dev,
    Low,
    Medium,
    High,
    Critical,
}

impl CriticalityTier {
    fn weight(self) -> f64 {
        match self {
            CriticalityTier::Dev => 1.0,
            CriticalityTier::Low => 2.0,
            CriticalityTier::Medium => 3.0,
            CriticalityTier::High => 4.0,
            CriticalityTier::Critical => 5.0,
        }
    }
}

/// Inputs the risk scorer needs about the proposed change (spec §4.10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskInputs {
    pub lines_changed: u64,
    pub test_failure_rate: f64,
    pub security_scan_failed: bool,
    pub cve_count: u32,
    pub coverage_drop_pct: f64,
    pub lint_error_count: u32,
    pub build_failed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskBucket {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskRecommendation {
    Deploy,
    Canary,
    ManualReview,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub criticality: f64,
    pub change_size: f64,
    pub error_severity: f64,
    pub risk_score: f64,
    pub bucket: RiskBucket,
    pub recommendation: RiskRecommendation,
}

fn change_size_bucket(lines_changed: u64) -> f64 {
    match lines_changed {
        0..=10 => 1.0,
        11..=50 => 2.0,
        51..=200 => 3.0,
        201..=500 => 4.0,
        _ => 5.0,
    }
}

fn error_severity(inputs: &RiskInputs) -> f64 {
    if inputs.build_failed {
        return 10.0;
    }
    let mut severity = (inputs.test_failure_rate * 4.0).min(4.0);
    if inputs.security_scan_failed {
        severity += 5.0;
    }
    severity += (inputs.cve_count as f64).min(3.0);
    severity += (inputs.coverage_drop_pct * 4.0).min(4.0);
    if inputs.lint_error_count > 0 {
        severity += 1.0;
    }
    severity.min(10.0)
}

/// Risk score in [0,100]: `criticality × change_size × error_severity / 250 × 100`.
pub fn score_risk(tier: CriticalityTier, inputs: &RiskInputs) -> RiskAssessment {
    let criticality = tier.weight();
    let change_size = change_size_bucket(inputs.lines_changed);
    let severity = error_severity(inputs);
    let risk_score = criticality * change_size * severity / 250.0 * 100.0;

    let bucket = if risk_score >= 75.0 {
        RiskBucket::Critical
    } else if risk_score >= 50.0 {
        RiskBucket::High
    } else if risk_score >= 20.0 {
        RiskBucket::Medium
    } else {
        RiskBucket::Low
    };

    let recommendation = if tier == CriticalityTier::Critical || inputs.security_scan_failed {
        RiskRecommendation::ManualReview
    } else {
        match bucket {
            RiskBucket::Low => RiskRecommendation::Deploy,
            RiskBucket::Medium | RiskBucket::High => RiskRecommendation::Canary,
            RiskBucket::Critical => RiskRecommendation::ManualReview,
        }
    };

    RiskAssessment { criticality, change_size, error_severity: severity, risk_score, bucket, recommendation }
}

/// The externally produced, self-hashed proof-of-safety record (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyArtifact {
    pub incident_id: String,
    pub service_name: String,
    pub timestamp: DateTime<Utc>,
    pub checks_run: Vec<String>,
    pub checks_passed: Vec<String>,
    pub checks_failed: Vec<String>,
    pub tool_versions: HashMap<String, String>,
    pub check_results: HashMap<String, serde_json::Value>,
    pub risk_assessment: serde_json::Value,
    pub overall_passed: bool,
    pub recommendation: String,
    pub commit_hash: String,
    pub build_hash: String,
    #[serde(default)]
    pub hash: Option<String>,
}

impl SafetyArtifact {
    /// Recomputes the self-hash with `hash` blanked and compares it against
    /// the stored value.
    pub fn verify_self_hash(&self) -> bool {
        let Some(stored) = &self.hash else { return false };
        let mut blanked = self.clone();
        blanked.hash = None;
        let canonical = match controlplane_types::canonical::canonical_json(&blanked) {
            Ok(c) => c,
            Err(_) => return false,
        };
        let computed = hex::encode(Sha256::digest(canonical.as_bytes()));
        &computed == stored
    }
}

/// Source of safety artifacts keyed by commit hash, and of the service's
/// last deployment time for the cooldown gate. Implemented by the caller
/// (typically backed by the same store the proof-of-safety pipeline wrote
/// the artifact to).
pub trait SafetyRecords: Send + Sync {
    fn artifact_for_commit(&self, commit_hash: &str) -> Option<SafetyArtifact>;
    fn last_deploy(&self, service: &str) -> Option<DateTime<Utc>>;
}

pub struct SafetyGateChecker<'a> {
    pub metrics: &'a dyn MetricBackend,
    pub graph: &'a DependencyGraph,
    pub records: &'a dyn SafetyRecords,
    pub criticality_table: HashMap<String, CriticalityTier>,
    pub thresholds: SafetyThresholds,
}

impl<'a> SafetyGateChecker<'a> {
    fn criticality_for(&self, service: &str) -> CriticalityTier {
        self.criticality_table.get(service).copied().unwrap_or(CriticalityTier::Medium)
    }

    fn error_budget_gate(&self, service: &str) -> GateOutcome {
        let query = format!("rate(http_requests_total{{service=\"{service}\",status=~\"5..\"}}[1h])");
        match self.metrics.instant(&query) {
            Ok(rate_pct) => {
                let passed = rate_pct <= self.thresholds.error_budget_pct;
                GateOutcome {
                    name: "error_budget".to_string(),
                    passed,
                    reason: format!(
                        "1h error rate {rate_pct:.2}% vs threshold {:.2}%",
                        self.thresholds.error_budget_pct
                    ),
                    severity: if passed { GateSeverity::Low } else { GateSeverity::High },
                }
            }
            Err(e) => GateOutcome {
                name: "error_budget".to_string(),
                passed: false,
                reason: format!("metric query failed: {e:#}"),
                severity: GateSeverity::Medium,
            },
        }
    }

    fn blast_radius_gate(&self, service: &str) -> GateOutcome {
        let total = self.graph.service_count().max(1);
        let affected = self
            .graph
            .dependencies(service, controlplane_depgraph::Direction::Downstream, 5)
            .map(|d| d.len())
            .unwrap_or(0);
        let blast_radius_pct = 100.0 * affected as f64 / total as f64;
        let passed = blast_radius_pct <= self.thresholds.blast_radius_max_pct;
        GateOutcome {
            name: "blast_radius".to_string(),
            passed,
            reason: format!(
                "blast radius {blast_radius_pct:.1}% vs max {:.1}%",
                self.thresholds.blast_radius_max_pct
            ),
            severity: if passed { GateSeverity::Low } else { GateSeverity::High },
        }
    }

    fn cooldown_gate(&self, service: &str, now: DateTime<Utc>) -> GateOutcome {
        match self.records.last_deploy(service) {
            Some(last) => {
                let elapsed = now - last;
                let passed = elapsed >= self.thresholds.cooldown;
                GateOutcome {
                    name: "cooldown".to_string(),
                    passed,
                    reason: format!(
                        "{} since last deploy vs required {}",
                        elapsed, self.thresholds.cooldown
                    ),
                    severity: if passed { GateSeverity::Low } else { GateSeverity::Medium },
                }
            }
            None => GateOutcome {
                name: "cooldown".to_string(),
                passed: true,
                reason: "no prior deployment on record".to_string(),
                severity: GateSeverity::Low,
            },
        }
    }

    fn risk_score_gate(&self, service: &str, inputs: &RiskInputs) -> (GateOutcome, RiskAssessment) {
        let tier = self.criticality_for(service);
        let assessment = score_risk(tier, inputs);
        let passed = assessment.risk_score <= self.thresholds.risk_score_max;
        let outcome = GateOutcome {
            name: "risk_score".to_string(),
            passed,
            reason: format!(
                "risk score {:.1} vs max {:.1} ({:?})",
                assessment.risk_score, self.thresholds.risk_score_max, assessment.bucket
            ),
            severity: if passed { GateSeverity::Low } else { GateSeverity::High },
        };
        (outcome, assessment)
    }

    fn proof_of_safety_gate(&self, commit_hash: &str) -> GateOutcome {
        match self.records.artifact_for_commit(commit_hash) {
            None => GateOutcome {
                name: "proof_of_safety".to_string(),
                passed: false,
                reason: SafetyError::ArtifactMissing(commit_hash.to_string()).to_string(),
                severity: GateSeverity::Critical,
            },
            Some(artifact) => {
                if !artifact.verify_self_hash() {
                    return GateOutcome {
                        name: "proof_of_safety".to_string(),
                        passed: false,
                        reason: SafetyError::ArtifactHashMismatch(commit_hash.to_string()).to_string(),
                        severity: GateSeverity::Critical,
                    };
                }
                GateOutcome {
                    name: "proof_of_safety".to_string(),
                    passed: artifact.overall_passed,
                    reason: format!("artifact overall_passed={}", artifact.overall_passed),
                    severity: if artifact.overall_passed { GateSeverity::Low } else { GateSeverity::Critical },
                }
            }
        }
    }

    /// Runs all five gates and produces the combined outcome. Gates still
    /// run even after one fails (no fail-fast) so that the orchestrator's
    /// audit trail records every check attempted.
    pub fn run_all_checks(
        &self,
        service: &str,
        commit_hash: &str,
        risk_inputs: &RiskInputs,
        now: DateTime<Utc>,
    ) -> SafetyCheckResult {
        let (risk_gate, _assessment) = self.risk_score_gate(service, risk_inputs);
        let gates = vec![
            self.error_budget_gate(service),
            self.blast_radius_gate(service),
            self.cooldown_gate(service, now),
            risk_gate,
            self.proof_of_safety_gate(commit_hash),
        ];

        let overall_passed = gates.iter().all(|g| g.passed);
        let worst_failure = gates.iter().filter(|g| !g.passed).map(|g| g.severity).max();

        let outcome = if overall_passed {
            SafetyOutcome::Proceed
        } else if worst_failure >= Some(GateSeverity::High) {
            SafetyOutcome::PausedForHumanReview
        } else {
            SafetyOutcome::Failed
        };

        SafetyCheckResult { gates, overall_passed, outcome }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    struct FakeMetrics {
        error_rate: f64,
    }

    impl MetricBackend for FakeMetrics {
        fn instant(&self, _query: &str) -> Result<f64> {
            Ok(self.error_rate)
        }
        fn range(
            &self,
            _query: &str,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
            _step: Duration,
        ) -> Result<Vec<(DateTime<Utc>, f64)>> {
            Ok(vec![])
        }
    }

    struct FakeRecords {
        artifact: Option<SafetyArtifact>,
        last_deploy: Option<DateTime<Utc>>,
    }

    impl SafetyRecords for FakeRecords {
        fn artifact_for_commit(&self, _commit_hash: &str) -> Option<SafetyArtifact> {
            self.artifact.clone()
        }
        fn last_deploy(&self, _service: &str) -> Option<DateTime<Utc>> {
            self.last_deploy
        }
    }

    fn passing_artifact() -> SafetyArtifact {
        let mut artifact = SafetyArtifact {
            incident_id: "inc-1".to_string(),
            service_name: "payment-service".to_string(),
            timestamp: Utc::now(),
            checks_run: vec!["tests".to_string()],
            checks_passed: vec!["tests".to_string()],
            checks_failed: vec![],
            tool_versions: HashMap::new(),
            check_results: HashMap::new(),
            risk_assessment: serde_json::json!({}),
            overall_passed: true,
            recommendation: "DEPLOY".to_string(),
            commit_hash: "abc123".to_string(),
            build_hash: "build-1".to_string(),
            hash: None,
        };
        let canonical = controlplane_types::canonical::canonical_json(&artifact).unwrap();
        artifact.hash = Some(hex::encode(Sha256::digest(canonical.as_bytes())));
        artifact
    }

    #[test]
    fn artifact_self_hash_round_trips() {
        let artifact = passing_artifact();
        assert!(artifact.verify_self_hash());
    }

    #[test]
    fn tampered_artifact_fails_self_hash() {
        let mut artifact = passing_artifact();
        artifact.overall_passed = false;
        assert!(!artifact.verify_self_hash());
    }

    #[test]
    fn all_gates_passing_yields_proceed() {
        let metrics = FakeMetrics { error_rate: 1.0 };
        let mut graph = DependencyGraph::new();
        graph.add_service("payment-service", HashMap::new());
        let records = FakeRecords { artifact: Some(passing_artifact()), last_deploy: None };
        let checker = SafetyGateChecker {
            metrics: &metrics,
            graph: &graph,
            records: &records,
            criticality_table: HashMap::new(),
            thresholds: SafetyThresholds::default(),
        };
        let inputs = RiskInputs {
            lines_changed: 5,
            test_failure_rate: 0.0,
            security_scan_failed: false,
            cve_count: 0,
            coverage_drop_pct: 0.0,
            lint_error_count: 0,
            build_failed: false,
        };
        let result = checker.run_all_checks("payment-service", "abc123", &inputs, Utc::now());
        assert!(result.overall_passed);
        assert_eq!(result.outcome, SafetyOutcome::Proceed);
    }

    #[test]
    fn missing_artifact_pauses_for_human_review() {
        let metrics = FakeMetrics { error_rate: 1.0 };
        let mut graph = DependencyGraph::new();
        graph.add_service("payment-service", HashMap::new());
        let records = FakeRecords { artifact: None, last_deploy: None };
        let checker = SafetyGateChecker {
            metrics: &metrics,
            graph: &graph,
            records: &records,
            criticality_table: HashMap::new(),
            thresholds: SafetyThresholds::default(),
        };
        let inputs = RiskInputs {
            lines_changed: 5,
            test_failure_rate: 0.0,
            security_scan_failed: false,
            cve_count: 0,
            coverage_drop_pct: 0.0,
            lint_error_count: 0,
            build_failed: false,
        };
        let result = checker.run_all_checks("payment-service", "missing-commit", &inputs, Utc::now());
        assert!(!result.overall_passed);
        assert_eq!(result.outcome, SafetyOutcome::PausedForHumanReview);
    }

    #[test]
    fn build_failure_forces_max_error_severity() {
        let inputs = RiskInputs {
            lines_changed: 1000,
            test_failure_rate: 1.0,
            security_scan_failed: true,
            cve_count: 10,
            coverage_drop_pct: 1.0,
            lint_error_count: 5,
            build_failed: true,
        };
        let assessment = score_risk(CriticalityTier::Critical, &inputs);
        assert_eq!(assessment.error_severity, 10.0);
        assert_eq!(assessment.risk_score, 100.0);
        assert_eq!(assessment.bucket, RiskBucket::Critical);
        assert_eq!(assessment.recommendation, RiskRecommendation::ManualReview);
    }

    #[test]
    fn tiny_low_risk_change_recommends_deploy() {
        let inputs = RiskInputs {
            lines_changed: 5,
            test_failure_rate: 0.0,
            security_scan_failed: false,
            cve_count: 0,
            coverage_drop_pct: 0.0,
            lint_error_count: 0,
            build_failed: false,
        };
        let assessment = score_risk(CriticalityTier::Low, &inputs);
        assert_eq!(assessment.bucket, RiskBucket::Low);
        assert_eq!(assessment.recommendation, RiskRecommendation::Deploy);
    }
}
