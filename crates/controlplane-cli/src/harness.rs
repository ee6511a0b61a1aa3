//! File-backed/mock collaborators the demo binary wires into one
//! [`controlplane_core::Orchestrator`]. Every fake here stands in for a real
//! platform integration (a real Kubernetes client, a real Prometheus, a
//! real safety-artifact store) the same way a test-only in-process fake
//! stands in for a real backend in a unit test -- these are not meant to be
//! realistic, only to exercise every step of the real workflow.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use anyhow::Result;
use chrono::{DateTime, Utc};
use controlplane_audit::AuditLog;
use controlplane_config::Config;
use controlplane_conflict::ConflictDetector;
use controlplane_core::{Orchestrator, OrchestratorConfig, OperationRequest};
use controlplane_deploy::{CanaryConfig, CanaryHealthGate, DeploymentEngine, DeploymentRecord};
use controlplane_depgraph::DependencyGraph;
use controlplane_lock::{CentralLockStore, LockManager};
use controlplane_metrics::{FakeMetricBackend, GateThresholds, HealthGateEvaluator};
use controlplane_notify::NullNotifier;
use controlplane_rollback::{Alert, AlertKind, AlertSeverity, RollbackCoordinator, RollbackDecisionEngine};
use controlplane_safety::{
    CriticalityTier, RiskInputs, SafetyArtifact, SafetyGateChecker, SafetyRecords, SafetyThresholds,
};
use controlplane_types::deployment::DeploymentContext;
use controlplane_types::{ExecutionResult, GateStatus, OperationKind};
use controlplane_verify::{MetricWindow, VerificationBudget, VerificationConfig, VerificationEngine, VerificationResult};
use sha2::{Digest, Sha256};

/// Signs a minimal passing safety artifact for `commit_hash`, mirroring the
/// proof-of-safety pipeline's own self-hashing step (spec §4.5 proof of
/// safety gate).
fn sign(mut artifact: SafetyArtifact) -> SafetyArtifact {
    let canonical = controlplane_types::canonical::canonical_json(&artifact).expect("artifact always serializes");
    artifact.hash = Some(hex::encode(Sha256::digest(canonical.as_bytes())));
    artifact
}

struct FakeRecords {
    artifacts: HashMap<String, SafetyArtifact>,
}

impl SafetyRecords for FakeRecords {
    fn artifact_for_commit(&self, commit_hash: &str) -> Option<SafetyArtifact> {
        self.artifacts.get(commit_hash).cloned()
    }

    fn last_deploy(&self, _service: &str) -> Option<DateTime<Utc>> {
        None
    }
}

/// Adapts [`HealthGateEvaluator`] to `controlplane-deploy`'s narrower
/// `CanaryHealthGate` capability, comparing every canary stage against a
/// fixed `"stable"` baseline version.
struct FixedBaselineHealthGate<'a> {
    evaluator: HealthGateEvaluator<'a>,
}

impl<'a> CanaryHealthGate for FixedBaselineHealthGate<'a> {
    fn evaluate(&self, service: &str, version: &str) -> Result<GateStatus> {
        let evaluation = self.evaluator.evaluate(service, version, "stable");
        if evaluation.overall_passed {
            Ok(GateStatus::Passed)
        } else {
            let detail =
                evaluation.gates.iter().filter(|g| !g.status.is_passed()).map(|g| g.name.clone()).collect::<Vec<_>>().join(", ");
            Ok(GateStatus::Failed { detail })
        }
    }
}

#[derive(Default)]
struct InMemoryTarget {
    images: Mutex<HashMap<String, String>>,
    replicas: Mutex<HashMap<String, u32>>,
}

impl controlplane_types::DeploymentTarget for InMemoryTarget {
    fn set_image(&self, service: &str, image_tag: &str) -> Result<()> {
        self.images.lock().expect("images mutex poisoned").insert(service.to_string(), image_tag.to_string());
        Ok(())
    }

    fn await_rollout(&self, _service: &str, _timeout: std::time::Duration) -> Result<bool> {
        Ok(true)
    }

    fn scale(&self, service: &str, replicas: u32) -> Result<()> {
        self.replicas.lock().expect("replicas mutex poisoned").insert(service.to_string(), replicas);
        Ok(())
    }

    fn force_delete_pods(&self, _label_selector: &str) -> Result<()> {
        Ok(())
    }

    fn ready_counts(&self, service: &str) -> Result<(u32, u32)> {
        let total = *self.replicas.lock().expect("replicas mutex poisoned").get(service).unwrap_or(&4);
        Ok((total.max(4), total.max(4)))
    }
}

/// Everything one `controlplane run` invocation wires together: the fakes
/// plus the real domain crates composed exactly the way `Orchestrator`
/// expects to find them.
pub struct Demo {
    audit: AuditLog,
    graph: DependencyGraph,
    lock_manager: LockManager,
    metrics: FakeMetricBackend,
    records: FakeRecords,
    target: InMemoryTarget,
    notifier: NullNotifier,
    config: Config,
    inject_regression: bool,
}

impl Demo {
    pub fn new(audit_dir: &Path, config: &Config, inject_regression: bool) -> Result<Self> {
        let audit = AuditLog::new(audit_dir)?;
        let graph = DependencyGraph::new();

        let mut instants = HashMap::new();
        // Error budget / health-gate queries all resolve to healthy values
        // regardless of the exact query text the gates build, so the demo
        // doesn't need to reproduce every PromQL string verbatim.
        for service in ["checkout", "checkout-canary"] {
            instants.insert(format!("rate(http_requests_total{{service=\"{service}\",status=~\"5..\"}}[1h])"), 0.1);
        }
        let metrics = FakeMetricBackend { instants };

        let mut artifacts = HashMap::new();
        artifacts.insert(
            "deadbeef".to_string(),
            sign(SafetyArtifact {
                incident_id: "demo-incident".to_string(),
                service_name: "checkout".to_string(),
                timestamp: Utc::now(),
                checks_run: vec!["tests".to_string(), "lint".to_string()],
                checks_passed: vec!["tests".to_string(), "lint".to_string()],
                checks_failed: vec![],
                tool_versions: HashMap::new(),
                check_results: HashMap::new(),
                risk_assessment: serde_json::json!({}),
                overall_passed: true,
                recommendation: "DEPLOY".to_string(),
                commit_hash: "deadbeef".to_string(),
                build_hash: "build-demo".to_string(),
                hash: None,
            }),
        );

        Ok(Self {
            audit,
            graph,
            lock_manager: LockManager::new(Box::new(CentralLockStore::new())),
            metrics,
            records: FakeRecords { artifacts },
            target: InMemoryTarget::default(),
            notifier: NullNotifier,
            config: config.clone(),
            inject_regression,
        })
    }

    pub fn run(&self, service: &str, image: &str) -> Result<ExecutionResult> {
        let safety = SafetyGateChecker {
            metrics: &self.metrics,
            graph: &self.graph,
            records: &self.records,
            criticality_table: HashMap::from([(service.to_string(), CriticalityTier::Medium)]),
            thresholds: SafetyThresholds::default(),
        };

        let orchestrator = Orchestrator::new(
            &self.lock_manager,
            ConflictDetector::new(Default::default()),
            &self.graph,
            Some(safety),
            &self.audit,
            &self.notifier,
            OrchestratorConfig::default(),
        );

        let risk_inputs = RiskInputs {
            lines_changed: 8,
            test_failure_rate: 0.0,
            security_scan_failed: false,
            cve_count: 0,
            coverage_drop_pct: 0.0,
            lint_error_count: 0,
            build_failed: false,
        };

        let request = OperationRequest {
            kind: OperationKind::Deployment,
            service,
            actor: "demo-cli",
            correlation_id: None,
            expected_duration_secs: 120,
            risk: Some((&risk_inputs, "deadbeef")),
            cancel: None,
        };

        let result = orchestrator.execute_operation(request, || self.deploy_verify_and_maybe_rollback(service, image));
        Ok(result)
    }

    fn deploy_verify_and_maybe_rollback(&self, service: &str, image: &str) -> Result<()> {
        let health_gate =
            FixedBaselineHealthGate { evaluator: HealthGateEvaluator { backend: &self.metrics, thresholds: GateThresholds::default() } };
        let deploy_engine = DeploymentEngine {
            target: &self.target,
            health: &health_gate,
            audit: &self.audit,
            config: CanaryConfig {
                stages: self.config.canary.stages_pct.clone(),
                max_failures: self.config.canary.max_failures,
                wait_seconds: 0,
            },
        };

        let context = DeploymentContext {
            deployment_id: format!("demo-{service}-{image}"),
            incident_id: "demo-incident".to_string(),
            service: service.to_string(),
            image_tag: image.to_string(),
            commit_hash: "deadbeef".to_string(),
            safety_artifact_ref: "deadbeef".to_string(),
            canary_percentage: 0,
        };
        let mut record = DeploymentRecord::new(context);
        deploy_engine.run_canary(&mut record, "demo-corr")?;

        let verification_engine = VerificationEngine::new(VerificationConfig::default());
        let mut budget = VerificationBudget::default();
        let control: Vec<f64> = vec![100.0, 102.0, 98.0, 101.0, 99.0];
        let treatment: Vec<f64> =
            if self.inject_regression { vec![180.0, 175.0, 190.0, 182.0, 178.0] } else { vec![95.0, 93.0, 97.0, 94.0, 96.0] };
        let window = MetricWindow {
            metric: "p99_latency".to_string(),
            control,
            treatment,
            baseline: 100.0,
            treatment_series: vec![],
        };
        let verification: VerificationResult = verification_engine.verify(&[window], &mut budget);
        let _ = self.audit.log_verification(service, &format!("{:?}", verification.status), "demo-corr");

        if verification.status == controlplane_verify::VerificationStatus::Failed {
            self.run_rollback(service, image, &verification)?;
            anyhow::bail!("verification failed, rollback executed: {}", verification.decision_reasons.join("; "));
        }

        Ok(())
    }

    fn run_rollback(&self, service: &str, image: &str, verification: &VerificationResult) -> Result<()> {
        let coordinator = RollbackCoordinator::new(RollbackDecisionEngine::default(), &self.target, &self.audit);
        let alerts = vec![Alert {
            severity: AlertSeverity::Critical,
            kind: AlertKind::Application,
            message: "latency regression detected in canary".to_string(),
        }];
        coordinator.run(verification, service, image, "stable", 0.80, 25.0, None, &alerts, "demo-corr");
        Ok(())
    }
}
