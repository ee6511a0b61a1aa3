//! Rollback decision engine and executor (spec §4.9).
//!
//! [`decision`] decides whether, and how aggressively, to roll back a
//! deployment from a [`controlplane_verify::VerificationResult`];
//! [`executor`] carries out the chosen strategy against a
//! [`controlplane_types::DeploymentTarget`]. Kept as two modules because the
//! decision is pure (testable without any target) while the executor is
//! all side effects, mirroring the original's `RollbackDecisionEngine` /
//! `RollbackOrchestrator` split.

pub mod decision;
pub mod executor;

pub use decision::{
    Alert, AlertKind, AlertSeverity, DecisionThresholds, PreviousVersionHealth, RollbackDecision, RollbackDecisionEngine,
    RollbackStrategy, RollbackUrgency,
};
pub use executor::{ExecutionStrategy, RollbackError, RollbackExecutor, RollbackResult, RollbackStatus};

use controlplane_audit::AuditLog;
use controlplane_types::DeploymentTarget;

/// Runs the decision engine and, if it recommends a rollback, the executor,
/// logging both the decision and the execution outcome to the audit log
/// (spec §4.1 "every rollback is an audit event", §4.9 end-to-end flow).
pub struct RollbackCoordinator<'a> {
    pub decision_engine: RollbackDecisionEngine,
    pub target: &'a dyn DeploymentTarget,
    pub audit: &'a AuditLog,
}

impl<'a> RollbackCoordinator<'a> {
    pub fn new(decision_engine: RollbackDecisionEngine, target: &'a dyn DeploymentTarget, audit: &'a AuditLog) -> Self {
        Self { decision_engine, target, audit }
    }

    /// Decides and, if warranted, executes a rollback for `service` from
    /// `current_image` back to `previous_image`. Returns `(decision, None)`
    /// when the decision is `NONE` or `ESCALATE` (nothing executes), or
    /// `(decision, Some(result))` once the executor has run.
    #[allow(clippy::too_many_arguments)]
    pub fn run(
        &self,
        result: &controlplane_verify::VerificationResult,
        service: &str,
        current_image: &str,
        previous_image: &str,
        service_criticality: f64,
        blast_radius_pct: f64,
        previous_health: Option<&PreviousVersionHealth>,
        alerts: &[Alert],
        correlation_id: &str,
    ) -> (RollbackDecision, Option<RollbackResult>) {
        let decision =
            self.decision_engine.make_decision(result, service_criticality, blast_radius_pct, previous_health, alerts);

        let strategy = match ExecutionStrategy::try_from(decision.strategy) {
            Ok(strategy) => strategy,
            Err(_) => {
                let _ = self.audit.log_rollback(service, "none", decision.strategy == RollbackStrategy::None, correlation_id);
                return (decision, None);
            }
        };

        let executor = RollbackExecutor::new(self.target);
        let outcome = executor.execute(service, current_image, previous_image, strategy);
        let _ = self.audit.log_rollback(
            service,
            &format!("{strategy:?}").to_lowercase(),
            outcome.status == RollbackStatus::Success,
            correlation_id,
        );

        (decision, Some(outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use controlplane_verify::{VerificationResult, VerificationStatus};
    use std::time::Duration;

    struct NoopTarget;
    impl DeploymentTarget for NoopTarget {
        fn set_image(&self, _service: &str, _image_tag: &str) -> Result<()> {
            Ok(())
        }
        fn await_rollout(&self, _service: &str, _timeout: Duration) -> Result<bool> {
            Ok(true)
        }
        fn scale(&self, _service: &str, _replicas: u32) -> Result<()> {
            Ok(())
        }
        fn force_delete_pods(&self, _label_selector: &str) -> Result<()> {
            Ok(())
        }
        fn ready_counts(&self, _service: &str) -> Result<(u32, u32)> {
            Ok((4, 4))
        }
    }

    #[test]
    fn passed_verification_executes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let audit = AuditLog::new(dir.path()).unwrap();
        let target = NoopTarget;
        let coordinator = RollbackCoordinator::new(RollbackDecisionEngine::default(), &target, &audit);
        let result = VerificationResult {
            status: VerificationStatus::Passed,
            metric_verdicts: Vec::new(),
            overall_improvement_pct: 10.0,
            improved_ratio: 1.0,
            degraded_ratio: 0.0,
            decision_reasons: Vec::new(),
            top_signals: Vec::new(),
            confidence_score: 95.0,
        };
        let (decision, outcome) = coordinator.run(&result, "checkout", "v2", "v1", 0.8, 100.0, None, &[], "corr-1");
        assert!(!decision.should_rollback);
        assert!(outcome.is_none());
    }

    #[test]
    fn failed_verification_executes_and_audits_a_rollback() {
        let dir = tempfile::tempdir().unwrap();
        let audit = AuditLog::new(dir.path()).unwrap();
        let target = NoopTarget;
        let coordinator = RollbackCoordinator::new(RollbackDecisionEngine::default(), &target, &audit);
        let result = VerificationResult {
            status: VerificationStatus::Failed,
            metric_verdicts: Vec::new(),
            overall_improvement_pct: -20.0,
            improved_ratio: 0.0,
            degraded_ratio: 1.0,
            decision_reasons: Vec::new(),
            top_signals: Vec::new(),
            confidence_score: 95.0,
        };
        let (decision, outcome) = coordinator.run(&result, "checkout", "v2", "v1", 0.5, 100.0, None, &[], "corr-2");
        assert!(decision.should_rollback);
        let outcome = outcome.expect("rollback should execute");
        assert_eq!(outcome.status, RollbackStatus::Success);
    }
}
