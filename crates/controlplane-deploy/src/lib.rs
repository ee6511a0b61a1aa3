//! Progressive deployment engine (spec §4.6).
//!
//! Drives a [`DeploymentContext`] through [`DeploymentState`]'s transition
//! table (already encoded in `controlplane_types::deployment`) and runs the
//! canary protocol: apply a traffic split, wait for metric warm-up, evaluate
//! health gates, and either advance to the next stage, retry, or hand off to
//! rollback.
//!
//! Canary traffic splitting (spec §9 Open Question 2) is implemented via
//! replica-count ratios between two deployments -- the running service and a
//! `{service}-canary` sibling -- rather than a service-mesh traffic split,
//! since [`DeploymentTarget`] exposes per-deployment replica counts, not mesh
//! routing rules.

use std::thread;
use std::time::Duration as StdDuration;

use chrono::Utc;
use controlplane_audit::AuditLog;
use controlplane_types::deployment::{DeploymentContext, DeploymentState, StateTransitionRecord};
use controlplane_types::{DeploymentTarget, GateStatus};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("invalid transition from {from:?} to {to:?}")]
    InvalidTransition { from: DeploymentState, to: DeploymentState },
    #[error("deployment target error: {0}")]
    Target(#[from] anyhow::Error),
}

/// Per-service health gate evaluation, implemented atop `controlplane-metrics`'s
/// `HealthGateEvaluator`. Kept as a small capability trait here (rather than a
/// direct dependency on `controlplane-metrics`) so this crate stays decoupled
/// from the metrics backend, per spec §9's capability-interface guidance.
pub trait CanaryHealthGate: Send + Sync {
    fn evaluate(&self, service: &str, version: &str) -> anyhow::Result<GateStatus>;
}

#[derive(Debug, Clone)]
pub struct CanaryConfig {
    pub stages: Vec<u8>,
    pub max_failures: u32,
    pub wait_seconds: u64,
}

impl Default for CanaryConfig {
    fn default() -> Self {
        Self { stages: vec![5, 25, 50, 100], max_failures: 1, wait_seconds: 60 }
    }
}

/// Persisted record for one deployment: the immutable context plus its full
/// transition history (spec §6 "one JSON document per deployment_id").
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DeploymentRecord {
    pub context: DeploymentContext,
    pub state: DeploymentState,
    pub history: Vec<StateTransitionRecord>,
    pub failure_count: u32,
}

impl DeploymentRecord {
    pub fn new(context: DeploymentContext) -> Self {
        Self { context, state: DeploymentState::Init, history: Vec::new(), failure_count: 0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanaryOutcome {
    Promoted,
    RollingBack,
    Failed,
}

pub struct DeploymentEngine<'a> {
    pub target: &'a dyn DeploymentTarget,
    pub health: &'a dyn CanaryHealthGate,
    pub audit: &'a AuditLog,
    pub config: CanaryConfig,
}

/// Renders a `DeploymentState` the way its `SCREAMING_SNAKE_CASE` serde form
/// does, for audit-event labeling.
fn state_label(state: DeploymentState) -> String {
    serde_json::to_value(state)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| format!("{state:?}"))
}

impl<'a> DeploymentEngine<'a> {
    fn canary_service(service: &str) -> String {
        format!("{service}-canary")
    }

    /// Moves `record` to `next`, rejecting the move if it isn't in
    /// `record.state.allowed_next()`, and recording an audit event + history
    /// entry on success (spec §4.6 "every transition writes an audit event").
    pub fn transition(
        &self,
        record: &mut DeploymentRecord,
        next: DeploymentState,
        reason: &str,
        correlation_id: &str,
    ) -> Result<(), TransitionError> {
        if !record.state.can_transition_to(next) {
            return Err(TransitionError::InvalidTransition { from: record.state, to: next });
        }
        let _ = self.audit.log_state_transition(
            &record.context.deployment_id,
            &state_label(record.state),
            &state_label(next),
            correlation_id,
        );
        record.history.push(StateTransitionRecord {
            from_state: record.state,
            to_state: next,
            reason: reason.to_string(),
            timestamp: Utc::now(),
            metadata: serde_json::json!({}),
        });
        record.state = next;
        Ok(())
    }

    /// Drives one stage: applies the replica split, waits for warm-up, then
    /// evaluates health gates. Returns whether the stage passed.
    fn run_stage(&self, record: &mut DeploymentRecord, stage_pct: u8, correlation_id: &str) -> Result<bool, TransitionError> {
        self.transition(record, DeploymentState::Canary, &format!("stage {stage_pct}%"), correlation_id)?;

        let service = &record.context.service;
        let canary_service = Self::canary_service(service);
        let (_, total) = self.target.ready_counts(service)?;
        let total = total.max(1);
        let canary_replicas = ((total as u64 * stage_pct as u64 + 99) / 100) as u32;
        let baseline_replicas = total.saturating_sub(canary_replicas);
        self.target.set_image(&canary_service, &record.context.image_tag)?;
        self.target.scale(&canary_service, canary_replicas)?;
        self.target.scale(service, baseline_replicas)?;
        record.context.canary_percentage = stage_pct;

        self.transition(record, DeploymentState::CanaryWaiting, "metric warm-up", correlation_id)?;
        if self.config.wait_seconds > 0 {
            thread::sleep(StdDuration::from_secs(self.config.wait_seconds));
        }

        self.transition(record, DeploymentState::CanaryEvaluating, "evaluating health gates", correlation_id)?;
        let status = self.health.evaluate(&canary_service, &record.context.image_tag)?;
        Ok(status.is_passed())
    }

    /// Runs the full canary protocol (spec §4.6). With an empty stage list,
    /// transitions DEPLOYING straight to PROMOTED (spec §8 boundary case).
    pub fn run_canary(&self, record: &mut DeploymentRecord, correlation_id: &str) -> Result<CanaryOutcome, TransitionError> {
        self.transition(record, DeploymentState::Building, "build starting", correlation_id)?;
        self.transition(record, DeploymentState::Deploying, "starting rollout", correlation_id)?;

        if self.config.stages.is_empty() {
            self.transition(record, DeploymentState::Promoted, "empty canary stage list", correlation_id)?;
            return Ok(CanaryOutcome::Promoted);
        }

        let mut stage_idx = 0usize;
        loop {
            let stage_pct = self.config.stages[stage_idx];
            let passed = self.run_stage(record, stage_pct, correlation_id)?;

            if passed {
                stage_idx += 1;
                if stage_idx >= self.config.stages.len() {
                    self.transition(record, DeploymentState::Promoting, "all stages passed", correlation_id)?;
                    self.transition(record, DeploymentState::Promoted, "promotion complete", correlation_id)?;
                    return Ok(CanaryOutcome::Promoted);
                }
                // Loop continues at the next stage, re-entering CANARY.
            } else {
                record.failure_count += 1;
                if record.failure_count >= self.config.max_failures {
                    self.transition(record, DeploymentState::RollingBack, "health gate failed", correlation_id)?;
                    return Ok(CanaryOutcome::RollingBack);
                }
                // Retry the same stage: CANARY_EVALUATING -> CANARY is allowed.
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use controlplane_types::GateStatus;
    use std::sync::Mutex;

    struct FakeTarget {
        replicas: Mutex<std::collections::HashMap<String, u32>>,
    }

    impl FakeTarget {
        fn new(initial_total: u32) -> Self {
            let mut m = std::collections::HashMap::new();
            m.insert("order-service".to_string(), initial_total);
            Self { replicas: Mutex::new(m) }
        }
    }

    impl DeploymentTarget for FakeTarget {
        fn set_image(&self, _service: &str, _image_tag: &str) -> anyhow::Result<()> {
            Ok(())
        }
        fn await_rollout(&self, _service: &str, _timeout: StdDuration) -> anyhow::Result<bool> {
            Ok(true)
        }
        fn scale(&self, service: &str, replicas: u32) -> anyhow::Result<()> {
            self.replicas.lock().unwrap().insert(service.to_string(), replicas);
            Ok(())
        }
        fn force_delete_pods(&self, _label_selector: &str) -> anyhow::Result<()> {
            Ok(())
        }
        fn ready_counts(&self, service: &str) -> anyhow::Result<(u32, u32)> {
            let total = *self.replicas.lock().unwrap().get(service).unwrap_or(&10);
            Ok((total, total))
        }
    }

    struct AlwaysPass;
    impl CanaryHealthGate for AlwaysPass {
        fn evaluate(&self, _service: &str, _version: &str) -> anyhow::Result<GateStatus> {
            Ok(GateStatus::Passed)
        }
    }

    struct AlwaysFail;
    impl CanaryHealthGate for AlwaysFail {
        fn evaluate(&self, _service: &str, _version: &str) -> anyhow::Result<GateStatus> {
            Ok(GateStatus::Failed { detail: "error rate over threshold".to_string() })
        }
    }

    fn context() -> DeploymentContext {
        DeploymentContext {
            deployment_id: "DEP-1".to_string(),
            incident_id: "INC-1".to_string(),
            service: "order-service".to_string(),
            image_tag: "v2".to_string(),
            commit_hash: "abc123".to_string(),
            safety_artifact_ref: "artifact-1".to_string(),
            canary_percentage: 0,
        }
    }

    #[test]
    fn happy_path_canary_promotes() {
        let dir = tempfile::tempdir().unwrap();
        let audit = AuditLog::new(dir.path()).unwrap();
        let target = FakeTarget::new(20);
        let health = AlwaysPass;
        let engine = DeploymentEngine {
            target: &target,
            health: &health,
            audit: &audit,
            config: CanaryConfig { stages: vec![5, 25, 50, 100], max_failures: 1, wait_seconds: 0 },
        };
        let mut record = DeploymentRecord::new(context());
        let outcome = engine.run_canary(&mut record, "corr-1").unwrap();
        assert_eq!(outcome, CanaryOutcome::Promoted);
        assert_eq!(record.state, DeploymentState::Promoted);
        assert!(record.state.is_terminal() == false);
    }

    #[test]
    fn failing_gate_triggers_rollback_after_max_failures() {
        let dir = tempfile::tempdir().unwrap();
        let audit = AuditLog::new(dir.path()).unwrap();
        let target = FakeTarget::new(20);
        let health = AlwaysFail;
        let engine = DeploymentEngine {
            target: &target,
            health: &health,
            audit: &audit,
            config: CanaryConfig { stages: vec![5, 25, 50, 100], max_failures: 1, wait_seconds: 0 },
        };
        let mut record = DeploymentRecord::new(context());
        let outcome = engine.run_canary(&mut record, "corr-1").unwrap();
        assert_eq!(outcome, CanaryOutcome::RollingBack);
        assert_eq!(record.state, DeploymentState::RollingBack);
    }

    #[test]
    fn empty_stage_list_goes_straight_to_promoted() {
        let dir = tempfile::tempdir().unwrap();
        let audit = AuditLog::new(dir.path()).unwrap();
        let target = FakeTarget::new(20);
        let health = AlwaysPass;
        let engine = DeploymentEngine {
            target: &target,
            health: &health,
            audit: &audit,
            config: CanaryConfig { stages: vec![], max_failures: 1, wait_seconds: 0 },
        };
        let mut record = DeploymentRecord::new(context());
        let outcome = engine.run_canary(&mut record, "corr-1").unwrap();
        assert_eq!(outcome, CanaryOutcome::Promoted);
        assert_eq!(record.state, DeploymentState::Promoted);
    }

    #[test]
    fn invalid_transition_is_rejected_and_leaves_state_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let audit = AuditLog::new(dir.path()).unwrap();
        let target = FakeTarget::new(20);
        let health = AlwaysPass;
        let engine = DeploymentEngine {
            target: &target,
            health: &health,
            audit: &audit,
            config: CanaryConfig::default(),
        };
        let mut record = DeploymentRecord::new(context());
        let err = engine.transition(&mut record, DeploymentState::Verified, "skip ahead", "corr-1").unwrap_err();
        assert!(matches!(err, TransitionError::InvalidTransition { .. }));
        assert_eq!(record.state, DeploymentState::Init);
    }

    #[test]
    fn every_transition_is_recorded_exactly_once_in_history() {
        let dir = tempfile::tempdir().unwrap();
        let audit = AuditLog::new(dir.path()).unwrap();
        let target = FakeTarget::new(20);
        let health = AlwaysFail;
        let engine = DeploymentEngine {
            target: &target,
            health: &health,
            audit: &audit,
            config: CanaryConfig { stages: vec![25], max_failures: 1, wait_seconds: 0 },
        };
        let mut record = DeploymentRecord::new(context());
        engine.run_canary(&mut record, "corr-1").unwrap();
        // BUILDING, DEPLOYING, CANARY, CANARY_WAITING, CANARY_EVALUATING, ROLLING_BACK
        assert_eq!(record.history.len(), 6);
    }
}
