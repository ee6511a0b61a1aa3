//! Rollback executor (spec §4.9b).
//!
//! Grounded in `examples/original_source/examples/rollback_orchestrator.py`'s
//! `RollbackOrchestrator`: a single executor dispatching on a strategy tag
//! rather than a strategy-specific subclass (spec §9 "data-driven, not
//! subclassed"), driving a [`DeploymentTarget`] instead of shelling out to
//! `kubectl` directly.

use std::time::Duration;

use crate::decision::RollbackStrategy;
use controlplane_types::DeploymentTarget;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RollbackError {
    #[error("deployment target error: {0}")]
    Target(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RollbackStatus {
    Success,
    Failed,
    Partial,
    InProgress,
}

/// The executable strategies (spec §4.9b). `RollbackStrategy::Instant`/
/// `Gradual`/`Partial` map onto these one-for-one; `Escalate` and `None`
/// never reach the executor. `Emergency` is not a [`RollbackStrategy`] the
/// decision engine picks on its own -- it's available for an operator or
/// the orchestrator to force after an `Instant` rollback times out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStrategy {
    Instant,
    Gradual,
    Emergency,
    Partial,
}

impl TryFrom<RollbackStrategy> for ExecutionStrategy {
    type Error = &'static str;

    fn try_from(strategy: RollbackStrategy) -> Result<Self, Self::Error> {
        match strategy {
            RollbackStrategy::Instant => Ok(ExecutionStrategy::Instant),
            RollbackStrategy::Gradual => Ok(ExecutionStrategy::Gradual),
            RollbackStrategy::Partial => Ok(ExecutionStrategy::Partial),
            RollbackStrategy::None | RollbackStrategy::Escalate => {
                Err("this strategy does not execute a rollback")
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackResult {
    pub status: RollbackStatus,
    pub strategy_used: String,
    pub rolled_back_from: String,
    pub rolled_back_to: String,
    pub service: String,
    pub steps_completed: Vec<String>,
    pub steps_failed: Vec<String>,
    pub health_check_passed: bool,
    pub pods_ready: u32,
    pub pods_total: u32,
}

pub struct RollbackExecutor<'a> {
    pub target: &'a dyn DeploymentTarget,
    pub rollout_timeout: Duration,
    /// Replica count assumed when a target reports zero (spec §4.9b
    /// "GRADUAL" step-down math needs a denominator even before the first
    /// scale call lands).
    pub default_replicas: u32,
}

impl<'a> RollbackExecutor<'a> {
    pub fn new(target: &'a dyn DeploymentTarget) -> Self {
        Self { target, rollout_timeout: Duration::from_secs(60), default_replicas: 4 }
    }

    /// Executes `strategy` against `service`, rolling it from
    /// `current_image` back to `previous_image`, then verifies the result
    /// by pod readiness (spec §4.9b "health check: ready_replicas >= 75%
    /// of total").
    pub fn execute(
        &self,
        service: &str,
        current_image: &str,
        previous_image: &str,
        strategy: ExecutionStrategy,
    ) -> RollbackResult {
        let mut steps_completed = Vec::new();
        let mut steps_failed = Vec::new();

        let outcome = match strategy {
            ExecutionStrategy::Instant => self.instant(service, previous_image, &mut steps_completed, &mut steps_failed),
            ExecutionStrategy::Gradual => self.gradual(service, previous_image, &mut steps_completed, &mut steps_failed),
            ExecutionStrategy::Emergency => self.emergency(service, previous_image, &mut steps_completed, &mut steps_failed),
            ExecutionStrategy::Partial => self.partial(service, previous_image, &mut steps_completed, &mut steps_failed),
        };

        if outcome.is_err() {
            return RollbackResult {
                status: RollbackStatus::Failed,
                strategy_used: format!("{strategy:?}"),
                rolled_back_from: current_image.to_string(),
                rolled_back_to: previous_image.to_string(),
                service: service.to_string(),
                steps_completed,
                steps_failed,
                health_check_passed: false,
                pods_ready: 0,
                pods_total: 0,
            };
        }

        let (health_check_passed, pods_ready, pods_total) = self.verify(service);
        let status = if health_check_passed { RollbackStatus::Success } else { RollbackStatus::Partial };

        RollbackResult {
            status,
            strategy_used: format!("{strategy:?}"),
            rolled_back_from: current_image.to_string(),
            rolled_back_to: previous_image.to_string(),
            service: service.to_string(),
            steps_completed,
            steps_failed,
            health_check_passed,
            pods_ready,
            pods_total,
        }
    }

    /// Single image swap plus a bounded wait for the rollout (spec §4.9b
    /// "INSTANT", target under 10 seconds). A rollout timeout is not fatal
    /// here; the post-execution health check is the real signal.
    fn instant(
        &self,
        service: &str,
        previous_image: &str,
        completed: &mut Vec<String>,
        failed: &mut Vec<String>,
    ) -> Result<(), RollbackError> {
        self.target.set_image(service, previous_image).map_err(|e| {
            failed.push(format!("failed to update image: {e}"));
            e
        })?;
        completed.push("updated image to previous version".to_string());

        match self.target.await_rollout(service, self.rollout_timeout) {
            Ok(true) => completed.push("rollout completed".to_string()),
            Ok(false) | Err(_) => completed.push("rollout initiated (may still be in progress)".to_string()),
        }
        Ok(())
    }

    /// Steps replica count down through `{75, 50, 25, 0}` percent of
    /// capacity before the image swap, then scales back up (spec §4.9b
    /// "GRADUAL", target 2-3 minutes). Mirrors the service-mesh traffic
    /// shift the original performs with replica ratios, same as
    /// `controlplane-deploy`'s canary stages.
    fn gradual(
        &self,
        service: &str,
        previous_image: &str,
        completed: &mut Vec<String>,
        failed: &mut Vec<String>,
    ) -> Result<(), RollbackError> {
        let (_, total) = self.target.ready_counts(service).unwrap_or((0, self.default_replicas));
        let total = if total == 0 { self.default_replicas } else { total };

        for stage_pct in [75u32, 50, 25, 0] {
            let replicas = ((total as u64 * stage_pct as u64 + 99) / 100).max(if stage_pct == 0 { 0 } else { 1 }) as u32;
            self.target.scale(service, replicas).map_err(|e| {
                failed.push(format!("failed to scale to {stage_pct}%: {e}"));
                e
            })?;
            completed.push(format!("scaled to {stage_pct}% ({replicas} replicas)"));
        }

        self.target.set_image(service, previous_image).map_err(|e| {
            failed.push(format!("failed to update image: {e}"));
            e
        })?;
        completed.push("updated to previous image".to_string());

        self.target.scale(service, total).map_err(|e| {
            failed.push(format!("failed to scale back: {e}"));
            e
        })?;
        completed.push("scaled back to full capacity".to_string());
        Ok(())
    }

    /// Force-restarts every pod, then sets the image and re-scales (spec
    /// §4.9b "EMERGENCY", target under 30 seconds). Pod deletion racing
    /// ahead of pods that are already gone is tolerated, matching the
    /// original's best-effort delete.
    fn emergency(
        &self,
        service: &str,
        previous_image: &str,
        completed: &mut Vec<String>,
        failed: &mut Vec<String>,
    ) -> Result<(), RollbackError> {
        self.target.set_image(service, previous_image).map_err(|e| {
            failed.push(format!("failed to update image: {e}"));
            e
        })?;
        completed.push("updated image".to_string());

        if let Err(e) = self.target.force_delete_pods(&format!("app={service}")) {
            completed.push(format!("pod deletion reported an error (ignored): {e}"));
        } else {
            completed.push("force deleted all pods".to_string());
        }

        let (_, total) = self.target.ready_counts(service).unwrap_or((0, self.default_replicas));
        let total = if total == 0 { self.default_replicas } else { total };
        self.target.scale(service, total).map_err(|e| {
            failed.push(format!("failed to scale: {e}"));
            e
        })?;
        completed.push("scaled deployment".to_string());
        Ok(())
    }

    /// Shifts half the traffic back to the previous version via the
    /// `{service}-canary` sibling while investigation continues (spec
    /// §4.9b "PARTIAL", keep 50% on the previous version).
    fn partial(
        &self,
        service: &str,
        previous_image: &str,
        completed: &mut Vec<String>,
        failed: &mut Vec<String>,
    ) -> Result<(), RollbackError> {
        let canary_service = format!("{service}-canary");
        let (_, total) = self.target.ready_counts(service).unwrap_or((0, self.default_replicas));
        let total = if total == 0 { self.default_replicas } else { total };
        let half = (total / 2).max(1);

        self.target.set_image(&canary_service, previous_image).map_err(|e| {
            failed.push(format!("failed to update canary image: {e}"));
            e
        })?;
        completed.push("rolled back the canary slice to the previous image".to_string());

        self.target.scale(&canary_service, half).map_err(|e| {
            failed.push(format!("failed to scale canary: {e}"));
            e
        })?;
        self.target.scale(service, total - half).map_err(|e| {
            failed.push(format!("failed to scale primary: {e}"));
            e
        })?;
        completed.push(format!("traffic split {half}/{} between previous and current image", total - half));
        Ok(())
    }

    /// Post-rollback health check: at least 75% of pods ready (spec §4.9b
    /// "health check").
    fn verify(&self, service: &str) -> (bool, u32, u32) {
        match self.target.ready_counts(service) {
            Ok((ready, total)) if total > 0 => (ready as f64 >= total as f64 * 0.75, ready, total),
            Ok((ready, total)) => (false, ready, total),
            Err(_) => (false, 0, 0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::sync::Mutex;
    use std::time::Duration as StdDuration;

    struct FakeTarget {
        images: Mutex<std::collections::HashMap<String, String>>,
        replicas: Mutex<std::collections::HashMap<String, u32>>,
        fail_set_image: bool,
    }

    impl FakeTarget {
        fn new(service: &str, replicas: u32) -> Self {
            let mut r = std::collections::HashMap::new();
            r.insert(service.to_string(), replicas);
            Self { images: Mutex::new(std::collections::HashMap::new()), replicas: Mutex::new(r), fail_set_image: false }
        }
    }

    impl DeploymentTarget for FakeTarget {
        fn set_image(&self, service: &str, image_tag: &str) -> Result<()> {
            if self.fail_set_image {
                anyhow::bail!("simulated failure");
            }
            self.images.lock().unwrap().insert(service.to_string(), image_tag.to_string());
            Ok(())
        }

        fn await_rollout(&self, _service: &str, _timeout: StdDuration) -> Result<bool> {
            Ok(true)
        }

        fn scale(&self, service: &str, replicas: u32) -> Result<()> {
            self.replicas.lock().unwrap().insert(service.to_string(), replicas);
            Ok(())
        }

        fn force_delete_pods(&self, _label_selector: &str) -> Result<()> {
            Ok(())
        }

        fn ready_counts(&self, service: &str) -> Result<(u32, u32)> {
            let total = *self.replicas.lock().unwrap().get(service).unwrap_or(&0);
            Ok((total, total))
        }
    }

    #[test]
    fn instant_rollback_sets_image_and_reports_success() {
        let target = FakeTarget::new("checkout", 4);
        let executor = RollbackExecutor::new(&target);
        let result = executor.execute("checkout", "v2", "v1", ExecutionStrategy::Instant);
        assert_eq!(result.status, RollbackStatus::Success);
        assert_eq!(target.images.lock().unwrap().get("checkout").unwrap(), "v1");
    }

    #[test]
    fn gradual_rollback_steps_down_then_restores_capacity() {
        let target = FakeTarget::new("checkout", 4);
        let executor = RollbackExecutor::new(&target);
        let result = executor.execute("checkout", "v2", "v1", ExecutionStrategy::Gradual);
        assert_eq!(result.status, RollbackStatus::Success);
        assert_eq!(*target.replicas.lock().unwrap().get("checkout").unwrap(), 4);
        assert!(result.steps_completed.iter().any(|s| s.contains("0%")));
    }

    #[test]
    fn partial_rollback_splits_traffic_with_canary_sibling() {
        let target = FakeTarget::new("checkout", 4);
        let executor = RollbackExecutor::new(&target);
        let result = executor.execute("checkout", "v2", "v1", ExecutionStrategy::Partial);
        assert_eq!(result.status, RollbackStatus::Success);
        assert_eq!(target.images.lock().unwrap().get("checkout-canary").unwrap(), "v1");
    }

    #[test]
    fn failed_image_update_is_reported_as_failed_with_no_health_check() {
        let mut target = FakeTarget::new("checkout", 4);
        target.fail_set_image = true;
        let executor = RollbackExecutor::new(&target);
        let result = executor.execute("checkout", "v2", "v1", ExecutionStrategy::Instant);
        assert_eq!(result.status, RollbackStatus::Failed);
        assert!(!result.steps_failed.is_empty());
    }

    #[test]
    fn execution_strategy_rejects_escalate_and_none() {
        assert!(ExecutionStrategy::try_from(RollbackStrategy::Escalate).is_err());
        assert!(ExecutionStrategy::try_from(RollbackStrategy::None).is_err());
        assert!(ExecutionStrategy::try_from(RollbackStrategy::Instant).is_ok());
    }
}
