//! Concurrency orchestrator (spec §4.10): the single entry point that
//! wraps every write operation (deployment, rollback, verification, ...)
//! in conflict detection, scope-ordered locking, and safety-gate checks,
//! with every step written to the audit log.
//!
//! Grounded in `examples/original_source/examples/concurrency_orchestrator.py`'s
//! `ConcurrencyOrchestrator.execute_operation`: the ten-step workflow
//! (register -> detect conflicts -> acquire lock -> check safety gates ->
//! execute -> release lock) reproduced here as [`Orchestrator::execute_operation`].
//! The domain-specific work (the actual deploy/verify/rollback call) is
//! supplied by the caller as a closure rather than re-implemented here --
//! `controlplane-deploy`, `controlplane-verify`, and `controlplane-rollback`
//! already perform their own state transitions and audit logging, so this
//! crate only adds the concurrency-control envelope around them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::Utc;
use controlplane_audit::AuditLog;
use controlplane_conflict::{ConflictDetector, Recommendation};
use controlplane_depgraph::DependencyGraph;
use controlplane_lock::LockManager;
use controlplane_safety::{RiskInputs, SafetyGateChecker};
use controlplane_types::capability::{Channel, NotifierSink, Severity as NotifySeverity};
use controlplane_types::{ConcurrencyState, ExecutionResult, LockScope, Operation, OperationKind, OperationResult};

/// Maps an operation kind to the lock scope it acquires (spec §4.10
/// `_get_lock_scope`): deployments and rollbacks take a per-service lock,
/// verification takes an incident-scoped lock (multiple services can be
/// verified under one incident without contending on SERVICE), everything
/// else defaults to SERVICE.
fn lock_scope_for(kind: OperationKind) -> LockScope {
    match kind {
        OperationKind::Deployment | OperationKind::Rollback => LockScope::Service,
        OperationKind::Verification => LockScope::Incident,
        _ => LockScope::Service,
    }
}

fn generate_id(prefix: &str) -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().subsec_nanos();
    format!("{prefix}-{}-{:08x}", Utc::now().timestamp_millis(), nanos ^ std::process::id())
}

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    pub lock_ttl: chrono::Duration,
    pub lock_wait_timeout: Duration,
    pub operation_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            lock_ttl: chrono::Duration::seconds(300),
            lock_wait_timeout: Duration::from_secs(30),
            operation_timeout: Duration::from_secs(600),
        }
    }
}

/// Everything a write operation needs evaluated before it runs: the
/// proposed operation kind/service, who's asking, and -- for write
/// operations whose safety gates matter -- the risk inputs and the commit
/// whose safety artifact should be checked. Read-only operations
/// (verification) can omit `risk` and skip the safety-gate step.
pub struct OperationRequest<'a> {
    pub kind: OperationKind,
    pub service: &'a str,
    pub actor: &'a str,
    pub correlation_id: Option<String>,
    pub expected_duration_secs: u64,
    pub risk: Option<(&'a RiskInputs, &'a str)>,
    /// External cancellation signal (spec §5 "Cancellation"). Checked between
    /// every step of the workflow; set it from another thread to abort a
    /// pending operation. `None` means the operation cannot be cancelled
    /// externally. The caller's `body` closure is opaque to the orchestrator
    /// and is not itself preempted -- only the envelope steps around it are,
    /// matching §5's suspension points (lock wait, canary/verify sleeps),
    /// which are polled rather than preemptible.
    pub cancel: Option<&'a AtomicBool>,
}

/// Why `run_guarded`/`run_under_lock` aborted early without running or
/// finishing `body`.
enum Abort {
    Cancelled,
    TimedOut,
}

impl Abort {
    fn cause(&self) -> &'static str {
        match self {
            Abort::Cancelled => "cancelled",
            Abort::TimedOut => "operation_timeout",
        }
    }
}

/// Composes the concurrency-control stack (spec §4.10). All components are
/// borrowed, matching the teacher's preference for composing behavior over
/// owning it -- the orchestrator outlives no single call.
pub struct Orchestrator<'a> {
    pub lock_manager: &'a LockManager,
    pub conflict_detector: Mutex<ConflictDetector>,
    pub graph: &'a DependencyGraph,
    pub safety: Option<SafetyGateChecker<'a>>,
    pub audit: &'a AuditLog,
    pub notifier: &'a dyn NotifierSink,
    pub config: OrchestratorConfig,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        lock_manager: &'a LockManager,
        conflict_detector: ConflictDetector,
        graph: &'a DependencyGraph,
        safety: Option<SafetyGateChecker<'a>>,
        audit: &'a AuditLog,
        notifier: &'a dyn NotifierSink,
        config: OrchestratorConfig,
    ) -> Self {
        Self { lock_manager, conflict_detector: Mutex::new(conflict_detector), graph, safety, audit, notifier, config }
    }

    /// Runs `body` under the full concurrency-control envelope (spec
    /// §4.10): register with the conflict detector, check for conflicts,
    /// acquire a scope-ordered lock, check safety gates, run `body`, then
    /// release the lock and unregister regardless of outcome. `body`
    /// returns `Ok(())` on success; any `Err` is recorded as
    /// `OperationResult::Failed` with the error's message.
    pub fn execute_operation(
        &self,
        request: OperationRequest<'_>,
        body: impl FnOnce() -> anyhow::Result<()>,
    ) -> ExecutionResult {
        let operation_id = generate_id("op");
        let correlation_id = request.correlation_id.clone().unwrap_or_else(|| generate_id("corr"));
        let started = Instant::now();
        let mut result = ExecutionResult::new(operation_id.clone(), request.service.to_string(), correlation_id.clone());

        let op = Operation::new(
            operation_id.clone(),
            request.kind,
            request.service.to_string(),
            request.actor.to_string(),
            request.expected_duration_secs,
        );
        {
            let mut detector = self.conflict_detector.lock().expect("conflict detector mutex poisoned");
            detector.register_operation(op);
        }
        result.audit_events.push("operation_registered".to_string());

        let outcome = self.run_guarded(&request, &operation_id, &correlation_id, started, &mut result, body);

        {
            let mut detector = self.conflict_detector.lock().expect("conflict detector mutex poisoned");
            detector.unregister_operation(&operation_id);
        }
        result.duration_seconds = started.elapsed().as_secs_f64();
        result.result = outcome;
        result
    }

    /// Checks the external cancellation flag and the total-operation
    /// timeout (spec §5 "Timeouts": "Exceeding the total operation timeout
    /// aborts with FAILED"). Called at every step boundary since `body` runs
    /// synchronously and cannot be preempted mid-flight.
    fn check_abort(&self, request: &OperationRequest<'_>, started: Instant) -> Option<Abort> {
        if request.cancel.map(|flag| flag.load(Ordering::SeqCst)).unwrap_or(false) {
            return Some(Abort::Cancelled);
        }
        if started.elapsed() >= self.config.operation_timeout {
            return Some(Abort::TimedOut);
        }
        None
    }

    fn record_abort(&self, request: &OperationRequest<'_>, correlation_id: &str, result: &mut ExecutionResult, abort: Abort) -> OperationResult {
        let cause = abort.cause();
        result.error = Some(format!("operation aborted: cause={cause}"));
        result.state_transitions.push(format!("FAILED (cause={cause})"));
        let _ = self.audit.log_operation_aborted(request.service, cause, request.actor, correlation_id);
        result.audit_events.push("operation_aborted".to_string());
        OperationResult::Failed
    }

    fn run_guarded(
        &self,
        request: &OperationRequest<'_>,
        operation_id: &str,
        correlation_id: &str,
        started: Instant,
        result: &mut ExecutionResult,
        body: impl FnOnce() -> anyhow::Result<()>,
    ) -> OperationResult {
        if let Some(abort) = self.check_abort(request, started) {
            return self.record_abort(request, correlation_id, result, abort);
        }

        // Step 1: conflict detection against the dependency graph.
        let conflict = {
            let detector = self.conflict_detector.lock().expect("conflict detector mutex poisoned");
            detector.detect(self.graph, request.kind, request.service, Utc::now())
        };

        if conflict.has_conflict {
            result.conflicts_detected = conflict
                .conflicts
                .iter()
                .map(|c| format!("{:?} with {} ({:?})", c.conflict_type, c.service, c.kind))
                .collect();
            let _ = self.audit.log_conflict_detected(
                request.service,
                &format!("{:?}", conflict.severity),
                &format!("{:?}", conflict.recommendation),
                correlation_id,
            );
            result.audit_events.push("conflict_detected".to_string());

            match conflict.recommendation {
                Recommendation::Block => {
                    let _ = self.notifier.send(
                        &format!("conflict blocked: {}", request.service),
                        &format!("{:?} conflict, blast radius {}", conflict.severity, conflict.blast_radius),
                        NotifySeverity::Warning,
                        None,
                        None,
                    );
                    result.state_transitions.push("FAILED (conflict)".to_string());
                    return OperationResult::BlockedByConflict;
                }
                Recommendation::Warn => {
                    let reason = format!(
                        "{:?} conflict affecting {} service(s)",
                        conflict.severity, conflict.blast_radius
                    );
                    let _ = self.audit.log_manual_intervention(request.service, &reason, request.actor, correlation_id);
                    result.audit_events.push("manual_intervention_requested".to_string());
                    let _ = self.notifier.send(
                        &format!("human review required: {}", request.service),
                        &reason,
                        NotifySeverity::Warning,
                        Some(&[Channel::Slack, Channel::Email]),
                        None,
                    );
                    result.state_transitions.push("PAUSED_FOR_HUMAN_REVIEW (conflict)".to_string());
                    result.paused = true;
                    result.pause_reason = Some(reason);
                    return OperationResult::PausedForReview;
                }
                Recommendation::Proceed => {}
            }
        }

        if let Some(abort) = self.check_abort(request, started) {
            return self.record_abort(request, correlation_id, result, abort);
        }

        // Step 2: scope-ordered lock acquisition.
        result.state_transitions.push(state_label(ConcurrencyState::Locked));
        let scope = lock_scope_for(request.kind);
        let lock = match self.lock_manager.acquire(
            scope,
            request.service,
            operation_id,
            self.config.lock_ttl,
            Some(self.config.lock_wait_timeout),
            correlation_id,
        ) {
            Ok(lock) => lock,
            Err(e) => {
                let _ = self.notifier.send(
                    &format!("lock acquisition failed: {}", request.service),
                    &e.to_string(),
                    NotifySeverity::Error,
                    None,
                    None,
                );
                result.state_transitions.push("FAILED (lock timeout)".to_string());
                return OperationResult::Timeout;
            }
        };
        result.lock_acquired = true;
        result.audit_events.push("lock_acquired".to_string());

        let outcome = self.run_under_lock(request, correlation_id, started, result, body);

        let _ = self.lock_manager.release(scope, request.service, operation_id, correlation_id);
        result.audit_events.push("lock_released".to_string());
        let _ = lock;

        outcome
    }

    fn run_under_lock(
        &self,
        request: &OperationRequest<'_>,
        correlation_id: &str,
        started: Instant,
        result: &mut ExecutionResult,
        body: impl FnOnce() -> anyhow::Result<()>,
    ) -> OperationResult {
        if let Some(abort) = self.check_abort(request, started) {
            return self.record_abort(request, correlation_id, result, abort);
        }

        // Step 3: safety gates, only for write operations that supplied risk inputs.
        result.state_transitions.push(state_label(ConcurrencyState::SafetyCheck));
        if request.kind.is_write() {
            if let (Some(safety), Some((risk_inputs, commit_hash))) = (&self.safety, request.risk) {
                let check = safety.run_all_checks(request.service, commit_hash, risk_inputs, Utc::now());
                let _ = self.audit.log_safety_gate_result(request.service, "all", check.overall_passed, correlation_id);
                if !check.overall_passed {
                    let failed: Vec<String> =
                        check.gates.iter().filter(|g| !g.passed).map(|g| format!("{}: {}", g.name, g.reason)).collect();
                    result.audit_events.push("safety_gates_failed".to_string());
                    let reason = format!("safety gates failed: {}", failed.join("; "));
                    let _ = self.notifier.send(
                        &format!("safety gates failed: {}", request.service),
                        &reason,
                        NotifySeverity::Error,
                        Some(&[Channel::Slack, Channel::Pagerduty]),
                        None,
                    );
                    result.state_transitions.push("PAUSED_FOR_HUMAN_REVIEW (safety gates)".to_string());
                    result.paused = true;
                    result.pause_reason = Some(reason);
                    return OperationResult::BlockedBySafetyGate;
                }
                result.audit_events.push("safety_gates_passed".to_string());
            }
        }
        result.safety_gates_passed = true;

        if let Some(abort) = self.check_abort(request, started) {
            return self.record_abort(request, correlation_id, result, abort);
        }

        // Step 4: execute the caller's operation body.
        result.state_transitions.push(state_label(ConcurrencyState::InProgress));
        match body() {
            Ok(()) => {
                result.state_transitions.push(state_label(ConcurrencyState::Completed));
                result.audit_events.push(format!("{:?}_success", request.kind).to_lowercase());
                let _ = self.notifier.send(
                    &format!("{:?} succeeded: {}", request.kind, request.service),
                    &format!("{:?} completed successfully", request.kind),
                    NotifySeverity::Info,
                    None,
                    None,
                );
                OperationResult::Success
            }
            Err(e) => {
                result.state_transitions.push("FAILED (operation)".to_string());
                result.error = Some(e.to_string());
                result.audit_events.push(format!("{:?}_failed", request.kind).to_lowercase());
                let _ = self.notifier.send(
                    &format!("{:?} failed: {}", request.kind, request.service),
                    &e.to_string(),
                    NotifySeverity::Error,
                    Some(&[Channel::Slack, Channel::Email]),
                    None,
                );
                OperationResult::Failed
            }
        }
    }
}

fn state_label(state: ConcurrencyState) -> String {
    serde_json::to_value(state).ok().and_then(|v| v.as_str().map(str::to_string)).unwrap_or_else(|| format!("{state:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use controlplane_conflict::ResourceGroups;
    use controlplane_lock::{CentralLockStore, LockManager};
    use controlplane_safety::{CriticalityTier, SafetyArtifact, SafetyGateChecker, SafetyRecords, SafetyThresholds};
    use controlplane_types::capability::{DeliveryStatus, MetricBackend, Severity};
    use controlplane_types::OperationKind;
    use std::collections::{HashMap, HashSet};
    use std::time::Duration as StdDuration;

    struct FakeNotifier;
    impl NotifierSink for FakeNotifier {
        fn send(
            &self,
            _title: &str,
            _message: &str,
            _severity: Severity,
            _channels: Option<&[Channel]>,
            _metadata: Option<serde_json::Value>,
        ) -> anyhow::Result<DeliveryStatus> {
            Ok(DeliveryStatus { delivered: true, detail: None })
        }
    }

    struct FakeMetrics;
    impl MetricBackend for FakeMetrics {
        fn instant(&self, _query: &str) -> anyhow::Result<f64> {
            Ok(0.0)
        }
        fn range(
            &self,
            _query: &str,
            _start: chrono::DateTime<Utc>,
            _end: chrono::DateTime<Utc>,
            _step: StdDuration,
        ) -> anyhow::Result<Vec<(chrono::DateTime<Utc>, f64)>> {
            Ok(Vec::new())
        }
    }

    struct FakeRecords {
        artifact: Option<SafetyArtifact>,
    }
    impl SafetyRecords for FakeRecords {
        fn artifact_for_commit(&self, _commit_hash: &str) -> Option<SafetyArtifact> {
            self.artifact.clone()
        }
        fn last_deploy(&self, _service: &str) -> Option<chrono::DateTime<Utc>> {
            None
        }
    }

    fn harness(dir: &tempfile::TempDir) -> (LockManager, AuditLog, DependencyGraph) {
        let lock_manager = LockManager::new(Box::new(CentralLockStore::new()));
        let audit = AuditLog::new(dir.path()).unwrap();
        let graph = DependencyGraph::new();
        (lock_manager, audit, graph)
    }

    #[test]
    fn successful_operation_runs_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        let (lock_manager, audit, graph) = harness(&dir);
        let notifier = FakeNotifier;
        let orchestrator = Orchestrator::new(
            &lock_manager,
            ConflictDetector::new(ResourceGroups::default()),
            &graph,
            None,
            &audit,
            &notifier,
            OrchestratorConfig::default(),
        );

        let request = OperationRequest {
            kind: OperationKind::Verification,
            service: "checkout",
            actor: "ci-bot",
            correlation_id: None,
            expected_duration_secs: 30,
            risk: None,
            cancel: None,
        };
        let result = orchestrator.execute_operation(request, || Ok(()));

        assert_eq!(result.result, OperationResult::Success);
        assert!(result.lock_acquired);
        assert!(result.safety_gates_passed);
        assert!(result.error.is_none());
    }

    #[test]
    fn direct_write_write_conflict_is_blocked() {
        let dir = tempfile::tempdir().unwrap();
        let (lock_manager, audit, graph) = harness(&dir);
        let notifier = FakeNotifier;
        let orchestrator = Orchestrator::new(
            &lock_manager,
            ConflictDetector::new(ResourceGroups::default()),
            &graph,
            None,
            &audit,
            &notifier,
            OrchestratorConfig::default(),
        );

        {
            let mut detector = orchestrator.conflict_detector.lock().unwrap();
            detector.register_operation(Operation::new(
                "already-running",
                OperationKind::Deployment,
                "checkout",
                "other-actor",
                60,
            ));
        }

        let request = OperationRequest {
            kind: OperationKind::Deployment,
            service: "checkout",
            actor: "ci-bot",
            correlation_id: None,
            expected_duration_secs: 30,
            risk: None,
            cancel: None,
        };
        let result = orchestrator.execute_operation(request, || Ok(()));

        assert_eq!(result.result, OperationResult::BlockedByConflict);
        assert!(!result.lock_acquired);
        assert!(!result.conflicts_detected.is_empty());
    }

    #[test]
    fn shared_resource_conflict_pauses_for_review() {
        let dir = tempfile::tempdir().unwrap();
        let (lock_manager, audit, graph) = harness(&dir);
        let notifier = FakeNotifier;
        let mut groups: ResourceGroups = HashMap::new();
        groups.insert("db-cluster".to_string(), HashSet::from(["checkout".to_string(), "payments".to_string()]));
        let orchestrator = Orchestrator::new(
            &lock_manager,
            ConflictDetector::new(groups),
            &graph,
            None,
            &audit,
            &notifier,
            OrchestratorConfig::default(),
        );

        {
            let mut detector = orchestrator.conflict_detector.lock().unwrap();
            detector.register_operation(Operation::new("already-running", OperationKind::Deployment, "payments", "other-actor", 60));
        }

        let request = OperationRequest {
            kind: OperationKind::Deployment,
            service: "checkout",
            actor: "ci-bot",
            correlation_id: None,
            expected_duration_secs: 30,
            risk: None,
            cancel: None,
        };
        let result = orchestrator.execute_operation(request, || Ok(()));

        assert_eq!(result.result, OperationResult::PausedForReview);
        assert!(result.paused);
        assert!(!result.lock_acquired);
    }

    #[test]
    fn held_lock_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let (lock_manager, audit, graph) = harness(&dir);
        let notifier = FakeNotifier;
        let config = OrchestratorConfig { lock_wait_timeout: StdDuration::from_millis(50), ..OrchestratorConfig::default() };
        let orchestrator = Orchestrator::new(
            &lock_manager,
            ConflictDetector::new(ResourceGroups::default()),
            &graph,
            None,
            &audit,
            &notifier,
            config,
        );

        lock_manager
            .acquire(LockScope::Service, "checkout", "holder", chrono::Duration::seconds(300), None, "corr-held")
            .expect("pre-held lock should acquire");

        let request = OperationRequest {
            kind: OperationKind::Deployment,
            service: "checkout",
            actor: "ci-bot",
            correlation_id: None,
            expected_duration_secs: 30,
            risk: None,
            cancel: None,
        };
        let result = orchestrator.execute_operation(request, || Ok(()));

        assert_eq!(result.result, OperationResult::Timeout);
        assert!(!result.lock_acquired);
    }

    #[test]
    fn missing_safety_artifact_blocks_on_safety_gate() {
        let dir = tempfile::tempdir().unwrap();
        let (lock_manager, audit, graph) = harness(&dir);
        let notifier = FakeNotifier;
        let metrics = FakeMetrics;
        let records = FakeRecords { artifact: None };
        let safety = SafetyGateChecker {
            metrics: &metrics,
            graph: &graph,
            records: &records,
            criticality_table: HashMap::from([("checkout".to_string(), CriticalityTier::Medium)]),
            thresholds: SafetyThresholds::default(),
        };
        let orchestrator = Orchestrator::new(
            &lock_manager,
            ConflictDetector::new(ResourceGroups::default()),
            &graph,
            Some(safety),
            &audit,
            &notifier,
            OrchestratorConfig::default(),
        );

        let risk_inputs = RiskInputs {
            lines_changed: 10,
            test_failure_rate: 0.0,
            security_scan_failed: false,
            cve_count: 0,
            coverage_drop_pct: 0.0,
            lint_error_count: 0,
            build_failed: false,
        };
        let request = OperationRequest {
            kind: OperationKind::Deployment,
            service: "checkout",
            actor: "ci-bot",
            correlation_id: None,
            expected_duration_secs: 30,
            risk: Some((&risk_inputs, "deadbeef")),
            cancel: None,
        };
        let result = orchestrator.execute_operation(request, || Ok(()));

        assert_eq!(result.result, OperationResult::BlockedBySafetyGate);
        assert!(result.lock_acquired);
        assert!(!result.safety_gates_passed);
        assert!(result.paused);
    }

    #[test]
    fn body_error_is_recorded_as_failed() {
        let dir = tempfile::tempdir().unwrap();
        let (lock_manager, audit, graph) = harness(&dir);
        let notifier = FakeNotifier;
        let orchestrator = Orchestrator::new(
            &lock_manager,
            ConflictDetector::new(ResourceGroups::default()),
            &graph,
            None,
            &audit,
            &notifier,
            OrchestratorConfig::default(),
        );

        let request = OperationRequest {
            kind: OperationKind::Verification,
            service: "checkout",
            actor: "ci-bot",
            correlation_id: None,
            expected_duration_secs: 30,
            risk: None,
            cancel: None,
        };
        let result = orchestrator.execute_operation(request, || anyhow::bail!("verification blew up"));

        assert_eq!(result.result, OperationResult::Failed);
        assert_eq!(result.error.as_deref(), Some("verification blew up"));
    }

    #[test]
    fn cancellation_flag_aborts_before_body_runs() {
        let dir = tempfile::tempdir().unwrap();
        let (lock_manager, audit, graph) = harness(&dir);
        let notifier = FakeNotifier;
        let orchestrator = Orchestrator::new(
            &lock_manager,
            ConflictDetector::new(ResourceGroups::default()),
            &graph,
            None,
            &audit,
            &notifier,
            OrchestratorConfig::default(),
        );

        let cancel = std::sync::atomic::AtomicBool::new(true);
        let request = OperationRequest {
            kind: OperationKind::Verification,
            service: "checkout",
            actor: "ci-bot",
            correlation_id: None,
            expected_duration_secs: 30,
            risk: None,
            cancel: Some(&cancel),
        };
        let mut body_ran = false;
        let result = orchestrator.execute_operation(request, || {
            body_ran = true;
            Ok(())
        });

        assert_eq!(result.result, OperationResult::Failed);
        assert!(!body_ran, "cancelled operation must not run the body");
        assert!(result.error.unwrap().contains("cancelled"));
        assert!(!result.lock_acquired);
    }

    #[test]
    fn exceeding_total_operation_timeout_aborts_as_failed() {
        let dir = tempfile::tempdir().unwrap();
        let (lock_manager, audit, graph) = harness(&dir);
        let notifier = FakeNotifier;
        let config = OrchestratorConfig { operation_timeout: StdDuration::from_nanos(1), ..OrchestratorConfig::default() };
        let orchestrator = Orchestrator::new(
            &lock_manager,
            ConflictDetector::new(ResourceGroups::default()),
            &graph,
            None,
            &audit,
            &notifier,
            config,
        );

        std::thread::sleep(StdDuration::from_millis(5));
        let request = OperationRequest {
            kind: OperationKind::Verification,
            service: "checkout",
            actor: "ci-bot",
            correlation_id: None,
            expected_duration_secs: 30,
            risk: None,
            cancel: None,
        };
        let result = orchestrator.execute_operation(request, || Ok(()));

        assert_eq!(result.result, OperationResult::Failed);
        assert!(result.error.unwrap().contains("operation_timeout"));
    }
}
