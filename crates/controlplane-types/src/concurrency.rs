//! The orchestrator's own state machine and its top-level result type
//! (spec §3 ConcurrencyState, §4.10 ExecutionResult).

use serde::{Deserialize, Serialize};

/// `{INIT, LOCKED, SAFETY_CHECK, IN_PROGRESS, PAUSED_FOR_HUMAN_REVIEW,
/// COMPLETED, FAILED}`. `PAUSED_FOR_HUMAN_REVIEW` is quiescent, awaiting an
/// external resume or abort signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConcurrencyState {
    Init,
    Locked,
    SafetyCheck,
    InProgress,
    PausedForHumanReview,
    Completed,
    Failed,
}

/// The top-level, exhaustively-matchable outcome tag carried by
/// [`ExecutionResult`]. Named directly after the original prototype's
/// `OperationResult` enum, which the distilled spec describes only in
/// prose ("on CRITICAL -> FAILED", etc.).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationResult {
    Success,
    Failed,
    PausedForReview,
    BlockedByConflict,
    BlockedBySafetyGate,
    DeadlockDetected,
    Timeout,
}

/// Result of one `Orchestrator::execute` call (spec §4.10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub result: OperationResult,
    pub operation_id: String,
    pub service: String,
    pub duration_seconds: f64,

    pub lock_acquired: bool,
    pub safety_gates_passed: bool,
    pub conflicts_detected: Vec<String>,
    pub state_transitions: Vec<String>,

    pub correlation_id: String,
    pub audit_events: Vec<String>,

    pub paused: bool,
    pub pause_reason: Option<String>,

    pub error: Option<String>,
    pub rollback_performed: bool,
}

impl ExecutionResult {
    pub fn new(operation_id: impl Into<String>, service: impl Into<String>, correlation_id: impl Into<String>) -> Self {
        Self {
            result: OperationResult::Success,
            operation_id: operation_id.into(),
            service: service.into(),
            duration_seconds: 0.0,
            lock_acquired: false,
            safety_gates_passed: false,
            conflicts_detected: Vec::new(),
            state_transitions: vec!["INIT".to_string()],
            correlation_id: correlation_id.into(),
            audit_events: Vec::new(),
            paused: false,
            pause_reason: None,
            error: None,
            rollback_performed: false,
        }
    }
}
