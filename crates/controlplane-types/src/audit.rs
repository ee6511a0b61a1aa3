//! Audit event shape, categories, and severities (spec §3, §4.1).
//!
//! Categories and severities are carried over from the original
//! prototype's `audit_logger.py` (`ActionCategory`, `ActionSeverity`)
//! rather than left as bare strings, so every call site is exhaustively
//! matchable and the audit log's statistics (§9 design note on
//! `stats['errors_count']`) can be computed without string comparison.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionCategory {
    IncidentDetection,
    RootCauseAnalysis,
    CodeLocalization,
    FixPlanning,
    PatchGeneration,
    SafetyGates,
    Deployment,
    Verification,
    Rollback,
    LockOperation,
    ConflictDetection,
    StateTransition,
    Notification,
    ManualIntervention,
    SystemHealth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

/// `{event_id, timestamp, category, action, severity, actor, resource_id,
/// outcome, details, correlation_id, parent_event_id, hash}` (spec §3).
///
/// `hash` is `None` until the audit log's hash chain assigns it; callers
/// never set it directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub category: ActionCategory,
    pub action: String,
    pub severity: ActionSeverity,
    pub actor: String,
    pub resource_id: String,
    pub outcome: String,
    #[serde(default)]
    pub details: HashMap<String, serde_json::Value>,
    pub correlation_id: String,
    pub parent_event_id: Option<String>,
    pub hash: Option<String>,
}

impl AuditEvent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        event_id: impl Into<String>,
        category: ActionCategory,
        action: impl Into<String>,
        severity: ActionSeverity,
        actor: impl Into<String>,
        resource_id: impl Into<String>,
        outcome: impl Into<String>,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            timestamp: Utc::now(),
            category,
            action: action.into(),
            severity,
            actor: actor.into(),
            resource_id: resource_id.into(),
            outcome: outcome.into(),
            details: HashMap::new(),
            correlation_id: correlation_id.into(),
            parent_event_id: None,
            hash: None,
        }
    }

    pub fn with_details(mut self, details: HashMap<String, serde_json::Value>) -> Self {
        self.details = details;
        self
    }

    pub fn with_parent(mut self, parent_event_id: impl Into<String>) -> Self {
        self.parent_event_id = Some(parent_event_id.into());
        self
    }
}
