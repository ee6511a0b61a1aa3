//! Operation kinds and the ongoing-operation record used by the conflict
//! detector and the orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Kinds of operations that can conflict (spec §3 Operation.kind).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Deployment,
    Rollback,
    Verification,
    PatchGeneration,
    ConfigChange,
    Scaling,
    Restart,
}

impl OperationKind {
    /// Whether this kind mutates the running service (used by the
    /// incompatibility table in spec §4.4: only write-write pairs on the
    /// same resource are classified DIRECT/DEPENDENCY with write severity).
    pub fn is_write(self) -> bool {
        matches!(self, OperationKind::Deployment | OperationKind::Rollback)
    }
}

/// `{id, kind, service, actor, started_at, expected_duration, metadata}`
/// per spec §3. Registered when work begins, unregistered on terminal
/// outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub id: String,
    pub kind: OperationKind,
    pub service: String,
    pub actor: String,
    pub started_at: DateTime<Utc>,
    pub expected_duration_secs: u64,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Operation {
    pub fn new(
        id: impl Into<String>,
        kind: OperationKind,
        service: impl Into<String>,
        actor: impl Into<String>,
        expected_duration_secs: u64,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            service: service.into(),
            actor: actor.into(),
            started_at: Utc::now(),
            expected_duration_secs,
            metadata: HashMap::new(),
        }
    }
}
