//! Deployment context and the canary deployment state machine's states
//! (spec §3, §4.6).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Immutable identifiers plus the one mutable field (`canary_percentage`)
/// for an in-flight deployment (spec §3 DeploymentContext).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentContext {
    pub deployment_id: String,
    pub incident_id: String,
    pub service: String,
    pub image_tag: String,
    pub commit_hash: String,
    pub safety_artifact_ref: String,
    pub canary_percentage: u8,
}

/// The deployment state machine's states (spec §4.6). `Verified`,
/// `RolledBack`, and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentState {
    Init,
    Building,
    Deploying,
    Canary,
    CanaryWaiting,
    CanaryEvaluating,
    Promoting,
    Promoted,
    Verifying,
    Verified,
    RollingBack,
    RolledBack,
    Failed,
}

impl DeploymentState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DeploymentState::Verified | DeploymentState::RolledBack | DeploymentState::Failed
        )
    }

    /// The allowed-transition adjacency from spec §4.6, verbatim.
    pub fn allowed_next(self) -> &'static [DeploymentState] {
        use DeploymentState::*;
        match self {
            Init => &[Building, Failed],
            Building => &[Deploying, Failed],
            Deploying => &[Canary, Promoted, Failed],
            Canary => &[CanaryWaiting, RollingBack, Failed],
            CanaryWaiting => &[CanaryEvaluating, RollingBack],
            CanaryEvaluating => &[Canary, Promoting, RollingBack, Failed],
            Promoting => &[Promoted, RollingBack, Failed],
            Promoted => &[Verifying, RollingBack],
            Verifying => &[Verified, RollingBack],
            RollingBack => &[RolledBack, Failed],
            Verified | RolledBack | Failed => &[],
        }
    }

    pub fn can_transition_to(self, next: DeploymentState) -> bool {
        self.allowed_next().contains(&next)
    }
}

/// One entry of a deployment's transition history, persisted alongside the
/// deployment's JSON state document (spec §6 "Persisted state").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransitionRecord {
    pub from_state: DeploymentState,
    pub to_state: DeploymentState,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}
