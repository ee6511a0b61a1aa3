//! Small capability interfaces, one operation set per external
//! collaborator, per spec §9's polymorphism design note: "the implementer
//! should use small capability interfaces... (MetricBackend, LockStore,
//! DeploymentTarget, NotifierSink)". Each has exactly one HTTP-backed
//! implementation in its owning crate plus in-memory fakes for tests,
//! directly modeled on the teacher's `StateStore` trait (one trait, one
//! concrete `FileStore`, swappable by construction rather than by
//! subclassing).

use crate::lock::{Lock, LockScope};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// PromQL-shaped metrics query surface (spec §6 "Metrics backend").
pub trait MetricBackend: Send + Sync {
    /// Current scalar value for `query`.
    fn instant(&self, query: &str) -> Result<f64>;

    /// Time series for `query` over `[start, end]` at `step` resolution.
    fn range(
        &self,
        query: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: Duration,
    ) -> Result<Vec<(DateTime<Utc>, f64)>>;
}

/// Atomic lock-store primitives a `LockManager` composes into
/// acquire/release semantics (spec §4.2 "Backends").
pub trait LockStore: Send + Sync {
    /// Atomic compare-and-set: succeeds only if no lock is currently
    /// stored for `lock.lock_id`. Returns `true` on success.
    fn try_acquire(&self, lock: &Lock) -> Result<bool>;

    /// Atomic compare-and-delete: removes the stored lock only if its
    /// `owner` matches, so an expired-and-reacquired lock is never
    /// released by the stale owner (spec §4.2 "Backends", central store).
    fn compare_and_delete(&self, scope: LockScope, resource_id: &str, owner: &str) -> Result<bool>;

    fn read(&self, scope: LockScope, resource_id: &str) -> Result<Option<Lock>>;

    fn list_active(&self) -> Result<Vec<Lock>>;
}

/// Commands the Rollback executor requires from the orchestrator platform
/// (spec §6 "Deployment target").
pub trait DeploymentTarget: Send + Sync {
    fn set_image(&self, service: &str, image_tag: &str) -> Result<()>;

    /// Blocks (or polls) until the rollout reaches a terminal state, up to
    /// `timeout`. Returns `Ok(true)` if the rollout completed successfully
    /// before the timeout.
    fn await_rollout(&self, service: &str, timeout: Duration) -> Result<bool>;

    fn scale(&self, service: &str, replicas: u32) -> Result<()>;

    fn force_delete_pods(&self, label_selector: &str) -> Result<()>;

    /// `(ready_replicas, total_replicas)`.
    fn ready_counts(&self, service: &str) -> Result<(u32, u32)>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Slack,
    Email,
    Pagerduty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryStatus {
    pub delivered: bool,
    pub detail: Option<String>,
}

/// `send(title, message, severity, channels?, metadata?) -> delivery_status`
/// (spec §6 "Notification sink"). Transport and wire formatting are out of
/// scope; this is the contract the orchestrator calls against.
pub trait NotifierSink: Send + Sync {
    fn send(
        &self,
        title: &str,
        message: &str,
        severity: Severity,
        channels: Option<&[Channel]>,
        metadata: Option<serde_json::Value>,
    ) -> Result<DeliveryStatus>;
}
