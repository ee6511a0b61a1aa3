//! Core domain types for the self-healing control plane.
//!
//! These types are shared by every leaf crate (`controlplane-lock`,
//! `controlplane-audit`, `controlplane-conflict`, ...) so that capability
//! traits can be defined once, here, instead of once per consumer.
//!
//! ## Modules
//!
//! - [`lock`] — lock scopes, lock records, ordering rules
//! - [`operation`] — operation kinds and the ongoing-operation record
//! - [`deployment`] — deployment context and state machine states
//! - [`concurrency`] — the orchestrator's own state machine
//! - [`audit`] — audit event shape, categories, severities
//! - [`metrics`] — metric samples and control/treatment comparisons
//! - [`capability`] — small capability traits (`MetricBackend`, `LockStore`,
//!   `DeploymentTarget`, `NotifierSink`) implemented by backend crates
//! - [`canonical`] — deterministic JSON serialization used for hashing

pub mod audit;
pub mod canonical;
pub mod capability;
pub mod concurrency;
pub mod deployment;
pub mod lock;
pub mod metrics;
pub mod operation;

pub use audit::{ActionCategory, ActionSeverity, AuditEvent};
pub use capability::{DeploymentTarget, LockStore, MetricBackend, NotifierSink};
pub use concurrency::{ConcurrencyState, ExecutionResult, OperationResult};
pub use deployment::{DeploymentContext, DeploymentState};
pub use lock::{Lock, LockScope};
pub use metrics::{GateStatus, MetricComparison, MetricSample, Verdict};
pub use operation::{Operation, OperationKind};
