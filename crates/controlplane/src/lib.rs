//! # controlplane
//!
//! Umbrella crate for the self-healing control-plane core, following the
//! teacher workspace's micro-migration layout: every leaf concern lives in
//! its own independently publishable `controlplane-*` crate, and this crate
//! re-exports each of them as a module, gated behind a `micro-*` feature so
//! downstream consumers can depend on only the subsystems they need.
//!
//! ## Pipeline
//!
//! 1. [`conflict`] and [`depgraph`] decide whether a proposed operation may
//!    proceed at all (spec §4.3-4.4).
//! 2. [`lock`] acquires a scope-ordered distributed lock once a conflict
//!    check clears (spec §4.2).
//! 3. [`safety`] runs the five safety gates against the commit's
//!    proof-of-safety artifact (spec §4.5).
//! 4. [`deploy`] drives the canary protocol, consulting [`metrics`]'s health
//!    gate evaluator at each stage (spec §4.6-4.7).
//! 5. [`verify`] compares the canary's treatment group against a live
//!    control group (spec §4.8).
//! 6. [`rollback`] decides and, if warranted, executes a rollback from the
//!    verification result (spec §4.9).
//! 7. [`audit`] records every step above as a hash-chained, tamper-evident
//!    event (spec §4.1); [`notify`] pages a human when a gate pauses for
//!    review.
//!
//! [`core`] composes steps 1-3 and 6 into one
//! `Orchestrator::execute_operation` entry point; `controlplane-cli` is the
//! thin demonstration binary that drives it end to end.

#[cfg(feature = "micro-audit")]
pub use controlplane_audit as audit;

#[cfg(feature = "micro-conflict")]
pub use controlplane_conflict as conflict;

#[cfg(feature = "micro-config")]
pub use controlplane_config as config;

/// Concurrency Orchestrator: composes every other subsystem into one
/// `execute()` entry point. Not feature-gated -- this crate's entire reason
/// to exist is to expose the composed pipeline, so `core` is always present.
pub use controlplane_core as core;

#[cfg(feature = "micro-depgraph")]
pub use controlplane_depgraph as depgraph;

#[cfg(feature = "micro-deploy")]
pub use controlplane_deploy as deploy;

#[cfg(feature = "micro-lock")]
pub use controlplane_lock as lock;

#[cfg(feature = "micro-metrics")]
pub use controlplane_metrics as metrics;

#[cfg(feature = "micro-notify")]
pub use controlplane_notify as notify;

#[cfg(feature = "micro-rollback")]
pub use controlplane_rollback as rollback;

#[cfg(feature = "micro-safety")]
pub use controlplane_safety as safety;

#[cfg(feature = "micro-types")]
pub use controlplane_types as types;

#[cfg(feature = "micro-verify")]
pub use controlplane_verify as verify;
