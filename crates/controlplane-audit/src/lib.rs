//! Tamper-evident, hash-chained audit log (spec §4.1).
//!
//! Grounded in `examples/original_source/examples/audit_logger.py`'s
//! `AuditLogger`/`AuditEvent` (hash-chain computation, convenience logging
//! methods, in-memory query buffer), with an append-only JSONL event log
//! on disk (one JSON object per line, `OpenOptions::new().append(true)`).
//!
//! Every event is hashed via [`controlplane_types::canonical::chained_hash`]
//! before being appended, so [`AuditLog::verify_chain`] can recompute the
//! chain from genesis and detect any retroactive mutation or deletion
//! (spec §8 invariant 4).

use anyhow::{Context, Result};
use chrono::Utc;
use controlplane_types::audit::{ActionCategory, ActionSeverity, AuditEvent};
use controlplane_types::canonical::{chained_hash, GENESIS_HASH};
use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const EVENTS_FILE: &str = "audit.jsonl";
const DEFAULT_BUFFER_SIZE: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("audit store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("audit chain broken at event {event_id}")]
    ChainBroken { event_id: String },
    #[error("audit buffer overflow: system entering read-only mode")]
    BufferOverflow,
    #[error("audit log is in read-only mode after a prior append failure")]
    ReadOnly,
}

/// A query filter for [`AuditLog::query`]. All fields are optional
/// conjunctive predicates (spec §4.1 `query`).
#[derive(Debug, Default, Clone)]
pub struct AuditQuery {
    pub category: Option<ActionCategory>,
    pub severity: Option<ActionSeverity>,
    pub actor: Option<String>,
    pub resource_id: Option<String>,
    pub correlation_id: Option<String>,
    pub limit: usize,
}

impl AuditQuery {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            ..Default::default()
        }
    }

    fn matches(&self, event: &AuditEvent) -> bool {
        if let Some(c) = self.category {
            if event.category != c {
                return false;
            }
        }
        if let Some(s) = self.severity {
            if event.severity != s {
                return false;
            }
        }
        if let Some(actor) = &self.actor {
            if &event.actor != actor {
                return false;
            }
        }
        if let Some(rid) = &self.resource_id {
            if &event.resource_id != rid {
                return false;
            }
        }
        if let Some(cid) = &self.correlation_id {
            if &event.correlation_id != cid {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Default, Clone)]
pub struct AuditStatistics {
    pub total_events: u64,
    pub errors_count: u64,
    pub buffer_len: usize,
    pub last_hash: Option<String>,
    pub read_only: bool,
}

struct Inner {
    buffer: VecDeque<AuditEvent>,
    last_hash: String,
    read_only: bool,
    total_events: u64,
    errors_count: u64,
}

/// Append-only, hash-chained audit log backed by a JSONL file.
///
/// Append is serialized via an internal mutex (spec §4.1 "single-writer
/// semantics"); query reflects every append ordered before the call.
pub struct AuditLog {
    path: PathBuf,
    buffer_size: usize,
    inner: Mutex<Inner>,
}

impl AuditLog {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        Self::with_buffer_size(dir, DEFAULT_BUFFER_SIZE)
    }

    pub fn with_buffer_size(dir: impl AsRef<Path>, buffer_size: usize) -> Result<Self> {
        std::fs::create_dir_all(&dir)?;
        let path = dir.as_ref().join(EVENTS_FILE);
        let (last_hash, total_events) = Self::replay_last_hash(&path)?;
        Ok(Self {
            path,
            buffer_size,
            inner: Mutex::new(Inner {
                buffer: VecDeque::with_capacity(buffer_size.min(64)),
                last_hash,
                read_only: false,
                total_events,
                errors_count: 0,
            }),
        })
    }

    fn replay_last_hash(path: &Path) -> Result<(String, u64)> {
        if !path.exists() {
            return Ok((GENESIS_HASH.to_string(), 0));
        }
        let file = std::fs::File::open(path)?;
        let reader = BufReader::new(file);
        let mut last_hash = GENESIS_HASH.to_string();
        let mut count = 0u64;
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let event: AuditEvent = serde_json::from_str(&line)
                .with_context(|| format!("parsing audit event from {}", path.display()))?;
            if let Some(hash) = event.hash {
                last_hash = hash;
            }
            count += 1;
        }
        Ok((last_hash, count))
    }

    /// Assigns `event_id`, timestamp, and hash; appends to the durable
    /// store; updates the in-memory `last_hash` (spec §4.1 `append`).
    ///
    /// On durable-store write failure the event is kept in the in-memory
    /// buffer rather than lost; if the buffer then exceeds its configured
    /// cap, the log enters read-only mode and all further appends are
    /// rejected (spec §4.1 "Errors").
    pub fn append(&self, mut event: AuditEvent) -> Result<String, AuditError> {
        let mut inner = self.inner.lock().expect("audit log mutex poisoned");
        if inner.read_only {
            return Err(AuditError::ReadOnly);
        }

        let hash = chained_hash(&inner.last_hash, &EventForHash(&event))
            .expect("audit event is always json-serializable");
        event.hash = Some(hash.clone());
        let event_id = event.event_id.clone();

        match Self::write_line(&self.path, &event) {
            Ok(()) => {
                inner.last_hash = hash;
                inner.total_events += 1;
                if matches!(event.severity, ActionSeverity::Error | ActionSeverity::Critical) {
                    inner.errors_count += 1;
                }
                if inner.buffer.len() >= self.buffer_size {
                    inner.buffer.pop_front();
                }
                inner.buffer.push_back(event);
                Ok(event_id)
            }
            Err(io_err) => {
                if inner.buffer.len() >= self.buffer_size {
                    inner.read_only = true;
                    return Err(AuditError::BufferOverflow);
                }
                inner.buffer.push_back(event);
                Err(AuditError::Io(io_err))
            }
        }
    }

    fn write_line(path: &Path, event: &AuditEvent) -> std::io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let line = serde_json::to_string(event)?;
        writeln!(file, "{line}")?;
        file.sync_data()?;
        Ok(())
    }

    /// Returns events in reverse-chronological order matching `filter`,
    /// from the in-memory buffer (spec §4.1 `query`).
    pub fn query(&self, filter: &AuditQuery) -> Vec<AuditEvent> {
        let inner = self.inner.lock().expect("audit log mutex poisoned");
        let mut results = Vec::new();
        for event in inner.buffer.iter().rev() {
            if results.len() >= filter.limit.max(1) && filter.limit != 0 {
                break;
            }
            if filter.matches(event) {
                results.push(event.clone());
            }
        }
        results
    }

    /// Recomputes hashes from genesis over the durable store; returns
    /// `(true, None)` if the chain is intact, or `(false, Some(event_id))`
    /// naming the first event whose hash no longer matches (spec §4.1
    /// `verify_chain`, §8 invariant 4).
    pub fn verify_chain(&self) -> Result<(bool, Option<String>)> {
        if !self.path.exists() {
            return Ok((true, None));
        }
        let file = std::fs::File::open(&self.path)?;
        let reader = BufReader::new(file);
        let mut previous_hash = GENESIS_HASH.to_string();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let event: AuditEvent = serde_json::from_str(&line)?;
            let expected = chained_hash(&previous_hash, &EventForHash(&event))?;
            if event.hash.as_deref() != Some(expected.as_str()) {
                return Ok((false, Some(event.event_id)));
            }
            previous_hash = expected;
        }
        Ok((true, None))
    }

    pub fn statistics(&self) -> AuditStatistics {
        let inner = self.inner.lock().expect("audit log mutex poisoned");
        AuditStatistics {
            total_events: inner.total_events,
            errors_count: inner.errors_count,
            buffer_len: inner.buffer.len(),
            last_hash: Some(inner.last_hash.clone()),
            read_only: inner.read_only,
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.inner.lock().expect("audit log mutex poisoned").read_only
    }

    fn next_event_id() -> String {
        format!("AE-{}-{:08x}", Utc::now().timestamp_millis(), rand_u32())
    }

    // Convenience methods, carried over from audit_logger.py's
    // log_lock_acquired / log_deployment / log_verification / etc.

    pub fn log_lock_acquired(
        &self,
        lock_id: &str,
        owner: &str,
        scope: &str,
        ttl_secs: u64,
        correlation_id: &str,
    ) -> Result<String, AuditError> {
        let event = AuditEvent::new(
            Self::next_event_id(),
            ActionCategory::LockOperation,
            "lock_acquired",
            ActionSeverity::Info,
            owner,
            lock_id,
            "success",
            correlation_id,
        )
        .with_details(details([
            ("scope", scope.into()),
            ("ttl_seconds", ttl_secs.into()),
        ]));
        self.append(event)
    }

    pub fn log_lock_released(
        &self,
        lock_id: &str,
        owner: &str,
        correlation_id: &str,
    ) -> Result<String, AuditError> {
        let event = AuditEvent::new(
            Self::next_event_id(),
            ActionCategory::LockOperation,
            "lock_released",
            ActionSeverity::Info,
            owner,
            lock_id,
            "success",
            correlation_id,
        );
        self.append(event)
    }

    pub fn log_lock_failed(
        &self,
        lock_id: &str,
        owner: &str,
        reason: &str,
        correlation_id: &str,
    ) -> Result<String, AuditError> {
        let event = AuditEvent::new(
            Self::next_event_id(),
            ActionCategory::LockOperation,
            "lock_acquisition_failed",
            ActionSeverity::Warning,
            owner,
            lock_id,
            "failed",
            correlation_id,
        )
        .with_details(details([("reason", reason.into())]));
        self.append(event)
    }

    pub fn log_force_release_all(
        &self,
        owner: &str,
        released_count: usize,
        correlation_id: &str,
    ) -> Result<String, AuditError> {
        // Upgraded from the original's plain warning log to a CRITICAL
        // audit event, per spec §4.2 "force_release_all -- emergency;
        // logs a CRITICAL audit event."
        let event = AuditEvent::new(
            Self::next_event_id(),
            ActionCategory::LockOperation,
            "force_release_all",
            ActionSeverity::Critical,
            owner,
            owner,
            "success",
            correlation_id,
        )
        .with_details(details([("released_count", released_count.into())]));
        self.append(event)
    }

    pub fn log_deployment(
        &self,
        service: &str,
        deployment_id: &str,
        strategy: &str,
        success: bool,
        correlation_id: &str,
    ) -> Result<String, AuditError> {
        let severity = if success {
            ActionSeverity::Info
        } else {
            ActionSeverity::Error
        };
        let event = AuditEvent::new(
            Self::next_event_id(),
            ActionCategory::Deployment,
            format!("deployment_{strategy}"),
            severity,
            "deployment_orchestrator",
            service,
            if success { "success" } else { "failed" },
            correlation_id,
        )
        .with_details(details([("deployment_id", deployment_id.into())]));
        self.append(event)
    }

    pub fn log_verification(
        &self,
        service: &str,
        verification_status: &str,
        correlation_id: &str,
    ) -> Result<String, AuditError> {
        let severity = if verification_status.eq_ignore_ascii_case("passed") {
            ActionSeverity::Info
        } else {
            ActionSeverity::Warning
        };
        let event = AuditEvent::new(
            Self::next_event_id(),
            ActionCategory::Verification,
            "post_deployment_verification",
            severity,
            "verification_orchestrator",
            service,
            verification_status.to_lowercase(),
            correlation_id,
        );
        self.append(event)
    }

    pub fn log_rollback(
        &self,
        service: &str,
        strategy: &str,
        success: bool,
        correlation_id: &str,
    ) -> Result<String, AuditError> {
        let severity = if success {
            ActionSeverity::Warning
        } else {
            ActionSeverity::Error
        };
        let event = AuditEvent::new(
            Self::next_event_id(),
            ActionCategory::Rollback,
            format!("rollback_{strategy}"),
            severity,
            "rollback_orchestrator",
            service,
            if success { "success" } else { "failed" },
            correlation_id,
        );
        self.append(event)
    }

    pub fn log_conflict_detected(
        &self,
        resource_id: &str,
        conflict_type: &str,
        resolution: &str,
        correlation_id: &str,
    ) -> Result<String, AuditError> {
        let event = AuditEvent::new(
            Self::next_event_id(),
            ActionCategory::ConflictDetection,
            "conflict_detected",
            ActionSeverity::Warning,
            "conflict_detector",
            resource_id,
            resolution,
            correlation_id,
        )
        .with_details(details([("conflict_type", conflict_type.into())]));
        self.append(event)
    }

    pub fn log_state_transition(
        &self,
        resource_id: &str,
        from_state: &str,
        to_state: &str,
        correlation_id: &str,
    ) -> Result<String, AuditError> {
        let event = AuditEvent::new(
            Self::next_event_id(),
            ActionCategory::StateTransition,
            "state_transition",
            ActionSeverity::Info,
            "state_machine",
            resource_id,
            "success",
            correlation_id,
        )
        .with_details(details([
            ("from_state", from_state.into()),
            ("to_state", to_state.into()),
        ]));
        self.append(event)
    }

    /// Logs an operation aborted by external cancellation or the
    /// total-operation timeout (spec §5 "Cancellation"/"Timeouts"), distinct
    /// from [`Self::log_manual_intervention`]'s human-review pause since no
    /// operator is waiting on this one -- the orchestrator unwound it itself.
    pub fn log_operation_aborted(
        &self,
        resource_id: &str,
        cause: &str,
        actor: &str,
        correlation_id: &str,
    ) -> Result<String, AuditError> {
        let event = AuditEvent::new(
            Self::next_event_id(),
            ActionCategory::StateTransition,
            "operation_aborted",
            ActionSeverity::Warning,
            actor,
            resource_id,
            cause,
            correlation_id,
        )
        .with_details(details([("cause", cause.into())]));
        self.append(event)
    }

    pub fn log_manual_intervention(
        &self,
        resource_id: &str,
        reason: &str,
        operator: &str,
        correlation_id: &str,
    ) -> Result<String, AuditError> {
        let event = AuditEvent::new(
            Self::next_event_id(),
            ActionCategory::ManualIntervention,
            "pause_for_review",
            ActionSeverity::Warning,
            operator,
            resource_id,
            "manual_action",
            correlation_id,
        )
        .with_details(details([("reason", reason.into())]));
        self.append(event)
    }

    pub fn log_safety_gate_result(
        &self,
        resource_id: &str,
        gate_type: &str,
        passed: bool,
        correlation_id: &str,
    ) -> Result<String, AuditError> {
        let severity = if passed {
            ActionSeverity::Info
        } else {
            ActionSeverity::Error
        };
        let event = AuditEvent::new(
            Self::next_event_id(),
            ActionCategory::SafetyGates,
            format!("safety_gate_{gate_type}"),
            severity,
            "safety_gate_checker",
            resource_id,
            if passed { "passed" } else { "failed" },
            correlation_id,
        );
        self.append(event)
    }
}

/// Hashes the event with its `hash` field excluded, matching the original's
/// `_compute_hash` which serializes `event.to_dict()` before `hash` is set.
struct EventForHash<'a>(&'a AuditEvent);

impl serde::Serialize for EventForHash<'_> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let e = self.0;
        let mut s = serializer.serialize_struct("AuditEvent", 10)?;
        s.serialize_field("event_id", &e.event_id)?;
        s.serialize_field("timestamp", &e.timestamp)?;
        s.serialize_field("category", &e.category)?;
        s.serialize_field("action", &e.action)?;
        s.serialize_field("severity", &e.severity)?;
        s.serialize_field("actor", &e.actor)?;
        s.serialize_field("resource_id", &e.resource_id)?;
        s.serialize_field("outcome", &e.outcome)?;
        s.serialize_field("details", &e.details)?;
        s.serialize_field("correlation_id", &e.correlation_id)?;
        s.serialize_field("parent_event_id", &e.parent_event_id)?;
        s.end()
    }
}

fn details<const N: usize>(pairs: [(&str, serde_json::Value); N]) -> std::collections::HashMap<String, serde_json::Value> {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

fn rand_u32() -> u32 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    nanos ^ (std::process::id())
}
