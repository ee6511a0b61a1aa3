//! Distributed lock manager (spec §4.2).
//!
//! `LockManager` composes a pluggable [`controlplane_types::capability::LockStore`]
//! backend with the ordering validation from `controlplane_types::lock`, so
//! the ordering rule is checked once, in-process, before any backend is ever
//! contacted (spec §4.2 "validates lock ordering... before contacting the
//! backend; on ordering violation, returns immediately... no backoff").
//!
//! Grounded in `examples/original_source/examples/distributed_lock_manager.py`'s
//! `DistributedLockManager` (`acquire_lock`/`release_lock`/`force_release_all`,
//! the Redis central-store backend with a Lua compare-and-delete script, and
//! the file backend), with atomic tmp-then-rename writes and `Drop`-based
//! best-effort release on the file backend.
//!
//! Two [`LockStore`](controlplane_types::capability::LockStore) backends ship
//! here: [`FileLockStore`] (directly generalizing `LockFile` to arbitrary
//! scopes/resources) and [`CentralLockStore`] (an in-process stand-in for the
//! original's Redis backend -- no Redis client crate appears anywhere in the
//! reference stack, so the central-store capability is expressed with a
//! shared `Mutex`; a real deployment would swap in a Redis- or etcd-backed
//! `LockStore` impl without touching `LockManager`).

use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use controlplane_audit::AuditLog;
use controlplane_types::capability::LockStore;
use controlplane_types::lock::{validate_ordering, Lock, LockScope, OrderingViolation};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error(transparent)]
    Ordering(#[from] OrderingViolation),
    #[error("lock already held on '{resource_id}' (scope {scope})")]
    AlreadyHeld { scope: LockScope, resource_id: String },
    #[error("timed out waiting {waited:?} to acquire {scope} lock on '{resource_id}'")]
    Timeout {
        scope: LockScope,
        resource_id: String,
        waited: Duration,
    },
    #[error("lock backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Scope-ordered lock acquisition over a pluggable [`LockStore`].
pub struct LockManager {
    store: Box<dyn LockStore>,
    audit: Option<std::sync::Arc<AuditLog>>,
    held_by_owner: Mutex<HashMap<String, Vec<(LockScope, String)>>>,
}

impl LockManager {
    pub fn new(store: Box<dyn LockStore>) -> Self {
        Self {
            store,
            audit: None,
            held_by_owner: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_audit(mut self, audit: std::sync::Arc<AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Acquires `scope`/`resource_id` for `owner`. If the backend reports the
    /// lock already held and `wait` is `Some`, polls every second up to
    /// `wait` before giving up (spec §4.2 "1-second poll interval... returns
    /// Timeout after the wait budget is exhausted").
    pub fn acquire(
        &self,
        scope: LockScope,
        resource_id: &str,
        owner: &str,
        ttl: ChronoDuration,
        wait: Option<Duration>,
        correlation_id: &str,
    ) -> Result<Lock, LockError> {
        {
            let held = self.held_by_owner.lock().expect("lock manager mutex poisoned");
            let owner_held = held.get(owner).cloned().unwrap_or_default();
            validate_ordering(scope, resource_id, &owner_held)?;
        }

        let lock = Lock::new(scope, resource_id, owner, ttl);
        let started = Instant::now();
        loop {
            match self.store.try_acquire(&lock) {
                Ok(true) => {
                    self.held_by_owner
                        .lock()
                        .expect("lock manager mutex poisoned")
                        .entry(owner.to_string())
                        .or_default()
                        .push((scope, resource_id.to_string()));
                    if let Some(audit) = &self.audit {
                        let _ = audit.log_lock_acquired(
                            &lock.lock_id,
                            owner,
                            scope.as_str(),
                            ttl.num_seconds().max(0) as u64,
                            correlation_id,
                        );
                    }
                    return Ok(lock);
                }
                Ok(false) => {
                    let Some(budget) = wait else {
                        if let Some(audit) = &self.audit {
                            let _ = audit.log_lock_failed(
                                &lock.lock_id,
                                owner,
                                "already_held",
                                correlation_id,
                            );
                        }
                        return Err(LockError::AlreadyHeld {
                            scope,
                            resource_id: resource_id.to_string(),
                        });
                    };
                    if started.elapsed() >= budget {
                        if let Some(audit) = &self.audit {
                            let _ = audit.log_lock_failed(
                                &lock.lock_id,
                                owner,
                                "timeout",
                                correlation_id,
                            );
                        }
                        return Err(LockError::Timeout {
                            scope,
                            resource_id: resource_id.to_string(),
                            waited: started.elapsed(),
                        });
                    }
                    std::thread::sleep(POLL_INTERVAL.min(budget.saturating_sub(started.elapsed())));
                }
                Err(e) => return Err(LockError::Backend(e)),
            }
        }
    }

    /// Releases a lock this manager previously granted to `owner`. A no-op
    /// (returns `Ok(())`) if the backend's compare-and-delete finds a
    /// different or absent owner -- matching the original's
    /// `_release_lock_backend` semantics where a stale release is silently
    /// ignored rather than treated as an error.
    pub fn release(
        &self,
        scope: LockScope,
        resource_id: &str,
        owner: &str,
        correlation_id: &str,
    ) -> Result<(), LockError> {
        let lock_id = format!("{}:{}", scope.as_str(), resource_id);
        let released = self
            .store
            .compare_and_delete(scope, resource_id, owner)
            .map_err(LockError::Backend)?;

        let mut held = self.held_by_owner.lock().expect("lock manager mutex poisoned");
        if let Some(entries) = held.get_mut(owner) {
            entries.retain(|(s, r)| !(*s == scope && r == resource_id));
        }
        drop(held);

        if released {
            if let Some(audit) = &self.audit {
                let _ = audit.log_lock_released(&lock_id, owner, correlation_id);
            }
        }
        Ok(())
    }

    pub fn is_locked(&self, scope: LockScope, resource_id: &str) -> Result<bool> {
        Ok(self.store.read(scope, resource_id)?.is_some_and(|l| !l.is_expired()))
    }

    pub fn list_active(&self) -> Result<Vec<Lock>> {
        Ok(self
            .store
            .list_active()?
            .into_iter()
            .filter(|l| !l.is_expired())
            .collect())
    }

    /// Emergency release of every lock held by `owner`, e.g. after a crashed
    /// worker is detected. Logs a single CRITICAL audit event (spec §4.2
    /// "force_release_all -- emergency; logs a CRITICAL audit event").
    pub fn force_release_all(&self, owner: &str, correlation_id: &str) -> Result<usize> {
        let mut released = 0usize;
        for lock in self.list_active()? {
            if lock.owner != owner {
                continue;
            }
            if self.store.compare_and_delete(lock.scope, &lock.resource_id, owner)? {
                released += 1;
            }
        }
        self.held_by_owner
            .lock()
            .expect("lock manager mutex poisoned")
            .remove(owner);
        if let Some(audit) = &self.audit {
            let _ = audit.log_force_release_all(owner, released, correlation_id);
        }
        Ok(released)
    }
}

/// File-backed [`LockStore`], one file per lock under `base_dir`, generalized
/// to arbitrary scope/resource keys with an explicit `owner` string. Release
/// always re-reads the owner from file content rather than trusting an
/// in-memory handle, so it is correct across process restarts: `compare_and_delete`
/// verifies identity from disk since callers are not tied to a single process.
pub struct FileLockStore {
    base_dir: PathBuf,
}

impl FileLockStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    fn path_for(&self, scope: LockScope, resource_id: &str) -> PathBuf {
        let safe_resource = resource_id.replace(['/', ':'], "_");
        self.base_dir
            .join(format!("{}__{}.lock", scope.as_str(), safe_resource))
    }

    fn read(&self, path: &Path) -> Result<Option<Lock>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn write_atomic(&self, path: &Path, lock: &Lock) -> Result<()> {
        let tmp = path.with_extension("tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(serde_json::to_string(lock)?.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl LockStore for FileLockStore {
    fn try_acquire(&self, lock: &Lock) -> Result<bool> {
        let path = self.path_for(lock.scope, &lock.resource_id);
        if let Some(existing) = self.read(&path)? {
            if !existing.is_expired() {
                return Ok(false);
            }
            fs::remove_file(&path)?;
        }
        self.write_atomic(&path, lock)?;
        Ok(true)
    }

    fn compare_and_delete(&self, scope: LockScope, resource_id: &str, owner: &str) -> Result<bool> {
        let path = self.path_for(scope, resource_id);
        match self.read(&path)? {
            Some(existing) if existing.owner == owner => {
                fs::remove_file(&path)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn read(&self, scope: LockScope, resource_id: &str) -> Result<Option<Lock>> {
        FileLockStore::read(self, &self.path_for(scope, resource_id))
    }

    fn list_active(&self) -> Result<Vec<Lock>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.base_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("lock") {
                continue;
            }
            if let Some(lock) = FileLockStore::read(self, &path)? {
                out.push(lock);
            }
        }
        Ok(out)
    }
}

/// In-process central lock store, standing in for the original's Redis
/// backend (`SET NX PX` + a Lua compare-and-delete script). The same
/// atomicity guarantees are provided here by a single `Mutex`.
#[derive(Default)]
pub struct CentralLockStore {
    locks: Mutex<HashMap<String, Lock>>,
}

impl CentralLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(scope: LockScope, resource_id: &str) -> String {
        format!("{}:{}", scope.as_str(), resource_id)
    }
}

impl LockStore for CentralLockStore {
    fn try_acquire(&self, lock: &Lock) -> Result<bool> {
        let mut locks = self.locks.lock().expect("central lock store mutex poisoned");
        let key = Self::key(lock.scope, &lock.resource_id);
        if let Some(existing) = locks.get(&key) {
            if existing.is_expired() {
                locks.insert(key, lock.clone());
                return Ok(true);
            }
            return Ok(false);
        }
        locks.insert(key, lock.clone());
        Ok(true)
    }

    fn compare_and_delete(&self, scope: LockScope, resource_id: &str, owner: &str) -> Result<bool> {
        let mut locks = self.locks.lock().expect("central lock store mutex poisoned");
        let key = Self::key(scope, resource_id);
        match locks.get(&key) {
            Some(existing) if existing.owner == owner => {
                locks.remove(&key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn read(&self, scope: LockScope, resource_id: &str) -> Result<Option<Lock>> {
        let locks = self.locks.lock().expect("central lock store mutex poisoned");
        Ok(locks.get(&Self::key(scope, resource_id)).cloned())
    }

    fn list_active(&self) -> Result<Vec<Lock>> {
        let locks = self.locks.lock().expect("central lock store mutex poisoned");
        Ok(locks.values().cloned().collect())
    }
}
