//! Lock scopes and lock records.
//!
//! Scope ordering (spec §3 / §4.2): a holder may acquire a new lock only if
//! its scope priority is greater than or equal to the highest-priority scope
//! it already holds; same-scope locks must be acquired in lexicographic
//! `resource_id` order. [`LockScope::priority`] is the single source of
//! truth other crates use to implement that rule.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lock scope, ordered by acquisition priority (lower number = must be
/// acquired first). Mirrors the original prototype's `LockScope` enum
/// (`SYSTEM=1, SERVICE=2, INCIDENT=3, DEPLOYMENT=4`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockScope {
    System,
    Service,
    Incident,
    Deployment,
}

impl LockScope {
    /// Lower is higher priority; must be acquired before any higher value.
    pub fn priority(self) -> u8 {
        match self {
            LockScope::System => 1,
            LockScope::Service => 2,
            LockScope::Incident => 3,
            LockScope::Deployment => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LockScope::System => "SYSTEM",
            LockScope::Service => "SERVICE",
            LockScope::Incident => "INCIDENT",
            LockScope::Deployment => "DEPLOYMENT",
        }
    }
}

impl std::fmt::Display for LockScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A held or historical lock record, as persisted by a `LockStore` backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lock {
    pub lock_id: String,
    pub scope: LockScope,
    pub resource_id: String,
    pub owner: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Lock {
    pub fn new(
        scope: LockScope,
        resource_id: impl Into<String>,
        owner: impl Into<String>,
        ttl: chrono::Duration,
    ) -> Self {
        let resource_id = resource_id.into();
        let owner = owner.into();
        let acquired_at = Utc::now();
        Self {
            lock_id: format!("{}:{}", scope.as_str(), resource_id),
            scope,
            resource_id,
            owner,
            acquired_at,
            expires_at: acquired_at + ttl,
            metadata: HashMap::new(),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Reason a lock acquisition was rejected before ever contacting the
/// backend store (spec §4.2: "validates... before contacting the
/// backend; on ordering violation, returns immediately... no backoff").
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderingViolation {
    #[error(
        "cannot acquire {attempted} lock on '{resource}': already holding {held} lock on '{held_resource}' (scope priority {held_priority} < {attempted_priority}; must release the higher-priority lock first)"
    )]
    ScopeOrder {
        attempted: LockScope,
        attempted_priority: u8,
        resource: String,
        held: LockScope,
        held_priority: u8,
        held_resource: String,
    },
    #[error(
        "cannot acquire {scope} lock on '{resource}' out of lexicographic order: already holding {scope} lock on '{held_resource}', which sorts after '{resource}'"
    )]
    LexicalOrder {
        scope: LockScope,
        resource: String,
        held_resource: String,
    },
}

/// Validates the two ordering rules from spec §3/§4.2 against a holder's
/// currently-held lock set, without touching any backend.
pub fn validate_ordering(
    attempted_scope: LockScope,
    attempted_resource: &str,
    held: &[(LockScope, String)],
) -> Result<(), OrderingViolation> {
    for (held_scope, held_resource) in held {
        if held_scope.priority() > attempted_scope.priority() {
            return Err(OrderingViolation::ScopeOrder {
                attempted: attempted_scope,
                attempted_priority: attempted_scope.priority(),
                resource: attempted_resource.to_string(),
                held: *held_scope,
                held_priority: held_scope.priority(),
                held_resource: held_resource.clone(),
            });
        }
        if *held_scope == attempted_scope && attempted_resource < held_resource.as_str() {
            return Err(OrderingViolation::LexicalOrder {
                scope: attempted_scope,
                resource: attempted_resource.to_string(),
                held_resource: held_resource.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_orders_system_first() {
        assert!(LockScope::System.priority() < LockScope::Service.priority());
        assert!(LockScope::Service.priority() < LockScope::Incident.priority());
        assert!(LockScope::Incident.priority() < LockScope::Deployment.priority());
    }

    #[test]
    fn holding_service_then_acquiring_system_is_rejected() {
        let held = vec![(LockScope::Service, "payment-service".to_string())];
        let err = validate_ordering(LockScope::System, "global", &held).unwrap_err();
        assert!(matches!(err, OrderingViolation::ScopeOrder { .. }));
    }

    #[test]
    fn holding_service_then_acquiring_incident_is_allowed() {
        let held = vec![(LockScope::Service, "payment-service".to_string())];
        assert!(validate_ordering(LockScope::Incident, "INC-001", &held).is_ok());
    }

    #[test]
    fn same_scope_out_of_lexical_order_is_rejected() {
        let held = vec![(LockScope::Service, "zeta-service".to_string())];
        let err = validate_ordering(LockScope::Service, "alpha-service", &held).unwrap_err();
        assert!(matches!(err, OrderingViolation::LexicalOrder { .. }));
    }

    #[test]
    fn same_scope_in_lexical_order_is_allowed() {
        let held = vec![(LockScope::Service, "alpha-service".to_string())];
        assert!(validate_ordering(LockScope::Service, "zeta-service", &held).is_ok());
    }

    #[test]
    fn no_held_locks_always_allowed() {
        assert!(validate_ordering(LockScope::System, "global", &[]).is_ok());
    }
}
