//! Deterministic JSON serialization, shared by the audit log's hash chain
//! (spec §4.1) and the safety artifact's self-hash (spec §6).
//!
//! `serde_json::to_string` does not sort object keys by default. The
//! original prototype relies on Python's `json.dumps(..., sort_keys=True)`
//! for a reproducible hash input; this module reproduces that guarantee by
//! routing through a `BTreeMap`, which iterates keys in sorted order.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Serializes `value` to JSON with object keys sorted at every nesting
/// level, matching Python's `json.dumps(obj, sort_keys=True)`.
pub fn canonical_json<T: Serialize>(value: &T) -> serde_json::Result<String> {
    let raw = serde_json::to_value(value)?;
    let sorted = sort_value(raw);
    serde_json::to_string(&sorted)
}

fn sort_value(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let sorted: std::collections::BTreeMap<String, serde_json::Value> = map
                .into_iter()
                .map(|(k, v)| (k, sort_value(v)))
                .collect();
            let mut out = serde_json::Map::new();
            for (k, v) in sorted {
                out.insert(k, v);
            }
            serde_json::Value::Object(out)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(sort_value).collect())
        }
        other => other,
    }
}

/// `SHA-256(previous_hash || ":" || canonical_json(value))`, hex-encoded.
/// Used both for audit-event chaining (previous hash = last event's hash,
/// genesis = the literal string `"GENESIS"`) and could be reused for any
/// other hash-chained structure.
pub fn chained_hash<T: Serialize>(previous_hash: &str, value: &T) -> serde_json::Result<String> {
    let json = canonical_json(value)?;
    let combined = format!("{previous_hash}:{json}");
    let mut hasher = Sha256::new();
    hasher.update(combined.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

pub const GENESIS_HASH: &str = "GENESIS";
