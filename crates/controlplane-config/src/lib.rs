//! Configuration loading for the self-healing control plane (spec §6
//! "Configuration").
//!
//! A single TOML document,
//! `serde(default)` on every section so partial configs are valid, and a
//! `Config::new`/`load` split between "pure defaults" and "read from
//! disk". Environment-variable expansion (spec §6: "supports
//! environment-variable expansion") is applied to the raw TOML text
//! before parsing, since `toml`'s deserializer has no such hook -- a
//! small `${VAR}` / `${VAR:-default}` substitution pass, not a full
//! shell-style expander.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE: &str = "controlplane.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing closing brace in environment variable reference: {0}")]
    UnterminatedReference(String),
    #[error("environment variable {0} is not set and no default was given")]
    MissingVariable(String),
}

/// Complete control-plane configuration (spec §6 "Configuration" keys:
/// metric thresholds, lock timeouts, canary stages, rollback thresholds,
/// verification budgets, service-criticality table, resource-group
/// membership).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub locks: LockConfig,
    #[serde(default)]
    pub canary: CanaryConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub verification: VerificationBudgetConfig,
    #[serde(default)]
    pub rollback: RollbackConfig,
    #[serde(default)]
    pub services: ServiceRegistryConfig,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub wait_timeout_secs: u64,
    pub ttl_secs: u64,
    pub total_operation_timeout_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self { wait_timeout_secs: 30, ttl_secs: 300, total_operation_timeout_secs: 600 }
    }
}

impl LockConfig {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.ttl_secs as i64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CanaryConfig {
    pub stages_pct: Vec<u8>,
    pub wait_seconds: u64,
    pub max_failures: u32,
}

impl Default for CanaryConfig {
    fn default() -> Self {
        Self { stages_pct: vec![5, 25, 50, 100], wait_seconds: 60, max_failures: 1 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    pub max_error_rate_pct: f64,
    pub max_blast_radius_pct: f64,
    pub min_deploy_interval_secs: u64,
    pub max_risk_score: f64,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_error_rate_pct: 2.0,
            max_blast_radius_pct: 25.0,
            min_deploy_interval_secs: 3600,
            max_risk_score: 75.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationBudgetConfig {
    pub stabilize_seconds: u64,
    pub max_time_minutes: u64,
    pub max_user_impact_pct: f64,
    pub max_error_budget_pct: f64,
    pub residual_control_pct: f64,
    pub improvement_threshold: f64,
    pub degradation_threshold: f64,
    pub significance_level: f64,
}

impl Default for VerificationBudgetConfig {
    fn default() -> Self {
        Self {
            stabilize_seconds: 120,
            max_time_minutes: 10,
            max_user_impact_pct: 5.0,
            max_error_budget_pct: 2.0,
            residual_control_pct: 10.0,
            improvement_threshold: 0.10,
            degradation_threshold: 0.05,
            significance_level: 0.05,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RollbackConfig {
    pub critical_error_rate_pct: f64,
    pub high_error_rate_pct: f64,
    pub critical_blast_radius_pct: f64,
    pub high_blast_radius_pct: f64,
}

impl Default for RollbackConfig {
    fn default() -> Self {
        Self {
            critical_error_rate_pct: 5.0,
            high_error_rate_pct: 2.0,
            critical_blast_radius_pct: 10.0,
            high_blast_radius_pct: 5.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceRegistryConfig {
    /// Base service name (e.g. `"payment"` for `"payment-service"`) to
    /// criticality in `[0,1]` (spec §3 Service.criticality_score).
    pub criticality: HashMap<String, f64>,
    /// Named resource groups: group name to member service names (spec
    /// §4.4 SHARED_RESOURCE classification).
    pub resource_groups: HashMap<String, Vec<String>>,
}

impl Default for ServiceRegistryConfig {
    fn default() -> Self {
        let mut criticality = HashMap::new();
        for (name, score) in [
            ("payment", 0.95),
            ("auth", 0.95),
            ("user", 0.80),
            ("order", 0.75),
            ("search", 0.60),
            ("recommendation", 0.50),
            ("analytics", 0.30),
        ] {
            criticality.insert(name.to_string(), score);
        }
        Self { criticality, resource_groups: HashMap::new() }
    }
}

impl ServiceRegistryConfig {
    /// Criticality for `service_name`, matched by its base name (the
    /// prefix before the first `-`), defaulting to 0.5 (spec §4.10
    /// `criticality(service)`, mirroring the original's `_get_service_criticality`).
    pub fn criticality_for(&self, service_name: &str) -> f64 {
        let base = service_name.split('-').next().unwrap_or(service_name).to_lowercase();
        self.criticality.get(&base).copied().unwrap_or(0.50)
    }
}

/// Expands `${VAR}` and `${VAR:-default}` references in `raw` against the
/// process environment (spec §6 "supports environment-variable
/// expansion"). Unset variables without a default are an error rather
/// than silently empty, so a misconfigured deployment fails fast at
/// load time instead of at first use.
pub fn expand_env(raw: &str) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or_else(|| ConfigError::UnterminatedReference(after.to_string()))?;
        let reference = &after[..end];
        let resolved = if let Some((name, default)) = reference.split_once(":-") {
            std::env::var(name).unwrap_or_else(|_| default.to_string())
        } else {
            std::env::var(reference).map_err(|_| ConfigError::MissingVariable(reference.to_string()))?
        };
        out.push_str(&resolved);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

pub fn config_path(dir: &Path) -> std::path::PathBuf {
    dir.join(CONFIG_FILE)
}

/// Loads and parses a config file, expanding environment variables first
/// (spec §6 "Loaded once at startup").
pub fn load_config(path: &Path) -> Result<Config> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading config at {}", path.display()))?;
    let expanded = expand_env(&raw).with_context(|| format!("expanding environment variables in {}", path.display()))?;
    toml::from_str(&expanded).with_context(|| format!("parsing config at {}", path.display()))
}
