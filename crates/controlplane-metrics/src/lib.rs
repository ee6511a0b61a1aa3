//! Metrics backend client and health gate evaluator (spec §4.7, §6).
//!
//! [`HttpMetricBackend`] implements [`controlplane_types::MetricBackend`]
//! against a Prometheus-compatible HTTP API: a thin wrapper around a
//! blocking [`reqwest::blocking::Client`], `anyhow::Context` on every
//! fallible step, and `StatusCode` matched explicitly rather than just
//! `error_for_status()`.
//!
//! [`HealthGateEvaluator`] implements `controlplane-deploy`'s
//! `CanaryHealthGate` against the six standard gates (spec §4.7), querying
//! `(service, version)`-labeled series over a 5-minute window.

use std::time::Duration as StdDuration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use controlplane_types::{GateStatus, MetricBackend};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("metrics backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("no data for query: {0}")]
    NoData(String),
}

/// Blocking HTTP client against a Prometheus-shaped instant/range query API.
pub struct HttpMetricBackend {
    base_url: String,
    http: Client,
}

impl HttpMetricBackend {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .user_agent(format!("controlplane-metrics/{}", env!("CARGO_PKG_VERSION")))
            .timeout(StdDuration::from_secs(10))
            .build()
            .context("failed to build metrics HTTP client")?;
        Ok(Self { base_url: base_url.into(), http })
    }

    fn query_instant(&self, query: &str) -> Result<f64> {
        let url = format!("{}/api/v1/query", self.base_url);
        let resp = self
            .http
            .get(&url)
            .query(&[("query", query)])
            .send()
            .with_context(|| format!("instant query request failed: {query}"))?;
        match resp.status() {
            StatusCode::OK => {
                let body: serde_json::Value =
                    resp.json().context("instant query response was not valid JSON")?;
                extract_scalar(&body).ok_or_else(|| MetricsError::NoData(query.to_string()).into())
            }
            s => bail!("unexpected status from metrics backend: {s}"),
        }
    }

    fn query_range(
        &self,
        query: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: Duration,
    ) -> Result<Vec<(DateTime<Utc>, f64)>> {
        let url = format!("{}/api/v1/query_range", self.base_url);
        let resp = self
            .http
            .get(&url)
            .query(&[
                ("query", query.to_string()),
                ("start", start.timestamp().to_string()),
                ("end", end.timestamp().to_string()),
                ("step", format!("{}s", step.num_seconds().max(1))),
            ])
            .send()
            .with_context(|| format!("range query request failed: {query}"))?;
        match resp.status() {
            StatusCode::OK => {
                let body: serde_json::Value =
                    resp.json().context("range query response was not valid JSON")?;
                Ok(extract_series(&body))
            }
            s => bail!("unexpected status from metrics backend: {s}"),
        }
    }
}

impl MetricBackend for HttpMetricBackend {
    fn instant(&self, query: &str) -> Result<f64> {
        self.query_instant(query)
    }

    fn range(
        &self,
        query: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: Duration,
    ) -> Result<Vec<(DateTime<Utc>, f64)>> {
        self.query_range(query, start, end, step)
    }
}

fn extract_scalar(body: &serde_json::Value) -> Option<f64> {
    let value = body.pointer("/data/result/0/value/1")?;
    value.as_str().and_then(|s| s.parse().ok()).or_else(|| value.as_f64())
}

fn extract_series(body: &serde_json::Value) -> Vec<(DateTime<Utc>, f64)> {
    let Some(values) = body.pointer("/data/result/0/values").and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    values
        .iter()
        .filter_map(|pair| {
            let pair = pair.as_array()?;
            let ts = pair.first()?.as_f64()?;
            let v: f64 = pair.get(1)?.as_str()?.parse().ok()?;
            Some((DateTime::from_timestamp(ts as i64, 0)?, v))
        })
        .collect()
}

/// In-memory backend for tests and local/offline evaluation.
#[derive(Default)]
pub struct FakeMetricBackend {
    pub instants: std::collections::HashMap<String, f64>,
}

impl MetricBackend for FakeMetricBackend {
    fn instant(&self, query: &str) -> Result<f64> {
        self.instants
            .get(query)
            .copied()
            .ok_or_else(|| MetricsError::NoData(query.to_string()).into())
    }

    fn range(
        &self,
        _query: &str,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
        _step: Duration,
    ) -> Result<Vec<(DateTime<Utc>, f64)>> {
        Ok(vec![])
    }
}

#[derive(Debug, Clone)]
pub struct GateThresholds {
    pub error_rate_baseline_factor: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
    pub cpu_saturation: f64,
    pub memory_saturation: f64,
    pub request_rate_drop_factor: f64,
}

impl Default for GateThresholds {
    fn default() -> Self {
        Self {
            error_rate_baseline_factor: 1.1,
            p95_latency_ms: 500.0,
            p99_latency_ms: 1000.0,
            cpu_saturation: 0.8,
            memory_saturation: 0.9,
            request_rate_drop_factor: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateCriticality {
    Critical,
    NonCritical,
}

#[derive(Debug, Clone)]
pub struct SingleGateResult {
    pub name: String,
    pub status: GateStatus,
    pub criticality: GateCriticality,
}

#[derive(Debug, Clone)]
pub struct HealthEvaluation {
    pub gates: Vec<SingleGateResult>,
    pub overall_passed: bool,
}

/// Evaluates the six standard health gates (spec §4.7) for `(service,
/// version)` against `(baseline_service, baseline_version)` over a 5-minute
/// window ending now.
pub struct HealthGateEvaluator<'a> {
    pub backend: &'a dyn MetricBackend,
    pub thresholds: GateThresholds,
}

fn error_rate_query(service: &str, version: &str) -> String {
    format!(
        "sum(rate(http_requests_total{{service=\"{service}\",version=\"{version}\",status=~\"5..\"}}[5m])) / sum(rate(http_requests_total{{service=\"{service}\",version=\"{version}\"}}[5m]))"
    )
}

fn latency_query(service: &str, version: &str, quantile: &str) -> String {
    format!(
        "histogram_quantile({quantile}, sum(rate(http_request_duration_seconds_bucket{{service=\"{service}\",version=\"{version}\"}}[5m])) by (le)) * 1000"
    )
}

fn cpu_query(service: &str, version: &str) -> String {
    format!("avg(rate(container_cpu_usage_seconds_total{{service=\"{service}\",version=\"{version}\"}}[5m]))")
}

fn memory_query(service: &str, version: &str) -> String {
    format!("avg(container_memory_working_set_bytes{{service=\"{service}\",version=\"{version}\"}} / container_spec_memory_limit_bytes{{service=\"{service}\",version=\"{version}\"}})")
}

fn request_rate_query(service: &str, version: &str) -> String {
    format!("sum(rate(http_requests_total{{service=\"{service}\",version=\"{version}\"}}[5m]))")
}

impl<'a> HealthGateEvaluator<'a> {
    fn threshold_gate(&self, value_query: &str, threshold: f64, higher_is_worse: bool) -> (GateStatus, Option<f64>) {
        match self.backend.instant(value_query) {
            Err(_) => (GateStatus::Unknown, None),
            Ok(value) => {
                let passed = if higher_is_worse { value <= threshold } else { value >= threshold };
                if passed {
                    (GateStatus::Passed, Some(value))
                } else {
                    (
                        GateStatus::Failed { detail: format!("value {value:.3} vs threshold {threshold:.3}") },
                        Some(value),
                    )
                }
            }
        }
    }

    pub fn evaluate(&self, service: &str, version: &str, baseline_version: &str) -> HealthEvaluation {
        let mut gates = Vec::new();

        // Error rate < 110% of baseline.
        let baseline_error_rate = self.backend.instant(&error_rate_query(service, baseline_version)).ok();
        let (status, _) = match baseline_error_rate {
            Some(baseline) => self.threshold_gate(
                &error_rate_query(service, version),
                baseline * self.thresholds.error_rate_baseline_factor,
                true,
            ),
            None => (GateStatus::Unknown, None),
        };
        gates.push(SingleGateResult { name: "error_rate".to_string(), status, criticality: GateCriticality::Critical });

        let (status, _) =
            self.threshold_gate(&latency_query(service, version, "0.95"), self.thresholds.p95_latency_ms, true);
        gates.push(SingleGateResult { name: "p95_latency".to_string(), status, criticality: GateCriticality::Critical });

        let (status, _) =
            self.threshold_gate(&latency_query(service, version, "0.99"), self.thresholds.p99_latency_ms, true);
        gates.push(SingleGateResult { name: "p99_latency".to_string(), status, criticality: GateCriticality::NonCritical });

        let (status, _) = self.threshold_gate(&cpu_query(service, version), self.thresholds.cpu_saturation, true);
        gates.push(SingleGateResult { name: "cpu_saturation".to_string(), status, criticality: GateCriticality::NonCritical });

        let (status, _) =
            self.threshold_gate(&memory_query(service, version), self.thresholds.memory_saturation, true);
        gates.push(SingleGateResult { name: "memory_saturation".to_string(), status, criticality: GateCriticality::NonCritical });

        let baseline_rate = self.backend.instant(&request_rate_query(service, baseline_version)).ok();
        let (status, _) = match baseline_rate {
            Some(baseline) => self.threshold_gate(
                &request_rate_query(service, version),
                baseline * self.thresholds.request_rate_drop_factor,
                false,
            ),
            None => (GateStatus::Unknown, None),
        };
        gates.push(SingleGateResult { name: "request_rate".to_string(), status, criticality: GateCriticality::NonCritical });

        // Overall pass requires zero failed gates, critical or not (spec
        // §4.7 "zero failed critical gates and zero failed non-critical
        // gates").
        let overall_passed = gates.iter().all(|g| !matches!(g.status, GateStatus::Failed { .. }));

        HealthEvaluation { gates, overall_passed }
    }
}
