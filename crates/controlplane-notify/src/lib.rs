//! `NotifierSink` implementation: HMAC-signed webhook delivery (HMAC-SHA256
//! signature header, fire-and-forget philosophy, channel-typed payload
//! shaping). `send` blocks and returns a `DeliveryStatus` rather than
//! spawning a detached thread -- the orchestrator's audit trail needs to
//! know whether the page actually went out before it decides whether a
//! human was notified.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use controlplane_types::capability::{Channel, DeliveryStatus, NotifierSink, Severity};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Where and how to deliver notifications (spec §6). A single webhook URL
/// receives every channel's payload, shaped per channel -- this mirrors the
/// teacher's single-`WebhookConfig` design rather than one endpoint per
/// channel, which the spec does not require.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout: Duration,
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

#[derive(Debug, Serialize, Deserialize)]
struct NotificationPayload<'a> {
    timestamp: chrono::DateTime<Utc>,
    title: &'a str,
    message: &'a str,
    severity: Severity,
    channel: Channel,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<serde_json::Value>,
}

/// Blocking webhook client. One request per channel, same URL.
pub struct WebhookNotifier {
    client: reqwest::blocking::Client,
    config: WebhookConfig,
}

impl WebhookNotifier {
    pub fn new(config: WebhookConfig) -> Result<Self> {
        let client =
            reqwest::blocking::Client::builder().timeout(config.timeout).build().context("failed to build webhook client")?;
        Ok(Self { client, config })
    }

    fn deliver(&self, payload: &NotificationPayload<'_>) -> Result<()> {
        let json = serde_json::to_string(payload).context("failed to serialize notification payload")?;
        let mut request = self.client.post(&self.config.url).header("Content-Type", "application/json");

        if let Some(secret) = &self.config.secret {
            let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts a key of any size");
            mac.update(json.as_bytes());
            let signature = hex::encode(mac.finalize().into_bytes());
            request = request.header("X-Controlplane-Signature", format!("sha256={signature}"));
        }

        let response = request.body(json).send().context("failed to send webhook request")?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            anyhow::bail!("webhook returned {status}: {body}");
        }
        Ok(())
    }
}

impl NotifierSink for WebhookNotifier {
    fn send(
        &self,
        title: &str,
        message: &str,
        severity: Severity,
        channels: Option<&[Channel]>,
        metadata: Option<serde_json::Value>,
    ) -> Result<DeliveryStatus> {
        let channels = channels.unwrap_or(&[Channel::Slack]);
        let timestamp = Utc::now();
        let mut failures = Vec::new();

        for &channel in channels {
            let payload = NotificationPayload { timestamp, title, message, severity, channel, metadata: metadata.clone() };
            if let Err(e) = self.deliver(&payload) {
                failures.push(format!("{channel:?}: {e:#}"));
            }
        }

        if failures.is_empty() {
            Ok(DeliveryStatus { delivered: true, detail: None })
        } else {
            Ok(DeliveryStatus { delivered: false, detail: Some(failures.join("; ")) })
        }
    }
}

/// No-op sink for demos and tests where no webhook is configured (spec §6:
/// notification is best-effort, never a hard dependency of the control
/// loop). Grounded in the teacher's `maybe_send_event`'s disabled-by-default
/// posture, generalized into a real implementer of the trait instead of an
/// `if enabled` branch scattered at call sites.
#[derive(Debug, Default)]
pub struct NullNotifier;

impl NotifierSink for NullNotifier {
    fn send(
        &self,
        _title: &str,
        _message: &str,
        _severity: Severity,
        _channels: Option<&[Channel]>,
        _metadata: Option<serde_json::Value>,
    ) -> Result<DeliveryStatus> {
        Ok(DeliveryStatus { delivered: true, detail: None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn with_server<F>(handler: F) -> (String, thread::JoinHandle<()>)
    where
        F: FnOnce(tiny_http::Request) + Send + 'static,
    {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("server");
        let addr = format!("http://{}", server.server_addr());
        let handle = thread::spawn(move || {
            let req = server.recv().expect("request");
            handler(req);
        });
        (addr, handle)
    }

    #[test]
    fn delivers_to_configured_url_and_reports_success() {
        let (url, handle) = with_server(|req| {
            req.respond_with_status(tiny_http::StatusCode(200)).expect("respond");
        });

        let notifier = WebhookNotifier::new(WebhookConfig { url, secret: None, timeout: Duration::from_secs(5) }).unwrap();
        let status = notifier.send("deploy failed", "checkout rolled back", Severity::Error, None, None).unwrap();

        assert!(status.delivered);
        assert!(status.detail.is_none());
        handle.join().unwrap();
    }

    #[test]
    fn signs_payload_with_hmac_when_secret_present() {
        let (url, handle) = with_server(|mut req| {
            let mut body = String::new();
            std::io::Read::read_to_string(req.as_reader(), &mut body).unwrap();
            let sig = req.headers().iter().find(|h| h.field.equiv("X-Controlplane-Signature")).map(|h| h.value.as_str().to_string());
            assert!(sig.is_some(), "signature header missing");

            let mut mac = HmacSha256::new_from_slice(b"shared-secret").unwrap();
            mac.update(body.as_bytes());
            let expected = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));
            assert_eq!(sig, Some(expected));

            req.respond_with_status(tiny_http::StatusCode(200)).expect("respond");
        });

        let notifier = WebhookNotifier::new(WebhookConfig {
            url,
            secret: Some("shared-secret".to_string()),
            timeout: Duration::from_secs(5),
        })
        .unwrap();
        let status = notifier.send("title", "message", Severity::Warning, None, None).unwrap();

        assert!(status.delivered);
        handle.join().unwrap();
    }

    #[test]
    fn reports_failure_detail_on_non_success_status() {
        let (url, handle) = with_server(|req| {
            req.respond_with_status(tiny_http::StatusCode(500)).expect("respond");
        });

        let notifier = WebhookNotifier::new(WebhookConfig { url, secret: None, timeout: Duration::from_secs(5) }).unwrap();
        let status = notifier.send("title", "message", Severity::Critical, Some(&[Channel::Pagerduty]), None).unwrap();

        assert!(!status.delivered);
        assert!(status.detail.unwrap().contains("Pagerduty"));
        handle.join().unwrap();
    }

    #[test]
    fn null_notifier_always_reports_delivered() {
        let notifier = NullNotifier;
        let status = notifier.send("x", "y", Severity::Info, None, None).unwrap();
        assert!(status.delivered);
    }
}
