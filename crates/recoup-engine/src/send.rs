//! The hand-off to the external delivery stage.
//!
//! Delivery itself lives outside this system. At the end of a run the
//! pipeline calls a [`SendTrigger`]; the count it reports is informational.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use url::Url;

use crate::config::SendTriggerConfig;
use crate::error::{EngineError, Result};

/// What the delivery stage reported.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendSummary {
    /// `false` when no delivery endpoint is configured.
    pub triggered: bool,
    /// Messages the delivery stage says it sent.
    pub sent: u64,
}

/// Invokes the downstream delivery stage.
#[async_trait]
pub trait SendTrigger: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    async fn trigger(&self) -> Result<SendSummary>;
}

/// Build the trigger described by `config`: HTTP when a URL is set,
/// otherwise a no-op.
pub fn from_config(config: &SendTriggerConfig) -> Result<Box<dyn SendTrigger>> {
    match &config.url {
        Some(url) => Ok(Box::new(HttpSendTrigger::new(
            url,
            Duration::from_secs(config.timeout_secs),
        )?)),
        None => Ok(Box::new(NoopSendTrigger)),
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  HTTP
// ═══════════════════════════════════════════════════════════════════════

#[derive(Deserialize)]
struct SendResponse {
    #[serde(default)]
    sent: u64,
}

/// POSTs `{}` to the delivery service and reads `{"sent": n}` back.
pub struct HttpSendTrigger {
    client: reqwest::Client,
    url: Url,
}

impl HttpSendTrigger {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let url = Url::parse(url).map_err(|e| EngineError::InvalidConfig {
            field: "send.url",
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(EngineError::InvalidConfig {
                field: "send.url",
                reason: format!("unsupported scheme `{}`", url.scheme()),
            });
        }

        let client = reqwest::Client::builder()
            .user_agent(concat!("recoup/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::InvalidConfig {
                field: "send.timeout_secs",
                reason: e.to_string(),
            })?;

        Ok(Self { client, url })
    }
}

#[async_trait]
impl SendTrigger for HttpSendTrigger {
    fn name(&self) -> &str {
        "http"
    }

    #[instrument(skip(self), fields(url = %self.url))]
    async fn trigger(&self) -> Result<SendSummary> {
        let response = self
            .client
            .post(self.url.clone())
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|e| EngineError::SendFailed {
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::SendFailed {
                reason: format!("delivery service answered {status}"),
            });
        }

        let body: SendResponse = response.json().await.map_err(|e| EngineError::SendFailed {
            reason: format!("unreadable response: {e}"),
        })?;

        info!(sent = body.sent, "send stage triggered");
        Ok(SendSummary {
            triggered: true,
            sent: body.sent,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  No-op
// ═══════════════════════════════════════════════════════════════════════

/// Used when no delivery endpoint is configured.
#[derive(Debug, Default)]
pub struct NoopSendTrigger;

#[async_trait]
impl SendTrigger for NoopSendTrigger {
    fn name(&self) -> &str {
        "noop"
    }

    async fn trigger(&self) -> Result<SendSummary> {
        debug!("no delivery endpoint configured; skipping send");
        Ok(SendSummary::default())
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_reports_not_triggered() {
        let summary = NoopSendTrigger.trigger().await.unwrap();
        assert!(!summary.triggered);
        assert_eq!(summary.sent, 0);
    }

    #[test]
    fn from_config_without_url_is_noop() {
        let trigger = from_config(&SendTriggerConfig::default()).unwrap();
        assert_eq!(trigger.name(), "noop");
    }

    #[test]
    fn invalid_urls_are_rejected() {
        assert!(HttpSendTrigger::new("not a url", Duration::from_secs(1)).is_err());
        assert!(HttpSendTrigger::new("ftp://host/send", Duration::from_secs(1)).is_err());
        assert!(HttpSendTrigger::new("http://127.0.0.1:9/send", Duration::from_secs(1)).is_ok());
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_send_failure() {
        // Port 9 (discard) is closed on test machines.
        let trigger = HttpSendTrigger::new("http://127.0.0.1:9/send", Duration::from_secs(2)).unwrap();
        let result = trigger.trigger().await;
        assert!(matches!(result, Err(EngineError::SendFailed { .. })));
    }
}
