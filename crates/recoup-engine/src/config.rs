//! Engine configuration.
//!
//! Every field has a default, so a partial `[engine]` table in the TOML
//! config (or none at all) yields a working engine.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{EngineError, Result};

/// Tuning knobs for the assignment and draft stages and the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Rows fetched per keyset page.
    pub page_size: u32,
    /// Invoices the assignment stage processes per run before it stops and
    /// persists its cursor.
    pub max_invoices_per_run: u64,
    /// Active workflows the draft stage processes per run.
    pub max_workflows_per_run: u64,
    /// Error details echoed in a stage summary (all errors are still
    /// recorded in the error sink).
    pub max_reported_errors: usize,
    /// Entry cap of the per-run template resolution cache.
    pub template_cache_capacity: u64,
    /// Base for invoice links when an invoice has no payment link of its
    /// own; the invoice id is appended.
    pub invoice_link_base: String,
    /// Attempts per stage before the chain stops.
    pub stage_max_attempts: u32,
    /// Delay before the second attempt; doubles for each further attempt.
    pub retry_backoff_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            page_size: 500,
            max_invoices_per_run: 50_000,
            max_workflows_per_run: 50_000,
            max_reported_errors: 20,
            template_cache_capacity: 1_024,
            invoice_link_base: "https://app.example.com/invoices".into(),
            stage_max_attempts: 3,
            retry_backoff_ms: 200,
        }
    }
}

impl EngineConfig {
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_max_invoices_per_run(mut self, cap: u64) -> Self {
        self.max_invoices_per_run = cap;
        self
    }

    pub fn with_max_workflows_per_run(mut self, cap: u64) -> Self {
        self.max_workflows_per_run = cap;
        self
    }

    pub fn with_retry(mut self, max_attempts: u32, backoff_ms: u64) -> Self {
        self.stage_max_attempts = max_attempts;
        self.retry_backoff_ms = backoff_ms;
        self
    }

    /// Backoff before attempt `attempt + 1`, given that `attempt` failed.
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(factor))
    }

    /// Build the link for an invoice without its own payment link.
    pub fn invoice_link(&self, invoice_id: &str) -> String {
        format!("{}/{invoice_id}", self.invoice_link_base.trim_end_matches('/'))
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(EngineError::InvalidConfig {
                field: "engine.page_size",
                reason: "must be at least 1".into(),
            });
        }
        if self.stage_max_attempts == 0 {
            return Err(EngineError::InvalidConfig {
                field: "engine.stage_max_attempts",
                reason: "must be at least 1".into(),
            });
        }
        Url::parse(&self.invoice_link_base).map_err(|e| EngineError::InvalidConfig {
            field: "engine.invoice_link_base",
            reason: e.to_string(),
        })?;
        Ok(())
    }
}

/// Where the send stage posts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SendTriggerConfig {
    /// Delivery service endpoint. `None` disables the HTTP call.
    pub url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for SendTriggerConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: 30,
        }
    }
}

/// Recurring full-pipeline runs inside `serve`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub enabled: bool,
    /// 6/7-field cron expression (5-field input is accepted).
    pub cron: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cron: "0 0 6 * * *".into(),
        }
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.page_size, 500);
        assert_eq!(config.max_invoices_per_run, 50_000);
    }

    #[test]
    fn partial_table_fills_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{ "page_size": 50 }"#).unwrap();
        assert_eq!(config.page_size, 50);
        assert_eq!(config.stage_max_attempts, 3);
    }

    #[test]
    fn zero_page_size_is_rejected() {
        let config = EngineConfig::default().with_page_size(0);
        assert!(matches!(
            config.validate(),
            Err(EngineError::InvalidConfig { field: "engine.page_size", .. })
        ));
    }

    #[test]
    fn bad_link_base_is_rejected() {
        let config = EngineConfig {
            invoice_link_base: "not a url".into(),
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn backoff_doubles() {
        let config = EngineConfig::default().with_retry(4, 100);
        assert_eq!(config.backoff_after(1), Duration::from_millis(100));
        assert_eq!(config.backoff_after(2), Duration::from_millis(200));
        assert_eq!(config.backoff_after(3), Duration::from_millis(400));
    }

    #[test]
    fn invoice_link_joins_cleanly() {
        let config = EngineConfig {
            invoice_link_base: "https://app.test/i/".into(),
            ..EngineConfig::default()
        };
        assert_eq!(config.invoice_link("inv-1"), "https://app.test/i/inv-1");
    }
}
