//! Error sink for per-invoice and per-step failures.
//!
//! Every failure becomes an `outreach_errors` row and is counted; the first
//! few are also kept for the stage summary. Recording never fails the
//! caller: if the row cannot be written the failure is logged instead.

use recoup_store::{NewOutreachError, OutreachErrorStore};
use serde::Serialize;
use tracing::{error, warn};

/// Failure categories written to `outreach_errors.kind`.
pub mod kind {
    pub const INVALID_CADENCE: &str = "invalid_cadence";
    pub const EMPTY_TEMPLATE: &str = "empty_template";
    pub const TEMPLATE_LOOKUP_FAILED: &str = "template_lookup_failed";
    pub const WORKFLOW_WRITE_FAILED: &str = "workflow_write_failed";
    pub const MESSAGE_LOOKUP_FAILED: &str = "message_lookup_failed";
    pub const DRAFT_INSERT_FAILED: &str = "draft_insert_failed";
    pub const CURSOR_PERSIST_FAILED: &str = "cursor_persist_failed";
}

/// One failure as echoed in a stage summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorDetail {
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_number: Option<u32>,
}

/// What went wrong and where.
#[derive(Debug, Clone, Default)]
pub struct Failure {
    pub kind: &'static str,
    pub message: String,
    pub invoice_id: Option<String>,
    pub workflow_id: Option<String>,
    pub step_number: Option<u32>,
    pub payload: Option<serde_json::Value>,
}

impl Failure {
    pub fn new(kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn invoice(mut self, invoice_id: &str) -> Self {
        self.invoice_id = Some(invoice_id.to_string());
        self
    }

    pub fn workflow(mut self, workflow_id: &str) -> Self {
        self.workflow_id = Some(workflow_id.to_string());
        self
    }

    pub fn step(mut self, step_number: u32) -> Self {
        self.step_number = Some(step_number);
        self
    }

    pub fn payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// Collects failures for one stage attempt.
pub struct ErrorSink {
    store: OutreachErrorStore,
    run_id: String,
    stage: &'static str,
    max_details: usize,
    count: u64,
    details: Vec<ErrorDetail>,
}

impl ErrorSink {
    pub fn new(
        store: OutreachErrorStore,
        run_id: impl Into<String>,
        stage: &'static str,
        max_details: usize,
    ) -> Self {
        Self {
            store,
            run_id: run_id.into(),
            stage,
            max_details,
            count: 0,
            details: Vec::new(),
        }
    }

    /// Record one failure.
    pub async fn record(&mut self, failure: Failure) {
        self.count += 1;
        warn!(
            stage = self.stage,
            kind = failure.kind,
            invoice_id = failure.invoice_id.as_deref().unwrap_or("-"),
            step = failure.step_number,
            message = %failure.message,
            "outreach error"
        );

        if self.details.len() < self.max_details {
            self.details.push(ErrorDetail {
                kind: failure.kind.to_string(),
                message: failure.message.clone(),
                invoice_id: failure.invoice_id.clone(),
                workflow_id: failure.workflow_id.clone(),
                step_number: failure.step_number,
            });
        }

        let row = NewOutreachError {
            run_id: Some(self.run_id.clone()),
            stage: self.stage.to_string(),
            invoice_id: failure.invoice_id,
            workflow_id: failure.workflow_id,
            step_number: failure.step_number,
            kind: failure.kind.to_string(),
            message: failure.message,
            payload: failure.payload,
        };
        if let Err(e) = self.store.record(row).await {
            error!(stage = self.stage, error = %e, "failed to persist outreach error");
        }
    }

    /// Failures recorded so far.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// The first `max_details` failures.
    pub fn details(&self) -> &[ErrorDetail] {
        &self.details
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use recoup_store::Database;

    #[tokio::test]
    async fn records_rows_and_caps_details() {
        let db = Database::in_memory_migrated().await.unwrap();
        let store = OutreachErrorStore::new(db);
        let mut sink = ErrorSink::new(store.clone(), "run-1", "generate_drafts", 2);

        for i in 0..3u32 {
            sink.record(
                Failure::new(kind::DRAFT_INSERT_FAILED, format!("failure {i}"))
                    .invoice("inv-1")
                    .workflow("wf-1")
                    .step(i + 1),
            )
            .await;
        }

        assert_eq!(sink.count(), 3);
        assert_eq!(sink.details().len(), 2);
        assert_eq!(sink.details()[1].step_number, Some(2));

        let rows = store.recent(10).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].error.run_id.as_deref(), Some("run-1"));
        assert_eq!(rows[0].error.stage, "generate_drafts");
    }
}
