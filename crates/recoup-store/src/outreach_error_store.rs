//! Append-only diagnostic rows for per-invoice and per-step failures.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::db::Database;
use crate::error::StoreResult;

/// A failure about to be recorded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewOutreachError {
    pub run_id: Option<String>,
    pub stage: String,
    pub invoice_id: Option<String>,
    pub workflow_id: Option<String>,
    pub step_number: Option<u32>,
    /// Machine-readable category, e.g. `invalid_cadence`.
    pub kind: String,
    pub message: String,
    pub payload: Option<serde_json::Value>,
}

/// A recorded failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutreachError {
    pub id: i64,
    #[serde(flatten)]
    pub error: NewOutreachError,
    pub created_at: i64,
}

#[derive(Clone)]
pub struct OutreachErrorStore {
    db: Database,
}

impl OutreachErrorStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append one error row and return its id.
    #[instrument(skip(self, error), fields(stage = %error.stage, kind = %error.kind))]
    pub async fn record(&self, error: NewOutreachError) -> StoreResult<i64> {
        let now = Utc::now().timestamp();
        let payload = error
            .payload
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let id = self
            .db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO outreach_errors (run_id, stage, invoice_id, workflow_id, step_number, kind, message, payload, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    rusqlite::params![
                        error.run_id,
                        error.stage,
                        error.invoice_id,
                        error.workflow_id,
                        error.step_number,
                        error.kind,
                        error.message,
                        payload,
                        now,
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;

        debug!(error_id = id, "outreach error recorded");
        Ok(id)
    }

    /// Most recent errors, newest first.
    #[instrument(skip(self))]
    pub async fn recent(&self, limit: u32) -> StoreResult<Vec<OutreachError>> {
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, run_id, stage, invoice_id, workflow_id, step_number, kind, message, payload, created_at \
                     FROM outreach_errors ORDER BY id DESC LIMIT ?1",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![limit], |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            NewOutreachError {
                                run_id: row.get(1)?,
                                stage: row.get(2)?,
                                invoice_id: row.get(3)?,
                                workflow_id: row.get(4)?,
                                step_number: row.get(5)?,
                                kind: row.get(6)?,
                                message: row.get(7)?,
                                payload: None,
                            },
                            row.get::<_, Option<String>>(8)?,
                            row.get::<_, i64>(9)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;

                rows.into_iter()
                    .map(|(id, mut error, payload, created_at)| {
                        error.payload = payload
                            .as_deref()
                            .map(serde_json::from_str::<serde_json::Value>)
                            .transpose()?;
                        Ok(OutreachError {
                            id,
                            error,
                            created_at,
                        })
                    })
                    .collect()
            })
            .await
    }

    /// Number of errors recorded by one pipeline run.
    #[instrument(skip(self))]
    pub async fn count_for_run(&self, run_id: &str) -> StoreResult<i64> {
        let run_id = run_id.to_string();
        self.db
            .execute(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM outreach_errors WHERE run_id = ?1",
                    rusqlite::params![run_id],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await
    }
}

// ── tests ────────────────────────────────────────────────────────────
