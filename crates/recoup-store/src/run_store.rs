//! Pipeline run records: one row per stage attempt.

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

/// Lifecycle of a stage attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(StoreError::InvalidData {
                field: "run status",
                value: other.to_string(),
            }),
        }
    }
}

/// A persisted stage attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: String,
    pub stage: String,
    pub attempt: u32,
    pub status: RunStatus,
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub summary: Option<serde_json::Value>,
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct RunStore {
    db: Database,
}

impl RunStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Open a `running` record for `stage` and return its id.
    #[instrument(skip(self))]
    pub async fn start(&self, stage: &str, attempt: u32) -> StoreResult<String> {
        let id = Uuid::now_v7().to_string();
        let stage = stage.to_string();
        let now = Utc::now().timestamp();

        let run_id = id.clone();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO pipeline_runs (id, stage, attempt, status, started_at) \
                     VALUES (?1, ?2, ?3, 'running', ?4)",
                    rusqlite::params![run_id, stage, attempt, now],
                )?;
                Ok(())
            })
            .await?;

        debug!(run_id = %id, "pipeline run started");
        Ok(id)
    }

    /// Close a run with its final status, summary and error text.
    #[instrument(skip(self, summary, error))]
    pub async fn finish(
        &self,
        id: &str,
        status: RunStatus,
        summary: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> StoreResult<()> {
        if status == RunStatus::Running {
            return Err(StoreError::InvalidArgument(
                "a run cannot finish as running".into(),
            ));
        }

        let id = id.to_string();
        let summary = summary.map(serde_json::to_string).transpose()?;
        let error = error.map(str::to_string);
        let now = Utc::now().timestamp();

        self.db
            .execute(move |conn| {
                let updated = conn.execute(
                    "UPDATE pipeline_runs SET status = ?2, finished_at = ?3, summary = ?4, error = ?5 \
                     WHERE id = ?1",
                    rusqlite::params![id, status.as_str(), now, summary, error],
                )?;
                if updated == 0 {
                    return Err(StoreError::NotFound {
                        entity: "pipeline run",
                        id,
                    });
                }
                Ok(())
            })
            .await
    }

    /// Most recent runs, newest first.
    #[instrument(skip(self))]
    pub async fn recent(&self, limit: u32) -> StoreResult<Vec<PipelineRun>> {
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, stage, attempt, status, started_at, finished_at, summary, error \
                     FROM pipeline_runs ORDER BY started_at DESC, id DESC LIMIT ?1",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![limit], |row| {
                        Ok(RunRow {
                            id: row.get(0)?,
                            stage: row.get(1)?,
                            attempt: row.get(2)?,
                            status: row.get(3)?,
                            started_at: row.get(4)?,
                            finished_at: row.get(5)?,
                            summary: row.get(6)?,
                            error: row.get(7)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                rows.into_iter().map(RunRow::into_run).collect()
            })
            .await
    }
}

struct RunRow {
    id: String,
    stage: String,
    attempt: u32,
    status: String,
    started_at: i64,
    finished_at: Option<i64>,
    summary: Option<String>,
    error: Option<String>,
}

impl RunRow {
    fn into_run(self) -> StoreResult<PipelineRun> {
        Ok(PipelineRun {
            id: self.id,
            stage: self.stage,
            attempt: self.attempt,
            status: self.status.parse()?,
            started_at: self.started_at,
            finished_at: self.finished_at,
            summary: self
                .summary
                .as_deref()
                .map(serde_json::from_str::<serde_json::Value>)
                .transpose()?,
            error: self.error,
        })
    }
}

// ── tests ────────────────────────────────────────────────────────────
