//! REST API route handlers.
//!
//! Provides endpoints for running pipeline stages, system status, pipeline
//! run records and recorded outreach errors.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use recoup_engine::{EngineError, Stage};
use recoup_store::PipelineRun;

use crate::state::AppState;

const DEFAULT_LIMIT: u32 = 20;
const MAX_LIMIT: u32 = 200;

fn error_body(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "error": message.into() })))
}

// ---------------------------------------------------------------------------
// POST /api/stages/{stage}
// ---------------------------------------------------------------------------

/// Optional request body for a stage run. An empty body means "chain into
/// the later stages, as of today".
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunStageBody {
    pub chain: bool,
    /// Evaluate aging and cadence as of this date instead of today (UTC).
    pub today: Option<NaiveDate>,
}

impl Default for RunStageBody {
    fn default() -> Self {
        Self {
            chain: true,
            today: None,
        }
    }
}

fn parse_body(body: &[u8]) -> Result<RunStageBody, serde_json::Error> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(RunStageBody::default());
    }
    serde_json::from_slice(body)
}

/// Run a stage and answer with its outcome tree.
///
/// 200 when every stage completed, 500 when one failed (its partial counts
/// are in the tree), 409 while another run holds the lock.
pub async fn run_stage(
    State(state): State<Arc<AppState>>,
    Path(stage): Path<String>,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let stage: Stage = match stage.parse() {
        Ok(stage) => stage,
        Err(e) => return error_body(StatusCode::NOT_FOUND, e.to_string()),
    };
    let request = match parse_body(&body) {
        Ok(request) => request,
        Err(e) => {
            return error_body(StatusCode::BAD_REQUEST, format!("malformed body: {e}"));
        }
    };
    let today = request.today.unwrap_or_else(|| Utc::now().date_naive());

    match state.pipeline.run(stage, request.chain, today).await {
        Ok(outcome) => {
            let status = if outcome.succeeded() {
                StatusCode::OK
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            match serde_json::to_value(&outcome) {
                Ok(body) => (status, Json(body)),
                Err(e) => error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            }
        }
        Err(EngineError::Busy) => {
            tracing::info!(stage = %stage, "stage request rejected: run in progress");
            error_body(StatusCode::CONFLICT, EngineError::Busy.to_string())
        }
        Err(e) => {
            tracing::error!(stage = %stage, error = %e, "stage request failed");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// GET /api/status
// ---------------------------------------------------------------------------

/// Response payload for the `/api/status` endpoint.
#[derive(Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub database: bool,
    /// A pipeline run is in progress.
    pub busy: bool,
    pub active_workflows: Option<i64>,
    pub drafts: BTreeMap<&'static str, i64>,
    pub last_runs: Vec<PipelineRun>,
}

/// Database health, version and the latest run records.
pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let database = match state.db.ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "database health check failed");
            false
        }
    };

    let active_workflows = state.workflows.count_active().await.ok();
    let drafts = state
        .drafts
        .count_by_status()
        .await
        .map(|counts| {
            counts
                .into_iter()
                .map(|(status, count)| (status.as_str(), count))
                .collect()
        })
        .unwrap_or_default();
    let last_runs = state.runs.recent(3).await.unwrap_or_default();

    Json(StatusResponse {
        status: if database { "healthy" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        database,
        busy: state.pipeline.is_busy(),
        active_workflows,
        drafts,
        last_runs,
    })
}

// ---------------------------------------------------------------------------
// GET /api/runs, GET /api/errors
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<u32>,
}

impl LimitQuery {
    fn limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

/// GET /api/runs: most recent pipeline runs, newest first.
pub async fn list_runs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LimitQuery>,
) -> (StatusCode, Json<Value>) {
    match state.runs.recent(query.limit()).await {
        Ok(runs) => (StatusCode::OK, Json(json!(runs))),
        Err(e) => error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// GET /api/errors: most recent outreach errors, newest first.
pub async fn list_errors(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LimitQuery>,
) -> (StatusCode, Json<Value>) {
    match state.errors.recent(query.limit()).await {
        Ok(errors) => (StatusCode::OK, Json(json!(errors))),
        Err(e) => error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_body_chains_as_of_today() {
        let body = parse_body(b"").unwrap();
        assert!(body.chain);
        assert!(body.today.is_none());
        assert!(parse_body(b"  \n").unwrap().chain);
    }

    #[test]
    fn body_fields_are_read() {
        let body = parse_body(br#"{"chain": false, "today": "2026-03-01"}"#).unwrap();
        assert!(!body.chain);
        assert_eq!(body.today, NaiveDate::from_ymd_opt(2026, 3, 1));
    }

    #[test]
    fn malformed_bodies_are_rejected() {
        assert!(parse_body(b"{").is_err());
        assert!(parse_body(br#"{"today": "yesterday"}"#).is_err());
        assert!(parse_body(br#"{"force": true}"#).is_err());
    }

    #[test]
    fn limits_are_clamped() {
        assert_eq!(LimitQuery::default().limit(), DEFAULT_LIMIT);
        assert_eq!(LimitQuery { limit: Some(0) }.limit(), 1);
        assert_eq!(LimitQuery { limit: Some(10_000) }.limit(), MAX_LIMIT);
    }
}
