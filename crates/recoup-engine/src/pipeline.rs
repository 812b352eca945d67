//! The staged pipeline: `assign_workflows -> generate_drafts -> trigger_send`.
//!
//! Each stage can be started on its own and optionally chains into the
//! stages after it. Every attempt is recorded in `pipeline_runs`. A stage
//! that aborts is retried with exponential backoff; one that still fails
//! stops the chain. An in-process lock keeps runs from overlapping.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use recoup_store::{Database, RunStatus, RunStore};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::assignment::{AssignmentSummary, WorkflowAssigner};
use crate::config::EngineConfig;
use crate::drafts::{DraftGenerator, DraftSummary};
use crate::error::{EngineError, Result, StageAbort};
use crate::send::{SendSummary, SendTrigger};

// ═══════════════════════════════════════════════════════════════════════
//  Types
// ═══════════════════════════════════════════════════════════════════════

/// A pipeline stage, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    AssignWorkflows,
    GenerateDrafts,
    TriggerSend,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Self::AssignWorkflows, Self::GenerateDrafts, Self::TriggerSend];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::AssignWorkflows => "assign_workflows",
            Self::GenerateDrafts => "generate_drafts",
            Self::TriggerSend => "trigger_send",
        }
    }

    /// The stage that runs after this one when chaining.
    pub fn next(self) -> Option<Stage> {
        match self {
            Self::AssignWorkflows => Some(Self::GenerateDrafts),
            Self::GenerateDrafts => Some(Self::TriggerSend),
            Self::TriggerSend => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| EngineError::UnknownStage(s.to_string()))
    }
}

/// Per-stage counts.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum StageSummary {
    Assignment(AssignmentSummary),
    Drafts(DraftSummary),
    Send(SendSummary),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Completed,
    Failed,
}

/// Result of one stage plus, when chained, the stages after it.
#[derive(Debug, Clone, Serialize)]
pub struct StageOutcome {
    pub stage: Stage,
    pub status: OutcomeStatus,
    pub attempts: u32,
    /// Run record of the last attempt.
    pub run_id: String,
    /// Final counts, or the partial counts of the last failed attempt.
    pub summary: StageSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<Box<StageOutcome>>,
}

impl StageOutcome {
    /// This stage and every downstream stage, in order.
    pub fn chain(&self) -> impl Iterator<Item = &StageOutcome> {
        std::iter::successors(Some(self), |outcome| outcome.next.as_deref())
    }

    /// `true` when every stage in the chain completed.
    pub fn succeeded(&self) -> bool {
        self.chain()
            .all(|outcome| outcome.status == OutcomeStatus::Completed)
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Pipeline
// ═══════════════════════════════════════════════════════════════════════

pub struct Pipeline {
    assigner: WorkflowAssigner,
    generator: DraftGenerator,
    sender: Box<dyn SendTrigger>,
    runs: RunStore,
    config: EngineConfig,
    lock: Mutex<()>,
}

impl Pipeline {
    pub fn new(db: Database, config: EngineConfig, sender: Box<dyn SendTrigger>) -> Self {
        Self {
            assigner: WorkflowAssigner::new(db.clone(), config.clone()),
            generator: DraftGenerator::new(db.clone(), config.clone()),
            sender,
            runs: RunStore::new(db),
            config,
            lock: Mutex::new(()),
        }
    }

    /// Whether a run currently holds the lock.
    pub fn is_busy(&self) -> bool {
        self.lock.try_lock().is_err()
    }

    /// Run `start` and, if `chain`, every stage after it.
    ///
    /// Returns [`EngineError::Busy`] immediately when another run is in
    /// progress. A failed stage is reported in the outcome, not as `Err`.
    #[instrument(skip(self), fields(start = %start, today = %today))]
    pub async fn run(&self, start: Stage, chain: bool, today: NaiveDate) -> Result<StageOutcome> {
        let _guard = self.lock.try_lock().map_err(|_| EngineError::Busy)?;

        let mut outcomes = Vec::new();
        let mut stage = Some(start);
        while let Some(current) = stage {
            let outcome = self.run_stage(current, today).await?;
            let failed = outcome.status == OutcomeStatus::Failed;
            outcomes.push(outcome);
            if failed {
                warn!(stage = %current, "stage failed; stopping chain");
                break;
            }
            stage = if chain { current.next() } else { None };
        }

        let mut tail: Option<Box<StageOutcome>> = None;
        while let Some(mut outcome) = outcomes.pop() {
            outcome.next = tail;
            tail = Some(Box::new(outcome));
        }
        tail.map(|outcome| *outcome)
            .ok_or_else(|| EngineError::Internal("pipeline ran no stage".into()))
    }

    /// Run every stage from the first.
    pub async fn run_all(&self, today: NaiveDate) -> Result<StageOutcome> {
        self.run(Stage::AssignWorkflows, true, today).await
    }

    async fn run_stage(&self, stage: Stage, today: NaiveDate) -> Result<StageOutcome> {
        let max_attempts = self.config.stage_max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let run_id = self.runs.start(stage.as_str(), attempt).await?;
            info!(stage = %stage, attempt, run_id = %run_id, "stage started");

            match self.execute(stage, today, &run_id).await {
                Ok(summary) => {
                    self.record_finish(&run_id, RunStatus::Completed, &summary, None)
                        .await;
                    info!(stage = %stage, attempt, "stage completed");
                    return Ok(StageOutcome {
                        stage,
                        status: OutcomeStatus::Completed,
                        attempts: attempt,
                        run_id,
                        summary,
                        error: None,
                        next: None,
                    });
                }
                Err(abort) => {
                    let message = abort.source.to_string();
                    self.record_finish(&run_id, RunStatus::Failed, &abort.partial, Some(&message))
                        .await;

                    if attempt >= max_attempts {
                        warn!(stage = %stage, attempt, error = %message, "stage failed");
                        return Ok(StageOutcome {
                            stage,
                            status: OutcomeStatus::Failed,
                            attempts: attempt,
                            run_id,
                            summary: abort.partial,
                            error: Some(message),
                            next: None,
                        });
                    }

                    let delay = self.config.backoff_after(attempt);
                    warn!(
                        stage = %stage,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "stage aborted; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn execute(
        &self,
        stage: Stage,
        today: NaiveDate,
        run_id: &str,
    ) -> std::result::Result<StageSummary, StageAbort<StageSummary>> {
        match stage {
            Stage::AssignWorkflows => self
                .assigner
                .run(today, run_id)
                .await
                .map(StageSummary::Assignment)
                .map_err(|abort| abort.map(StageSummary::Assignment)),
            Stage::GenerateDrafts => self
                .generator
                .run(today, run_id)
                .await
                .map(StageSummary::Drafts)
                .map_err(|abort| abort.map(StageSummary::Drafts)),
            Stage::TriggerSend => {
                info!(trigger = self.sender.name(), "triggering send stage");
                self.sender
                    .trigger()
                    .await
                    .map(StageSummary::Send)
                    .map_err(|e| StageAbort::new(e, StageSummary::Send(SendSummary::default())))
            }
        }
    }

    /// Close a run record. Failing to do so is logged, not fatal.
    async fn record_finish(
        &self,
        run_id: &str,
        status: RunStatus,
        summary: &StageSummary,
        error: Option<&str>,
    ) {
        let summary = match serde_json::to_value(summary) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(run_id, error = %e, "failed to serialize stage summary");
                None
            }
        };
        if let Err(e) = self.runs.finish(run_id, status, summary.as_ref(), error).await {
            warn!(run_id, error = %e, "failed to close pipeline run record");
        }
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_names_roundtrip() {
        for stage in Stage::ALL {
            assert_eq!(stage.as_str().parse::<Stage>().unwrap(), stage);
        }
        assert!(matches!(
            "send_everything".parse::<Stage>(),
            Err(EngineError::UnknownStage(_))
        ));
    }

    #[test]
    fn stages_chain_in_order() {
        assert_eq!(Stage::AssignWorkflows.next(), Some(Stage::GenerateDrafts));
        assert_eq!(Stage::GenerateDrafts.next(), Some(Stage::TriggerSend));
        assert_eq!(Stage::TriggerSend.next(), None);
    }
}
