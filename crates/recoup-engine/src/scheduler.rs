//! Recurring pipeline runs.
//!
//! [`PipelineScheduler`] owns one cron schedule and offers a
//! [`ScheduleTick`] on a bounded tokio channel whenever it is due; a tick
//! the receiver has not taken yet is dropped, never queued behind it.
//! [`TickDriver`] consumes the ticks and starts the full pipeline for each.
//! Cron expressions use the `cron` crate's 6/7-field format, and 5-field
//! input gets a `0` seconds field prepended.

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::ScheduleConfig;
use crate::error::{EngineError, Result};
use crate::pipeline::{OutcomeStatus, Pipeline};

/// Emitted when the schedule fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleTick {
    pub fired_at: DateTime<Utc>,
}

fn normalize_cron_expr(expr: &str) -> String {
    if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    }
}

fn parse_schedule(expr: &str) -> Result<cron::Schedule> {
    cron::Schedule::from_str(&normalize_cron_expr(expr)).map_err(|e| {
        EngineError::InvalidCronExpression {
            expression: expr.to_string(),
            reason: e.to_string(),
        }
    })
}

fn next_run_after(schedule: &cron::Schedule, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule.after(&after).next()
}

// ═══════════════════════════════════════════════════════════════════════
//  PipelineScheduler
// ═══════════════════════════════════════════════════════════════════════

/// Background loop that checks its schedule every second.
pub struct PipelineScheduler {
    expression: String,
    schedule: cron::Schedule,
    running: Arc<AtomicBool>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl PipelineScheduler {
    /// Parse `expression` up front; an invalid one is rejected here, not
    /// when the loop starts.
    pub fn new(expression: &str) -> Result<Self> {
        let schedule = parse_schedule(expression)?;
        Ok(Self {
            expression: expression.to_string(),
            schedule,
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        })
    }

    /// `None` when scheduling is disabled.
    pub fn from_config(config: &ScheduleConfig) -> Result<Option<Self>> {
        if !config.enabled {
            return Ok(None);
        }
        Self::new(&config.cron).map(Some)
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// The next time the schedule fires after now.
    pub fn next_run(&self) -> Option<DateTime<Utc>> {
        next_run_after(&self.schedule, Utc::now())
    }

    /// Start the background loop. Ticks go to `tick_tx`; a tick that finds
    /// the channel full is dropped. The loop ends on [`stop`](Self::stop)
    /// or when the receiver is dropped.
    pub fn start(&mut self, tick_tx: mpsc::Sender<ScheduleTick>) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(EngineError::Internal(
                "scheduler is already running".to_string(),
            ));
        }

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let schedule = self.schedule.clone();
        let expression = self.expression.clone();

        let handle = tokio::spawn(async move {
            let mut next = next_run_after(&schedule, Utc::now());
            info!(cron = %expression, next_run = ?next, "pipeline scheduler started");

            while running.load(Ordering::SeqCst) {
                let now = Utc::now();
                if next.is_some_and(|at| at <= now) {
                    debug!(fired_at = %now, "pipeline schedule fired");
                    match tick_tx.try_send(ScheduleTick { fired_at: now }) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            warn!(fired_at = %now, "previous tick not taken yet; dropping tick");
                        }
                        Err(TrySendError::Closed(_)) => {
                            error!("tick receiver dropped; stopping scheduler");
                            running.store(false, Ordering::SeqCst);
                            break;
                        }
                    }
                    next = next_run_after(&schedule, now);
                }

                tokio::time::sleep(Duration::from_secs(1)).await;
            }

            info!("pipeline scheduler stopped");
        });

        self.handle = Some(handle);
        Ok(())
    }

    /// Stop the loop and wait for it to exit.
    pub async fn stop(&mut self) {
        if !self.running.load(Ordering::SeqCst) && self.handle.is_none() {
            warn!("stop called but scheduler is not running");
            return;
        }

        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.handle.take()
            && let Err(e) = handle.await
        {
            error!(error = %e, "scheduler task panicked during shutdown");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  TickDriver
// ═══════════════════════════════════════════════════════════════════════

/// Outcome counts of scheduled runs.
#[derive(Debug, Default)]
pub struct TickCounters {
    completed: AtomicU64,
    failed: AtomicU64,
    skipped_busy: AtomicU64,
    errored: AtomicU64,
}

impl TickCounters {
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::SeqCst)
    }

    /// Ticks rejected because another run held the pipeline lock.
    pub fn skipped_busy(&self) -> u64 {
        self.skipped_busy.load(Ordering::SeqCst)
    }

    pub fn errored(&self) -> u64 {
        self.errored.load(Ordering::SeqCst)
    }
}

/// Starts the full pipeline for every tick.
///
/// Each run is spawned, so a tick arriving mid-run meets the pipeline lock
/// and is skipped. The run date is read from the clock when the run
/// starts, not from the tick.
pub struct TickDriver {
    pipeline: Arc<Pipeline>,
    counters: Arc<TickCounters>,
}

impl TickDriver {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            counters: Arc::new(TickCounters::default()),
        }
    }

    pub fn counters(&self) -> Arc<TickCounters> {
        Arc::clone(&self.counters)
    }

    /// Consume ticks until the channel closes, then wait for runs in
    /// flight.
    pub async fn run(self, mut ticks: mpsc::Receiver<ScheduleTick>) {
        let mut runs = JoinSet::new();
        loop {
            tokio::select! {
                tick = ticks.recv() => {
                    let Some(tick) = tick else { break };
                    let pipeline = Arc::clone(&self.pipeline);
                    let counters = Arc::clone(&self.counters);
                    runs.spawn(async move { run_tick(&pipeline, &counters, tick).await });
                }
                Some(joined) = runs.join_next(), if !runs.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "scheduled run task panicked");
                    }
                }
            }
        }

        while let Some(joined) = runs.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "scheduled run task panicked");
            }
        }
        debug!("tick driver stopped");
    }
}

async fn run_tick(pipeline: &Pipeline, counters: &TickCounters, tick: ScheduleTick) {
    let today = Utc::now().date_naive();
    match pipeline.run_all(today).await {
        Ok(outcome) if outcome.succeeded() => {
            counters.completed.fetch_add(1, Ordering::SeqCst);
            info!(fired_at = %tick.fired_at, today = %today, "scheduled pipeline run completed");
        }
        Ok(outcome) => {
            counters.failed.fetch_add(1, Ordering::SeqCst);
            let failed = outcome
                .chain()
                .find(|o| o.status == OutcomeStatus::Failed)
                .map(|o| o.stage);
            warn!(fired_at = %tick.fired_at, stage = ?failed, "scheduled pipeline run failed");
        }
        Err(EngineError::Busy) => {
            counters.skipped_busy.fetch_add(1, Ordering::SeqCst);
            info!(fired_at = %tick.fired_at, "scheduled run skipped: another run in progress");
        }
        Err(e) => {
            counters.errored.fetch_add(1, Ordering::SeqCst);
            error!(fired_at = %tick.fired_at, error = %e, "scheduled pipeline run failed");
        }
    }
}

// ── tests ────────────────────────────────────────────────────────────
