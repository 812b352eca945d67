//! Shared helper functions used across CLI subcommands.
//!
//! Includes tracing initialization, database and pipeline construction,
//! and outcome printing.

use std::sync::Arc;

use anyhow::{Context, Result};
use recoup_engine::{OutcomeStatus, Pipeline, StageOutcome, StageSummary};
use recoup_store::Database;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::{AppConfig, LogFormat};

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Initialize the tracing subscriber with the given default log level.
///
/// `RUST_LOG` takes precedence over `default_level` when set.
pub fn init_tracing(default_level: &str, format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    match format {
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Json => builder.json().init(),
    }
}

// ---------------------------------------------------------------------------
// Database and pipeline
// ---------------------------------------------------------------------------

/// Open the configured database, creating its directory and applying
/// migrations.
pub async fn open_database(config: &AppConfig) -> Result<Database> {
    let path = config.database.path.clone();
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let display_path = path.display().to_string();
    let db = Database::open_and_migrate(path)
        .await
        .with_context(|| format!("failed to open database at {display_path}"))?;
    info!(path = %display_path, "database ready");
    Ok(db)
}

/// Build the pipeline with the configured send trigger.
pub fn build_pipeline(db: Database, config: &AppConfig) -> Result<Arc<Pipeline>> {
    let sender = recoup_engine::send::from_config(&config.send)
        .context("invalid [send] configuration")?;
    info!(trigger = sender.name(), "send trigger configured");
    Ok(Arc::new(Pipeline::new(db, config.engine.clone(), sender)))
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// One human-readable line per stage of an outcome tree.
pub fn format_outcome(outcome: &StageOutcome) -> Vec<String> {
    outcome
        .chain()
        .map(|stage| {
            let marker = match stage.status {
                OutcomeStatus::Completed => "+",
                OutcomeStatus::Failed => "!",
            };
            let detail = match &stage.summary {
                StageSummary::Assignment(s) => format!(
                    "scanned {}, created {}, upgraded {}, repaired {}, no template {}, errors {}{}",
                    s.scanned,
                    s.created,
                    s.upgraded,
                    s.repaired,
                    s.skipped_no_template,
                    s.errors,
                    if s.truncated { " (truncated)" } else { "" }
                ),
                StageSummary::Drafts(s) => format!(
                    "workflows {}, created {} ({} approved, {} pending), nothing due {}, errors {}",
                    s.scanned,
                    s.created,
                    s.created_approved,
                    s.created_pending,
                    s.nothing_due,
                    s.errors
                ),
                StageSummary::Send(s) if s.triggered => format!("triggered, sent {}", s.sent),
                StageSummary::Send(_) => "no delivery service configured".to_string(),
            };
            let mut line = format!(
                "  [{marker}] {:<16} attempts {}  {detail}",
                stage.stage.as_str(),
                stage.attempts
            );
            if let Some(error) = &stage.error {
                line.push_str(&format!("\n      error: {error}"));
            }
            line
        })
        .collect()
}
