//! CLI entry point for Recoup.
//!
//! This binary provides the `recoup` command with subcommands for serving
//! the HTTP API, running pipeline stages once, seeding templates, and
//! checking system status.

mod cli;
mod config;
mod helpers;
mod setup;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::Parser;
use recoup_engine::{PipelineScheduler, Stage, TickDriver};
use recoup_store::{DraftStatus, DraftStore, OutreachErrorStore, RunStore, WorkflowStore};
use recoup_web::WebServer;
use tokio::sync::mpsc;
use tracing::{error, info};

use cli::{Cli, Commands};
use config::AppConfig;
use helpers::{build_pipeline, format_outcome, init_tracing, open_database};

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;
    init_tracing(&config.log.level, config.log.format);

    match cli.command {
        Commands::Serve { bind, port } => cmd_serve(config, bind, port).await,
        Commands::Run {
            stage,
            no_chain,
            today,
            json,
        } => cmd_run(config, stage, !no_chain, today, json).await,
        Commands::Setup { demo } => cmd_setup(config, demo).await,
        Commands::Status => cmd_status(config).await,
    }
}

// ---------------------------------------------------------------------------
// Subcommand: serve
// ---------------------------------------------------------------------------

async fn cmd_serve(mut config: AppConfig, bind: Option<String>, port: Option<u16>) -> Result<()> {
    if let Some(bind) = bind {
        config.web.bind_addr = bind;
    }
    if let Some(port) = port {
        config.web.port = port;
    }

    info!("starting Recoup");
    let db = open_database(&config).await?;
    let pipeline = build_pipeline(db.clone(), &config)?;

    let mut scheduler = PipelineScheduler::from_config(&config.schedule)?;
    if let Some(scheduler) = scheduler.as_mut() {
        let (tick_tx, tick_rx) = mpsc::channel(1);
        scheduler.start(tick_tx)?;
        tokio::spawn(TickDriver::new(Arc::clone(&pipeline)).run(tick_rx));
        info!(
            cron = scheduler.expression(),
            next_run = ?scheduler.next_run(),
            "pipeline schedule enabled"
        );
    }

    let server = WebServer::new(config.web.clone(), db, pipeline);
    println!();
    println!("  Recoup v{}", env!("CARGO_PKG_VERSION"));
    println!("  Listening on http://{}", server.addr());
    println!();

    let result = server
        .start_with_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for shutdown signal");
            }
            info!("shutdown signal received");
        })
        .await;

    if let Some(mut scheduler) = scheduler {
        scheduler.stop().await;
    }

    result.map_err(|e| anyhow::anyhow!("web server failed: {e}"))
}

// ---------------------------------------------------------------------------
// Subcommand: run
// ---------------------------------------------------------------------------

async fn cmd_run(
    config: AppConfig,
    stage: Stage,
    chain: bool,
    today: Option<chrono::NaiveDate>,
    json: bool,
) -> Result<()> {
    let db = open_database(&config).await?;
    let pipeline = build_pipeline(db, &config)?;
    let today = today.unwrap_or_else(|| Utc::now().date_naive());

    let outcome = pipeline
        .run(stage, chain, today)
        .await
        .with_context(|| format!("failed to run stage {stage}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        println!();
        println!("  Pipeline run as of {today}");
        println!();
        for line in format_outcome(&outcome) {
            println!("{line}");
        }
        println!();
    }

    if !outcome.succeeded() {
        bail!("pipeline run did not complete");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: setup
// ---------------------------------------------------------------------------

async fn cmd_setup(config: AppConfig, demo: bool) -> Result<()> {
    println!();
    println!("  Recoup Setup");
    println!("  ============");
    println!();

    let db = open_database(&config).await?;
    println!(
        "  [+] Database initialized at {}",
        config.database.path.display()
    );

    let seeded = setup::seed_default_templates(&db).await?;
    if seeded.is_empty() {
        println!("  [=] Global workflow templates already present");
    } else {
        for bucket in &seeded {
            println!("  [+] Seeded global workflow template for {bucket}");
        }
    }

    if demo {
        let today = Utc::now().date_naive();
        let created = setup::seed_demo_account(&db, today).await?;
        println!("  [+] Created demo account with {created} invoices");
    }

    match &config.send.url {
        Some(url) => println!("  [+] Delivery service: {url}"),
        None => {
            println!("  [!] No delivery service configured");
            println!("      Set [send] url or RECOUP_SEND_URL to enable the send stage.");
        }
    }

    let config_hint = if Path::new(config::DEFAULT_CONFIG_PATH).exists() {
        ""
    } else {
        " (no config/default.toml found, using built-in defaults)"
    };
    println!();
    println!("  Setup complete{config_hint}. Run `recoup run` or `recoup serve` to start.");
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: status
// ---------------------------------------------------------------------------

async fn cmd_status(config: AppConfig) -> Result<()> {
    let db = open_database(&config).await?;
    let database = db.ping().await.is_ok();

    let active_workflows = WorkflowStore::new(db.clone()).count_active().await?;
    let drafts = DraftStore::new(db.clone()).count_by_status().await?;
    let runs = RunStore::new(db.clone()).recent(5).await?;
    let errors = OutreachErrorStore::new(db).recent(5).await?;

    println!();
    println!("  Recoup v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("  Database:         {}", config.database.path.display());
    println!(
        "  Health:           {}",
        if database { "ok" } else { "unreachable" }
    );
    println!("  Active workflows: {active_workflows}");
    for status in [
        DraftStatus::Approved,
        DraftStatus::PendingApproval,
        DraftStatus::Sent,
        DraftStatus::Voided,
    ] {
        let count = drafts.get(&status).copied().unwrap_or(0);
        println!("  Drafts {:<11}{count}", format!("{}:", status.as_str()));
    }
    println!(
        "  Schedule:         {}",
        if config.schedule.enabled {
            config.schedule.cron.as_str()
        } else {
            "disabled"
        }
    );

    println!();
    if runs.is_empty() {
        println!("  No pipeline runs recorded yet.");
    } else {
        println!("  Recent runs:");
        for run in &runs {
            println!(
                "    {:<16} attempt {}  {:<9}  {}",
                run.stage,
                run.attempt,
                run.status.as_str(),
                run.error.as_deref().unwrap_or("")
            );
        }
    }

    if !errors.is_empty() {
        println!();
        println!("  Recent outreach errors:");
        for e in &errors {
            println!(
                "    [{}] {} {}",
                e.error.stage,
                e.error.kind,
                e.error.invoice_id.as_deref().unwrap_or("-")
            );
        }
    }
    println!();
    Ok(())
}
