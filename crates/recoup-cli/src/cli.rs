//! CLI argument definitions for Recoup.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use recoup_engine::Stage;

/// Recoup -- invoice aging and outreach cadence engine.
#[derive(Parser)]
#[command(
    name = "recoup",
    version,
    about = "Recoup -- invoice aging and outreach cadence engine",
    long_about = "Classifies unpaid invoices into aging buckets, keeps one collection \
                  workflow per invoice, and drafts the next due outreach step."
)]
pub struct Cli {
    /// Path to the TOML config file. Defaults to `config/default.toml`
    /// when present.
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP API and, if enabled, the pipeline schedule.
    Serve {
        /// Address to bind the HTTP server to.
        #[arg(long)]
        bind: Option<String>,

        /// Port to listen on.
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Run pipeline stages once and print the outcome.
    Run {
        /// Stage to start from.
        #[arg(long, short, default_value = "assign_workflows")]
        stage: Stage,

        /// Run only the given stage instead of chaining into later ones.
        #[arg(long)]
        no_chain: bool,

        /// Evaluate aging and cadence as of this date (YYYY-MM-DD).
        #[arg(long)]
        today: Option<NaiveDate>,

        /// Print the outcome tree as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Create the database and seed the global workflow templates.
    Setup {
        /// Also create a demo account with a few overdue invoices.
        #[arg(long)]
        demo: bool,
    },

    /// Show database health, workflow and draft counts, and recent runs.
    Status,
}
