//! Shared application state for the web server.

use std::sync::Arc;
use std::time::Instant;

use recoup_engine::Pipeline;
use recoup_store::{Database, DraftStore, OutreachErrorStore, RunStore, WorkflowStore};

use crate::WebConfig;

/// Shared state accessible from every Axum handler.
#[derive(Clone)]
pub struct AppState {
    pub config: WebConfig,

    /// Database handle, used for health checks.
    pub db: Database,

    /// The one pipeline of this process. Its lock serializes runs coming
    /// from HTTP and from the scheduler.
    pub pipeline: Arc<Pipeline>,

    pub runs: RunStore,
    pub errors: OutreachErrorStore,
    pub workflows: WorkflowStore,
    pub drafts: DraftStore,

    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: WebConfig, db: Database, pipeline: Arc<Pipeline>) -> Self {
        Self {
            config,
            runs: RunStore::new(db.clone()),
            errors: OutreachErrorStore::new(db.clone()),
            workflows: WorkflowStore::new(db.clone()),
            drafts: DraftStore::new(db.clone()),
            db,
            pipeline,
            started_at: Instant::now(),
        }
    }
}
