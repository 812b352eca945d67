//! Workflow template resolution: `(bucket, owner) -> cadence`.
//!
//! A resolver lives for one run. Global defaults are loaded once at
//! bootstrap and held for the whole run. Each `(bucket, owner)` pair then
//! costs at most one owner-specific query; misses are cached too.

use std::collections::HashMap;
use std::sync::Arc;

use recoup_store::{AgingBucket, CacheLayer, TemplateStore, WorkflowTemplate};
use tracing::{debug, instrument, warn};

use crate::error::{EngineError, Result};

type ResolutionCache = CacheLayer<(AgingBucket, String), Option<Arc<WorkflowTemplate>>>;

pub struct TemplateResolver {
    store: TemplateStore,
    globals: HashMap<AgingBucket, Arc<WorkflowTemplate>>,
    cache: ResolutionCache,
}

impl TemplateResolver {
    /// Build a resolver for one run.
    ///
    /// Loads the global defaults once; failure here is fatal to the stage.
    /// Actionable buckets without a global default are logged, since every
    /// owner without its own template will be skipped for them.
    #[instrument(skip(store))]
    pub async fn bootstrap(store: TemplateStore, capacity: u64) -> Result<Self> {
        let globals = store.list_active_global_templates().await?;
        for bucket in AgingBucket::ALL.into_iter().filter(|b| b.is_actionable()) {
            if !globals.iter().any(|t| t.aging_bucket == bucket) {
                warn!(bucket = %bucket, "no global workflow template for bucket");
            }
        }
        debug!(globals = globals.len(), "template resolver ready");
        let globals = globals
            .into_iter()
            .map(|t| (t.aging_bucket, Arc::new(t)))
            .collect();

        let cache = CacheLayer::<(AgingBucket, String), Option<Arc<WorkflowTemplate>>>::builder(
            "workflow_templates",
        )
        .max_capacity(capacity)
        .build();

        Ok(Self {
            store,
            globals,
            cache,
        })
    }

    /// The template for `(bucket, owner)`, owner-specific first, then global.
    pub async fn resolve(
        &self,
        bucket: AgingBucket,
        owner_id: &str,
    ) -> Result<Option<Arc<WorkflowTemplate>>> {
        let store = &self.store;
        let global = self.globals.get(&bucket).cloned();
        self.cache
            .get_or_try_insert_with((bucket, owner_id.to_string()), || async move {
                let own = store.find_owner_workflow_template(bucket, owner_id).await?;
                Ok::<_, EngineError>(own.map(Arc::new).or(global))
            })
            .await
    }

    /// Cache hit/miss counters, for the stage log line.
    pub fn cache_stats(&self) -> String {
        self.cache.stats().to_string()
    }
}

// ── tests ────────────────────────────────────────────────────────────
