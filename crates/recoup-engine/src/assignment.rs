//! Workflow assignment: keep exactly one active workflow per collectible
//! invoice, matching the invoice's current aging bucket.
//!
//! Invoices are scanned in `(due_date, id)` order with a keyset cursor.
//! For each one the bucket is recomputed and a [`WorkflowAction`] decided;
//! the bucket write and the action land in one transaction via
//! [`WorkflowStore::apply_plan`]. Per-invoice failures go to the error sink
//! and the scan moves on.

use chrono::NaiveDate;
use recoup_store::{
    AgingBucket, CollectibleInvoice, CollectionWorkflow, Database, EngineStateStore,
    InvoiceCursor, NewWorkflow, OutreachErrorStore, ReceivablesStore, TemplateStore,
    WorkflowAction, WorkflowPlan, WorkflowStore, WorkflowTemplate,
};
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::aging;
use crate::cadence;
use crate::config::EngineConfig;
use crate::error::{EngineError, StageAbort};
use crate::pager::Pager;
use crate::pipeline::Stage;
use crate::resolver::TemplateResolver;
use crate::sink::{ErrorDetail, ErrorSink, Failure, kind};

/// `engine_state` key holding the cursor of a truncated run.
pub const CURSOR_KEY: &str = "assign_workflows.cursor";

/// Aggregate result of one assignment run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AssignmentSummary {
    /// Invoices read from the collectible scan.
    pub scanned: u64,
    pub created: u64,
    pub upgraded: u64,
    pub repaired: u64,
    pub unchanged: u64,
    /// Invoices whose stored bucket was rewritten.
    pub buckets_updated: u64,
    /// Unsent drafts voided by upgrades.
    pub drafts_voided: u64,
    pub skipped_current: u64,
    pub skipped_no_template: u64,
    pub skipped_paused: u64,
    pub errors: u64,
    pub error_details: Vec<ErrorDetail>,
    /// The run stopped at `max_invoices_per_run`.
    pub truncated: bool,
    pub resumed_from: Option<InvoiceCursor>,
    /// Where the next run resumes; `None` after a full pass.
    pub cursor: Option<InvoiceCursor>,
}

impl AssignmentSummary {
    fn close(&mut self, sink: &ErrorSink) {
        self.errors = sink.count();
        self.error_details = sink.details().to_vec();
    }
}

/// Which branch the decision table took for one invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Created,
    Upgraded,
    Repaired,
    Unchanged,
    SkippedCurrent,
    SkippedNoTemplate,
    /// A failure was recorded; the bucket is still persisted.
    Defective,
}

/// Decide what to do with an invoice's workflow given its current bucket
/// and the template resolved for it.
pub fn decide(
    active: Option<&CollectionWorkflow>,
    bucket: AgingBucket,
    template: &WorkflowTemplate,
) -> WorkflowAction {
    let next = || NewWorkflow {
        aging_bucket: bucket,
        template_id: Some(template.id.clone()),
        cadence_days: template.cadence_days(),
        tone: template.tone.clone(),
    };

    match active {
        None => WorkflowAction::Create(next()),
        Some(workflow) if workflow.aging_bucket != bucket => WorkflowAction::Supersede {
            previous_id: workflow.id.clone(),
            next: next(),
        },
        Some(workflow) if cadence::validate(workflow.cadence_days.as_deref()).is_err() => {
            WorkflowAction::Repair {
                workflow_id: workflow.id.clone(),
                cadence_days: template.cadence_days(),
            }
        }
        Some(_) => WorkflowAction::Keep,
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  WorkflowAssigner
// ═══════════════════════════════════════════════════════════════════════

pub struct WorkflowAssigner {
    receivables: ReceivablesStore,
    workflows: WorkflowStore,
    templates: TemplateStore,
    state: EngineStateStore,
    errors: OutreachErrorStore,
    config: EngineConfig,
}

impl WorkflowAssigner {
    pub fn new(db: Database, config: EngineConfig) -> Self {
        Self {
            receivables: ReceivablesStore::new(db.clone()),
            workflows: WorkflowStore::new(db.clone()),
            templates: TemplateStore::new(db.clone()),
            state: EngineStateStore::new(db.clone()),
            errors: OutreachErrorStore::new(db),
            config,
        }
    }

    /// Run one assignment pass as of `today`.
    #[instrument(skip(self), fields(today = %today))]
    pub async fn run(
        &self,
        today: NaiveDate,
        run_id: &str,
    ) -> Result<AssignmentSummary, StageAbort<AssignmentSummary>> {
        let mut summary = AssignmentSummary::default();
        let mut sink = ErrorSink::new(
            self.errors.clone(),
            run_id,
            Stage::AssignWorkflows.as_str(),
            self.config.max_reported_errors,
        );

        let resolver = match TemplateResolver::bootstrap(
            self.templates.clone(),
            self.config.template_cache_capacity,
        )
        .await
        {
            Ok(resolver) => resolver,
            Err(e) => return Err(StageAbort::new(e, summary)),
        };

        let resume = match self.state.get_json::<InvoiceCursor>(CURSOR_KEY).await {
            Ok(cursor) => cursor,
            Err(e) => return Err(StageAbort::new(e, summary)),
        };
        if let Some(cursor) = &resume {
            info!(due_date = %cursor.due_date, invoice_id = %cursor.id, "resuming assignment");
        }
        summary.resumed_from = resume.clone();

        let mut pager = Pager::new(
            self.config.page_size,
            self.config.max_invoices_per_run,
            resume.clone(),
        );
        let mut processed = resume;

        while let Some(limit) = pager.next_limit() {
            let mut page = match self
                .receivables
                .collectible_page(pager.cursor().cloned(), limit)
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    return Err(self.abort(e.into(), summary, sink, processed).await);
                }
            };
            pager.advance(&mut page, CollectibleInvoice::cursor);

            let ids = page
                .iter()
                .filter(|invoice| !invoice.debtor_paused)
                .map(|invoice| invoice.id.clone())
                .collect();
            let mut existing = match self.workflows.for_invoices(ids).await {
                Ok(existing) => existing,
                Err(e) => {
                    return Err(self.abort(e.into(), summary, sink, processed).await);
                }
            };

            for invoice in &page {
                summary.scanned += 1;
                if invoice.debtor_paused {
                    summary.skipped_paused += 1;
                } else {
                    let history = existing.remove(&invoice.id).unwrap_or_default();
                    self.assign_one(invoice, &history, today, &resolver, &mut summary, &mut sink)
                        .await;
                }
                processed = Some(invoice.cursor());
            }
        }

        summary.truncated = pager.truncated();
        if summary.truncated {
            self.persist_cursor(processed.as_ref(), &mut sink).await;
            summary.cursor = processed;
        } else if let Err(e) = self.state.delete(CURSOR_KEY).await {
            sink.record(Failure::new(kind::CURSOR_PERSIST_FAILED, e.to_string()))
                .await;
        }

        summary.close(&sink);
        info!(
            scanned = summary.scanned,
            created = summary.created,
            upgraded = summary.upgraded,
            repaired = summary.repaired,
            unchanged = summary.unchanged,
            errors = summary.errors,
            truncated = summary.truncated,
            cache = %resolver.cache_stats(),
            "workflow assignment finished"
        );
        Ok(summary)
    }

    /// Decide and apply the plan for one invoice.
    async fn assign_one(
        &self,
        invoice: &CollectibleInvoice,
        history: &[CollectionWorkflow],
        today: NaiveDate,
        resolver: &TemplateResolver,
        summary: &mut AssignmentSummary,
        sink: &mut ErrorSink,
    ) {
        let bucket = aging::classify(invoice.due_date, today);
        let new_bucket = (bucket != invoice.stored_bucket).then_some(bucket);
        let active = history.iter().find(|w| w.is_active);

        let (action, outcome) = if !bucket.is_actionable() {
            (WorkflowAction::Keep, Outcome::SkippedCurrent)
        } else {
            match resolver.resolve(bucket, &invoice.owner_id).await {
                Err(e) => {
                    sink.record(
                        Failure::new(kind::TEMPLATE_LOOKUP_FAILED, e.to_string())
                            .invoice(&invoice.id),
                    )
                    .await;
                    (WorkflowAction::Keep, Outcome::Defective)
                }
                Ok(None) => (WorkflowAction::Keep, Outcome::SkippedNoTemplate),
                Ok(Some(template)) if template.steps.is_empty() => {
                    sink.record(
                        Failure::new(kind::EMPTY_TEMPLATE, "workflow template has no steps")
                            .invoice(&invoice.id)
                            .payload(serde_json::json!({
                                "template_id": template.id,
                                "aging_bucket": bucket,
                            })),
                    )
                    .await;
                    (WorkflowAction::Keep, Outcome::Defective)
                }
                Ok(Some(template)) => {
                    let action = decide(active, bucket, &template);
                    let outcome = match &action {
                        WorkflowAction::Create(_) => Outcome::Created,
                        WorkflowAction::Supersede { .. } => Outcome::Upgraded,
                        WorkflowAction::Repair { .. } => Outcome::Repaired,
                        WorkflowAction::Keep => Outcome::Unchanged,
                    };
                    (action, outcome)
                }
            }
        };

        let mut drafts_voided = 0;
        if new_bucket.is_some() || action != WorkflowAction::Keep {
            let plan = WorkflowPlan {
                invoice_id: invoice.id.clone(),
                owner_id: invoice.owner_id.clone(),
                new_bucket,
                action,
            };
            match self.workflows.apply_plan(plan).await {
                Ok(applied) => drafts_voided = applied.drafts_voided as u64,
                Err(e) => {
                    let mut failure = Failure::new(kind::WORKFLOW_WRITE_FAILED, e.to_string())
                        .invoice(&invoice.id)
                        .payload(serde_json::json!({ "aging_bucket": bucket }));
                    if let Some(workflow) = active {
                        failure = failure.workflow(&workflow.id);
                    }
                    sink.record(failure).await;
                    return;
                }
            }
        }

        if new_bucket.is_some() {
            summary.buckets_updated += 1;
        }
        summary.drafts_voided += drafts_voided;
        match outcome {
            Outcome::Created => summary.created += 1,
            Outcome::Upgraded => summary.upgraded += 1,
            Outcome::Repaired => summary.repaired += 1,
            Outcome::Unchanged => summary.unchanged += 1,
            Outcome::SkippedCurrent => summary.skipped_current += 1,
            Outcome::SkippedNoTemplate => summary.skipped_no_template += 1,
            Outcome::Defective => {}
        }
        debug!(invoice_id = %invoice.id, bucket = %bucket, ?outcome, "invoice assigned");
    }

    async fn persist_cursor(&self, cursor: Option<&InvoiceCursor>, sink: &mut ErrorSink) {
        let Some(cursor) = cursor else {
            return;
        };
        if let Err(e) = self.state.set_json(CURSOR_KEY, cursor).await {
            sink.record(
                Failure::new(kind::CURSOR_PERSIST_FAILED, e.to_string()).invoice(&cursor.id),
            )
            .await;
        }
    }

    /// Persist progress and wrap `source` with the partial counts.
    async fn abort(
        &self,
        source: EngineError,
        mut summary: AssignmentSummary,
        mut sink: ErrorSink,
        processed: Option<InvoiceCursor>,
    ) -> StageAbort<AssignmentSummary> {
        self.persist_cursor(processed.as_ref(), &mut sink).await;
        summary.cursor = processed;
        summary.truncated = true;
        summary.close(&sink);
        StageAbort::new(source, summary)
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use recoup_store::TemplateStep;

    fn template(offsets: &[i64]) -> WorkflowTemplate {
        WorkflowTemplate {
            id: "tpl-1".into(),
            owner_id: None,
            aging_bucket: AgingBucket::Dpd31To60,
            name: "31-60".into(),
            tone: "firm".into(),
            is_active: true,
            steps: offsets
                .iter()
                .enumerate()
                .map(|(i, &day_offset)| TemplateStep {
                    step_order: i as u32 + 1,
                    day_offset,
                })
                .collect(),
        }
    }

    fn workflow(bucket: AgingBucket, cadence: Option<Vec<i64>>) -> CollectionWorkflow {
        CollectionWorkflow {
            id: "wf-1".into(),
            invoice_id: "inv-1".into(),
            owner_id: "acct".into(),
            aging_bucket: bucket,
            template_id: None,
            cadence_days: cadence,
            tone: "friendly".into(),
            is_active: true,
            created_at: 0,
            updated_at: 0,
            deactivated_at: None,
        }
    }

    #[test]
    fn no_active_workflow_creates() {
        let action = decide(None, AgingBucket::Dpd31To60, &template(&[31, 38]));
        let WorkflowAction::Create(next) = action else {
            panic!("expected create, got {action:?}");
        };
        assert_eq!(next.cadence_days, vec![31, 38]);
        assert_eq!(next.template_id.as_deref(), Some("tpl-1"));
        assert_eq!(next.tone, "firm");
    }

    #[test]
    fn bucket_change_supersedes() {
        let active = workflow(AgingBucket::Dpd1To30, Some(vec![0, 7]));
        let action = decide(Some(&active), AgingBucket::Dpd31To60, &template(&[31]));
        assert!(matches!(
            action,
            WorkflowAction::Supersede { ref previous_id, .. } if previous_id == "wf-1"
        ));
    }

    #[test]
    fn corrupt_cadence_in_same_bucket_repairs() {
        for cadence in [None, Some(vec![])] {
            let active = workflow(AgingBucket::Dpd31To60, cadence);
            let action = decide(Some(&active), AgingBucket::Dpd31To60, &template(&[31, 45]));
            assert_eq!(
                action,
                WorkflowAction::Repair {
                    workflow_id: "wf-1".into(),
                    cadence_days: vec![31, 45],
                }
            );
        }
    }

    #[test]
    fn healthy_workflow_in_same_bucket_is_kept() {
        let active = workflow(AgingBucket::Dpd31To60, Some(vec![1]));
        let action = decide(Some(&active), AgingBucket::Dpd31To60, &template(&[31]));
        assert_eq!(action, WorkflowAction::Keep);
    }
}
