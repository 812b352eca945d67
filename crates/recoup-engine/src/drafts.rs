//! Cadence draft generation.
//!
//! For every active workflow on a collectible invoice, find the earliest
//! due cadence step that has neither a non-voided draft nor a sent log and
//! draft it. One step per workflow per run, so an invoice that fell behind
//! catches up one draft at a time. An invoice that already holds a draft
//! recommended for today is left alone, so rerunning the stage on the same
//! day adds nothing.

use std::collections::{BTreeSet, HashSet};

use chrono::NaiveDate;
use recoup_store::{
    ActiveWorkflow, Database, DraftInsert, DraftStatus, DraftStore, NewDraft, OutreachErrorStore,
    TemplateStore, WorkflowStore,
};
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::aging;
use crate::cadence::{self, CadenceStep};
use crate::config::EngineConfig;
use crate::error::StageAbort;
use crate::messages::{DraftContent, compose, default_message};
use crate::pager::Pager;
use crate::pipeline::Stage;
use crate::render::{RenderContext, format_amount};
use crate::sink::{ErrorDetail, ErrorSink, Failure, kind};

/// Aggregate result of one draft generation run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DraftSummary {
    /// Active workflows read.
    pub scanned: u64,
    pub created: u64,
    /// Drafts built from an approved message template.
    pub created_approved: u64,
    /// Drafts built from the built-in messages, awaiting review.
    pub created_pending: u64,
    /// Every due step already had a draft or a sent log.
    pub up_to_date: u64,
    /// No step is due yet.
    pub nothing_due: u64,
    /// The step was taken between the scan and the insert.
    pub already_handled: u64,
    /// A draft for today already exists.
    pub drafted_today: u64,
    pub skipped_current: u64,
    pub invalid_cadence: u64,
    pub errors: u64,
    pub error_details: Vec<ErrorDetail>,
    /// The run stopped at `max_workflows_per_run`.
    pub truncated: bool,
}

pub struct DraftGenerator {
    workflows: WorkflowStore,
    drafts: DraftStore,
    templates: TemplateStore,
    errors: OutreachErrorStore,
    config: EngineConfig,
}

impl DraftGenerator {
    pub fn new(db: Database, config: EngineConfig) -> Self {
        Self {
            workflows: WorkflowStore::new(db.clone()),
            drafts: DraftStore::new(db.clone()),
            templates: TemplateStore::new(db.clone()),
            errors: OutreachErrorStore::new(db),
            config,
        }
    }

    /// Run one generation pass as of `today`.
    #[instrument(skip(self), fields(today = %today))]
    pub async fn run(
        &self,
        today: NaiveDate,
        run_id: &str,
    ) -> Result<DraftSummary, StageAbort<DraftSummary>> {
        let mut summary = DraftSummary::default();
        let mut sink = ErrorSink::new(
            self.errors.clone(),
            run_id,
            Stage::GenerateDrafts.as_str(),
            self.config.max_reported_errors,
        );
        let mut pager: Pager<String> = Pager::new(
            self.config.page_size,
            self.config.max_workflows_per_run,
            None,
        );

        while let Some(limit) = pager.next_limit() {
            let mut page = match self
                .workflows
                .active_page(pager.cursor().cloned(), limit)
                .await
            {
                Ok(page) => page,
                Err(e) => return Err(abort(e, summary, &sink)),
            };
            pager.advance(&mut page, |active| active.workflow.id.clone());

            let ids: Vec<String> = page.iter().map(|a| a.invoice.id.clone()).collect();
            let handled = match self.drafts.handled_steps(ids.clone()).await {
                Ok(handled) => handled,
                Err(e) => return Err(abort(e, summary, &sink)),
            };
            let drafted_today: HashSet<String> = match self.drafts.drafted_on(ids, today).await {
                Ok(drafted) => drafted,
                Err(e) => return Err(abort(e, summary, &sink)),
            };

            let nothing = BTreeSet::new();
            for active in &page {
                summary.scanned += 1;
                if drafted_today.contains(&active.invoice.id) {
                    summary.drafted_today += 1;
                    continue;
                }
                let handled = handled.get(&active.invoice.id).unwrap_or(&nothing);
                self.generate_one(active, handled, today, &mut summary, &mut sink)
                    .await;
            }
        }

        summary.truncated = pager.truncated();
        summary.errors = sink.count();
        summary.error_details = sink.details().to_vec();
        info!(
            scanned = summary.scanned,
            created = summary.created,
            approved = summary.created_approved,
            pending = summary.created_pending,
            errors = summary.errors,
            truncated = summary.truncated,
            "draft generation finished"
        );
        Ok(summary)
    }

    async fn generate_one(
        &self,
        active: &ActiveWorkflow,
        handled: &BTreeSet<u32>,
        today: NaiveDate,
        summary: &mut DraftSummary,
        sink: &mut ErrorSink,
    ) {
        let invoice = &active.invoice;
        let workflow = &active.workflow;

        if !aging::classify(invoice.due_date, today).is_actionable() {
            summary.skipped_current += 1;
            return;
        }

        let cadence_days = match cadence::validate(workflow.cadence_days.as_deref()) {
            Ok(days) => days,
            Err(defect) => {
                summary.invalid_cadence += 1;
                sink.record(
                    Failure::new(kind::INVALID_CADENCE, format!("workflow cadence is {defect}"))
                        .invoice(&invoice.id)
                        .workflow(&workflow.id)
                        .payload(serde_json::json!({
                            "defect": defect,
                            "cadence_days": workflow.cadence_days,
                        })),
                )
                .await;
                return;
            }
        };

        let mut any_due = false;
        let next = cadence::due_steps(invoice.due_date, cadence_days, today)
            .inspect(|_| any_due = true)
            .find(|step| !handled.contains(&step.number));
        let Some(step) = next else {
            if any_due {
                summary.up_to_date += 1;
            } else {
                summary.nothing_due += 1;
            }
            return;
        };

        let Some((content, status, template_id)) = self.content_for(active, step, sink).await
        else {
            return;
        };

        let new = NewDraft {
            invoice_id: invoice.id.clone(),
            workflow_id: workflow.id.clone(),
            step_number: step.number,
            aging_bucket: workflow.aging_bucket,
            subject: content.subject,
            body: content.body,
            status,
            template_id,
            recommended_send_date: today,
        };
        match self.drafts.insert_if_unhandled(new).await {
            Ok(DraftInsert::Created(draft)) => {
                summary.created += 1;
                match draft.status {
                    DraftStatus::Approved => summary.created_approved += 1,
                    _ => summary.created_pending += 1,
                }
                debug!(
                    invoice_id = %invoice.id,
                    step = step.number,
                    status = %draft.status,
                    "draft generated"
                );
            }
            Ok(DraftInsert::AlreadyDrafted | DraftInsert::AlreadySent) => {
                summary.already_handled += 1;
            }
            Err(e) => {
                sink.record(
                    Failure::new(kind::DRAFT_INSERT_FAILED, e.to_string())
                        .invoice(&invoice.id)
                        .workflow(&workflow.id)
                        .step(step.number)
                        .payload(serde_json::json!({ "target_date": step.target })),
                )
                .await;
            }
        }
    }

    /// Subject and body for a step: the approved template when one exists
    /// (draft approved), else the built-in message (draft pending review).
    async fn content_for(
        &self,
        active: &ActiveWorkflow,
        step: CadenceStep,
        sink: &mut ErrorSink,
    ) -> Option<(DraftContent, DraftStatus, Option<String>)> {
        let invoice = &active.invoice;
        let workflow = &active.workflow;
        let ctx = RenderContext {
            company_name: invoice.company_name.clone(),
            customer_name: invoice.debtor_name.clone(),
            invoice_number: invoice.invoice_number.clone(),
            amount: format_amount(invoice.amount_cents, &invoice.currency),
            invoice_link: invoice
                .payment_link
                .clone()
                .unwrap_or_else(|| self.config.invoice_link(&invoice.id)),
        };

        match self
            .templates
            .find_approved_message(&workflow.owner_id, workflow.aging_bucket, step.number)
            .await
        {
            Ok(Some(template)) => Some((
                compose(&template.subject, &template.body, &ctx),
                DraftStatus::Approved,
                Some(template.id),
            )),
            Ok(None) => {
                let (subject, body) = default_message(step.number);
                Some((compose(subject, body, &ctx), DraftStatus::PendingApproval, None))
            }
            Err(e) => {
                sink.record(
                    Failure::new(kind::MESSAGE_LOOKUP_FAILED, e.to_string())
                        .invoice(&invoice.id)
                        .workflow(&workflow.id)
                        .step(step.number),
                )
                .await;
                None
            }
        }
    }
}

fn abort(
    source: recoup_store::StoreError,
    mut summary: DraftSummary,
    sink: &ErrorSink,
) -> StageAbort<DraftSummary> {
    summary.truncated = true;
    summary.errors = sink.count();
    summary.error_details = sink.details().to_vec();
    StageAbort::new(source, summary)
}
