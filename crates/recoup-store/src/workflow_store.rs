//! Per-invoice collection workflow persistence.
//!
//! A workflow binds one invoice to a cadence. At most one workflow per
//! invoice is active (`uniq_active_workflow_per_invoice`); superseded rows
//! are kept with `is_active = 0` as history. All changes the assignment
//! engine decides for one invoice go through [`WorkflowStore::apply_plan`],
//! which executes them in a single transaction.

use std::collections::HashMap;

use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, Row};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::db::Database;
use crate::error::{StoreError, StoreResult, is_unique_violation};
use crate::model::{AgingBucket, InvoiceStatus, parse_date};

// ═══════════════════════════════════════════════════════════════════════
//  Types
// ═══════════════════════════════════════════════════════════════════════

/// A persisted collection workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionWorkflow {
    pub id: String,
    pub invoice_id: String,
    pub owner_id: String,
    pub aging_bucket: AgingBucket,
    pub template_id: Option<String>,
    /// Day offsets from the due date. `None` when the stored JSON does not
    /// decode to a list of integers.
    pub cadence_days: Option<Vec<i64>>,
    pub tone: String,
    pub is_active: bool,
    pub created_at: i64,
    pub updated_at: i64,
    pub deactivated_at: Option<i64>,
}

/// Fields of a workflow about to be created.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewWorkflow {
    pub aging_bucket: AgingBucket,
    pub template_id: Option<String>,
    pub cadence_days: Vec<i64>,
    pub tone: String,
}

/// What to do with an invoice's workflow.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum WorkflowAction {
    /// Leave workflows untouched.
    Keep,
    /// No active workflow exists; create one.
    Create(NewWorkflow),
    /// Deactivate `previous_id`, void its unsent drafts, create `next`.
    Supersede {
        previous_id: String,
        next: NewWorkflow,
    },
    /// Replace a corrupt cadence in place.
    Repair {
        workflow_id: String,
        cadence_days: Vec<i64>,
    },
}

/// Everything decided for one invoice in one run.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowPlan {
    pub invoice_id: String,
    pub owner_id: String,
    /// New bucket to persist on the invoice, when it changed.
    pub new_bucket: Option<AgingBucket>,
    pub action: WorkflowAction,
}

/// Result of [`WorkflowStore::apply_plan`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanOutcome {
    /// Id of the workflow created by `Create`/`Supersede`.
    pub created_workflow_id: Option<String>,
    /// Unsent drafts voided by a supersession.
    pub drafts_voided: usize,
}

/// The invoice-side data the draft generator needs for one workflow.
#[derive(Debug, Clone)]
pub struct OutreachInvoice {
    pub id: String,
    pub invoice_number: String,
    pub amount_cents: i64,
    pub currency: String,
    pub due_date: NaiveDate,
    pub status: InvoiceStatus,
    pub payment_link: Option<String>,
    pub debtor_name: String,
    pub company_name: String,
}

/// An active workflow joined with its invoice.
#[derive(Debug, Clone)]
pub struct ActiveWorkflow {
    pub workflow: CollectionWorkflow,
    pub invoice: OutreachInvoice,
}

const WORKFLOW_COLUMNS: &str = "w.id, w.invoice_id, w.owner_id, w.aging_bucket, w.template_id, \
     w.cadence_days, w.tone, w.is_active, w.created_at, w.updated_at, w.deactivated_at";

// ═══════════════════════════════════════════════════════════════════════
//  WorkflowStore
// ═══════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct WorkflowStore {
    db: Database,
}

impl WorkflowStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Fetch a workflow by id.
    #[instrument(skip(self))]
    pub async fn get(&self, id: &str) -> StoreResult<Option<CollectionWorkflow>> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                let sql = format!("SELECT {WORKFLOW_COLUMNS} FROM collection_workflows w WHERE w.id = ?1");
                let result = conn.query_row(&sql, rusqlite::params![id], |row| WorkflowRow::read(row, 0));
                match result {
                    Ok(row) => row.into_workflow().map(Some),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(StoreError::Sqlite(e)),
                }
            })
            .await
    }

    /// The active workflow for an invoice, if any.
    #[instrument(skip(self))]
    pub async fn active_for_invoice(&self, invoice_id: &str) -> StoreResult<Option<CollectionWorkflow>> {
        Ok(self
            .history_for_invoice(invoice_id)
            .await?
            .into_iter()
            .find(|w| w.is_active))
    }

    /// Every workflow ever bound to an invoice, oldest first.
    #[instrument(skip(self))]
    pub async fn history_for_invoice(&self, invoice_id: &str) -> StoreResult<Vec<CollectionWorkflow>> {
        let invoice_id = invoice_id.to_string();
        self.db
            .execute(move |conn| {
                let sql = format!(
                    "SELECT {WORKFLOW_COLUMNS} FROM collection_workflows w \
                     WHERE w.invoice_id = ?1 ORDER BY w.created_at ASC, w.id ASC"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(rusqlite::params![invoice_id], |row| WorkflowRow::read(row, 0))?
                    .collect::<Result<Vec<_>, _>>()?;
                rows.into_iter().map(WorkflowRow::into_workflow).collect()
            })
            .await
    }

    /// Bulk-fetch every workflow row for `invoice_ids`, grouped by invoice.
    #[instrument(skip(self, invoice_ids), fields(invoices = invoice_ids.len()))]
    pub async fn for_invoices(
        &self,
        invoice_ids: Vec<String>,
    ) -> StoreResult<HashMap<String, Vec<CollectionWorkflow>>> {
        if invoice_ids.is_empty() {
            return Ok(HashMap::new());
        }

        self.db
            .execute(move |conn| {
                let mut grouped: HashMap<String, Vec<CollectionWorkflow>> = HashMap::new();
                for chunk in invoice_ids.chunks(500) {
                    let placeholders = vec!["?"; chunk.len()].join(", ");
                    let sql = format!(
                        "SELECT {WORKFLOW_COLUMNS} FROM collection_workflows w \
                         WHERE w.invoice_id IN ({placeholders}) ORDER BY w.created_at ASC, w.id ASC"
                    );
                    let mut stmt = conn.prepare(&sql)?;
                    let rows = stmt
                        .query_map(rusqlite::params_from_iter(chunk.iter()), |row| {
                            WorkflowRow::read(row, 0)
                        })?
                        .collect::<Result<Vec<_>, _>>()?;
                    for row in rows {
                        let workflow = row.into_workflow()?;
                        grouped
                            .entry(workflow.invoice_id.clone())
                            .or_default()
                            .push(workflow);
                    }
                }
                Ok(grouped)
            })
            .await
    }

    /// Apply one invoice's plan atomically.
    ///
    /// The bucket write, deactivation, draft voiding and insert either all
    /// land or none do. A second active workflow for the same invoice is
    /// rejected by the partial unique index and surfaces as
    /// [`StoreError::Conflict`].
    #[instrument(skip(self, plan), fields(invoice_id = %plan.invoice_id))]
    pub async fn apply_plan(&self, plan: WorkflowPlan) -> StoreResult<PlanOutcome> {
        let now = Utc::now().timestamp();
        self.db
            .transaction(move |tx| {
                if let Some(bucket) = plan.new_bucket {
                    let updated = tx.execute(
                        "UPDATE invoices SET aging_bucket = ?2, bucket_entered_at = ?3, updated_at = ?3 WHERE id = ?1",
                        rusqlite::params![plan.invoice_id, bucket.as_str(), now],
                    )?;
                    if updated == 0 {
                        return Err(StoreError::NotFound {
                            entity: "invoice",
                            id: plan.invoice_id,
                        });
                    }
                }

                let mut outcome = PlanOutcome::default();
                match plan.action {
                    WorkflowAction::Keep => {}
                    WorkflowAction::Create(next) => {
                        let id = insert_workflow(tx, &plan.invoice_id, &plan.owner_id, &next, now)?;
                        outcome.created_workflow_id = Some(id);
                    }
                    WorkflowAction::Supersede { previous_id, next } => {
                        let deactivated = tx.execute(
                            "UPDATE collection_workflows SET is_active = 0, deactivated_at = ?2, updated_at = ?2 \
                             WHERE id = ?1 AND is_active = 1",
                            rusqlite::params![previous_id, now],
                        )?;
                        if deactivated == 0 {
                            return Err(StoreError::Conflict {
                                entity: "active workflow",
                                key: previous_id,
                            });
                        }
                        outcome.drafts_voided = tx.execute(
                            "UPDATE drafts SET status = 'voided', updated_at = ?2 \
                             WHERE workflow_id = ?1 AND status IN ('pending_approval', 'approved')",
                            rusqlite::params![previous_id, now],
                        )?;
                        let id = insert_workflow(tx, &plan.invoice_id, &plan.owner_id, &next, now)?;
                        outcome.created_workflow_id = Some(id);
                    }
                    WorkflowAction::Repair {
                        workflow_id,
                        cadence_days,
                    } => {
                        let cadence = serde_json::to_string(&cadence_days)?;
                        let updated = tx.execute(
                            "UPDATE collection_workflows SET cadence_days = ?2, updated_at = ?3 \
                             WHERE id = ?1 AND is_active = 1",
                            rusqlite::params![workflow_id, cadence, now],
                        )?;
                        if updated == 0 {
                            return Err(StoreError::NotFound {
                                entity: "active workflow",
                                id: workflow_id,
                            });
                        }
                    }
                }
                Ok(outcome)
            })
            .await
    }

    /// Overwrite a workflow's raw cadence column. Used to simulate
    /// hand-edited or corrupted rows in tests.
    #[cfg(any(test, feature = "test-util"))]
    #[instrument(skip(self))]
    pub async fn set_raw_cadence(&self, id: &str, raw: &str) -> StoreResult<()> {
        let id = id.to_string();
        let raw = raw.to_string();
        self.db
            .execute(move |conn| {
                let updated = conn.execute(
                    "UPDATE collection_workflows SET cadence_days = ?2 WHERE id = ?1",
                    rusqlite::params![id, raw],
                )?;
                if updated == 0 {
                    return Err(StoreError::NotFound {
                        entity: "workflow",
                        id,
                    });
                }
                Ok(())
            })
            .await
    }

    /// Next page of active workflows (ordered by id) whose invoice is still
    /// collectible and whose invoice and debtor are not paused.
    #[instrument(skip(self))]
    pub async fn active_page(
        &self,
        after: Option<String>,
        limit: u32,
    ) -> StoreResult<Vec<ActiveWorkflow>> {
        self.db
            .execute(move |conn| {
                let sql = format!(
                    "SELECT {WORKFLOW_COLUMNS}, \
                            i.invoice_number, i.amount_cents, i.currency, i.due_date, i.status, i.payment_link, \
                            d.name, a.company_name \
                     FROM collection_workflows w \
                     JOIN invoices i ON i.id = w.invoice_id \
                     JOIN debtors d ON d.id = i.debtor_id \
                     JOIN accounts a ON a.id = i.owner_id \
                     WHERE w.is_active = 1 \
                       AND i.status IN ('open', 'in_payment_plan') \
                       AND i.outreach_paused = 0 \
                       AND d.outreach_paused = 0 \
                       AND (?1 IS NULL OR w.id > ?1) \
                     ORDER BY w.id ASC \
                     LIMIT ?2"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(rusqlite::params![after, limit], |row| {
                        let workflow = WorkflowRow::read(row, 0)?;
                        let invoice = (
                            row.get::<_, String>(11)?,
                            row.get::<_, i64>(12)?,
                            row.get::<_, String>(13)?,
                            row.get::<_, String>(14)?,
                            row.get::<_, String>(15)?,
                            row.get::<_, Option<String>>(16)?,
                            row.get::<_, String>(17)?,
                            row.get::<_, String>(18)?,
                        );
                        Ok((workflow, invoice))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;

                rows.into_iter()
                    .map(|(workflow, inv)| {
                        let workflow = workflow.into_workflow()?;
                        let invoice = OutreachInvoice {
                            id: workflow.invoice_id.clone(),
                            invoice_number: inv.0,
                            amount_cents: inv.1,
                            currency: inv.2,
                            due_date: parse_date("due_date", &inv.3)?,
                            status: inv.4.parse()?,
                            payment_link: inv.5,
                            debtor_name: inv.6,
                            company_name: inv.7,
                        };
                        Ok(ActiveWorkflow { workflow, invoice })
                    })
                    .collect()
            })
            .await
    }

    /// Number of active workflows.
    #[instrument(skip(self))]
    pub async fn count_active(&self) -> StoreResult<i64> {
        self.db
            .execute(|conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM collection_workflows WHERE is_active = 1",
                    [],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await
    }
}

fn insert_workflow(
    conn: &Connection,
    invoice_id: &str,
    owner_id: &str,
    next: &NewWorkflow,
    now: i64,
) -> StoreResult<String> {
    let id = Uuid::now_v7().to_string();
    let cadence = serde_json::to_string(&next.cadence_days)?;
    let result = conn.execute(
        "INSERT INTO collection_workflows (id, invoice_id, owner_id, aging_bucket, template_id, cadence_days, tone, \
         is_active, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8, ?8)",
        rusqlite::params![
            id,
            invoice_id,
            owner_id,
            next.aging_bucket.as_str(),
            next.template_id,
            cadence,
            next.tone,
            now
        ],
    );
    match result {
        Ok(_) => {
            debug!(workflow_id = %id, invoice_id, bucket = %next.aging_bucket, "workflow created");
            Ok(id)
        }
        Err(e) if is_unique_violation(&e) => Err(StoreError::Conflict {
            entity: "active workflow",
            key: invoice_id.to_string(),
        }),
        Err(e) => Err(e.into()),
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Internal row type
// ═══════════════════════════════════════════════════════════════════════

struct WorkflowRow {
    id: String,
    invoice_id: String,
    owner_id: String,
    aging_bucket: String,
    template_id: Option<String>,
    cadence_days: String,
    tone: String,
    is_active: bool,
    created_at: i64,
    updated_at: i64,
    deactivated_at: Option<i64>,
}

impl WorkflowRow {
    /// Read the [`WORKFLOW_COLUMNS`] starting at column `base`.
    fn read(row: &Row<'_>, base: usize) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(base)?,
            invoice_id: row.get(base + 1)?,
            owner_id: row.get(base + 2)?,
            aging_bucket: row.get(base + 3)?,
            template_id: row.get(base + 4)?,
            cadence_days: row.get(base + 5)?,
            tone: row.get(base + 6)?,
            is_active: row.get(base + 7)?,
            created_at: row.get(base + 8)?,
            updated_at: row.get(base + 9)?,
            deactivated_at: row.get(base + 10)?,
        })
    }

    fn into_workflow(self) -> StoreResult<CollectionWorkflow> {
        Ok(CollectionWorkflow {
            id: self.id,
            invoice_id: self.invoice_id,
            owner_id: self.owner_id,
            aging_bucket: self.aging_bucket.parse()?,
            template_id: self.template_id,
            cadence_days: serde_json::from_str(&self.cadence_days).ok(),
            tone: self.tone,
            is_active: self.is_active,
            created_at: self.created_at,
            updated_at: self.updated_at,
            deactivated_at: self.deactivated_at,
        })
    }
}

// ── tests ────────────────────────────────────────────────────────────
