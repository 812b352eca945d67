//! Outreach drafts and delivery logs.
//!
//! A cadence step `(invoice_id, step_number)` is *handled* once it has a
//! non-voided draft or a `sent` outreach log. [`DraftStore::insert_if_unhandled`]
//! performs that check and the insert in one transaction; the
//! `uniq_draft_per_step` partial index backs it up.

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::db::Database;
use crate::error::{StoreError, StoreResult, is_unique_violation};
use crate::model::{AgingBucket, DraftStatus, format_date, parse_date};

// ═══════════════════════════════════════════════════════════════════════
//  Types
// ═══════════════════════════════════════════════════════════════════════

/// A persisted outreach draft.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Draft {
    pub id: String,
    pub invoice_id: String,
    pub workflow_id: String,
    pub step_number: u32,
    pub aging_bucket: AgingBucket,
    pub subject: String,
    pub body: String,
    pub status: DraftStatus,
    /// Message template the content came from, if any.
    pub template_id: Option<String>,
    pub recommended_send_date: NaiveDate,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Fields of a draft about to be inserted.
#[derive(Debug, Clone)]
pub struct NewDraft {
    pub invoice_id: String,
    pub workflow_id: String,
    pub step_number: u32,
    pub aging_bucket: AgingBucket,
    pub subject: String,
    pub body: String,
    pub status: DraftStatus,
    pub template_id: Option<String>,
    pub recommended_send_date: NaiveDate,
}

/// Result of [`DraftStore::insert_if_unhandled`].
#[derive(Debug, Clone)]
pub enum DraftInsert {
    Created(Draft),
    /// A non-voided draft already occupies the step.
    AlreadyDrafted,
    /// The step was already delivered.
    AlreadySent,
}

/// Delivery outcome recorded in `outreach_logs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sent,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  DraftStore
// ═══════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct DraftStore {
    db: Database,
}

impl DraftStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Handled step numbers for each of `invoice_ids`.
    ///
    /// Invoices with nothing handled are absent from the map.
    #[instrument(skip(self, invoice_ids), fields(invoices = invoice_ids.len()))]
    pub async fn handled_steps(
        &self,
        invoice_ids: Vec<String>,
    ) -> StoreResult<HashMap<String, BTreeSet<u32>>> {
        if invoice_ids.is_empty() {
            return Ok(HashMap::new());
        }

        self.db
            .execute(move |conn| {
                let mut handled: HashMap<String, BTreeSet<u32>> = HashMap::new();
                for chunk in invoice_ids.chunks(500) {
                    let placeholders = vec!["?"; chunk.len()].join(", ");
                    let sql = format!(
                        "SELECT invoice_id, step_number FROM drafts \
                           WHERE status != 'voided' AND invoice_id IN ({placeholders}) \
                         UNION \
                         SELECT invoice_id, step_number FROM outreach_logs \
                           WHERE status = 'sent' AND invoice_id IN ({placeholders})"
                    );
                    let mut stmt = conn.prepare(&sql)?;
                    let rows = stmt
                        .query_map(
                            rusqlite::params_from_iter(chunk.iter().chain(chunk.iter())),
                            |row| Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?)),
                        )?
                        .collect::<Result<Vec<_>, _>>()?;
                    for (invoice_id, step) in rows {
                        handled.entry(invoice_id).or_default().insert(step);
                    }
                }
                Ok(handled)
            })
            .await
    }

    /// Those of `invoice_ids` holding a non-voided draft recommended for
    /// `date`.
    #[instrument(skip(self, invoice_ids), fields(invoices = invoice_ids.len()))]
    pub async fn drafted_on(
        &self,
        invoice_ids: Vec<String>,
        date: NaiveDate,
    ) -> StoreResult<HashSet<String>> {
        if invoice_ids.is_empty() {
            return Ok(HashSet::new());
        }

        let date = format_date(date);
        self.db
            .execute(move |conn| {
                let mut drafted = HashSet::new();
                for chunk in invoice_ids.chunks(500) {
                    let placeholders = vec!["?"; chunk.len()].join(", ");
                    let sql = format!(
                        "SELECT DISTINCT invoice_id FROM drafts \
                         WHERE status != 'voided' AND recommended_send_date = ? \
                           AND invoice_id IN ({placeholders})"
                    );
                    let mut stmt = conn.prepare(&sql)?;
                    let rows = stmt
                        .query_map(
                            rusqlite::params_from_iter(std::iter::once(&date).chain(chunk.iter())),
                            |row| row.get::<_, String>(0),
                        )?
                        .collect::<Result<Vec<_>, _>>()?;
                    drafted.extend(rows);
                }
                Ok(drafted)
            })
            .await
    }

    /// Insert `new` unless its step is already handled.
    #[instrument(skip(self, new), fields(invoice_id = %new.invoice_id, step = new.step_number))]
    pub async fn insert_if_unhandled(&self, new: NewDraft) -> StoreResult<DraftInsert> {
        if new.step_number == 0 {
            return Err(StoreError::InvalidArgument(
                "step_number is 1-indexed".into(),
            ));
        }

        let now = Utc::now().timestamp();
        self.db
            .transaction(move |tx| {
                let sent: bool = tx.query_row(
                    "SELECT EXISTS(SELECT 1 FROM outreach_logs \
                     WHERE invoice_id = ?1 AND step_number = ?2 AND status = 'sent')",
                    rusqlite::params![new.invoice_id, new.step_number],
                    |row| row.get(0),
                )?;
                if sent {
                    return Ok(DraftInsert::AlreadySent);
                }

                let drafted: bool = tx.query_row(
                    "SELECT EXISTS(SELECT 1 FROM drafts \
                     WHERE invoice_id = ?1 AND step_number = ?2 AND status != 'voided')",
                    rusqlite::params![new.invoice_id, new.step_number],
                    |row| row.get(0),
                )?;
                if drafted {
                    return Ok(DraftInsert::AlreadyDrafted);
                }

                let draft = Draft {
                    id: Uuid::now_v7().to_string(),
                    invoice_id: new.invoice_id,
                    workflow_id: new.workflow_id,
                    step_number: new.step_number,
                    aging_bucket: new.aging_bucket,
                    subject: new.subject,
                    body: new.body,
                    status: new.status,
                    template_id: new.template_id,
                    recommended_send_date: new.recommended_send_date,
                    created_at: now,
                    updated_at: now,
                };

                let result = tx.execute(
                    "INSERT INTO drafts (id, invoice_id, workflow_id, step_number, aging_bucket, subject, body, \
                     status, template_id, recommended_send_date, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
                    rusqlite::params![
                        draft.id,
                        draft.invoice_id,
                        draft.workflow_id,
                        draft.step_number,
                        draft.aging_bucket.as_str(),
                        draft.subject,
                        draft.body,
                        draft.status.as_str(),
                        draft.template_id,
                        format_date(draft.recommended_send_date),
                        now,
                    ],
                );
                match result {
                    Ok(_) => {
                        debug!(draft_id = %draft.id, status = %draft.status, "draft created");
                        Ok(DraftInsert::Created(draft))
                    }
                    Err(e) if is_unique_violation(&e) => Ok(DraftInsert::AlreadyDrafted),
                    Err(e) => Err(e.into()),
                }
            })
            .await
    }

    /// All drafts for an invoice, oldest first.
    #[instrument(skip(self))]
    pub async fn list_for_invoice(&self, invoice_id: &str) -> StoreResult<Vec<Draft>> {
        let invoice_id = invoice_id.to_string();
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, invoice_id, workflow_id, step_number, aging_bucket, subject, body, status, \
                     template_id, recommended_send_date, created_at, updated_at \
                     FROM drafts WHERE invoice_id = ?1 ORDER BY created_at ASC, id ASC",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![invoice_id], |row| {
                        Ok(DraftRow {
                            id: row.get(0)?,
                            invoice_id: row.get(1)?,
                            workflow_id: row.get(2)?,
                            step_number: row.get(3)?,
                            aging_bucket: row.get(4)?,
                            subject: row.get(5)?,
                            body: row.get(6)?,
                            status: row.get(7)?,
                            template_id: row.get(8)?,
                            recommended_send_date: row.get(9)?,
                            created_at: row.get(10)?,
                            updated_at: row.get(11)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                rows.into_iter().map(DraftRow::into_draft).collect()
            })
            .await
    }

    /// Record a delivery attempt. A `sent` log for a draft also marks the
    /// draft itself `sent`.
    #[instrument(skip(self))]
    pub async fn record_delivery(
        &self,
        invoice_id: &str,
        draft_id: Option<&str>,
        step_number: u32,
        status: DeliveryStatus,
    ) -> StoreResult<String> {
        let id = Uuid::now_v7().to_string();
        let invoice_id = invoice_id.to_string();
        let draft_id = draft_id.map(str::to_string);
        let now = Utc::now().timestamp();

        let log_id = id.clone();
        self.db
            .transaction(move |tx| {
                tx.execute(
                    "INSERT INTO outreach_logs (id, invoice_id, draft_id, step_number, channel, status, sent_at) \
                     VALUES (?1, ?2, ?3, ?4, 'email', ?5, ?6)",
                    rusqlite::params![log_id, invoice_id, draft_id, step_number, status.as_str(), now],
                )?;
                if status == DeliveryStatus::Sent
                    && let Some(draft_id) = &draft_id
                {
                    tx.execute(
                        "UPDATE drafts SET status = 'sent', updated_at = ?2 WHERE id = ?1",
                        rusqlite::params![draft_id, now],
                    )?;
                }
                Ok(())
            })
            .await?;

        debug!(log_id = %id, "outreach logged");
        Ok(id)
    }

    /// Number of drafts in each status.
    #[instrument(skip(self))]
    pub async fn count_by_status(&self) -> StoreResult<HashMap<DraftStatus, i64>> {
        self.db
            .execute(|conn| {
                let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM drafts GROUP BY status")?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
                    .collect::<Result<Vec<_>, _>>()?;
                rows.into_iter()
                    .map(|(status, count)| Ok((status.parse()?, count)))
                    .collect()
            })
            .await
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Internal row type
// ═══════════════════════════════════════════════════════════════════════

struct DraftRow {
    id: String,
    invoice_id: String,
    workflow_id: String,
    step_number: u32,
    aging_bucket: String,
    subject: String,
    body: String,
    status: String,
    template_id: Option<String>,
    recommended_send_date: String,
    created_at: i64,
    updated_at: i64,
}

impl DraftRow {
    fn into_draft(self) -> StoreResult<Draft> {
        Ok(Draft {
            id: self.id,
            invoice_id: self.invoice_id,
            workflow_id: self.workflow_id,
            step_number: self.step_number,
            aging_bucket: self.aging_bucket.parse()?,
            subject: self.subject,
            body: self.body,
            status: self.status.parse()?,
            template_id: self.template_id,
            recommended_send_date: parse_date("recommended_send_date", &self.recommended_send_date)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        InvoiceStatus, NewInvoice, NewWorkflow, ReceivablesStore, WorkflowAction, WorkflowPlan,
        WorkflowStore,
    };

    struct Fixture {
        drafts: DraftStore,
        workflows: WorkflowStore,
        owner: String,
        invoice: String,
        workflow: String,
    }

    async fn setup() -> Fixture {
        let db = Database::in_memory_migrated().await.unwrap();
        let receivables = ReceivablesStore::new(db.clone());
        let owner = receivables.create_account("Acme").await.unwrap();
        let debtor = receivables.create_debtor(&owner, "Globex", None).await.unwrap();
        let invoice = receivables
            .create_invoice(NewInvoice {
                owner_id: owner.clone(),
                debtor_id: debtor,
                invoice_number: "INV-1".into(),
                amount_cents: 10_000,
                currency: "USD".into(),
                due_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
                status: InvoiceStatus::Open,
                payment_link: None,
            })
            .await
            .unwrap()
            .id;

        let workflows = WorkflowStore::new(db.clone());
        let workflow = workflows
            .apply_plan(WorkflowPlan {
                invoice_id: invoice.clone(),
                owner_id: owner.clone(),
                new_bucket: None,
                action: WorkflowAction::Create(NewWorkflow {
                    aging_bucket: AgingBucket::Dpd1To30,
                    template_id: None,
                    cadence_days: vec![0, 3],
                    tone: "friendly".into(),
                }),
            })
            .await
            .unwrap()
            .created_workflow_id
            .unwrap();

        Fixture {
            drafts: DraftStore::new(db),
            workflows,
            owner,
            invoice,
            workflow,
        }
    }

    fn new_draft(f: &Fixture, step: u32) -> NewDraft {
        NewDraft {
            invoice_id: f.invoice.clone(),
            workflow_id: f.workflow.clone(),
            step_number: step,
            aging_bucket: AgingBucket::Dpd1To30,
            subject: "Reminder".into(),
            body: "Please pay".into(),
            status: DraftStatus::PendingApproval,
            template_id: None,
            recommended_send_date: NaiveDate::from_ymd_opt(2026, 1, 5).unwrap(),
        }
    }

    #[tokio::test]
    async fn second_insert_for_step_is_already_drafted() {
        let f = setup().await;
        let first = f.drafts.insert_if_unhandled(new_draft(&f, 1)).await.unwrap();
        assert!(matches!(first, DraftInsert::Created(_)));

        let second = f.drafts.insert_if_unhandled(new_draft(&f, 1)).await.unwrap();
        assert!(matches!(second, DraftInsert::AlreadyDrafted));
        assert_eq!(f.drafts.list_for_invoice(&f.invoice).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn sent_log_suppresses_draft() {
        let f = setup().await;
        f.drafts
            .record_delivery(&f.invoice, None, 2, DeliveryStatus::Sent)
            .await
            .unwrap();

        let result = f.drafts.insert_if_unhandled(new_draft(&f, 2)).await.unwrap();
        assert!(matches!(result, DraftInsert::AlreadySent));
    }

    #[tokio::test]
    async fn failed_log_does_not_suppress() {
        let f = setup().await;
        f.drafts
            .record_delivery(&f.invoice, None, 1, DeliveryStatus::Failed)
            .await
            .unwrap();

        let result = f.drafts.insert_if_unhandled(new_draft(&f, 1)).await.unwrap();
        assert!(matches!(result, DraftInsert::Created(_)));
    }

    #[tokio::test]
    async fn handled_steps_unions_drafts_and_sent_logs() {
        let f = setup().await;
        f.drafts.insert_if_unhandled(new_draft(&f, 1)).await.unwrap();
        f.drafts
            .record_delivery(&f.invoice, None, 3, DeliveryStatus::Sent)
            .await
            .unwrap();

        let handled = f
            .drafts
            .handled_steps(vec![f.invoice.clone(), "other".into()])
            .await
            .unwrap();
        assert_eq!(handled.len(), 1);
        assert_eq!(handled[&f.invoice], BTreeSet::from([1, 3]));
    }

    #[tokio::test]
    async fn drafted_on_matches_recommended_date() {
        let f = setup().await;
        f.drafts.insert_if_unhandled(new_draft(&f, 1)).await.unwrap();

        let ids = vec![f.invoice.clone()];
        let same_day = f
            .drafts
            .drafted_on(ids.clone(), NaiveDate::from_ymd_opt(2026, 1, 5).unwrap())
            .await
            .unwrap();
        assert!(same_day.contains(&f.invoice));

        let next_day = f
            .drafts
            .drafted_on(ids, NaiveDate::from_ymd_opt(2026, 1, 6).unwrap())
            .await
            .unwrap();
        assert!(next_day.is_empty());
    }

    #[tokio::test]
    async fn superseding_voids_unsent_drafts_and_frees_the_slot() {
        let f = setup().await;
        f.drafts.insert_if_unhandled(new_draft(&f, 1)).await.unwrap();

        let outcome = f
            .workflows
            .apply_plan(WorkflowPlan {
                invoice_id: f.invoice.clone(),
                owner_id: f.owner.clone(),
                new_bucket: Some(AgingBucket::Dpd31To60),
                action: WorkflowAction::Supersede {
                    previous_id: f.workflow.clone(),
                    next: NewWorkflow {
                        aging_bucket: AgingBucket::Dpd31To60,
                        template_id: None,
                        cadence_days: vec![31],
                        tone: "firm".into(),
                    },
                },
            })
            .await
            .unwrap();
        assert_eq!(outcome.drafts_voided, 1);

        let drafts = f.drafts.list_for_invoice(&f.invoice).await.unwrap();
        assert_eq!(drafts[0].status, DraftStatus::Voided);
        assert!(
            f.drafts
                .handled_steps(vec![f.invoice.clone()])
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn sent_delivery_marks_draft_sent() {
        let f = setup().await;
        let DraftInsert::Created(draft) = f.drafts.insert_if_unhandled(new_draft(&f, 1)).await.unwrap()
        else {
            panic!("expected a new draft");
        };

        f.drafts
            .record_delivery(&f.invoice, Some(&draft.id), 1, DeliveryStatus::Sent)
            .await
            .unwrap();

        let counts = f.drafts.count_by_status().await.unwrap();
        assert_eq!(counts.get(&DraftStatus::Sent), Some(&1));
    }

    #[tokio::test]
    async fn step_zero_is_rejected() {
        let f = setup().await;
        let result = f.drafts.insert_if_unhandled(new_draft(&f, 0)).await;
        assert!(matches!(result, Err(StoreError::InvalidArgument(_))));
    }
}
