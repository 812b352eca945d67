//! Collection workflow templates (cadences) and message templates (content).
//!
//! Both kinds are keyed by aging bucket and optionally by owning account; a
//! row with `owner_id IS NULL` is the global default. Lookups always prefer
//! the owner-specific row.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::db::Database;
use crate::error::{StoreError, StoreResult};
use crate::model::AgingBucket;

// ═══════════════════════════════════════════════════════════════════════
//  Types
// ═══════════════════════════════════════════════════════════════════════

/// One `(step_order, day_offset)` pair of a cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateStep {
    pub step_order: u32,
    /// Days after the invoice due date at which the step fires.
    pub day_offset: i64,
}

/// A cadence definition for one aging bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub id: String,
    /// `None` for the global default.
    pub owner_id: Option<String>,
    pub aging_bucket: AgingBucket,
    pub name: String,
    pub tone: String,
    pub is_active: bool,
    /// Steps ordered by `step_order`.
    pub steps: Vec<TemplateStep>,
}

impl WorkflowTemplate {
    /// Day offsets in step order.
    pub fn cadence_days(&self) -> Vec<i64> {
        self.steps.iter().map(|s| s.day_offset).collect()
    }
}

/// Fields needed to create a workflow template.
#[derive(Debug, Clone)]
pub struct NewWorkflowTemplate {
    pub owner_id: Option<String>,
    pub aging_bucket: AgingBucket,
    pub name: String,
    pub tone: String,
    /// Offsets for steps 1, 2, 3, ...
    pub day_offsets: Vec<i64>,
}

/// Review state of a message template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageTemplateStatus {
    Draft,
    Approved,
    Archived,
}

impl MessageTemplateStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Approved => "approved",
            Self::Archived => "archived",
        }
    }
}

/// Subject/body text for one cadence step, with `{{ placeholder }}` slots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageTemplate {
    pub id: String,
    pub owner_id: Option<String>,
    pub aging_bucket: AgingBucket,
    pub step_number: u32,
    pub subject: String,
    pub body: String,
}

// ═══════════════════════════════════════════════════════════════════════
//  TemplateStore
// ═══════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct TemplateStore {
    db: Database,
}

impl TemplateStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a workflow template and its steps atomically.
    #[instrument(skip(self, new), fields(bucket = %new.aging_bucket, owner = ?new.owner_id))]
    pub async fn create_workflow_template(
        &self,
        new: NewWorkflowTemplate,
    ) -> StoreResult<WorkflowTemplate> {
        let template = WorkflowTemplate {
            id: Uuid::now_v7().to_string(),
            owner_id: new.owner_id,
            aging_bucket: new.aging_bucket,
            name: new.name,
            tone: new.tone,
            is_active: true,
            steps: new
                .day_offsets
                .iter()
                .enumerate()
                .map(|(i, &day_offset)| TemplateStep {
                    step_order: i as u32 + 1,
                    day_offset,
                })
                .collect(),
        };
        let now = Utc::now().timestamp();

        let row = template.clone();
        self.db
            .transaction(move |tx| {
                tx.execute(
                    "INSERT INTO collection_workflow_templates (id, owner_id, aging_bucket, name, tone, is_active, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)",
                    rusqlite::params![
                        row.id,
                        row.owner_id,
                        row.aging_bucket.as_str(),
                        row.name,
                        row.tone,
                        now
                    ],
                )?;
                let mut stmt = tx.prepare(
                    "INSERT INTO collection_workflow_steps (template_id, step_order, day_offset) VALUES (?1, ?2, ?3)",
                )?;
                for step in &row.steps {
                    stmt.execute(rusqlite::params![row.id, step.step_order, step.day_offset])?;
                }
                Ok(())
            })
            .await?;

        debug!(template_id = %template.id, steps = template.steps.len(), "workflow template created");
        Ok(template)
    }

    /// Enable or retire a workflow template.
    #[instrument(skip(self))]
    pub async fn set_workflow_template_active(&self, id: &str, active: bool) -> StoreResult<()> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                let updated = conn.execute(
                    "UPDATE collection_workflow_templates SET is_active = ?2 WHERE id = ?1",
                    rusqlite::params![id, active],
                )?;
                if updated == 0 {
                    return Err(StoreError::NotFound {
                        entity: "workflow template",
                        id,
                    });
                }
                Ok(())
            })
            .await
    }

    /// Find the active template for `(bucket, owner)`, preferring the
    /// owner's own template over the global default.
    #[instrument(skip(self))]
    pub async fn find_workflow_template(
        &self,
        bucket: AgingBucket,
        owner_id: &str,
    ) -> StoreResult<Option<WorkflowTemplate>> {
        let owner_id = owner_id.to_string();
        self.db
            .execute(move |conn| {
                select_template(
                    conn,
                    "SELECT id, owner_id, name, tone FROM collection_workflow_templates \
                     WHERE aging_bucket = ?1 AND is_active = 1 AND (owner_id = ?2 OR owner_id IS NULL) \
                     ORDER BY owner_id IS NULL ASC, created_at DESC, id DESC LIMIT 1",
                    bucket,
                    &owner_id,
                )
            })
            .await
    }

    /// The owner's own active template for `bucket`, ignoring globals.
    #[instrument(skip(self))]
    pub async fn find_owner_workflow_template(
        &self,
        bucket: AgingBucket,
        owner_id: &str,
    ) -> StoreResult<Option<WorkflowTemplate>> {
        let owner_id = owner_id.to_string();
        self.db
            .execute(move |conn| {
                select_template(
                    conn,
                    "SELECT id, owner_id, name, tone FROM collection_workflow_templates \
                     WHERE aging_bucket = ?1 AND is_active = 1 AND owner_id = ?2 \
                     ORDER BY created_at DESC, id DESC LIMIT 1",
                    bucket,
                    &owner_id,
                )
            })
            .await
    }

    /// All active global templates, used to warm the resolver cache.
    #[instrument(skip(self))]
    pub async fn list_active_global_templates(&self) -> StoreResult<Vec<WorkflowTemplate>> {
        self.db
            .execute(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, aging_bucket, name, tone FROM collection_workflow_templates \
                     WHERE owner_id IS NULL AND is_active = 1 \
                     ORDER BY aging_bucket, created_at DESC, id DESC",
                )?;
                let headers = stmt
                    .query_map([], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;

                let mut templates: Vec<WorkflowTemplate> = Vec::new();
                for (id, bucket, name, tone) in headers {
                    let aging_bucket: AgingBucket = bucket.parse()?;
                    // Newest wins when several globals exist for a bucket.
                    if templates.iter().any(|t| t.aging_bucket == aging_bucket) {
                        continue;
                    }
                    let steps = load_steps(conn, &id)?;
                    templates.push(WorkflowTemplate {
                        id,
                        owner_id: None,
                        aging_bucket,
                        name,
                        tone,
                        is_active: true,
                        steps,
                    });
                }
                Ok(templates)
            })
            .await
    }

    /// Create a message template in the given status.
    #[instrument(skip(self, subject, body))]
    pub async fn create_message_template(
        &self,
        owner_id: Option<&str>,
        bucket: AgingBucket,
        step_number: u32,
        subject: &str,
        body: &str,
        status: MessageTemplateStatus,
    ) -> StoreResult<String> {
        if step_number == 0 {
            return Err(StoreError::InvalidArgument(
                "step_number starts at 1".into(),
            ));
        }

        let id = Uuid::now_v7().to_string();
        let owner_id = owner_id.map(str::to_string);
        let subject = subject.to_string();
        let body = body.to_string();
        let now = Utc::now().timestamp();

        let template_id = id.clone();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO message_templates (id, owner_id, aging_bucket, step_number, subject, body, status, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                    rusqlite::params![
                        template_id,
                        owner_id,
                        bucket.as_str(),
                        step_number,
                        subject,
                        body,
                        status.as_str(),
                        now
                    ],
                )?;
                Ok(())
            })
            .await?;

        Ok(id)
    }

    /// Find the approved message template for a step, owner-specific first.
    #[instrument(skip(self))]
    pub async fn find_approved_message(
        &self,
        owner_id: &str,
        bucket: AgingBucket,
        step_number: u32,
    ) -> StoreResult<Option<MessageTemplate>> {
        let owner_id = owner_id.to_string();
        self.db
            .execute(move |conn| {
                let result = conn.query_row(
                    "SELECT id, owner_id, subject, body FROM message_templates \
                     WHERE aging_bucket = ?1 AND step_number = ?2 AND status = 'approved' \
                       AND (owner_id = ?3 OR owner_id IS NULL) \
                     ORDER BY owner_id IS NULL ASC, updated_at DESC, id DESC LIMIT 1",
                    rusqlite::params![bucket.as_str(), step_number, owner_id],
                    |row| {
                        Ok(MessageTemplate {
                            id: row.get(0)?,
                            owner_id: row.get(1)?,
                            aging_bucket: bucket,
                            step_number,
                            subject: row.get(2)?,
                            body: row.get(3)?,
                        })
                    },
                );
                match result {
                    Ok(t) => Ok(Some(t)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
    }
}

fn select_template(
    conn: &rusqlite::Connection,
    sql: &str,
    bucket: AgingBucket,
    owner_id: &str,
) -> StoreResult<Option<WorkflowTemplate>> {
    let header = conn.query_row(sql, rusqlite::params![bucket.as_str(), owner_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, Option<String>>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
        ))
    });
    let (id, owner_id, name, tone) = match header {
        Ok(h) => h,
        Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let steps = load_steps(conn, &id)?;
    Ok(Some(WorkflowTemplate {
        id,
        owner_id,
        aging_bucket: bucket,
        name,
        tone,
        is_active: true,
        steps,
    }))
}

fn load_steps(conn: &rusqlite::Connection, template_id: &str) -> StoreResult<Vec<TemplateStep>> {
    let mut stmt = conn.prepare(
        "SELECT step_order, day_offset FROM collection_workflow_steps \
         WHERE template_id = ?1 ORDER BY step_order ASC",
    )?;
    let steps = stmt
        .query_map(rusqlite::params![template_id], |row| {
            Ok(TemplateStep {
                step_order: row.get(0)?,
                day_offset: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(steps)
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ReceivablesStore;

    async fn setup() -> (TemplateStore, String) {
        let db = Database::in_memory_migrated().await.unwrap();
        let owner = ReceivablesStore::new(db.clone())
            .create_account("Acme")
            .await
            .unwrap();
        (TemplateStore::new(db), owner)
    }

    fn new_template(owner: Option<&str>, offsets: Vec<i64>) -> NewWorkflowTemplate {
        NewWorkflowTemplate {
            owner_id: owner.map(str::to_string),
            aging_bucket: AgingBucket::Dpd31To60,
            name: "31-60 cadence".into(),
            tone: "firm".into(),
            day_offsets: offsets,
        }
    }

    #[tokio::test]
    async fn global_template_is_found_for_any_owner() {
        let (store, owner) = setup().await;
        store
            .create_workflow_template(new_template(None, vec![31, 38, 45]))
            .await
            .unwrap();

        let found = store
            .find_workflow_template(AgingBucket::Dpd31To60, &owner)
            .await
            .unwrap()
            .unwrap();
        assert!(found.owner_id.is_none());
        assert_eq!(found.cadence_days(), vec![31, 38, 45]);
        assert_eq!(found.steps[2].step_order, 3);
    }

    #[tokio::test]
    async fn owner_template_wins_over_global() {
        let (store, owner) = setup().await;
        store
            .create_workflow_template(new_template(None, vec![31, 38]))
            .await
            .unwrap();
        let own = store
            .create_workflow_template(new_template(Some(&owner), vec![32, 40, 50]))
            .await
            .unwrap();

        let found = store
            .find_workflow_template(AgingBucket::Dpd31To60, &owner)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, own.id);
        assert_eq!(found.cadence_days(), vec![32, 40, 50]);
    }

    #[tokio::test]
    async fn owner_lookup_skips_globals() {
        let (store, owner) = setup().await;
        store
            .create_workflow_template(new_template(None, vec![31]))
            .await
            .unwrap();
        assert!(store
            .find_owner_workflow_template(AgingBucket::Dpd31To60, &owner)
            .await
            .unwrap()
            .is_none());

        let own = store
            .create_workflow_template(new_template(Some(&owner), vec![33]))
            .await
            .unwrap();
        let found = store
            .find_owner_workflow_template(AgingBucket::Dpd31To60, &owner)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, own.id);
    }

    #[tokio::test]
    async fn inactive_templates_are_ignored() {
        let (store, owner) = setup().await;
        let t = store
            .create_workflow_template(new_template(None, vec![31]))
            .await
            .unwrap();
        store
            .set_workflow_template_active(&t.id, false)
            .await
            .unwrap();

        let found = store
            .find_workflow_template(AgingBucket::Dpd31To60, &owner)
            .await
            .unwrap();
        assert!(found.is_none());
        assert!(store.list_active_global_templates().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn only_approved_messages_are_returned() {
        let (store, owner) = setup().await;
        store
            .create_message_template(
                None,
                AgingBucket::Dpd31To60,
                3,
                "draft subject",
                "draft body",
                MessageTemplateStatus::Draft,
            )
            .await
            .unwrap();
        assert!(
            store
                .find_approved_message(&owner, AgingBucket::Dpd31To60, 3)
                .await
                .unwrap()
                .is_none()
        );

        store
            .create_message_template(
                Some(&owner),
                AgingBucket::Dpd31To60,
                3,
                "Invoice {{invoice_number}}",
                "Hello {{customer_name}}",
                MessageTemplateStatus::Approved,
            )
            .await
            .unwrap();
        let found = store
            .find_approved_message(&owner, AgingBucket::Dpd31To60, 3)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.subject, "Invoice {{invoice_number}}");
        assert_eq!(found.owner_id.as_deref(), Some(owner.as_str()));
    }

    #[tokio::test]
    async fn step_number_zero_is_rejected() {
        let (store, _) = setup().await;
        let result = store
            .create_message_template(
                None,
                AgingBucket::Dpd1To30,
                0,
                "s",
                "b",
                MessageTemplateStatus::Approved,
            )
            .await;
        assert!(matches!(result, Err(StoreError::InvalidArgument(_))));
    }
}
