//! Accounts, debtors, and invoices.
//!
//! These rows are owned by billing sync and the dashboard; the engine reads
//! them and only ever writes an invoice's aging bucket (see
//! [`WorkflowStore::apply_plan`](crate::WorkflowStore::apply_plan)). The
//! create/update helpers here exist for seeding and for payment events.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::db::Database;
use crate::error::{StoreError, StoreResult};
use crate::model::{AgingBucket, InvoiceStatus, format_date, parse_date};

// ═══════════════════════════════════════════════════════════════════════
//  Types
// ═══════════════════════════════════════════════════════════════════════

/// Fields needed to create an invoice.
#[derive(Debug, Clone)]
pub struct NewInvoice {
    pub owner_id: String,
    pub debtor_id: String,
    pub invoice_number: String,
    pub amount_cents: i64,
    pub currency: String,
    pub due_date: NaiveDate,
    pub status: InvoiceStatus,
    pub payment_link: Option<String>,
}

/// A persisted invoice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub id: String,
    pub owner_id: String,
    pub debtor_id: String,
    pub invoice_number: String,
    pub amount_cents: i64,
    pub currency: String,
    pub due_date: NaiveDate,
    pub status: InvoiceStatus,
    pub aging_bucket: AgingBucket,
    /// Unix timestamp of the last bucket change, if any.
    pub bucket_entered_at: Option<i64>,
    pub outreach_paused: bool,
    pub payment_link: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Position in the `(due_date, id)` ordering of collectible invoices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceCursor {
    pub due_date: NaiveDate,
    pub id: String,
}

/// One row of the collectible-invoice scan used by workflow assignment.
#[derive(Debug, Clone)]
pub struct CollectibleInvoice {
    pub id: String,
    pub owner_id: String,
    pub debtor_id: String,
    pub due_date: NaiveDate,
    pub status: InvoiceStatus,
    /// The bucket as last persisted (may be stale until reclassified).
    pub stored_bucket: AgingBucket,
    pub debtor_paused: bool,
}

impl CollectibleInvoice {
    pub fn cursor(&self) -> InvoiceCursor {
        InvoiceCursor {
            due_date: self.due_date,
            id: self.id.clone(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  ReceivablesStore
// ═══════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct ReceivablesStore {
    db: Database,
}

impl ReceivablesStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create an account and return its id.
    #[instrument(skip(self))]
    pub async fn create_account(&self, company_name: &str) -> StoreResult<String> {
        let id = Uuid::now_v7().to_string();
        let company_name = company_name.to_string();
        let now = Utc::now().timestamp();

        let account_id = id.clone();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO accounts (id, company_name, created_at) VALUES (?1, ?2, ?3)",
                    rusqlite::params![account_id, company_name, now],
                )?;
                Ok(())
            })
            .await?;

        debug!(account_id = %id, "account created");
        Ok(id)
    }

    /// Create a debtor under `owner_id` and return its id.
    #[instrument(skip(self))]
    pub async fn create_debtor(
        &self,
        owner_id: &str,
        name: &str,
        email: Option<&str>,
    ) -> StoreResult<String> {
        let id = Uuid::now_v7().to_string();
        let owner_id = owner_id.to_string();
        let name = name.to_string();
        let email = email.map(str::to_string);
        let now = Utc::now().timestamp();

        let debtor_id = id.clone();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO debtors (id, owner_id, name, email, outreach_paused, created_at) \
                     VALUES (?1, ?2, ?3, ?4, 0, ?5)",
                    rusqlite::params![debtor_id, owner_id, name, email, now],
                )?;
                Ok(())
            })
            .await?;

        debug!(debtor_id = %id, "debtor created");
        Ok(id)
    }

    /// Pause or resume outreach for every invoice of a debtor.
    #[instrument(skip(self))]
    pub async fn set_debtor_paused(&self, debtor_id: &str, paused: bool) -> StoreResult<()> {
        let id = debtor_id.to_string();
        self.db
            .execute(move |conn| {
                let updated = conn.execute(
                    "UPDATE debtors SET outreach_paused = ?2 WHERE id = ?1",
                    rusqlite::params![id, paused],
                )?;
                if updated == 0 {
                    return Err(StoreError::NotFound {
                        entity: "debtor",
                        id,
                    });
                }
                Ok(())
            })
            .await
    }

    /// Create an invoice in the `current` bucket and return it.
    #[instrument(skip(self, new), fields(invoice_number = %new.invoice_number))]
    pub async fn create_invoice(&self, new: NewInvoice) -> StoreResult<Invoice> {
        let now = Utc::now().timestamp();
        let invoice = Invoice {
            id: Uuid::now_v7().to_string(),
            owner_id: new.owner_id,
            debtor_id: new.debtor_id,
            invoice_number: new.invoice_number,
            amount_cents: new.amount_cents,
            currency: new.currency,
            due_date: new.due_date,
            status: new.status,
            aging_bucket: AgingBucket::Current,
            bucket_entered_at: None,
            outreach_paused: false,
            payment_link: new.payment_link,
            created_at: now,
            updated_at: now,
        };

        let row = invoice.clone();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO invoices (id, owner_id, debtor_id, invoice_number, amount_cents, currency, \
                     due_date, status, aging_bucket, bucket_entered_at, outreach_paused, payment_link, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, NULL, 0, ?10, ?11, ?11)",
                    rusqlite::params![
                        row.id,
                        row.owner_id,
                        row.debtor_id,
                        row.invoice_number,
                        row.amount_cents,
                        row.currency,
                        format_date(row.due_date),
                        row.status.as_str(),
                        row.aging_bucket.as_str(),
                        row.payment_link,
                        row.created_at,
                    ],
                )?;
                Ok(())
            })
            .await?;

        debug!(invoice_id = %invoice.id, "invoice created");
        Ok(invoice)
    }

    /// Fetch an invoice by id.
    #[instrument(skip(self))]
    pub async fn get_invoice(&self, id: &str) -> StoreResult<Option<Invoice>> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                let result = conn.query_row(
                    "SELECT id, owner_id, debtor_id, invoice_number, amount_cents, currency, due_date, status, \
                     aging_bucket, bucket_entered_at, outreach_paused, payment_link, created_at, updated_at \
                     FROM invoices WHERE id = ?1",
                    rusqlite::params![id],
                    |row| {
                        Ok(InvoiceRow {
                            id: row.get(0)?,
                            owner_id: row.get(1)?,
                            debtor_id: row.get(2)?,
                            invoice_number: row.get(3)?,
                            amount_cents: row.get(4)?,
                            currency: row.get(5)?,
                            due_date: row.get(6)?,
                            status: row.get(7)?,
                            aging_bucket: row.get(8)?,
                            bucket_entered_at: row.get(9)?,
                            outreach_paused: row.get(10)?,
                            payment_link: row.get(11)?,
                            created_at: row.get(12)?,
                            updated_at: row.get(13)?,
                        })
                    },
                );
                match result {
                    Ok(row) => row.into_invoice().map(Some),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(StoreError::Sqlite(e)),
                }
            })
            .await
    }

    /// Record a lifecycle change such as a payment or dispute.
    #[instrument(skip(self))]
    pub async fn set_invoice_status(&self, id: &str, status: InvoiceStatus) -> StoreResult<()> {
        let id = id.to_string();
        let now = Utc::now().timestamp();
        self.db
            .execute(move |conn| {
                let updated = conn.execute(
                    "UPDATE invoices SET status = ?2, updated_at = ?3 WHERE id = ?1",
                    rusqlite::params![id, status.as_str(), now],
                )?;
                if updated == 0 {
                    return Err(StoreError::NotFound {
                        entity: "invoice",
                        id,
                    });
                }
                Ok(())
            })
            .await
    }

    /// Move an invoice's due date (used when terms are renegotiated).
    #[instrument(skip(self))]
    pub async fn set_due_date(&self, id: &str, due_date: NaiveDate) -> StoreResult<()> {
        let id = id.to_string();
        let now = Utc::now().timestamp();
        self.db
            .execute(move |conn| {
                let updated = conn.execute(
                    "UPDATE invoices SET due_date = ?2, updated_at = ?3 WHERE id = ?1",
                    rusqlite::params![id, format_date(due_date), now],
                )?;
                if updated == 0 {
                    return Err(StoreError::NotFound {
                        entity: "invoice",
                        id,
                    });
                }
                Ok(())
            })
            .await
    }

    /// Pause or resume outreach for a single invoice.
    #[instrument(skip(self))]
    pub async fn set_invoice_paused(&self, id: &str, paused: bool) -> StoreResult<()> {
        let id = id.to_string();
        let now = Utc::now().timestamp();
        self.db
            .execute(move |conn| {
                let updated = conn.execute(
                    "UPDATE invoices SET outreach_paused = ?2, updated_at = ?3 WHERE id = ?1",
                    rusqlite::params![id, paused, now],
                )?;
                if updated == 0 {
                    return Err(StoreError::NotFound {
                        entity: "invoice",
                        id,
                    });
                }
                Ok(())
            })
            .await
    }

    /// Fetch the next page of collectible invoices after `after`.
    ///
    /// Returns invoices with status `open`/`in_payment_plan` and outreach not
    /// paused on the invoice itself, ordered by `(due_date, id)`. The debtor's
    /// pause flag is returned alongside rather than filtered, so the caller
    /// can count those skips.
    #[instrument(skip(self))]
    pub async fn collectible_page(
        &self,
        after: Option<InvoiceCursor>,
        limit: u32,
    ) -> StoreResult<Vec<CollectibleInvoice>> {
        let (after_date, after_id) = match after {
            Some(c) => (Some(format_date(c.due_date)), Some(c.id)),
            None => (None, None),
        };

        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT i.id, i.owner_id, i.debtor_id, i.due_date, i.status, i.aging_bucket, d.outreach_paused \
                     FROM invoices i JOIN debtors d ON d.id = i.debtor_id \
                     WHERE i.status IN ('open', 'in_payment_plan') \
                       AND i.outreach_paused = 0 \
                       AND (?1 IS NULL OR (i.due_date, i.id) > (?1, ?2)) \
                     ORDER BY i.due_date ASC, i.id ASC \
                     LIMIT ?3",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![after_date, after_id, limit], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, String>(4)?,
                            row.get::<_, String>(5)?,
                            row.get::<_, bool>(6)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;

                rows.into_iter()
                    .map(
                        |(id, owner_id, debtor_id, due_date, status, bucket, debtor_paused)| {
                            Ok(CollectibleInvoice {
                                id,
                                owner_id,
                                debtor_id,
                                due_date: parse_date("due_date", &due_date)?,
                                status: status.parse()?,
                                stored_bucket: bucket.parse()?,
                                debtor_paused,
                            })
                        },
                    )
                    .collect()
            })
            .await
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Internal row type
// ═══════════════════════════════════════════════════════════════════════

struct InvoiceRow {
    id: String,
    owner_id: String,
    debtor_id: String,
    invoice_number: String,
    amount_cents: i64,
    currency: String,
    due_date: String,
    status: String,
    aging_bucket: String,
    bucket_entered_at: Option<i64>,
    outreach_paused: bool,
    payment_link: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl InvoiceRow {
    fn into_invoice(self) -> StoreResult<Invoice> {
        Ok(Invoice {
            id: self.id,
            owner_id: self.owner_id,
            debtor_id: self.debtor_id,
            invoice_number: self.invoice_number,
            amount_cents: self.amount_cents,
            currency: self.currency,
            due_date: parse_date("due_date", &self.due_date)?,
            status: self.status.parse()?,
            aging_bucket: self.aging_bucket.parse()?,
            bucket_entered_at: self.bucket_entered_at,
            outreach_paused: self.outreach_paused,
            payment_link: self.payment_link,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

// ── tests ────────────────────────────────────────────────────────────
