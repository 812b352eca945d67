//! `recoup setup`: seed the global workflow templates and, optionally, a
//! demo account.

use std::collections::HashSet;

use anyhow::Result;
use chrono::{Days, NaiveDate};
use recoup_store::{
    AgingBucket, Database, InvoiceStatus, NewInvoice, NewWorkflowTemplate, ReceivablesStore,
    TemplateStore,
};
use tracing::info;

/// A global cadence seeded for one bucket.
struct DefaultCadence {
    bucket: AgingBucket,
    name: &'static str,
    tone: &'static str,
    day_offsets: &'static [i64],
}

/// Offsets count from the invoice due date, so later buckets start later.
const DEFAULT_CADENCES: &[DefaultCadence] = &[
    DefaultCadence {
        bucket: AgingBucket::Dpd1To30,
        name: "Friendly reminder",
        tone: "friendly",
        day_offsets: &[1, 7, 14, 21],
    },
    DefaultCadence {
        bucket: AgingBucket::Dpd31To60,
        name: "Firm follow-up",
        tone: "firm",
        day_offsets: &[31, 38, 45, 52],
    },
    DefaultCadence {
        bucket: AgingBucket::Dpd61To90,
        name: "Escalation",
        tone: "firm",
        day_offsets: &[61, 68, 75, 85],
    },
    DefaultCadence {
        bucket: AgingBucket::Dpd91To120,
        name: "Urgent notice",
        tone: "urgent",
        day_offsets: &[91, 98, 105, 115],
    },
    DefaultCadence {
        bucket: AgingBucket::Dpd121To150,
        name: "Pre-collections",
        tone: "urgent",
        day_offsets: &[121, 130, 140],
    },
    DefaultCadence {
        bucket: AgingBucket::Dpd150Plus,
        name: "Final demand",
        tone: "final",
        day_offsets: &[151, 165],
    },
];

/// Create a global template for every actionable bucket that has none.
/// Returns the buckets seeded.
pub async fn seed_default_templates(db: &Database) -> Result<Vec<AgingBucket>> {
    let templates = TemplateStore::new(db.clone());
    let existing: HashSet<AgingBucket> = templates
        .list_active_global_templates()
        .await?
        .into_iter()
        .map(|t| t.aging_bucket)
        .collect();

    let mut seeded = Vec::new();
    for cadence in DEFAULT_CADENCES {
        if existing.contains(&cadence.bucket) {
            continue;
        }
        templates
            .create_workflow_template(NewWorkflowTemplate {
                owner_id: None,
                aging_bucket: cadence.bucket,
                name: cadence.name.to_string(),
                tone: cadence.tone.to_string(),
                day_offsets: cadence.day_offsets.to_vec(),
            })
            .await?;
        info!(bucket = %cadence.bucket, name = cadence.name, "global template seeded");
        seeded.push(cadence.bucket);
    }
    Ok(seeded)
}

/// Create a demo account whose invoices span several aging buckets as of
/// `today`. Returns the number of invoices created.
pub async fn seed_demo_account(db: &Database, today: NaiveDate) -> Result<usize> {
    let receivables = ReceivablesStore::new(db.clone());
    let owner = receivables.create_account("Demo Supplies Ltd").await?;
    let debtor = receivables
        .create_debtor(&owner, "Initech", Some("ap@initech.example"))
        .await?;

    // (invoice number, amount in cents, days past due; negative is not yet due)
    let invoices: [(&str, i64, i64); 4] = [
        ("DEMO-1001", 125_000, -5),
        ("DEMO-1002", 48_000, 10),
        ("DEMO-1003", 310_500, 45),
        ("DEMO-1004", 89_900, 100),
    ];

    for (number, amount_cents, days_past_due) in invoices {
        let offset = Days::new(days_past_due.unsigned_abs());
        let due_date = match days_past_due {
            d if d >= 0 => today.checked_sub_days(offset),
            _ => today.checked_add_days(offset),
        }
        .unwrap_or(today);

        receivables
            .create_invoice(NewInvoice {
                owner_id: owner.clone(),
                debtor_id: debtor.clone(),
                invoice_number: number.to_string(),
                amount_cents,
                currency: "USD".into(),
                due_date,
                status: InvoiceStatus::Open,
                payment_link: None,
            })
            .await?;
    }

    info!(account_id = %owner, invoices = invoices.len(), "demo account created");
    Ok(invoices.len())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use recoup_engine::{EngineConfig, NoopSendTrigger, Pipeline, StageSummary};

    use super::*;

    #[tokio::test]
    async fn seeding_covers_every_actionable_bucket_once() {
        let db = Database::in_memory_migrated().await.unwrap();

        let first = seed_default_templates(&db).await.unwrap();
        assert_eq!(first.len(), 6);
        assert!(!first.contains(&AgingBucket::Current));

        let second = seed_default_templates(&db).await.unwrap();
        assert!(second.is_empty());

        let globals = TemplateStore::new(db)
            .list_active_global_templates()
            .await
            .unwrap();
        assert_eq!(globals.len(), 6);
    }

    #[test]
    fn default_cadences_start_inside_their_bucket() {
        for cadence in DEFAULT_CADENCES {
            let first = cadence.day_offsets[0];
            assert_eq!(recoup_engine::aging::bucket_for_days(first), cadence.bucket);
            assert!(cadence.day_offsets.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[tokio::test]
    async fn demo_account_gets_workflows_and_drafts() {
        let db = Database::in_memory_migrated().await.unwrap();
        let today = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        seed_default_templates(&db).await.unwrap();
        assert_eq!(seed_demo_account(&db, today).await.unwrap(), 4);

        let pipeline = Pipeline::new(db, EngineConfig::default(), Box::new(NoopSendTrigger));
        let outcome = pipeline.run_all(today).await.unwrap();
        assert!(outcome.succeeded());

        let StageSummary::Assignment(assigned) = &outcome.summary else {
            panic!("expected an assignment summary");
        };
        assert_eq!(assigned.scanned, 4);
        assert_eq!(assigned.created, 3);
        assert_eq!(assigned.skipped_current, 1);
    }
}
