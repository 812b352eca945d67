//! Schema migration system.
//!
//! Migrations are static SQL strings keyed by version number. Applied
//! versions are tracked in `_migrations`, so re-running is a no-op.

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

/// All migrations in order. Append only.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "receivables: accounts, debtors, invoices, collection templates",
        sql: r#"
            CREATE TABLE accounts (
                id           TEXT PRIMARY KEY,
                company_name TEXT NOT NULL,
                created_at   INTEGER NOT NULL
            );

            CREATE TABLE debtors (
                id              TEXT PRIMARY KEY,
                owner_id        TEXT NOT NULL REFERENCES accounts(id),
                name            TEXT NOT NULL,
                email           TEXT,
                outreach_paused INTEGER NOT NULL DEFAULT 0,
                created_at      INTEGER NOT NULL
            );

            CREATE TABLE invoices (
                id                TEXT PRIMARY KEY,
                owner_id          TEXT NOT NULL REFERENCES accounts(id),
                debtor_id         TEXT NOT NULL REFERENCES debtors(id),
                invoice_number    TEXT NOT NULL,
                amount_cents      INTEGER NOT NULL,
                currency          TEXT NOT NULL DEFAULT 'USD',
                due_date          TEXT NOT NULL,
                status            TEXT NOT NULL CHECK(status IN (
                                      'open','in_payment_plan','paid','partially_paid',
                                      'disputed','canceled','settled','written_off')),
                aging_bucket      TEXT NOT NULL DEFAULT 'current' CHECK(aging_bucket IN (
                                      'current','dpd_1_30','dpd_31_60','dpd_61_90',
                                      'dpd_91_120','dpd_121_150','dpd_150_plus')),
                bucket_entered_at INTEGER,
                outreach_paused   INTEGER NOT NULL DEFAULT 0,
                payment_link      TEXT,
                created_at        INTEGER NOT NULL,
                updated_at        INTEGER NOT NULL
            );
            CREATE INDEX idx_invoices_collectible ON invoices(status, due_date, id);
            CREATE INDEX idx_invoices_debtor ON invoices(debtor_id);

            CREATE TABLE collection_workflow_templates (
                id           TEXT PRIMARY KEY,
                owner_id     TEXT REFERENCES accounts(id),
                aging_bucket TEXT NOT NULL,
                name         TEXT NOT NULL,
                tone         TEXT NOT NULL DEFAULT 'friendly',
                is_active    INTEGER NOT NULL DEFAULT 1,
                created_at   INTEGER NOT NULL
            );
            CREATE INDEX idx_workflow_templates_lookup
                ON collection_workflow_templates(aging_bucket, owner_id, is_active);

            CREATE TABLE collection_workflow_steps (
                template_id TEXT NOT NULL REFERENCES collection_workflow_templates(id) ON DELETE CASCADE,
                step_order  INTEGER NOT NULL,
                day_offset  INTEGER NOT NULL,
                PRIMARY KEY (template_id, step_order)
            );

            CREATE TABLE message_templates (
                id           TEXT PRIMARY KEY,
                owner_id     TEXT REFERENCES accounts(id),
                aging_bucket TEXT NOT NULL,
                step_number  INTEGER NOT NULL CHECK(step_number >= 1),
                subject      TEXT NOT NULL,
                body         TEXT NOT NULL,
                status       TEXT NOT NULL DEFAULT 'draft' CHECK(status IN ('draft','approved','archived')),
                created_at   INTEGER NOT NULL,
                updated_at   INTEGER NOT NULL
            );
            CREATE INDEX idx_message_templates_lookup
                ON message_templates(aging_bucket, step_number, status);
        "#,
    },
    Migration {
        version: 2,
        description: "outreach: workflows, drafts, outreach logs, outreach errors",
        sql: r#"
            CREATE TABLE collection_workflows (
                id             TEXT PRIMARY KEY,
                invoice_id     TEXT NOT NULL REFERENCES invoices(id),
                owner_id       TEXT NOT NULL,
                aging_bucket   TEXT NOT NULL,
                template_id    TEXT,
                cadence_days   TEXT NOT NULL,
                tone           TEXT NOT NULL,
                is_active      INTEGER NOT NULL DEFAULT 1,
                created_at     INTEGER NOT NULL,
                updated_at     INTEGER NOT NULL,
                deactivated_at INTEGER
            );
            CREATE INDEX idx_workflows_invoice ON collection_workflows(invoice_id);
            CREATE UNIQUE INDEX uniq_active_workflow_per_invoice
                ON collection_workflows(invoice_id) WHERE is_active = 1;

            CREATE TABLE drafts (
                id                    TEXT PRIMARY KEY,
                invoice_id            TEXT NOT NULL REFERENCES invoices(id),
                workflow_id           TEXT NOT NULL REFERENCES collection_workflows(id),
                step_number           INTEGER NOT NULL CHECK(step_number >= 1),
                aging_bucket          TEXT NOT NULL,
                subject               TEXT NOT NULL,
                body                  TEXT NOT NULL,
                status                TEXT NOT NULL CHECK(status IN ('pending_approval','approved','sent','voided')),
                template_id           TEXT,
                recommended_send_date TEXT NOT NULL,
                created_at            INTEGER NOT NULL,
                updated_at            INTEGER NOT NULL
            );
            CREATE UNIQUE INDEX uniq_draft_per_step
                ON drafts(invoice_id, step_number) WHERE status != 'voided';
            CREATE INDEX idx_drafts_workflow ON drafts(workflow_id);

            CREATE TABLE outreach_logs (
                id          TEXT PRIMARY KEY,
                invoice_id  TEXT NOT NULL REFERENCES invoices(id),
                draft_id    TEXT,
                step_number INTEGER NOT NULL,
                channel     TEXT NOT NULL DEFAULT 'email',
                status      TEXT NOT NULL CHECK(status IN ('sent','failed')),
                sent_at     INTEGER NOT NULL
            );
            CREATE INDEX idx_outreach_logs_step ON outreach_logs(invoice_id, step_number);

            CREATE TABLE outreach_errors (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id      TEXT,
                stage       TEXT NOT NULL,
                invoice_id  TEXT,
                workflow_id TEXT,
                step_number INTEGER,
                kind        TEXT NOT NULL,
                message     TEXT NOT NULL,
                payload     TEXT,
                created_at  INTEGER NOT NULL
            );
            CREATE INDEX idx_outreach_errors_created ON outreach_errors(created_at);
        "#,
    },
    Migration {
        version: 3,
        description: "pipeline run records and engine key/value state",
        sql: r#"
            CREATE TABLE pipeline_runs (
                id          TEXT PRIMARY KEY,
                stage       TEXT NOT NULL CHECK(stage IN ('assign_workflows','generate_drafts','trigger_send')),
                attempt     INTEGER NOT NULL,
                status      TEXT NOT NULL CHECK(status IN ('running','completed','failed')),
                started_at  INTEGER NOT NULL,
                finished_at INTEGER,
                summary     TEXT,
                error       TEXT
            );
            CREATE INDEX idx_pipeline_runs_started ON pipeline_runs(started_at);

            CREATE TABLE engine_state (
                key        TEXT PRIMARY KEY,
                value      TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
        "#,
    },
];

// ── public API ───────────────────────────────────────────────────────

/// Run all pending migrations against `conn`.
///
/// Synchronous; call it through [`Database::execute`](crate::Database::execute).
pub fn run_all(conn: &Connection) -> StoreResult<()> {
    ensure_migrations_table(conn)?;

    let current = current_version(conn)?;
    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > current).collect();

    if pending.is_empty() {
        debug!(current_version = current, "database schema is up to date");
        return Ok(());
    }

    info!(
        current_version = current,
        pending = pending.len(),
        "running pending migrations"
    );

    for migration in pending {
        apply(conn, migration)?;
    }

    info!(
        new_version = MIGRATIONS.last().map(|m| m.version).unwrap_or(0),
        "all migrations applied"
    );
    Ok(())
}

/// Return the latest applied migration version, or 0 if none.
pub fn current_version(conn: &Connection) -> StoreResult<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |row| row.get(0),
    )
    .map_err(|e| StoreError::Migration {
        version: 0,
        message: format!("failed to read current version: {e}"),
    })
}

// ── internals ────────────────────────────────────────────────────────

fn ensure_migrations_table(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version     INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at  INTEGER NOT NULL
        );",
    )
    .map_err(|e| StoreError::Migration {
        version: 0,
        message: format!("failed to create _migrations table: {e}"),
    })
}

/// Apply one migration inside a manually managed transaction
/// (`run_all` only has `&Connection`).
fn apply(conn: &Connection, migration: &Migration) -> StoreResult<()> {
    info!(
        version = migration.version,
        description = migration.description,
        "applying migration"
    );

    let fail = |message: String| StoreError::Migration {
        version: migration.version,
        message,
    };

    conn.execute_batch("BEGIN IMMEDIATE;")
        .map_err(|e| fail(format!("failed to begin transaction: {e}")))?;

    let result = (|| -> StoreResult<()> {
        conn.execute_batch(migration.sql)
            .map_err(|e| fail(format!("SQL execution failed: {e}")))?;

        conn.execute(
            "INSERT INTO _migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![
                migration.version,
                migration.description,
                chrono::Utc::now().timestamp()
            ],
        )
        .map_err(|e| fail(format!("failed to record migration: {e}")))?;

        Ok(())
    })();

    match &result {
        Ok(()) => {
            conn.execute_batch("COMMIT;")
                .map_err(|e| fail(format!("failed to commit: {e}")))?;
        }
        Err(err) => {
            warn!(version = migration.version, %err, "migration failed, rolling back");
            let _ = conn.execute_batch("ROLLBACK;");
        }
    }

    result
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", "ON").unwrap();
        conn
    }

    fn seed_invoice(conn: &Connection) {
        conn.execute_batch(
            "INSERT INTO accounts (id, company_name, created_at) VALUES ('a1', 'Acme', 0);
             INSERT INTO debtors (id, owner_id, name, created_at) VALUES ('d1', 'a1', 'Globex', 0);
             INSERT INTO invoices (id, owner_id, debtor_id, invoice_number, amount_cents, due_date, status, created_at, updated_at)
                 VALUES ('i1', 'a1', 'd1', 'INV-1', 1000, '2026-01-01', 'open', 0, 0);",
        )
        .unwrap();
    }

    #[test]
    fn migrations_are_ordered() {
        for pair in MIGRATIONS.windows(2) {
            assert!(pair[0].version < pair[1].version);
        }
    }

    #[test]
    fn run_all_is_idempotent() {
        let conn = setup_conn();
        run_all(&conn).unwrap();
        run_all(&conn).unwrap();
        assert_eq!(
            current_version(&conn).unwrap(),
            MIGRATIONS.last().unwrap().version
        );
    }

    #[test]
    fn migrations_create_all_tables() {
        let conn = setup_conn();
        run_all(&conn).unwrap();

        for table in [
            "accounts",
            "debtors",
            "invoices",
            "collection_workflow_templates",
            "collection_workflow_steps",
            "message_templates",
            "collection_workflows",
            "drafts",
            "outreach_logs",
            "outreach_errors",
            "pipeline_runs",
            "engine_state",
        ] {
            let count: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
                .unwrap();
            assert_eq!(count, 0, "table {table} should start empty");
        }
    }

    #[test]
    fn invoice_status_check_constraint() {
        let conn = setup_conn();
        run_all(&conn).unwrap();
        seed_invoice(&conn);

        let bad = conn.execute(
            "INSERT INTO invoices (id, owner_id, debtor_id, invoice_number, amount_cents, due_date, status, created_at, updated_at) \
             VALUES ('i2', 'a1', 'd1', 'INV-2', 1000, '2026-01-01', 'lost', 0, 0)",
            [],
        );
        assert!(bad.is_err());
    }

    #[test]
    fn only_one_active_workflow_per_invoice() {
        let conn = setup_conn();
        run_all(&conn).unwrap();
        seed_invoice(&conn);

        let insert = |id: &str, active: i64| {
            conn.execute(
                "INSERT INTO collection_workflows (id, invoice_id, owner_id, aging_bucket, cadence_days, tone, is_active, created_at, updated_at) \
                 VALUES (?1, 'i1', 'a1', 'dpd_1_30', '[0]', 'friendly', ?2, 0, 0)",
                rusqlite::params![id, active],
            )
        };

        insert("w1", 1).unwrap();
        insert("w0", 0).unwrap();
        assert!(insert("w2", 1).is_err());
    }

    #[test]
    fn voided_drafts_free_the_step_slot() {
        let conn = setup_conn();
        run_all(&conn).unwrap();
        seed_invoice(&conn);
        conn.execute_batch(
            "INSERT INTO collection_workflows (id, invoice_id, owner_id, aging_bucket, cadence_days, tone, created_at, updated_at) \
             VALUES ('w1', 'i1', 'a1', 'dpd_1_30', '[0]', 'friendly', 0, 0);",
        )
        .unwrap();

        let insert = |id: &str, status: &str| {
            conn.execute(
                "INSERT INTO drafts (id, invoice_id, workflow_id, step_number, aging_bucket, subject, body, status, recommended_send_date, created_at, updated_at) \
                 VALUES (?1, 'i1', 'w1', 1, 'dpd_1_30', 's', 'b', ?2, '2026-01-01', 0, 0)",
                rusqlite::params![id, status],
            )
        };

        insert("d1", "pending_approval").unwrap();
        assert!(insert("d2", "approved").is_err());

        conn.execute("UPDATE drafts SET status = 'voided' WHERE id = 'd1'", [])
            .unwrap();
        insert("d3", "approved").unwrap();
    }
}
