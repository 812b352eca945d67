//! # recoup-store
//!
//! Storage engine for Recoup.
//!
//! SQLite-backed persistence for receivables (accounts, debtors, invoices),
//! collection templates, per-invoice workflows, outreach drafts and logs,
//! the outreach error sink, and pipeline run records. Per-run lookup caches
//! sit on top via `moka`.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │  CacheLayer (moka, per run)                 │
//! ├─────────────────────────────────────────────┤
//! │  ReceivablesStore   TemplateStore           │
//! │  WorkflowStore      DraftStore              │
//! │  OutreachErrorStore RunStore  EngineState   │
//! ├─────────────────────────────────────────────┤
//! │  Database (rusqlite WAL, IMMEDIATE txns)    │
//! │  Migrations (versioned, transactional)      │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! Two partial unique indexes carry the duplicate-prevention guarantees:
//! one active workflow per invoice, and one non-voided draft per
//! `(invoice_id, step_number)`.
//!
//! ## Quick start
//!
//! ```ignore
//! use recoup_store::{Database, ReceivablesStore, WorkflowStore};
//!
//! let db = Database::open_and_migrate("data/recoup.db").await?;
//! let invoices = ReceivablesStore::new(db.clone());
//! let workflows = WorkflowStore::new(db.clone());
//! ```

pub mod cache;
pub mod db;
pub mod draft_store;
pub mod engine_state;
pub mod error;
pub mod migration;
pub mod model;
pub mod outreach_error_store;
pub mod receivables;
pub mod run_store;
pub mod template_store;
pub mod workflow_store;

// ── re-exports ───────────────────────────────────────────────────────

pub use cache::{CacheLayer, CacheLayerBuilder, CacheStats};
pub use db::Database;
pub use draft_store::{DeliveryStatus, Draft, DraftInsert, DraftStore, NewDraft};
pub use engine_state::EngineStateStore;
pub use error::{StoreError, StoreResult};
pub use model::{AgingBucket, DraftStatus, InvoiceStatus};
pub use outreach_error_store::{NewOutreachError, OutreachError, OutreachErrorStore};
pub use receivables::{CollectibleInvoice, Invoice, InvoiceCursor, NewInvoice, ReceivablesStore};
pub use run_store::{PipelineRun, RunStatus, RunStore};
pub use template_store::{
    MessageTemplate, MessageTemplateStatus, NewWorkflowTemplate, TemplateStep, TemplateStore,
    WorkflowTemplate,
};
pub use workflow_store::{
    ActiveWorkflow, CollectionWorkflow, NewWorkflow, OutreachInvoice, PlanOutcome, WorkflowAction,
    WorkflowPlan, WorkflowStore,
};
