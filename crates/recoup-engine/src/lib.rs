//! Collection engine for Recoup.
//!
//! This crate provides:
//!
//! - **Aging**: day-count classification of invoices into aging buckets
//!   via [`aging::classify`].
//! - **Workflow assignment**: one active collection workflow per
//!   collectible invoice, upgraded when the invoice ages into a new bucket,
//!   via [`assignment::WorkflowAssigner`].
//! - **Draft generation**: the earliest due, unhandled cadence step of
//!   each active workflow is drafted via [`drafts::DraftGenerator`].
//! - **Pipeline**: `assign_workflows -> generate_drafts -> trigger_send`
//!   with run records, retries and an overlap lock via
//!   [`pipeline::Pipeline`], plus cron-driven runs via
//!   [`scheduler::PipelineScheduler`].

pub mod aging;
pub mod assignment;
pub mod cadence;
pub mod config;
pub mod drafts;
pub mod error;
pub mod messages;
pub mod pager;
pub mod pipeline;
pub mod render;
pub mod resolver;
pub mod scheduler;
pub mod send;
pub mod sink;

pub use assignment::{AssignmentSummary, WorkflowAssigner};
pub use config::{EngineConfig, ScheduleConfig, SendTriggerConfig};
pub use drafts::{DraftGenerator, DraftSummary};
pub use error::{EngineError, Result, StageAbort};
pub use pipeline::{OutcomeStatus, Pipeline, Stage, StageOutcome, StageSummary};
pub use scheduler::{PipelineScheduler, ScheduleTick, TickCounters, TickDriver};
pub use send::{HttpSendTrigger, NoopSendTrigger, SendSummary, SendTrigger};
pub use sink::ErrorDetail;
