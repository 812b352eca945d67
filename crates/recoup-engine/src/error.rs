//! Engine error types.
//!
//! Every engine subsystem surfaces errors through [`EngineError`]. A stage
//! that has to give up part-way returns a [`StageAbort`] carrying the
//! counts it reached.

/// Unified error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    // -- Storage -------------------------------------------------------------
    /// An error propagated from the store crate.
    #[error("store error: {0}")]
    Store(#[from] recoup_store::StoreError),

    // -- Pipeline ------------------------------------------------------------
    /// Another pipeline run holds the in-process lock.
    #[error("a pipeline run is already in progress")]
    Busy,

    /// The requested stage name is not one of the pipeline stages.
    #[error("unknown stage: {0}")]
    UnknownStage(String),

    // -- Send trigger --------------------------------------------------------
    /// The downstream delivery stage could not be invoked.
    #[error("send trigger failed: {reason}")]
    SendFailed { reason: String },

    // -- Configuration -------------------------------------------------------
    /// A configuration value is out of range or malformed.
    #[error("invalid configuration `{field}`: {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    /// A cron expression is invalid.
    #[error("invalid cron expression `{expression}`: {reason}")]
    InvalidCronExpression { expression: String, reason: String },

    // -- Serialization -------------------------------------------------------
    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    // -- Generic -------------------------------------------------------------
    /// Catch-all for unexpected internal errors.
    #[error("internal engine error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the engine crate.
pub type Result<T> = std::result::Result<T, EngineError>;

/// A stage gave up with a fatal error after doing part of its work.
#[derive(Debug, thiserror::Error)]
#[error("{source}")]
pub struct StageAbort<S> {
    #[source]
    pub source: EngineError,
    /// Counts accumulated before the abort.
    pub partial: S,
}

impl<S> StageAbort<S> {
    pub fn new(source: impl Into<EngineError>, partial: S) -> Self {
        Self {
            source: source.into(),
            partial,
        }
    }

    /// Convert the partial summary, keeping the cause.
    pub fn map<T>(self, f: impl FnOnce(S) -> T) -> StageAbort<T> {
        StageAbort {
            source: self.source,
            partial: f(self.partial),
        }
    }
}
