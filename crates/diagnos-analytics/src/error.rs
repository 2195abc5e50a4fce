//! Analytics error types.
//!
//! Statistical insufficiency is not an error: services report it as
//! `Ok(None)` or an empty result. These variants cover the cases where the
//! batch job itself could not run.

use thiserror::Error;

/// Errors that can occur while running an analytics job.
#[derive(Debug, Error)]
pub enum AnalyticsError {
    /// A repository read did not finish within the configured bound.
    #[error("query '{operation}' for exam {exam_id} timed out after {secs}s")]
    QueryTimeout {
        operation: &'static str,
        exam_id: String,
        secs: u64,
    },

    /// The exam definition could not be found.
    #[error("exam not found: {0}")]
    ExamNotFound(String),

    /// A threshold value cannot be used for the computation it configures.
    #[error("invalid threshold {name} = {value}")]
    InvalidThreshold { name: &'static str, value: String },

    /// A repository call failed.
    #[error("repository error: {0:#}")]
    Repository(#[from] anyhow::Error),
}

impl AnalyticsError {
    /// Returns `true` if re-running the job later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, AnalyticsError::QueryTimeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, AnalyticsError>;
