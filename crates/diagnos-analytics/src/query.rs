//! Time-bounded repository reads.

use std::future::Future;
use std::time::Duration;

use crate::error::{AnalyticsError, Result};
use crate::model::ExamDefinition;
use crate::traits::AttemptRepository;

/// Await `query`, failing with [`AnalyticsError::QueryTimeout`] after `limit`.
pub async fn bounded<T, F>(
    operation: &'static str,
    exam_id: &str,
    limit: Duration,
    query: F,
) -> Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(limit, query).await {
        Ok(result) => Ok(result?),
        Err(_) => {
            tracing::warn!(operation, exam_id, secs = limit.as_secs(), "query timed out");
            Err(AnalyticsError::QueryTimeout {
                operation,
                exam_id: exam_id.to_string(),
                secs: limit.as_secs(),
            })
        }
    }
}

/// Load an exam definition or fail with [`AnalyticsError::ExamNotFound`].
pub async fn require_exam(
    repository: &dyn AttemptRepository,
    exam_id: &str,
    limit: Duration,
) -> Result<ExamDefinition> {
    bounded("exam", exam_id, limit, repository.exam(exam_id))
        .await?
        .ok_or_else(|| AnalyticsError::ExamNotFound(exam_id.to_string()))
}
