//! Repository traits for the persistence layer.
//!
//! Analytics services only talk to storage through these traits, so the
//! same service code runs against the in-memory store in tests and a real
//! database in production.

use std::sync::Arc;

use async_trait::async_trait;

use crate::model::{
    AlertKey, AttemptRecord, ExamDefinition, IntegrityAlert, ItemCalibrationResult,
    LearnerProfile, PrerequisiteEdge,
};

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

/// Source of exam definitions and graded attempts.
#[async_trait]
pub trait AttemptRepository: Send + Sync {
    /// Completed attempts for an exam. Other statuses are never returned.
    async fn completed_attempts(&self, exam_id: &str) -> anyhow::Result<Vec<AttemptRecord>>;

    /// The exam definition, or `None` when the exam does not exist.
    async fn exam(&self, exam_id: &str) -> anyhow::Result<Option<ExamDefinition>>;

    /// Profiles for the given learners. Unknown learners are omitted.
    async fn learner_profiles(&self, learner_ids: &[String])
        -> anyhow::Result<Vec<LearnerProfile>>;
}

/// Source of prerequisite edges between competencies.
#[async_trait]
pub trait CurriculumRepository: Send + Sync {
    /// Edges registered for the exam's curriculum. They may reference
    /// competencies the exam never assesses.
    async fn prerequisite_edges(&self, exam_id: &str) -> anyhow::Result<Vec<PrerequisiteEdge>>;
}

// ---------------------------------------------------------------------------
// Writes
// ---------------------------------------------------------------------------

/// Append-only calibration history.
#[async_trait]
pub trait CalibrationRepository: Send + Sync {
    /// Append one run's rows as a single batch.
    async fn append_calibrations(&self, rows: &[ItemCalibrationResult]) -> anyhow::Result<()>;

    /// All rows for one question, oldest first.
    async fn calibration_history(
        &self,
        exam_id: &str,
        question_id: &str,
    ) -> anyhow::Result<Vec<ItemCalibrationResult>>;
}

/// Integrity alert storage.
#[async_trait]
pub trait AlertRepository: Send + Sync {
    async fn insert_alert(&self, alert: &IntegrityAlert) -> anyhow::Result<()>;

    /// The unresolved alert with this key, if any.
    async fn find_open(&self, key: &AlertKey) -> anyhow::Result<Option<IntegrityAlert>>;

    /// Every alert for an exam, in insertion order.
    async fn alerts(&self, exam_id: &str) -> anyhow::Result<Vec<IntegrityAlert>>;
}

/// The repositories an analytics service reads from and writes to.
#[derive(Clone)]
pub struct Repositories {
    pub attempts: Arc<dyn AttemptRepository>,
    pub calibrations: Arc<dyn CalibrationRepository>,
    pub alerts: Arc<dyn AlertRepository>,
    pub curriculum: Arc<dyn CurriculumRepository>,
}

impl Repositories {
    /// Use one store for every concern.
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: AttemptRepository
            + CalibrationRepository
            + AlertRepository
            + CurriculumRepository
            + 'static,
    {
        Self {
            attempts: store.clone(),
            calibrations: store.clone(),
            alerts: store.clone(),
            curriculum: store,
        }
    }
}
