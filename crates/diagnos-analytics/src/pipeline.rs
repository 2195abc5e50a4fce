//! Batch review orchestrator.
//!
//! Within one exam the detectors run strictly in sequence: calibration,
//! distractors, DIF, label audit, drift, topology. Independent exams run
//! concurrently, bounded by the configured parallelism. A failed exam is
//! recorded in the report without aborting the others.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::bias::BiasAnalyzer;
use crate::calibration::ItemCalibrationService;
use crate::config::DiagnosConfig;
use crate::curriculum::CurriculumAnalyzer;
use crate::error::Result;
use crate::report::{ExamFailure, ExamReview, ReviewReport};
use crate::traits::Repositories;

/// Progress reporting trait.
pub trait ReviewProgress: Send + Sync {
    fn on_exam_start(&self, exam_id: &str);
    fn on_exam_complete(&self, review: &ExamReview);
    fn on_exam_error(&self, exam_id: &str, error: &str);
    fn on_batch_complete(&self, total: usize, completed: usize, failed: usize, elapsed: Duration);
}

/// No-op progress reporter.
pub struct NoopProgress;

impl ReviewProgress for NoopProgress {
    fn on_exam_start(&self, _: &str) {}
    fn on_exam_complete(&self, _: &ExamReview) {}
    fn on_exam_error(&self, _: &str, _: &str) {}
    fn on_batch_complete(&self, _: usize, _: usize, _: usize, _: Duration) {}
}

/// Runs every detector over one or more exams.
pub struct ReviewPipeline {
    calibration: ItemCalibrationService,
    bias: BiasAnalyzer,
    curriculum: CurriculumAnalyzer,
    parallelism: usize,
}

impl ReviewPipeline {
    pub fn new(repositories: &Repositories, config: &DiagnosConfig) -> Self {
        Self {
            calibration: ItemCalibrationService::new(repositories, config),
            bias: BiasAnalyzer::new(repositories, config),
            curriculum: CurriculumAnalyzer::new(repositories, config),
            parallelism: config.parallelism.max(1),
        }
    }

    pub fn calibration(&self) -> &ItemCalibrationService {
        &self.calibration
    }

    pub fn bias(&self) -> &BiasAnalyzer {
        &self.bias
    }

    pub fn curriculum(&self) -> &CurriculumAnalyzer {
        &self.curriculum
    }

    /// Review a single exam.
    pub async fn review_exam(&self, exam_id: &str) -> Result<ExamReview> {
        let start = Instant::now();
        let calibration = self.calibration.run_calibration_cycle(exam_id).await?;
        let distractor_alerts = self.calibration.detect_distractor_pathologies(exam_id).await?;
        let dif_alerts = self.bias.detect_item_bias(exam_id).await?;
        let label_alerts = self.bias.audit_cognitive_labels(exam_id).await?;
        let drift_alerts = self.curriculum.detect_concept_drift(exam_id).await?;
        let topology = self.curriculum.validate_graph_topology(exam_id).await?;

        Ok(ExamReview {
            exam_id: exam_id.to_string(),
            calibration,
            distractor_alerts,
            dif_alerts,
            label_alerts,
            drift_alerts,
            topology,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Review several exams concurrently.
    pub async fn review_exams(
        &self,
        exam_ids: &[String],
        progress: &dyn ReviewProgress,
    ) -> ReviewReport {
        let start = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.parallelism));

        let mut futures = FuturesUnordered::new();
        for (position, exam_id) in exam_ids.iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            futures.push(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => {
                        progress.on_exam_start(exam_id);
                        self.review_exam(exam_id).await
                    }
                    Err(_) => Err(anyhow::anyhow!("semaphore closed").into()),
                };
                (position, exam_id, result)
            });
        }

        let mut reviews = Vec::new();
        let mut failures = Vec::new();
        while let Some((position, exam_id, result)) = futures.next().await {
            match result {
                Ok(review) => {
                    progress.on_exam_complete(&review);
                    reviews.push((position, review));
                }
                Err(e) => {
                    tracing::error!("review failed for {exam_id}: {e:#}");
                    progress.on_exam_error(exam_id, &e.to_string());
                    failures.push((
                        position,
                        ExamFailure {
                            exam_id: exam_id.clone(),
                            error: e.to_string(),
                            transient: e.is_transient(),
                        },
                    ));
                }
            }
        }
        reviews.sort_by_key(|(position, _)| *position);
        failures.sort_by_key(|(position, _)| *position);

        let elapsed = start.elapsed();
        progress.on_batch_complete(exam_ids.len(), reviews.len(), failures.len(), elapsed);

        ReviewReport {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            exams: reviews.into_iter().map(|(_, r)| r).collect(),
            failures: failures.into_iter().map(|(_, f)| f).collect(),
            duration_ms: elapsed.as_millis() as u64,
        }
    }
}
