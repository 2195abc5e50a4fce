//! Item calibration.
//!
//! A calibration cycle ranks an exam's completed attempts, derives slip,
//! guess, difficulty and discrimination for every observed question, appends
//! one history row per question and alerts the exam's creator about items
//! that trip up strong respondents or fail to separate strong from weak.
//! Below the attempt floor nothing is written.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::alerts::AlertSink;
use crate::config::{DiagnosConfig, Thresholds};
use crate::error::Result;
use crate::model::{AlertSeverity, AlertType, IntegrityAlert, ItemCalibrationResult};
use crate::psychometrics::{self, round3};
use crate::query::{bounded, require_exam};
use crate::traits::{AttemptRepository, CalibrationRepository, Repositories};

/// What one successful calibration cycle produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRun {
    pub run_id: Uuid,
    pub exam_id: String,
    pub attempt_count: usize,
    pub master_count: usize,
    pub novice_count: usize,
    /// Rows appended to calibration history, sorted by question ID.
    pub rows: Vec<ItemCalibrationResult>,
    /// Alerts inserted by this run.
    pub alerts: Vec<IntegrityAlert>,
    pub calibrated_at: DateTime<Utc>,
}

impl CalibrationRun {
    pub fn row(&self, question_id: &str) -> Option<&ItemCalibrationResult> {
        self.rows.iter().find(|r| r.question_id == question_id)
    }
}

/// Runs calibration cycles and distractor analysis for exams.
pub struct ItemCalibrationService {
    attempts: Arc<dyn AttemptRepository>,
    calibrations: Arc<dyn CalibrationRepository>,
    sink: AlertSink,
    thresholds: Thresholds,
    timeout: Duration,
}

impl ItemCalibrationService {
    pub fn new(repositories: &Repositories, config: &DiagnosConfig) -> Self {
        Self {
            attempts: Arc::clone(&repositories.attempts),
            calibrations: Arc::clone(&repositories.calibrations),
            sink: AlertSink::new(Arc::clone(&repositories.alerts), config.alert_policy),
            thresholds: config.thresholds.clone(),
            timeout: config.query_timeout(),
        }
    }

    /// Calibrate every question of an exam.
    ///
    /// Returns `Ok(None)` without writing anything when the exam has fewer
    /// completed attempts than the configured floor.
    pub async fn run_calibration_cycle(&self, exam_id: &str) -> Result<Option<CalibrationRun>> {
        let attempts = bounded(
            "completed_attempts",
            exam_id,
            self.timeout,
            self.attempts.completed_attempts(exam_id),
        )
        .await?;

        if attempts.len() < self.thresholds.min_attempts {
            tracing::warn!(
                exam_id,
                attempts = attempts.len(),
                required = self.thresholds.min_attempts,
                "not enough completed attempts to calibrate"
            );
            return Ok(None);
        }

        let exam = require_exam(self.attempts.as_ref(), exam_id, self.timeout).await?;
        let cohorts = psychometrics::partition_cohorts(&attempts);
        let (master_count, novice_count) = (cohorts.masters.len(), cohorts.novices.len());
        let stats = psychometrics::calibrate_with_cohorts(&attempts, &cohorts);

        let calibrated_at = Utc::now();
        let rows: Vec<ItemCalibrationResult> = stats
            .iter()
            .map(|s| ItemCalibrationResult {
                id: Uuid::new_v4(),
                exam_id: exam_id.to_string(),
                question_id: s.question_id.clone(),
                slip: round3(s.slip),
                guess: round3(s.guess),
                difficulty: round3(s.difficulty),
                discrimination: round3(s.discrimination),
                sample_size: s.sample_size,
                calibrated_at,
            })
            .collect();
        self.calibrations.append_calibrations(&rows).await?;

        let mut candidates = Vec::new();
        for (row, stat) in rows.iter().zip(&stats) {
            if row.slip > self.thresholds.high_slip_critical {
                candidates.push(
                    IntegrityAlert::new(
                        &exam,
                        AlertType::HighSlip,
                        AlertSeverity::Critical,
                        format!(
                            "{:.0}% of top-quartile respondents missed question {}; the item may be ambiguous",
                            row.slip * 100.0,
                            row.question_id
                        ),
                    )
                    .for_question(&row.question_id)
                    .with_metadata(json!({
                        "slip": row.slip,
                        "threshold": self.thresholds.high_slip_critical,
                        "masters_answered": stat.masters_answered,
                    })),
                );
            }
            if stat.is_comparable() && row.discrimination < self.thresholds.min_discrimination {
                candidates.push(
                    IntegrityAlert::new(
                        &exam,
                        AlertType::LowDiscrimination,
                        AlertSeverity::High,
                        format!(
                            "question {} does not separate strong from weak respondents (discrimination {:.3})",
                            row.question_id, row.discrimination
                        ),
                    )
                    .for_question(&row.question_id)
                    .with_metadata(json!({
                        "discrimination": row.discrimination,
                        "threshold": self.thresholds.min_discrimination,
                    })),
                );
            }
        }
        let alerts = self.sink.emit_all(candidates).await?;

        tracing::info!(
            exam_id,
            attempts = attempts.len(),
            questions = rows.len(),
            alerts = alerts.len(),
            "calibration cycle complete"
        );

        Ok(Some(CalibrationRun {
            run_id: Uuid::new_v4(),
            exam_id: exam_id.to_string(),
            attempt_count: attempts.len(),
            master_count,
            novice_count,
            rows,
            alerts,
            calibrated_at,
        }))
    }

    /// Flag answer options almost nobody picks.
    ///
    /// Uses the same attempt floor as calibration; below it no alerts are
    /// raised. Returns the alerts inserted.
    pub async fn detect_distractor_pathologies(
        &self,
        exam_id: &str,
    ) -> Result<Vec<IntegrityAlert>> {
        let attempts = bounded(
            "completed_attempts",
            exam_id,
            self.timeout,
            self.attempts.completed_attempts(exam_id),
        )
        .await?;
        if attempts.len() < self.thresholds.min_attempts {
            tracing::debug!(exam_id, attempts = attempts.len(), "skipping distractor analysis");
            return Ok(Vec::new());
        }

        let exam = require_exam(self.attempts.as_ref(), exam_id, self.timeout).await?;
        let limit = self.thresholds.useless_distractor_limit;
        let candidates = psychometrics::distractor_usage(Some(&exam), &attempts)
            .into_iter()
            .filter(|u| u.share < limit)
            .map(|u| {
                IntegrityAlert::new(
                    &exam,
                    AlertType::UselessDistractor,
                    AlertSeverity::Low,
                    format!(
                        "option {} of question {} was chosen by {}/{} respondents; pruning suggested",
                        u.option_id, u.question_id, u.selections, u.respondents
                    ),
                )
                .for_question(&u.question_id)
                .for_option(&u.option_id)
                .with_metadata(json!({
                    "share": round3(u.share),
                    "threshold": limit,
                }))
            })
            .collect();
        self.sink.emit_all(candidates).await
    }

    /// Stored calibration rows for one question, oldest first.
    pub async fn calibration_history(
        &self,
        exam_id: &str,
        question_id: &str,
    ) -> Result<Vec<ItemCalibrationResult>> {
        bounded(
            "calibration_history",
            exam_id,
            self.timeout,
            self.calibrations.calibration_history(exam_id, question_id),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use crate::model::{
        AttemptRecord, AttemptStatus, ExamDefinition, QuestionMeta, ResponseRecord, ResultsCache,
    };
    use std::collections::BTreeMap;

    fn exam() -> ExamDefinition {
        ExamDefinition {
            id: "e1".into(),
            creator_id: "teacher-1".into(),
            title: "Kinematics".into(),
            questions: vec![QuestionMeta {
                id: "q1".into(),
                competency_id: Some("velocity".into()),
                option_ids: vec!["A".into(), "B".into(), "C".into(), "D".into()],
                correct_option_id: Some("A".into()),
            }],
        }
    }

    fn attempt(i: usize, score: f64, q1_correct: bool) -> AttemptRecord {
        let response = if q1_correct {
            ResponseRecord::correct("A")
        } else {
            ResponseRecord::incorrect("B")
        };
        AttemptRecord {
            id: format!("a{i:02}"),
            exam_id: "e1".into(),
            learner_id: format!("l{i:02}"),
            status: AttemptStatus::Completed,
            completed_at: Utc::now(),
            current_state: BTreeMap::from([("q1".to_string(), response)]),
            results_cache: ResultsCache {
                score: Some(score),
                labels: vec![],
            },
        }
    }

    fn service(store: &Arc<InMemoryStore>) -> ItemCalibrationService {
        ItemCalibrationService::new(&Repositories::shared(store.clone()), &DiagnosConfig::default())
    }

    #[tokio::test]
    async fn healthy_item_raises_nothing() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_exam(exam());
        for i in 0..12 {
            store.insert_attempt(attempt(i, i as f64, i >= 6));
        }
        let run = service(&store).run_calibration_cycle("e1").await.unwrap().unwrap();
        let row = run.row("q1").unwrap();
        assert_eq!(row.slip, 0.0);
        assert_eq!(row.guess, 0.0);
        assert_eq!(row.difficulty, 0.5);
        assert_eq!(row.discrimination, 1.0);
        assert!(run.alerts.is_empty());
        assert_eq!(store.calibration_writes(), 1);
    }

    #[tokio::test]
    async fn inverted_item_raises_slip_and_discrimination_alerts() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_exam(exam());
        for i in 0..12 {
            store.insert_attempt(attempt(i, i as f64, i < 6));
        }
        let run = service(&store).run_calibration_cycle("e1").await.unwrap().unwrap();
        let types: Vec<_> = run.alerts.iter().map(|a| a.alert_type).collect();
        assert_eq!(types, vec![AlertType::HighSlip, AlertType::LowDiscrimination]);
        assert!(run.alerts.iter().all(|a| a.teacher_id == "teacher-1"));
        assert_eq!(run.row("q1").unwrap().discrimination, -1.0);
    }

    #[tokio::test]
    async fn unknown_exam_with_enough_attempts_is_an_error() {
        let store = Arc::new(InMemoryStore::new());
        for i in 0..10 {
            store.insert_attempt(attempt(i, i as f64, true));
        }
        let err = service(&store).run_calibration_cycle("e1").await.unwrap_err();
        assert!(matches!(err, crate::AnalyticsError::ExamNotFound(_)));
        assert_eq!(store.calibration_writes(), 0);
    }

    #[tokio::test]
    async fn rarely_chosen_options_are_flagged() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_exam(exam());
        // 20 respondents: 15 pick A (correct), 5 pick B; C and D are never chosen.
        for i in 0..20 {
            store.insert_attempt(attempt(i, i as f64, i >= 5));
        }
        let service = service(&store);
        let alerts = service.detect_distractor_pathologies("e1").await.unwrap();
        let options: Vec<_> = alerts.iter().filter_map(|a| a.option_id.as_deref()).collect();
        assert_eq!(options, vec!["C", "D"]);
        assert!(alerts.iter().all(|a| a.severity == AlertSeverity::Low));
        assert_ne!(alerts[0].key(), alerts[1].key());

        // Both are still open, so a second pass adds nothing.
        let again = service.detect_distractor_pathologies("e1").await.unwrap();
        assert!(again.is_empty());
        assert_eq!(store.alert_writes(), 2);
    }

    #[tokio::test]
    async fn history_accumulates_across_runs() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_exam(exam());
        for i in 0..10 {
            store.insert_attempt(attempt(i, i as f64, i >= 5));
        }
        let service = service(&store);
        service.run_calibration_cycle("e1").await.unwrap().unwrap();
        service.run_calibration_cycle("e1").await.unwrap().unwrap();
        let history = service.calibration_history("e1", "q1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_ne!(history[0].id, history[1].id);
        assert_eq!(store.calibration_writes(), 2);
    }
}
