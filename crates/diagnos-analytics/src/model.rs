//! Records exchanged with the persistence layer.
//!
//! Attempt logs and exam definitions come in; calibration history rows and
//! integrity alerts go out. Field aliases accept the camelCase spellings the
//! persistence layer uses for the per-question response map.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// One answer inside an attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseRecord {
    #[serde(alias = "isCorrect")]
    pub is_correct: bool,
    #[serde(default, alias = "selectedOptionId")]
    pub selected_option_id: Option<String>,
}

impl ResponseRecord {
    pub fn correct(option: impl Into<String>) -> Self {
        Self {
            is_correct: true,
            selected_option_id: Some(option.into()),
        }
    }

    pub fn incorrect(option: impl Into<String>) -> Self {
        Self {
            is_correct: false,
            selected_option_id: Some(option.into()),
        }
    }
}

/// Lifecycle of an attempt. Only completed attempts feed analytics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    InProgress,
    #[default]
    #[serde(alias = "COMPLETED")]
    Completed,
    Abandoned,
}

/// Values derived once an attempt is graded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultsCache {
    /// Overall score; when absent the fraction of correct responses is used.
    #[serde(default)]
    pub score: Option<f64>,
    /// Behavioural tags assigned by the diagnostic engine (e.g. "impulsive").
    #[serde(default)]
    pub labels: Vec<String>,
}

/// A learner's attempt at one exam.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub id: String,
    pub exam_id: String,
    pub learner_id: String,
    #[serde(default)]
    pub status: AttemptStatus,
    pub completed_at: DateTime<Utc>,
    /// Responses keyed by question ID.
    #[serde(default, alias = "currentState")]
    pub current_state: BTreeMap<String, ResponseRecord>,
    #[serde(default, alias = "resultsCache")]
    pub results_cache: ResultsCache,
}

impl AttemptRecord {
    /// Score used to rank respondents.
    pub fn score(&self) -> f64 {
        if let Some(score) = self.results_cache.score {
            return score;
        }
        if self.current_state.is_empty() {
            return 0.0;
        }
        let correct = self.current_state.values().filter(|r| r.is_correct).count();
        correct as f64 / self.current_state.len() as f64
    }

    /// Whether the engine tagged this attempt with `label` (case-insensitive).
    pub fn has_label(&self, label: &str) -> bool {
        self.results_cache
            .labels
            .iter()
            .any(|l| l.eq_ignore_ascii_case(label))
    }
}

/// Question metadata from the exam definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionMeta {
    pub id: String,
    /// Competency (concept) the question assesses.
    #[serde(default)]
    pub competency_id: Option<String>,
    #[serde(default)]
    pub option_ids: Vec<String>,
    #[serde(default)]
    pub correct_option_id: Option<String>,
}

/// An exam and the teacher who owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamDefinition {
    pub id: String,
    /// Recipient of the exam's integrity alerts.
    pub creator_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub questions: Vec<QuestionMeta>,
}

impl ExamDefinition {
    pub fn question(&self, question_id: &str) -> Option<&QuestionMeta> {
        self.questions.iter().find(|q| q.id == question_id)
    }

    /// Question → competency map for questions that declare one.
    pub fn competency_map(&self) -> BTreeMap<&str, &str> {
        self.questions
            .iter()
            .filter_map(|q| q.competency_id.as_deref().map(|c| (q.id.as_str(), c)))
            .collect()
    }
}

/// Demographic metadata for one learner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearnerProfile {
    pub learner_id: String,
    #[serde(default)]
    pub demographic_group: Option<String>,
}

/// `competency_id` requires `prerequisite_id` to be learned first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrerequisiteEdge {
    pub competency_id: String,
    pub prerequisite_id: String,
}

// ---------------------------------------------------------------------------
// Outputs
// ---------------------------------------------------------------------------

/// One calibration history row. Rows are appended, never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemCalibrationResult {
    pub id: Uuid,
    pub exam_id: String,
    pub question_id: String,
    /// Share of masters answering incorrectly.
    pub slip: f64,
    /// Share of novices answering correctly.
    pub guess: f64,
    /// Share of all respondents answering correctly.
    pub difficulty: f64,
    /// Master pass-rate minus novice pass-rate.
    pub discrimination: f64,
    /// Respondents who answered this question.
    pub sample_size: usize,
    pub calibrated_at: DateTime<Utc>,
}

/// Kinds of integrity alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    HighSlip,
    LowDiscrimination,
    UselessDistractor,
    DifDetected,
    LabelBias,
    ConceptDrift,
    GraphCycle,
    GraphOrphan,
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AlertType::HighSlip => "HIGH_SLIP",
            AlertType::LowDiscrimination => "LOW_DISCRIMINATION",
            AlertType::UselessDistractor => "USELESS_DISTRACTOR",
            AlertType::DifDetected => "DIF_DETECTED",
            AlertType::LabelBias => "LABEL_BIAS",
            AlertType::ConceptDrift => "CONCEPT_DRIFT",
            AlertType::GraphCycle => "GRAPH_CYCLE",
            AlertType::GraphOrphan => "GRAPH_ORPHAN",
        };
        f.write_str(s)
    }
}

/// How urgently an instructor should look at an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertSeverity::Low => write!(f, "LOW"),
            AlertSeverity::Medium => write!(f, "MEDIUM"),
            AlertSeverity::High => write!(f, "HIGH"),
            AlertSeverity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// A condition raised by a detector for an instructor to review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityAlert {
    pub id: Uuid,
    pub teacher_id: String,
    pub exam_id: String,
    #[serde(default)]
    pub question_id: Option<String>,
    #[serde(default)]
    pub competency_id: Option<String>,
    /// Answer option the alert is about, for per-option conditions.
    #[serde(default)]
    pub option_id: Option<String>,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub message: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub is_resolved: bool,
    pub created_at: DateTime<Utc>,
}

impl IntegrityAlert {
    pub fn new(
        exam: &ExamDefinition,
        alert_type: AlertType,
        severity: AlertSeverity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            teacher_id: exam.creator_id.clone(),
            exam_id: exam.id.clone(),
            question_id: None,
            competency_id: None,
            option_id: None,
            alert_type,
            severity,
            message: message.into(),
            metadata: serde_json::Value::Null,
            is_resolved: false,
            created_at: Utc::now(),
        }
    }

    pub fn for_question(mut self, question_id: impl Into<String>) -> Self {
        self.question_id = Some(question_id.into());
        self
    }

    pub fn for_competency(mut self, competency_id: impl Into<String>) -> Self {
        self.competency_id = Some(competency_id.into());
        self
    }

    pub fn for_option(mut self, option_id: impl Into<String>) -> Self {
        self.option_id = Some(option_id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// The condition this alert describes, used for de-duplication.
    pub fn key(&self) -> AlertKey {
        AlertKey {
            exam_id: self.exam_id.clone(),
            question_id: self.question_id.clone(),
            competency_id: self.competency_id.clone(),
            option_id: self.option_id.clone(),
            alert_type: self.alert_type,
        }
    }
}

/// Identity of an alerted condition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlertKey {
    pub exam_id: String,
    pub question_id: Option<String>,
    pub competency_id: Option<String>,
    pub option_id: Option<String>,
    pub alert_type: AlertType,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn score_falls_back_to_correct_fraction() {
        let mut attempt: AttemptRecord = serde_json::from_value(json!({
            "id": "a1",
            "exam_id": "e1",
            "learner_id": "l1",
            "completed_at": "2026-01-05T10:00:00Z",
            "currentState": {
                "q1": {"isCorrect": true, "selectedOptionId": "A"},
                "q2": {"isCorrect": false, "selectedOptionId": "C"},
                "q3": {"isCorrect": true},
                "q4": {"isCorrect": false}
            }
        }))
        .unwrap();
        assert_eq!(attempt.status, AttemptStatus::Completed);
        assert!((attempt.score() - 0.5).abs() < f64::EPSILON);

        attempt.results_cache.score = Some(0.9);
        assert!((attempt.score() - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn labels_match_case_insensitively() {
        let attempt = AttemptRecord {
            id: "a".into(),
            exam_id: "e".into(),
            learner_id: "l".into(),
            status: AttemptStatus::Completed,
            completed_at: Utc::now(),
            current_state: BTreeMap::new(),
            results_cache: ResultsCache {
                score: None,
                labels: vec!["Impulsive".into()],
            },
        };
        assert!(attempt.has_label("impulsive"));
        assert!(!attempt.has_label("reflective"));
        assert_eq!(attempt.score(), 0.0);
    }

    #[test]
    fn alert_serializes_screaming_enums() {
        let exam = ExamDefinition {
            id: "e1".into(),
            creator_id: "t1".into(),
            title: String::new(),
            questions: vec![],
        };
        let alert = IntegrityAlert::new(&exam, AlertType::HighSlip, AlertSeverity::Critical, "slip")
            .for_question("q1");
        let value = serde_json::to_value(&alert).unwrap();
        assert_eq!(value["alert_type"], "HIGH_SLIP");
        assert_eq!(value["severity"], "CRITICAL");
        assert_eq!(value["teacher_id"], "t1");
        assert_eq!(alert.key().question_id.as_deref(), Some("q1"));
    }
}
