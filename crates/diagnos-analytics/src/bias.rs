//! Fairness checks across demographic groups.
//!
//! Both detectors compare per-group rates and alert when the spread between
//! the best and worst group exceeds a threshold. Learners without a
//! demographic group are left out, as are groups smaller than
//! `min_group_size`; with fewer than two groups left there is nothing to
//! compare and no alert is raised.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::alerts::AlertSink;
use crate::config::{DiagnosConfig, Thresholds};
use crate::error::Result;
use crate::model::{AlertSeverity, AlertType, AttemptRecord, IntegrityAlert};
use crate::psychometrics::{self, extremes, group_rates, round3};
use crate::query::{bounded, require_exam};
use crate::traits::{AttemptRepository, Repositories};

/// The behavioural label audited for group bias.
pub const IMPULSIVE_LABEL: &str = "impulsive";

pub struct BiasAnalyzer {
    attempts: Arc<dyn AttemptRepository>,
    sink: AlertSink,
    thresholds: Thresholds,
    timeout: Duration,
}

impl BiasAnalyzer {
    pub fn new(repositories: &Repositories, config: &DiagnosConfig) -> Self {
        Self {
            attempts: Arc::clone(&repositories.attempts),
            sink: AlertSink::new(Arc::clone(&repositories.alerts), config.alert_policy),
            thresholds: config.thresholds.clone(),
            timeout: config.query_timeout(),
        }
    }

    /// Differential item functioning among high-ability respondents.
    ///
    /// Only the top half of respondents by score is considered, so a gap
    /// reflects group membership rather than ability. Each flagged item names
    /// the group with the lowest correct-rate.
    pub async fn detect_item_bias(&self, exam_id: &str) -> Result<Vec<IntegrityAlert>> {
        let attempts = self.completed(exam_id).await?;
        if attempts.is_empty() {
            return Ok(Vec::new());
        }
        let exam = require_exam(self.attempts.as_ref(), exam_id, self.timeout).await?;
        let groups = self.groups_for(exam_id, &attempts).await?;
        let high = psychometrics::high_ability(&attempts);

        let mut candidates = Vec::new();
        for question_id in psychometrics::observed_questions(&attempts) {
            let mut hits: BTreeMap<String, usize> = BTreeMap::new();
            let mut totals: BTreeMap<String, usize> = BTreeMap::new();
            for attempt in &high {
                let (Some(group), Some(response)) = (
                    groups.get(&attempt.learner_id),
                    attempt.current_state.get(question_id),
                ) else {
                    continue;
                };
                *totals.entry(group.clone()).or_default() += 1;
                if response.is_correct {
                    *hits.entry(group.clone()).or_default() += 1;
                }
            }

            let rates = group_rates(&hits, &totals, self.thresholds.min_group_size);
            let Some(((advantaged, max), (disadvantaged, min))) = extremes(&rates) else {
                tracing::debug!(exam_id, question_id, "fewer than two groups, skipping DIF");
                continue;
            };
            let gap = max - min;
            if gap > self.thresholds.dif_gap_warning {
                candidates.push(
                    IntegrityAlert::new(
                        &exam,
                        AlertType::DifDetected,
                        AlertSeverity::High,
                        format!(
                            "question {question_id} disadvantages group {disadvantaged}: \
                             {:.0}% correct vs {:.0}% for group {advantaged} among high-ability respondents",
                            min * 100.0,
                            max * 100.0
                        ),
                    )
                    .for_question(question_id)
                    .with_metadata(json!({
                        "disadvantaged_group": disadvantaged,
                        "advantaged_group": advantaged,
                        "gap": round3(gap),
                        "rates": rates,
                    })),
                );
            }
        }
        self.sink.emit_all(candidates).await
    }

    /// Compare how often each group is labelled impulsive.
    ///
    /// Raises at most one alert per exam, naming the most-labelled group.
    pub async fn audit_cognitive_labels(&self, exam_id: &str) -> Result<Vec<IntegrityAlert>> {
        let attempts = self.completed(exam_id).await?;
        if attempts.is_empty() {
            return Ok(Vec::new());
        }
        let exam = require_exam(self.attempts.as_ref(), exam_id, self.timeout).await?;
        let groups = self.groups_for(exam_id, &attempts).await?;

        let mut hits: BTreeMap<String, usize> = BTreeMap::new();
        let mut totals: BTreeMap<String, usize> = BTreeMap::new();
        for attempt in &attempts {
            let Some(group) = groups.get(&attempt.learner_id) else {
                continue;
            };
            *totals.entry(group.clone()).or_default() += 1;
            if attempt.has_label(IMPULSIVE_LABEL) {
                *hits.entry(group.clone()).or_default() += 1;
            }
        }

        let rates = group_rates(&hits, &totals, self.thresholds.min_group_size);
        let Some(((most, max), (least, min))) = extremes(&rates) else {
            tracing::debug!(exam_id, "fewer than two groups, skipping label audit");
            return Ok(Vec::new());
        };
        let gap = max - min;
        if gap <= self.thresholds.label_bias_threshold {
            return Ok(Vec::new());
        }

        let alert = IntegrityAlert::new(
            &exam,
            AlertType::LabelBias,
            AlertSeverity::High,
            format!(
                "group {most} is labelled '{IMPULSIVE_LABEL}' in {:.0}% of attempts vs {:.0}% for group {least}",
                max * 100.0,
                min * 100.0
            ),
        )
        .with_metadata(json!({
            "label": IMPULSIVE_LABEL,
            "most_labelled_group": most,
            "least_labelled_group": least,
            "gap": round3(gap),
            "rates": rates,
        }));
        self.sink.emit_all(vec![alert]).await
    }

    async fn completed(&self, exam_id: &str) -> Result<Vec<AttemptRecord>> {
        bounded(
            "completed_attempts",
            exam_id,
            self.timeout,
            self.attempts.completed_attempts(exam_id),
        )
        .await
    }

    /// Learner ID → demographic group, for learners that have one.
    async fn groups_for(
        &self,
        exam_id: &str,
        attempts: &[AttemptRecord],
    ) -> Result<HashMap<String, String>> {
        let mut learner_ids: Vec<String> = attempts.iter().map(|a| a.learner_id.clone()).collect();
        learner_ids.sort();
        learner_ids.dedup();
        let profiles = bounded(
            "learner_profiles",
            exam_id,
            self.timeout,
            self.attempts.learner_profiles(&learner_ids),
        )
        .await?;
        Ok(profiles
            .into_iter()
            .filter_map(|p| p.demographic_group.map(|g| (p.learner_id, g)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use crate::model::{
        AttemptStatus, ExamDefinition, LearnerProfile, ResponseRecord, ResultsCache,
    };
    use chrono::Utc;

    fn setup(store: &InMemoryStore) {
        store.insert_exam(ExamDefinition {
            id: "e1".into(),
            creator_id: "t1".into(),
            title: String::new(),
            questions: vec![],
        });
    }

    fn attempt(
        i: usize,
        group: Option<&str>,
        score: f64,
        labels: &[&str],
    ) -> (AttemptRecord, LearnerProfile) {
        let learner_id = format!("l{i:02}");
        let attempt = AttemptRecord {
            id: format!("a{i:02}"),
            exam_id: "e1".into(),
            learner_id: learner_id.clone(),
            status: AttemptStatus::Completed,
            completed_at: Utc::now(),
            current_state: BTreeMap::from([("q1".to_string(), ResponseRecord::correct("A"))]),
            results_cache: ResultsCache {
                score: Some(score),
                labels: labels.iter().map(|l| l.to_string()).collect(),
            },
        };
        let profile = LearnerProfile {
            learner_id,
            demographic_group: group.map(str::to_string),
        };
        (attempt, profile)
    }

    fn analyzer(store: &Arc<InMemoryStore>) -> BiasAnalyzer {
        BiasAnalyzer::new(&Repositories::shared(store.clone()), &DiagnosConfig::default())
    }

    #[tokio::test]
    async fn label_bias_names_the_most_labelled_group() {
        let store = Arc::new(InMemoryStore::new());
        setup(&store);
        for i in 0..8 {
            let group = if i < 4 { "north" } else { "south" };
            let labels: &[&str] = if i < 4 { &["Impulsive"] } else { &[] };
            let (a, p) = attempt(i, Some(group), 0.5, labels);
            store.insert_attempt(a);
            store.insert_learner(p);
        }
        let alerts = analyzer(&store).audit_cognitive_labels("e1").await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, AlertType::LabelBias);
        assert_eq!(alerts[0].metadata["most_labelled_group"], "north");
        assert_eq!(alerts[0].severity, AlertSeverity::High);
    }

    #[tokio::test]
    async fn single_group_is_not_compared() {
        let store = Arc::new(InMemoryStore::new());
        setup(&store);
        for i in 0..6 {
            let group = if i % 2 == 0 { Some("north") } else { None };
            let (a, p) = attempt(i, group, i as f64, &["impulsive"]);
            store.insert_attempt(a);
            store.insert_learner(p);
        }
        let analyzer = analyzer(&store);
        assert!(analyzer.audit_cognitive_labels("e1").await.unwrap().is_empty());
        assert!(analyzer.detect_item_bias("e1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn small_label_gap_is_tolerated() {
        let store = Arc::new(InMemoryStore::new());
        setup(&store);
        // north 2/10 labelled, south 3/10 labelled: gap 0.1 <= 0.2
        for i in 0..20 {
            let group = if i < 10 { "north" } else { "south" };
            let labelled = i < 2 || (10..13).contains(&i);
            let labels: &[&str] = if labelled { &["impulsive"] } else { &[] };
            let (a, p) = attempt(i, Some(group), 0.5, labels);
            store.insert_attempt(a);
            store.insert_learner(p);
        }
        assert!(analyzer(&store).audit_cognitive_labels("e1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn no_attempts_means_no_exam_lookup() {
        let store = Arc::new(InMemoryStore::new());
        let analyzer = analyzer(&store);
        assert!(analyzer.detect_item_bias("missing").await.unwrap().is_empty());
        assert!(analyzer.audit_cognitive_labels("missing").await.unwrap().is_empty());
    }
}
