//! Curricular checks: pass-rate drift per competency and the shape of the
//! prerequisite graph.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::alerts::AlertSink;
use crate::config::{DiagnosConfig, Thresholds};
use crate::error::{AnalyticsError, Result};
use crate::model::{
    AlertSeverity, AlertType, AttemptRecord, IntegrityAlert, PrerequisiteEdge,
};
use crate::psychometrics::{ratio, round3};
use crate::query::{bounded, require_exam};
use crate::traits::{AttemptRepository, CurriculumRepository, Repositories};

/// Pass-rate comparison for one competency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftMeasurement {
    pub competency_id: String,
    pub recent_attempts: usize,
    pub historical_attempts: usize,
    pub recent_pass_rate: f64,
    pub historical_pass_rate: f64,
}

impl DriftMeasurement {
    /// How far the recent pass-rate fell below the baseline.
    pub fn drop(&self) -> f64 {
        self.historical_pass_rate - self.recent_pass_rate
    }
}

/// Outcome of a prerequisite-graph check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyReport {
    pub exam_id: String,
    pub competency_count: usize,
    pub edge_count: usize,
    /// Each cycle's members, sorted. A self-loop is a one-member cycle.
    pub cycles: Vec<Vec<String>>,
    /// Edges with an endpoint the exam does not assess.
    pub orphan_edges: Vec<PrerequisiteEdge>,
    /// Alerts inserted by this check.
    pub alerts: Vec<IntegrityAlert>,
}

impl TopologyReport {
    pub fn is_sound(&self) -> bool {
        self.cycles.is_empty() && self.orphan_edges.is_empty()
    }
}

pub struct CurriculumAnalyzer {
    attempts: Arc<dyn AttemptRepository>,
    curriculum: Arc<dyn CurriculumRepository>,
    sink: AlertSink,
    thresholds: Thresholds,
    timeout: Duration,
}

impl CurriculumAnalyzer {
    pub fn new(repositories: &Repositories, config: &DiagnosConfig) -> Self {
        Self {
            attempts: Arc::clone(&repositories.attempts),
            curriculum: Arc::clone(&repositories.curriculum),
            sink: AlertSink::new(Arc::clone(&repositories.alerts), config.alert_policy),
            thresholds: config.thresholds.clone(),
            timeout: config.query_timeout(),
        }
    }

    /// Compare recent and historical pass-rates as of now.
    pub async fn detect_concept_drift(&self, exam_id: &str) -> Result<Vec<IntegrityAlert>> {
        self.detect_concept_drift_at(exam_id, Utc::now()).await
    }

    /// Compare pass-rates of attempts completed within the drift window
    /// before `now` against everything older.
    ///
    /// Competencies without enough recent or historical attempts are skipped.
    pub async fn detect_concept_drift_at(
        &self,
        exam_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<IntegrityAlert>> {
        let attempts = bounded(
            "completed_attempts",
            exam_id,
            self.timeout,
            self.attempts.completed_attempts(exam_id),
        )
        .await?;
        if attempts.is_empty() {
            return Ok(Vec::new());
        }
        let exam = require_exam(self.attempts.as_ref(), exam_id, self.timeout).await?;
        let competency_of = exam.competency_map();
        let window = self.thresholds.drift_window_days;
        let cutoff = chrono::Duration::try_days(window)
            .filter(|w| *w > chrono::Duration::zero())
            .and_then(|w| now.checked_sub_signed(w))
            .ok_or_else(|| AnalyticsError::InvalidThreshold {
                name: "drift_window_days",
                value: window.to_string(),
            })?;

        let mut candidates = Vec::new();
        for measurement in measure_drift(&attempts, &competency_of, cutoff) {
            if measurement.recent_attempts < self.thresholds.drift_min_recent
                || measurement.historical_attempts < self.thresholds.drift_min_historical
            {
                tracing::debug!(
                    exam_id,
                    competency = %measurement.competency_id,
                    recent = measurement.recent_attempts,
                    historical = measurement.historical_attempts,
                    "not enough attempts to measure drift"
                );
                continue;
            }
            let drop = measurement.drop();
            if drop > self.thresholds.concept_drift_alarm {
                candidates.push(
                    IntegrityAlert::new(
                        &exam,
                        AlertType::ConceptDrift,
                        AlertSeverity::Medium,
                        format!(
                            "pass-rate for {} fell from {:.0}% to {:.0}% over the last {} days",
                            measurement.competency_id,
                            measurement.historical_pass_rate * 100.0,
                            measurement.recent_pass_rate * 100.0,
                            self.thresholds.drift_window_days
                        ),
                    )
                    .for_competency(&measurement.competency_id)
                    .with_metadata(json!({
                        "recent_pass_rate": round3(measurement.recent_pass_rate),
                        "historical_pass_rate": round3(measurement.historical_pass_rate),
                        "recent_attempts": measurement.recent_attempts,
                        "historical_attempts": measurement.historical_attempts,
                        "window_days": self.thresholds.drift_window_days,
                    })),
                );
            }
        }
        self.sink.emit_all(candidates).await
    }

    /// Check the exam's prerequisite graph for cycles and dangling edges.
    pub async fn validate_graph_topology(&self, exam_id: &str) -> Result<TopologyReport> {
        let exam = require_exam(self.attempts.as_ref(), exam_id, self.timeout).await?;
        let edges = bounded(
            "prerequisite_edges",
            exam_id,
            self.timeout,
            self.curriculum.prerequisite_edges(exam_id),
        )
        .await?;

        let assessed: BTreeSet<&str> = exam.competency_map().into_values().collect();
        let cycles = find_cycles(&edges);
        let orphan_edges: Vec<PrerequisiteEdge> = edges
            .iter()
            .filter(|e| {
                !assessed.contains(e.competency_id.as_str())
                    || !assessed.contains(e.prerequisite_id.as_str())
            })
            .cloned()
            .collect();

        let mut candidates = Vec::new();
        for cycle in &cycles {
            candidates.push(
                IntegrityAlert::new(
                    &exam,
                    AlertType::GraphCycle,
                    AlertSeverity::High,
                    format!("prerequisite cycle between {}", cycle.join(", ")),
                )
                .for_competency(&cycle[0])
                .with_metadata(json!({ "members": cycle })),
            );
        }

        // One alert per unknown competency, listing every edge that names it.
        let mut dangling: BTreeMap<&str, Vec<&PrerequisiteEdge>> = BTreeMap::new();
        for edge in &orphan_edges {
            for endpoint in [edge.competency_id.as_str(), edge.prerequisite_id.as_str()] {
                if !assessed.contains(endpoint) {
                    dangling.entry(endpoint).or_default().push(edge);
                }
            }
        }
        for (competency, edges) in &dangling {
            candidates.push(
                IntegrityAlert::new(
                    &exam,
                    AlertType::GraphOrphan,
                    AlertSeverity::Low,
                    format!(
                        "competency {competency} appears in {} prerequisite edge(s) but no question assesses it",
                        edges.len()
                    ),
                )
                .for_competency(*competency)
                .with_metadata(json!({ "edges": edges })),
            );
        }

        let alerts = self.sink.emit_all(candidates).await?;
        tracing::info!(
            exam_id,
            edges = edges.len(),
            cycles = cycles.len(),
            orphans = orphan_edges.len(),
            "topology check complete"
        );

        Ok(TopologyReport {
            exam_id: exam_id.to_string(),
            competency_count: assessed.len(),
            edge_count: edges.len(),
            cycles,
            orphan_edges,
            alerts,
        })
    }
}

/// Per-competency recent/historical comparison, in competency order.
///
/// Attempts completed at or after `cutoff` are recent. An attempt counts
/// towards a competency when it answered at least one of its questions; the
/// pass-rate is taken over those responses.
pub fn measure_drift(
    attempts: &[AttemptRecord],
    competency_of: &BTreeMap<&str, &str>,
    cutoff: DateTime<Utc>,
) -> Vec<DriftMeasurement> {
    #[derive(Default)]
    struct Window {
        attempts: usize,
        correct: usize,
        answered: usize,
    }

    let mut windows: BTreeMap<&str, (Window, Window)> = BTreeMap::new();
    for attempt in attempts {
        let mut touched: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
        for (question_id, response) in &attempt.current_state {
            let Some(&competency) = competency_of.get(question_id.as_str()) else {
                continue;
            };
            let entry = touched.entry(competency).or_default();
            entry.0 += usize::from(response.is_correct);
            entry.1 += 1;
        }
        let recent = attempt.completed_at >= cutoff;
        for (competency, (correct, answered)) in touched {
            let (recent_window, historical_window) = windows.entry(competency).or_default();
            let window = if recent { recent_window } else { historical_window };
            window.attempts += 1;
            window.correct += correct;
            window.answered += answered;
        }
    }

    windows
        .into_iter()
        .map(|(competency, (recent, historical))| DriftMeasurement {
            competency_id: competency.to_string(),
            recent_attempts: recent.attempts,
            historical_attempts: historical.attempts,
            recent_pass_rate: ratio(recent.correct, recent.answered),
            historical_pass_rate: ratio(historical.correct, historical.answered),
        })
        .collect()
}

/// Cycles in the prerequisite graph: strongly connected components with
/// more than one member, plus self-loops. Sorted for stable output.
pub fn find_cycles(edges: &[PrerequisiteEdge]) -> Vec<Vec<String>> {
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let mut index: HashMap<&str, NodeIndex> = HashMap::new();
    for edge in edges {
        let [from, to] = [edge.prerequisite_id.as_str(), edge.competency_id.as_str()]
            .map(|id| *index.entry(id).or_insert_with(|| graph.add_node(id)));
        graph.update_edge(from, to, ());
    }

    let mut cycles: Vec<Vec<String>> = tarjan_scc(&graph)
        .into_iter()
        .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
        .map(|scc| {
            let mut members: Vec<String> = scc.iter().map(|&i| graph[i].to_string()).collect();
            members.sort();
            members
        })
        .collect();
    cycles.sort();
    cycles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use crate::model::{
        AttemptStatus, ExamDefinition, QuestionMeta, ResponseRecord, ResultsCache,
    };
    use chrono::TimeZone;

    fn edge(competency: &str, prerequisite: &str) -> PrerequisiteEdge {
        PrerequisiteEdge {
            competency_id: competency.into(),
            prerequisite_id: prerequisite.into(),
        }
    }

    #[test]
    fn acyclic_graph_has_no_cycles() {
        let edges = vec![edge("b", "a"), edge("c", "b"), edge("c", "a")];
        assert!(find_cycles(&edges).is_empty());
        assert!(find_cycles(&[]).is_empty());
    }

    #[test]
    fn cycles_and_self_loops_are_found() {
        let edges = vec![
            edge("b", "a"),
            edge("c", "b"),
            edge("a", "c"),
            edge("d", "d"),
            edge("e", "a"),
        ];
        assert_eq!(
            find_cycles(&edges),
            vec![vec!["a".to_string(), "b".into(), "c".into()], vec!["d".to_string()]]
        );
    }

    #[test]
    fn drift_splits_attempts_at_the_cutoff() {
        let cutoff = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let make = |i: usize, days: i64, correct: bool| AttemptRecord {
            id: format!("a{i}"),
            exam_id: "e".into(),
            learner_id: format!("l{i}"),
            status: AttemptStatus::Completed,
            completed_at: cutoff + chrono::Duration::days(days),
            current_state: BTreeMap::from([
                (
                    "q1".to_string(),
                    ResponseRecord {
                        is_correct: correct,
                        selected_option_id: None,
                    },
                ),
                ("q9".to_string(), ResponseRecord::correct("A")),
            ]),
            results_cache: ResultsCache::default(),
        };
        let attempts = vec![
            make(0, -3, true),
            make(1, -2, true),
            make(2, -1, false),
            make(3, 0, false),
            make(4, 2, true),
        ];
        let competency_of = BTreeMap::from([("q1", "velocity")]);
        let drift = measure_drift(&attempts, &competency_of, cutoff);
        assert_eq!(drift.len(), 1);
        let m = &drift[0];
        assert_eq!((m.recent_attempts, m.historical_attempts), (2, 3));
        assert_eq!(m.recent_pass_rate, 0.5);
        assert!((m.historical_pass_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((m.drop() - (2.0 / 3.0 - 0.5)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn unusable_drift_window_is_an_error() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_exam(ExamDefinition {
            id: "e1".into(),
            creator_id: "teacher-1".into(),
            title: String::new(),
            questions: vec![QuestionMeta {
                id: "q1".into(),
                competency_id: Some("velocity".into()),
                option_ids: vec![],
                correct_option_id: None,
            }],
        });
        store.insert_attempt(AttemptRecord {
            id: "a1".into(),
            exam_id: "e1".into(),
            learner_id: "l1".into(),
            status: AttemptStatus::Completed,
            completed_at: Utc::now(),
            current_state: BTreeMap::from([("q1".to_string(), ResponseRecord::correct("A"))]),
            results_cache: ResultsCache::default(),
        });

        for window in [i64::MAX, 0, -7] {
            let mut config = DiagnosConfig::default();
            config.thresholds.drift_window_days = window;
            let analyzer = CurriculumAnalyzer::new(&Repositories::shared(store.clone()), &config);
            let err = analyzer.detect_concept_drift("e1").await.unwrap_err();
            assert!(
                matches!(err, AnalyticsError::InvalidThreshold { name: "drift_window_days", .. }),
                "window {window}: {err}"
            );
        }
    }
}
