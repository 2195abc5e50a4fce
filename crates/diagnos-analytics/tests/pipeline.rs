//! End-to-end tests of the analytics services against the in-memory store.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use diagnos_analytics::model::{
    AlertSeverity, AlertType, AttemptRecord, AttemptStatus, ExamDefinition, LearnerProfile,
    PrerequisiteEdge, QuestionMeta, ResponseRecord, ResultsCache,
};
use diagnos_analytics::{
    AlertPolicy, AlertRepository, CalibrationRepository, DiagnosConfig, InMemoryStore,
    NoopProgress, Repositories, ReviewPipeline,
};

fn question(id: &str, competency: &str) -> QuestionMeta {
    QuestionMeta {
        id: id.into(),
        competency_id: Some(competency.into()),
        option_ids: vec!["A".into(), "B".into()],
        correct_option_id: Some("A".into()),
    }
}

fn exam(id: &str) -> ExamDefinition {
    ExamDefinition {
        id: id.into(),
        creator_id: "teacher-7".into(),
        title: "Mechanics".into(),
        questions: vec![question("q1", "velocity"), question("q2", "acceleration")],
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()
}

struct Attempt<'a> {
    exam_id: &'a str,
    index: usize,
    score: f64,
    answers: &'a [(&'a str, bool)],
    completed_at: DateTime<Utc>,
}

impl Attempt<'_> {
    fn build(&self) -> AttemptRecord {
        AttemptRecord {
            id: format!("{}-a{:03}", self.exam_id, self.index),
            exam_id: self.exam_id.into(),
            learner_id: format!("learner-{:03}", self.index),
            status: AttemptStatus::Completed,
            completed_at: self.completed_at,
            current_state: self
                .answers
                .iter()
                .map(|(q, ok)| {
                    let response = if *ok {
                        ResponseRecord::correct("A")
                    } else {
                        ResponseRecord::incorrect("B")
                    };
                    (q.to_string(), response)
                })
                .collect::<BTreeMap<_, _>>(),
            results_cache: ResultsCache {
                score: Some(self.score),
                labels: vec![],
            },
        }
    }
}

/// `n` attempts ranked by index; the top quartile answers q1 incorrectly.
fn seed_inverted(store: &InMemoryStore, exam_id: &str, n: usize) {
    store.insert_exam(exam(exam_id));
    let masters = n.div_ceil(4);
    for i in 0..n {
        let master = i >= n - masters;
        store.insert_attempt(
            Attempt {
                exam_id,
                index: i,
                score: i as f64 / n as f64,
                answers: &[("q1", !master), ("q2", master)],
                completed_at: t0(),
            }
            .build(),
        );
    }
}

fn pipeline(store: &Arc<InMemoryStore>, config: DiagnosConfig) -> ReviewPipeline {
    ReviewPipeline::new(&Repositories::shared(store.clone()), &config)
}

#[tokio::test]
async fn nine_attempts_write_nothing_and_ten_proceed() {
    let store = Arc::new(InMemoryStore::new());
    seed_inverted(&store, "e1", 9);
    let pipeline = pipeline(&store, DiagnosConfig::default());

    let run = pipeline.calibration().run_calibration_cycle("e1").await.unwrap();
    assert!(run.is_none());
    assert_eq!(store.calibration_writes(), 0);
    assert_eq!(store.alert_writes(), 0);

    store.insert_attempt(
        Attempt {
            exam_id: "e1",
            index: 9,
            score: 0.95,
            answers: &[("q1", false), ("q2", true)],
            completed_at: t0(),
        }
        .build(),
    );
    let run = pipeline.calibration().run_calibration_cycle("e1").await.unwrap();
    let run = run.expect("ten attempts reach the floor");
    assert_eq!(run.attempt_count, 10);
    assert_eq!(run.master_count, 3);
    assert_eq!(store.calibration_writes(), 1);
    assert_eq!(store.snapshot().unwrap().calibrations.len(), 2);
}

#[tokio::test]
async fn masters_missing_an_item_means_full_slip_and_a_critical_alert() {
    let store = Arc::new(InMemoryStore::new());
    seed_inverted(&store, "e1", 12);
    let pipeline = pipeline(&store, DiagnosConfig::default());

    let run = pipeline.calibration().run_calibration_cycle("e1").await.unwrap().unwrap();
    let q1 = run.row("q1").unwrap();
    assert_eq!(q1.slip, 1.0);
    assert_eq!(q1.sample_size, 12);

    let slip_alerts: Vec<_> = run
        .alerts
        .iter()
        .filter(|a| a.alert_type == AlertType::HighSlip)
        .collect();
    assert_eq!(slip_alerts.len(), 1);
    assert_eq!(slip_alerts[0].severity, AlertSeverity::Critical);
    assert_eq!(slip_alerts[0].question_id.as_deref(), Some("q1"));
    assert_eq!(slip_alerts[0].teacher_id, "teacher-7");

    // q2 is answered correctly by masters only.
    let q2 = run.row("q2").unwrap();
    assert_eq!(q2.slip, 0.0);
    assert!(run.alerts.iter().all(|a| a.question_id.as_deref() == Some("q1")));
}

#[tokio::test]
async fn dif_names_the_disadvantaged_group() {
    let store = Arc::new(InMemoryStore::new());
    store.insert_exam(exam("e1"));
    // Top half: learners 6..12. Group A always right on q1, group B always wrong.
    for i in 0..12 {
        let high = i >= 6;
        let group = if i % 2 == 0 { "A" } else { "B" };
        let q1 = if high { group == "A" } else { i % 3 == 0 };
        store.insert_attempt(
            Attempt {
                exam_id: "e1",
                index: i,
                score: i as f64,
                answers: &[("q1", q1), ("q2", true)],
                completed_at: t0(),
            }
            .build(),
        );
        store.insert_learner(LearnerProfile {
            learner_id: format!("learner-{i:03}"),
            demographic_group: Some(group.into()),
        });
    }
    let pipeline = pipeline(&store, DiagnosConfig::default());

    let alerts = pipeline.bias().detect_item_bias("e1").await.unwrap();
    assert_eq!(alerts.len(), 1);
    let alert = &alerts[0];
    assert_eq!(alert.alert_type, AlertType::DifDetected);
    assert_eq!(alert.question_id.as_deref(), Some("q1"));
    assert_eq!(alert.metadata["disadvantaged_group"], "B");
    assert!(alert.message.contains("group B"));
}

#[tokio::test]
async fn repeated_cycles_dedupe_open_alerts() {
    let store = Arc::new(InMemoryStore::new());
    seed_inverted(&store, "e1", 12);
    let pipeline = pipeline(&store, DiagnosConfig::default());

    let first = pipeline.calibration().run_calibration_cycle("e1").await.unwrap().unwrap();
    let second = pipeline.calibration().run_calibration_cycle("e1").await.unwrap().unwrap();
    assert!(!first.alerts.is_empty());
    assert!(second.alerts.is_empty());
    assert_eq!(store.alerts("e1").await.unwrap().len(), first.alerts.len());
    // History still grows on every run.
    assert_eq!(store.calibration_history("e1", "q1").await.unwrap().len(), 2);
}

#[tokio::test]
async fn keep_history_policy_appends_every_detection() {
    let store = Arc::new(InMemoryStore::new());
    seed_inverted(&store, "e1", 12);
    let config = DiagnosConfig {
        alert_policy: AlertPolicy::KeepHistory,
        ..DiagnosConfig::default()
    };
    let pipeline = pipeline(&store, config);

    let first = pipeline.calibration().run_calibration_cycle("e1").await.unwrap().unwrap();
    let second = pipeline.calibration().run_calibration_cycle("e1").await.unwrap().unwrap();
    assert_eq!(first.alerts.len(), second.alerts.len());
    assert_eq!(store.alerts("e1").await.unwrap().len(), 2 * first.alerts.len());
}

fn seed_drift(store: &InMemoryStore, recent: usize, historical: usize) {
    store.insert_exam(exam("e1"));
    for i in 0..historical {
        store.insert_attempt(
            Attempt {
                exam_id: "e1",
                index: i,
                score: 0.5,
                answers: &[("q1", true)],
                completed_at: t0() - chrono::Duration::days(30),
            }
            .build(),
        );
    }
    for i in 0..recent {
        store.insert_attempt(
            Attempt {
                exam_id: "e1",
                index: historical + i,
                score: 0.5,
                answers: &[("q1", false)],
                completed_at: t0() - chrono::Duration::days(1),
            }
            .build(),
        );
    }
}

#[tokio::test]
async fn drift_is_reported_per_competency() {
    let store = Arc::new(InMemoryStore::new());
    seed_drift(&store, 5, 10);
    let pipeline = pipeline(&store, DiagnosConfig::default());

    let alerts = pipeline.curriculum().detect_concept_drift_at("e1", t0()).await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, AlertType::ConceptDrift);
    assert_eq!(alerts[0].severity, AlertSeverity::Medium);
    assert_eq!(alerts[0].competency_id.as_deref(), Some("velocity"));
}

#[tokio::test]
async fn too_few_recent_attempts_is_a_no_op() {
    let store = Arc::new(InMemoryStore::new());
    seed_drift(&store, 4, 10);
    let pipeline = pipeline(&store, DiagnosConfig::default());

    let alerts = pipeline.curriculum().detect_concept_drift_at("e1", t0()).await.unwrap();
    assert!(alerts.is_empty());
    assert_eq!(store.alert_writes(), 0);

    let store = Arc::new(InMemoryStore::new());
    seed_drift(&store, 5, 9);
    let pipeline = self::pipeline(&store, DiagnosConfig::default());
    assert!(pipeline
        .curriculum()
        .detect_concept_drift_at("e1", t0())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn topology_reports_cycles_and_orphans() {
    let store = Arc::new(InMemoryStore::new());
    let mut definition = exam("e1");
    definition.questions.push(question("q3", "momentum"));
    store.insert_exam(definition);
    for (competency, prerequisite) in [
        ("acceleration", "velocity"),
        ("momentum", "acceleration"),
        ("velocity", "momentum"),
        ("energy", "velocity"),
    ] {
        store.insert_edge(
            "e1",
            PrerequisiteEdge {
                competency_id: competency.into(),
                prerequisite_id: prerequisite.into(),
            },
        );
    }
    let pipeline = pipeline(&store, DiagnosConfig::default());

    let report = pipeline.curriculum().validate_graph_topology("e1").await.unwrap();
    assert!(!report.is_sound());
    assert_eq!(report.competency_count, 3);
    assert_eq!(report.edge_count, 4);
    assert_eq!(
        report.cycles,
        vec![vec![
            "acceleration".to_string(),
            "momentum".into(),
            "velocity".into()
        ]]
    );
    assert_eq!(report.orphan_edges.len(), 1);
    assert_eq!(report.orphan_edges[0].competency_id, "energy");

    let kinds: Vec<_> = report.alerts.iter().map(|a| (a.alert_type, a.severity)).collect();
    assert_eq!(
        kinds,
        vec![
            (AlertType::GraphCycle, AlertSeverity::High),
            (AlertType::GraphOrphan, AlertSeverity::Low)
        ]
    );
}

#[tokio::test]
async fn sound_graph_raises_nothing() {
    let store = Arc::new(InMemoryStore::new());
    store.insert_exam(exam("e1"));
    store.insert_edge(
        "e1",
        PrerequisiteEdge {
            competency_id: "acceleration".into(),
            prerequisite_id: "velocity".into(),
        },
    );
    let report = pipeline(&store, DiagnosConfig::default())
        .curriculum()
        .validate_graph_topology("e1")
        .await
        .unwrap();
    assert!(report.is_sound());
    assert!(report.alerts.is_empty());
}

#[tokio::test]
async fn batch_review_isolates_failing_exams() {
    let store = Arc::new(InMemoryStore::new());
    seed_inverted(&store, "e1", 12);
    seed_inverted(&store, "e2", 4);
    // e3 has attempts but no definition.
    store.insert_attempt(
        Attempt {
            exam_id: "e3",
            index: 0,
            score: 1.0,
            answers: &[("q1", true)],
            completed_at: t0(),
        }
        .build(),
    );
    let pipeline = pipeline(&store, DiagnosConfig::default());

    let ids: Vec<String> = ["e3", "e1", "e2"].iter().map(|s| s.to_string()).collect();
    let report = pipeline.review_exams(&ids, &NoopProgress).await;

    let reviewed: Vec<_> = report.exams.iter().map(|r| r.exam_id.as_str()).collect();
    assert_eq!(reviewed, vec!["e1", "e2"]);
    assert!(report.exam("e1").unwrap().was_calibrated());
    assert!(!report.exam("e2").unwrap().was_calibrated());

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].exam_id, "e3");
    assert!(!report.failures[0].transient);
    assert!(report.to_markdown().contains("## e1"));
}

#[tokio::test(start_paused = true)]
async fn slow_store_times_out_as_transient_failure() {
    let store = InMemoryStore::new().with_read_delay(Duration::from_secs(120));
    seed_inverted(&store, "e1", 12);
    let store = Arc::new(store);
    let config = DiagnosConfig {
        query_timeout_secs: 2,
        ..DiagnosConfig::default()
    };
    let pipeline = pipeline(&store, config);

    let report = pipeline.review_exams(&["e1".to_string()], &NoopProgress).await;
    assert!(report.exams.is_empty());
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].transient);
    assert_eq!(store.calibration_writes(), 0);
}

fn seed_four_option_exam(store: &InMemoryStore) {
    store.insert_exam(ExamDefinition {
        questions: vec![QuestionMeta {
            id: "q1".into(),
            competency_id: Some("velocity".into()),
            option_ids: vec!["A".into(), "B".into(), "C".into(), "D".into()],
            correct_option_id: Some("A".into()),
        }],
        ..exam("e1")
    });
    // Everyone picks A or B; C and D are never chosen.
    for i in 0..12 {
        store.insert_attempt(
            Attempt {
                exam_id: "e1",
                index: i,
                score: i as f64,
                answers: &[("q1", i % 2 == 0)],
                completed_at: t0(),
            }
            .build(),
        );
    }
}

#[tokio::test]
async fn every_unused_option_on_a_question_gets_its_own_alert() {
    let store = Arc::new(InMemoryStore::new());
    seed_four_option_exam(&store);
    let pipeline = pipeline(&store, DiagnosConfig::default());

    let review = pipeline.review_exam("e1").await.unwrap();
    let options: Vec<_> = review
        .distractor_alerts
        .iter()
        .map(|a| {
            assert_eq!(a.alert_type, AlertType::UselessDistractor);
            assert_eq!(a.question_id.as_deref(), Some("q1"));
            a.option_id.as_deref().unwrap()
        })
        .collect();
    assert_eq!(options, vec!["C", "D"]);

    let stored = store.alerts("e1").await.unwrap();
    let stored_distractors = stored
        .iter()
        .filter(|a| a.alert_type == AlertType::UselessDistractor)
        .count();
    assert_eq!(stored_distractors, 2);
}

#[tokio::test]
async fn rerun_does_not_duplicate_open_distractor_alerts() {
    let store = Arc::new(InMemoryStore::new());
    seed_four_option_exam(&store);
    let pipeline = pipeline(&store, DiagnosConfig::default());

    let first = pipeline.review_exam("e1").await.unwrap();
    assert_eq!(first.distractor_alerts.len(), 2);
    let second = pipeline.review_exam("e1").await.unwrap();
    assert!(second.distractor_alerts.is_empty());

    let stored = store.alerts("e1").await.unwrap();
    let stored_distractors = stored
        .iter()
        .filter(|a| a.alert_type == AlertType::UselessDistractor)
        .count();
    assert_eq!(stored_distractors, 2);

    // Resolving one lets only that option be raised again.
    let resolved = store.resolve_alerts(&first.distractor_alerts[0].key());
    assert_eq!(resolved, 1);
    let third = pipeline.review_exam("e1").await.unwrap();
    let reraised: Vec<_> = third
        .distractor_alerts
        .iter()
        .filter_map(|a| a.option_id.as_deref())
        .collect();
    assert_eq!(reraised, vec!["C"]);
}
