//! Pure psychometric calculations over attempt records.
//!
//! Nothing here touches storage. Every rate is a plain ratio in [0, 1] and a
//! zero denominator yields 0.0: an item nobody in a cohort answered simply
//! has no rate for that cohort.

use std::collections::{BTreeMap, BTreeSet};

use crate::model::{AttemptRecord, ExamDefinition};

/// `numerator / denominator`, or 0.0 when the denominator is zero.
pub fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        return 0.0;
    }
    numerator as f64 / denominator as f64
}

/// Round to three decimals, the precision stored in calibration history.
pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Attempts sorted by score descending, ties broken by attempt ID.
pub fn rank_attempts(attempts: &[AttemptRecord]) -> Vec<&AttemptRecord> {
    let mut ranked: Vec<&AttemptRecord> = attempts.iter().collect();
    ranked.sort_by(|a, b| b.score().total_cmp(&a.score()).then_with(|| a.id.cmp(&b.id)));
    ranked
}

/// High- and low-ability slices of a ranked attempt set.
#[derive(Debug, Clone)]
pub struct Cohorts<'a> {
    pub masters: Vec<&'a AttemptRecord>,
    pub novices: Vec<&'a AttemptRecord>,
}

/// Top and bottom quartiles, each `ceil(n / 4)` attempts.
///
/// With fewer than eight attempts the quartiles overlap; that is accepted,
/// since calibration never runs below its attempt floor anyway.
pub fn partition_cohorts(attempts: &[AttemptRecord]) -> Cohorts<'_> {
    let ranked = rank_attempts(attempts);
    let quartile = ranked.len().div_ceil(4);
    let novices = ranked[ranked.len() - quartile..].to_vec();
    let masters = ranked[..quartile].to_vec();
    Cohorts { masters, novices }
}

/// The top `ceil(n / 2)` attempts by score.
pub fn high_ability(attempts: &[AttemptRecord]) -> Vec<&AttemptRecord> {
    let mut ranked = rank_attempts(attempts);
    ranked.truncate(attempts.len().div_ceil(2));
    ranked
}

/// Every question ID answered in any attempt, sorted.
pub fn observed_questions(attempts: &[AttemptRecord]) -> BTreeSet<&str> {
    attempts
        .iter()
        .flat_map(|a| a.current_state.keys().map(String::as_str))
        .collect()
}

/// Correct and answered counts for one question over a set of attempts.
pub fn tally<'a, I>(attempts: I, question_id: &str) -> (usize, usize)
where
    I: IntoIterator<Item = &'a AttemptRecord>,
{
    attempts
        .into_iter()
        .filter_map(|a| a.current_state.get(question_id))
        .fold((0, 0), |(correct, answered), r| {
            (correct + usize::from(r.is_correct), answered + 1)
        })
}

/// Raw statistics for one item.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemStatistics {
    pub question_id: String,
    pub slip: f64,
    pub guess: f64,
    pub difficulty: f64,
    pub discrimination: f64,
    pub sample_size: usize,
    /// Masters and novices who answered the item.
    pub masters_answered: usize,
    pub novices_answered: usize,
}

impl ItemStatistics {
    /// Both cohorts have at least one respondent.
    pub fn is_comparable(&self) -> bool {
        self.masters_answered > 0 && self.novices_answered > 0
    }
}

/// Slip, guess, difficulty and discrimination for every observed question.
pub fn calibrate_items(attempts: &[AttemptRecord]) -> Vec<ItemStatistics> {
    calibrate_with_cohorts(attempts, &partition_cohorts(attempts))
}

/// Per-question statistics against an already computed partition of `attempts`.
pub fn calibrate_with_cohorts(
    attempts: &[AttemptRecord],
    cohorts: &Cohorts<'_>,
) -> Vec<ItemStatistics> {
    observed_questions(attempts)
        .into_iter()
        .map(|question_id| {
            let (masters_correct, masters_answered) =
                tally(cohorts.masters.iter().copied(), question_id);
            let (novices_correct, novices_answered) =
                tally(cohorts.novices.iter().copied(), question_id);
            let (all_correct, all_answered) = tally(attempts, question_id);

            let master_rate = ratio(masters_correct, masters_answered);
            let novice_rate = ratio(novices_correct, novices_answered);
            ItemStatistics {
                question_id: question_id.to_string(),
                slip: ratio(masters_answered - masters_correct, masters_answered),
                guess: novice_rate,
                difficulty: ratio(all_correct, all_answered),
                discrimination: master_rate - novice_rate,
                sample_size: all_answered,
                masters_answered,
                novices_answered,
            }
        })
        .collect()
}

/// How often one distractor was picked.
#[derive(Debug, Clone, PartialEq)]
pub struct DistractorUsage {
    pub question_id: String,
    pub option_id: String,
    pub selections: usize,
    pub respondents: usize,
    pub share: f64,
}

/// Selection share of every wrong option, per question.
///
/// Options come from the exam definition plus any seen in responses. An
/// option that is ever the correct answer is not a distractor.
pub fn distractor_usage(
    exam: Option<&ExamDefinition>,
    attempts: &[AttemptRecord],
) -> Vec<DistractorUsage> {
    let mut options: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    let mut correct: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    let mut selections: BTreeMap<(&str, &str), usize> = BTreeMap::new();
    let mut respondents: BTreeMap<&str, usize> = BTreeMap::new();

    if let Some(exam) = exam {
        for question in &exam.questions {
            let known = options.entry(question.id.as_str()).or_default();
            known.extend(question.option_ids.iter().map(String::as_str));
            if let Some(answer) = question.correct_option_id.as_deref() {
                correct.entry(question.id.as_str()).or_default().insert(answer);
            }
        }
    }

    for attempt in attempts {
        for (question_id, response) in &attempt.current_state {
            *respondents.entry(question_id.as_str()).or_default() += 1;
            let Some(option) = response.selected_option_id.as_deref() else {
                continue;
            };
            options.entry(question_id.as_str()).or_default().insert(option);
            *selections.entry((question_id.as_str(), option)).or_default() += 1;
            if response.is_correct {
                correct.entry(question_id.as_str()).or_default().insert(option);
            }
        }
    }

    let mut usage = Vec::new();
    for (question_id, opts) in &options {
        let answered = respondents.get(question_id).copied().unwrap_or(0);
        if answered == 0 {
            continue;
        }
        for option in opts {
            if correct.get(question_id).is_some_and(|c| c.contains(option)) {
                continue;
            }
            let picked = selections.get(&(*question_id, *option)).copied().unwrap_or(0);
            usage.push(DistractorUsage {
                question_id: question_id.to_string(),
                option_id: option.to_string(),
                selections: picked,
                respondents: answered,
                share: ratio(picked, answered),
            });
        }
    }
    usage
}

/// Rate per group, keeping only groups with at least `min_size` members.
///
/// `hits` and `totals` are keyed by group name.
pub fn group_rates(
    hits: &BTreeMap<String, usize>,
    totals: &BTreeMap<String, usize>,
    min_size: usize,
) -> BTreeMap<String, f64> {
    totals
        .iter()
        .filter(|(_, &n)| n >= min_size.max(1))
        .map(|(group, &n)| {
            let h = hits.get(group).copied().unwrap_or(0);
            (group.clone(), ratio(h, n))
        })
        .collect()
}

/// Highest and lowest entries of a rate map, ties going to the first group
/// in name order. `None` with fewer than two groups.
pub fn extremes(rates: &BTreeMap<String, f64>) -> Option<((&str, f64), (&str, f64))> {
    if rates.len() < 2 {
        return None;
    }
    let mut max: Option<(&str, f64)> = None;
    let mut min: Option<(&str, f64)> = None;
    for (group, &rate) in rates {
        if max.map_or(true, |(_, m)| rate > m) {
            max = Some((group.as_str(), rate));
        }
        if min.map_or(true, |(_, m)| rate < m) {
            min = Some((group.as_str(), rate));
        }
    }
    max.zip(min)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AttemptStatus, QuestionMeta, ResponseRecord, ResultsCache};
    use chrono::Utc;

    fn attempt(id: &str, score: f64, answers: &[(&str, bool, &str)]) -> AttemptRecord {
        AttemptRecord {
            id: id.into(),
            exam_id: "e".into(),
            learner_id: format!("l-{id}"),
            status: AttemptStatus::Completed,
            completed_at: Utc::now(),
            current_state: answers
                .iter()
                .map(|(q, ok, opt)| {
                    (
                        q.to_string(),
                        ResponseRecord {
                            is_correct: *ok,
                            selected_option_id: Some(opt.to_string()),
                        },
                    )
                })
                .collect(),
            results_cache: ResultsCache {
                score: Some(score),
                labels: vec![],
            },
        }
    }

    #[test]
    fn zero_denominator_is_zero() {
        assert_eq!(ratio(0, 0), 0.0);
        assert_eq!(ratio(3, 0), 0.0);
        assert_eq!(ratio(1, 4), 0.25);
    }

    #[test]
    fn rounding_keeps_three_decimals() {
        assert_eq!(round3(1.0 / 3.0), 0.333);
        assert_eq!(round3(2.0 / 3.0), 0.667);
        assert_eq!(round3(-0.1234), -0.123);
    }

    #[test]
    fn quartiles_use_ceiling_division() {
        let attempts: Vec<_> = (0..10)
            .map(|i| attempt(&format!("a{i:02}"), i as f64 / 10.0, &[]))
            .collect();
        let cohorts = partition_cohorts(&attempts);
        assert_eq!(cohorts.masters.len(), 3);
        assert_eq!(cohorts.novices.len(), 3);
        assert_eq!(cohorts.masters[0].id, "a09");
        assert_eq!(cohorts.novices[2].id, "a00");

        let four: Vec<_> = (0..4).map(|i| attempt(&format!("b{i}"), i as f64, &[])).collect();
        let cohorts = partition_cohorts(&four);
        assert_eq!(cohorts.masters.len(), 1);
        assert_eq!(cohorts.novices.len(), 1);
        assert_eq!(cohorts.masters[0].id, "b3");
        assert_eq!(cohorts.novices[0].id, "b0");
    }

    #[test]
    fn ties_are_broken_by_attempt_id() {
        let attempts = vec![
            attempt("c", 0.5, &[]),
            attempt("a", 0.5, &[]),
            attempt("b", 0.9, &[]),
        ];
        let ranked: Vec<_> = rank_attempts(&attempts).iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ranked, vec!["b", "a", "c"]);
        assert_eq!(high_ability(&attempts).len(), 2);
    }

    #[test]
    fn empty_input_partitions_to_empty_cohorts() {
        let cohorts = partition_cohorts(&[]);
        assert!(cohorts.masters.is_empty());
        assert!(cohorts.novices.is_empty());
        assert!(calibrate_items(&[]).is_empty());
    }

    #[test]
    fn precomputed_cohorts_give_the_same_statistics() {
        let attempts: Vec<_> = (0..12)
            .map(|i| attempt(&format!("a{i:02}"), i as f64, &[("q1", i % 3 != 0, "A")]))
            .collect();
        let cohorts = partition_cohorts(&attempts);
        assert_eq!(calibrate_with_cohorts(&attempts, &cohorts), calibrate_items(&attempts));
    }

    #[test]
    fn item_without_master_respondents_has_zero_slip() {
        // Masters (top quartile) never saw q2.
        let mut attempts: Vec<_> = (0..8)
            .map(|i| attempt(&format!("a{i}"), i as f64, &[("q1", i >= 4, "A")]))
            .collect();
        attempts[0].current_state.insert(
            "q2".into(),
            ResponseRecord::correct("B"),
        );
        let stats = calibrate_items(&attempts);
        let q2 = stats.iter().find(|s| s.question_id == "q2").unwrap();
        assert_eq!(q2.masters_answered, 0);
        assert_eq!(q2.slip, 0.0);
        assert_eq!(q2.guess, 1.0);
        assert!(!q2.is_comparable());

        let q1 = stats.iter().find(|s| s.question_id == "q1").unwrap();
        assert_eq!(q1.slip, 0.0);
        assert_eq!(q1.guess, 0.0);
        assert_eq!(q1.difficulty, 0.5);
        assert_eq!(q1.discrimination, 1.0);
        assert_eq!(q1.sample_size, 8);
    }

    #[test]
    fn distractors_exclude_correct_options_and_include_unpicked_ones() {
        let exam = ExamDefinition {
            id: "e".into(),
            creator_id: "t".into(),
            title: String::new(),
            questions: vec![QuestionMeta {
                id: "q1".into(),
                competency_id: None,
                option_ids: vec!["A".into(), "B".into(), "C".into(), "D".into()],
                correct_option_id: Some("A".into()),
            }],
        };
        let attempts: Vec<_> = (0..20)
            .map(|i| {
                let (ok, opt) = match i {
                    0..=14 => (true, "A"),
                    15..=18 => (false, "B"),
                    _ => (false, "C"),
                };
                attempt(&format!("a{i:02}"), 0.5, &[("q1", ok, opt)])
            })
            .collect();

        let usage = distractor_usage(Some(&exam), &attempts);
        let shares: Vec<_> = usage.iter().map(|u| (u.option_id.as_str(), u.share)).collect();
        assert_eq!(shares, vec![("B", 0.2), ("C", 0.05), ("D", 0.0)]);

        let observed_only = distractor_usage(None, &attempts);
        assert_eq!(observed_only.len(), 2);
    }

    #[test]
    fn group_rates_respect_minimum_size_and_extremes_need_two_groups() {
        let hits = BTreeMap::from([("a".to_string(), 3), ("b".to_string(), 0)]);
        let totals = BTreeMap::from([
            ("a".to_string(), 3),
            ("b".to_string(), 3),
            ("c".to_string(), 1),
        ]);
        let rates = group_rates(&hits, &totals, 2);
        assert_eq!(rates.len(), 2);
        let ((max_group, max), (min_group, min)) = extremes(&rates).unwrap();
        assert_eq!((max_group, max), ("a", 1.0));
        assert_eq!((min_group, min), ("b", 0.0));

        let single = group_rates(&hits, &totals, 3);
        assert_eq!(single.len(), 2);
        let lonely = BTreeMap::from([("a".to_string(), 1.0)]);
        assert!(extremes(&lonely).is_none());
    }
}
