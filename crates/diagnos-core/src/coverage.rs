//! Coverage rule engine ("golden rules").
//!
//! A pure function of the session: given the current knowledge map and
//! Q-matrix, produce the prioritized list of probes still worth generating.
//! The interview is complete when that list is empty.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::{DiagnosticSession, ProbeType, TargetType};

/// Kind of work the interviewer should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    ExploreConcepts,
    GenerateMastery,
    GenerateTrap,
    GenerateRanking,
    ValidateMisconception,
}

impl TaskType {
    /// Tie-break within one priority level. Confirming an error outranks
    /// confirming mastery.
    fn rank(self) -> u8 {
        match self {
            TaskType::GenerateTrap => 0,
            TaskType::GenerateMastery => 1,
            TaskType::ExploreConcepts => 2,
            TaskType::ValidateMisconception => 3,
            TaskType::GenerateRanking => 4,
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskType::ExploreConcepts => "EXPLORE_CONCEPTS",
            TaskType::GenerateMastery => "GENERATE_MASTERY",
            TaskType::GenerateTrap => "GENERATE_TRAP",
            TaskType::GenerateRanking => "GENERATE_RANKING",
            TaskType::ValidateMisconception => "VALIDATE_MISCONCEPTION",
        };
        f.write_str(s)
    }
}

/// Urgency of a pending task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    Normal,
    Low,
}

impl Priority {
    fn rank(self) -> u8 {
        match self {
            Priority::Critical => 0,
            Priority::Normal => 1,
            Priority::Low => 2,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Critical => write!(f, "critical"),
            Priority::Normal => write!(f, "normal"),
            Priority::Low => write!(f, "low"),
        }
    }
}

/// One unit of outstanding diagnostic work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTask {
    pub task_type: TaskType,
    /// Concept or misconception the task is about, if any.
    #[serde(default)]
    pub target_id: Option<String>,
    pub priority: Priority,
    pub reason: String,
}

impl PendingTask {
    fn new(
        task_type: TaskType,
        target_id: Option<&str>,
        priority: Priority,
        reason: String,
    ) -> Self {
        Self {
            task_type,
            target_id: target_id.map(str::to_string),
            priority,
            reason,
        }
    }

    fn urgency(&self, other: &Self) -> Ordering {
        self.priority
            .rank()
            .cmp(&other.priority.rank())
            .then_with(|| self.task_type.rank().cmp(&other.task_type.rank()))
    }
}

/// Tunables for the coverage rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageOptions {
    /// Minimum number of concepts before any probing starts.
    #[serde(default = "default_exploration_floor")]
    pub exploration_floor: usize,
    /// Concepts with more dependencies than this get a ranking probe.
    #[serde(default = "default_ranking_threshold")]
    pub ranking_dependency_threshold: usize,
    /// Ask for a confirming trap probe on misconceptions validated without one.
    #[serde(default)]
    pub recheck_validated: bool,
}

fn default_exploration_floor() -> usize {
    3
}
fn default_ranking_threshold() -> usize {
    3
}

impl Default for CoverageOptions {
    fn default() -> Self {
        Self {
            exploration_floor: default_exploration_floor(),
            ranking_dependency_threshold: default_ranking_threshold(),
            recheck_validated: false,
        }
    }
}

/// The golden rules, parameterized by [`CoverageOptions`].
#[derive(Debug, Clone, Default)]
pub struct CoverageRules {
    options: CoverageOptions,
}

impl CoverageRules {
    pub fn new(options: CoverageOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &CoverageOptions {
        &self.options
    }

    /// Evaluate every rule and return tasks most urgent first.
    pub fn calculate(&self, session: &DiagnosticSession) -> Vec<PendingTask> {
        let map = session.knowledge_map();
        let matrix = session.q_matrix();
        let concept_count = map.concept_count();

        // Rule 1: exploration floor. Nothing else fires below it.
        if concept_count < self.options.exploration_floor {
            return vec![PendingTask::new(
                TaskType::ExploreConcepts,
                None,
                Priority::Critical,
                format!(
                    "only {concept_count} of {} concepts mapped; explore the subject before probing",
                    self.options.exploration_floor
                ),
            )];
        }

        let mut tasks = Vec::new();

        // Rule 2: mastery. Front-load basic coverage while probes are scarce.
        let mastery_priority = if matrix.len() < concept_count {
            Priority::Critical
        } else {
            Priority::Normal
        };
        for concept in map.concepts() {
            if !matrix.has_administered(&concept.id, TargetType::Concept, ProbeType::Mastery) {
                tasks.push(PendingTask::new(
                    TaskType::GenerateMastery,
                    Some(&concept.id),
                    mastery_priority,
                    format!("concept '{}' has no administered mastery probe", concept.label),
                ));
            }
        }

        // Rule 3: traps for unconfirmed misconceptions.
        for misconception in map.misconceptions() {
            if !misconception.validated
                && !matrix.has_administered(
                    &misconception.id,
                    TargetType::Misconception,
                    ProbeType::Trap,
                )
            {
                tasks.push(PendingTask::new(
                    TaskType::GenerateTrap,
                    Some(&misconception.id),
                    Priority::Critical,
                    format!(
                        "misconception '{}' is unconfirmed and has no administered trap",
                        misconception.label
                    ),
                ));
            }
        }

        // Rule 4: ordering probes for deep concepts.
        for concept in map.concepts() {
            if concept.dependencies.len() > self.options.ranking_dependency_threshold
                && !matrix.has_administered(&concept.id, TargetType::Concept, ProbeType::Ranking)
            {
                tasks.push(PendingTask::new(
                    TaskType::GenerateRanking,
                    Some(&concept.id),
                    Priority::Low,
                    format!(
                        "concept '{}' has {} prerequisites; probe their ordering",
                        concept.label,
                        concept.dependencies.len()
                    ),
                ));
            }
        }

        // Rule 5: confirming probe for misconceptions validated from dialogue alone.
        if self.options.recheck_validated {
            for misconception in map.misconceptions() {
                if misconception.validated
                    && !matrix.has_administered(
                        &misconception.id,
                        TargetType::Misconception,
                        ProbeType::Trap,
                    )
                {
                    tasks.push(PendingTask::new(
                        TaskType::ValidateMisconception,
                        Some(&misconception.id),
                        Priority::Normal,
                        format!(
                            "misconception '{}' was validated without a confirming probe",
                            misconception.label
                        ),
                    ));
                }
            }
        }

        // Stable: equal urgency keeps rule-emission order.
        tasks.sort_by(PendingTask::urgency);
        tasks
    }

    pub fn next_task(&self, session: &DiagnosticSession) -> Option<PendingTask> {
        self.calculate(session).into_iter().next()
    }

    pub fn is_complete(&self, session: &DiagnosticSession) -> bool {
        self.calculate(session).is_empty()
    }

    /// Summarize coverage for reporting.
    pub fn report(&self, session: &DiagnosticSession) -> CoverageReport {
        let map = session.knowledge_map();
        let matrix = session.q_matrix();
        let tasks = self.calculate(session);
        let (required, covered) = required_and_covered(session);
        CoverageReport {
            concepts: map.concept_count(),
            misconceptions: map.misconception_count(),
            validated_misconceptions: map.validated_count(),
            probes: matrix.len(),
            administered_probes: matrix.administered_count(),
            required_probes: required,
            covered_probes: covered,
            percentage: calculate_coverage_percentage(session),
            pending_tasks: tasks.len(),
            complete: tasks.is_empty(),
        }
    }
}

/// Counts behind a session's coverage figure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageReport {
    pub concepts: usize,
    pub misconceptions: usize,
    pub validated_misconceptions: usize,
    pub probes: usize,
    pub administered_probes: usize,
    /// One mastery probe per concept plus one trap probe per misconception.
    pub required_probes: usize,
    pub covered_probes: usize,
    pub percentage: u8,
    pub pending_tasks: usize,
    pub complete: bool,
}

/// Pending tasks under the default rules, most urgent first.
pub fn calculate_coverage(session: &DiagnosticSession) -> Vec<PendingTask> {
    CoverageRules::default().calculate(session)
}

/// The single most urgent task, if any remain.
pub fn get_next_task(session: &DiagnosticSession) -> Option<PendingTask> {
    CoverageRules::default().next_task(session)
}

/// True iff no task remains under the default rules.
pub fn is_diagnostic_complete(session: &DiagnosticSession) -> bool {
    CoverageRules::default().is_complete(session)
}

/// Share of required probes administered, 0–100, rounded down so that 100
/// means every required probe is in place.
pub fn calculate_coverage_percentage(session: &DiagnosticSession) -> u8 {
    let (required, covered) = required_and_covered(session);
    if required == 0 {
        return 0;
    }
    ((covered * 100) / required).min(100) as u8
}

fn required_and_covered(session: &DiagnosticSession) -> (usize, usize) {
    let map = session.knowledge_map();
    let matrix = session.q_matrix();
    let required = map.concept_count() + map.misconception_count();
    let mastered = map
        .concepts()
        .filter(|c| matrix.has_administered(&c.id, TargetType::Concept, ProbeType::Mastery))
        .count();
    let trapped = map
        .misconceptions()
        .filter(|m| matrix.has_administered(&m.id, TargetType::Misconception, ProbeType::Trap))
        .count();
    (required, mastered + trapped)
}
