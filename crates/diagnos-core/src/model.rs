//! Knowledge map data model.
//!
//! Concepts, misconceptions and the probe-to-target matrix ("Q-matrix"), plus
//! the `DiagnosticSession` aggregate that holds them. Entities live behind
//! `Arc`s and each session component behind its own `Arc`, so deriving a new
//! session copies pointers rather than payloads.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Concepts and misconceptions
// ---------------------------------------------------------------------------

/// An atomic unit of knowledge in the curriculum graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Concept {
    /// Unique identifier.
    pub id: String,
    /// Human-readable label.
    pub label: String,
    /// Optional longer description.
    #[serde(default)]
    pub description: Option<String>,
    /// Concepts this one builds on, in declaration order.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Estimated mastery in [0, 1].
    #[serde(default)]
    pub mastery_level: Option<f64>,
    /// When mastery was last assessed.
    #[serde(default)]
    pub last_assessed: Option<DateTime<Utc>>,
}

impl Concept {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            description: None,
            dependencies: Vec::new(),
            mastery_level: None,
            last_assessed: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }
}

/// How damaging a misconception is if left uncorrected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[serde(alias = "LOW", alias = "Low")]
    Low,
    #[serde(alias = "MEDIUM", alias = "Medium")]
    Medium,
    #[serde(alias = "HIGH", alias = "High")]
    High,
    #[serde(alias = "CRITICAL", alias = "Critical")]
    Critical,
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Medium
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

/// A specific, well-formed wrong belief tied to one concept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Misconception {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub description: String,
    /// The concept this misconception distorts. Must exist.
    pub related_concept_id: String,
    #[serde(default)]
    pub severity: Severity,
    /// Flips to true only through explicit validation.
    #[serde(default)]
    pub validated: bool,
    /// The wrong answer this belief produces, used to author distractors.
    #[serde(default)]
    pub distractor_artifact: Option<String>,
    /// What the belief looks like from the outside.
    #[serde(default)]
    pub observable_symptom: Option<String>,
}

impl Misconception {
    pub fn new(
        id: impl Into<String>,
        label: impl Into<String>,
        related_concept_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            description: String::new(),
            related_concept_id: related_concept_id.into(),
            severity: Severity::default(),
            validated: false,
            distractor_artifact: None,
            observable_symptom: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }
}

// ---------------------------------------------------------------------------
// Q-matrix
// ---------------------------------------------------------------------------

/// What kind of entity a probe targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    #[serde(alias = "CONCEPT", alias = "Concept")]
    Concept,
    #[serde(alias = "MISCONCEPTION", alias = "Misconception")]
    Misconception,
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetType::Concept => write!(f, "concept"),
            TargetType::Misconception => write!(f, "misconception"),
        }
    }
}

/// The diagnostic technique a probe uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProbeType {
    /// Confirms the student holds the concept.
    #[serde(alias = "mastery", alias = "Mastery")]
    Mastery,
    /// Certainty-based trap that surfaces a misconception.
    #[serde(alias = "trap", alias = "Trap", alias = "CBM", alias = "cbm")]
    Trap,
    /// Ordering probe for concepts with deep prerequisites.
    #[serde(alias = "ranking", alias = "Ranking")]
    Ranking,
}

impl fmt::Display for ProbeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeType::Mastery => write!(f, "MASTERY"),
            ProbeType::Trap => write!(f, "TRAP"),
            ProbeType::Ranking => write!(f, "RANKING"),
        }
    }
}

impl FromStr for ProbeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "MASTERY" => Ok(ProbeType::Mastery),
            "TRAP" | "CBM" => Ok(ProbeType::Trap),
            "RANKING" => Ok(ProbeType::Ranking),
            other => Err(format!("unknown probe type: {other}")),
        }
    }
}

/// A generated probe and the entity it targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QMatrixEntry {
    pub probe_id: String,
    pub target_id: String,
    pub target_type: TargetType,
    pub probe_type: ProbeType,
    #[serde(default)]
    pub administered: bool,
    pub generated_at: DateTime<Utc>,
}

impl QMatrixEntry {
    pub fn new(
        probe_id: impl Into<String>,
        target_id: impl Into<String>,
        target_type: TargetType,
        probe_type: ProbeType,
    ) -> Self {
        Self {
            probe_id: probe_id.into(),
            target_id: target_id.into(),
            target_type,
            probe_type,
            administered: false,
            generated_at: Utc::now(),
        }
    }

    /// Mark the probe as already put in front of the student.
    pub fn administered(mut self) -> Self {
        self.administered = true;
        self
    }

    fn matches(&self, target_id: &str, target_type: TargetType, probe_type: ProbeType) -> bool {
        self.target_id == target_id
            && self.target_type == target_type
            && self.probe_type == probe_type
    }
}

/// All probes generated during a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QMatrix {
    #[serde(default)]
    pub(crate) entries: Vec<Arc<QMatrixEntry>>,
}

impl QMatrix {
    pub fn entries(&self) -> impl Iterator<Item = &QMatrixEntry> {
        self.entries.iter().map(AsRef::as_ref)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn administered_count(&self) -> usize {
        self.entries.iter().filter(|e| e.administered).count()
    }

    pub fn probe(&self, probe_id: &str) -> Option<&QMatrixEntry> {
        self.entries().find(|e| e.probe_id == probe_id)
    }

    /// Whether any probe of `probe_type` exists for the target.
    pub fn has_probe(
        &self,
        target_id: &str,
        target_type: TargetType,
        probe_type: ProbeType,
    ) -> bool {
        self.entries()
            .any(|e| e.matches(target_id, target_type, probe_type))
    }

    /// Whether an administered probe of `probe_type` exists for the target.
    pub fn has_administered(
        &self,
        target_id: &str,
        target_type: TargetType,
        probe_type: ProbeType,
    ) -> bool {
        self.entries()
            .any(|e| e.administered && e.matches(target_id, target_type, probe_type))
    }
}

// ---------------------------------------------------------------------------
// Knowledge map
// ---------------------------------------------------------------------------

/// Concepts and misconceptions keyed by ID, in registration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeMap {
    #[serde(default)]
    pub(crate) concepts: IndexMap<String, Arc<Concept>>,
    #[serde(default)]
    pub(crate) misconceptions: IndexMap<String, Arc<Misconception>>,
}

impl KnowledgeMap {
    pub fn concepts(&self) -> impl Iterator<Item = &Concept> {
        self.concepts.values().map(AsRef::as_ref)
    }

    pub fn misconceptions(&self) -> impl Iterator<Item = &Misconception> {
        self.misconceptions.values().map(AsRef::as_ref)
    }

    pub fn concept(&self, id: &str) -> Option<&Concept> {
        self.concepts.get(id).map(AsRef::as_ref)
    }

    pub fn misconception(&self, id: &str) -> Option<&Misconception> {
        self.misconceptions.get(id).map(AsRef::as_ref)
    }

    pub fn concept_count(&self) -> usize {
        self.concepts.len()
    }

    pub fn misconception_count(&self) -> usize {
        self.misconceptions.len()
    }

    pub fn validated_count(&self) -> usize {
        self.misconceptions().filter(|m| m.validated).count()
    }

    /// Whether an entity of `target_type` with this ID exists.
    pub fn contains(&self, target_id: &str, target_type: TargetType) -> bool {
        match target_type {
            TargetType::Concept => self.concepts.contains_key(target_id),
            TargetType::Misconception => self.misconceptions.contains_key(target_id),
        }
    }

    /// Concepts that list `concept_id` as a direct dependency.
    pub fn dependents_of<'a>(&'a self, concept_id: &'a str) -> impl Iterator<Item = &'a Concept> {
        self.concepts()
            .filter(move |c| c.dependencies.iter().any(|d| d == concept_id))
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Who produced a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    #[serde(alias = "assistant", alias = "agent")]
    Interviewer,
    #[serde(alias = "user")]
    Student,
    System,
}

/// One turn of the diagnostic interview.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(role: TurnRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Lifecycle of a diagnostic session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Active,
    Completed,
    Abandoned,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::Completed => write!(f, "completed"),
            SessionStatus::Abandoned => write!(f, "abandoned"),
        }
    }
}

/// Aggregate root of one student's diagnostic interview.
///
/// Values of this type are never modified in place: every operation in
/// [`crate::session`] returns a new session. Cloning is cheap because each
/// component is shared until one side changes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticSession {
    pub(crate) id: Uuid,
    pub(crate) student_id: String,
    pub(crate) subject_area: String,
    #[serde(default)]
    pub(crate) status: SessionStatus,
    #[serde(default)]
    pub(crate) knowledge_map: Arc<KnowledgeMap>,
    #[serde(default)]
    pub(crate) q_matrix: Arc<QMatrix>,
    #[serde(default)]
    pub(crate) conversation_history: Arc<Vec<ConversationTurn>>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) last_updated: DateTime<Utc>,
}

impl DiagnosticSession {
    /// Start an empty session.
    pub fn new(student_id: impl Into<String>, subject_area: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            student_id: student_id.into(),
            subject_area: subject_area.into(),
            status: SessionStatus::Active,
            knowledge_map: Arc::default(),
            q_matrix: Arc::default(),
            conversation_history: Arc::default(),
            created_at: now,
            last_updated: now,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn student_id(&self) -> &str {
        &self.student_id
    }

    pub fn subject_area(&self) -> &str {
        &self.subject_area
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn knowledge_map(&self) -> &KnowledgeMap {
        &self.knowledge_map
    }

    pub fn q_matrix(&self) -> &QMatrix {
        &self.q_matrix
    }

    pub fn conversation_history(&self) -> &[ConversationTurn] {
        &self.conversation_history
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    /// Compare everything except timestamps.
    pub fn same_content(&self, other: &DiagnosticSession) -> bool {
        self.id == other.id
            && self.student_id == other.student_id
            && self.subject_area == other.subject_area
            && self.status == other.status
            && self.knowledge_map == other.knowledge_map
            && self.q_matrix == other.q_matrix
            && self.conversation_history == other.conversation_history
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_type_parse_accepts_cbm_alias() {
        assert_eq!("mastery".parse::<ProbeType>().unwrap(), ProbeType::Mastery);
        assert_eq!("CBM".parse::<ProbeType>().unwrap(), ProbeType::Trap);
        assert_eq!("Ranking".parse::<ProbeType>().unwrap(), ProbeType::Ranking);
        assert!("essay".parse::<ProbeType>().is_err());
    }

    #[test]
    fn probe_type_serde_spellings() {
        let t: ProbeType = serde_json::from_str("\"CBM\"").unwrap();
        assert_eq!(t, ProbeType::Trap);
        let t: ProbeType = serde_json::from_str("\"mastery\"").unwrap();
        assert_eq!(t, ProbeType::Mastery);
        assert_eq!(serde_json::to_string(&ProbeType::Ranking).unwrap(), "\"RANKING\"");
    }

    #[test]
    fn severity_ordering_and_default() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Low < Severity::Medium);
        assert_eq!(Severity::default(), Severity::Medium);
        assert_eq!("HIGH".parse::<Severity>().unwrap(), Severity::High);
    }

    #[test]
    fn new_session_is_empty_and_active() {
        let session = DiagnosticSession::new("student-1", "algebra");
        assert_eq!(session.status(), SessionStatus::Active);
        assert_eq!(session.knowledge_map().concept_count(), 0);
        assert!(session.q_matrix().is_empty());
        assert!(session.conversation_history().is_empty());
        assert_eq!(session.created_at(), session.last_updated());
    }

    #[test]
    fn clone_shares_components() {
        let session = DiagnosticSession::new("s", "physics");
        let copy = session.clone();
        assert!(Arc::ptr_eq(&session.knowledge_map, &copy.knowledge_map));
        assert!(Arc::ptr_eq(&session.conversation_history, &copy.conversation_history));
    }

    #[test]
    fn q_matrix_lookup() {
        let mut matrix = QMatrix::default();
        matrix.entries.push(Arc::new(
            QMatrixEntry::new("p1", "c1", TargetType::Concept, ProbeType::Mastery).administered(),
        ));
        matrix.entries.push(Arc::new(QMatrixEntry::new(
            "p2",
            "m1",
            TargetType::Misconception,
            ProbeType::Trap,
        )));
        assert!(matrix.has_administered("c1", TargetType::Concept, ProbeType::Mastery));
        assert!(matrix.has_probe("m1", TargetType::Misconception, ProbeType::Trap));
        assert!(!matrix.has_administered("m1", TargetType::Misconception, ProbeType::Trap));
        assert!(!matrix.has_probe("c1", TargetType::Misconception, ProbeType::Mastery));
        assert_eq!(matrix.administered_count(), 1);
        assert_eq!(matrix.probe("p2").map(|p| p.target_id.as_str()), Some("m1"));
    }
}
