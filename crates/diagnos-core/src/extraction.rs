//! Extraction-event boundary.
//!
//! The interview agent emits loosely-shaped JSON tool payloads. They are
//! parsed here into a closed set of events (accepting the camelCase and
//! upper-case spellings agents tend to produce) and then applied through the
//! strict session mutation API.

use serde::{Deserialize, Serialize};

use crate::error::{ExtractionError, ValidationError};
use crate::model::{
    Concept, ConversationTurn, DiagnosticSession, Misconception, ProbeType, QMatrixEntry,
    Severity, TargetType, TurnRole,
};
use crate::session;

/// A structured change extracted from one interview turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExtractionEvent {
    #[serde(alias = "conceptAdded", alias = "add_concept")]
    ConceptAdded {
        id: String,
        label: String,
        #[serde(default)]
        description: Option<String>,
        #[serde(default, alias = "dependsOn", alias = "depends_on", alias = "prerequisites")]
        dependencies: Vec<String>,
    },
    #[serde(alias = "misconceptionAdded", alias = "add_misconception")]
    MisconceptionAdded {
        id: String,
        label: String,
        #[serde(default)]
        description: String,
        #[serde(alias = "relatedConceptId", alias = "conceptId")]
        related_concept_id: String,
        #[serde(default)]
        severity: Severity,
        #[serde(default, alias = "distractorArtifact")]
        distractor_artifact: Option<String>,
        #[serde(default, alias = "observableSymptom")]
        observable_symptom: Option<String>,
    },
    #[serde(alias = "probeGenerated", alias = "add_probe")]
    ProbeGenerated {
        #[serde(alias = "probeId")]
        probe_id: String,
        #[serde(alias = "targetId")]
        target_id: String,
        #[serde(alias = "targetType")]
        target_type: TargetType,
        #[serde(alias = "probeType")]
        probe_type: ProbeType,
        #[serde(default)]
        administered: bool,
    },
    #[serde(alias = "misconceptionValidated", alias = "validate_misconception")]
    MisconceptionValidated {
        #[serde(alias = "misconceptionId", alias = "misconception_id")]
        id: String,
    },
    #[serde(alias = "masteryAssessed", alias = "update_mastery")]
    MasteryAssessed {
        #[serde(alias = "conceptId")]
        concept_id: String,
        #[serde(alias = "masteryLevel", alias = "mastery_level")]
        level: f64,
    },
    #[serde(alias = "turnRecorded", alias = "turn")]
    TurnRecorded { role: TurnRole, content: String },
}

impl ExtractionEvent {
    /// Parse one event from a JSON value.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ExtractionError> {
        Ok(serde_json::from_value(value)?)
    }

    /// Parse one event from JSON text.
    pub fn from_json(json: &str) -> Result<Self, ExtractionError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ExtractionEvent::ConceptAdded { .. } => "concept_added",
            ExtractionEvent::MisconceptionAdded { .. } => "misconception_added",
            ExtractionEvent::ProbeGenerated { .. } => "probe_generated",
            ExtractionEvent::MisconceptionValidated { .. } => "misconception_validated",
            ExtractionEvent::MasteryAssessed { .. } => "mastery_assessed",
            ExtractionEvent::TurnRecorded { .. } => "turn_recorded",
        }
    }

    /// Apply the event to a session through the mutation API.
    pub fn apply(self, session: &DiagnosticSession) -> Result<DiagnosticSession, ValidationError> {
        match self {
            ExtractionEvent::ConceptAdded {
                id,
                label,
                description,
                dependencies,
            } => {
                let mut concept = Concept::new(id, label).with_dependencies(dependencies);
                concept.description = description;
                session::register_concept(session, concept)
            }
            ExtractionEvent::MisconceptionAdded {
                id,
                label,
                description,
                related_concept_id,
                severity,
                distractor_artifact,
                observable_symptom,
            } => {
                let mut misconception = Misconception::new(id, label, related_concept_id)
                    .with_description(description)
                    .with_severity(severity);
                misconception.distractor_artifact = distractor_artifact;
                misconception.observable_symptom = observable_symptom;
                session::register_misconception(session, misconception)
            }
            ExtractionEvent::ProbeGenerated {
                probe_id,
                target_id,
                target_type,
                probe_type,
                administered,
            } => {
                let mut probe = QMatrixEntry::new(probe_id, target_id, target_type, probe_type);
                probe.administered = administered;
                session::register_probe(session, probe)
            }
            ExtractionEvent::MisconceptionValidated { id } => {
                session::validate_misconception(session, &id)
            }
            ExtractionEvent::MasteryAssessed { concept_id, level } => {
                session::update_mastery_level(session, &concept_id, level)
            }
            ExtractionEvent::TurnRecorded { role, content } => Ok(session::add_conversation_turn(
                session,
                ConversationTurn::new(role, content),
            )),
        }
    }
}

/// Fold events into a session, stopping at the first rejection.
///
/// The error carries the 1-based position of the offending event.
pub fn replay<I>(
    session: &DiagnosticSession,
    events: I,
) -> Result<DiagnosticSession, ExtractionError>
where
    I: IntoIterator<Item = ExtractionEvent>,
{
    let mut current = session.clone();
    for (index, event) in events.into_iter().enumerate() {
        let kind = event.kind();
        current = event.apply(&current).map_err(|e| {
            tracing::warn!(position = index + 1, kind, "extraction event rejected: {e}");
            ExtractionError::At {
                position: index + 1,
                source: Box::new(ExtractionError::Rejected(e)),
            }
        })?;
    }
    Ok(current)
}

/// Parse a newline-delimited JSON event log. Blank lines are skipped.
pub fn parse_event_log(content: &str) -> Result<Vec<ExtractionEvent>, ExtractionError> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            ExtractionEvent::from_json(line).map_err(|e| ExtractionError::At {
                position: index + 1,
                source: Box::new(e),
            })
        })
        .collect()
}
