//! Session error types.
//!
//! Validation errors are deterministic and caller-facing: each variant names
//! the offending ID so the interview layer can fix its input and resubmit.
//! They are never retried.

use thiserror::Error;

use crate::model::{ProbeType, SessionStatus, TargetType};

/// Errors raised by the session mutation API.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// An entity was submitted with an empty identifier.
    #[error("{kind} id must not be empty")]
    EmptyId { kind: &'static str },

    /// A concept with this ID is already registered.
    #[error("concept {0} already exists")]
    DuplicateConcept(String),

    /// A declared dependency has not been registered yet.
    #[error("dependency {dependency} of concept {concept} does not exist")]
    MissingDependency { concept: String, dependency: String },

    /// The concept lists itself as a dependency.
    #[error("concept {0} cannot depend on itself")]
    SelfDependency(String),

    /// No concept with this ID exists.
    #[error("concept {0} does not exist")]
    UnknownConcept(String),

    /// A misconception with this ID is already registered.
    #[error("misconception {0} already exists")]
    DuplicateMisconception(String),

    /// The misconception references a concept that does not exist.
    #[error("related concept {concept} of misconception {misconception} does not exist")]
    MissingRelatedConcept {
        misconception: String,
        concept: String,
    },

    /// No misconception with this ID exists.
    #[error("misconception {0} does not exist")]
    UnknownMisconception(String),

    /// The probe targets an entity that does not exist.
    #[error("probe target {target_type} {target_id} does not exist")]
    UnknownProbeTarget {
        target_id: String,
        target_type: TargetType,
    },

    /// A probe of this type already exists for the target.
    #[error("a {probe_type} probe already exists for {target_type} {target_id}")]
    DuplicateProbe {
        target_id: String,
        target_type: TargetType,
        probe_type: ProbeType,
    },

    /// No probe with this ID exists.
    #[error("probe {0} does not exist")]
    UnknownProbe(String),

    /// Mastery must lie in [0, 1].
    #[error("mastery level {level} for concept {concept} is outside [0, 1]")]
    MasteryOutOfRange { concept: String, level: f64 },

    /// Finished sessions cannot be reopened.
    #[error("session cannot move from {from} to {to}")]
    InvalidStatusTransition {
        from: SessionStatus,
        to: SessionStatus,
    },
}

/// Errors raised at the extraction-event boundary.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The payload does not match any known event shape.
    #[error("malformed extraction event: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The event was well-formed but the session rejected it.
    #[error("extraction event rejected: {0}")]
    Rejected(#[from] ValidationError),

    /// The event at this position (1-based line or sequence number) failed.
    #[error("event {position}: {source}")]
    At {
        position: usize,
        #[source]
        source: Box<ExtractionError>,
    },
}

impl ValidationError {
    /// The ID this error is about, for callers that index errors by entity.
    pub fn offending_id(&self) -> Option<&str> {
        match self {
            ValidationError::EmptyId { .. } | ValidationError::InvalidStatusTransition { .. } => {
                None
            }
            ValidationError::DuplicateConcept(id)
            | ValidationError::SelfDependency(id)
            | ValidationError::UnknownConcept(id)
            | ValidationError::DuplicateMisconception(id)
            | ValidationError::UnknownMisconception(id)
            | ValidationError::UnknownProbe(id) => Some(id),
            ValidationError::MissingDependency { dependency, .. } => Some(dependency),
            ValidationError::MissingRelatedConcept { concept, .. } => Some(concept),
            ValidationError::UnknownProbeTarget { target_id, .. }
            | ValidationError::DuplicateProbe { target_id, .. } => Some(target_id),
            ValidationError::MasteryOutOfRange { concept, .. } => Some(concept),
        }
    }
}
