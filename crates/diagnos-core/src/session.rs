//! Session mutation API.
//!
//! Validated state transitions called turn by turn by the interview layer.
//! Each function takes the current session by reference and returns a new
//! one; the input is left untouched, so callers can keep old values for undo,
//! replay, or concurrent inspection. Persisting the returned value (and any
//! last-write-wins or optimistic-concurrency policy) is the caller's job.

use std::sync::Arc;

use chrono::Utc;

use crate::error::ValidationError;
use crate::model::{
    Concept, ConversationTurn, DiagnosticSession, Misconception, QMatrixEntry, SessionStatus,
    TargetType,
};

/// Register a new concept.
///
/// Every dependency must already be registered, which keeps the concept graph
/// acyclic without a separate cycle check.
pub fn register_concept(
    session: &DiagnosticSession,
    concept: Concept,
) -> Result<DiagnosticSession, ValidationError> {
    require_id("concept", &concept.id)?;
    let map = session.knowledge_map();
    if map.concepts.contains_key(&concept.id) {
        return Err(ValidationError::DuplicateConcept(concept.id));
    }
    for dependency in &concept.dependencies {
        if dependency == &concept.id {
            return Err(ValidationError::SelfDependency(concept.id.clone()));
        }
        if !map.concepts.contains_key(dependency) {
            return Err(ValidationError::MissingDependency {
                concept: concept.id.clone(),
                dependency: dependency.clone(),
            });
        }
    }
    if let Some(level) = concept.mastery_level {
        check_level(&concept.id, level)?;
    }

    tracing::debug!(concept = %concept.id, deps = concept.dependencies.len(), "registered concept");
    let mut next = session.clone();
    Arc::make_mut(&mut next.knowledge_map)
        .concepts
        .insert(concept.id.clone(), Arc::new(concept));
    touch(&mut next);
    Ok(next)
}

/// Register a misconception against an existing concept.
pub fn register_misconception(
    session: &DiagnosticSession,
    misconception: Misconception,
) -> Result<DiagnosticSession, ValidationError> {
    require_id("misconception", &misconception.id)?;
    let map = session.knowledge_map();
    if !map.concepts.contains_key(&misconception.related_concept_id) {
        return Err(ValidationError::MissingRelatedConcept {
            misconception: misconception.id,
            concept: misconception.related_concept_id,
        });
    }
    if map.misconceptions.contains_key(&misconception.id) {
        return Err(ValidationError::DuplicateMisconception(misconception.id));
    }

    tracing::debug!(misconception = %misconception.id, "registered misconception");
    let mut next = session.clone();
    Arc::make_mut(&mut next.knowledge_map)
        .misconceptions
        .insert(misconception.id.clone(), Arc::new(misconception));
    touch(&mut next);
    Ok(next)
}

/// Register a probe in the Q-matrix.
///
/// Duplicates of the same `(target_id, target_type, probe_type)` triple are
/// rejected, never overwritten.
pub fn register_probe(
    session: &DiagnosticSession,
    probe: QMatrixEntry,
) -> Result<DiagnosticSession, ValidationError> {
    require_id("probe", &probe.probe_id)?;
    if !session
        .knowledge_map()
        .contains(&probe.target_id, probe.target_type)
    {
        return Err(ValidationError::UnknownProbeTarget {
            target_id: probe.target_id,
            target_type: probe.target_type,
        });
    }
    if session
        .q_matrix()
        .has_probe(&probe.target_id, probe.target_type, probe.probe_type)
    {
        return Err(ValidationError::DuplicateProbe {
            target_id: probe.target_id,
            target_type: probe.target_type,
            probe_type: probe.probe_type,
        });
    }

    tracing::debug!(
        probe = %probe.probe_id,
        target = %probe.target_id,
        kind = %probe.probe_type,
        "registered probe"
    );
    let mut next = session.clone();
    Arc::make_mut(&mut next.q_matrix)
        .entries
        .push(Arc::new(probe));
    touch(&mut next);
    Ok(next)
}

/// Mark a misconception as confirmed.
///
/// Calling this again on an already validated misconception produces an
/// equivalent session.
pub fn validate_misconception(
    session: &DiagnosticSession,
    misconception_id: &str,
) -> Result<DiagnosticSession, ValidationError> {
    if !session
        .knowledge_map()
        .misconceptions
        .contains_key(misconception_id)
    {
        return Err(ValidationError::UnknownMisconception(
            misconception_id.to_string(),
        ));
    }

    let mut next = session.clone();
    let map = Arc::make_mut(&mut next.knowledge_map);
    if let Some(entry) = map.misconceptions.get_mut(misconception_id) {
        Arc::make_mut(entry).validated = true;
    }
    touch(&mut next);
    Ok(next)
}

/// Record a new mastery estimate for a concept.
pub fn update_mastery_level(
    session: &DiagnosticSession,
    concept_id: &str,
    level: f64,
) -> Result<DiagnosticSession, ValidationError> {
    if !session.knowledge_map().concepts.contains_key(concept_id) {
        return Err(ValidationError::UnknownConcept(concept_id.to_string()));
    }
    check_level(concept_id, level)?;

    let mut next = session.clone();
    let now = Utc::now();
    let map = Arc::make_mut(&mut next.knowledge_map);
    if let Some(entry) = map.concepts.get_mut(concept_id) {
        let concept = Arc::make_mut(entry);
        concept.mastery_level = Some(level);
        concept.last_assessed = Some(now);
    }
    touch(&mut next);
    Ok(next)
}

/// Append a turn to the conversation history.
pub fn add_conversation_turn(
    session: &DiagnosticSession,
    turn: ConversationTurn,
) -> DiagnosticSession {
    let mut next = session.clone();
    Arc::make_mut(&mut next.conversation_history).push(turn);
    touch(&mut next);
    next
}

/// Flag a registered probe as administered to the student.
pub fn mark_probe_administered(
    session: &DiagnosticSession,
    probe_id: &str,
) -> Result<DiagnosticSession, ValidationError> {
    let Some(index) = session
        .q_matrix
        .entries
        .iter()
        .position(|e| e.probe_id == probe_id)
    else {
        return Err(ValidationError::UnknownProbe(probe_id.to_string()));
    };

    let mut next = session.clone();
    let matrix = Arc::make_mut(&mut next.q_matrix);
    Arc::make_mut(&mut matrix.entries[index]).administered = true;
    touch(&mut next);
    Ok(next)
}

/// Move the session through its lifecycle.
///
/// Completed and abandoned sessions are final.
pub fn set_status(
    session: &DiagnosticSession,
    status: SessionStatus,
) -> Result<DiagnosticSession, ValidationError> {
    let from = session.status;
    if from != status && from != SessionStatus::Active {
        return Err(ValidationError::InvalidStatusTransition { from, to: status });
    }
    let mut next = session.clone();
    next.status = status;
    touch(&mut next);
    Ok(next)
}

/// Re-check every invariant on a session that did not come through this API,
/// e.g. one loaded from disk.
pub fn verify(session: &DiagnosticSession) -> Result<(), ValidationError> {
    let map = session.knowledge_map();
    for (position, concept) in map.concepts().enumerate() {
        require_id("concept", &concept.id)?;
        for dependency in &concept.dependencies {
            if dependency == &concept.id {
                return Err(ValidationError::SelfDependency(concept.id.clone()));
            }
            // Dependencies must precede their dependents in registration order.
            match map.concepts.get_index_of(dependency.as_str()) {
                Some(index) if index < position => {}
                _ => {
                    return Err(ValidationError::MissingDependency {
                        concept: concept.id.clone(),
                        dependency: dependency.clone(),
                    })
                }
            }
        }
        if let Some(level) = concept.mastery_level {
            check_level(&concept.id, level)?;
        }
    }
    for misconception in map.misconceptions() {
        require_id("misconception", &misconception.id)?;
        if !map.concepts.contains_key(&misconception.related_concept_id) {
            return Err(ValidationError::MissingRelatedConcept {
                misconception: misconception.id.clone(),
                concept: misconception.related_concept_id.clone(),
            });
        }
    }
    let mut seen = std::collections::HashSet::new();
    for probe in session.q_matrix().entries() {
        if !map.contains(&probe.target_id, probe.target_type) {
            return Err(ValidationError::UnknownProbeTarget {
                target_id: probe.target_id.clone(),
                target_type: probe.target_type,
            });
        }
        if !seen.insert((probe.target_id.as_str(), probe.target_type, probe.probe_type)) {
            return Err(ValidationError::DuplicateProbe {
                target_id: probe.target_id.clone(),
                target_type: probe.target_type,
                probe_type: probe.probe_type,
            });
        }
    }
    Ok(())
}

fn require_id(kind: &'static str, id: &str) -> Result<(), ValidationError> {
    if id.trim().is_empty() {
        return Err(ValidationError::EmptyId { kind });
    }
    Ok(())
}

fn check_level(concept_id: &str, level: f64) -> Result<(), ValidationError> {
    if !(0.0..=1.0).contains(&level) {
        return Err(ValidationError::MasteryOutOfRange {
            concept: concept_id.to_string(),
            level,
        });
    }
    Ok(())
}

fn touch(session: &mut DiagnosticSession) {
    session.last_updated = Utc::now().max(session.last_updated);
}
