//! Agent guidance.
//!
//! Turns the coverage engine's next task into an instruction the interview
//! agent can drop into its prompt, and projects a read-only session summary.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::coverage::{CoverageReport, CoverageRules, PendingTask, TaskType};
use crate::model::{DiagnosticSession, SessionStatus};

/// Message returned once every rule is satisfied.
pub const COMPLETION_MESSAGE: &str = "Diagnostic complete: every concept has a mastery probe and every misconception has been trapped or confirmed. Summarize the findings for the student and close the session.";

/// Render the next objective under the default coverage rules.
pub fn get_next_objective(session: &DiagnosticSession) -> String {
    next_objective_with(&CoverageRules::default(), session)
}

/// Render the next objective under explicit rules.
pub fn next_objective_with(rules: &CoverageRules, session: &DiagnosticSession) -> String {
    match rules.next_task(session) {
        Some(task) => render_task(session, &task),
        None => COMPLETION_MESSAGE.to_string(),
    }
}

fn render_task(session: &DiagnosticSession, task: &PendingTask) -> String {
    let map = session.knowledge_map();
    let target = task.target_id.as_deref().unwrap_or_default();

    match task.task_type {
        TaskType::ExploreConcepts => format!(
            "OBJECTIVE: Explore the subject '{subject}'.\n\
             TECHNIQUE: Ask open questions that make the student explain the topic in their own words, then register each distinct concept they rely on.\n\
             WHY: {reason}.\n\
             EXAMPLE: \"Can you walk me through how you would explain {subject} to a classmate?\"",
            subject = session.subject_area(),
            reason = task.reason,
        ),
        TaskType::GenerateMastery => {
            let (label, description) = map
                .concept(target)
                .map(|c| (c.label.as_str(), c.description.as_deref().unwrap_or("")))
                .unwrap_or((target, ""));
            format!(
                "OBJECTIVE: Confirm mastery of '{label}'.\n\
                 TECHNIQUE: Generate a MASTERY probe: one direct question whose correct answer requires the concept and nothing more advanced.{detail}\n\
                 WHY: {reason}.\n\
                 EXAMPLE: \"Without looking anything up, how would you use {label} to solve this?\"",
                detail = describe(description),
                reason = task.reason,
            )
        }
        TaskType::GenerateTrap => {
            let misconception = map.misconception(target);
            let label = misconception.map(|m| m.label.as_str()).unwrap_or(target);
            let description = misconception.map(|m| m.description.as_str()).unwrap_or("");
            let artifact = misconception
                .and_then(|m| m.distractor_artifact.as_deref())
                .map(|a| format!(" Use \"{a}\" as the tempting wrong option."))
                .unwrap_or_default();
            format!(
                "OBJECTIVE: Trap the suspected misconception '{label}'.\n\
                 TECHNIQUE: Generate a TRAP probe with certainty-based marking: a question where the misconception produces a confident wrong answer, and ask the student how sure they are.{detail}{artifact}\n\
                 WHY: {reason}. Confirming an error is worth more than confirming mastery.\n\
                 EXAMPLE: \"Pick the answer you believe is right, and tell me how certain you are on a scale from 1 to 5.\"",
                detail = describe(description),
                reason = task.reason,
            )
        }
        TaskType::GenerateRanking => {
            let concept = map.concept(target);
            let label = concept.map(|c| c.label.as_str()).unwrap_or(target);
            let prerequisites = concept
                .map(|c| {
                    c.dependencies
                        .iter()
                        .map(|d| map.concept(d).map(|p| p.label.as_str()).unwrap_or(d.as_str()))
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .unwrap_or_default();
            format!(
                "OBJECTIVE: Probe how the student orders the prerequisites of '{label}'.\n\
                 TECHNIQUE: Generate a RANKING probe asking the student to order the building blocks ({prerequisites}) from most to least fundamental.\n\
                 WHY: {reason}.\n\
                 EXAMPLE: \"Put these ideas in the order you would need to learn them.\"",
                reason = task.reason,
            )
        }
        TaskType::ValidateMisconception => {
            let label = map
                .misconception(target)
                .map(|m| m.label.as_str())
                .unwrap_or(target);
            format!(
                "OBJECTIVE: Re-check the confirmed misconception '{label}'.\n\
                 TECHNIQUE: Generate a TRAP probe phrased differently from the dialogue that first surfaced it, so the confirmation does not rest on a single exchange.\n\
                 WHY: {reason}.\n\
                 EXAMPLE: \"Here is a slightly different case. What happens now?\"",
                reason = task.reason,
            )
        }
    }
}

fn describe(description: &str) -> String {
    if description.trim().is_empty() {
        String::new()
    } else {
        format!(" Context: {}.", description.trim().trim_end_matches('.'))
    }
}

/// Read-only projection of a session for dashboards and prompts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub student_id: String,
    pub subject_area: String,
    pub status: SessionStatus,
    pub coverage: CoverageReport,
    pub turn_count: usize,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

/// Summarize a session under the default coverage rules.
pub fn get_session_summary(session: &DiagnosticSession) -> SessionSummary {
    summary_with(&CoverageRules::default(), session)
}

pub fn summary_with(rules: &CoverageRules, session: &DiagnosticSession) -> SessionSummary {
    SessionSummary {
        student_id: session.student_id().to_string(),
        subject_area: session.subject_area().to_string(),
        status: session.status(),
        coverage: rules.report(session),
        turn_count: session.conversation_history().len(),
        created_at: session.created_at(),
        last_updated: session.last_updated(),
    }
}

impl fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = &self.coverage;
        writeln!(
            f,
            "Session for {} on {} ({})",
            self.student_id, self.subject_area, self.status
        )?;
        writeln!(
            f,
            "Knowledge map: {} concepts, {} misconceptions ({} validated)",
            c.concepts, c.misconceptions, c.validated_misconceptions
        )?;
        writeln!(
            f,
            "Probes: {} generated, {} administered",
            c.probes, c.administered_probes
        )?;
        writeln!(
            f,
            "Coverage: {}% ({}/{} required probes), {} pending task(s){}",
            c.percentage,
            c.covered_probes,
            c.required_probes,
            c.pending_tasks,
            if c.complete { ", complete" } else { "" }
        )?;
        writeln!(f, "Turns: {}", self.turn_count)?;
        write!(
            f,
            "Started {} / last updated {}",
            self.created_at.to_rfc3339(),
            self.last_updated.to_rfc3339()
        )
    }
}

/// Tool actions the interview agent may attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentAction {
    AddConcept,
    AddMisconception,
    AddProbe,
    ValidateMisconception,
    UpdateMastery,
}

impl FromStr for AgentAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "add_concept" => Ok(AgentAction::AddConcept),
            "add_misconception" => Ok(AgentAction::AddMisconception),
            "add_probe" => Ok(AgentAction::AddProbe),
            "validate_misconception" => Ok(AgentAction::ValidateMisconception),
            "update_mastery" => Ok(AgentAction::UpdateMastery),
            other => Err(format!("unknown action: {other}")),
        }
    }
}

/// Cheap pre-check for agent tool calls.
///
/// This mirrors the hard invariants of [`crate::session`] so the agent can
/// avoid obviously doomed calls; it does not replace them.
pub fn can_perform_action(session: &DiagnosticSession, action: AgentAction) -> bool {
    let map = session.knowledge_map();
    match action {
        AgentAction::AddConcept => true,
        AgentAction::AddMisconception | AgentAction::UpdateMastery => map.concept_count() > 0,
        AgentAction::AddProbe => map.concept_count() > 0 || map.misconception_count() > 0,
        AgentAction::ValidateMisconception => map.misconception_count() > 0,
    }
}
