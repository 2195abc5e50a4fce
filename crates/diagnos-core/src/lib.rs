//! diagnos-core: Knowledge map, session mutation, coverage rules, and agent guidance.
//!
//! Everything in this crate is pure and synchronous: operations take a
//! `DiagnosticSession` by reference and return a new one, so concurrent
//! readers never need a lock.

pub mod coverage;
pub mod error;
pub mod extraction;
pub mod guidance;
pub mod model;
pub mod session;

pub use coverage::{
    calculate_coverage, calculate_coverage_percentage, get_next_task, is_diagnostic_complete,
    CoverageOptions, CoverageReport, CoverageRules, PendingTask, Priority, TaskType,
};
pub use error::{ExtractionError, ValidationError};
pub use extraction::{parse_event_log, replay, ExtractionEvent};
pub use guidance::{
    can_perform_action, get_next_objective, get_session_summary, AgentAction, SessionSummary,
};
pub use model::{
    Concept, ConversationTurn, DiagnosticSession, KnowledgeMap, Misconception, ProbeType, QMatrix,
    QMatrixEntry, SessionStatus, Severity, TargetType, TurnRole,
};
