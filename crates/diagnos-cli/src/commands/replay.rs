//! The `diagnos replay` command.

use std::path::PathBuf;

use anyhow::{Context, Result};

use diagnos_core::{
    get_next_objective, get_session_summary, parse_event_log, replay, DiagnosticSession,
};

pub fn execute(
    events_path: PathBuf,
    student: String,
    subject: String,
    output: Option<PathBuf>,
) -> Result<()> {
    let content = std::fs::read_to_string(&events_path)
        .with_context(|| format!("failed to read event log {}", events_path.display()))?;
    let events = parse_event_log(&content)
        .with_context(|| format!("invalid event log {}", events_path.display()))?;
    let event_count = events.len();

    let session = replay(&DiagnosticSession::new(student, subject), events)
        .context("failed to replay event log")?;
    tracing::info!(events = event_count, session = %session.id(), "event log replayed");

    println!("Replayed {event_count} event(s)\n");
    println!("{}\n", get_session_summary(&session));
    println!("Next objective:\n{}", get_next_objective(&session));

    if let Some(path) = output {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&session).context("failed to serialize session")?;
        std::fs::write(&path, json)
            .with_context(|| format!("failed to write session to {}", path.display()))?;
        eprintln!("Session saved to: {}", path.display());
    }

    Ok(())
}
