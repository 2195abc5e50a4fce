pub mod coverage;
pub mod init;
pub mod objective;
pub mod replay;
pub mod review;

use std::path::Path;

use anyhow::{Context, Result};

use diagnos_analytics::load_config_from;
use diagnos_core::session::verify;
use diagnos_core::{CoverageRules, DiagnosticSession};

/// Read a session JSON file and check its invariants.
pub fn load_session(path: &Path) -> Result<DiagnosticSession> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read session from {}", path.display()))?;
    let session: DiagnosticSession = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse session {}", path.display()))?;
    verify(&session).with_context(|| format!("session {} is inconsistent", path.display()))?;
    Ok(session)
}

/// Coverage rules from the configured options.
pub fn coverage_rules(config_path: Option<&Path>) -> Result<CoverageRules> {
    let config = load_config_from(config_path)?;
    Ok(CoverageRules::new(config.coverage))
}
