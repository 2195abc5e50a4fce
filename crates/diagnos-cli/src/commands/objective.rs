//! The `diagnos objective` command.

use std::path::PathBuf;

use anyhow::Result;

use diagnos_core::guidance::next_objective_with;

use super::{coverage_rules, load_session};

pub fn execute(session_path: PathBuf, config_path: Option<PathBuf>) -> Result<()> {
    let rules = coverage_rules(config_path.as_deref())?;
    let session = load_session(&session_path)?;
    println!("{}", next_objective_with(&rules, &session));
    Ok(())
}
