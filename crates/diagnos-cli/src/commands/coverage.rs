//! The `diagnos coverage` command.

use std::path::PathBuf;

use anyhow::Result;
use comfy_table::{Cell, Table};

use diagnos_core::PendingTask;

use super::{coverage_rules, load_session};

pub fn execute(session_path: PathBuf, format: String, config_path: Option<PathBuf>) -> Result<()> {
    let rules = coverage_rules(config_path.as_deref())?;
    let session = load_session(&session_path)?;
    let tasks = rules.calculate(&session);
    let report = rules.report(&session);

    match format.as_str() {
        "json" => {
            let out = serde_json::json!({
                "session_id": session.id(),
                "percentage": report.percentage,
                "complete": report.complete,
                "report": report,
                "tasks": tasks,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        "text" => {
            if tasks.is_empty() {
                println!("No pending tasks.");
            } else {
                print_tasks(&tasks);
            }
            println!(
                "Coverage: {}% ({}/{} required probes administered){}",
                report.percentage,
                report.covered_probes,
                report.required_probes,
                if report.complete { ", diagnostic complete" } else { "" }
            );
        }
        other => anyhow::bail!("unknown format: {other} (expected text or json)"),
    }

    Ok(())
}

fn print_tasks(tasks: &[PendingTask]) {
    let mut table = Table::new();
    table.set_header(vec!["#", "Priority", "Task", "Target", "Reason"]);
    for (i, task) in tasks.iter().enumerate() {
        table.add_row(vec![
            Cell::new(i + 1),
            Cell::new(task.priority),
            Cell::new(task.task_type),
            Cell::new(task.target_id.as_deref().unwrap_or("-")),
            Cell::new(&task.reason),
        ]);
    }
    println!("{table}");
}
