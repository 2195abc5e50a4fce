//! The `diagnos review` command.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use comfy_table::{Cell, Table};

use diagnos_analytics::model::AlertSeverity;
use diagnos_analytics::{
    load_config_from, ExamReview, InMemoryStore, Repositories, ReviewPipeline, ReviewProgress,
    ReviewReport, StoreSnapshot,
};

/// Console progress reporter.
struct ConsoleProgress;

impl ReviewProgress for ConsoleProgress {
    fn on_exam_start(&self, exam_id: &str) {
        eprintln!("  Reviewing: {exam_id}");
    }

    fn on_exam_complete(&self, review: &ExamReview) {
        let calibrated = match &review.calibration {
            Some(run) => format!("{} questions calibrated", run.rows.len()),
            None => "not calibrated".to_string(),
        };
        eprintln!(
            "  Done: {} [{}] {} new alert(s) ({}ms)",
            review.exam_id,
            calibrated,
            review.alert_count(),
            review.duration_ms
        );
    }

    fn on_exam_error(&self, exam_id: &str, error: &str) {
        eprintln!("  ERROR: {exam_id}: {error}");
    }

    fn on_batch_complete(&self, total: usize, completed: usize, failed: usize, elapsed: Duration) {
        eprintln!(
            "\nComplete: {completed}/{total} reviewed, {failed} failed ({:.1}s)",
            elapsed.as_secs_f64()
        );
    }
}

pub async fn execute(
    snapshot_path: PathBuf,
    exams: Vec<String>,
    output: Option<PathBuf>,
    format: String,
    parallelism: Option<usize>,
    fail_on_critical: bool,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let mut config = load_config_from(config_path.as_deref())?;
    if let Some(p) = parallelism {
        anyhow::ensure!(p >= 1, "parallelism must be at least 1");
        config.parallelism = p;
    }
    let formats: Vec<&str> = if format == "all" {
        vec!["json", "markdown", "text"]
    } else {
        format.split(',').map(str::trim).collect()
    };
    for fmt in &formats {
        anyhow::ensure!(
            matches!(*fmt, "json" | "markdown" | "md" | "text"),
            "unknown format: {fmt}"
        );
    }

    let snapshot = StoreSnapshot::load_json(&snapshot_path)?;
    let exam_ids = if exams.is_empty() {
        snapshot.exam_ids()
    } else {
        exams
    };
    anyhow::ensure!(!exam_ids.is_empty(), "no exams to review");

    let store = Arc::new(InMemoryStore::from_snapshot(snapshot));
    let pipeline = ReviewPipeline::new(&Repositories::shared(Arc::clone(&store)), &config);

    eprintln!(
        "diagnos v{}: reviewing {} exam(s), parallelism {}\n",
        env!("CARGO_PKG_VERSION"),
        exam_ids.len(),
        config.parallelism
    );
    let report = pipeline.review_exams(&exam_ids, &ConsoleProgress).await;
    print_summary(&report);

    let output = output.unwrap_or_else(|| config.output_dir.clone());
    std::fs::create_dir_all(&output)?;
    let timestamp = chrono::Utc::now().format("%Y-%m-%dT%H%M%S");

    for fmt in &formats {
        match *fmt {
            "json" => {
                let path = output.join(format!("review-{timestamp}.json"));
                report.save_json(&path)?;
                eprintln!("Results saved to: {}", path.display());
            }
            "markdown" | "md" => {
                let path = output.join(format!("review-{timestamp}.md"));
                std::fs::write(&path, report.to_markdown())?;
                eprintln!("Markdown report: {}", path.display());
            }
            _ => print_alerts(&report),
        }
    }

    let snapshot_out = output.join(format!("snapshot-{timestamp}.json"));
    store.snapshot()?.save_json(&snapshot_out)?;
    eprintln!("Updated snapshot: {}", snapshot_out.display());

    if fail_on_critical {
        let critical = report
            .exams
            .iter()
            .flat_map(ExamReview::alerts)
            .filter(|a| a.severity == AlertSeverity::Critical)
            .count();
        if critical > 0 {
            eprintln!("{critical} critical alert(s) raised");
            std::process::exit(1);
        }
    }

    Ok(())
}

fn print_summary(report: &ReviewReport) {
    let mut table = Table::new();
    table.set_header(vec![
        "Exam",
        "Attempts",
        "Questions",
        "New Alerts",
        "Cycles",
        "Orphans",
        "Duration",
    ]);

    for review in &report.exams {
        let (attempts, questions) = match &review.calibration {
            Some(run) => (run.attempt_count.to_string(), run.rows.len().to_string()),
            None => ("<floor".to_string(), "-".to_string()),
        };
        table.add_row(vec![
            Cell::new(&review.exam_id),
            Cell::new(attempts),
            Cell::new(questions),
            Cell::new(review.alert_count()),
            Cell::new(review.topology.cycles.len()),
            Cell::new(review.topology.orphan_edges.len()),
            Cell::new(format!("{}ms", review.duration_ms)),
        ]);
    }
    for failure in &report.failures {
        table.add_row(vec![
            Cell::new(&failure.exam_id),
            Cell::new("FAILED"),
            Cell::new("-"),
            Cell::new("-"),
            Cell::new("-"),
            Cell::new("-"),
            Cell::new(&failure.error),
        ]);
    }

    eprintln!("\n{table}");
}

fn print_alerts(report: &ReviewReport) {
    let alerts: Vec<_> = report.exams.iter().flat_map(ExamReview::alerts).collect();
    if alerts.is_empty() {
        println!("No new alerts.");
        return;
    }
    let mut table = Table::new();
    table.set_header(vec!["Exam", "Severity", "Type", "Target", "Message"]);
    for alert in alerts {
        let target = alert
            .question_id
            .as_deref()
            .or(alert.competency_id.as_deref())
            .unwrap_or("-");
        table.add_row(vec![
            Cell::new(&alert.exam_id),
            Cell::new(alert.severity),
            Cell::new(alert.alert_type),
            Cell::new(target),
            Cell::new(&alert.message),
        ]);
    }
    println!("{table}");
}
