//! Review reports with JSON persistence and a Markdown rendering.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::calibration::CalibrationRun;
use crate::curriculum::TopologyReport;
use crate::model::{AlertType, IntegrityAlert};

/// Everything one exam review produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamReview {
    pub exam_id: String,
    /// `None` when the exam had too few completed attempts.
    pub calibration: Option<CalibrationRun>,
    pub distractor_alerts: Vec<IntegrityAlert>,
    pub dif_alerts: Vec<IntegrityAlert>,
    pub label_alerts: Vec<IntegrityAlert>,
    pub drift_alerts: Vec<IntegrityAlert>,
    pub topology: TopologyReport,
    pub duration_ms: u64,
}

impl ExamReview {
    /// Every alert inserted during the review, in detector order.
    pub fn alerts(&self) -> impl Iterator<Item = &IntegrityAlert> {
        self.calibration
            .iter()
            .flat_map(|run| run.alerts.iter())
            .chain(&self.distractor_alerts)
            .chain(&self.dif_alerts)
            .chain(&self.label_alerts)
            .chain(&self.drift_alerts)
            .chain(&self.topology.alerts)
    }

    pub fn alert_count(&self) -> usize {
        self.alerts().count()
    }

    pub fn was_calibrated(&self) -> bool {
        self.calibration.is_some()
    }
}

/// An exam whose review failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamFailure {
    pub exam_id: String,
    pub error: String,
    /// Re-running later may succeed.
    pub transient: bool,
}

/// A batch review across exams.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewReport {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    /// Successful reviews, in request order.
    pub exams: Vec<ExamReview>,
    pub failures: Vec<ExamFailure>,
    /// Total wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

impl ReviewReport {
    /// Save the report as JSON to a file.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("failed to serialize report")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        Ok(())
    }

    /// Load a report from a JSON file.
    pub fn load_json(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read report from {}", path.display()))?;
        let report: ReviewReport =
            serde_json::from_str(&content).context("failed to parse report JSON")?;
        Ok(report)
    }

    pub fn exam(&self, exam_id: &str) -> Option<&ExamReview> {
        self.exams.iter().find(|e| e.exam_id == exam_id)
    }

    /// New alerts per type across all exams.
    pub fn alert_counts(&self) -> BTreeMap<AlertType, usize> {
        let mut counts = BTreeMap::new();
        for alert in self.exams.iter().flat_map(ExamReview::alerts) {
            *counts.entry(alert.alert_type).or_insert(0) += 1;
        }
        counts
    }

    pub fn to_markdown(&self) -> String {
        let mut md = String::new();
        let _ = writeln!(md, "# Exam Review\n");
        let _ = writeln!(
            md,
            "Run `{}` at {} ({} exam(s), {} failure(s), {}ms)\n",
            self.id,
            self.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
            self.exams.len(),
            self.failures.len(),
            self.duration_ms
        );

        let counts = self.alert_counts();
        if !counts.is_empty() {
            md.push_str("## New Alerts\n\n| Type | Count |\n|------|-------|\n");
            for (alert_type, count) in &counts {
                let _ = writeln!(md, "| {alert_type} | {count} |");
            }
            md.push('\n');
        }

        for review in &self.exams {
            let _ = writeln!(md, "## {}\n", review.exam_id);
            match &review.calibration {
                Some(run) => {
                    let _ = writeln!(
                        md,
                        "Calibrated {} question(s) from {} attempt(s) ({} masters, {} novices).\n",
                        run.rows.len(),
                        run.attempt_count,
                        run.master_count,
                        run.novice_count
                    );
                    md.push_str("| Question | Slip | Guess | Difficulty | Discrimination | N |\n");
                    md.push_str("|----------|------|-------|------------|----------------|---|\n");
                    for row in &run.rows {
                        let _ = writeln!(
                            md,
                            "| {} | {:.3} | {:.3} | {:.3} | {:.3} | {} |",
                            row.question_id,
                            row.slip,
                            row.guess,
                            row.difficulty,
                            row.discrimination,
                            row.sample_size
                        );
                    }
                    md.push('\n');
                }
                None => md.push_str("Not calibrated: too few completed attempts.\n\n"),
            }

            let topology = &review.topology;
            let _ = writeln!(
                md,
                "Prerequisite graph: {} competencies, {} edges, {} cycle(s), {} orphan edge(s).\n",
                topology.competency_count,
                topology.edge_count,
                topology.cycles.len(),
                topology.orphan_edges.len()
            );

            let alerts: Vec<_> = review.alerts().collect();
            if !alerts.is_empty() {
                md.push_str("| Severity | Type | Target | Message |\n");
                md.push_str("|----------|------|--------|---------|\n");
                for alert in alerts {
                    let target = alert
                        .question_id
                        .as_deref()
                        .or(alert.competency_id.as_deref())
                        .unwrap_or("-");
                    let _ = writeln!(
                        md,
                        "| {} | {} | {} | {} |",
                        alert.severity,
                        alert.alert_type,
                        target,
                        alert.message.replace('|', "\\|")
                    );
                }
                md.push('\n');
            }
        }

        if !self.failures.is_empty() {
            md.push_str("## Failures\n\n");
            for failure in &self.failures {
                let retry = if failure.transient { " (transient)" } else { "" };
                let _ = writeln!(md, "- **{}**{}: {}", failure.exam_id, retry, failure.error);
            }
        }

        md
    }
}
