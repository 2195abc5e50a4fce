//! Analytics configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use diagnos_core::CoverageOptions;

/// Longest drift window accepted, in days.
pub const MAX_DRIFT_WINDOW_DAYS: i64 = 36_500;

/// Detector thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Completed attempts needed before an exam is calibrated.
    #[serde(default = "default_min_attempts")]
    pub min_attempts: usize,
    /// Slip above this raises a critical alert.
    #[serde(default = "default_high_slip")]
    pub high_slip_critical: f64,
    /// Discrimination below this raises an alert.
    #[serde(default)]
    pub min_discrimination: f64,
    /// Distractors chosen by a smaller share of respondents are useless.
    #[serde(default = "default_useless_distractor")]
    pub useless_distractor_limit: f64,
    /// Correct-rate gap between groups that flags DIF.
    #[serde(default = "default_dif_gap")]
    pub dif_gap_warning: f64,
    /// Label-rate gap between groups that flags label bias.
    #[serde(default = "default_label_bias")]
    pub label_bias_threshold: f64,
    /// Pass-rate drop that flags concept drift.
    #[serde(default = "default_drift_alarm")]
    pub concept_drift_alarm: f64,
    #[serde(default = "default_drift_window")]
    pub drift_window_days: i64,
    #[serde(default = "default_drift_min_recent")]
    pub drift_min_recent: usize,
    #[serde(default = "default_drift_min_historical")]
    pub drift_min_historical: usize,
    /// Groups with fewer respondents are left out of group comparisons.
    #[serde(default = "default_min_group_size")]
    pub min_group_size: usize,
}

fn default_min_attempts() -> usize {
    10
}
fn default_high_slip() -> f64 {
    0.4
}
fn default_useless_distractor() -> f64 {
    0.05
}
fn default_dif_gap() -> f64 {
    0.25
}
fn default_label_bias() -> f64 {
    0.2
}
fn default_drift_alarm() -> f64 {
    0.15
}
fn default_drift_window() -> i64 {
    7
}
fn default_drift_min_recent() -> usize {
    5
}
fn default_drift_min_historical() -> usize {
    10
}
fn default_min_group_size() -> usize {
    1
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min_attempts: default_min_attempts(),
            high_slip_critical: default_high_slip(),
            min_discrimination: 0.0,
            useless_distractor_limit: default_useless_distractor(),
            dif_gap_warning: default_dif_gap(),
            label_bias_threshold: default_label_bias(),
            concept_drift_alarm: default_drift_alarm(),
            drift_window_days: default_drift_window(),
            drift_min_recent: default_drift_min_recent(),
            drift_min_historical: default_drift_min_historical(),
            min_group_size: default_min_group_size(),
        }
    }
}

/// What happens when a detector re-raises a condition that already has an
/// unresolved alert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertPolicy {
    /// Skip the insert while an unresolved alert with the same key exists.
    #[default]
    DedupeUnresolved,
    /// Insert every detection.
    KeepHistory,
}

/// Top-level diagnos configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosConfig {
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub coverage: CoverageOptions,
    #[serde(default)]
    pub alert_policy: AlertPolicy,
    /// Max exams reviewed concurrently.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    /// Upper bound for a single repository read.
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,
    /// Output directory for review reports.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

fn default_parallelism() -> usize {
    4
}
fn default_query_timeout() -> u64 {
    30
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("./diagnos-results")
}

impl Default for DiagnosConfig {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            coverage: CoverageOptions::default(),
            alert_policy: AlertPolicy::default(),
            parallelism: default_parallelism(),
            query_timeout_secs: default_query_timeout(),
            output_dir: default_output_dir(),
        }
    }
}

impl DiagnosConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }
}

/// Load configuration from well-known paths.
///
/// Search order:
/// 1. `diagnos.toml` in the current directory
/// 2. `~/.config/diagnos/config.toml`
///
/// Environment variable overrides: `DIAGNOS_PARALLELISM`,
/// `DIAGNOS_QUERY_TIMEOUT_SECS`, `DIAGNOS_MIN_ATTEMPTS`.
pub fn load_config() -> Result<DiagnosConfig> {
    load_config_from(None)
}

/// Load config from an explicit path, or search the default locations.
pub fn load_config_from(path: Option<&Path>) -> Result<DiagnosConfig> {
    let config_path = if let Some(p) = path {
        if p.exists() {
            Some(p.to_path_buf())
        } else {
            anyhow::bail!("config file not found: {}", p.display());
        }
    } else {
        let local = PathBuf::from("diagnos.toml");
        if local.exists() {
            Some(local)
        } else {
            dirs_path()
                .map(|dir| dir.join("config.toml"))
                .filter(|global| global.exists())
        }
    };

    let config = match config_path {
        Some(path) => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config: {}", path.display()))?;
            toml::from_str::<DiagnosConfig>(&content)
                .with_context(|| format!("failed to parse config: {}", path.display()))?
        }
        None => DiagnosConfig::default(),
    };

    apply_overrides(config, |name| std::env::var(name).ok())
}

/// Apply `DIAGNOS_*` overrides obtained through `lookup`.
pub fn apply_overrides<F>(mut config: DiagnosConfig, lookup: F) -> Result<DiagnosConfig>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup("DIAGNOS_PARALLELISM") {
        config.parallelism = parse_var("DIAGNOS_PARALLELISM", &value)?;
    }
    if let Some(value) = lookup("DIAGNOS_QUERY_TIMEOUT_SECS") {
        config.query_timeout_secs = parse_var("DIAGNOS_QUERY_TIMEOUT_SECS", &value)?;
    }
    if let Some(value) = lookup("DIAGNOS_MIN_ATTEMPTS") {
        config.thresholds.min_attempts = parse_var("DIAGNOS_MIN_ATTEMPTS", &value)?;
    }
    if config.parallelism == 0 {
        anyhow::bail!("parallelism must be at least 1");
    }
    let window = config.thresholds.drift_window_days;
    if !(1..=MAX_DRIFT_WINDOW_DAYS).contains(&window) {
        anyhow::bail!(
            "drift_window_days must be between 1 and {MAX_DRIFT_WINDOW_DAYS}, got {window}"
        );
    }
    Ok(config)
}

fn parse_var<T>(name: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse::<T>()
        .with_context(|| format!("invalid value for {name}: {value:?}"))
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".config").join("diagnos"))
}
