//! In-memory implementation of every repository trait.
//!
//! Used by tests and by the CLI, which loads a JSON snapshot, runs the
//! review pipeline against it and writes the updated snapshot back.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::{
    AlertKey, AttemptRecord, AttemptStatus, ExamDefinition, IntegrityAlert,
    ItemCalibrationResult, LearnerProfile, PrerequisiteEdge,
};
use crate::traits::{
    AlertRepository, AttemptRepository, CalibrationRepository, CurriculumRepository,
};

/// Serializable contents of an [`InMemoryStore`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default)]
    pub exams: Vec<ExamDefinition>,
    #[serde(default)]
    pub attempts: Vec<AttemptRecord>,
    #[serde(default)]
    pub learners: Vec<LearnerProfile>,
    /// Prerequisite edges keyed by exam ID.
    #[serde(default)]
    pub curricula: BTreeMap<String, Vec<PrerequisiteEdge>>,
    #[serde(default)]
    pub calibrations: Vec<ItemCalibrationResult>,
    #[serde(default)]
    pub alerts: Vec<IntegrityAlert>,
}

impl StoreSnapshot {
    /// Load a snapshot from a JSON file.
    pub fn load_json(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read snapshot from {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse snapshot {}", path.display()))
    }

    /// Save the snapshot as pretty JSON, creating parent directories.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("failed to serialize snapshot")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)
            .with_context(|| format!("failed to write snapshot to {}", path.display()))?;
        Ok(())
    }

    /// IDs of all exams in the snapshot, in definition order.
    pub fn exam_ids(&self) -> Vec<String> {
        self.exams.iter().map(|e| e.id.clone()).collect()
    }
}

/// A mutex-guarded store that counts writes.
///
/// An optional read delay makes every read sleep first, which lets tests
/// exercise query timeouts.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<StoreSnapshot>,
    read_delay: Option<Duration>,
    calibration_writes: AtomicU32,
    alert_writes: AtomicU32,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        Self {
            state: Mutex::new(snapshot),
            ..Self::default()
        }
    }

    /// Make every read sleep for `delay` before answering.
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    pub fn insert_exam(&self, exam: ExamDefinition) {
        if let Ok(mut state) = self.state.lock() {
            state.exams.retain(|e| e.id != exam.id);
            state.exams.push(exam);
        }
    }

    pub fn insert_attempt(&self, attempt: AttemptRecord) {
        if let Ok(mut state) = self.state.lock() {
            state.attempts.push(attempt);
        }
    }

    pub fn insert_learner(&self, profile: LearnerProfile) {
        if let Ok(mut state) = self.state.lock() {
            state.learners.retain(|l| l.learner_id != profile.learner_id);
            state.learners.push(profile);
        }
    }

    pub fn insert_edge(&self, exam_id: &str, edge: PrerequisiteEdge) {
        if let Ok(mut state) = self.state.lock() {
            state.curricula.entry(exam_id.to_string()).or_default().push(edge);
        }
    }

    /// Mark every alert with this key resolved. Returns how many changed.
    pub fn resolve_alerts(&self, key: &AlertKey) -> usize {
        let Ok(mut state) = self.state.lock() else {
            return 0;
        };
        let mut changed = 0;
        for alert in state.alerts.iter_mut() {
            if !alert.is_resolved && &alert.key() == key {
                alert.is_resolved = true;
                changed += 1;
            }
        }
        changed
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> Result<StoreSnapshot> {
        Ok(self.lock()?.clone())
    }

    /// Number of `append_calibrations` calls that wrote at least one row.
    pub fn calibration_writes(&self) -> u32 {
        self.calibration_writes.load(Ordering::Relaxed)
    }

    /// Number of alerts inserted.
    pub fn alert_writes(&self) -> u32 {
        self.alert_writes.load(Ordering::Relaxed)
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreSnapshot>> {
        self.state
            .lock()
            .map_err(|_| anyhow::anyhow!("in-memory store lock poisoned"))
    }

    async fn delay(&self) {
        if let Some(delay) = self.read_delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl AttemptRepository for InMemoryStore {
    async fn completed_attempts(&self, exam_id: &str) -> Result<Vec<AttemptRecord>> {
        self.delay().await;
        Ok(self
            .lock()?
            .attempts
            .iter()
            .filter(|a| a.exam_id == exam_id && a.status == AttemptStatus::Completed)
            .cloned()
            .collect())
    }

    async fn exam(&self, exam_id: &str) -> Result<Option<ExamDefinition>> {
        self.delay().await;
        Ok(self.lock()?.exams.iter().find(|e| e.id == exam_id).cloned())
    }

    async fn learner_profiles(&self, learner_ids: &[String]) -> Result<Vec<LearnerProfile>> {
        self.delay().await;
        Ok(self
            .lock()?
            .learners
            .iter()
            .filter(|l| learner_ids.contains(&l.learner_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CurriculumRepository for InMemoryStore {
    async fn prerequisite_edges(&self, exam_id: &str) -> Result<Vec<PrerequisiteEdge>> {
        self.delay().await;
        Ok(self
            .lock()?
            .curricula
            .get(exam_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl CalibrationRepository for InMemoryStore {
    async fn append_calibrations(&self, rows: &[ItemCalibrationResult]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        self.lock()?.calibrations.extend_from_slice(rows);
        self.calibration_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn calibration_history(
        &self,
        exam_id: &str,
        question_id: &str,
    ) -> Result<Vec<ItemCalibrationResult>> {
        self.delay().await;
        let mut rows: Vec<_> = self
            .lock()?
            .calibrations
            .iter()
            .filter(|r| r.exam_id == exam_id && r.question_id == question_id)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.calibrated_at);
        Ok(rows)
    }
}

#[async_trait]
impl AlertRepository for InMemoryStore {
    async fn insert_alert(&self, alert: &IntegrityAlert) -> Result<()> {
        self.lock()?.alerts.push(alert.clone());
        self.alert_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn find_open(&self, key: &AlertKey) -> Result<Option<IntegrityAlert>> {
        Ok(self
            .lock()?
            .alerts
            .iter()
            .find(|a| !a.is_resolved && &a.key() == key)
            .cloned())
    }

    async fn alerts(&self, exam_id: &str) -> Result<Vec<IntegrityAlert>> {
        Ok(self
            .lock()?
            .alerts
            .iter()
            .filter(|a| a.exam_id == exam_id)
            .cloned()
            .collect())
    }
}
