//! Alert emission shared by every detector.

use std::sync::Arc;

use crate::config::AlertPolicy;
use crate::error::Result;
use crate::model::IntegrityAlert;
use crate::traits::AlertRepository;

/// Writes alerts under the configured de-duplication policy.
#[derive(Clone)]
pub struct AlertSink {
    repository: Arc<dyn AlertRepository>,
    policy: AlertPolicy,
}

impl AlertSink {
    pub fn new(repository: Arc<dyn AlertRepository>, policy: AlertPolicy) -> Self {
        Self { repository, policy }
    }

    pub fn policy(&self) -> AlertPolicy {
        self.policy
    }

    /// Store `alert` unless policy suppresses it.
    ///
    /// Returns the alert that now describes the condition: the new one when
    /// inserted, or the already-open one when the insert was skipped.
    pub async fn emit(&self, alert: IntegrityAlert) -> Result<Emitted> {
        if self.policy == AlertPolicy::DedupeUnresolved {
            if let Some(open) = self.repository.find_open(&alert.key()).await? {
                tracing::debug!(
                    exam_id = %alert.exam_id,
                    alert_type = %alert.alert_type,
                    existing = %open.id,
                    "unresolved alert already open, skipping"
                );
                return Ok(Emitted::Suppressed(open));
            }
        }
        self.repository.insert_alert(&alert).await?;
        tracing::info!(
            exam_id = %alert.exam_id,
            alert_type = %alert.alert_type,
            severity = %alert.severity,
            "{}",
            alert.message
        );
        Ok(Emitted::Inserted(alert))
    }

    /// Emit every alert in order, returning the ones actually inserted.
    pub async fn emit_all(&self, alerts: Vec<IntegrityAlert>) -> Result<Vec<IntegrityAlert>> {
        let mut inserted = Vec::new();
        for alert in alerts {
            if let Emitted::Inserted(alert) = self.emit(alert).await? {
                inserted.push(alert);
            }
        }
        Ok(inserted)
    }
}

/// Outcome of [`AlertSink::emit`].
#[derive(Debug, Clone, PartialEq)]
pub enum Emitted {
    Inserted(IntegrityAlert),
    Suppressed(IntegrityAlert),
}

impl Emitted {
    pub fn alert(&self) -> &IntegrityAlert {
        match self {
            Emitted::Inserted(a) | Emitted::Suppressed(a) => a,
        }
    }

    pub fn was_inserted(&self) -> bool {
        matches!(self, Emitted::Inserted(_))
    }
}
