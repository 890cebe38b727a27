pub mod calibration;
pub mod store;
pub mod tuner;
pub mod types;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::Result;
use chrono::{Duration, Utc};
use tracing::{error, info, warn};

use crate::error::FeedbackError;
use crate::llm::Message;
use crate::validate::StructuredAdvice;
use calibration::{build_report, CalibrationReport, CalibrationSettings};
use store::ConfidenceStore;
use tuner::{PhraseTuner, TuneMode, TuneOutcome};
use types::{ConfidenceLogEntry, ContextSnapshot, EntryId, OutcomeUpdate};

/// Confidence recorded when the answer carried none.
const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Records finalized answers and their later outcomes.
pub struct ConfidenceLogger {
    store: Arc<dyn ConfidenceStore>,
}

impl ConfidenceLogger {
    pub fn new(store: Arc<dyn ConfidenceStore>) -> Self {
        Self { store }
    }

    pub async fn log(
        &self,
        advice: &StructuredAdvice,
        query: &str,
        context: &[Message],
        model: &str,
        search_used: bool,
        continuation_id: &str,
    ) -> Result<EntryId> {
        let created_at = Utc::now();
        let entry = ConfidenceLogEntry {
            id: ConfidenceLogEntry::compute_id(continuation_id, created_at),
            continuation_id: continuation_id.to_string(),
            response_text: advice.summary_text(),
            confidence_score: advice.confidence_score.unwrap_or(DEFAULT_CONFIDENCE),
            query: query.to_string(),
            context: ContextSnapshot::capture(context, created_at),
            model_used: model.to_string(),
            search_used,
            outcome: None,
            feedback_notes: None,
            created_at,
            feedback_at: None,
        };
        if !self.store.insert_entry(&entry).await? {
            let existing = self
                .store
                .get_entry(continuation_id)
                .await?
                .map(|e| e.id)
                .unwrap_or(entry.id);
            warn!(continuation_id, "continuation id already logged, keeping existing entry");
            return Ok(existing);
        }
        info!(
            entry_id = %entry.id,
            continuation_id,
            confidence = entry.confidence_score,
            search_used,
            "confidence entry logged"
        );
        Ok(entry.id)
    }

    pub async fn update_outcome(
        &self,
        continuation_id: &str,
        outcome: bool,
        notes: Option<String>,
    ) -> Result<OutcomeUpdate, FeedbackError> {
        let update = self
            .store
            .update_outcome(continuation_id, outcome, notes, Utc::now())
            .await?
            .ok_or_else(|| FeedbackError::NotFound(continuation_id.to_string()))?;
        info!(continuation_id, outcome, update = ?update, "feedback received");
        Ok(update)
    }

    pub async fn get(&self, continuation_id: &str) -> Result<Option<ConfidenceLogEntry>> {
        self.store.get_entry(continuation_id).await
    }

    /// Entries from the trailing `days`.
    pub async fn window(&self, days: i64) -> Result<Vec<ConfidenceLogEntry>> {
        self.store
            .entries(Some(Utc::now() - Duration::days(days)))
            .await
    }

    /// Newest first.
    pub async fn recent(
        &self,
        limit: usize,
        include_pending: bool,
    ) -> Result<Vec<ConfidenceLogEntry>> {
        let mut entries = self.store.entries(None).await?;
        if !include_pending {
            entries.retain(ConfidenceLogEntry::is_resolved);
        }
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        entries.truncate(limit);
        Ok(entries)
    }

    /// Delete entries older than `days_to_keep`.
    pub async fn cleanup(&self, days_to_keep: i64) -> Result<usize> {
        let removed = self
            .store
            .delete_before(Utc::now() - Duration::days(days_to_keep))
            .await?;
        info!(removed, days_to_keep, "old confidence entries removed");
        Ok(removed)
    }
}

/// The batch side of the loop: report, then optionally retune.
pub struct Calibrator {
    logger: Arc<ConfidenceLogger>,
    tuner: Arc<PhraseTuner>,
    settings: CalibrationSettings,
}

impl Calibrator {
    pub fn new(
        logger: Arc<ConfidenceLogger>,
        tuner: Arc<PhraseTuner>,
        settings: CalibrationSettings,
    ) -> Self {
        Self {
            logger,
            tuner,
            settings,
        }
    }

    pub async fn report(&self, days: Option<i64>) -> Result<CalibrationReport> {
        let days = days.unwrap_or(self.settings.window_days);
        let entries = self.logger.window(days).await?;
        let bands = self.tuner.bands().await?;
        Ok(build_report(&entries, &bands, &self.settings, days))
    }

    pub async fn run(
        &self,
        days: Option<i64>,
        mode: TuneMode,
    ) -> Result<(CalibrationReport, TuneOutcome)> {
        let report = self.report(days).await?;
        info!(
            resolved = report.resolved_entries,
            brier = ?report.brier_score,
            flagged = report.flagged_bands().count(),
            "calibration report built"
        );
        let outcome = self.tuner.auto_tune(&report, mode).await?;
        Ok((report, outcome))
    }

    /// Periodic apply-mode calibration. The first run waits one full interval.
    pub fn spawn_periodic(self: Arc<Self>, interval: StdDuration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match self.run(None, TuneMode::Apply).await {
                    Ok((_, outcome)) => info!(outcome = ?outcome, "scheduled calibration finished"),
                    Err(e) => error!("scheduled calibration failed: {:#}", e),
                }
            }
        })
    }
}
