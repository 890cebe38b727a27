use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::calibration::CalibrationReport;
use super::store::ConfidenceStore;
use super::types::{ChangeReason, ConfidenceBand, PhraseHistoryRecord, TuneDirection};

/// Over-confident bands move to these more tentative phrasings.
const TIGHTEN: &[(&str, &str)] = &[
    ("I'm very confident", "I believe"),
    ("This is a strong recommendation", "This is a solid recommendation"),
    ("I highly recommend", "I recommend"),
    ("Strong evidence supports", "Good evidence supports"),
    ("I recommend", "I lean towards"),
    ("This is a solid choice", "This seems like a good choice"),
    ("I'm confident", "I think"),
    ("Strong indicators", "Indicators"),
];

/// Under-confident bands move to these more assertive phrasings.
const LOOSEN: &[(&str, &str)] = &[
    ("I think", "I'm confident"),
    ("I lean towards", "I recommend"),
    ("This seems like", "This is"),
    ("Moderate evidence", "Strong evidence"),
    ("I believe", "I'm confident"),
    ("Good evidence", "Strong evidence"),
];

pub fn default_bands() -> Vec<ConfidenceBand> {
    vec![
        ConfidenceBand::new(
            0.0,
            0.5,
            0.35,
            &["I think", "I lean towards", "This seems like a reasonable option"],
        ),
        ConfidenceBand::new(
            0.5,
            0.7,
            0.6,
            &["I believe", "I recommend", "This seems like a good choice"],
        ),
        ConfidenceBand::new(
            0.7,
            0.9,
            0.8,
            &["I'm confident", "This is a solid choice", "Good evidence supports"],
        ),
        ConfidenceBand::new(
            0.9,
            1.0,
            0.95,
            &["I'm very confident", "I highly recommend", "Strong evidence supports"],
        ),
    ]
}

/// Rewrite each phrase with the first matching substitution for `direction`.
pub fn substitute(phrases: &[String], direction: TuneDirection) -> Vec<String> {
    let table = match direction {
        TuneDirection::Tighten => TIGHTEN,
        TuneDirection::Loosen => LOOSEN,
    };
    phrases
        .iter()
        .map(|phrase| {
            table
                .iter()
                .find(|(from, _)| phrase.contains(*from))
                .map(|(from, to)| phrase.replace(*from, to))
                .unwrap_or_else(|| phrase.clone())
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TuneMode {
    DryRun,
    Apply,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BandChange {
    pub band_key: String,
    pub direction: TuneDirection,
    pub accuracy: f64,
    pub target: f64,
    pub sample_count: usize,
    pub previous_phrases: Vec<String>,
    pub new_phrases: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TuneOutcome {
    NoActionNeeded { reason: String },
    Proposed { changes: Vec<BandChange> },
    Applied { changes: Vec<BandChange> },
}

/// Owns the phrase table. All rewrites go through one lock.
pub struct PhraseTuner {
    store: Arc<dyn ConfidenceStore>,
    lock: Mutex<()>,
}

impl PhraseTuner {
    pub fn new(store: Arc<dyn ConfidenceStore>) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
        }
    }

    /// Current bands; the built-in table until something is persisted.
    pub async fn bands(&self) -> Result<Vec<ConfidenceBand>> {
        Ok(self.store.load_bands().await?.unwrap_or_else(default_bands))
    }

    /// First phrase of the band containing `confidence`.
    pub async fn phrase_for(&self, confidence: f64) -> Result<Option<String>> {
        Ok(self
            .bands()
            .await?
            .into_iter()
            .find(|b| b.contains(confidence))
            .and_then(|b| b.phrases.into_iter().next()))
    }

    pub async fn history(&self, band_key: Option<&str>) -> Result<Vec<PhraseHistoryRecord>> {
        self.store.history(band_key).await
    }

    pub async fn auto_tune(&self, report: &CalibrationReport, mode: TuneMode) -> Result<TuneOutcome> {
        if report.resolved_entries == 0 {
            return Ok(TuneOutcome::NoActionNeeded {
                reason: "no calibration data in window".to_string(),
            });
        }

        let _guard = self.lock.lock().await;
        let mut bands = self.bands().await?;
        let mut changes = Vec::new();

        for stats in report.flagged_bands() {
            let (Some(direction), Some(accuracy)) = (stats.direction, stats.accuracy) else {
                continue;
            };
            let Some(band) = bands.iter().find(|b| b.key == stats.band_key) else {
                warn!(band = %stats.band_key, "flagged band missing from phrase table");
                continue;
            };
            let new_phrases = substitute(&band.phrases, direction);
            if new_phrases == band.phrases {
                info!(band = %band.key, direction = ?direction, "no substitution applies");
                continue;
            }
            changes.push(BandChange {
                band_key: band.key.clone(),
                direction,
                accuracy,
                target: stats.target_accuracy,
                sample_count: stats.count,
                previous_phrases: band.phrases.clone(),
                new_phrases,
            });
        }

        if changes.is_empty() {
            return Ok(TuneOutcome::NoActionNeeded {
                reason: "all bands within calibration threshold".to_string(),
            });
        }

        if mode == TuneMode::DryRun {
            info!(bands = changes.len(), "auto-tune dry run");
            return Ok(TuneOutcome::Proposed { changes });
        }

        let now = Utc::now();
        for change in &changes {
            if let Some(band) = bands.iter_mut().find(|b| b.key == change.band_key) {
                band.phrases = change.new_phrases.clone();
                band.last_calibrated = Some(now);
            }
        }
        self.store.save_bands(&bands).await?;
        for change in &changes {
            self.store
                .append_history(&PhraseHistoryRecord {
                    band_key: change.band_key.clone(),
                    previous_phrases: change.previous_phrases.clone(),
                    new_phrases: change.new_phrases.clone(),
                    reason: ChangeReason::AutoTune {
                        direction: change.direction,
                        accuracy: change.accuracy,
                        target: change.target,
                        sample_count: change.sample_count,
                    },
                    recorded_at: now,
                })
                .await?;
            info!(
                band = %change.band_key,
                direction = ?change.direction,
                accuracy = change.accuracy,
                target = change.target,
                "phrases retuned"
            );
        }
        Ok(TuneOutcome::Applied { changes })
    }

    pub async fn manual_update(
        &self,
        band_key: &str,
        phrases: Vec<String>,
        note: Option<String>,
    ) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.replace_phrases(band_key, phrases, ChangeReason::Manual { note })
            .await?;
        info!(band = band_key, "phrases updated manually");
        Ok(())
    }

    /// Restore the phrases in force before the band's most recent change.
    ///
    /// The rollback itself is recorded, so rolling back twice undoes the first.
    pub async fn rollback(&self, band_key: &str) -> Result<Vec<String>> {
        let _guard = self.lock.lock().await;
        let last = self
            .store
            .history(Some(band_key))
            .await?
            .pop()
            .ok_or_else(|| anyhow!("no phrase history for band {}", band_key))?;

        self.replace_phrases(band_key, last.previous_phrases.clone(), ChangeReason::Rollback)
            .await?;
        info!(band = band_key, "phrases rolled back");
        Ok(last.previous_phrases)
    }

    async fn replace_phrases(
        &self,
        band_key: &str,
        phrases: Vec<String>,
        reason: ChangeReason,
    ) -> Result<()> {
        let mut bands = self.bands().await?;
        let band = bands
            .iter_mut()
            .find(|b| b.key == band_key)
            .ok_or_else(|| anyhow!("unknown confidence band {}", band_key))?;

        let now = Utc::now();
        let previous = std::mem::replace(&mut band.phrases, phrases.clone());
        band.last_calibrated = Some(now);
        self.store.save_bands(&bands).await?;
        self.store
            .append_history(&PhraseHistoryRecord {
                band_key: band_key.to_string(),
                previous_phrases: previous,
                new_phrases: phrases,
                reason,
                recorded_at: now,
            })
            .await
    }
}
