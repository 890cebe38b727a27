use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{ConfidenceBand, ConfidenceLogEntry, TuneDirection};

/// Thresholds for the calibration job and its report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationSettings {
    pub window_days: i64,
    /// Flag a band when |accuracy - target| exceeds this.
    pub calibration_threshold: f64,
    pub minimum_samples: usize,
    /// Brier score above which the report asks for calibration.
    pub brier_alert: f64,
    pub band_error_alert: f64,
    pub band_error_min_samples: usize,
    pub accuracy_floor: f64,
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            window_days: 7,
            calibration_threshold: 0.1,
            minimum_samples: 10,
            brier_alert: 0.25,
            band_error_alert: 0.1,
            band_error_min_samples: 5,
            accuracy_floor: 0.6,
        }
    }
}

/// Mean squared distance between stated confidence and the 0/1 outcome.
pub fn brier_score<I>(pairs: I) -> Option<f64>
where
    I: IntoIterator<Item = (f64, bool)>,
{
    let (sum, n) = pairs.into_iter().fold((0.0, 0usize), |(sum, n), (p, hit)| {
        let o = if hit { 1.0 } else { 0.0 };
        (sum + (p - o).powi(2), n + 1)
    });
    (n > 0).then(|| sum / n as f64)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breakdown {
    pub entries: usize,
    pub brier_score: f64,
    pub accuracy: f64,
    pub avg_confidence: f64,
}

impl Breakdown {
    fn of<'a>(entries: impl IntoIterator<Item = &'a ConfidenceLogEntry>) -> Option<Self> {
        let pairs: Vec<(f64, bool)> = entries
            .into_iter()
            .filter_map(|e| e.outcome.map(|o| (e.confidence_score, o)))
            .collect();
        let n = pairs.len() as f64;
        Some(Self {
            brier_score: brier_score(pairs.iter().copied())?,
            entries: pairs.len(),
            accuracy: pairs.iter().filter(|(_, o)| *o).count() as f64 / n,
            avg_confidence: pairs.iter().map(|(p, _)| p).sum::<f64>() / n,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandStats {
    pub band_key: String,
    pub target_accuracy: f64,
    pub count: usize,
    pub accuracy: Option<f64>,
    pub avg_confidence: Option<f64>,
    /// |accuracy - target|
    pub target_error: Option<f64>,
    /// |avg_confidence - accuracy|
    pub confidence_error: Option<f64>,
    pub flagged: bool,
    pub direction: Option<TuneDirection>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub priority: Priority,
    pub action: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationReport {
    pub generated_at: DateTime<Utc>,
    pub window_days: i64,
    pub total_entries: usize,
    pub resolved_entries: usize,
    pub brier_score: Option<f64>,
    pub accuracy: Option<f64>,
    pub avg_confidence: Option<f64>,
    pub needs_calibration: bool,
    pub bands: Vec<BandStats>,
    pub by_model: BTreeMap<String, Breakdown>,
    pub by_search: BTreeMap<String, Breakdown>,
    pub recommendations: Vec<Recommendation>,
}

impl CalibrationReport {
    pub fn flagged_bands(&self) -> impl Iterator<Item = &BandStats> {
        self.bands.iter().filter(|b| b.flagged)
    }
}

fn band_stats(
    band: &ConfidenceBand,
    resolved: &[&ConfidenceLogEntry],
    settings: &CalibrationSettings,
) -> BandStats {
    let members: Vec<&ConfidenceLogEntry> = resolved
        .iter()
        .copied()
        .filter(|e| band.contains(e.confidence_score))
        .collect();
    let count = members.len();
    let breakdown = Breakdown::of(members);

    let accuracy = breakdown.as_ref().map(|b| b.accuracy);
    let target_error = accuracy.map(|a| (a - band.target_accuracy).abs());
    let flagged = count >= settings.minimum_samples
        && target_error.is_some_and(|err| err > settings.calibration_threshold);
    let direction = flagged.then(|| match accuracy {
        Some(a) if a < band.target_accuracy => TuneDirection::Tighten,
        _ => TuneDirection::Loosen,
    });

    BandStats {
        band_key: band.key.clone(),
        target_accuracy: band.target_accuracy,
        count,
        accuracy,
        avg_confidence: breakdown.as_ref().map(|b| b.avg_confidence),
        target_error,
        confidence_error: breakdown.as_ref().map(|b| (b.avg_confidence - b.accuracy).abs()),
        flagged,
        direction,
    }
}

fn recommendations(
    overall: Option<&Breakdown>,
    bands: &[BandStats],
    settings: &CalibrationSettings,
) -> Vec<Recommendation> {
    let mut out = Vec::new();
    let Some(overall) = overall else {
        return out;
    };

    if overall.brier_score > settings.brier_alert {
        out.push(Recommendation {
            priority: Priority::High,
            action: "tighten_confidence_rubric".to_string(),
            description: format!(
                "Brier score {:.3} exceeds {:.2}; require stronger evidence for high-confidence answers",
                overall.brier_score, settings.brier_alert
            ),
        });
    }

    for band in bands {
        if let Some(err) = band.confidence_error {
            if err >= settings.band_error_alert && band.count >= settings.band_error_min_samples {
                out.push(Recommendation {
                    priority: Priority::Medium,
                    action: "calibrate_confidence_band".to_string(),
                    description: format!(
                        "{} band shows calibration error of {:.3} over {} entries",
                        band.band_key, err, band.count
                    ),
                });
            }
        }
    }

    if overall.accuracy < settings.accuracy_floor {
        out.push(Recommendation {
            priority: Priority::High,
            action: "review_prediction_quality".to_string(),
            description: format!(
                "Overall accuracy {:.1}% is below {:.0}%",
                overall.accuracy * 100.0,
                settings.accuracy_floor * 100.0
            ),
        });
    }
    out
}

/// Build the calibration report over `entries` (already windowed).
pub fn build_report(
    entries: &[ConfidenceLogEntry],
    bands: &[ConfidenceBand],
    settings: &CalibrationSettings,
    window_days: i64,
) -> CalibrationReport {
    let resolved: Vec<&ConfidenceLogEntry> = entries.iter().filter(|e| e.is_resolved()).collect();
    let overall = Breakdown::of(resolved.iter().copied());

    let band_rows: Vec<BandStats> = bands
        .iter()
        .map(|band| band_stats(band, &resolved, settings))
        .collect();

    let mut by_model_groups: BTreeMap<&str, Vec<&ConfidenceLogEntry>> = BTreeMap::new();
    for &entry in &resolved {
        by_model_groups
            .entry(entry.model_used.as_str())
            .or_default()
            .push(entry);
    }
    let by_model = by_model_groups
        .into_iter()
        .filter_map(|(model, group)| Some((model.to_string(), Breakdown::of(group)?)))
        .collect();

    let (with, without): (Vec<&ConfidenceLogEntry>, Vec<&ConfidenceLogEntry>) =
        resolved.iter().copied().partition(|e| e.search_used);
    let by_search = [("with_search", with), ("without_search", without)]
        .into_iter()
        .filter_map(|(label, group)| Some((label.to_string(), Breakdown::of(group)?)))
        .collect();

    CalibrationReport {
        generated_at: Utc::now(),
        window_days,
        total_entries: entries.len(),
        resolved_entries: resolved.len(),
        brier_score: overall.as_ref().map(|o| o.brier_score),
        accuracy: overall.as_ref().map(|o| o.accuracy),
        avg_confidence: overall.as_ref().map(|o| o.avg_confidence),
        needs_calibration: overall
            .as_ref()
            .is_some_and(|o| o.brier_score > settings.brier_alert),
        recommendations: recommendations(overall.as_ref(), &band_rows, settings),
        bands: band_rows,
        by_model,
        by_search,
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use chrono::{Duration, Utc};

    use crate::confidence::types::{ConfidenceLogEntry, ContextSnapshot};

    /// Resolved entry `age_days` old with the given score and outcome.
    pub fn resolved(id: &str, score: f64, outcome: bool, age_days: i64) -> ConfidenceLogEntry {
        let created_at = Utc::now() - Duration::days(age_days);
        ConfidenceLogEntry {
            id: ConfidenceLogEntry::compute_id(id, created_at),
            continuation_id: id.to_string(),
            response_text: format!("Main Advice: {id}"),
            confidence_score: score,
            query: "q".to_string(),
            context: ContextSnapshot::capture(&[], created_at),
            model_used: "gpt-4.1".to_string(),
            search_used: false,
            outcome: Some(outcome),
            feedback_notes: None,
            created_at,
            feedback_at: Some(created_at),
        }
    }

    /// `n` entries at `score`, `hits` of them correct.
    pub fn batch(prefix: &str, score: f64, n: usize, hits: usize) -> Vec<ConfidenceLogEntry> {
        (0..n)
            .map(|i| resolved(&format!("{prefix}-{i}"), score, i < hits, 0))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::confidence::tuner::default_bands;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn brier_matches_definition() {
        let pairs = [(0.9, true), (0.8, false), (0.3, false)];
        let expected = ((0.1f64).powi(2) + 0.8f64.powi(2) + 0.3f64.powi(2)) / 3.0;
        assert!(approx(brier_score(pairs).unwrap(), expected));
        assert_eq!(brier_score(Vec::new()), None);
    }

    #[test]
    fn overconfident_band_is_flagged_to_tighten() {
        // 0.95 band, target 0.95, only 5/10 correct
        let entries = batch("vh", 0.95, 10, 5);
        let report = build_report(&entries, &default_bands(), &CalibrationSettings::default(), 7);
        let band = report.bands.iter().find(|b| b.band_key == "0.9-1.0").unwrap();
        assert_eq!(band.count, 10);
        assert!(band.flagged);
        assert_eq!(band.direction, Some(TuneDirection::Tighten));
        assert!(approx(band.accuracy.unwrap(), 0.5));
        assert!(report.needs_calibration);
    }

    #[test]
    fn underconfident_band_is_flagged_to_loosen() {
        // 0.3 band, target 0.35, all correct
        let entries = batch("low", 0.3, 12, 12);
        let report = build_report(&entries, &default_bands(), &CalibrationSettings::default(), 7);
        let band = report.bands.iter().find(|b| b.band_key == "0.0-0.5").unwrap();
        assert!(band.flagged);
        assert_eq!(band.direction, Some(TuneDirection::Loosen));
    }

    #[test]
    fn small_or_accurate_bands_are_not_flagged() {
        let mut entries = batch("few", 0.95, 9, 0);
        entries.extend(batch("ok", 0.8, 10, 8));
        let report = build_report(&entries, &default_bands(), &CalibrationSettings::default(), 7);
        assert_eq!(report.flagged_bands().count(), 0);
    }

    #[test]
    fn pending_entries_are_excluded() {
        let mut entries = batch("r", 0.6, 4, 2);
        let mut pending = resolved("p", 0.6, true, 0);
        pending.outcome = None;
        entries.push(pending);
        let report = build_report(&entries, &default_bands(), &CalibrationSettings::default(), 7);
        assert_eq!(report.total_entries, 5);
        assert_eq!(report.resolved_entries, 4);
    }

    #[test]
    fn empty_window_has_no_scores_or_recommendations() {
        let report = build_report(&[], &default_bands(), &CalibrationSettings::default(), 7);
        assert_eq!(report.brier_score, None);
        assert!(!report.needs_calibration);
        assert!(report.recommendations.is_empty());
        assert!(report.by_model.is_empty());
    }

    #[test]
    fn recommendations_and_breakdowns() {
        let mut entries = batch("vh", 0.95, 6, 1);
        for e in entries.iter_mut().take(3) {
            e.search_used = true;
            e.model_used = "gpt-4o".to_string();
        }
        let report = build_report(&entries, &default_bands(), &CalibrationSettings::default(), 7);
        let actions: Vec<&str> = report.recommendations.iter().map(|r| r.action.as_str()).collect();
        assert_eq!(
            actions,
            [
                "tighten_confidence_rubric",
                "calibrate_confidence_band",
                "review_prediction_quality"
            ]
        );
        assert_eq!(report.by_model.len(), 2);
        assert_eq!(report.by_search["with_search"].entries, 3);
        assert_eq!(report.by_search["without_search"].entries, 3);
    }
}
