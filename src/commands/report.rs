use std::path::PathBuf;

use anyhow::{Context, Result};

use super::services;
use crate::confidence::calibration::CalibrationReport;
use crate::confidence::tuner::{TuneMode, TuneOutcome};
use crate::state::Settings;

fn fmt_opt(v: Option<f64>) -> String {
    v.map(|v| format!("{:.3}", v)).unwrap_or_else(|| "-".to_string())
}

fn print_report(report: &CalibrationReport) {
    println!(
        "Calibration report: last {} days ({} entries, {} with outcome)",
        report.window_days, report.total_entries, report.resolved_entries
    );
    println!(
        "  brier {}  accuracy {}  avg confidence {}{}",
        fmt_opt(report.brier_score),
        fmt_opt(report.accuracy),
        fmt_opt(report.avg_confidence),
        if report.needs_calibration { "  [needs calibration]" } else { "" }
    );
    for band in &report.bands {
        println!(
            "  {:<8} n={:<4} accuracy {} target {:.2}{}",
            band.band_key,
            band.count,
            fmt_opt(band.accuracy),
            band.target_accuracy,
            match band.direction {
                Some(d) => format!("  -> {:?}", d).to_lowercase(),
                None => String::new(),
            }
        );
    }
    for rec in &report.recommendations {
        println!("  [{:?}] {}: {}", rec.priority, rec.action, rec.description);
    }
}

pub async fn report(settings: &Settings, days: i64, output: Option<PathBuf>) -> Result<()> {
    let report = services(settings).await?.calibrator.report(Some(days)).await?;
    print_report(&report);

    if let Some(path) = output {
        let json = serde_json::to_string_pretty(&report).context("serialize report")?;
        std::fs::write(&path, json).with_context(|| format!("Failed to write {:?}", path))?;
        println!("Report written to {:?}", path);
    }
    Ok(())
}

pub async fn calibrate(settings: &Settings, days: i64, apply: bool) -> Result<()> {
    let mode = if apply { TuneMode::Apply } else { TuneMode::DryRun };
    let (report, outcome) = services(settings)
        .await?
        .calibrator
        .run(Some(days), mode)
        .await?;
    print_report(&report);

    match outcome {
        TuneOutcome::NoActionNeeded { reason } => println!("No action needed: {}", reason),
        TuneOutcome::Proposed { changes } | TuneOutcome::Applied { changes } => {
            let verb = if apply { "Applied" } else { "Proposed (dry run)" };
            for change in changes {
                println!(
                    "{} {:?} for {}: {:?} -> {:?}",
                    verb, change.direction, change.band_key, change.previous_phrases, change.new_phrases
                );
            }
        }
    }
    Ok(())
}
