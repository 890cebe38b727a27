use anyhow::Result;

use super::services;
use crate::state::Settings;

pub async fn rollback(settings: &Settings, band: &str) -> Result<()> {
    let restored = services(settings).await?.tuner.rollback(band).await?;
    println!("Band {} restored to {:?}", band, restored);
    Ok(())
}

pub async fn set_phrases(
    settings: &Settings,
    band: &str,
    phrases: Vec<String>,
    note: Option<String>,
) -> Result<()> {
    services(settings)
        .await?
        .tuner
        .manual_update(band, phrases, note)
        .await?;
    println!("Band {} updated", band);
    Ok(())
}

pub async fn cleanup(settings: &Settings, keep_days: i64) -> Result<()> {
    let removed = services(settings).await?.logger.cleanup(keep_days).await?;
    println!("Removed {} entries older than {} days", removed, keep_days);
    Ok(())
}

/// Print current bands, then the change history (for one band if given).
pub async fn phrases(settings: &Settings, band: Option<&str>) -> Result<()> {
    let services = services(settings).await?;
    for b in services.tuner.bands().await? {
        if band.map_or(true, |k| k == b.key) {
            println!("{:<8} target {:.2}  {:?}", b.key, b.target_accuracy, b.phrases);
        }
    }

    let history = services.tuner.history(band).await?;
    if history.is_empty() {
        return Ok(());
    }
    println!("\nHistory:");
    for record in history {
        println!(
            "  {} {:<8} {:?} -> {:?}  ({:?})",
            record.recorded_at.format("%Y-%m-%d %H:%M"),
            record.band_key,
            record.previous_phrases,
            record.new_phrases,
            record.reason
        );
    }
    Ok(())
}
