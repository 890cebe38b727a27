use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cnidarium::{StateDelta, StateRead, StateWrite, Storage};
use futures::StreamExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use super::types::{ConfidenceBand, ConfidenceLogEntry, OutcomeUpdate, PhraseHistoryRecord};

/// Persistence for log entries, the phrase table and its history.
#[async_trait]
pub trait ConfidenceStore: Send + Sync {
    /// Returns `false`, leaving the stored entry untouched, when the
    /// continuation id is already logged.
    async fn insert_entry(&self, entry: &ConfidenceLogEntry) -> Result<bool>;

    async fn get_entry(&self, continuation_id: &str) -> Result<Option<ConfidenceLogEntry>>;

    /// `Ok(None)` when no entry has that continuation id.
    async fn update_outcome(
        &self,
        continuation_id: &str,
        outcome: bool,
        notes: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<Option<OutcomeUpdate>>;

    /// Entries created at or after `since` (all entries when `None`), unordered.
    async fn entries(&self, since: Option<DateTime<Utc>>) -> Result<Vec<ConfidenceLogEntry>>;

    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    async fn load_bands(&self) -> Result<Option<Vec<ConfidenceBand>>>;

    async fn save_bands(&self, bands: &[ConfidenceBand]) -> Result<()>;

    async fn append_history(&self, record: &PhraseHistoryRecord) -> Result<()>;

    /// Oldest first.
    async fn history(&self, band_key: Option<&str>) -> Result<Vec<PhraseHistoryRecord>>;
}

fn apply_outcome(
    entry: &mut ConfidenceLogEntry,
    outcome: bool,
    notes: Option<String>,
    at: DateTime<Utc>,
) -> OutcomeUpdate {
    if entry.outcome.is_some() {
        return OutcomeUpdate::AlreadyRecorded;
    }
    entry.outcome = Some(outcome);
    entry.feedback_notes = notes;
    entry.feedback_at = Some(at);
    OutcomeUpdate::Recorded
}

#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, ConfidenceLogEntry>>,
    bands: RwLock<Option<Vec<ConfidenceBand>>>,
    history: RwLock<Vec<PhraseHistoryRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfidenceStore for MemoryStore {
    async fn insert_entry(&self, entry: &ConfidenceLogEntry) -> Result<bool> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(&entry.continuation_id) {
            return Ok(false);
        }
        entries.insert(entry.continuation_id.clone(), entry.clone());
        Ok(true)
    }

    async fn get_entry(&self, continuation_id: &str) -> Result<Option<ConfidenceLogEntry>> {
        Ok(self.entries.read().await.get(continuation_id).cloned())
    }

    async fn update_outcome(
        &self,
        continuation_id: &str,
        outcome: bool,
        notes: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<Option<OutcomeUpdate>> {
        let mut entries = self.entries.write().await;
        Ok(entries
            .get_mut(continuation_id)
            .map(|entry| apply_outcome(entry, outcome, notes, at)))
    }

    async fn entries(&self, since: Option<DateTime<Utc>>) -> Result<Vec<ConfidenceLogEntry>> {
        Ok(self
            .entries
            .read()
            .await
            .values()
            .filter(|e| since.map_or(true, |s| e.created_at >= s))
            .cloned()
            .collect())
    }

    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.created_at >= cutoff);
        Ok(before - entries.len())
    }

    async fn load_bands(&self) -> Result<Option<Vec<ConfidenceBand>>> {
        Ok(self.bands.read().await.clone())
    }

    async fn save_bands(&self, bands: &[ConfidenceBand]) -> Result<()> {
        *self.bands.write().await = Some(bands.to_vec());
        Ok(())
    }

    async fn append_history(&self, record: &PhraseHistoryRecord) -> Result<()> {
        self.history.write().await.push(record.clone());
        Ok(())
    }

    async fn history(&self, band_key: Option<&str>) -> Result<Vec<PhraseHistoryRecord>> {
        Ok(self
            .history
            .read()
            .await
            .iter()
            .filter(|r| band_key.map_or(true, |k| r.band_key == k))
            .cloned()
            .collect())
    }
}

// Key prefixes (no trailing slashes, cnidarium convention)
const ENTRY_PREFIX: &str = "confidence/entry";
const BANDS_PREFIX: &str = "confidence/bands";
const HISTORY_PREFIX: &str = "confidence/history";

fn entry_key(continuation_id: &str) -> String {
    format!("{}/{}", ENTRY_PREFIX, continuation_id)
}
fn bands_key() -> String {
    format!("{}/table", BANDS_PREFIX)
}
fn history_key(record: &PhraseHistoryRecord) -> String {
    // zero-padded so lexical order is chronological
    format!(
        "{}/{:020}-{}",
        HISTORY_PREFIX,
        record.recorded_at.timestamp_nanos_opt().unwrap_or_default(),
        uuid::Uuid::new_v4()
    )
}

/// On-disk store backed by cnidarium.
pub struct CnidariumStore {
    storage: Storage,
    /// Serializes read-modify-write commits.
    write_lock: Mutex<()>,
}

impl CnidariumStore {
    pub async fn new(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data dir {:?}", data_dir))?;
        let prefixes = vec![
            ENTRY_PREFIX.to_string(),
            BANDS_PREFIX.to_string(),
            HISTORY_PREFIX.to_string(),
        ];
        let storage = Storage::load(data_dir.to_path_buf(), prefixes)
            .await
            .context("Failed to init cnidarium storage")?;
        Ok(Self {
            storage,
            write_lock: Mutex::new(()),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let snapshot = self.storage.latest_snapshot();
        match snapshot.get_raw(key).await? {
            Some(bytes) => Ok(Some(
                serde_json::from_slice(&bytes).with_context(|| format!("decode {}", key))?,
            )),
            None => Ok(None),
        }
    }

    async fn put_json<T: serde::Serialize>(&self, key: String, value: &T) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut delta = StateDelta::new(self.storage.latest_snapshot());
        delta.put_raw(key, serde_json::to_vec(value).context("serialize record")?);
        self.storage.commit(delta).await?;
        Ok(())
    }

    async fn scan<T: serde::de::DeserializeOwned>(&self, prefix: &str) -> Result<Vec<(String, T)>> {
        let snapshot = self.storage.latest_snapshot();
        let mut stream = snapshot.prefix_raw(prefix);
        let mut results = Vec::new();

        while let Some(entry) = stream.next().await {
            match entry {
                Ok((key, value)) => match serde_json::from_slice::<T>(&value) {
                    Ok(record) => results.push((key, record)),
                    Err(e) => warn!(key = %key, "Skipping undecodable record: {}", e),
                },
                Err(e) => warn!("Error reading {} stream: {}", prefix, e),
            }
        }
        Ok(results)
    }
}

#[async_trait]
impl ConfidenceStore for CnidariumStore {
    async fn insert_entry(&self, entry: &ConfidenceLogEntry) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let key = entry_key(&entry.continuation_id);
        if self.storage.latest_snapshot().get_raw(&key).await?.is_some() {
            return Ok(false);
        }

        let mut delta = StateDelta::new(self.storage.latest_snapshot());
        delta.put_raw(key, serde_json::to_vec(entry).context("serialize entry")?);
        self.storage.commit(delta).await?;
        debug!(entry_id = %entry.id, continuation_id = %entry.continuation_id, "confidence entry stored");
        Ok(true)
    }

    async fn get_entry(&self, continuation_id: &str) -> Result<Option<ConfidenceLogEntry>> {
        self.get_json(&entry_key(continuation_id)).await
    }

    async fn update_outcome(
        &self,
        continuation_id: &str,
        outcome: bool,
        notes: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<Option<OutcomeUpdate>> {
        let _guard = self.write_lock.lock().await;
        let key = entry_key(continuation_id);
        let Some(mut entry) = self.get_json::<ConfidenceLogEntry>(&key).await? else {
            return Ok(None);
        };

        let update = apply_outcome(&mut entry, outcome, notes, at);
        if update == OutcomeUpdate::Recorded {
            let mut delta = StateDelta::new(self.storage.latest_snapshot());
            delta.put_raw(key, serde_json::to_vec(&entry).context("serialize entry")?);
            self.storage.commit(delta).await?;
            debug!(continuation_id, outcome, "outcome recorded");
        }
        Ok(Some(update))
    }

    async fn entries(&self, since: Option<DateTime<Utc>>) -> Result<Vec<ConfidenceLogEntry>> {
        Ok(self
            .scan::<ConfidenceLogEntry>(ENTRY_PREFIX)
            .await?
            .into_iter()
            .map(|(_, e)| e)
            .filter(|e| since.map_or(true, |s| e.created_at >= s))
            .collect())
    }

    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let stale: Vec<String> = self
            .scan::<ConfidenceLogEntry>(ENTRY_PREFIX)
            .await?
            .into_iter()
            .filter(|(_, e)| e.created_at < cutoff)
            .map(|(key, _)| key)
            .collect();
        if stale.is_empty() {
            return Ok(0);
        }

        let mut delta = StateDelta::new(self.storage.latest_snapshot());
        for key in &stale {
            delta.delete(key.clone());
        }
        self.storage.commit(delta).await?;
        Ok(stale.len())
    }

    async fn load_bands(&self) -> Result<Option<Vec<ConfidenceBand>>> {
        self.get_json(&bands_key()).await
    }

    async fn save_bands(&self, bands: &[ConfidenceBand]) -> Result<()> {
        self.put_json(bands_key(), &bands).await
    }

    async fn append_history(&self, record: &PhraseHistoryRecord) -> Result<()> {
        self.put_json(history_key(record), record).await
    }

    async fn history(&self, band_key: Option<&str>) -> Result<Vec<PhraseHistoryRecord>> {
        let mut records: Vec<(String, PhraseHistoryRecord)> = self
            .scan::<PhraseHistoryRecord>(HISTORY_PREFIX)
            .await?
            .into_iter()
            .filter(|(_, r)| band_key.map_or(true, |k| r.band_key == k))
            .collect();
        records.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(records.into_iter().map(|(_, r)| r).collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use tempfile::TempDir;

    use super::*;
    use crate::confidence::types::{ChangeReason, ContextSnapshot};

    fn entry(continuation_id: &str, created_at: DateTime<Utc>) -> ConfidenceLogEntry {
        ConfidenceLogEntry {
            id: ConfidenceLogEntry::compute_id(continuation_id, created_at),
            continuation_id: continuation_id.to_string(),
            response_text: "Main Advice: Start Allen".to_string(),
            confidence_score: 0.8,
            query: "Start Allen?".to_string(),
            context: ContextSnapshot::capture(&[], created_at),
            model_used: "gpt-4.1".to_string(),
            search_used: true,
            outcome: None,
            feedback_notes: None,
            created_at,
            feedback_at: None,
        }
    }

    async fn exercise(store: &dyn ConfidenceStore) {
        let now = Utc::now();
        assert!(store.insert_entry(&entry("fresh", now)).await.unwrap());
        assert!(store
            .insert_entry(&entry("stale", now - Duration::days(120)))
            .await
            .unwrap());

        assert_eq!(
            store
                .update_outcome("fresh", true, Some("nailed it".into()), now)
                .await
                .unwrap(),
            Some(OutcomeUpdate::Recorded)
        );
        assert_eq!(
            store.update_outcome("fresh", false, None, now).await.unwrap(),
            Some(OutcomeUpdate::AlreadyRecorded)
        );
        assert_eq!(store.update_outcome("missing", true, None, now).await.unwrap(), None);

        // a second insert for a logged id keeps the recorded outcome
        let mut relog = entry("fresh", now + Duration::seconds(1));
        relog.response_text = "Main Advice: Sit Allen".to_string();
        assert!(!store.insert_entry(&relog).await.unwrap());
        assert_eq!(
            store.update_outcome("fresh", false, None, now).await.unwrap(),
            Some(OutcomeUpdate::AlreadyRecorded)
        );

        let fresh = store.get_entry("fresh").await.unwrap().unwrap();
        assert_eq!(fresh.outcome, Some(true));
        assert_eq!(fresh.feedback_notes.as_deref(), Some("nailed it"));
        assert_eq!(fresh.response_text, "Main Advice: Start Allen");

        assert_eq!(store.entries(None).await.unwrap().len(), 2);
        assert_eq!(
            store
                .entries(Some(now - Duration::days(7)))
                .await
                .unwrap()
                .len(),
            1
        );

        assert_eq!(store.delete_before(now - Duration::days(90)).await.unwrap(), 1);
        assert!(store.get_entry("stale").await.unwrap().is_none());

        assert!(store.load_bands().await.unwrap().is_none());
        let bands = vec![ConfidenceBand::new(0.0, 0.5, 0.35, &["I think"])];
        store.save_bands(&bands).await.unwrap();
        assert_eq!(store.load_bands().await.unwrap(), Some(bands));

        for (i, key) in ["0.0-0.5", "0.9-1.0", "0.0-0.5"].iter().enumerate() {
            store
                .append_history(&PhraseHistoryRecord {
                    band_key: key.to_string(),
                    previous_phrases: vec![format!("v{i}")],
                    new_phrases: vec![format!("v{}", i + 1)],
                    reason: ChangeReason::Manual { note: None },
                    recorded_at: now + Duration::milliseconds(i as i64),
                })
                .await
                .unwrap();
        }
        let low = store.history(Some("0.0-0.5")).await.unwrap();
        assert_eq!(low.len(), 2);
        assert_eq!(low[0].previous_phrases, vec!["v0".to_string()]);
        assert_eq!(low[1].previous_phrases, vec!["v2".to_string()]);
        assert_eq!(store.history(None).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn memory_store_contract() {
        exercise(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn cnidarium_store_contract() {
        let dir = TempDir::new().unwrap();
        let store = CnidariumStore::new(dir.path()).await.unwrap();
        exercise(&store).await;
    }
}
