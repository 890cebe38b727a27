use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::llm::Message;

pub type EntryId = String;

/// Conversation state captured at log time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub message_count: usize,
    /// Last three turns only.
    pub recent_messages: Vec<Message>,
    pub serialized_at: DateTime<Utc>,
}

impl ContextSnapshot {
    pub fn capture(context: &[Message], at: DateTime<Utc>) -> Self {
        let skip = context.len().saturating_sub(3);
        Self {
            message_count: context.len(),
            recent_messages: context[skip..].to_vec(),
            serialized_at: at,
        }
    }
}

/// One finalized answer and, once feedback arrives, whether it held up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceLogEntry {
    pub id: EntryId,
    pub continuation_id: String,
    pub response_text: String,
    pub confidence_score: f64,
    pub query: String,
    pub context: ContextSnapshot,
    pub model_used: String,
    pub search_used: bool,
    pub outcome: Option<bool>,
    pub feedback_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub feedback_at: Option<DateTime<Utc>>,
}

impl ConfidenceLogEntry {
    /// Content-addressed id: same continuation and timestamp, same id.
    pub fn compute_id(continuation_id: &str, created_at: DateTime<Utc>) -> EntryId {
        let mut hasher = blake3::Hasher::new();
        hasher.update(continuation_id.as_bytes());
        hasher.update(created_at.to_rfc3339().as_bytes());
        hasher.finalize().to_hex().to_string()
    }

    pub fn is_resolved(&self) -> bool {
        self.outcome.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeUpdate {
    Recorded,
    /// The entry already had an outcome; nothing was changed.
    AlreadyRecorded,
}

/// A confidence range with its target accuracy and phrasing guidance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceBand {
    pub key: String,
    pub min: f64,
    pub max: f64,
    pub target_accuracy: f64,
    pub phrases: Vec<String>,
    pub last_calibrated: Option<DateTime<Utc>>,
}

impl ConfidenceBand {
    pub fn new(min: f64, max: f64, target_accuracy: f64, phrases: &[&str]) -> Self {
        Self {
            key: format!("{:.1}-{:.1}", min, max),
            min,
            max,
            target_accuracy,
            phrases: phrases.iter().map(|p| p.to_string()).collect(),
            last_calibrated: None,
        }
    }

    /// Half-open `[min, max)`, except a band ending at 1.0 includes 1.0.
    pub fn contains(&self, score: f64) -> bool {
        score >= self.min && (score < self.max || (self.max >= 1.0 && score <= self.max))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TuneDirection {
    /// Over-confident: move to more tentative phrasing.
    Tighten,
    /// Under-confident: move to more assertive phrasing.
    Loosen,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeReason {
    AutoTune {
        direction: TuneDirection,
        accuracy: f64,
        target: f64,
        sample_count: usize,
    },
    Manual {
        note: Option<String>,
    },
    Rollback,
}

/// Immutable record of one phrase-list change, kept for rollback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhraseHistoryRecord {
    pub band_key: String,
    pub previous_phrases: Vec<String>,
    pub new_phrases: Vec<String>,
    pub reason: ChangeReason,
    pub recorded_at: DateTime<Utc>,
}
