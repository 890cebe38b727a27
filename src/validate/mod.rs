mod advice;

pub use advice::StructuredAdvice;

use serde_json::{Map, Value};
use tracing::{debug, warn};

const MAIN_ADVICE_ALIASES: &[&str] = &["main_advice", "message", "advice", "recommendation"];
const CONFIDENCE_ALIASES: &[&str] = &["confidence_score", "confidence", "score"];
const REASONING_ALIASES: &[&str] = &["reasoning", "rationale", "explanation"];
const ALTERNATIVES_ALIASES: &[&str] = &["alternatives", "options"];
const MODEL_ALIASES: &[&str] = &["model_identifier", "model"];

/// Result of checking a not-yet-terminated buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartialCheck {
    Empty,
    /// Not parseable or not yet valid. Expected mid-stream; never an error.
    Inconclusive,
    Valid,
}

/// Turns accumulated model output into a [`StructuredAdvice`] that always
/// satisfies the contract.
#[derive(Debug, Clone)]
pub struct SchemaValidator {
    pub fallback_confidence: f64,
    pub min_synthesized_len: usize,
    pub apology: String,
    pub fallback_model: String,
}

impl Default for SchemaValidator {
    fn default() -> Self {
        Self {
            fallback_confidence: 0.1,
            min_synthesized_len: 10,
            apology: "Sorry, I encountered an error generating a response.".to_string(),
            fallback_model: "validation_fallback".to_string(),
        }
    }
}

impl SchemaValidator {
    /// Terminal validation. Total: malformed input yields a repaired record.
    pub fn finalize(&self, accumulated: &str) -> StructuredAdvice {
        let normalized = parse_object(accumulated).and_then(|map| self.normalize(map));
        match normalized {
            Ok(advice) => match advice.violation() {
                None => advice,
                Some(reason) => self.repair(accumulated, &reason),
            },
            Err(reason) => self.repair(accumulated, &reason),
        }
    }

    /// Mid-stream check of the buffer so far.
    pub fn check_partial(&self, accumulated: &str) -> PartialCheck {
        if accumulated.trim().is_empty() {
            return PartialCheck::Empty;
        }
        match parse_object(accumulated).and_then(|map| self.normalize(map)) {
            Ok(advice) if advice.is_valid() => PartialCheck::Valid,
            _ => PartialCheck::Inconclusive,
        }
    }

    fn normalize(&self, mut map: Map<String, Value>) -> Result<StructuredAdvice, String> {
        let mut main_advice = take_string(&mut map, MAIN_ADVICE_ALIASES);
        let confidence_score = take_confidence(&mut map)?;
        let reasoning = take_string(&mut map, REASONING_ALIASES);
        let alternatives = take_alternatives(&mut map);
        let model_identifier = take_string(&mut map, MODEL_ALIASES);

        if main_advice.is_none() {
            main_advice = map
                .values()
                .filter_map(Value::as_str)
                .map(str::trim)
                .find(|s| s.chars().count() >= self.min_synthesized_len)
                .map(str::to_string);
            if let Some(found) = &main_advice {
                debug!(len = found.len(), "main_advice synthesized from another field");
            }
        }

        Ok(StructuredAdvice {
            main_advice: main_advice.unwrap_or_else(|| self.apology.clone()),
            reasoning,
            confidence_score,
            alternatives,
            model_identifier,
        })
    }

    fn repair(&self, raw: &str, reason: &str) -> StructuredAdvice {
        warn!(reason, raw_len = raw.len(), "response failed validation, repairing");
        let text = raw.trim();
        StructuredAdvice {
            main_advice: if text.is_empty() {
                self.apology.clone()
            } else {
                text.to_string()
            },
            reasoning: Some(format!("Response validation failed: {}", reason)),
            confidence_score: Some(self.fallback_confidence),
            alternatives: None,
            model_identifier: Some(self.fallback_model.clone()),
        }
    }
}

/// Strip a surrounding markdown code fence, if any.
fn strip_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.find('\n').map(|i| &rest[i + 1..]).unwrap_or("");
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn parse_object(text: &str) -> Result<Map<String, Value>, String> {
    match serde_json::from_str::<Value>(strip_fence(text)) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!(
            "expected a JSON object, got {}",
            match other {
                Value::Array(_) => "an array",
                Value::String(_) => "a string",
                Value::Number(_) => "a number",
                Value::Bool(_) => "a boolean",
                _ => "null",
            }
        )),
        Err(e) => Err(format!("invalid JSON format: {}", e)),
    }
}

/// Remove every alias key; return the first non-empty string among them.
fn take_string(map: &mut Map<String, Value>, aliases: &[&str]) -> Option<String> {
    let mut found = None;
    for key in aliases {
        if let Some(Value::String(s)) = map.shift_remove(*key) {
            if found.is_none() && !s.trim().is_empty() {
                found = Some(s);
            }
        }
    }
    found
}

fn take_confidence(map: &mut Map<String, Value>) -> Result<Option<f64>, String> {
    let mut raw = None;
    for key in CONFIDENCE_ALIASES {
        if let Some(v) = map.shift_remove(*key) {
            if raw.is_none() && !v.is_null() {
                raw = Some(v);
            }
        }
    }
    let Some(raw) = raw else {
        return Ok(None);
    };

    let value = match &raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| format!("'confidence_score' must be a number, got {}", raw))?;

    // Values above 1 are read as a 0-100 scale.
    Ok(Some(if value > 1.0 { value / 100.0 } else { value }))
}

fn take_alternatives(map: &mut Map<String, Value>) -> Option<Vec<String>> {
    let mut found = None;
    for key in ALTERNATIVES_ALIASES {
        if let Some(Value::Array(items)) = map.shift_remove(*key) {
            if found.is_none() {
                found = Some(
                    items
                        .into_iter()
                        .filter_map(|v| match v {
                            Value::String(s) => Some(s),
                            _ => None,
                        })
                        .collect(),
                );
            }
        }
    }
    found
}
