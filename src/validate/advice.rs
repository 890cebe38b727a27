use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// The response contract every finalized answer satisfies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredAdvice {
    pub main_advice: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternatives: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_identifier: Option<String>,
}

impl StructuredAdvice {
    /// First contract violation, if any.
    pub fn violation(&self) -> Option<String> {
        if self.main_advice.trim().is_empty() {
            return Some("'main_advice' is required and must be non-empty".to_string());
        }
        if let Some(score) = self.confidence_score {
            if !score.is_finite() || !(0.0..=1.0).contains(&score) {
                return Some(format!(
                    "'confidence_score' {} is outside [0.0, 1.0]",
                    score
                ));
            }
        }
        None
    }

    pub fn is_valid(&self) -> bool {
        self.violation().is_none()
    }

    /// Single-line rendering used for the confidence log.
    pub fn summary_text(&self) -> String {
        let mut parts = Vec::new();
        if !self.main_advice.is_empty() {
            parts.push(format!("Main Advice: {}", self.main_advice));
        }
        if let Some(reasoning) = self.reasoning.as_deref().filter(|r| !r.is_empty()) {
            parts.push(format!("Reasoning: {}", reasoning));
        }
        if let Some(alts) = self.alternatives.as_ref().filter(|a| !a.is_empty()) {
            parts.push(format!("Alternatives: {}", alts.join("; ")));
        }
        if parts.is_empty() {
            "No advice provided".to_string()
        } else {
            parts.join(" | ")
        }
    }

    /// JSON schema sent upstream as the response-format instruction.
    pub fn json_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "main_advice": { "type": "string", "minLength": 1 },
                "reasoning": { "type": "string" },
                "confidence_score": { "type": "number", "minimum": 0.0, "maximum": 1.0 },
                "alternatives": { "type": "array", "items": { "type": "string" } },
                "model_identifier": { "type": "string" }
            },
            "required": ["main_advice"]
        })
    }
}
