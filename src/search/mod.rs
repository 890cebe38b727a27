pub mod rules;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::llm::Message;
use rules::{contains_term, SearchRules};

const BYPASS_REASON: &str = "Search explicitly disabled by user";
const DEFAULT_SKIP_REASON: &str =
    "Query appears historical/theoretical with no time-sensitive elements";

/// Whether the upstream search capability is enabled for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Mandatory,
    Skip,
    Bypass,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchDecision {
    pub mode: SearchMode,
    pub reasoning: String,
    pub classification: String,
}

impl SearchDecision {
    pub fn enables_search(&self) -> bool {
        self.mode == SearchMode::Mandatory
    }
}

/// Decision plus monitoring metadata, logged once per request.
#[derive(Debug, Clone, Serialize)]
pub struct SearchPolicy {
    pub decision: SearchDecision,
    pub recency_days: u32,
    pub query_length: usize,
    pub has_context: bool,
    pub override_detected: bool,
    pub decided_at: DateTime<Utc>,
}

/// Rule-based search gate. Pure: same inputs, same decision.
pub struct SearchDecisionEngine {
    rules: SearchRules,
    /// Case-insensitive alternation of the bypass tokens.
    bypass_pattern: Regex,
}

impl Default for SearchDecisionEngine {
    fn default() -> Self {
        Self::new(SearchRules::default())
    }
}

impl SearchDecisionEngine {
    pub fn new(rules: SearchRules) -> Self {
        let alternation = rules
            .bypass_tokens
            .iter()
            .filter(|t| !t.is_empty())
            .map(|t| regex::escape(t))
            .collect::<Vec<_>>()
            .join("|");
        // escaped literals always compile
        let bypass_pattern = Regex::new(&format!("(?i)(?:{alternation})"))
            .expect("escaped bypass tokens must compile");
        Self {
            rules,
            bypass_pattern,
        }
    }

    pub fn decide(
        &self,
        query: &str,
        _context: &[Message],
        user_override: Option<&str>,
    ) -> SearchDecision {
        let lower = query.to_lowercase();
        let classification = self.classify(query);
        let decision = |mode, reasoning: String| SearchDecision {
            mode,
            reasoning,
            classification: classification.clone(),
        };

        let override_given = user_override.is_some_and(|o| !o.trim().is_empty());
        if override_given || self.bypass_token(&lower).is_some() {
            return decision(SearchMode::Bypass, BYPASS_REASON.to_string());
        }

        if let Some(pattern) = self.historical_match(&lower) {
            return decision(
                SearchMode::Skip,
                format!("Query appears historical/theoretical (matched '{pattern}')"),
            );
        }

        // Both predicates are evaluated; time sensitivity wins the reasoning.
        let time_reasons = self.time_sensitive_reasons(&lower);
        let entity_reasons = self.active_entity_reasons(query, &lower);

        if !time_reasons.is_empty() {
            return decision(
                SearchMode::Mandatory,
                format!("Time-sensitive query detected: {}", time_reasons.join(", ")),
            );
        }
        if let Some(reasons) = entity_reasons {
            return decision(
                SearchMode::Mandatory,
                format!("Recently active entities detected: {reasons}"),
            );
        }

        decision(SearchMode::Skip, DEFAULT_SKIP_REASON.to_string())
    }

    /// Decision with monitoring metadata attached.
    pub fn policy(
        &self,
        query: &str,
        context: &[Message],
        user_override: Option<&str>,
    ) -> SearchPolicy {
        let decision = self.decide(query, context, user_override);
        SearchPolicy {
            override_detected: decision.mode == SearchMode::Bypass,
            decision,
            recency_days: self.rules.recency_days,
            query_length: query.chars().count(),
            has_context: !context.is_empty(),
            decided_at: Utc::now(),
        }
    }

    /// Coarse query tag for logs; checked in table order.
    pub fn classify(&self, query: &str) -> String {
        let lower = query.to_lowercase();
        self.rules
            .classifications
            .iter()
            .find(|(_, keys)| keys.iter().any(|k| contains_term(&lower, k)))
            .map(|(tag, _)| tag.clone())
            .unwrap_or_else(|| self.rules.default_classification.clone())
    }

    /// Remove any bypass tokens so they are not forwarded upstream.
    pub fn strip_bypass_tokens(&self, query: &str) -> String {
        self.bypass_pattern
            .replace_all(query, "")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn bypass_token(&self, lower: &str) -> Option<&str> {
        self.rules
            .bypass_tokens
            .iter()
            .find(|t| lower.contains(t.as_str()))
            .map(String::as_str)
    }

    fn historical_match(&self, lower: &str) -> Option<String> {
        if let Some(phrase) = self
            .rules
            .historical_phrases
            .iter()
            .find(|p| contains_term(lower, p))
        {
            return Some(phrase.clone());
        }
        self.rules
            .historical_patterns
            .iter()
            .find_map(|re| re.find(lower).map(|m| m.as_str().to_string()))
    }

    /// Up to three matched time-sensitive keywords or date phrases.
    fn time_sensitive_reasons(&self, lower: &str) -> Vec<String> {
        let mut found: Vec<String> = self
            .rules
            .time_keywords
            .iter()
            .filter(|k| contains_term(lower, k))
            .cloned()
            .collect();
        found.extend(
            self.rules
                .date_patterns
                .iter()
                .filter_map(|re| re.find(lower).map(|m| m.as_str().to_string())),
        );
        found.truncate(3);
        found
    }

    fn active_entity_reasons(&self, query: &str, lower: &str) -> Option<String> {
        let vocabulary = self
            .rules
            .fantasy_indicators
            .iter()
            .any(|k| contains_term(lower, k));
        let named = self.rules.name_patterns.iter().any(|re| re.is_match(query));
        let position = self
            .rules
            .position_patterns
            .iter()
            .any(|re| re.is_match(lower));

        if !(vocabulary || named || position) {
            return None;
        }

        let labels: Vec<&str> = self
            .rules
            .entity_reasons
            .iter()
            .filter(|(_, keys)| keys.iter().any(|k| contains_term(lower, k)))
            .map(|(label, _)| label.as_str())
            .collect();

        Some(if labels.is_empty() {
            "fantasy sports context".to_string()
        } else {
            labels.join(", ")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> SearchDecisionEngine {
        SearchDecisionEngine::default()
    }

    #[test]
    fn historical_question_skips_search() {
        let d = engine().decide("Who won the MVP in 2019?", &[], None);
        assert_eq!(d.mode, SearchMode::Skip);
        assert!(d.reasoning.contains("historical"), "{}", d.reasoning);
        assert!(d.reasoning.contains("who won"));
    }

    #[test]
    fn tonight_start_question_requires_search() {
        let d = engine().decide("Should I start Josh Allen tonight?", &[], None);
        assert_eq!(d.mode, SearchMode::Mandatory);
        assert!(d.reasoning.contains("tonight"), "{}", d.reasoning);
        assert_eq!(d.classification, "lineup_decision");
        assert!(d.enables_search());
    }

    #[test]
    fn override_bypasses_search() {
        let d = engine().decide(
            "Latest injury report for Josh Allen",
            &[],
            Some("/nosrch"),
        );
        assert_eq!(d.mode, SearchMode::Bypass);
        assert!(d.reasoning.contains("explicitly disabled"));
    }

    #[test]
    fn embedded_bypass_token_bypasses_search() {
        let d = engine().decide("Is Kelce questionable today? /nosearch", &[], None);
        assert_eq!(d.mode, SearchMode::Bypass);
    }

    #[test]
    fn empty_query_is_a_plain_skip() {
        let d = engine().decide("", &[], None);
        assert_eq!(d.mode, SearchMode::Skip);
        assert_eq!(d.classification, "general_advice");
    }

    #[test]
    fn date_patterns_are_time_sensitive() {
        let d = engine().decide("who should i pick for week 12", &[], None);
        assert_eq!(d.mode, SearchMode::Mandatory);
        assert!(d.reasoning.contains("week 12"), "{}", d.reasoning);
    }

    #[test]
    fn time_reason_preferred_when_both_predicates_fire() {
        let d = engine().decide("Should I trade for a WR with an injury?", &[], None);
        assert_eq!(d.mode, SearchMode::Mandatory);
        assert!(d.reasoning.starts_with("Time-sensitive"), "{}", d.reasoning);
    }

    #[test]
    fn active_entities_alone_require_search() {
        let d = engine().decide("what do you think about my matchup", &[], None);
        assert_eq!(d.mode, SearchMode::Mandatory);
        assert!(d.reasoning.contains("performance analysis"), "{}", d.reasoning);

        let d = engine().decide("thoughts on the tight end position", &[], None);
        assert_eq!(d.mode, SearchMode::Mandatory);
        assert!(d.reasoning.contains("fantasy sports context"));
    }

    #[test]
    fn theoretical_question_without_signals_skips() {
        let d = engine().decide("explain how scoring works in general", &[], None);
        assert_eq!(d.mode, SearchMode::Skip);
        assert_eq!(d.reasoning, DEFAULT_SKIP_REASON);
    }

    #[test]
    fn classification_follows_table_order() {
        let e = engine();
        assert_eq!(e.classify("Is he questionable to start?"), "injury_status");
        assert_eq!(e.classify("Any waiver pickup ideas"), "roster_management");
        assert_eq!(e.classify("Rain expected Sunday"), "game_conditions");
        assert_eq!(e.classify("Bills vs Jets outlook"), "matchup_analysis");
        assert_eq!(e.classify("what is his trade value"), "trade_analysis");
        assert_eq!(e.classify("history of the draft"), "historical_rules");
        assert_eq!(e.classify("hello"), "general_advice");
    }

    #[test]
    fn bypass_tokens_are_stripped() {
        let e = engine();
        assert_eq!(
            e.strip_bypass_tokens("Latest news /NOSRCH on Allen"),
            "Latest news on Allen"
        );
    }

    #[test]
    fn bypass_tokens_are_stripped_when_lowercasing_shifts_offsets() {
        let e = engine();
        // KELVIN SIGN lowercases to a one-byte 'k'
        let query = "\u{212A}elce playing? /NOSRCH";
        assert_eq!(e.decide(query, &[], None).mode, SearchMode::Bypass);
        assert_eq!(e.strip_bypass_tokens(query), "\u{212A}elce playing?");
        assert_eq!(
            e.strip_bypass_tokens("--No-Web-Search Kelce /nosearch today"),
            "Kelce today"
        );
    }

    #[test]
    fn policy_reports_override_and_context() {
        let context = vec![Message {
            role: "user".to_string(),
            content: "earlier".to_string(),
        }];
        let p = engine().policy("Start Allen? /nosrch", &context, None);
        assert!(p.override_detected);
        assert!(p.has_context);
        assert_eq!(p.recency_days, 7);
    }
}
