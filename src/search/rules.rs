use regex::Regex;

/// Ordered predicate tables driving [`super::SearchDecisionEngine`].
///
/// Keyword entries are matched case-insensitively on word boundaries.
/// Regex entries in `name_patterns` run against the original-case query,
/// every other pattern against the lowercased query.
#[derive(Debug, Clone)]
pub struct SearchRules {
    pub recency_days: u32,
    pub bypass_tokens: Vec<String>,
    pub historical_phrases: Vec<String>,
    pub historical_patterns: Vec<Regex>,
    pub time_keywords: Vec<String>,
    pub date_patterns: Vec<Regex>,
    pub fantasy_indicators: Vec<String>,
    pub name_patterns: Vec<Regex>,
    pub position_patterns: Vec<Regex>,
    /// Reason labels reported for active-entity matches, first match wins per label.
    pub entity_reasons: Vec<(String, Vec<String>)>,
    /// Classification tags, checked in order.
    pub classifications: Vec<(String, Vec<String>)>,
    pub default_classification: String,
}

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|w| w.to_string()).collect()
}

// Patterns below are literals; a failure here is a programming error.
fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("built-in search pattern must compile"))
        .collect()
}

fn table(rows: &[(&str, &[&str])]) -> Vec<(String, Vec<String>)> {
    rows.iter()
        .map(|(label, keys)| (label.to_string(), words(keys)))
        .collect()
}

impl Default for SearchRules {
    fn default() -> Self {
        Self {
            recency_days: 7,
            bypass_tokens: words(&["/nosrch", "/nosearch", "/skip-search", "--no-web-search"]),
            historical_phrases: words(&[
                "who won",
                "mvp in",
                "biography",
                "history of",
                "career statistics",
                "what are the general rules",
                "how does the playoff system work",
                "rules for",
                "what if scenario",
                "hypothetical",
                "last season",
                "career stats",
                "all time",
                "hall of fame",
            ]),
            historical_patterns: compile(&[
                r"\b(19|20)\d{2}\b",
                r"\blast (year|season)\b",
                r"\bcareer\b",
                r"\ball[- ]time\b",
                r"\bwhat if\b",
            ]),
            time_keywords: words(&[
                // immediate status
                "today", "tonight", "now", "current", "latest", "recent", "breaking",
                "this week", "this weekend", "upcoming", "tomorrow",
                // injury and availability
                "injury", "injured", "hurt", "questionable", "doubtful", "out", "gtd",
                "game time decision", "dnp", "limited", "full practice", "active",
                "inactive", "ruled out", "cleared",
                // performance trends
                "trending", "hot", "cold", "slump", "streak", "surge", "momentum",
                "last game", "last week", "past few", "since",
                // conditions
                "weather", "wind", "rain", "snow", "temperature", "dome", "outdoor",
                // usage
                "starting", "bench", "snap count", "targets", "carries", "usage",
                "role change", "promoted", "demoted", "depth chart",
                // news
                "news", "update", "report", "announced", "confirmed", "suspended",
                "trade", "waiver", "pickup", "drop", "add",
            ]),
            date_patterns: compile(&[
                r"\b\d{4}-\d{2}-\d{2}\b",
                r"\b\d{1,2}/\d{1,2}\b",
                r"\bthis (sunday|monday|tuesday|wednesday|thursday|friday|saturday)\b",
                r"\bnext (week|game|sunday|monday|tuesday|wednesday|thursday|friday|saturday)\b",
                r"\b(week \d+|wk \d+)\b",
            ]),
            fantasy_indicators: words(&[
                "start", "sit", "lineup", "roster", "waiver", "trade", "pickup", "drop",
                "matchup", "projection", "ranking", "advice", "play", "avoid", "dfs",
                "daily fantasy", "prop bet", "anytime td", "over/under", "performing",
                "lately", "trends", "value", "target",
            ]),
            name_patterns: compile(&[
                r"\b[A-Z][a-z]+ [A-Z][a-z]+\b",
                r"\b(start|sit|play|bench) [A-Z]",
                r"\b[A-Z][a-z]+( Jr\.?| Sr\.?| III)? vs\b",
            ]),
            position_patterns: compile(&[
                r"\b(qb|rb|wr|te|k|dst|def)\b",
                r"\b(quarterback|running back|wide receiver|tight end|kicker|defense)\b",
            ]),
            entity_reasons: table(&[
                ("lineup decisions", &["start", "sit", "lineup", "roster"]),
                ("roster management", &["waiver", "trade", "pickup", "drop"]),
                ("performance analysis", &["matchup", "projection", "ranking"]),
                ("performance trends", &["performing", "lately", "trends", "value"]),
            ]),
            classifications: table(&[
                ("injury_status", &["injury", "injured", "hurt", "questionable", "out"]),
                ("lineup_decision", &["start", "sit", "lineup"]),
                ("roster_management", &["waiver", "pickup", "add", "drop"]),
                ("game_conditions", &["weather", "wind", "rain", "conditions"]),
                ("matchup_analysis", &["matchup", "vs", "against"]),
                ("trade_analysis", &["trade", "target", "value"]),
                (
                    "historical_rules",
                    &[
                        "rules for",
                        "how does the",
                        "what are the general rules",
                        "biography of",
                        "history of",
                        "won mvp",
                        "playoff system work",
                    ],
                ),
            ]),
            default_classification: "general_advice".to_string(),
        }
    }
}

/// True when `term` occurs in `haystack` with no alphanumeric character
/// directly before or after it. Both inputs are expected lowercased.
pub fn contains_term(haystack: &str, term: &str) -> bool {
    if term.is_empty() {
        return false;
    }
    let bounded = |c: Option<char>| c.map_or(true, |c| !c.is_alphanumeric());
    let mut from = 0;
    while let Some(pos) = haystack[from..].find(term) {
        let start = from + pos;
        let end = start + term.len();
        let before = haystack[..start].chars().next_back();
        let after = haystack[end..].chars().next();
        if bounded(before) && bounded(after) {
            return true;
        }
        // advance past the first char of this match
        from = start + haystack[start..].chars().next().map_or(1, char::len_utf8);
        if from >= haystack.len() {
            break;
        }
    }
    false
}
