use chrono::NaiveDate;

use crate::confidence::types::ConfidenceBand;
use crate::llm::Message;
use crate::search::{SearchDecision, SearchMode};
use crate::validate::StructuredAdvice;

pub const SYSTEM_PROMPT: &str = r#"You are a fantasy sports and baseball advisor. Every answer is a concrete, actionable recommendation backed by evidence.

═══════════════════════════════════════════════════════
 HOW TO WORK
═══════════════════════════════════════════════════════

1. Identify the decision the user actually faces (start/sit, trade, waiver pickup, lineup).
2. Gather facts before deciding:
   - Use the statistics tools for player, team, and league numbers.
   - Use web search, when it is available, for injuries, news, weather, and anything from the last few days.
3. Weigh the evidence. Note what is known, what is inferred, and what is unknown.
4. Commit to one recommendation. Offer alternatives only when they are genuinely close.

═══════════════════════════════════════════════════════
 OUTPUT RULES
═══════════════════════════════════════════════════════

1. Reply with a single JSON object and nothing else. No markdown fences, no prose around it.
2. `main_advice` is required: one or two sentences stating the recommendation.
3. `reasoning` explains the key evidence in a short paragraph.
4. `confidence_score` is a number between 0.0 and 1.0 for how likely the advice is to turn out right.
5. `alternatives` lists other reasonable options, most reasonable first.
6. Never invent statistics. If a tool failed or data is missing, say so in `reasoning` and lower the confidence.
"#;

/// Prefix the latest user turn with today's date. Other turns are untouched.
pub fn anchor_date(conversation: &mut [Message], today: NaiveDate) {
    if let Some(latest) = conversation.iter_mut().rev().find(|m| m.role == "user") {
        latest.content = format!(
            "Current Date: {}\n\n{}",
            today.format("%Y-%m-%d"),
            latest.content
        );
    }
}

fn phrasing_section(bands: &[ConfidenceBand]) -> String {
    let mut out = String::from(
        "═══════════════════════════════════════════════════════\n CONFIDENCE LANGUAGE\n═══════════════════════════════════════════════════════\n\nMatch the wording of `main_advice` to `confidence_score`:\n",
    );
    for band in bands {
        out.push_str(&format!(
            "  {:.2}-{:.2}: {}\n",
            band.min,
            band.max,
            band.phrases
                .iter()
                .map(|p| format!("\"{}\"", p))
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }
    out
}

fn search_note(decision: &SearchDecision) -> &'static str {
    match decision.mode {
        SearchMode::Mandatory => {
            "Web search is enabled for this question. Check current news before answering."
        }
        SearchMode::Skip => {
            "Web search is disabled for this question. Answer from the statistics tools and your knowledge."
        }
        SearchMode::Bypass => {
            "The user turned web search off. Do not suggest searching; answer from what you have."
        }
    }
}

/// Full instruction text for one request.
pub fn build_instructions(bands: &[ConfidenceBand], decision: &SearchDecision) -> String {
    format!(
        "{}\n{}\nResponse JSON schema:\n{}\n\n{}",
        SYSTEM_PROMPT,
        phrasing_section(bands),
        StructuredAdvice::json_schema(),
        search_note(decision),
    )
}
