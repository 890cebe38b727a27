use std::io::Write;

use anyhow::{bail, Result};

use crate::advisor::events::DownstreamEvent;
use crate::advisor::AdviceQuery;
use crate::state::{AppState, Settings};

/// Ask one question and print the validated advice once the stream completes.
/// Progress events go to stderr; raw text deltas are not echoed.
pub async fn ask(settings: &Settings, question: &str, model: Option<String>) -> Result<()> {
    if question.trim().is_empty() {
        bail!("question must not be empty");
    }
    let state = AppState::from_settings(settings).await?;

    let mut query = AdviceQuery::question(question);
    query.model = model;
    let mut events = state.engine.advise(query);

    let mut stdout = std::io::stdout();
    while let Some(event) = events.recv().await {
        let terminal = event.is_terminal();
        match event {
            DownstreamEvent::TextDelta { .. } => {}
            DownstreamEvent::StatusUpdate { status, .. } => eprintln!("[{}]", status),
            DownstreamEvent::ToolResult { tool, .. } => eprintln!("[tool {} ok]", tool),
            DownstreamEvent::ToolError { tool, error } => eprintln!("[tool {} failed: {}]", tool, error),
            DownstreamEvent::ResponseComplete {
                advice,
                continuation_id,
                ..
            } => {
                writeln!(stdout, "\n{}", advice.main_advice)?;
                if let Some(reasoning) = &advice.reasoning {
                    writeln!(stdout, "\n{}", reasoning)?;
                }
                if let Some(alts) = advice.alternatives.as_ref().filter(|a| !a.is_empty()) {
                    writeln!(stdout, "\nAlternatives:")?;
                    for alt in alts {
                        writeln!(stdout, "  - {}", alt)?;
                    }
                }
                if let Some(score) = advice.confidence_score {
                    let phrase = state.confidence.tuner.phrase_for(score).await?;
                    writeln!(
                        stdout,
                        "\nConfidence: {:.2}{}",
                        score,
                        phrase.map(|p| format!(" ({})", p)).unwrap_or_default()
                    )?;
                }
                writeln!(stdout, "Continuation id: {}", continuation_id)?;
            }
            DownstreamEvent::Error { kind, message } => bail!("{}: {}", kind, message),
        }
        if terminal {
            break;
        }
    }
    Ok(())
}
