mod ask;
mod manage;
mod report;
mod serve;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::state::{ConfidenceServices, Settings};

#[derive(Parser)]
#[command(name = "advice-engine")]
#[command(version, about = "Streaming advice service with confidence calibration")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP server (default)
    Serve {
        /// Address to bind, overrides BIND_ADDR
        #[arg(long)]
        bind: Option<String>,
    },

    /// Ask a single question and print the advice
    Ask {
        question: String,
        /// Upstream model, overrides LLM_MODEL
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Print the calibration report for a trailing window
    Report {
        /// Window in days
        #[arg(short, long, default_value = "7")]
        days: i64,
        /// Also write the JSON report to this file
        #[arg(short, long)]
        output: Option<std::path::PathBuf>,
    },

    /// Run calibration and retune phrases for flagged bands
    Calibrate {
        #[arg(short, long, default_value = "7")]
        days: i64,
        /// Persist changes; without this the run is a dry run
        #[arg(long)]
        apply: bool,
    },

    /// Restore a band's phrases from before its last change
    Rollback {
        /// Band key, e.g. 0.9-1.0
        band: String,
    },

    /// Replace a band's phrases by hand
    SetPhrases {
        band: String,
        #[arg(required = true)]
        phrases: Vec<String>,
        #[arg(long)]
        note: Option<String>,
    },

    /// Show confidence bands and their phrase history
    Phrases {
        /// Limit to one band
        band: Option<String>,
    },

    /// Delete confidence entries older than the retention period
    Cleanup {
        #[arg(long, default_value = "90")]
        keep_days: i64,
    },
}

/// Confidence services over the configured store, for commands that do not
/// need an upstream client.
async fn services(settings: &Settings) -> Result<ConfidenceServices> {
    let store = settings.open_store().await?;
    Ok(ConfidenceServices::new(store, settings.calibration.clone()))
}

pub async fn run(cli: Cli, settings: Settings) -> Result<()> {
    match cli.command.unwrap_or(Commands::Serve { bind: None }) {
        Commands::Serve { bind } => serve::serve(settings, bind).await,
        Commands::Ask { question, model } => ask::ask(&settings, &question, model).await,
        Commands::Report { days, output } => report::report(&settings, days, output).await,
        Commands::Calibrate { days, apply } => report::calibrate(&settings, days, apply).await,
        Commands::Rollback { band } => manage::rollback(&settings, &band).await,
        Commands::SetPhrases {
            band,
            phrases,
            note,
        } => manage::set_phrases(&settings, &band, phrases, note).await,
        Commands::Phrases { band } => manage::phrases(&settings, band.as_deref()).await,
        Commands::Cleanup { keep_days } => manage::cleanup(&settings, keep_days).await,
    }
}
