mod advisor;
mod commands;
mod confidence;
mod error;
mod llm;
mod routes;
mod search;
mod state;
mod tools;
mod validate;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use commands::Cli;
use state::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load env
    let _ = dotenv::dotenv();

    let level = dotenv::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let settings = Settings::from_env()?;
    commands::run(cli, settings).await
}
