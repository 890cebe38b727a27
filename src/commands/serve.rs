use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use crate::routes::router;
use crate::state::{AppState, Settings};

pub async fn serve(settings: Settings, bind: Option<String>) -> Result<()> {
    let state = AppState::from_settings(&settings).await?;

    if settings.calibration_interval_hours > 0 {
        let interval = Duration::from_secs(settings.calibration_interval_hours * 3600);
        state.confidence.calibrator.clone().spawn_periodic(interval);
        info!(hours = settings.calibration_interval_hours, "Scheduled calibration enabled");
    }

    let addr = bind.unwrap_or_else(|| settings.bind_addr.clone());
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        warn!("Failed to install Ctrl+C handler: {}", e);
        return;
    }
    info!("Ctrl+C received, shutting down");
}
