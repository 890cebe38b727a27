mod advice;
mod feedback;
mod stats;

use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tracing::error;

use crate::state::AppState;

type ApiError = (StatusCode, Json<Value>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

fn internal(err: anyhow::Error) -> ApiError {
    error!("request failed: {:#}", err);
    api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/advice/stream", post(advice::stream_advice))
        .route("/feedback", post(feedback::submit_feedback))
        .route("/confidence/stats", get(stats::calibration_stats))
        .route("/confidence/recent", get(stats::recent_entries))
        .route("/confidence/entries/:continuation_id", get(stats::entry))
        .route("/health", get(stats::health))
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use super::router;
    use crate::advisor::testing::ScriptedProvider;
    use crate::advisor::AdviceEngine;
    use crate::confidence::calibration::CalibrationSettings;
    use crate::confidence::store::MemoryStore;
    use crate::search::SearchDecisionEngine;
    use crate::state::{AdvisorConfig, AppState, ConfidenceServices};
    use crate::tools::ToolRegistry;
    use crate::validate::SchemaValidator;

    pub fn state(provider: ScriptedProvider) -> AppState {
        let confidence =
            ConfidenceServices::new(Arc::new(MemoryStore::new()), CalibrationSettings::default());
        let engine = AdviceEngine::new(
            Arc::new(provider),
            Arc::new(ToolRegistry::new()),
            Arc::new(SearchDecisionEngine::default()),
            Arc::new(SchemaValidator::default()),
            confidence.logger.clone(),
            confidence.tuner.clone(),
            AdvisorConfig::default(),
        );
        AppState { engine, confidence }
    }

    /// Serve the router on an ephemeral port; returns its base URL.
    pub async fn serve(state: AppState) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });
        format!("http://{}", addr)
    }
}
