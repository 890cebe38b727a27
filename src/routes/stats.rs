use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{api_error, internal, ApiError};
use crate::confidence::calibration::CalibrationReport;
use crate::confidence::types::ConfidenceLogEntry;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub(super) struct StatsQuery {
    days: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub(super) struct RecentQuery {
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default = "default_include_pending")]
    include_pending: bool,
}

fn default_limit() -> usize {
    50
}

fn default_include_pending() -> bool {
    true
}

pub(super) async fn calibration_stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<CalibrationReport>, ApiError> {
    state
        .confidence
        .calibrator
        .report(query.days)
        .await
        .map(Json)
        .map_err(internal)
}

pub(super) async fn recent_entries(
    State(state): State<AppState>,
    Query(query): Query<RecentQuery>,
) -> Result<Json<Vec<ConfidenceLogEntry>>, ApiError> {
    state
        .confidence
        .logger
        .recent(query.limit.min(500), query.include_pending)
        .await
        .map(Json)
        .map_err(internal)
}

/// One logged entry. Logging runs after `response_complete` is sent, so a
/// client can poll this before submitting feedback.
pub(super) async fn entry(
    State(state): State<AppState>,
    Path(continuation_id): Path<String>,
) -> Result<Json<ConfidenceLogEntry>, ApiError> {
    match state.confidence.logger.get(&continuation_id).await {
        Ok(Some(entry)) => Ok(Json(entry)),
        Ok(None) => Err(api_error(
            StatusCode::NOT_FOUND,
            format!("no confidence log entry for continuation id `{}`", continuation_id),
        )),
        Err(e) => Err(internal(e)),
    }
}

pub(super) async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}
