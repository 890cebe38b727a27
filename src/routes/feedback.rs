use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{api_error, internal, ApiError};
use crate::error::FeedbackError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub(super) struct FeedbackRequest {
    continuation_id: String,
    outcome: bool,
    #[serde(default)]
    notes: Option<String>,
}

/// Record the outcome for a logged answer.
///
/// The entry is written by a detached task after `response_complete`, so
/// feedback sent immediately afterwards can see 404. Clients that need
/// certainty wait for `GET /confidence/entries/:continuation_id` first.
pub(super) async fn submit_feedback(
    State(state): State<AppState>,
    Json(req): Json<FeedbackRequest>,
) -> Result<Json<Value>, ApiError> {
    match state
        .confidence
        .logger
        .update_outcome(&req.continuation_id, req.outcome, req.notes)
        .await
    {
        Ok(update) => Ok(Json(json!({
            "continuation_id": req.continuation_id,
            "status": update,
        }))),
        Err(err @ FeedbackError::NotFound(_)) => Err(api_error(StatusCode::NOT_FOUND, err.to_string())),
        Err(FeedbackError::Store(e)) => Err(internal(e)),
    }
}
