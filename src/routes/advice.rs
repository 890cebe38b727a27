use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::{Stream, StreamExt};
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;

use super::{api_error, ApiError};
use crate::advisor::events::DownstreamEvent;
use crate::advisor::AdviceQuery;
use crate::state::AppState;

fn to_sse_event(event: &DownstreamEvent) -> Event {
    Event::default()
        .event(event.name())
        .data(event.payload().to_string())
}

pub(super) async fn stream_advice(
    State(state): State<AppState>,
    Json(query): Json<AdviceQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    if query.latest_user_text().trim().is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "conversation must end with a non-empty user message",
        ));
    }
    info!(turns = query.conversation.len(), model = ?query.model, "advice stream requested");

    let events = ReceiverStream::new(state.engine.advise(query))
        .map(|event| Ok::<_, Infallible>(to_sse_event(&event)));

    Ok(Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    ))
}

#[cfg(test)]
mod tests {
    use eventsource_stream::Eventsource;
    use serde_json::{json, Value};

    use crate::advisor::testing::{answer, ScriptedProvider};
    use crate::routes::testing::{serve, state};

    #[tokio::test]
    async fn streams_named_sse_events() {
        let base = serve(state(ScriptedProvider::new(answer(
            "resp_7",
            r#"{"main_advice":"Start Allen","confidence_score":0.9}"#,
        ))))
        .await;

        let resp = reqwest::Client::new()
            .post(format!("{base}/advice/stream"))
            .json(&json!({
                "conversation": [{ "role": "user", "content": "Start Allen tonight?" }]
            }))
            .send()
            .await
            .unwrap();
        assert!(resp.status().is_success());

        let mut events = Box::pin(resp.bytes_stream().eventsource());
        let mut names = Vec::new();
        let mut last: Option<Value> = None;
        while let Some(Ok(ev)) = futures::StreamExt::next(&mut events).await {
            names.push(ev.event.clone());
            last = Some(serde_json::from_str(&ev.data).unwrap());
        }

        assert_eq!(names.first().map(String::as_str), Some("status_update"));
        assert_eq!(names.last().map(String::as_str), Some("response_complete"));
        assert!(names.iter().any(|n| n == "text_delta"));
        let last = last.unwrap();
        assert_eq!(last["advice"]["main_advice"], json!("Start Allen"));
        assert_eq!(last["continuation_id"], json!("resp_7"));
        assert_eq!(last["search_policy"], json!("mandatory"));
    }

    #[tokio::test]
    async fn empty_question_is_rejected() {
        let base = serve(state(ScriptedProvider::new(vec![]))).await;
        let resp = reqwest::Client::new()
            .post(format!("{base}/advice/stream"))
            .json(&json!({ "conversation": [] }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 400);
    }
}
