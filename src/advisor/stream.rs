use std::sync::Arc;

use futures::StreamExt;
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use super::events::{DownstreamEvent, UpstreamEvent};
use crate::error::UpstreamError;
use crate::llm::UpstreamStream;
use crate::search::SearchMode;
use crate::tools::ToolRegistry;
use crate::validate::{SchemaValidator, StructuredAdvice};

/// How a stream ended.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamOutcome {
    Completed {
        advice: StructuredAdvice,
        continuation_id: String,
    },
    Failed(UpstreamError),
    /// Downstream consumer went away; nothing further was emitted.
    Cancelled,
}

/// A function call being assembled from upstream deltas.
#[derive(Debug, Default)]
struct ToolCall {
    name: Option<String>,
    call_id: Option<String>,
    arguments: String,
}

enum Step {
    Continue,
    Done(StreamOutcome),
}

/// Per-request relay from upstream events to downstream events.
///
/// One instance handles exactly one stream; [`StreamMachine::run`] consumes it.
pub struct StreamMachine {
    registry: Arc<ToolRegistry>,
    validator: Arc<SchemaValidator>,
    search: SearchMode,
    tx: mpsc::Sender<DownstreamEvent>,
    buffer: String,
    continuation_id: Option<String>,
    tool_call: Option<ToolCall>,
}

impl StreamMachine {
    pub fn new(
        registry: Arc<ToolRegistry>,
        validator: Arc<SchemaValidator>,
        search: SearchMode,
        tx: mpsc::Sender<DownstreamEvent>,
    ) -> Self {
        Self {
            registry,
            validator,
            search,
            tx,
            buffer: String::new(),
            continuation_id: None,
            tool_call: None,
        }
    }

    pub async fn run(mut self, mut upstream: UpstreamStream) -> StreamOutcome {
        loop {
            let next = tokio::select! {
                item = upstream.next() => item,
                _ = self.tx.closed() => {
                    info!(buffered = self.buffer.len(), "downstream closed, dropping upstream");
                    return StreamOutcome::Cancelled;
                }
            };

            let step = match next {
                Some(Ok(event)) => self.step(event).await,
                Some(Err(err)) => self.fail(err).await,
                None => {
                    self.fail(UpstreamError::Connection(
                        "upstream stream closed before completion".to_string(),
                    ))
                    .await
                }
            };

            if let Step::Done(outcome) = step {
                return outcome;
            }
        }
    }

    async fn step(&mut self, event: UpstreamEvent) -> Step {
        match event {
            UpstreamEvent::Created { response_id } => {
                debug!(response_id = ?response_id, "upstream response created");
                if response_id.is_some() {
                    self.continuation_id = response_id.clone();
                }
                self.emit(DownstreamEvent::status(
                    "created",
                    response_id.map(|id| json!({ "response_id": id })),
                ))
                .await
            }
            UpstreamEvent::TextDelta(delta) => {
                self.buffer.push_str(&delta);
                let check = self.validator.check_partial(&self.buffer);
                trace!(len = self.buffer.len(), check = ?check, "partial validation");
                self.emit(DownstreamEvent::TextDelta { delta }).await
            }
            UpstreamEvent::Status { status, detail } => {
                self.emit(DownstreamEvent::StatusUpdate { status, detail })
                    .await
            }
            UpstreamEvent::ToolName { name, call_id } => {
                if let Some(stale) = self.tool_call.take() {
                    warn!(tool = ?stale.name, "tool call replaced before its arguments completed");
                }
                debug!(tool = %name, call_id = ?call_id, "tool call opened");
                self.tool_call = Some(ToolCall {
                    name: Some(name),
                    call_id,
                    arguments: String::new(),
                });
                Step::Continue
            }
            UpstreamEvent::ToolArgsDelta(delta) => {
                self.tool_call
                    .get_or_insert_with(ToolCall::default)
                    .arguments
                    .push_str(&delta);
                Step::Continue
            }
            UpstreamEvent::ToolArgsComplete { arguments } => self.run_tool(arguments).await,
            UpstreamEvent::Completion { response_id } => {
                if response_id.is_some() {
                    self.continuation_id = response_id;
                }
                self.finalize().await
            }
            UpstreamEvent::Error { code, message } => {
                self.fail(UpstreamError::from_event(code.as_deref(), &message))
                    .await
            }
            UpstreamEvent::Unknown {
                event_type,
                payload,
            } => {
                debug!(event_type = %event_type, "forwarding unrecognised upstream event");
                self.emit(DownstreamEvent::status(
                    "upstream_event",
                    Some(json!({ "type": event_type, "payload": payload })),
                ))
                .await
            }
        }
    }

    async fn run_tool(&mut self, arguments: Option<String>) -> Step {
        let call = self.tool_call.take().unwrap_or_default();
        let raw = arguments
            .filter(|a| !a.trim().is_empty())
            .unwrap_or(call.arguments);

        let Some(name) = call.name else {
            warn!("tool arguments completed without a tool name");
            return self
                .emit(DownstreamEvent::ToolError {
                    tool: "unknown".to_string(),
                    error: "tool call completed without a name".to_string(),
                })
                .await;
        };

        let args = parse_arguments(&raw);
        info!(tool = %name, call_id = ?call.call_id, "executing tool call");

        let result = tokio::select! {
            r = self.registry.dispatch(&name, &args) => r,
            _ = self.tx.closed() => {
                info!(tool = %name, "downstream closed during tool call");
                return Step::Done(StreamOutcome::Cancelled);
            }
        };

        match result {
            Ok(result) => {
                if let Step::Done(outcome) = self
                    .emit(DownstreamEvent::ToolResult {
                        tool: name.clone(),
                        result,
                    })
                    .await
                {
                    return Step::Done(outcome);
                }
                self.emit(DownstreamEvent::status(
                    "tool_completed",
                    Some(json!({ "tool": name })),
                ))
                .await
            }
            Err(err) => {
                warn!(tool = %name, error = %err, "tool call failed");
                self.emit(DownstreamEvent::ToolError {
                    tool: name,
                    error: err.to_string(),
                })
                .await
            }
        }
    }

    async fn finalize(&mut self) -> Step {
        let advice = self.validator.finalize(&self.buffer);
        let continuation_id = self
            .continuation_id
            .take()
            .unwrap_or_else(|| format!("local-{}", uuid::Uuid::new_v4()));

        info!(
            continuation_id = %continuation_id,
            confidence = ?advice.confidence_score,
            output_len = self.buffer.len(),
            "stream finalized"
        );

        let event = DownstreamEvent::ResponseComplete {
            advice: advice.clone(),
            continuation_id: continuation_id.clone(),
            search: self.search,
        };
        if self.tx.send(event).await.is_err() {
            return Step::Done(StreamOutcome::Cancelled);
        }
        Step::Done(StreamOutcome::Completed {
            advice,
            continuation_id,
        })
    }

    async fn fail(&mut self, err: UpstreamError) -> Step {
        warn!(kind = err.kind(), error = %err, buffered = self.buffer.len(), "stream failed");
        let event = DownstreamEvent::Error {
            kind: err.kind().to_string(),
            message: err.to_string(),
        };
        if self.tx.send(event).await.is_err() {
            return Step::Done(StreamOutcome::Cancelled);
        }
        Step::Done(StreamOutcome::Failed(err))
    }

    async fn emit(&self, event: DownstreamEvent) -> Step {
        match self.tx.send(event).await {
            Ok(()) => Step::Continue,
            Err(_) => Step::Done(StreamOutcome::Cancelled),
        }
    }
}

/// Tool arguments as an object; anything unparsable becomes `{}`.
fn parse_arguments(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(v @ Value::Object(_)) => v,
        Ok(_) | Err(_) => {
            if !raw.trim().is_empty() {
                debug!(raw_len = raw.len(), "tool arguments not a JSON object, using {{}}");
            }
            Value::Object(Map::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::stream;

    use super::*;
    use crate::tools::testing::{declaration, EchoBackend};

    fn registry() -> Arc<ToolRegistry> {
        let backend = Arc::new(EchoBackend {
            failing: vec!["mlb_standings".to_string()],
            ..Default::default()
        });
        Arc::new(ToolRegistry::with_backend(
            vec![
                declaration("get_player_stats", "player_stats"),
                declaration("get_mlb_standings", "mlb_standings"),
            ],
            backend,
        ))
    }

    fn scripted(events: Vec<Result<UpstreamEvent, UpstreamError>>) -> UpstreamStream {
        stream::iter(events).boxed()
    }

    async fn drive(
        events: Vec<Result<UpstreamEvent, UpstreamError>>,
    ) -> (StreamOutcome, Vec<DownstreamEvent>) {
        let (tx, mut rx) = mpsc::channel(64);
        let machine = StreamMachine::new(
            registry(),
            Arc::new(SchemaValidator::default()),
            SearchMode::Skip,
            tx,
        );
        let outcome = machine.run(scripted(events)).await;
        let mut out = Vec::new();
        while let Some(ev) = rx.recv().await {
            out.push(ev);
        }
        (outcome, out)
    }

    fn delta(s: &str) -> Result<UpstreamEvent, UpstreamError> {
        Ok(UpstreamEvent::TextDelta(s.to_string()))
    }

    fn terminal_count(events: &[DownstreamEvent]) -> usize {
        events.iter().filter(|e| e.is_terminal()).count()
    }

    #[tokio::test]
    async fn relays_deltas_and_finalizes_once() {
        let (outcome, events) = drive(vec![
            Ok(UpstreamEvent::Created {
                response_id: Some("resp_9".to_string()),
            }),
            delta(r#"{"main_advice":"Start "#),
            delta(r#"Allen","confidence_score":0.7}"#),
            Ok(UpstreamEvent::Completion { response_id: None }),
        ])
        .await;

        let names: Vec<_> = events.iter().map(DownstreamEvent::name).collect();
        assert_eq!(
            names,
            ["status_update", "text_delta", "text_delta", "response_complete"]
        );
        assert_eq!(terminal_count(&events), 1);

        match outcome {
            StreamOutcome::Completed {
                advice,
                continuation_id,
            } => {
                assert_eq!(advice.main_advice, "Start Allen");
                assert_eq!(advice.confidence_score, Some(0.7));
                assert_eq!(continuation_id, "resp_9");
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn tool_call_round_trip() {
        let (_, events) = drive(vec![
            Ok(UpstreamEvent::ToolName {
                name: "get_player_stats".to_string(),
                call_id: Some("c1".to_string()),
            }),
            Ok(UpstreamEvent::ToolArgsDelta(r#"{"player_name":"#.to_string())),
            Ok(UpstreamEvent::ToolArgsDelta(r#""Judge"}"#.to_string())),
            Ok(UpstreamEvent::ToolArgsComplete { arguments: None }),
            delta(r#"{"main_advice":"Start Judge"}"#),
            Ok(UpstreamEvent::Completion { response_id: None }),
        ])
        .await;

        match &events[0] {
            DownstreamEvent::ToolResult { tool, result } => {
                assert_eq!(tool, "get_player_stats");
                assert_eq!(result["args"]["player_name"], json!("Judge"));
            }
            other => panic!("expected tool_result, got {other:?}"),
        }
        assert_eq!(
            events[1],
            DownstreamEvent::status("tool_completed", Some(json!({"tool": "get_player_stats"})))
        );
        assert_eq!(events.last().map(DownstreamEvent::name), Some("response_complete"));
    }

    #[tokio::test]
    async fn tool_failure_does_not_end_stream() {
        let (outcome, events) = drive(vec![
            Ok(UpstreamEvent::ToolName {
                name: "get_mlb_standings".to_string(),
                call_id: None,
            }),
            Ok(UpstreamEvent::ToolArgsComplete {
                arguments: Some("{}".to_string()),
            }),
            Ok(UpstreamEvent::ToolName {
                name: "not_a_tool".to_string(),
                call_id: None,
            }),
            Ok(UpstreamEvent::ToolArgsComplete { arguments: None }),
            delta("plain text answer"),
            Ok(UpstreamEvent::Completion { response_id: None }),
        ])
        .await;

        assert_eq!(events[0].name(), "tool_error");
        assert_eq!(events[1].name(), "tool_error");
        assert!(matches!(outcome, StreamOutcome::Completed { .. }));
        assert_eq!(terminal_count(&events), 1);
    }

    #[tokio::test]
    async fn malformed_tool_arguments_become_empty_object() {
        let (_, events) = drive(vec![
            Ok(UpstreamEvent::ToolName {
                name: "get_player_stats".to_string(),
                call_id: None,
            }),
            Ok(UpstreamEvent::ToolArgsDelta("{not json".to_string())),
            Ok(UpstreamEvent::ToolArgsComplete { arguments: None }),
            Ok(UpstreamEvent::Completion { response_id: None }),
        ])
        .await;

        match &events[0] {
            DownstreamEvent::ToolResult { result, .. } => assert_eq!(result["args"], json!({})),
            other => panic!("expected tool_result, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn upstream_error_is_terminal_after_partial_output() {
        let (outcome, events) = drive(vec![
            delta("partial"),
            Ok(UpstreamEvent::Error {
                code: Some("rate_limit_exceeded".to_string()),
                message: "slow down".to_string(),
            }),
            delta("never relayed"),
        ])
        .await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[0], DownstreamEvent::TextDelta { delta: "partial".to_string() });
        assert!(matches!(&events[1], DownstreamEvent::Error { kind, .. } if kind == "rate_limited"));
        assert_eq!(outcome, StreamOutcome::Failed(UpstreamError::RateLimited));
    }

    #[tokio::test]
    async fn transport_close_without_completion_synthesizes_error() {
        let (outcome, events) = drive(vec![delta("abc")]).await;
        assert_eq!(terminal_count(&events), 1);
        assert!(matches!(
            events.last(),
            Some(DownstreamEvent::Error { kind, message })
                if kind == "connection_error" && message.contains("closed before completion")
        ));
        assert!(matches!(outcome, StreamOutcome::Failed(UpstreamError::Connection(_))));
    }

    #[tokio::test]
    async fn transport_error_item_is_classified() {
        let (_, events) = drive(vec![
            delta("abc"),
            Err(UpstreamError::Connection("reset".to_string())),
        ])
        .await;
        assert!(matches!(events.last(), Some(DownstreamEvent::Error { kind, .. }) if kind == "connection_error"));
    }

    #[tokio::test]
    async fn unknown_events_are_forwarded_as_status() {
        let (_, events) = drive(vec![
            Ok(UpstreamEvent::Unknown {
                event_type: "response.reasoning.delta".to_string(),
                payload: json!({"delta": "x"}),
            }),
            Ok(UpstreamEvent::Completion { response_id: None }),
        ])
        .await;
        match &events[0] {
            DownstreamEvent::StatusUpdate { status, detail } => {
                assert_eq!(status, "upstream_event");
                assert_eq!(detail.as_ref().unwrap()["type"], json!("response.reasoning.delta"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_continuation_id_is_synthesized() {
        let (outcome, _) = drive(vec![Ok(UpstreamEvent::Completion { response_id: None })]).await;
        match outcome {
            StreamOutcome::Completed {
                advice,
                continuation_id,
            } => {
                assert!(continuation_id.starts_with("local-"));
                assert_eq!(advice.main_advice, SchemaValidator::default().apology);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn dropped_consumer_cancels_stream() {
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let machine = StreamMachine::new(
            registry(),
            Arc::new(SchemaValidator::default()),
            SearchMode::Skip,
            tx,
        );
        // never-ending upstream: only cancellation can stop it
        let upstream: UpstreamStream = stream::pending().boxed();
        let outcome = tokio::time::timeout(Duration::from_secs(2), machine.run(upstream))
            .await
            .expect("machine should observe the closed channel");
        assert_eq!(outcome, StreamOutcome::Cancelled);
    }

    /// Signals once a call starts, then never returns.
    struct StuckBackend {
        started: Arc<tokio::sync::Notify>,
    }

    #[async_trait::async_trait]
    impl crate::tools::ToolBackend for StuckBackend {
        async fn invoke(&self, _endpoint: &str, _args: &Value) -> anyhow::Result<Value> {
            self.started.notify_one();
            futures::future::pending().await
        }
    }

    #[tokio::test]
    async fn dropped_consumer_cancels_in_flight_tool_call() {
        let started = Arc::new(tokio::sync::Notify::new());
        let registry = Arc::new(ToolRegistry::with_backend(
            vec![declaration("get_player_stats", "player_stats")],
            Arc::new(StuckBackend {
                started: started.clone(),
            }),
        ));
        let (tx, rx) = mpsc::channel(4);
        let machine = StreamMachine::new(
            registry,
            Arc::new(SchemaValidator::default()),
            SearchMode::Skip,
            tx,
        );
        let upstream: UpstreamStream = stream::iter(vec![
            Ok(UpstreamEvent::ToolName {
                name: "get_player_stats".to_string(),
                call_id: Some("c1".to_string()),
            }),
            Ok(UpstreamEvent::ToolArgsComplete {
                arguments: Some(r#"{"player_name":"Judge"}"#.to_string()),
            }),
        ])
        .chain(stream::pending())
        .boxed();

        let run = tokio::spawn(machine.run(upstream));
        tokio::time::timeout(Duration::from_secs(2), started.notified())
            .await
            .expect("tool call should start");
        drop(rx);

        let outcome = tokio::time::timeout(Duration::from_secs(2), run)
            .await
            .expect("machine should stop while the tool is still running")
            .unwrap();
        assert_eq!(outcome, StreamOutcome::Cancelled);
    }
}
