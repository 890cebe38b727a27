use serde_json::{json, Value};

use crate::search::SearchMode;
use crate::validate::StructuredAdvice;

/// Upstream event vocabulary after decoding.
///
/// This is the only place that inspects raw upstream payloads; anything not
/// recognised (or recognised but missing its required fields) becomes
/// [`UpstreamEvent::Unknown`] so it is still forwarded downstream.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamEvent {
    Created { response_id: Option<String> },
    TextDelta(String),
    ToolName { name: String, call_id: Option<String> },
    ToolArgsDelta(String),
    ToolArgsComplete { arguments: Option<String> },
    Status { status: String, detail: Option<Value> },
    Completion { response_id: Option<String> },
    Error { code: Option<String>, message: String },
    Unknown { event_type: String, payload: Value },
}

fn str_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str)
}

fn owned_at(value: &Value, pointer: &str) -> Option<String> {
    str_at(value, pointer).map(str::to_string)
}

impl UpstreamEvent {
    /// Decode one SSE frame. `event_name` is the SSE `event:` field, used
    /// only when the JSON body has no `type`.
    pub fn decode(event_name: &str, data: &str) -> Self {
        let payload: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(_) => {
                return UpstreamEvent::Unknown {
                    event_type: if event_name.is_empty() {
                        "malformed".to_string()
                    } else {
                        event_name.to_string()
                    },
                    payload: Value::String(data.to_string()),
                }
            }
        };

        let event_type = str_at(&payload, "/type")
            .unwrap_or(event_name)
            .to_string();

        let decoded = match event_type.as_str() {
            "response.created" => Some(UpstreamEvent::Created {
                response_id: owned_at(&payload, "/response/id"),
            }),
            "response.in_progress" => Some(UpstreamEvent::status("in_progress", None)),
            "response.output_text.delta" => {
                owned_at(&payload, "/delta").map(UpstreamEvent::TextDelta)
            }
            "response.output_item.added" => match str_at(&payload, "/item/type") {
                Some("function_call") => {
                    owned_at(&payload, "/item/name").map(|name| UpstreamEvent::ToolName {
                        name,
                        call_id: owned_at(&payload, "/item/call_id"),
                    })
                }
                item_type => Some(UpstreamEvent::status(
                    "output_item_added",
                    item_type.map(|t| json!({ "item_type": t })),
                )),
            },
            "response.output_item.done" => Some(UpstreamEvent::status(
                "output_item_done",
                str_at(&payload, "/item/type").map(|t| json!({ "item_type": t })),
            )),
            "response.function_call_arguments.delta" => {
                owned_at(&payload, "/delta").map(UpstreamEvent::ToolArgsDelta)
            }
            "response.function_call_arguments.done" => Some(UpstreamEvent::ToolArgsComplete {
                arguments: owned_at(&payload, "/arguments"),
            }),
            "response.web_search_call.in_progress" => {
                Some(UpstreamEvent::status("web_search_started", None))
            }
            "response.web_search_call.searching" => {
                Some(UpstreamEvent::status("web_search_searching", None))
            }
            "response.web_search_call.completed" => {
                Some(UpstreamEvent::status("web_search_completed", None))
            }
            "response.completed" => Some(UpstreamEvent::Completion {
                response_id: owned_at(&payload, "/response/id"),
            }),
            "response.failed" => Some(UpstreamEvent::Error {
                code: owned_at(&payload, "/response/error/code"),
                message: owned_at(&payload, "/response/error/message")
                    .unwrap_or_else(|| "upstream response failed".to_string()),
            }),
            "error" => Some(UpstreamEvent::Error {
                code: owned_at(&payload, "/code").or_else(|| owned_at(&payload, "/error/code")),
                message: owned_at(&payload, "/message")
                    .or_else(|| owned_at(&payload, "/error/message"))
                    .unwrap_or_else(|| "an error occurred during streaming".to_string()),
            }),
            _ => None,
        };

        decoded.unwrap_or(UpstreamEvent::Unknown {
            event_type,
            payload,
        })
    }

    fn status(status: &str, detail: Option<Value>) -> Self {
        UpstreamEvent::Status {
            status: status.to_string(),
            detail,
        }
    }
}

/// Events relayed to the downstream consumer, one SSE event each.
#[derive(Debug, Clone, PartialEq)]
pub enum DownstreamEvent {
    StatusUpdate { status: String, detail: Option<Value> },
    TextDelta { delta: String },
    ToolResult { tool: String, result: Value },
    ToolError { tool: String, error: String },
    ResponseComplete {
        advice: StructuredAdvice,
        continuation_id: String,
        search: SearchMode,
    },
    Error { kind: String, message: String },
}

impl DownstreamEvent {
    pub fn status(status: &str, detail: Option<Value>) -> Self {
        DownstreamEvent::StatusUpdate {
            status: status.to_string(),
            detail,
        }
    }

    /// SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            DownstreamEvent::StatusUpdate { .. } => "status_update",
            DownstreamEvent::TextDelta { .. } => "text_delta",
            DownstreamEvent::ToolResult { .. } => "tool_result",
            DownstreamEvent::ToolError { .. } => "tool_error",
            DownstreamEvent::ResponseComplete { .. } => "response_complete",
            DownstreamEvent::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DownstreamEvent::ResponseComplete { .. } | DownstreamEvent::Error { .. }
        )
    }

    /// JSON payload carried in the SSE `data:` field.
    pub fn payload(&self) -> Value {
        match self {
            DownstreamEvent::StatusUpdate { status, detail } => match detail {
                Some(detail) => json!({ "status": status, "detail": detail }),
                None => json!({ "status": status }),
            },
            DownstreamEvent::TextDelta { delta } => json!({ "delta": delta }),
            DownstreamEvent::ToolResult { tool, result } => {
                json!({ "tool": tool, "result": result })
            }
            DownstreamEvent::ToolError { tool, error } => json!({ "tool": tool, "error": error }),
            DownstreamEvent::ResponseComplete {
                advice,
                continuation_id,
                search,
            } => json!({
                "advice": advice,
                "continuation_id": continuation_id,
                "search_policy": search,
            }),
            DownstreamEvent::Error { kind, message } => json!({ "kind": kind, "message": message }),
        }
    }
}
