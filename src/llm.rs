use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::advisor::events::UpstreamEvent;
use crate::error::UpstreamError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

/// Ordered, finite stream of decoded upstream events.
pub type UpstreamStream = BoxStream<'static, Result<UpstreamEvent, UpstreamError>>;

/// One streaming generation request.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub model: String,
    pub instructions: String,
    pub input: Vec<Message>,
    pub tools: Vec<Value>,
    pub previous_response_id: Option<String>,
    pub max_output_tokens: u32,
    pub temperature: f32,
}

impl UpstreamRequest {
    pub fn to_body(&self) -> Value {
        let mut body = json!({
            "model": self.model,
            "instructions": self.instructions,
            "input": self.input,
            "max_output_tokens": self.max_output_tokens,
            "temperature": self.temperature,
            "stream": true,
        });
        if !self.tools.is_empty() {
            body["tools"] = Value::Array(self.tools.clone());
        }
        if let Some(id) = &self.previous_response_id {
            body["previous_response_id"] = json!(id);
        }
        body
    }

    pub fn search_enabled(&self) -> bool {
        self.tools
            .iter()
            .any(|t| t.get("type").and_then(Value::as_str) == Some("web_search"))
    }
}

/// Narrow seam to the external completion service.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn open_stream(&self, request: &UpstreamRequest) -> Result<UpstreamStream, UpstreamError>;
}

pub struct LlmClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    idle_timeout: Duration,
}

impl LlmClient {
    pub fn from_env() -> Result<Self> {
        let base_url = dotenv::var("LLM_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let api_key = dotenv::var("LLM_API_KEY").ok().filter(|k| !k.is_empty());
        let idle_secs = dotenv::var("LLM_IDLE_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(600);

        if api_key.is_none() {
            warn!("LLM_API_KEY not set; upstream requests will be unauthenticated");
        }

        Self::new(base_url, api_key, Duration::from_secs(idle_secs))
    }

    pub fn new(base_url: String, api_key: Option<String>, idle_timeout: Duration) -> Result<Self> {
        // No overall timeout: streams stay open for the whole generation.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url,
            api_key,
            idle_timeout,
        })
    }

    /// Resolve the streaming responses endpoint from the base URL.
    fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/responses") {
            base.to_string()
        } else if base.ends_with("/v1") {
            format!("{}/responses", base)
        } else {
            format!("{}/v1/responses", base)
        }
    }
}

#[async_trait]
impl CompletionProvider for LlmClient {
    async fn open_stream(&self, request: &UpstreamRequest) -> Result<UpstreamStream, UpstreamError> {
        let body = request.to_body();
        let mut req = self
            .client
            .post(self.endpoint())
            .header("Accept", "text/event-stream")
            .json(&body);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        info!(
            model = %request.model,
            search = request.search_enabled(),
            tools = request.tools.len(),
            resume = request.previous_response_id.is_some(),
            "Opening upstream stream"
        );

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(UpstreamError::from_status(status.as_u16(), &text));
        }

        let idle = self.idle_timeout;
        let events = resp.bytes_stream().eventsource();
        let stream = tokio_stream::StreamExt::timeout(events, idle).map(move |item| match item {
            Ok(Ok(sse)) => {
                debug!(event = %sse.event, len = sse.data.len(), "upstream sse");
                Ok(UpstreamEvent::decode(&sse.event, &sse.data))
            }
            Ok(Err(e)) => Err(UpstreamError::Connection(format!("SSE stream error: {}", e))),
            Err(_) => Err(UpstreamError::Connection(format!(
                "SSE stream idle for more than {}s",
                idle.as_secs()
            ))),
        });

        Ok(stream.boxed())
    }
}
