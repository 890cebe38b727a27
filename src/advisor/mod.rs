pub mod events;
pub mod prompts;
pub mod stream;

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::confidence::tuner::{default_bands, PhraseTuner};
use crate::confidence::ConfidenceLogger;
use crate::llm::{CompletionProvider, Message, UpstreamRequest};
use crate::search::SearchDecisionEngine;
use crate::state::AdvisorConfig;
use crate::tools::ToolRegistry;
use crate::validate::SchemaValidator;
use events::DownstreamEvent;
use stream::{StreamMachine, StreamOutcome};

/// One user request.
#[derive(Debug, Clone, Deserialize)]
pub struct AdviceQuery {
    pub conversation: Vec<Message>,
    #[serde(default)]
    pub model: Option<String>,
    /// Upstream response id of the previous turn, to continue that thread.
    #[serde(default)]
    pub continuation_token: Option<String>,
    #[serde(default)]
    pub search_override: Option<String>,
}

impl AdviceQuery {
    pub fn question(text: &str) -> Self {
        Self {
            conversation: vec![Message::new("user", text)],
            model: None,
            continuation_token: None,
            search_override: None,
        }
    }

    fn latest_user_index(&self) -> Option<usize> {
        self.conversation.iter().rposition(|m| m.role == "user")
    }

    /// Text of the latest user turn, or "" if there is none.
    pub fn latest_user_text(&self) -> &str {
        self.latest_user_index()
            .map(|i| self.conversation[i].content.as_str())
            .unwrap_or("")
    }

    /// Turns preceding the latest user turn.
    pub fn prior_turns(&self) -> &[Message] {
        let end = self.latest_user_index().unwrap_or(self.conversation.len());
        &self.conversation[..end]
    }
}

/// Wires search decision, upstream stream, tools, validation and logging
/// together for each request.
#[derive(Clone)]
pub struct AdviceEngine {
    provider: Arc<dyn CompletionProvider>,
    registry: Arc<ToolRegistry>,
    search: Arc<SearchDecisionEngine>,
    validator: Arc<SchemaValidator>,
    logger: Arc<ConfidenceLogger>,
    tuner: Arc<PhraseTuner>,
    config: Arc<AdvisorConfig>,
}

impl AdviceEngine {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        registry: Arc<ToolRegistry>,
        search: Arc<SearchDecisionEngine>,
        validator: Arc<SchemaValidator>,
        logger: Arc<ConfidenceLogger>,
        tuner: Arc<PhraseTuner>,
        config: AdvisorConfig,
    ) -> Self {
        Self {
            provider,
            registry,
            search,
            validator,
            logger,
            tuner,
            config: Arc::new(config),
        }
    }

    /// Start a request on its own task. The receiver yields downstream events
    /// in order and closes after the terminal one; dropping it cancels the
    /// request.
    pub fn advise(&self, query: AdviceQuery) -> mpsc::Receiver<DownstreamEvent> {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity);
        let engine = self.clone();
        tokio::spawn(async move { engine.run(query, tx).await });
        rx
    }

    fn build_request(
        &self,
        query: &AdviceQuery,
        model: &str,
        instructions: String,
        search_enabled: bool,
    ) -> UpstreamRequest {
        let mut input = query.conversation.clone();
        if let Some(latest) = input.iter_mut().rev().find(|m| m.role == "user") {
            latest.content = self.search.strip_bypass_tokens(&latest.content);
        }
        prompts::anchor_date(&mut input, Utc::now().date_naive());

        let mut tools = Vec::new();
        if search_enabled {
            tools.push(json!({ "type": "web_search" }));
        }
        tools.extend(self.registry.upstream_declarations());

        UpstreamRequest {
            model: model.to_string(),
            instructions,
            input,
            tools,
            previous_response_id: query.continuation_token.clone(),
            max_output_tokens: self.config.max_output_tokens,
            temperature: self.config.temperature,
        }
    }

    async fn run(self, query: AdviceQuery, tx: mpsc::Sender<DownstreamEvent>) {
        let question = query.latest_user_text().to_string();
        let context = query.prior_turns().to_vec();
        let policy = self
            .search
            .policy(&question, &context, query.search_override.as_deref());
        let decision = policy.decision.clone();
        info!(
            mode = ?decision.mode,
            classification = %decision.classification,
            reasoning = %decision.reasoning,
            override_detected = policy.override_detected,
            query_length = policy.query_length,
            "search policy decided"
        );

        let model = query
            .model
            .clone()
            .unwrap_or_else(|| self.config.default_model.clone());
        let bands = self.tuner.bands().await.unwrap_or_else(|e| {
            warn!("Failed to load confidence bands, using defaults: {:#}", e);
            default_bands()
        });
        let instructions = prompts::build_instructions(&bands, &decision);
        let request = self.build_request(&query, &model, instructions, decision.enables_search());

        let announced = tx
            .send(DownstreamEvent::status("search_decision", Some(json!(decision))))
            .await;
        if announced.is_err() {
            return;
        }

        let upstream = match self.provider.open_stream(&request).await {
            Ok(upstream) => upstream,
            Err(err) => {
                warn!(kind = err.kind(), error = %err, "failed to open upstream stream");
                let _ = tx
                    .send(DownstreamEvent::Error {
                        kind: err.kind().to_string(),
                        message: err.to_string(),
                    })
                    .await;
                return;
            }
        };

        let machine = StreamMachine::new(
            self.registry.clone(),
            self.validator.clone(),
            decision.mode,
            tx,
        );
        match machine.run(upstream).await {
            StreamOutcome::Completed {
                advice,
                continuation_id,
            } => {
                let logger = self.logger.clone();
                let search_used = decision.enables_search();
                // Logging never holds up the response.
                tokio::spawn(async move {
                    if let Err(e) = logger
                        .log(
                            &advice,
                            &question,
                            &context,
                            &model,
                            search_used,
                            &continuation_id,
                        )
                        .await
                    {
                        error!(continuation_id = %continuation_id, "Failed to log confidence entry: {:#}", e);
                    }
                });
            }
            StreamOutcome::Failed(err) => {
                info!(kind = err.kind(), "request ended with upstream error");
            }
            StreamOutcome::Cancelled => info!("request cancelled by client"),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use futures::StreamExt;

    use super::events::UpstreamEvent;
    use crate::error::UpstreamError;
    use crate::llm::{CompletionProvider, UpstreamRequest, UpstreamStream};

    /// Replays a fixed event script and remembers the last request.
    pub struct ScriptedProvider {
        pub script: Result<Vec<Result<UpstreamEvent, UpstreamError>>, UpstreamError>,
        pub last_request: Mutex<Option<UpstreamRequest>>,
    }

    impl ScriptedProvider {
        pub fn new(events: Vec<Result<UpstreamEvent, UpstreamError>>) -> Self {
            Self {
                script: Ok(events),
                last_request: Mutex::new(None),
            }
        }

        pub fn failing(err: UpstreamError) -> Self {
            Self {
                script: Err(err),
                last_request: Mutex::new(None),
            }
        }

        pub fn request(&self) -> UpstreamRequest {
            self.last_request.lock().unwrap().clone().expect("no request made")
        }
    }

    #[async_trait]
    impl CompletionProvider for ScriptedProvider {
        async fn open_stream(
            &self,
            request: &UpstreamRequest,
        ) -> Result<UpstreamStream, UpstreamError> {
            *self.last_request.lock().unwrap() = Some(request.clone());
            let events = self.script.clone()?;
            Ok(futures::stream::iter(events).boxed())
        }
    }

    pub fn answer(response_id: &str, json: &str) -> Vec<Result<UpstreamEvent, UpstreamError>> {
        vec![
            Ok(UpstreamEvent::Created {
                response_id: Some(response_id.to_string()),
            }),
            Ok(UpstreamEvent::TextDelta(json.to_string())),
            Ok(UpstreamEvent::Completion { response_id: None }),
        ]
    }
}
