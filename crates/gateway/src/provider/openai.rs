//! OpenAI-compatible chat completions.
//!
//! Several upstreams speak this dialect with small deviations (reasoning
//! knobs, reasoning output channels). The [`ChatCompletions`] engine holds
//! the shared translation and event loop; thin provider types (OpenAI,
//! Groq, Cerebras, xAI, Google's shim) parameterize it with a [`Dialect`]
//! and their own catalog.

pub(crate) mod input;
pub(crate) mod output;

use std::sync::Arc;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::{
    Client,
    header::{AUTHORIZATION, CONTENT_TYPE},
};
use secrecy::ExposeSecret;

use self::input::ChatRequest;
use self::output::{ChatChunk, map_finish_reason};

use crate::error::Error;
use crate::messages::request::TextToTextRequest;
use crate::messages::response::StreamEvent;
use crate::provider::http_client::default_http_client_builder;
use crate::provider::{GenerationTimer, ModelMap, Provider, ProviderConfig, TextToTextProvider};
use crate::sender::{AsyncSender, ServerStream};
use crate::toolcall::ToolCallAccumulator;

const OPENAI_CATALOG: &str = include_str!("catalogs/openai.json");
const DEFAULT_OPENAI_API_URL: &str = "https://api.openai.com/v1";

/// FIFO capacity used by the chat adapters; generation streams are chatty.
const SENDER_CAPACITY: usize = 100;

/// How an upstream encodes the reasoning-effort knob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReasoningEncoding {
    /// `reasoning_effort: low | medium | high`.
    Effort,
    /// Groq pins `reasoning_effort: "default"` for every level.
    GroqDefault,
    /// Cerebras has no knob; the field stays unset.
    Unset,
}

/// Per-upstream deviations from the base dialect.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Dialect {
    pub provider_id: &'static str,
    pub default_base_url: &'static str,
    pub reasoning: ReasoningEncoding,
}

/// Shared chat-completions engine.
pub(crate) struct ChatCompletions {
    client: Client,
    base_url: String,
    config: ProviderConfig,
    models: Arc<ModelMap>,
    dialect: Dialect,
}

impl ChatCompletions {
    pub(crate) fn new(dialect: Dialect, catalog: &'static str, config: ProviderConfig) -> crate::Result<Self> {
        let client = default_http_client_builder(Default::default()).build().map_err(|e| {
            log::error!("failed to create HTTP client for {}: {e}", dialect.provider_id);
            Error::Internal(None)
        })?;

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| dialect.default_base_url.to_string());

        let models = Arc::new(ModelMap::from_catalog(dialect.provider_id, catalog)?);

        Ok(Self {
            client,
            base_url,
            config,
            models,
            dialect,
        })
    }

    pub(crate) fn models(&self) -> &Arc<ModelMap> {
        &self.models
    }

    pub(crate) async fn stream(
        &self,
        request: TextToTextRequest,
        stream: Box<dyn ServerStream>,
    ) -> crate::Result<()> {
        let (model, _) = self.models.resolve_text_to_text(&request.model)?;
        let wire = ChatRequest::build(&model, &request, &self.dialect)?;
        let api_key = self.config.require_api_key(self.dialect.provider_id)?;

        let body = sonic_rs::to_vec(&wire).map_err(|e| {
            log::error!("failed to serialize {} streaming request: {e}", self.dialect.provider_id);
            Error::Internal(None)
        })?;

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header(AUTHORIZATION, format!("Bearer {}", api_key.expose_secret()))
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Connection(format!("failed to send streaming request: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "unknown error".to_string());
            return Err(Error::from_upstream_status(status.as_u16(), error_text));
        }

        let ctx = stream.context().clone();
        let sender = AsyncSender::with_capacity(stream, SENDER_CAPACITY);
        let mut timer = GenerationTimer::start();
        let mut accumulator = ToolCallAccumulator::new();
        let mut stop_emitted = false;
        let emit_partials = request.configuration.stream_partial_tool_calls;

        let mut events = response.bytes_stream().eventsource();

        let outcome: crate::Result<()> = 'stream: loop {
            let event = tokio::select! {
                _ = ctx.cancelled() => break 'stream Err(Error::Canceled),
                event = events.next() => event,
            };

            let Some(event) = event else {
                break 'stream Ok(());
            };

            let event = match event {
                Ok(event) => event,
                Err(e) => break 'stream Err(Error::Connection(format!("upstream stream failed: {e}"))),
            };

            if event.data == "[DONE]" {
                break 'stream Ok(());
            }

            let chunk: ChatChunk = match sonic_rs::from_str(&event.data) {
                Ok(chunk) => chunk,
                Err(e) => {
                    log::warn!("failed to parse chat completion chunk: {e}");
                    break 'stream Err(Error::Protocol(format!("malformed stream chunk: {e}")));
                }
            };

            if let Some(usage) = chunk.usage {
                let usage = match usage.into_model_usage() {
                    Ok(usage) => usage,
                    Err(e) => break 'stream Err(e),
                };

                if !usage.is_empty() {
                    timer.mark_first(&sender).await;
                    sender.enqueue(StreamEvent::ModelUsage(usage)).await;
                }
            }

            for choice in chunk.choices {
                let finish_reason = choice.finish_reason;
                let mut delta = choice.delta;
                let tool_calls = delta.tool_calls.take();
                let (reasoning, content) = delta.split_reasoning();

                if let Some(text) = reasoning
                    && !text.is_empty()
                {
                    timer.mark_first(&sender).await;
                    sender.enqueue(StreamEvent::ReasoningChunk { text }).await;
                }

                if let Some(text) = content
                    && !text.is_empty()
                {
                    timer.mark_first(&sender).await;
                    sender.enqueue(StreamEvent::ContentChunk { text }).await;
                }

                for delta in tool_calls.into_iter().flatten() {
                    let (name, arguments) = match delta.function {
                        Some(function) => (function.name, function.arguments),
                        None => (None, None),
                    };

                    accumulator.start_or_update(delta.index, delta.id, name);

                    if let Some(fragment) = arguments
                        && !fragment.is_empty()
                    {
                        accumulator.append_args(delta.index, &fragment);

                        if emit_partials {
                            match accumulator.build_partial(delta.index) {
                                Ok(partial) => {
                                    timer.mark_first(&sender).await;
                                    sender.enqueue(StreamEvent::PartialToolCall(partial)).await;
                                }
                                Err(e) => log::warn!("failed to build partial tool call: {e}"),
                            }
                        }
                    }

                    // A fragment for a new index retired the previous call.
                    match accumulator.build_complete() {
                        Ok(completed) => {
                            for call in completed {
                                timer.mark_first(&sender).await;
                                sender.enqueue(StreamEvent::ToolCall(call)).await;
                            }
                        }
                        Err(e) => break 'stream Err(e),
                    }
                }

                if let Some(reason) = finish_reason {
                    let remaining = match accumulator.build_remaining() {
                        Ok(remaining) => remaining,
                        Err(e) => break 'stream Err(e),
                    };

                    for call in remaining {
                        timer.mark_first(&sender).await;
                        sender.enqueue(StreamEvent::ToolCall(call)).await;
                    }

                    let stop = match map_finish_reason(&reason) {
                        Ok(stop) => stop,
                        Err(e) => break 'stream Err(e),
                    };

                    if !stop_emitted {
                        stop_emitted = true;
                        timer.mark_first(&sender).await;
                        sender.enqueue(StreamEvent::StopReason(stop)).await;
                    }
                }
            }
        };

        outcome?;

        // Anything the upstream left open at EOF is complete by definition.
        for call in accumulator.build_remaining()? {
            timer.mark_first(&sender).await;
            sender.enqueue(StreamEvent::ToolCall(call)).await;
        }

        timer.mark_last(&sender).await;
        sender.wait(&ctx).await
    }
}

/// OpenAI.
pub struct OpenAiProvider {
    chat: ChatCompletions,
}

pub(crate) const OPENAI_DIALECT: Dialect = Dialect {
    provider_id: "openai",
    default_base_url: DEFAULT_OPENAI_API_URL,
    reasoning: ReasoningEncoding::Effort,
};

impl OpenAiProvider {
    pub fn new(config: ProviderConfig) -> crate::Result<Self> {
        Ok(Self {
            chat: ChatCompletions::new(OPENAI_DIALECT, OPENAI_CATALOG, config)?,
        })
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn id(&self) -> &str {
        "openai"
    }

    fn catalog(&self) -> &'static str {
        OPENAI_CATALOG
    }

    fn text_to_text(self: Arc<Self>) -> Option<Arc<dyn TextToTextProvider>> {
        Some(self)
    }
}

#[async_trait]
impl TextToTextProvider for OpenAiProvider {
    async fn text_to_text_stream(
        &self,
        request: TextToTextRequest,
        stream: Box<dyn ServerStream>,
    ) -> crate::Result<()> {
        self.chat.stream(request, stream).await
    }
}
