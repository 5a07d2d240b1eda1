//! Anthropic.
//!
//! Speaks the Messages API over SSE. The stream is a typed state machine:
//! tool calls open at `content_block_start`, accumulate argument JSON
//! through `content_block_delta`, and finalize at `content_block_stop`;
//! token accounting is split between `message_start` (input) and
//! `message_delta` (output).

pub(crate) mod input;
pub(crate) mod output;

use std::sync::Arc;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::{Client, header::CONTENT_TYPE};
use secrecy::ExposeSecret;

use self::input::AnthropicRequest;
use self::output::{
    AnthropicBlockDelta, AnthropicContentBlock, AnthropicStreamEvent, StartUsage, map_stop_reason,
};

use crate::error::Error;
use crate::messages::request::TextToTextRequest;
use crate::messages::response::{ModelUsage, ResourceUsage, StreamEvent};
use crate::provider::http_client::default_http_client_builder;
use crate::provider::{GenerationTimer, ModelMap, Provider, ProviderConfig, TextToTextProvider};
use crate::sender::{AsyncSender, ServerStream};
use crate::toolcall::ToolCallAccumulator;

const ANTHROPIC_CATALOG: &str = include_str!("catalogs/anthropic.json");
const DEFAULT_ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

const SENDER_CAPACITY: usize = 100;

pub struct AnthropicProvider {
    client: Client,
    base_url: String,
    config: ProviderConfig,
    models: ModelMap,
}

impl AnthropicProvider {
    pub fn new(config: ProviderConfig) -> crate::Result<Self> {
        let mut headers = http::HeaderMap::new();
        headers.insert(
            "anthropic-version",
            http::HeaderValue::from_static(ANTHROPIC_VERSION),
        );

        let client = default_http_client_builder(headers).build().map_err(|e| {
            log::error!("failed to create HTTP client for anthropic: {e}");
            Error::Internal(None)
        })?;

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_ANTHROPIC_API_URL.to_string());

        Ok(Self {
            client,
            base_url,
            config,
            models: ModelMap::from_catalog("anthropic", ANTHROPIC_CATALOG)?,
        })
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn id(&self) -> &str {
        "anthropic"
    }

    fn catalog(&self) -> &'static str {
        ANTHROPIC_CATALOG
    }

    fn text_to_text(self: Arc<Self>) -> Option<Arc<dyn TextToTextProvider>> {
        Some(self)
    }
}

#[async_trait]
impl TextToTextProvider for AnthropicProvider {
    async fn text_to_text_stream(
        &self,
        request: TextToTextRequest,
        stream: Box<dyn ServerStream>,
    ) -> crate::Result<()> {
        let (model, ttt_config) = self.models.resolve_text_to_text(&request.model)?;
        let wire = AnthropicRequest::build(&model, &ttt_config, &request)?;
        let api_key = self.config.require_api_key("anthropic")?;

        let body = sonic_rs::to_vec(&wire).map_err(|e| {
            log::error!("failed to serialize anthropic streaming request: {e}");
            Error::Internal(None)
        })?;

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", api_key.expose_secret())
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
        let emit_partials = request.configuration.stream_partial_tool_calls;

        let mut input_usage = StartUsage::default();
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

            let event: AnthropicStreamEvent = match sonic_rs::from_str(&event.data) {
                Ok(event) => event,
                Err(e) => {
                    log::warn!("failed to parse anthropic streaming event: {e}");
                    break 'stream Err(Error::Protocol(format!("malformed stream event: {e}")));
                }
            };

            match event {
                AnthropicStreamEvent::MessageStart { message } => {
                    input_usage = message.usage;
                }

                AnthropicStreamEvent::ContentBlockStart { index, content_block } => match content_block {
                    AnthropicContentBlock::ToolUse { id, name } => {
                        accumulator.start(index, id, name);

                        if emit_partials {
                            match accumulator.build_partial(index) {
                                Ok(partial) => {
                                    timer.mark_first(&sender).await;
                                    sender.enqueue(StreamEvent::PartialToolCall(partial)).await;
                                }
                                Err(e) => break 'stream Err(e),
                            }
                        }
                    }
                    AnthropicContentBlock::Text { .. } | AnthropicContentBlock::Thinking { .. } => {}
                },

                AnthropicStreamEvent::ContentBlockDelta { index, delta } => match delta {
                    AnthropicBlockDelta::TextDelta { text } => {
                        if !text.is_empty() {
                            timer.mark_first(&sender).await;
                            sender.enqueue(StreamEvent::ContentChunk { text }).await;
                        }
                    }
                    AnthropicBlockDelta::ThinkingDelta { thinking } => {
                        if !thinking.is_empty() {
                            timer.mark_first(&sender).await;
                            sender.enqueue(StreamEvent::ReasoningChunk { text: thinking }).await;
                        }
                    }
                    AnthropicBlockDelta::InputJsonDelta { partial_json } => {
                        accumulator.append_args(index, &partial_json);

                        if emit_partials {
                            match accumulator.build_partial(index) {
                                Ok(partial) => {
                                    timer.mark_first(&sender).await;
                                    sender.enqueue(StreamEvent::PartialToolCall(partial)).await;
                                }
                                Err(e) => break 'stream Err(e),
                            }
                        }
                    }
                    AnthropicBlockDelta::SignatureDelta { .. } => {}
                },

                AnthropicStreamEvent::ContentBlockStop { index } => {
                    if accumulator.contains(index) {
                        match accumulator.build(index) {
                            Ok(call) => {
                                timer.mark_first(&sender).await;
                                sender.enqueue(StreamEvent::ToolCall(call)).await;
                            }
                            Err(e) => break 'stream Err(e),
                        }
                    }
                }

                AnthropicStreamEvent::MessageDelta { delta, usage } => {
                    if let Some(reason) = delta.stop_reason {
                        let stop = match map_stop_reason(&reason) {
                            Ok(stop) => stop,
                            Err(e) => break 'stream Err(e),
                        };

                        timer.mark_first(&sender).await;
                        sender.enqueue(StreamEvent::StopReason(stop)).await;
                    }

                    let usage = ModelUsage {
                        input_token: ResourceUsage::quantity(input_usage.input_tokens),
                        input_cache_read_token: ResourceUsage::quantity(input_usage.cache_read_input_tokens),
                        output_token: ResourceUsage::quantity(usage.output_tokens),
                        output_reasoning_token: ResourceUsage::default(),
                    };

                    if !usage.is_empty() {
                        timer.mark_first(&sender).await;
                        sender.enqueue(StreamEvent::ModelUsage(usage)).await;
                    }
                }

                AnthropicStreamEvent::MessageStop => break 'stream Ok(()),

                AnthropicStreamEvent::Ping => {}

                AnthropicStreamEvent::Error { error } => {
                    log::error!("anthropic stream error event: {} - {}", error.error_type, error.message);
                    break 'stream Err(Error::Upstream {
                        status: 502,
                        message: format!("{}: {}", error.error_type, error.message),
                    });
                }
            }
        };

        outcome?;

        timer.mark_last(&sender).await;
        sender.wait(&ctx).await
    }
}
