//! Google GenAI.
//!
//! Two routes to the same models: the native `streamGenerateContent` SSE
//! surface (the default), and Google's OpenAI-compatible shim for
//! deployments that standardize on the chat-completions dialect. Function
//! calls on the native surface deliver their full argument map in a single
//! structured delta.

pub(crate) mod input;
pub(crate) mod output;

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::{Client, header::CONTENT_TYPE};
use secrecy::ExposeSecret;

use self::output::{GoogleStreamChunk, map_finish_reason};

use super::openai::{ChatCompletions, Dialect, ReasoningEncoding};
use crate::error::Error;
use crate::messages::request::TextToTextRequest;
use crate::messages::response::StreamEvent;
use crate::provider::http_client::default_http_client_builder;
use crate::provider::{GenerationTimer, ModelMap, Provider, ProviderConfig, TextToTextProvider};
use crate::sender::{AsyncSender, ServerStream};
use crate::toolcall::ToolCallAccumulator;

const GOOGLE_CATALOG: &str = include_str!("catalogs/google.json");
const DEFAULT_GOOGLE_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_GOOGLE_OPENAI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai";

const SENDER_CAPACITY: usize = 100;

pub struct GoogleProvider {
    client: Client,
    base_url: String,
    config: ProviderConfig,
    models: ModelMap,
}

impl GoogleProvider {
    pub fn new(config: ProviderConfig) -> crate::Result<Self> {
        let client = default_http_client_builder(Default::default()).build().map_err(|e| {
            log::error!("failed to create HTTP client for google: {e}");
            Error::Internal(None)
        })?;

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_GOOGLE_API_URL.to_string());

        Ok(Self {
            client,
            base_url,
            config,
            models: ModelMap::from_catalog("google", GOOGLE_CATALOG)?,
        })
    }
}

#[async_trait]
impl Provider for GoogleProvider {
    fn id(&self) -> &str {
        "google"
    }

    fn catalog(&self) -> &'static str {
        GOOGLE_CATALOG
    }

    fn text_to_text(self: Arc<Self>) -> Option<Arc<dyn TextToTextProvider>> {
        Some(self)
    }
}

#[async_trait]
impl TextToTextProvider for GoogleProvider {
    async fn text_to_text_stream(
        &self,
        request: TextToTextRequest,
        stream: Box<dyn ServerStream>,
    ) -> crate::Result<()> {
        let (model, ttt_config) = self.models.resolve_text_to_text(&request.model)?;
        let body = input::build_request(&model, &ttt_config, &request)?;
        let api_key = self.config.require_api_key("google")?;

        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse&key={}",
            self.base_url,
            model.provider_model_id,
            api_key.expose_secret()
        );

        let body = sonic_rs::to_vec(&body).map_err(|e| {
            log::error!("failed to serialize google streaming request: {e}");
            Error::Internal(None)
        })?;

        let response = self
            .client
            .post(url)
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

        // Function-call parts carry no block index; number them ourselves.
        let mut next_call_index: u32 = 0;
        let mut stop_emitted = false;

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

            let chunk: GoogleStreamChunk = match sonic_rs::from_str(&event.data) {
                Ok(chunk) => chunk,
                Err(e) => {
                    log::warn!("failed to parse google streaming chunk: {e}");
                    break 'stream Err(Error::Protocol(format!("malformed stream chunk: {e}")));
                }
            };

            for candidate in chunk.candidates {
                for part in candidate.content.into_iter().flat_map(|content| content.parts) {
                    if let Some(text) = part.text {
                        if text.is_empty() {
                            continue;
                        }

                        timer.mark_first(&sender).await;
                        if part.thought {
                            sender.enqueue(StreamEvent::ReasoningChunk { text }).await;
                        } else {
                            sender.enqueue(StreamEvent::ContentChunk { text }).await;
                        }
                    } else if let Some(call) = part.function_call {
                        let index = next_call_index;
                        next_call_index += 1;

                        let id = synthesize_call_id(&call.name);
                        accumulator.start_or_update(index, Some(id), Some(call.name));

                        for (path, value) in call.args {
                            if let Err(e) = accumulator.append_arg(index, &path, value) {
                                break 'stream Err(e);
                            }
                        }

                        if emit_partials {
                            match accumulator.build_partial(index) {
                                Ok(partial) => {
                                    timer.mark_first(&sender).await;
                                    sender.enqueue(StreamEvent::PartialToolCall(partial)).await;
                                }
                                Err(e) => break 'stream Err(e),
                            }
                        }

                        // Arguments arrive whole; the call is final now.
                        match accumulator.build(index) {
                            Ok(call) => {
                                timer.mark_first(&sender).await;
                                sender.enqueue(StreamEvent::ToolCall(call)).await;
                            }
                            Err(e) => break 'stream Err(e),
                        }
                    } else if part.inline_data.is_some() {
                        // Image output has no canonical text-to-text event.
                        log::debug!("dropping inline-data part from google stream");
                    }
                }

                if let Some(reason) = candidate.finish_reason {
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

            if let Some(usage) = chunk.usage_metadata {
                let usage = match usage.into_model_usage() {
                    Ok(usage) => usage,
                    Err(e) => break 'stream Err(e),
                };

                if !usage.is_empty() {
                    timer.mark_first(&sender).await;
                    sender.enqueue(StreamEvent::ModelUsage(usage)).await;
                }
            }
        };

        outcome?;

        timer.mark_last(&sender).await;
        sender.wait(&ctx).await
    }
}

/// Tool-call ids for the native surface: `call_<name>_<unix-nanos>`.
fn synthesize_call_id(name: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();

    format!("call_{name}_{nanos}")
}

/// Google through the OpenAI-compatible shim.
///
/// Reasoning arrives as thought-flagged content deltas; the chat engine
/// normalizes those onto the canonical reasoning channel.
pub struct GoogleOpenAiProvider {
    chat: ChatCompletions,
}

const GOOGLE_OPENAI_DIALECT: Dialect = Dialect {
    provider_id: "google",
    default_base_url: DEFAULT_GOOGLE_OPENAI_API_URL,
    reasoning: ReasoningEncoding::Effort,
};

impl GoogleOpenAiProvider {
    pub fn new(config: ProviderConfig) -> crate::Result<Self> {
        Ok(Self {
            chat: ChatCompletions::new(GOOGLE_OPENAI_DIALECT, GOOGLE_CATALOG, config)?,
        })
    }
}

#[async_trait]
impl Provider for GoogleOpenAiProvider {
    fn id(&self) -> &str {
        "google"
    }

    fn catalog(&self) -> &'static str {
        GOOGLE_CATALOG
    }

    fn text_to_text(self: Arc<Self>) -> Option<Arc<dyn TextToTextProvider>> {
        Some(self)
    }
}

#[async_trait]
impl TextToTextProvider for GoogleOpenAiProvider {
    async fn text_to_text_stream(
        &self,
        request: TextToTextRequest,
        stream: Box<dyn ServerStream>,
    ) -> crate::Result<()> {
        self.chat.stream(request, stream).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::request::{GenerationConfig, Message};
    use crate::messages::response::StopReason;
    use crate::sender::CollectorStream;
    use axum::{Router, extract::Path, http::header, response::IntoResponse, routing::post};

    async fn spawn_sse_server(body: &'static str) -> String {
        let app = Router::new().route(
            "/models/{action}",
            post(move |Path(_): Path<String>| async move {
                ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        format!("http://{address}")
    }

    fn request() -> TextToTextRequest {
        TextToTextRequest {
            model: "providers/google/models/gemini-2.5-flash".into(),
            messages: vec![Message::user("hi")],
            tools: Vec::new(),
            configuration: GenerationConfig {
                stream_partial_tool_calls: true,
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn thought_parts_and_function_calls_translate() {
        let body = concat!(
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"pondering\",\"thought\":true}]}}]}\n\n",
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"functionCall\":{\"name\":\"f\",\"args\":{\"a\":1}}}]},\"finishReason\":\"STOP\"}],\"usageMetadata\":{\"promptTokenCount\":6,\"candidatesTokenCount\":3,\"thoughtsTokenCount\":2}}\n\n",
        );

        let url = spawn_sse_server(body).await;
        let provider = GoogleProvider::new(ProviderConfig::new("test-key").with_base_url(url)).unwrap();
        let collector = CollectorStream::new();

        provider
            .text_to_text_stream(request(), Box::new(collector.clone()))
            .await
            .unwrap();

        let events = collector.events();

        assert!(
            events
                .iter()
                .any(|e| matches!(e, StreamEvent::ReasoningChunk { text } if text == "pondering"))
        );

        let call = events
            .iter()
            .find_map(|e| match e {
                StreamEvent::ToolCall(call) => Some(call.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(call.name, "f");
        assert_eq!(call.arguments, serde_json::json!({"a": 1}));
        assert!(call.id.starts_with("call_f_"));

        // The structured delta also produced one partial before the final.
        let partial_index = events
            .iter()
            .position(|e| matches!(e, StreamEvent::PartialToolCall(_)))
            .unwrap();
        let final_index = events
            .iter()
            .position(|e| matches!(e, StreamEvent::ToolCall(_)))
            .unwrap();
        assert!(partial_index < final_index);

        assert!(events.iter().any(|e| matches!(e, StreamEvent::StopReason(StopReason::EndTurn))));

        let usage = events
            .iter()
            .find_map(|e| match e {
                StreamEvent::ModelUsage(usage) => Some(*usage),
                _ => None,
            })
            .unwrap();
        assert_eq!(usage.input_token.quantity, 6);
        assert_eq!(usage.output_token.quantity, 3);
        assert_eq!(usage.output_reasoning_token.quantity, 2);
    }

    #[tokio::test]
    async fn unknown_finish_reason_fails_the_stream() {
        let body = "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"x\"}]},\"finishReason\":\"OTHER\"}]}\n\n";

        let url = spawn_sse_server(body).await;
        let provider = GoogleProvider::new(ProviderConfig::new("test-key").with_base_url(url)).unwrap();

        let err = provider
            .text_to_text_stream(request(), Box::new(CollectorStream::new()))
            .await
            .unwrap_err();

        assert_eq!(err.code(), crate::error::Code::Internal);
    }
}
