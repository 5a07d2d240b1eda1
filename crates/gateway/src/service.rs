//! Gateway service: top-level dispatch.
//!
//! Validates requests against registered model capabilities, injects
//! defaults, wraps the server stream with the post-processing interceptor
//! and routes to the resolved adapter. Also hosts the unary projections
//! and the deferred-operation surface.

mod postprocess;

use std::sync::Arc;
use std::time::Duration;

use futures::{FutureExt, StreamExt};

use self::postprocess::PostProcessor;

use crate::error::{Error, ErrorInfo, REASON_JSON_EXTRACT};
use crate::messages::request::{
    ReasoningEffort, SpeechToTextRequest, SpeechToTextStreamRequest, TextToSpeechRequest, TextToTextRequest,
};
use crate::messages::response::{
    GenerationMetrics, SpeechToTextResponse, StopReason, StreamEvent, TextToTextResponse,
};
use crate::operation::{Operation, OperationManager, OperationManagerConfig};
use crate::registry::Registry;
use crate::sender::{CollectorStream, ServerStream};

/// Default timeout for deferred text-to-text operations.
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(600);

/// The gateway service.
#[derive(Clone)]
pub struct Gateway {
    registry: Arc<Registry>,
    operations: Arc<OperationManager<TextToTextResponse>>,
}

impl Gateway {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self::with_operations(registry, OperationManagerConfig::default())
    }

    pub fn with_operations(registry: Arc<Registry>, config: OperationManagerConfig) -> Self {
        Self {
            registry,
            operations: Arc::new(OperationManager::new(config)),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn operations(&self) -> &Arc<OperationManager<TextToTextResponse>> {
        &self.operations
    }

    /// Stream a text-to-text generation through the post-processing
    /// interceptor.
    pub async fn text_to_text_stream(
        &self,
        request: TextToTextRequest,
        stream: Box<dyn ServerStream>,
    ) -> crate::Result<()> {
        let (adapter, model) = self.registry.text_to_text_provider(&request.model)?;
        model.check_not_deprecated()?;

        let config = model
            .capability
            .as_text_to_text()
            .ok_or_else(|| Error::Internal(None))?;

        let mut request = request;

        if !request.tools.is_empty() && !config.tool_call {
            return Err(Error::InvalidRequest(format!(
                "model '{}' does not support tool calling",
                request.model
            )));
        }

        if let Some(crate::messages::request::ToolChoice::Tool { name }) = &request.configuration.tool_choice
            && request.tool(name).is_none()
        {
            return Err(Error::InvalidRequest(format!(
                "tool choice references undeclared tool '{name}'"
            )));
        }

        if request.configuration.reasoning_effort != ReasoningEffort::Unspecified && !config.reasoning {
            log::debug!(
                "model '{}' has no reasoning support, dropping requested effort",
                request.model
            );
            request.configuration.reasoning_effort = ReasoningEffort::Unspecified;
        }

        match request.configuration.max_tokens {
            None => request.configuration.max_tokens = Some(config.output_token_limit),
            Some(requested) if requested > config.output_token_limit => {
                log::debug!(
                    "clamping max_tokens from {requested} to the model limit {}",
                    config.output_token_limit
                );
                request.configuration.max_tokens = Some(config.output_token_limit);
            }
            Some(_) => {}
        }

        let post = PostProcessor::new(stream, &request, model.pricing);
        adapter.text_to_text_stream(request, Box::new(post)).await
    }

    /// Unary projection: run the stream to completion and fold it into a
    /// single response. Ttlb is preserved; ttfb is meaningless for a unary
    /// call and stays unset.
    pub async fn text_to_text(&self, request: TextToTextRequest) -> crate::Result<TextToTextResponse> {
        let extract = request.configuration.extract_json_object;

        let collector = CollectorStream::new();
        self.text_to_text_stream(request, Box::new(collector.clone())).await?;

        let mut response = fold_stream(collector.events());

        if extract {
            response.structured_content = Some(extract_json_object(&response.content)?);
        }

        Ok(response)
    }

    /// Deferred unary generation through the operation manager.
    /// Idempotent on `id`.
    pub fn text_to_text_operation(
        &self,
        id: &str,
        request: TextToTextRequest,
        timeout: Option<Duration>,
    ) -> Operation<TextToTextResponse> {
        let gateway = self.clone();
        let operation_request = serde_json::to_value(&request).unwrap_or(serde_json::Value::Null);

        self.operations.create_operation(
            id,
            operation_request,
            Box::new(move |handle| {
                async move {
                    handle.log(format!("dispatching generation for {}", request.model));
                    let response = gateway.text_to_text(request).await?;
                    handle.log("generation complete");
                    Ok(response)
                }
                .boxed()
            }),
            timeout.unwrap_or(DEFAULT_OPERATION_TIMEOUT),
        )
    }

    /// Unary transcription.
    pub async fn speech_to_text(&self, request: SpeechToTextRequest) -> crate::Result<SpeechToTextResponse> {
        let (adapter, model) = self.registry.speech_to_text_provider(&request.model)?;
        model.check_not_deprecated()?;

        adapter.speech_to_text(request).await
    }

    /// Streaming transcription. The client's first event names the model;
    /// the gateway resolves it, then hands the full request stream
    /// (configuration re-attached) to the adapter.
    pub async fn speech_to_text_stream(
        &self,
        mut requests: crate::provider::RequestStream,
        stream: Box<dyn ServerStream>,
    ) -> crate::Result<()> {
        let configuration = match requests.next().await {
            Some(Ok(SpeechToTextStreamRequest::Configuration { model, audio_format })) => {
                SpeechToTextStreamRequest::Configuration { model, audio_format }
            }
            Some(Ok(SpeechToTextStreamRequest::Audio { .. })) | None => {
                return Err(Error::InvalidRequest(
                    "speech-to-text streams must begin with a configuration event".into(),
                ));
            }
            Some(Err(e)) => return Err(e),
        };

        let SpeechToTextStreamRequest::Configuration { model: model_name, .. } = &configuration else {
            return Err(Error::Internal(None));
        };

        let (adapter, model) = self.registry.speech_to_text_stream_provider(model_name)?;
        model.check_not_deprecated()?;

        let requests: crate::provider::RequestStream =
            Box::pin(futures::stream::once(async move { Ok(configuration) }).chain(requests));

        adapter.speech_to_text_stream(requests, stream).await
    }

    /// Streaming synthesis.
    pub async fn text_to_speech_stream(
        &self,
        request: TextToSpeechRequest,
        stream: Box<dyn ServerStream>,
    ) -> crate::Result<()> {
        let (adapter, model) = self.registry.text_to_speech_provider(&request.model)?;
        model.check_not_deprecated()?;

        // The adapter maps the voice itself; the registry lookup rejects
        // voices that were never created before any upstream work starts.
        self.registry.get_voice(&request.voice)?;

        adapter.text_to_speech_stream(request, stream).await
    }
}

/// Fold a collected canonical stream into a unary response.
fn fold_stream(events: Vec<StreamEvent>) -> TextToTextResponse {
    let mut response = TextToTextResponse {
        content: String::new(),
        reasoning: None,
        structured_content: None,
        tool_calls: Vec::new(),
        stop_reason: StopReason::Unspecified,
        model_usage: Default::default(),
        generation_metrics: GenerationMetrics::default(),
    };

    for event in events {
        match event {
            StreamEvent::ContentChunk { text } => response.content.push_str(&text),
            StreamEvent::ReasoningChunk { text } => {
                response.reasoning.get_or_insert_with(String::new).push_str(&text);
            }
            StreamEvent::ToolCall(call) => response.tool_calls.push(call),
            StreamEvent::StopReason(stop) => response.stop_reason = stop,
            // The interceptor emits running totals; the last one wins.
            StreamEvent::ModelUsage(usage) => response.model_usage = usage,
            StreamEvent::GenerationMetrics(metrics) => {
                if let Some(ttlb) = metrics.ttlb {
                    response.generation_metrics.ttlb = Some(ttlb);
                }
            }
            // Partials are a streaming affordance; the fold keeps finals.
            StreamEvent::PartialToolCall(_) => {}
            StreamEvent::AudioFormat(_)
            | StreamEvent::AudioChunk(_)
            | StreamEvent::TurnStart { .. }
            | StreamEvent::TurnUpdate { .. }
            | StreamEvent::TurnEnd { .. } => {
                log::warn!("ignoring non-text event in text-to-text fold");
            }
        }
    }

    response
}

/// Extract the first balanced JSON object from generated text.
fn extract_json_object(content: &str) -> crate::Result<serde_json::Value> {
    let failure = || {
        Error::JsonExtract(Box::new(ErrorInfo::new(
            REASON_JSON_EXTRACT,
            [("content".to_string(), content.to_string())],
        )))
    };

    let bytes = content.as_bytes();
    let start = content.find('{').ok_or_else(failure)?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape = false;

    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if in_string {
            if escape {
                escape = false;
            } else if byte == b'\\' {
                escape = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }

        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    let candidate = &content[start..=start + offset];
                    return serde_json::from_str(candidate).map_err(|_| failure());
                }
            }
            _ => {}
        }
    }

    Err(failure())
}
