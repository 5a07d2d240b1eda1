//! Provider adapters.
//!
//! A provider registers a capability set (text-to-text, speech-to-text,
//! streaming speech-to-text, text-to-speech) and ships an embedded model
//! catalog. Each adapter translates canonical requests into its upstream's
//! wire format, drives the upstream stream and produces canonical events
//! through an [`AsyncSender`](crate::sender::AsyncSender).

pub(crate) mod http_client;
pub(crate) mod turns;

pub mod anthropic;
pub mod cartesia;
pub mod cerebras;
pub mod elevenlabs;
pub mod google;
pub mod groq;
pub mod openai;
pub mod xai;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use secrecy::SecretString;

use crate::catalog::{Capability, Catalog, Model, TextToSpeechConfig, TextToTextConfig, validate_model};
use crate::error::Error;
use crate::messages::request::{
    SpeechToTextRequest, SpeechToTextStreamRequest, TextToSpeechRequest, TextToTextRequest,
};
use crate::messages::response::SpeechToTextResponse;
use crate::resource::ModelName;
use crate::sender::ServerStream;

/// Client-to-server event stream for streaming speech-to-text.
pub type RequestStream = BoxStream<'static, crate::Result<SpeechToTextStreamRequest>>;

/// A registered upstream provider.
///
/// Capability accessors return `None` by default; providers override the
/// ones they implement. The registry uses these to gate dispatch.
#[async_trait]
pub trait Provider: Send + Sync + 'static {
    /// Stable provider identifier, the `{provider}` segment of model names.
    fn id(&self) -> &str;

    /// Embedded JSON catalog of models and voices.
    fn catalog(&self) -> &'static str;

    /// Called once at registration, before the provider serves traffic.
    async fn start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called at shutdown; must be idempotent.
    async fn stop(&self) {}

    fn text_to_text(self: Arc<Self>) -> Option<Arc<dyn TextToTextProvider>> {
        None
    }

    fn speech_to_text(self: Arc<Self>) -> Option<Arc<dyn SpeechToTextProvider>> {
        None
    }

    fn speech_to_text_stream(self: Arc<Self>) -> Option<Arc<dyn SpeechToTextStreamProvider>> {
        None
    }

    fn text_to_speech(self: Arc<Self>) -> Option<Arc<dyn TextToSpeechProvider>> {
        None
    }
}

#[async_trait]
pub trait TextToTextProvider: Send + Sync {
    /// Drive one generation stream to completion, writing canonical events
    /// to `stream` in enqueue order.
    async fn text_to_text_stream(
        &self,
        request: TextToTextRequest,
        stream: Box<dyn ServerStream>,
    ) -> crate::Result<()>;
}

#[async_trait]
pub trait SpeechToTextProvider: Send + Sync {
    async fn speech_to_text(&self, request: SpeechToTextRequest) -> crate::Result<SpeechToTextResponse>;
}

#[async_trait]
pub trait SpeechToTextStreamProvider: Send + Sync {
    /// Bidirectional transcription: consumes client configuration and audio
    /// frames, produces turn events.
    async fn speech_to_text_stream(
        &self,
        requests: RequestStream,
        stream: Box<dyn ServerStream>,
    ) -> crate::Result<()>;
}

#[async_trait]
pub trait TextToSpeechProvider: Send + Sync {
    /// Synthesize `request.text`, emitting one `AudioFormat` followed by
    /// densely indexed `AudioChunk`s.
    async fn text_to_speech_stream(
        &self,
        request: TextToSpeechRequest,
        stream: Box<dyn ServerStream>,
    ) -> crate::Result<()>;
}

/// Connection settings shared by every adapter.
#[derive(Debug, Clone, Default)]
pub struct ProviderConfig {
    pub api_key: Option<SecretString>,
    /// Overrides the upstream's default endpoint; used by tests and
    /// self-hosted deployments.
    pub base_url: Option<String>,
}

impl ProviderConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(SecretString::from(api_key.into())),
            base_url: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub(crate) fn require_api_key(&self, provider: &str) -> crate::Result<&SecretString> {
        self.api_key
            .as_ref()
            .ok_or_else(|| Error::InvalidRequest(format!("no API key configured for provider '{provider}'")))
    }
}

/// Per-provider model lookup built from the embedded catalog.
///
/// Adapters resolve models through their own map so they stay
/// self-sufficient: callers have already validated the request, but an
/// adapter under test has nothing else to lean on.
#[derive(Debug)]
pub struct ModelMap {
    provider_id: String,
    models: BTreeMap<String, Arc<Model>>,
}

impl ModelMap {
    /// Strict-parse the provider's catalog and validate every model.
    pub fn from_catalog(provider_id: &str, raw: &str) -> crate::Result<Self> {
        let catalog = Catalog::parse(raw)?;
        let mut models = BTreeMap::new();

        for entry in catalog.models {
            let model = entry.into_model(provider_id);
            validate_model(&model)?;
            models.insert(model.model_name()?.model_id, Arc::new(model));
        }

        Ok(Self {
            provider_id: provider_id.to_string(),
            models,
        })
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    pub fn models(&self) -> impl Iterator<Item = &Arc<Model>> {
        self.models.values()
    }

    /// Resolve a model resource name against this provider, with the
    /// deprecation gate applied.
    pub fn resolve(&self, name: &str) -> crate::Result<Arc<Model>> {
        let parsed = ModelName::parse(name)?;

        if parsed.provider_id != self.provider_id {
            return Err(Error::InvalidRequest(format!(
                "model '{name}' does not belong to provider '{}'",
                self.provider_id
            )));
        }

        let model = self
            .models
            .get(&parsed.model_id)
            .ok_or_else(|| Error::ModelNotFound(name.to_string()))?;

        model.check_not_deprecated()?;

        Ok(Arc::clone(model))
    }

    /// Resolve and assert the text-to-text capability.
    pub fn resolve_text_to_text(&self, name: &str) -> crate::Result<(Arc<Model>, TextToTextConfig)> {
        let model = self.resolve(name)?;

        let config = model
            .capability
            .as_text_to_text()
            .cloned()
            .ok_or_else(|| Error::CapabilityMismatch {
                model: name.to_string(),
                capability: "text-to-text",
            })?;

        Ok((model, config))
    }

    /// Resolve and assert the text-to-speech capability.
    pub fn resolve_text_to_speech(&self, name: &str) -> crate::Result<(Arc<Model>, TextToSpeechConfig)> {
        let model = self.resolve(name)?;

        let config = model
            .capability
            .as_text_to_speech()
            .cloned()
            .ok_or_else(|| Error::CapabilityMismatch {
                model: name.to_string(),
                capability: "text-to-speech",
            })?;

        Ok((model, config))
    }

    /// Resolve and assert the speech-to-text capability.
    pub fn resolve_speech_to_text(&self, name: &str) -> crate::Result<Arc<Model>> {
        let model = self.resolve(name)?;

        match model.capability {
            Capability::SpeechToText(_) => Ok(model),
            _ => Err(Error::CapabilityMismatch {
                model: name.to_string(),
                capability: "speech-to-text",
            }),
        }
    }
}

/// Tracks the once-per-stream latency metrics.
///
/// `mark_first` enqueues Ttfb ahead of the first non-empty event;
/// `mark_last` enqueues Ttlb when the upstream loop exits.
pub(crate) struct GenerationTimer {
    started: std::time::Instant,
    ttfb_emitted: bool,
}

impl GenerationTimer {
    pub(crate) fn start() -> Self {
        Self {
            started: std::time::Instant::now(),
            ttfb_emitted: false,
        }
    }

    pub(crate) async fn mark_first(&mut self, sender: &crate::sender::AsyncSender) {
        if self.ttfb_emitted {
            return;
        }
        self.ttfb_emitted = true;

        sender
            .enqueue(crate::messages::response::StreamEvent::GenerationMetrics(
                crate::messages::response::GenerationMetrics::ttfb(self.started.elapsed()),
            ))
            .await;
    }

    pub(crate) async fn mark_last(&self, sender: &crate::sender::AsyncSender) {
        sender
            .enqueue(crate::messages::response::StreamEvent::GenerationMetrics(
                crate::messages::response::GenerationMetrics::ttlb(self.started.elapsed()),
            ))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Code;

    const CATALOG: &str = r#"{
        "models": [
            {
                "id": "chat",
                "provider_model_id": "chat-1",
                "capability": {
                    "type": "text_to_text",
                    "context_token_limit": 128000,
                    "output_token_limit": 16000,
                    "tool_call": true
                }
            },
            {
                "id": "listen",
                "provider_model_id": "listen-1",
                "capability": { "type": "speech_to_text" }
            }
        ]
    }"#;

    #[test]
    fn resolves_models_for_its_own_provider() {
        let map = ModelMap::from_catalog("acme", CATALOG).unwrap();

        let (model, config) = map.resolve_text_to_text("providers/acme/models/chat").unwrap();
        assert_eq!(model.provider_model_id, "chat-1");
        assert!(config.tool_call);

        let err = map.resolve("providers/other/models/chat").unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);

        let err = map.resolve("providers/acme/models/ghost").unwrap_err();
        assert_eq!(err.code(), Code::NotFound);
    }

    #[test]
    fn capability_mismatch_is_invalid_argument_at_the_adapter() {
        let map = ModelMap::from_catalog("acme", CATALOG).unwrap();

        let err = map.resolve_text_to_text("providers/acme/models/listen").unwrap_err();
        assert!(matches!(err, Error::CapabilityMismatch { .. }));

        assert!(map.resolve_speech_to_text("providers/acme/models/listen").is_ok());
    }
}
