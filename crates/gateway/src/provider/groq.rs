//! Groq.
//!
//! Speaks the OpenAI-compatible dialect; the reasoning-effort knob is
//! pinned to `"default"` for every requested level, and models that expose
//! reasoning carry a `reasoning_format` provider setting forwarded on the
//! request.

use std::sync::Arc;

use async_trait::async_trait;

use super::openai::{ChatCompletions, Dialect, ReasoningEncoding};
use crate::messages::request::TextToTextRequest;
use crate::provider::{Provider, ProviderConfig, TextToTextProvider};
use crate::sender::ServerStream;

const GROQ_CATALOG: &str = include_str!("catalogs/groq.json");

const GROQ_DIALECT: Dialect = Dialect {
    provider_id: "groq",
    default_base_url: "https://api.groq.com/openai/v1",
    reasoning: ReasoningEncoding::GroqDefault,
};

pub struct GroqProvider {
    chat: ChatCompletions,
}

impl GroqProvider {
    pub fn new(config: ProviderConfig) -> crate::Result<Self> {
        Ok(Self {
            chat: ChatCompletions::new(GROQ_DIALECT, GROQ_CATALOG, config)?,
        })
    }
}

#[async_trait]
impl Provider for GroqProvider {
    fn id(&self) -> &str {
        "groq"
    }

    fn catalog(&self) -> &'static str {
        GROQ_CATALOG
    }

    fn text_to_text(self: Arc<Self>) -> Option<Arc<dyn TextToTextProvider>> {
        Some(self)
    }
}

#[async_trait]
impl TextToTextProvider for GroqProvider {
    async fn text_to_text_stream(
        &self,
        request: TextToTextRequest,
        stream: Box<dyn ServerStream>,
    ) -> crate::Result<()> {
        self.chat.stream(request, stream).await
    }
}
