//! Cerebras.
//!
//! OpenAI-compatible dialect with no reasoning-effort knob: whatever the
//! caller requests, the field stays unset on the wire.

use std::sync::Arc;

use async_trait::async_trait;

use super::openai::{ChatCompletions, Dialect, ReasoningEncoding};
use crate::messages::request::TextToTextRequest;
use crate::provider::{Provider, ProviderConfig, TextToTextProvider};
use crate::sender::ServerStream;

const CEREBRAS_CATALOG: &str = include_str!("catalogs/cerebras.json");

const CEREBRAS_DIALECT: Dialect = Dialect {
    provider_id: "cerebras",
    default_base_url: "https://api.cerebras.ai/v1",
    reasoning: ReasoningEncoding::Unset,
};

pub struct CerebrasProvider {
    chat: ChatCompletions,
}

impl CerebrasProvider {
    pub fn new(config: ProviderConfig) -> crate::Result<Self> {
        Ok(Self {
            chat: ChatCompletions::new(CEREBRAS_DIALECT, CEREBRAS_CATALOG, config)?,
        })
    }
}

#[async_trait]
impl Provider for CerebrasProvider {
    fn id(&self) -> &str {
        "cerebras"
    }

    fn catalog(&self) -> &'static str {
        CEREBRAS_CATALOG
    }

    fn text_to_text(self: Arc<Self>) -> Option<Arc<dyn TextToTextProvider>> {
        Some(self)
    }
}

#[async_trait]
impl TextToTextProvider for CerebrasProvider {
    async fn text_to_text_stream(
        &self,
        request: TextToTextRequest,
        stream: Box<dyn ServerStream>,
    ) -> crate::Result<()> {
        self.chat.stream(request, stream).await
    }
}
