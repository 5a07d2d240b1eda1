//! xAI.
//!
//! Chat runs over the OpenAI-compatible dialect with the effort-style
//! reasoning knob. Realtime transcription runs over WebSocket with
//! voice-activity framing: `start`/`end` events bracket a turn,
//! `speech_recognized` events carry interim hypotheses until `is_final`
//! promotes them onto the accumulated transcript.

use std::sync::Arc;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use futures::{SinkExt, StreamExt};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;

use super::openai::{ChatCompletions, Dialect, ReasoningEncoding};
use crate::error::Error;
use crate::messages::request::{SpeechToTextStreamRequest, TextToTextRequest};
use crate::provider::turns::TurnState;
use crate::provider::{
    GenerationTimer, Provider, ProviderConfig, RequestStream, SpeechToTextStreamProvider, TextToTextProvider,
};
use crate::sender::{AsyncSender, ServerStream};

const XAI_CATALOG: &str = include_str!("catalogs/xai.json");
const DEFAULT_XAI_WS_URL: &str = "wss://api.x.ai/v1";

const XAI_DIALECT: Dialect = Dialect {
    provider_id: "xai",
    default_base_url: "https://api.x.ai/v1",
    reasoning: ReasoningEncoding::Effort,
};

pub struct XaiProvider {
    chat: ChatCompletions,
    ws_url: String,
    config: ProviderConfig,
}

/// Outbound realtime frame.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RealtimeFrame {
    Audio { audio: String },
}

/// Inbound realtime events.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RealtimeEvent {
    /// Voice activity began.
    Start,
    /// Voice activity ended.
    End,
    SpeechRecognized {
        text: String,
        #[serde(default)]
        is_final: bool,
    },
}

impl XaiProvider {
    pub fn new(config: ProviderConfig) -> crate::Result<Self> {
        let ws_url = config
            .base_url
            .clone()
            .map(|url| url.replacen("http", "ws", 1))
            .unwrap_or_else(|| DEFAULT_XAI_WS_URL.to_string());

        Ok(Self {
            chat: ChatCompletions::new(XAI_DIALECT, XAI_CATALOG, config.clone())?,
            ws_url,
            config,
        })
    }
}

#[async_trait]
impl Provider for XaiProvider {
    fn id(&self) -> &str {
        "xai"
    }

    fn catalog(&self) -> &'static str {
        XAI_CATALOG
    }

    fn text_to_text(self: Arc<Self>) -> Option<Arc<dyn TextToTextProvider>> {
        Some(self)
    }

    fn speech_to_text_stream(self: Arc<Self>) -> Option<Arc<dyn SpeechToTextStreamProvider>> {
        Some(self)
    }
}

#[async_trait]
impl TextToTextProvider for XaiProvider {
    async fn text_to_text_stream(
        &self,
        request: TextToTextRequest,
        stream: Box<dyn ServerStream>,
    ) -> crate::Result<()> {
        self.chat.stream(request, stream).await
    }
}

#[async_trait]
impl SpeechToTextStreamProvider for XaiProvider {
    async fn speech_to_text_stream(
        &self,
        mut requests: RequestStream,
        stream: Box<dyn ServerStream>,
    ) -> crate::Result<()> {
        let (model_name, _audio_format) = match requests.next().await {
            Some(Ok(SpeechToTextStreamRequest::Configuration { model, audio_format })) => (model, audio_format),
            Some(Ok(SpeechToTextStreamRequest::Audio { .. })) | None => {
                return Err(Error::InvalidRequest(
                    "speech-to-text streams must begin with a configuration event".into(),
                ));
            }
            Some(Err(e)) => return Err(e),
        };

        let model = self.chat.models().resolve_speech_to_text(&model_name)?;
        let api_key = self.config.require_api_key("xai")?;

        let url = format!("{}/realtime/transcribe?model={}", self.ws_url, model.provider_model_id);

        let mut ws_request = url
            .into_client_request()
            .map_err(|e| Error::InvalidRequest(format!("invalid websocket url: {e}")))?;
        ws_request.headers_mut().insert(
            http::header::AUTHORIZATION,
            format!("Bearer {}", api_key.expose_secret())
                .parse()
                .map_err(|_| Error::InvalidRequest("API key is not a valid header value".into()))?,
        );

        let (socket, _) = connect_async(ws_request)
            .await
            .map_err(|e| Error::Connection(format!("failed to open realtime socket: {e}")))?;
        let (mut ws_out, mut ws_in) = socket.split();

        let ctx = stream.context().clone();
        let sender = AsyncSender::spawn(stream);
        let mut timer = GenerationTimer::start();
        let mut turns = TurnState::new();

        let writer_ctx = ctx.clone();
        let writer = tokio::spawn(async move {
            loop {
                let request = tokio::select! {
                    _ = writer_ctx.cancelled() => break,
                    request = requests.next() => request,
                };

                match request {
                    Some(Ok(SpeechToTextStreamRequest::Audio { data })) => {
                        let frame = RealtimeFrame::Audio {
                            audio: STANDARD.encode(data),
                        };

                        let Ok(text) = serde_json::to_string(&frame) else {
                            continue;
                        };

                        if ws_out.send(WsMessage::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(SpeechToTextStreamRequest::Configuration { .. })) => {
                        log::warn!("ignoring duplicate configuration event");
                    }
                    Some(Err(e)) => {
                        log::debug!("client audio stream failed: {e}");
                        break;
                    }
                    None => {
                        let _ = ws_out.send(WsMessage::Close(None)).await;
                        break;
                    }
                }
            }
        });

        let outcome: crate::Result<()> = 'stream: loop {
            let message = tokio::select! {
                _ = ctx.cancelled() => break 'stream Err(Error::Canceled),
                message = ws_in.next() => message,
            };

            let Some(message) = message else {
                break 'stream Ok(());
            };

            let message = match message {
                Ok(message) => message,
                Err(e) => break 'stream Err(Error::Connection(format!("realtime socket failed: {e}"))),
            };

            let text = match message {
                WsMessage::Text(text) => text,
                WsMessage::Close(_) => break 'stream Ok(()),
                _ => continue,
            };

            let event: RealtimeEvent = match serde_json::from_str(&text) {
                Ok(event) => event,
                Err(e) => break 'stream Err(Error::Protocol(format!("malformed realtime event: {e}"))),
            };

            match event {
                RealtimeEvent::Start => {
                    timer.mark_first(&sender).await;
                    sender.enqueue(turns.begin()).await;
                }
                RealtimeEvent::SpeechRecognized { text, is_final } => {
                    if !turns.in_turn() {
                        log::debug!("dropping recognition outside a turn");
                        continue;
                    }

                    timer.mark_first(&sender).await;
                    let event = if is_final { turns.finalize(&text) } else { turns.interim(&text) };
                    sender.enqueue(event).await;
                }
                RealtimeEvent::End => {
                    if turns.in_turn() {
                        timer.mark_first(&sender).await;
                        sender.enqueue(turns.end()).await;
                    }
                }
            }
        };

        writer.abort();
        outcome?;

        timer.mark_last(&sender).await;
        sender.wait(&ctx).await
    }
}
