//! ElevenLabs.
//!
//! Three capabilities: unary transcription over multipart REST, streaming
//! synthesis over REST, and realtime transcription over WebSocket. The
//! realtime socket runs two loops: client audio frames go out as
//! base64-framed packets, provider events come back and are projected onto
//! turns.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use futures::{SinkExt, StreamExt};
use reqwest::{Client, header::CONTENT_TYPE};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;

use crate::catalog::Catalog;
use crate::error::Error;
use crate::messages::audio::AudioFormat;
use crate::messages::request::{SpeechToTextRequest, SpeechToTextStreamRequest, TextToSpeechRequest};
use crate::messages::response::{AudioChunk, SpeechToTextResponse, StreamEvent};
use crate::provider::http_client::default_http_client_builder;
use crate::provider::turns::TurnState;
use crate::provider::{
    GenerationTimer, ModelMap, Provider, ProviderConfig, RequestStream, SpeechToTextProvider,
    SpeechToTextStreamProvider, TextToSpeechProvider,
};
use crate::sender::{AsyncSender, ServerStream};

const ELEVENLABS_CATALOG: &str = include_str!("catalogs/elevenlabs.json");
const DEFAULT_ELEVENLABS_API_URL: &str = "https://api.elevenlabs.io/v1";
const DEFAULT_ELEVENLABS_WS_URL: &str = "wss://api.elevenlabs.io/v1";

/// Duration of the silence packet that flushes the final commit.
const COMMIT_SILENCE_MILLIS: u32 = 100;

pub struct ElevenLabsProvider {
    client: Client,
    base_url: String,
    ws_url: String,
    config: ProviderConfig,
    models: ModelMap,
    /// voice resource name → upstream voice id, from the embedded catalog.
    voices: HashMap<String, String>,
}

/// Outbound realtime frame.
#[derive(Debug, Serialize)]
struct RealtimeAudioFrame {
    audio_chunk: String,
    commit: bool,
}

/// Inbound realtime events.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RealtimeEvent {
    TurnStart,
    InterimTranscript { text: String },
    CommittedTranscript { text: String },
}

impl ElevenLabsProvider {
    pub fn new(config: ProviderConfig) -> crate::Result<Self> {
        let client = default_http_client_builder(Default::default()).build().map_err(|e| {
            log::error!("failed to create HTTP client for elevenlabs: {e}");
            Error::Internal(None)
        })?;

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_ELEVENLABS_API_URL.to_string());

        // REST overrides double as WS overrides in tests.
        let ws_url = config
            .base_url
            .clone()
            .map(|url| url.replacen("http", "ws", 1))
            .unwrap_or_else(|| DEFAULT_ELEVENLABS_WS_URL.to_string());

        let catalog = Catalog::parse(ELEVENLABS_CATALOG)?;
        let voices = catalog
            .voices
            .into_iter()
            .map(|voice| voice.into_voice())
            .flat_map(|voice| {
                voice
                    .mappings
                    .iter()
                    .map(|mapping| (voice.name.clone(), mapping.provider_voice_id.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();

        Ok(Self {
            client,
            base_url,
            ws_url,
            config,
            models: ModelMap::from_catalog("elevenlabs", ELEVENLABS_CATALOG)?,
            voices,
        })
    }

    fn voice_id(&self, voice: &str) -> crate::Result<&str> {
        self.voices
            .get(voice)
            .map(String::as_str)
            .ok_or_else(|| Error::VoiceNotFound(voice.to_string()))
    }
}

#[async_trait]
impl Provider for ElevenLabsProvider {
    fn id(&self) -> &str {
        "elevenlabs"
    }

    fn catalog(&self) -> &'static str {
        ELEVENLABS_CATALOG
    }

    fn speech_to_text(self: Arc<Self>) -> Option<Arc<dyn SpeechToTextProvider>> {
        Some(self)
    }

    fn speech_to_text_stream(self: Arc<Self>) -> Option<Arc<dyn SpeechToTextStreamProvider>> {
        Some(self)
    }

    fn text_to_speech(self: Arc<Self>) -> Option<Arc<dyn TextToSpeechProvider>> {
        Some(self)
    }
}

#[async_trait]
impl SpeechToTextProvider for ElevenLabsProvider {
    async fn speech_to_text(&self, request: SpeechToTextRequest) -> crate::Result<SpeechToTextResponse> {
        let model = self.models.resolve_speech_to_text(&request.model)?;
        let api_key = self.config.require_api_key("elevenlabs")?;

        let file = reqwest::multipart::Part::bytes(request.audio)
            .file_name("audio.pcm")
            .mime_str("application/octet-stream")
            .map_err(|e| Error::InvalidRequest(format!("invalid audio payload: {e}")))?;

        let form = reqwest::multipart::Form::new()
            .text("model_id", model.provider_model_id.clone())
            .part("file", file);

        let response = self
            .client
            .post(format!("{}/speech-to-text", self.base_url))
            .header("xi-api-key", api_key.expose_secret())
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Connection(format!("failed to send transcription request: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "unknown error".to_string());
            return Err(Error::from_upstream_status(status.as_u16(), error_text));
        }

        #[derive(Deserialize)]
        struct TranscriptionResponse {
            text: String,
        }

        let transcription: TranscriptionResponse = response.json().await.map_err(|e| {
            log::error!("failed to parse transcription response: {e}");
            Error::Internal(None)
        })?;

        Ok(SpeechToTextResponse {
            text: transcription.text,
        })
    }
}

#[async_trait]
impl TextToSpeechProvider for ElevenLabsProvider {
    async fn text_to_speech_stream(
        &self,
        request: TextToSpeechRequest,
        stream: Box<dyn ServerStream>,
    ) -> crate::Result<()> {
        let (model, tts_config) = self.models.resolve_text_to_speech(&request.model)?;
        let voice_id = self.voice_id(&request.voice)?;
        let api_key = self.config.require_api_key("elevenlabs")?;

        let sample_rate = request.sample_rate.unwrap_or(tts_config.audio_format.sample_rate);
        if !tts_config.supported_sample_rates.contains(&sample_rate) {
            return Err(Error::InvalidRequest(format!(
                "sample rate {sample_rate} is not supported by '{}'",
                request.model
            )));
        }

        let body = serde_json::json!({
            "text": request.text,
            "model_id": model.provider_model_id,
        });

        let response = self
            .client
            .post(format!(
                "{}/text-to-speech/{voice_id}/stream?output_format=pcm_{sample_rate}",
                self.base_url
            ))
            .header("xi-api-key", api_key.expose_secret())
            .header(CONTENT_TYPE, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Connection(format!("failed to send synthesis request: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "unknown error".to_string());
            return Err(Error::from_upstream_status(status.as_u16(), error_text));
        }

        let ctx = stream.context().clone();
        let sender = AsyncSender::spawn(stream);
        let mut timer = GenerationTimer::start();

        sender
            .enqueue(StreamEvent::AudioFormat(AudioFormat::pcm16_mono(sample_rate)))
            .await;

        let mut chunks = response.bytes_stream();
        let mut index = 0u32;

        let outcome: crate::Result<()> = 'stream: loop {
            let chunk = tokio::select! {
                _ = ctx.cancelled() => break 'stream Err(Error::Canceled),
                chunk = chunks.next() => chunk,
            };

            let Some(chunk) = chunk else {
                break 'stream Ok(());
            };

            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => break 'stream Err(Error::Connection(format!("upstream stream failed: {e}"))),
            };

            if chunk.is_empty() {
                continue;
            }

            index += 1;
            timer.mark_first(&sender).await;
            sender
                .enqueue(StreamEvent::AudioChunk(AudioChunk {
                    index,
                    data: chunk.to_vec(),
                }))
                .await;
        };

        outcome?;

        timer.mark_last(&sender).await;
        sender.wait(&ctx).await
    }
}

#[async_trait]
impl SpeechToTextStreamProvider for ElevenLabsProvider {
    async fn speech_to_text_stream(
        &self,
        mut requests: RequestStream,
        stream: Box<dyn ServerStream>,
    ) -> crate::Result<()> {
        // The configuration event must lead the stream.
        let (model_name, audio_format) = match requests.next().await {
            Some(Ok(SpeechToTextStreamRequest::Configuration { model, audio_format })) => (model, audio_format),
            Some(Ok(SpeechToTextStreamRequest::Audio { .. })) | None => {
                return Err(Error::InvalidRequest(
                    "speech-to-text streams must begin with a configuration event".into(),
                ));
            }
            Some(Err(e)) => return Err(e),
        };

        let model = self.models.resolve_speech_to_text(&model_name)?;
        let api_key = self.config.require_api_key("elevenlabs")?;

        let url = format!(
            "{}/speech-to-text/realtime?model_id={}&sample_rate={}",
            self.ws_url, model.provider_model_id, audio_format.sample_rate
        );

        let mut ws_request = url
            .into_client_request()
            .map_err(|e| Error::InvalidRequest(format!("invalid websocket url: {e}")))?;
        ws_request.headers_mut().insert(
            "xi-api-key",
            api_key
                .expose_secret()
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

        // Client-reader loop: forward audio out, flush a silence packet
        // with commit=true at client EOF so the upstream finalizes.
        let writer_ctx = ctx.clone();
        let writer = tokio::spawn(async move {
            loop {
                let request = tokio::select! {
                    _ = writer_ctx.cancelled() => break,
                    request = requests.next() => request,
                };

                let frame = match request {
                    Some(Ok(SpeechToTextStreamRequest::Audio { data })) => RealtimeAudioFrame {
                        audio_chunk: STANDARD.encode(data),
                        commit: false,
                    },
                    Some(Ok(SpeechToTextStreamRequest::Configuration { .. })) => {
                        log::warn!("ignoring duplicate configuration event");
                        continue;
                    }
                    Some(Err(e)) => {
                        log::debug!("client audio stream failed: {e}");
                        break;
                    }
                    None => {
                        let silence = audio_format.silence(COMMIT_SILENCE_MILLIS);
                        let frame = RealtimeAudioFrame {
                            audio_chunk: STANDARD.encode(silence),
                            commit: true,
                        };

                        if let Ok(text) = serde_json::to_string(&frame) {
                            let _ = ws_out.send(WsMessage::Text(text.into())).await;
                        }
                        break;
                    }
                };

                let Ok(text) = serde_json::to_string(&frame) else {
                    continue;
                };

                if ws_out.send(WsMessage::Text(text.into())).await.is_err() {
                    break;
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
                RealtimeEvent::TurnStart => {
                    timer.mark_first(&sender).await;
                    sender.enqueue(turns.begin()).await;
                }
                RealtimeEvent::InterimTranscript { text } => {
                    timer.mark_first(&sender).await;
                    sender.enqueue(turns.interim(&text)).await;
                }
                RealtimeEvent::CommittedTranscript { text } => {
                    // A commit finalizes the accumulated turn and closes it.
                    timer.mark_first(&sender).await;
                    sender.enqueue(turns.finalize(&text)).await;
                    sender.enqueue(turns.end()).await;
                }
            }
        };

        writer.abort();
        outcome?;

        timer.mark_last(&sender).await;
        sender.wait(&ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use tokio_tungstenite::accept_async;

    fn provider(base_url: String) -> ElevenLabsProvider {
        ElevenLabsProvider::new(ProviderConfig::new("test-key").with_base_url(base_url)).unwrap()
    }

    #[tokio::test]
    async fn unary_transcription_round_trips() {
        use axum::{Router, routing::post};

        let app = Router::new().route(
            "/speech-to-text",
            post(|| async { axum::Json(serde_json::json!({"text": "hello world"})) }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let provider = provider(format!("http://{address}"));

        let response = provider
            .speech_to_text(SpeechToTextRequest {
                model: "providers/elevenlabs/models/scribe-v1".into(),
                audio: vec![0; 320],
                audio_format: AudioFormat::pcm16_mono(16_000),
            })
            .await
            .unwrap();

        assert_eq!(response.text, "hello world");
    }

    #[tokio::test]
    async fn tts_stream_emits_format_then_dense_chunks() {
        use axum::{Router, routing::post};

        let app = Router::new().route(
            "/text-to-speech/{voice}/stream",
            post(|| async { vec![1u8; 640] }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let provider = provider(format!("http://{address}"));
        let collector = crate::sender::CollectorStream::new();

        provider
            .text_to_speech_stream(
                TextToSpeechRequest {
                    model: "providers/elevenlabs/models/multilingual-v2".into(),
                    voice: "voices/river".into(),
                    text: "hi".into(),
                    sample_rate: Some(22_050),
                },
                Box::new(collector.clone()),
            )
            .await
            .unwrap();

        let events = collector.events();

        // Ttfb, then AudioFormat precedes every chunk; indices start at 1.
        let format_index = events
            .iter()
            .position(|e| matches!(e, StreamEvent::AudioFormat(_)))
            .unwrap();
        let first_chunk_index = events
            .iter()
            .position(|e| matches!(e, StreamEvent::AudioChunk(_)))
            .unwrap();
        assert!(format_index < first_chunk_index);

        let indices: Vec<u32> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::AudioChunk(chunk) => Some(chunk.index),
                _ => None,
            })
            .collect();
        assert!(!indices.is_empty());
        assert_eq!(indices, (1..=indices.len() as u32).collect::<Vec<_>>());

        assert!(matches!(events.last(), Some(StreamEvent::GenerationMetrics(m)) if m.ttlb.is_some()));
    }

    #[tokio::test]
    async fn rejects_unsupported_sample_rate() {
        let provider = provider("http://127.0.0.1:1".into());

        let err = provider
            .text_to_speech_stream(
                TextToSpeechRequest {
                    model: "providers/elevenlabs/models/multilingual-v2".into(),
                    voice: "voices/river".into(),
                    text: "hi".into(),
                    sample_rate: Some(11_025),
                },
                Box::new(crate::sender::CollectorStream::new()),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn realtime_stream_projects_turns_and_flushes_commit() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        // Scripted upstream: events after the first audio frame, then close
        // once the commit packet arrives.
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(socket).await.unwrap();

            let mut saw_audio = false;
            while let Some(Ok(message)) = ws.next().await {
                let WsMessage::Text(text) = message else { continue };
                let frame: serde_json::Value = serde_json::from_str(&text).unwrap();

                if !saw_audio {
                    saw_audio = true;
                    for event in [
                        r#"{"type":"turn_start"}"#,
                        r#"{"type":"interim_transcript","text":"hello"}"#,
                    ] {
                        ws.send(WsMessage::Text(event.into())).await.unwrap();
                    }
                }

                if frame["commit"] == true {
                    ws.send(WsMessage::Text(
                        r#"{"type":"committed_transcript","text":"hello world"}"#.into(),
                    ))
                    .await
                    .unwrap();
                    ws.send(WsMessage::Close(None)).await.unwrap();
                    break;
                }
            }
        });

        let provider = provider(format!("http://{address}"));
        let collector = crate::sender::CollectorStream::new();

        let requests: RequestStream = Box::pin(stream::iter(vec![
            Ok(SpeechToTextStreamRequest::Configuration {
                model: "providers/elevenlabs/models/scribe-v1".into(),
                audio_format: AudioFormat::pcm16_mono(16_000),
            }),
            Ok(SpeechToTextStreamRequest::Audio { data: vec![0; 320] }),
        ]));

        provider
            .speech_to_text_stream(requests, Box::new(collector.clone()))
            .await
            .unwrap();

        let events = collector.events();

        assert!(events.iter().any(|e| matches!(e, StreamEvent::TurnStart { turn_index: 1 })));
        assert!(
            events
                .iter()
                .any(|e| matches!(e, StreamEvent::TurnUpdate { text, .. } if text == "hello"))
        );
        assert!(
            events
                .iter()
                .any(|e| matches!(e, StreamEvent::TurnEnd { turn_index: 1, text } if text == "hello world"))
        );
    }

    #[tokio::test]
    async fn missing_configuration_event_is_invalid_argument() {
        let provider = provider("http://127.0.0.1:1".into());

        let requests: RequestStream = Box::pin(stream::iter(vec![Ok(
            SpeechToTextStreamRequest::Audio { data: vec![0; 4] },
        )]));

        let err = provider
            .speech_to_text_stream(requests, Box::new(crate::sender::CollectorStream::new()))
            .await
            .unwrap_err();

        assert_eq!(err.code(), crate::error::Code::InvalidArgument);
    }
}
