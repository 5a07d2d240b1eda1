//! Cartesia.
//!
//! Text-to-speech over a single multiplexed WebSocket: every synthesis
//! request becomes a logical stream keyed by context id on the shared
//! socket (see [`mux`]). Audio arrives as base64 PCM chunks.

pub(crate) mod mux;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use futures::StreamExt;
use secrecy::ExposeSecret;
use tokio_tungstenite::connect_async;

use self::mux::{Multiplexer, ResponseFrame};

use crate::catalog::Catalog;
use crate::error::Error;
use crate::messages::audio::AudioFormat;
use crate::messages::request::TextToSpeechRequest;
use crate::messages::response::{AudioChunk, StreamEvent};
use crate::provider::{GenerationTimer, ModelMap, Provider, ProviderConfig, TextToSpeechProvider};
use crate::sender::{AsyncSender, ServerStream};

const CARTESIA_CATALOG: &str = include_str!("catalogs/cartesia.json");
const DEFAULT_CARTESIA_WS_URL: &str = "wss://api.cartesia.ai";
const CARTESIA_VERSION: &str = "2024-06-10";

pub struct CartesiaProvider {
    ws_url: String,
    config: ProviderConfig,
    models: ModelMap,
    /// voice resource name → upstream voice id, from the embedded catalog.
    voices: HashMap<String, String>,
    /// Shared socket, dialed on first use.
    // TODO: drop and redial the shared socket when the demultiplexer
    // reports a transport failure instead of keeping the dead handle.
    mux: tokio::sync::Mutex<Option<Arc<Multiplexer>>>,
}

impl CartesiaProvider {
    pub fn new(config: ProviderConfig) -> crate::Result<Self> {
        let ws_url = config
            .base_url
            .clone()
            .map(|url| url.replacen("http", "ws", 1))
            .unwrap_or_else(|| DEFAULT_CARTESIA_WS_URL.to_string());

        let catalog = Catalog::parse(CARTESIA_CATALOG)?;
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
            ws_url,
            config,
            models: ModelMap::from_catalog("cartesia", CARTESIA_CATALOG)?,
            voices,
            mux: tokio::sync::Mutex::new(None),
        })
    }

    async fn multiplexer(&self) -> crate::Result<Arc<Multiplexer>> {
        let mut guard = self.mux.lock().await;

        if let Some(mux) = guard.as_ref() {
            return Ok(Arc::clone(mux));
        }

        let api_key = self.config.require_api_key("cartesia")?;
        let url = format!(
            "{}/tts/websocket?api_key={}&cartesia_version={CARTESIA_VERSION}",
            self.ws_url,
            api_key.expose_secret()
        );

        let (socket, _) = connect_async(url)
            .await
            .map_err(|e| Error::Connection(format!("failed to open cartesia socket: {e}")))?;
        let (sink, source) = socket.split();

        let mux = Arc::new(Multiplexer::spawn(sink, source));
        *guard = Some(Arc::clone(&mux));

        Ok(mux)
    }
}

#[async_trait]
impl Provider for CartesiaProvider {
    fn id(&self) -> &str {
        "cartesia"
    }

    fn catalog(&self) -> &'static str {
        CARTESIA_CATALOG
    }

    fn text_to_speech(self: Arc<Self>) -> Option<Arc<dyn TextToSpeechProvider>> {
        Some(self)
    }
}

#[async_trait]
impl TextToSpeechProvider for CartesiaProvider {
    async fn text_to_speech_stream(
        &self,
        request: TextToSpeechRequest,
        stream: Box<dyn ServerStream>,
    ) -> crate::Result<()> {
        let (model, tts_config) = self.models.resolve_text_to_speech(&request.model)?;

        let voice_id = self
            .voices
            .get(&request.voice)
            .ok_or_else(|| Error::VoiceNotFound(request.voice.clone()))?;

        let sample_rate = request.sample_rate.unwrap_or(tts_config.audio_format.sample_rate);
        if !tts_config.supported_sample_rates.contains(&sample_rate) {
            return Err(Error::InvalidRequest(format!(
                "sample rate {sample_rate} is not supported by '{}'",
                request.model
            )));
        }

        let mux = self.multiplexer().await?;
        let mut mux_stream = mux.new_stream();

        let payload = serde_json::json!({
            "model_id": model.provider_model_id,
            "transcript": request.text,
            "voice": { "mode": "id", "id": voice_id },
            "output_format": {
                "container": "raw",
                "encoding": "pcm_s16le",
                "sample_rate": sample_rate,
            },
            "continue": false,
        });

        if let Err(e) = mux_stream.send(payload).await {
            mux_stream.close().await;
            return Err(e);
        }

        let ctx = stream.context().clone();
        let sender = AsyncSender::spawn(stream);
        let mut timer = GenerationTimer::start();

        sender
            .enqueue(StreamEvent::AudioFormat(AudioFormat::pcm16_mono(sample_rate)))
            .await;

        let mut index = 0u32;

        let outcome: crate::Result<()> = loop {
            let frame = match mux_stream.recv(&ctx).await {
                Ok(frame) => frame,
                Err(e) => break Err(e),
            };

            match frame {
                ResponseFrame::Chunk { data, .. } => {
                    let data = match STANDARD.decode(&data) {
                        Ok(data) => data,
                        Err(e) => break Err(Error::Protocol(format!("invalid audio chunk encoding: {e}"))),
                    };

                    if data.is_empty() {
                        continue;
                    }

                    index += 1;
                    timer.mark_first(&sender).await;
                    sender.enqueue(StreamEvent::AudioChunk(AudioChunk { index, data })).await;
                }
                ResponseFrame::Done { .. } => break Ok(()),
                ResponseFrame::Error { error, .. } => {
                    break Err(Error::Upstream {
                        status: 502,
                        message: error,
                    });
                }
            }
        };

        mux_stream.close().await;
        outcome?;

        timer.mark_last(&sender).await;
        sender.wait(&ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sender::CollectorStream;
    use futures::SinkExt;
    use tokio_tungstenite::accept_async;
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    /// Upstream stub: answers every synthesis request with two chunks and
    /// a done frame under the request's context id.
    async fn spawn_ws_server() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };

                tokio::spawn(async move {
                    let mut ws = accept_async(socket).await.unwrap();

                    while let Some(Ok(message)) = ws.next().await {
                        let WsMessage::Text(text) = message else { continue };
                        let frame: serde_json::Value = serde_json::from_str(&text).unwrap();

                        if frame.get("cancel").is_some() {
                            continue;
                        }

                        let context_id = frame["context_id"].as_str().unwrap().to_string();
                        let chunk_a = STANDARD.encode([1u8, 2, 3, 4]);
                        let chunk_b = STANDARD.encode([5u8, 6, 7, 8]);

                        for payload in [
                            format!(r#"{{"type":"chunk","context_id":"{context_id}","data":"{chunk_a}"}}"#),
                            format!(r#"{{"type":"chunk","context_id":"{context_id}","data":"{chunk_b}"}}"#),
                            format!(r#"{{"type":"done","context_id":"{context_id}"}}"#),
                        ] {
                            ws.send(WsMessage::Text(payload)).await.unwrap();
                        }
                    }
                });
            }
        });

        format!("http://{address}")
    }

    fn request() -> TextToSpeechRequest {
        TextToSpeechRequest {
            model: "providers/cartesia/models/sonic-2".into(),
            voice: "voices/brook".into(),
            text: "hello there".into(),
            sample_rate: Some(22_050),
        }
    }

    #[tokio::test]
    async fn synthesizes_over_the_multiplexed_socket() {
        let url = spawn_ws_server().await;
        let provider = CartesiaProvider::new(ProviderConfig::new("test-key").with_base_url(url)).unwrap();
        let collector = CollectorStream::new();

        provider
            .text_to_speech_stream(request(), Box::new(collector.clone()))
            .await
            .unwrap();

        let events = collector.events();

        assert!(matches!(events.first(), Some(StreamEvent::AudioFormat(format)) if format.sample_rate == 22_050));

        let chunks: Vec<&AudioChunk> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::AudioChunk(chunk) => Some(chunk),
                _ => None,
            })
            .collect();

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].index, 1);
        assert_eq!(chunks[0].data, vec![1, 2, 3, 4]);
        assert_eq!(chunks[1].index, 2);

        assert!(matches!(events.last(), Some(StreamEvent::GenerationMetrics(m)) if m.ttlb.is_some()));
    }

    #[tokio::test]
    async fn two_streams_share_one_socket() {
        let url = spawn_ws_server().await;
        let provider =
            Arc::new(CartesiaProvider::new(ProviderConfig::new("test-key").with_base_url(url)).unwrap());

        let first = CollectorStream::new();
        let second = CollectorStream::new();

        let a = {
            let provider = Arc::clone(&provider);
            let stream = first.clone();
            tokio::spawn(async move {
                provider.text_to_speech_stream(request(), Box::new(stream)).await
            })
        };
        let b = {
            let provider = Arc::clone(&provider);
            let stream = second.clone();
            tokio::spawn(async move {
                provider.text_to_speech_stream(request(), Box::new(stream)).await
            })
        };

        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        for collector in [first, second] {
            let chunk_count = collector
                .events()
                .iter()
                .filter(|e| matches!(e, StreamEvent::AudioChunk(_)))
                .count();
            assert_eq!(chunk_count, 2);
        }
    }

    #[tokio::test]
    async fn unknown_voice_is_not_found() {
        let provider =
            CartesiaProvider::new(ProviderConfig::new("test-key").with_base_url("http://127.0.0.1:1"))
                .unwrap();

        let mut bad = request();
        bad.voice = "voices/ghost".into();

        let err = provider
            .text_to_speech_stream(bad, Box::new(CollectorStream::new()))
            .await
            .unwrap_err();

        assert_eq!(err.code(), crate::error::Code::NotFound);
    }
}
