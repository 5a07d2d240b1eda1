//! WebSocket multiplexer.
//!
//! Cartesia tunnels many logical synthesis streams over one socket, keyed
//! by a monotonic context id. A single demultiplexer task routes inbound
//! frames to per-stream channels; a writer task serializes outbound
//! envelopes. Cancellation is a first-class envelope variant rather than a
//! request with magic empty fields.

use std::collections::HashMap;
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use crate::error::Error;

/// Outbound frames: a synthesis request or a cancellation, both tagged
/// with the stream's context id.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub(crate) enum Envelope {
    Request(RequestFrame),
    Cancel(CancelFrame),
}

#[derive(Debug, Serialize)]
pub(crate) struct RequestFrame {
    pub context_id: String,
    #[serde(flatten)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub(crate) struct CancelFrame {
    pub context_id: String,
    pub cancel: bool,
}

/// Inbound frames, keyed by context id.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ResponseFrame {
    Chunk {
        context_id: String,
        /// Base64-encoded audio.
        data: String,
    },
    Done {
        context_id: String,
    },
    Error {
        context_id: String,
        error: String,
    },
}

impl ResponseFrame {
    fn context_id(&self) -> &str {
        match self {
            Self::Chunk { context_id, .. } | Self::Done { context_id } | Self::Error { context_id, .. } => context_id,
        }
    }
}

/// Per-stream inbound channel depth.
const STREAM_CHANNEL_CAPACITY: usize = 32;
/// Outbound envelope channel depth, shared across streams.
const OUT_CHANNEL_CAPACITY: usize = 64;

struct MuxShared {
    out_tx: mpsc::Sender<Envelope>,
    streams: Mutex<HashMap<String, mpsc::Sender<crate::Result<ResponseFrame>>>>,
    next_context_id: AtomicU64,
}

/// A single WebSocket connection carrying many logical streams.
pub(crate) struct Multiplexer {
    shared: Arc<MuxShared>,
}

impl Multiplexer {
    /// Spawn the writer and demultiplexer tasks over a frame transport.
    pub(crate) fn spawn<W, R, WE, RE>(mut sink: W, mut source: R) -> Self
    where
        W: Sink<WsMessage, Error = WE> + Send + Unpin + 'static,
        R: Stream<Item = Result<WsMessage, RE>> + Send + Unpin + 'static,
        WE: Display + Send + 'static,
        RE: Display + Send + 'static,
    {
        let (out_tx, mut out_rx) = mpsc::channel::<Envelope>(OUT_CHANNEL_CAPACITY);

        let shared = Arc::new(MuxShared {
            out_tx,
            streams: Mutex::new(HashMap::new()),
            next_context_id: AtomicU64::new(1),
        });

        tokio::spawn(async move {
            while let Some(envelope) = out_rx.recv().await {
                let Ok(text) = serde_json::to_string(&envelope) else {
                    continue;
                };

                if let Err(e) = sink.send(WsMessage::Text(text)).await {
                    log::debug!("multiplexer writer exiting: {e}");
                    break;
                }
            }
        });

        let demux_shared = Arc::clone(&shared);
        tokio::spawn(async move {
            loop {
                match source.next().await {
                    Some(Ok(WsMessage::Text(text))) => {
                        let frame: ResponseFrame = match serde_json::from_str(&text) {
                            Ok(frame) => frame,
                            Err(e) => {
                                log::warn!("dropping malformed multiplexer frame: {e}");
                                continue;
                            }
                        };

                        let target = demux_shared
                            .streams
                            .lock()
                            .expect("mux lock")
                            .get(frame.context_id())
                            .cloned();

                        match target {
                            Some(tx) => {
                                let _ = tx.send(Ok(frame)).await;
                            }
                            // A frame for a context that already closed.
                            None => log::debug!("dropping frame for unknown context {}", frame.context_id()),
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        Self::broadcast_failure(&demux_shared, Error::Connection("multiplexer transport closed".into()))
                            .await;
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        Self::broadcast_failure(
                            &demux_shared,
                            Error::Connection(format!("multiplexer transport failed: {e}")),
                        )
                        .await;
                        break;
                    }
                }
            }
        });

        Self { shared }
    }

    async fn broadcast_failure(shared: &MuxShared, error: Error) {
        let streams: Vec<mpsc::Sender<crate::Result<ResponseFrame>>> = {
            let mut streams = shared.streams.lock().expect("mux lock");
            streams.drain().map(|(_, tx)| tx).collect()
        };

        for tx in streams {
            let _ = tx.send(Err(error.clone())).await;
        }
    }

    /// Allocate a context id and register a new logical stream.
    pub(crate) fn new_stream(&self) -> MuxStream {
        let context_id = self.shared.next_context_id.fetch_add(1, Ordering::Relaxed).to_string();
        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);

        self.shared
            .streams
            .lock()
            .expect("mux lock")
            .insert(context_id.clone(), tx);

        MuxStream {
            context_id,
            rx,
            shared: Arc::clone(&self.shared),
            closed: false,
        }
    }
}

/// One logical request/response stream over the shared socket.
pub(crate) struct MuxStream {
    context_id: String,
    rx: mpsc::Receiver<crate::Result<ResponseFrame>>,
    shared: Arc<MuxShared>,
    closed: bool,
}

impl MuxStream {
    pub(crate) fn context_id(&self) -> &str {
        &self.context_id
    }

    /// Send one request frame under this stream's context id.
    pub(crate) async fn send(&self, payload: serde_json::Value) -> crate::Result<()> {
        self.shared
            .out_tx
            .send(Envelope::Request(RequestFrame {
                context_id: self.context_id.clone(),
                payload,
            }))
            .await
            .map_err(|_| Error::Connection("multiplexer transport closed".into()))
    }

    /// Receive the next frame for this stream.
    pub(crate) async fn recv(&mut self, ctx: &CancellationToken) -> crate::Result<ResponseFrame> {
        tokio::select! {
            _ = ctx.cancelled() => Err(Error::Canceled),
            frame = self.rx.recv() => match frame {
                Some(frame) => frame,
                None => Err(Error::Connection("multiplexer stream closed".into())),
            },
        }
    }

    /// Deregister and tell the upstream to cancel. Safe to call twice.
    pub(crate) async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        self.shared.streams.lock().expect("mux lock").remove(&self.context_id);

        let _ = self
            .shared
            .out_tx
            .send(Envelope::Cancel(CancelFrame {
                context_id: self.context_id.clone(),
                cancel: true,
            }))
            .await;
    }
}
