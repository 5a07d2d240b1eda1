//! In-memory lifecycle for long-running operations.
//!
//! An operation wraps an arbitrary deferred handler returning a response
//! message. Creation is idempotent on id; workers run through an optional
//! concurrency barrier; completion closes a done signal that `wait`
//! observers select against their own deadline.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use futures::future::BoxFuture;
use tokio::sync::{Semaphore, watch};
use tokio_util::sync::CancellationToken;

use crate::error::Error;

/// Operation lifecycle states. Transitions are strictly
/// `Queued → Processing → Completed`; `Completed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    Queued,
    Processing,
    Completed,
}

/// Point-in-time snapshot of an operation.
#[derive(Debug, Clone)]
pub struct Operation<R> {
    pub id: String,
    pub status: OperationStatus,
    pub created_at: SystemTime,
    pub completed_at: Option<SystemTime>,
    pub logs: Vec<String>,
    pub request: serde_json::Value,
    /// Set once the operation completes.
    pub result: Option<Result<R, Error>>,
}

impl<R> Operation<R> {
    pub fn done(&self) -> bool {
        self.status == OperationStatus::Completed
    }
}

/// Handler signature: receives its handle (cancellation + logging) and
/// resolves to the response message.
pub type Handler<R> = Box<dyn FnOnce(OperationHandle<R>) -> BoxFuture<'static, crate::Result<R>> + Send>;

/// Handle passed into an operation's handler.
pub struct OperationHandle<R> {
    entry: Arc<Entry<R>>,
}

impl<R> Clone for OperationHandle<R> {
    fn clone(&self) -> Self {
        Self {
            entry: Arc::clone(&self.entry),
        }
    }
}

impl<R> OperationHandle<R> {
    /// Cancellation context of this operation.
    pub fn cancellation(&self) -> CancellationToken {
        self.entry.cancel.clone()
    }

    /// Append one line to the operation's log.
    pub fn log(&self, line: impl Into<String>) {
        self.entry.state.lock().expect("operation lock").logs.push(line.into());
    }
}

struct State<R> {
    status: OperationStatus,
    completed_at: Option<SystemTime>,
    logs: Vec<String>,
    result: Option<Result<R, Error>>,
}

struct Entry<R> {
    id: String,
    seq: u64,
    created_at: SystemTime,
    request: serde_json::Value,
    state: Mutex<State<R>>,
    done: watch::Sender<bool>,
    cancel: CancellationToken,
}

impl<R: Clone> Entry<R> {
    fn snapshot(&self) -> Operation<R> {
        let state = self.state.lock().expect("operation lock");

        Operation {
            id: self.id.clone(),
            status: state.status,
            created_at: self.created_at,
            completed_at: state.completed_at,
            logs: state.logs.clone(),
            request: self.request.clone(),
            result: state.result.clone(),
        }
    }
}

/// Manager configuration.
#[derive(Debug, Clone, Default)]
pub struct OperationManagerConfig {
    /// Width of the concurrency barrier; unlimited when `None`.
    pub concurrency: Option<usize>,
    /// Drop entries whose handler succeeded, keeping only failures around
    /// for inspection.
    pub delete_successful_operations: bool,
}

/// In-memory operation manager.
pub struct OperationManager<R> {
    operations: Mutex<HashMap<String, Arc<Entry<R>>>>,
    barrier: Option<Arc<Semaphore>>,
    delete_successful: bool,
    next_seq: AtomicU64,
}

impl<R: Clone + Send + 'static> Default for OperationManager<R> {
    fn default() -> Self {
        Self::new(OperationManagerConfig::default())
    }
}

impl<R: Clone + Send + 'static> OperationManager<R> {
    pub fn new(config: OperationManagerConfig) -> Self {
        Self {
            operations: Mutex::new(HashMap::new()),
            barrier: config.concurrency.map(|width| Arc::new(Semaphore::new(width))),
            delete_successful: config.delete_successful_operations,
            next_seq: AtomicU64::new(0),
        }
    }

    /// Create an operation, spawning its worker. Idempotent: a second call
    /// with the same id returns the existing operation untouched.
    pub fn create_operation(
        self: &Arc<Self>,
        id: &str,
        request: serde_json::Value,
        handler: Handler<R>,
        timeout: Duration,
    ) -> Operation<R> {
        let entry = {
            let mut operations = self.operations.lock().expect("operation lock");

            if let Some(existing) = operations.get(id) {
                return existing.snapshot();
            }

            let (done, _) = watch::channel(false);
            let entry = Arc::new(Entry {
                id: id.to_string(),
                seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
                created_at: SystemTime::now(),
                request,
                state: Mutex::new(State {
                    status: OperationStatus::Queued,
                    completed_at: None,
                    logs: Vec::new(),
                    result: None,
                }),
                done,
                cancel: CancellationToken::new(),
            });

            operations.insert(id.to_string(), Arc::clone(&entry));
            entry
        };

        let snapshot = entry.snapshot();
        let manager = Arc::clone(self);
        let handle = OperationHandle {
            entry: Arc::clone(&entry),
        };
        let future = handler(handle);

        tokio::spawn(async move {
            manager.run(entry, future, timeout).await;
        });

        snapshot
    }

    async fn run(&self, entry: Arc<Entry<R>>, future: BoxFuture<'static, crate::Result<R>>, timeout: Duration) {
        // Hold the barrier slot only for the handler's lifetime; the
        // timeout bounds it so a wedged handler cannot starve the barrier.
        let permit = match &self.barrier {
            Some(barrier) => {
                tokio::select! {
                    _ = entry.cancel.cancelled() => {
                        self.finish(&entry, Err(Error::Canceled));
                        return;
                    }
                    permit = Arc::clone(barrier).acquire_owned() => permit.ok(),
                }
            }
            None => None,
        };

        entry.state.lock().expect("operation lock").status = OperationStatus::Processing;

        let result = tokio::select! {
            _ = entry.cancel.cancelled() => Err(Error::Canceled),
            outcome = tokio::time::timeout(timeout, future) => match outcome {
                Ok(result) => result,
                Err(_) => Err(Error::DeadlineExceeded),
            },
        };

        drop(permit);

        let succeeded = result.is_ok();
        self.finish(&entry, result);

        if self.delete_successful && succeeded {
            self.operations.lock().expect("operation lock").remove(&entry.id);
        }
    }

    fn finish(&self, entry: &Entry<R>, result: Result<R, Error>) {
        {
            let mut state = entry.state.lock().expect("operation lock");
            state.status = OperationStatus::Completed;
            state.completed_at = Some(SystemTime::now());
            state.result = Some(result);
        }

        let _ = entry.done.send(true);
    }

    fn entry(&self, id: &str) -> crate::Result<Arc<Entry<R>>> {
        self.operations
            .lock()
            .expect("operation lock")
            .get(id)
            .cloned()
            .ok_or_else(|| Error::OperationNotFound(id.to_string()))
    }

    pub fn get_operation(&self, id: &str) -> crate::Result<Operation<R>> {
        self.entry(id).map(|entry| entry.snapshot())
    }

    /// Wait until the operation completes, the caller's context cancels,
    /// or `timeout` elapses, whichever comes first.
    pub async fn wait_operation(
        &self,
        id: &str,
        ctx: &CancellationToken,
        timeout: Duration,
    ) -> crate::Result<Operation<R>> {
        let entry = self.entry(id)?;
        let mut done = entry.done.subscribe();

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        loop {
            if *done.borrow_and_update() {
                return Ok(entry.snapshot());
            }

            tokio::select! {
                _ = ctx.cancelled() => return Err(Error::Canceled),
                _ = &mut deadline => return Err(Error::DeadlineExceeded),
                changed = done.changed() => {
                    if changed.is_err() {
                        // Sender dropped without signaling: worker died.
                        return Err(Error::Internal(None));
                    }
                }
            }
        }
    }

    /// Cancel the operation's context; its worker records a Canceled
    /// result asynchronously.
    pub fn cancel_operation(&self, id: &str) -> crate::Result<()> {
        let entry = self.entry(id)?;
        entry.cancel.cancel();
        Ok(())
    }

    /// Remove the operation unconditionally.
    pub fn delete_operation(&self, id: &str) -> crate::Result<()> {
        self.operations
            .lock()
            .expect("operation lock")
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Error::OperationNotFound(id.to_string()))
    }

    /// Snapshot of every operation, newest first.
    ///
    /// Entries are collected under the map lock; the per-operation clones
    /// happen outside it.
    pub fn list_operations(&self) -> Vec<Operation<R>> {
        let mut entries: Vec<Arc<Entry<R>>> = self
            .operations
            .lock()
            .expect("operation lock")
            .values()
            .cloned()
            .collect();

        entries.sort_by(|a, b| b.seq.cmp(&a.seq));
        entries.iter().map(|entry| entry.snapshot()).collect()
    }
}
