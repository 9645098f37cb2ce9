use crate::error::{RemoteError, StashError, StashErrorCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::any::Any;
use std::marker::PhantomData;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc::{self as std_mpsc, Receiver};
use tokio::sync::{mpsc as tokio_mpsc, oneshot};
use tracing::{debug, warn};

pub(crate) enum WorkerMessage {
    Frame(Vec<u8>),
    Terminate,
}

/// Detached terminate switch for one worker thread.
#[derive(Clone)]
pub struct WorkerControl {
    worker_id: usize,
    inbox: std_mpsc::Sender<WorkerMessage>,
}

impl WorkerControl {
    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    /// Asks the worker thread to exit after its current message.
    pub fn terminate(&self) -> Result<(), StashError> {
        self.inbox
            .send(WorkerMessage::Terminate)
            .map_err(|_| StashError::WorkerLost {
                worker_id: self.worker_id,
            })
    }
}

/// One live worker thread. Each call sends a single MessagePack frame and
/// waits for the single reply frame.
pub struct WorkerHandle<I, O> {
    worker_id: usize,
    inbox: std_mpsc::Sender<WorkerMessage>,
    outbox: tokio_mpsc::UnboundedReceiver<Vec<u8>>,
    _types: PhantomData<fn(I) -> O>,
}

impl<I, O> std::fmt::Debug for WorkerHandle<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("worker_id", &self.worker_id)
            .finish()
    }
}

impl<I, O> WorkerHandle<I, O> {
    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    pub fn control(&self) -> WorkerControl {
        WorkerControl {
            worker_id: self.worker_id,
            inbox: self.inbox.clone(),
        }
    }

    fn lost(&self) -> StashError {
        StashError::WorkerLost {
            worker_id: self.worker_id,
        }
    }
}

impl<I, O> WorkerHandle<I, O>
where
    I: Serialize,
    O: DeserializeOwned,
{
    pub async fn call(&mut self, input: I) -> Result<O, StashError> {
        let frame = rmp_serde::to_vec_named(&input)?;
        self.inbox
            .send(WorkerMessage::Frame(frame))
            .map_err(|_| self.lost())?;
        let reply = self.outbox.recv().await.ok_or_else(|| self.lost())?;
        let reply: Result<O, RemoteError> = rmp_serde::from_slice(&reply)?;
        reply.map_err(StashError::from)
    }
}

/// Starts a worker thread named `stash-worker-{id}` running `handler` for
/// every frame it receives, and resolves once the thread reports ready.
///
/// A panic inside `handler` is caught and answered with a `Boundary` error;
/// the thread keeps serving.
pub async fn spawn_worker<I, O, F>(
    worker_id: usize,
    handler: F,
) -> Result<WorkerHandle<I, O>, StashError>
where
    I: DeserializeOwned + Send + 'static,
    O: Serialize + Send + 'static,
    F: FnMut(I) -> Result<O, StashError> + Send + 'static,
{
    let (inbox_tx, inbox_rx) = std_mpsc::channel::<WorkerMessage>();
    let (outbox_tx, outbox_rx) = tokio_mpsc::unbounded_channel::<Vec<u8>>();
    let (ready_tx, ready_rx) = oneshot::channel::<()>();

    std::thread::Builder::new()
        .name(format!("stash-worker-{worker_id}"))
        .spawn(move || {
            let _ = ready_tx.send(());
            run_worker(worker_id, inbox_rx, outbox_tx, handler);
        })?;

    ready_rx
        .await
        .map_err(|_| StashError::WorkerLost { worker_id })?;
    debug!(worker_id, "worker ready");
    Ok(WorkerHandle {
        worker_id,
        inbox: inbox_tx,
        outbox: outbox_rx,
        _types: PhantomData,
    })
}

fn run_worker<I, O, F>(
    worker_id: usize,
    inbox: Receiver<WorkerMessage>,
    outbox: tokio_mpsc::UnboundedSender<Vec<u8>>,
    mut handler: F,
) where
    I: DeserializeOwned,
    O: Serialize,
    F: FnMut(I) -> Result<O, StashError>,
{
    while let Ok(message) = inbox.recv() {
        let frame = match message {
            WorkerMessage::Frame(frame) => frame,
            WorkerMessage::Terminate => break,
        };
        let reply = match rmp_serde::from_slice::<I>(&frame) {
            Ok(input) => match catch_unwind(AssertUnwindSafe(|| handler(input))) {
                Ok(result) => result.map_err(|err| RemoteError::from(&err)),
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    warn!(worker_id, message = %message, "worker handler panicked");
                    Err(RemoteError {
                        code: StashErrorCode::Boundary,
                        message,
                    })
                }
            },
            Err(err) => Err(RemoteError::from(&StashError::from(err))),
        };
        let encoded = match rmp_serde::to_vec_named(&reply) {
            Ok(encoded) => encoded,
            Err(err) => {
                let fallback: Result<(), RemoteError> =
                    Err(RemoteError::from(&StashError::from(err)));
                match rmp_serde::to_vec_named(&fallback) {
                    Ok(encoded) => encoded,
                    Err(_) => break,
                }
            }
        };
        if outbox.send(encoded).is_err() {
            break;
        }
    }
    debug!(worker_id, "worker exited");
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker panicked".to_string()
    }
}
