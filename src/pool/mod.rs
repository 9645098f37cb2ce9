pub mod provider;
pub mod worker;

use crate::error::StashError;
use parking_lot::Mutex;
use provider::WorkerProvider;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::task::{Context, Poll};
use tokio::runtime::Handle;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};
use worker::{WorkerControl, WorkerHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Idle,
    Running,
    Draining,
    Closed,
}

impl PoolState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => PoolState::Idle,
            1 => PoolState::Running,
            2 => PoolState::Draining,
            _ => PoolState::Closed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolMetrics {
    pub live_workers: usize,
    pub provisioning: usize,
    pub in_flight: usize,
    pub max_in_flight: usize,
    pub completed: u64,
    pub rejected: u64,
}

#[derive(Debug, Default)]
struct PoolTelemetry {
    live_workers: AtomicUsize,
    provisioning: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    completed: AtomicU64,
    rejected: AtomicU64,
}

impl PoolTelemetry {
    fn begin_call(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.max_in_flight.fetch_max(now, Ordering::AcqRel);
    }

    fn end_call(&self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> PoolMetrics {
        PoolMetrics {
            live_workers: self.live_workers.load(Ordering::Acquire),
            provisioning: self.provisioning.load(Ordering::Acquire),
            in_flight: self.in_flight.load(Ordering::Acquire),
            max_in_flight: self.max_in_flight.load(Ordering::Acquire),
            completed: self.completed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

/// A queued action and the sink its result resolves.
struct PoolAction<I, O> {
    input: I,
    sink: oneshot::Sender<Result<O, StashError>>,
}

/// A worker together with the semaphore permit it holds for its lifetime.
struct PooledWorker<I, O> {
    handle: WorkerHandle<I, O>,
    _permit: OwnedSemaphorePermit,
}

enum Availability<I, O> {
    Ready(PooledWorker<I, O>),
    Failed(StashError),
    Lost,
}

struct PoolShared {
    state: AtomicU8,
    telemetry: PoolTelemetry,
    controls: Mutex<Vec<WorkerControl>>,
}

impl PoolShared {
    fn set_state(&self, state: PoolState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn state(&self) -> PoolState {
        PoolState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Records a freshly provisioned worker. Returns `false` once `clear` has
    /// started; the caller then owns terminating it.
    fn register(&self, control: WorkerControl) -> bool {
        let mut controls = self.controls.lock();
        if matches!(self.state(), PoolState::Draining | PoolState::Closed) {
            return false;
        }
        controls.push(control);
        self.telemetry.live_workers.fetch_add(1, Ordering::AcqRel);
        true
    }
}

/// Bounded dispatch of serializable actions onto lazily provisioned workers.
///
/// Actions queue FIFO and pair FIFO with the first worker to become
/// available. At most `max_workers` workers are live or being provisioned,
/// and each worker runs one action at a time.
pub struct TaskPool<I, O> {
    actions: Mutex<Option<mpsc::Sender<PoolAction<I, O>>>>,
    pairing: Mutex<Option<JoinHandle<()>>>,
    shared: Arc<PoolShared>,
    max_workers: usize,
}

impl<I, O> TaskPool<I, O>
where
    I: Serialize + Send + 'static,
    O: DeserializeOwned + Send + 'static,
{
    /// Fails with `Capability` when called outside a tokio runtime.
    pub fn new<P>(
        provider: P,
        max_workers: usize,
        queue_capacity: usize,
    ) -> Result<Self, StashError>
    where
        P: WorkerProvider<I, O>,
    {
        if max_workers == 0 || queue_capacity == 0 {
            return Err(StashError::InvalidConfig {
                message: "task pool needs at least one worker and one queue slot".into(),
            });
        }
        let runtime = Handle::try_current().map_err(|e| {
            StashError::Capability(format!("no async runtime to host the task pool: {e}"))
        })?;

        let (actions_tx, actions_rx) = mpsc::channel(queue_capacity);
        let shared = Arc::new(PoolShared {
            state: AtomicU8::new(PoolState::Idle as u8),
            telemetry: PoolTelemetry::default(),
            controls: Mutex::new(Vec::new()),
        });
        let pairing = PairingLoop {
            provider: Arc::new(provider),
            semaphore: Arc::new(Semaphore::new(max_workers)),
            shared: Arc::clone(&shared),
        };
        let handle = runtime.spawn(pairing.run(actions_rx));
        info!(max_workers, queue_capacity, "task pool started");

        Ok(Self {
            actions: Mutex::new(Some(actions_tx)),
            pairing: Mutex::new(Some(handle)),
            shared,
            max_workers,
        })
    }

    /// Enqueues `input` without blocking. The returned ticket resolves
    /// exactly once.
    pub fn execute(&self, input: I) -> PoolTicket<O> {
        let actions = self.actions.lock();
        let Some(sender) = actions.as_ref() else {
            return PoolTicket::ready(Err(StashError::PoolClosed));
        };
        let (sink, receiver) = oneshot::channel();
        match sender.try_send(PoolAction { input, sink }) {
            Ok(()) => {
                let _ = self.shared.state.compare_exchange(
                    PoolState::Idle as u8,
                    PoolState::Running as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                PoolTicket::pending(receiver)
            }
            Err(TrySendError::Full(_)) => {
                self.shared.telemetry.rejected.fetch_add(1, Ordering::Relaxed);
                PoolTicket::ready(Err(StashError::QueueFull))
            }
            Err(TrySendError::Closed(_)) => PoolTicket::ready(Err(StashError::PoolClosed)),
        }
    }
}

impl<I, O> TaskPool<I, O> {
    /// Stops pairing, drops every queued and in-flight action and asks each
    /// provisioned worker to exit. Their tickets resolve with `PoolClosed`.
    pub fn clear(&self) {
        if self.shared.state() == PoolState::Closed {
            return;
        }
        self.shared.set_state(PoolState::Draining);
        self.actions.lock().take();
        if let Some(pairing) = self.pairing.lock().take() {
            pairing.abort();
        }
        let controls = std::mem::take(&mut *self.shared.controls.lock());
        let total = controls.len();
        for control in controls {
            if let Err(err) = control.terminate() {
                warn!(worker_id = control.worker_id(), error = %err, "worker termination failed");
            }
        }
        self.shared.telemetry.live_workers.store(0, Ordering::Release);
        self.shared.set_state(PoolState::Closed);
        info!(workers = total, "task pool cleared");
    }

    pub fn state(&self) -> PoolState {
        self.shared.state()
    }

    pub fn metrics(&self) -> PoolMetrics {
        self.shared.telemetry.snapshot()
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }
}

impl<I, O> Drop for TaskPool<I, O> {
    fn drop(&mut self) {
        self.clear();
    }
}

struct PairingLoop<P> {
    provider: Arc<P>,
    semaphore: Arc<Semaphore>,
    shared: Arc<PoolShared>,
}

impl<P> PairingLoop<P> {
    async fn run<I, O>(self, mut actions: mpsc::Receiver<PoolAction<I, O>>)
    where
        P: WorkerProvider<I, O>,
        I: Serialize + Send + 'static,
        O: DeserializeOwned + Send + 'static,
    {
        let (available_tx, mut available_rx) = mpsc::unbounded_channel::<Availability<I, O>>();
        let mut calls = JoinSet::new();

        'actions: loop {
            let action = tokio::select! {
                action = actions.recv() => match action {
                    Some(action) => action,
                    None => break 'actions,
                },
                Some(_) = calls.join_next(), if !calls.is_empty() => continue 'actions,
            };

            let mut may_provision = true;
            let paired = loop {
                match available_rx.try_recv() {
                    Ok(Availability::Ready(worker)) => break Ok(worker),
                    Ok(Availability::Lost) => continue,
                    Ok(Availability::Failed(err)) => {
                        may_provision = false;
                        if self.has_no_workers() {
                            break Err(err);
                        }
                        continue;
                    }
                    Err(_) => {}
                }
                if may_provision
                    && let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned()
                {
                    self.provision(permit, available_tx.clone());
                }
                tokio::select! {
                    event = available_rx.recv() => match event {
                        Some(Availability::Ready(worker)) => break Ok(worker),
                        Some(Availability::Lost) => may_provision = true,
                        Some(Availability::Failed(err)) => {
                            may_provision = false;
                            if self.has_no_workers() {
                                break Err(err);
                            }
                        }
                        None => break 'actions,
                    },
                    Some(_) = calls.join_next(), if !calls.is_empty() => {}
                }
            };
            let worker = match paired {
                Ok(worker) => worker,
                Err(err) => {
                    let _ = action.sink.send(Err(err));
                    continue;
                }
            };

            debug!(worker_id = worker.handle.worker_id(), "action paired");
            calls.spawn(run_call(
                worker,
                action,
                Arc::clone(&self.shared),
                available_tx.clone(),
            ));
        }
        debug!("pairing loop stopped");
    }

    fn has_no_workers(&self) -> bool {
        let telemetry = &self.shared.telemetry;
        telemetry.live_workers.load(Ordering::Acquire) == 0
            && telemetry.provisioning.load(Ordering::Acquire) == 0
    }

    fn provision<I, O>(
        &self,
        permit: OwnedSemaphorePermit,
        available: mpsc::UnboundedSender<Availability<I, O>>,
    ) where
        P: WorkerProvider<I, O>,
        I: Send + 'static,
        O: Send + 'static,
    {
        let provider = Arc::clone(&self.provider);
        let shared = Arc::clone(&self.shared);
        shared.telemetry.provisioning.fetch_add(1, Ordering::AcqRel);
        tokio::spawn(async move {
            let outcome = provider.provision().await;
            match outcome {
                Ok(handle) => {
                    let registered = shared.register(handle.control());
                    shared.telemetry.provisioning.fetch_sub(1, Ordering::AcqRel);
                    if !registered {
                        let worker_id = handle.worker_id();
                        if let Err(err) = handle.control().terminate() {
                            warn!(worker_id, error = %err, "worker termination failed");
                        }
                        debug!(worker_id, "worker provisioned after clear; terminated");
                        return;
                    }
                    debug!(worker_id = handle.worker_id(), "worker provisioned");
                    let _ = available.send(Availability::Ready(PooledWorker {
                        handle,
                        _permit: permit,
                    }));
                }
                Err(err) => {
                    shared.telemetry.provisioning.fetch_sub(1, Ordering::AcqRel);
                    drop(permit);
                    warn!(error = %err, "worker provisioning failed");
                    let _ = available.send(Availability::Failed(err));
                }
            }
        });
    }
}

async fn run_call<I, O>(
    mut worker: PooledWorker<I, O>,
    action: PoolAction<I, O>,
    shared: Arc<PoolShared>,
    available: mpsc::UnboundedSender<Availability<I, O>>,
) where
    I: Serialize,
    O: DeserializeOwned,
{
    let PoolAction { input, sink } = action;
    shared.telemetry.begin_call();
    let result = worker.handle.call(input).await;
    shared.telemetry.end_call();

    let lost = matches!(result, Err(StashError::WorkerLost { .. }));
    let _ = sink.send(result);
    if lost {
        let worker_id = worker.handle.worker_id();
        shared
            .controls
            .lock()
            .retain(|control| control.worker_id() != worker_id);
        let _ = shared.telemetry.live_workers.fetch_update(
            Ordering::AcqRel,
            Ordering::Acquire,
            |live| live.checked_sub(1),
        );
        drop(worker);
        warn!(worker_id, "worker lost; slot released for re-provisioning");
        let _ = available.send(Availability::Lost);
    } else {
        let _ = available.send(Availability::Ready(worker));
    }
}

enum TicketState<O> {
    Pending(oneshot::Receiver<Result<O, StashError>>),
    Ready(Option<Result<O, StashError>>),
}

/// Single-shot future for one [`TaskPool::execute`] call.
pub struct PoolTicket<O> {
    state: TicketState<O>,
}

impl<O> PoolTicket<O> {
    fn pending(receiver: oneshot::Receiver<Result<O, StashError>>) -> Self {
        Self {
            state: TicketState::Pending(receiver),
        }
    }

    fn ready(result: Result<O, StashError>) -> Self {
        Self {
            state: TicketState::Ready(Some(result)),
        }
    }
}

impl<O> Unpin for PoolTicket<O> {}

impl<O> Future for PoolTicket<O> {
    type Output = Result<O, StashError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            TicketState::Pending(receiver) => Pin::new(receiver)
                .poll(cx)
                .map(|received| received.unwrap_or(Err(StashError::PoolClosed))),
            TicketState::Ready(result) => {
                Poll::Ready(result.take().unwrap_or(Err(StashError::PoolClosed)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::provider::WorkerProvider;
    use super::worker::{WorkerHandle, spawn_worker};
    use super::{PoolState, TaskPool};
    use crate::error::{StashError, StashErrorCode};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Doubler {
        next_id: AtomicUsize,
        delay: Duration,
    }

    impl WorkerProvider<u64, u64> for Doubler {
        async fn provision(&self) -> Result<WorkerHandle<u64, u64>, StashError> {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let delay = self.delay;
            spawn_worker(id, move |n: u64| {
                std::thread::sleep(delay);
                Ok(n * 2)
            })
            .await
        }
    }

    struct Broken;

    impl WorkerProvider<u64, u64> for Broken {
        async fn provision(&self) -> Result<WorkerHandle<u64, u64>, StashError> {
            Err(StashError::Capability("no workers here".into()))
        }
    }

    fn doubler(delay_ms: u64) -> Doubler {
        Doubler {
            next_id: AtomicUsize::new(0),
            delay: Duration::from_millis(delay_ms),
        }
    }

    #[test]
    fn construction_outside_a_runtime_is_a_capability_error() {
        let err = TaskPool::<u64, u64>::new(doubler(0), 2, 8)
            .err()
            .expect("no runtime");
        assert_eq!(err.code(), StashErrorCode::Capability);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn executes_every_action_within_the_worker_cap() {
        let pool = TaskPool::new(doubler(5), 2, 64).expect("pool");
        assert_eq!(pool.state(), PoolState::Idle);
        let tickets: Vec<_> = (0..10u64).map(|n| pool.execute(n)).collect();
        assert_eq!(pool.state(), PoolState::Running);
        for (n, ticket) in tickets.into_iter().enumerate() {
            assert_eq!(ticket.await.expect("result"), n as u64 * 2);
        }
        let metrics = pool.metrics();
        assert_eq!(metrics.completed, 10);
        assert!(metrics.max_in_flight <= 2);
        assert!(metrics.live_workers <= 2);
    }

    #[tokio::test]
    async fn full_queue_rejects_immediately() {
        let pool = TaskPool::new(doubler(50), 1, 1).expect("pool");
        let tickets: Vec<_> = (0..8u64).map(|n| pool.execute(n)).collect();
        let mut rejected = 0;
        for ticket in tickets {
            match ticket.await {
                Ok(_) => {}
                Err(err) => {
                    assert_eq!(err.code(), StashErrorCode::QueueFull);
                    rejected += 1;
                }
            }
        }
        assert!(rejected > 0);
        assert_eq!(pool.metrics().rejected, rejected);
    }

    #[tokio::test]
    async fn cleared_pool_resolves_tickets_with_pool_closed() {
        let pool = TaskPool::new(doubler(20), 1, 16).expect("pool");
        let pending: Vec<_> = (0..4u64).map(|n| pool.execute(n)).collect();
        pool.clear();
        assert_eq!(pool.state(), PoolState::Closed);
        for ticket in pending {
            if let Err(err) = ticket.await {
                assert_eq!(err.code(), StashErrorCode::PoolClosed);
            }
        }
        let err = pool.execute(1).await.expect_err("closed");
        assert_eq!(err.code(), StashErrorCode::PoolClosed);
    }

    #[tokio::test]
    async fn provisioning_failure_rejects_the_action() {
        let pool = TaskPool::new(Broken, 3, 4).expect("pool");
        let err = pool.execute(1).await.expect_err("no worker");
        assert_eq!(err.code(), StashErrorCode::Capability);
        let err = pool.execute(2).await.expect_err("still no worker");
        assert_eq!(err.code(), StashErrorCode::Capability);
    }
}
