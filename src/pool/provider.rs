use crate::error::StashError;
use crate::pool::worker::WorkerHandle;
use std::future::Future;

/// Source of ready workers for a [`TaskPool`](crate::pool::TaskPool).
///
/// `provision` resolves once per worker, after the worker has signaled that it
/// is ready to take frames.
pub trait WorkerProvider<I, O>: Send + Sync + 'static {
    fn provision(&self) -> impl Future<Output = Result<WorkerHandle<I, O>, StashError>> + Send;
}
