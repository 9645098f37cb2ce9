use crate::error::StashError;
use crate::pool::provider::WorkerProvider;
use crate::pool::worker::{WorkerHandle, panic_message, spawn_worker};
use crate::query::plan::{Request, Response};
use crate::router::Router;
use crate::storage::store::Store;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::warn;

/// What a database worker answers: `None` for actions it does not know.
pub type DbReply = Option<Response>;

/// Provisions database workers, each with its own store connection.
#[derive(Debug)]
pub struct DbWorkerProvider {
    store: Arc<Store>,
    next_id: AtomicUsize,
}

impl DbWorkerProvider {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            next_id: AtomicUsize::new(0),
        }
    }
}

impl WorkerProvider<Request, DbReply> for DbWorkerProvider {
    async fn provision(&self) -> Result<WorkerHandle<Request, DbReply>, StashError> {
        let worker_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let router = Router::new(self.store.connect());
        spawn_worker(worker_id, move |request: Request| {
            handle_request(&router, request)
        })
        .await
    }
}

/// Routes one request, turning a panic into a tagged `error` response for
/// the request's table.
pub fn handle_request(router: &Router, request: Request) -> Result<DbReply, StashError> {
    let table = request.table().unwrap_or_default().to_string();
    let action = request.action();
    match catch_unwind(AssertUnwindSafe(|| router.route(request))) {
        Ok(result) => result,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            warn!(table = %table, action, message = %message, "request handler panicked");
            Ok(Some(Response::Error { table, message }))
        }
    }
}
