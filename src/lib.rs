pub mod catalog;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod logging;
pub mod pool;
pub mod query;
pub mod router;
pub mod storage;
pub mod worker;

pub use catalog::schema::{SchemaVersion, TableSchema};
pub use catalog::types::{NonEmpty, OneOrMany, Record, Value};
pub use config::StashConfig;
pub use error::{RemoteError, StashError, StashErrorCode};
pub use pool::{PoolMetrics, PoolState, PoolTicket, TaskPool};
pub use query::plan::{Direction, Filter, Pattern, Request, Response, Select};
pub use router::Router;
pub use storage::store::{Connection, Store};

use crate::checkpoint::CheckpointMeta;
use crate::worker::{DbReply, DbWorkerProvider, handle_request};
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};

enum Dispatch {
    Pool(TaskPool<Request, DbReply>),
    Direct,
}

/// Service facade: owns the store and routes requests through the worker
/// pool, or directly on the caller's context when no pool can be hosted.
///
/// The pool is built on the first [`Stash::request`].
pub struct Stash {
    store: Arc<Store>,
    router: Router,
    max_workers: usize,
    queue_capacity: usize,
    dispatch: OnceLock<Dispatch>,
}

impl Stash {
    pub fn open(config: StashConfig) -> Result<Self, StashError> {
        let store = Store::open(&config)?;
        info!(
            name = %config.name,
            max_workers = config.max_workers,
            action_queue_capacity = config.action_queue_capacity,
            persistent = config.data_dir.is_some(),
            "stash opened"
        );
        Ok(Self {
            router: Router::new(store.connect()),
            store,
            max_workers: config.max_workers,
            queue_capacity: config.action_queue_capacity,
            dispatch: OnceLock::new(),
        })
    }

    /// Runs `request` on a pool worker. `Ok(None)` means the action was not
    /// recognized.
    pub async fn request(&self, request: Request) -> Result<Option<Response>, StashError> {
        match self.dispatch() {
            Dispatch::Pool(pool) => pool.execute(request).await,
            Dispatch::Direct => self.execute_direct(request),
        }
    }

    /// Runs `request` on the calling thread.
    pub fn execute_direct(&self, request: Request) -> Result<Option<Response>, StashError> {
        handle_request(&self.router, request)
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// `None` until the pool is built, or when requests run directly.
    pub fn pool_metrics(&self) -> Option<PoolMetrics> {
        match self.dispatch.get() {
            Some(Dispatch::Pool(pool)) => Some(pool.metrics()),
            _ => None,
        }
    }

    pub fn is_pooled(&self) -> bool {
        matches!(self.dispatch.get(), Some(Dispatch::Pool(_)))
    }

    pub fn checkpoint(&self) -> Result<Option<CheckpointMeta>, StashError> {
        self.store.checkpoint()
    }

    /// Clears the pool and closes the store.
    pub fn close(&self) -> Result<(), StashError> {
        if let Some(Dispatch::Pool(pool)) = self.dispatch.get() {
            pool.clear();
        }
        self.store.close()
    }

    fn dispatch(&self) -> &Dispatch {
        self.dispatch.get_or_init(|| {
            let provider = DbWorkerProvider::new(Arc::clone(&self.store));
            match TaskPool::new(provider, self.max_workers, self.queue_capacity) {
                Ok(pool) => Dispatch::Pool(pool),
                Err(err) => {
                    warn!(
                        error = %err,
                        code = err.code_str(),
                        "task pool unavailable; executing requests directly"
                    );
                    Dispatch::Direct
                }
            }
        })
    }
}
