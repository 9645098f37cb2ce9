use crate::catalog::Catalog;
use crate::catalog::schema::{SchemaVersion, TableSchema};
use crate::catalog::types::{Record, Value};
use crate::checkpoint::loader::load_checkpoint;
use crate::checkpoint::writer::write_checkpoint;
use crate::checkpoint::{CheckpointMeta, checkpoint_path};
use crate::config::{StashConfig, validate_config};
use crate::error::StashError;
use crate::storage::handle::TableSnapshot;
use crate::storage::keyspace::{Keyspace, TableData};
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

#[derive(Debug, Default)]
struct StoreState {
    catalog: Catalog,
    keyspace: Keyspace,
}

/// A named, versioned table store shared by every connection.
#[derive(Debug)]
pub struct Store {
    name: String,
    data_dir: Option<PathBuf>,
    checkpoint_on_close: bool,
    state: RwLock<StoreState>,
    closed: AtomicBool,
}

impl Store {
    /// Opens the store: loads the snapshot from `data_dir` when one exists,
    /// then applies every configured schema version newer than the stored
    /// one in ascending order. Upgrade hooks only run against a loaded
    /// snapshot.
    pub fn open(config: &StashConfig) -> Result<Arc<Self>, StashError> {
        validate_config(config)?;

        let mut state = StoreState::default();
        let mut loaded = false;
        if let Some(dir) = &config.data_dir {
            let path = checkpoint_path(dir, &config.name);
            if path.exists() {
                let checkpoint = load_checkpoint(&path)?;
                if checkpoint.name != config.name {
                    return Err(StashError::IntegrityError {
                        message: format!(
                            "snapshot {} belongs to store '{}'",
                            path.display(),
                            checkpoint.name
                        ),
                    });
                }
                state.catalog = checkpoint.catalog;
                state.keyspace = checkpoint.keyspace;
                loaded = true;
            }
        }

        let stored_version = state.catalog.version;
        if stored_version > config.latest_version() {
            return Err(StashError::Validation(format!(
                "store '{}' is at schema version {stored_version}, newer than configured version {}",
                config.name,
                config.latest_version()
            )));
        }

        for version in config.ordered_schema() {
            if version.version <= state.catalog.version {
                continue;
            }
            apply_version(&mut state, &version, loaded && stored_version > 0)?;
        }

        info!(
            name = %config.name,
            version = state.catalog.version,
            tables = state.catalog.tables.len(),
            rows = state.keyspace.row_count(),
            from_snapshot = loaded,
            "store opened"
        );

        Ok(Arc::new(Self {
            name: config.name.clone(),
            data_dir: config.data_dir.clone(),
            checkpoint_on_close: config.checkpoint_on_close,
            state: RwLock::new(state),
            closed: AtomicBool::new(false),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u32 {
        self.state.read().catalog.version
    }

    pub fn table_names(&self) -> Vec<String> {
        self.state.read().catalog.table_names()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn connect(self: &Arc<Self>) -> Connection {
        Connection {
            store: Arc::clone(self),
        }
    }

    /// Writes a snapshot of the current state. Returns `None` for in-memory
    /// stores.
    pub fn checkpoint(&self) -> Result<Option<CheckpointMeta>, StashError> {
        let Some(dir) = &self.data_dir else {
            return Ok(None);
        };
        let (catalog, keyspace) = {
            let state = self.state.read();
            (state.catalog.clone(), state.keyspace.clone())
        };
        let meta = write_checkpoint(&self.name, &catalog, &keyspace, dir)?;
        info!(
            name = %self.name,
            version = meta.version,
            rows = meta.rows,
            sha256 = %meta.sha256_hex,
            "checkpoint written"
        );
        Ok(Some(meta))
    }

    /// Closes the store. Later reads and writes fail with `StoreClosed`.
    pub fn close(&self) -> Result<(), StashError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if self.checkpoint_on_close {
            self.checkpoint()?;
        }
        info!(name = %self.name, "store closed");
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), StashError> {
        if self.is_closed() {
            return Err(StashError::StoreClosed {
                name: self.name.clone(),
            });
        }
        Ok(())
    }
}

fn apply_version(
    state: &mut StoreState,
    version: &SchemaVersion,
    run_upgrade: bool,
) -> Result<(), StashError> {
    let mut catalog = state.catalog.clone();
    let mut keyspace = state.keyspace.clone();
    let changes = catalog.apply_version(version)?;

    for table in &changes.dropped {
        keyspace.drop_table(table);
    }
    for table in &changes.created {
        let schema = catalog.table(table)?;
        keyspace.insert_table(table.clone(), TableData::new(schema));
    }
    for table in &changes.reindexed {
        let schema = catalog.table(table)?;
        if let Some(data) = keyspace.table_mut(table) {
            data.rebuild_indexes(schema)?;
        }
    }

    if run_upgrade && let Some(hook) = &version.upgrade {
        let mut tx = UpgradeTx {
            catalog: &catalog,
            keyspace: &mut keyspace,
        };
        hook(&mut tx)?;
        debug!(version = version.version, "upgrade hook applied");
    }

    debug!(
        version = version.version,
        created = ?changes.created,
        reindexed = ?changes.reindexed,
        dropped = ?changes.dropped,
        "schema version applied"
    );
    state.catalog = catalog;
    state.keyspace = keyspace;
    Ok(())
}

/// A handle onto a [`Store`]. Each worker owns its own connection.
#[derive(Debug, Clone)]
pub struct Connection {
    store: Arc<Store>,
}

impl Connection {
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Read view of `table` as of now.
    pub fn table(&self, table: &str) -> Result<TableSnapshot, StashError> {
        self.store.ensure_open()?;
        let state = self.store.state.read();
        let schema = state.catalog.table(table)?.clone();
        let data = state
            .keyspace
            .table(table)
            .cloned()
            .unwrap_or_else(|| TableData::new(&schema));
        Ok(TableSnapshot::new(schema, data))
    }

    /// Runs `f` as one atomic unit of work on `table`. Changes become visible
    /// only when `f` returns `Ok`; on error the table is left untouched.
    pub fn transaction<T, F>(&self, table: &str, f: F) -> Result<T, StashError>
    where
        F: FnOnce(&mut TableTx<'_>) -> Result<T, StashError>,
    {
        self.store.ensure_open()?;
        let mut state = self.store.state.write();
        let schema = state.catalog.table(table)?.clone();
        let mut data = state
            .keyspace
            .table(table)
            .cloned()
            .unwrap_or_else(|| TableData::new(&schema));
        let out = {
            let mut tx = TableTx {
                schema: &schema,
                data: &mut data,
            };
            f(&mut tx)?
        };
        state.keyspace.insert_table(table, data);
        Ok(out)
    }
}

/// Mutations against one table inside [`Connection::transaction`].
pub struct TableTx<'a> {
    schema: &'a TableSchema,
    data: &'a mut TableData,
}

impl TableTx<'_> {
    pub fn schema(&self) -> &TableSchema {
        self.schema
    }

    pub fn add(&mut self, record: Record) -> Result<Value, StashError> {
        self.data.add(self.schema, record)
    }

    pub fn bulk_add(&mut self, records: Vec<Record>) -> Result<Vec<Value>, StashError> {
        records.into_iter().map(|record| self.add(record)).collect()
    }

    pub fn put(&mut self, record: Record) -> Result<Value, StashError> {
        self.data.put(self.schema, record)
    }

    pub fn bulk_put(&mut self, records: Vec<Record>) -> Result<Vec<Value>, StashError> {
        records.into_iter().map(|record| self.put(record)).collect()
    }

    /// Returns whether `key` existed.
    pub fn update(&mut self, key: &Value, patch: &Record) -> Result<bool, StashError> {
        self.data.update(self.schema, key, patch)
    }

    pub fn delete(&mut self, key: &Value) -> bool {
        self.data.delete(key)
    }

    pub fn bulk_delete(&mut self, keys: &[Value]) -> usize {
        keys.iter().filter(|key| self.data.delete(key)).count()
    }

    pub fn get(&self, key: &Value) -> Option<&Record> {
        self.data.get(key)
    }

    pub fn count(&self) -> usize {
        self.data.len()
    }
}

/// Access to every table while a schema upgrade hook runs.
pub struct UpgradeTx<'a> {
    catalog: &'a Catalog,
    keyspace: &'a mut Keyspace,
}

impl UpgradeTx<'_> {
    pub fn version(&self) -> u32 {
        self.catalog.version
    }

    pub fn table_names(&self) -> Vec<String> {
        self.catalog.table_names()
    }

    pub fn to_array(&self, table: &str) -> Result<Vec<Record>, StashError> {
        self.catalog.table(table)?;
        Ok(self
            .keyspace
            .table(table)
            .map(|data| data.rows.values().cloned().collect())
            .unwrap_or_default())
    }

    /// Rewrites every record of `table` through `f`. Returns the record count.
    pub fn modify<F>(&mut self, table: &str, mut f: F) -> Result<usize, StashError>
    where
        F: FnMut(&mut Record),
    {
        let schema = self.catalog.table(table)?;
        let Some(data) = self.keyspace.table_mut(table) else {
            return Ok(0);
        };
        let records: Vec<Record> = data.rows.values().cloned().collect();
        let mut next = TableData::new(schema);
        next.next_auto_key = data.next_auto_key;
        for mut record in records {
            f(&mut record);
            next.add(schema, record)?;
        }
        let count = next.len();
        *data = next;
        Ok(count)
    }

    pub fn put(&mut self, table: &str, record: Record) -> Result<Value, StashError> {
        let schema = self.catalog.table(table)?;
        let data = self
            .keyspace
            .table_mut(table)
            .ok_or_else(|| StashError::TableNotFound {
                table: table.to_string(),
            })?;
        data.put(schema, record)
    }

    pub fn delete(&mut self, table: &str, key: &Value) -> Result<bool, StashError> {
        self.catalog.table(table)?;
        Ok(self
            .keyspace
            .table_mut(table)
            .is_some_and(|data| data.delete(key)))
    }

    pub fn clear(&mut self, table: &str) -> Result<(), StashError> {
        self.catalog.table(table)?;
        if let Some(data) = self.keyspace.table_mut(table) {
            data.clear();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::catalog::schema::SchemaVersion;
    use crate::catalog::types::{Record, Value};
    use crate::config::StashConfig;
    use crate::error::{StashError, StashErrorCode};
    use crate::storage::store::Store;

    #[test]
    fn transaction_is_all_or_nothing() {
        let store = Store::open(&StashConfig::default()).expect("open");
        let conn = store.connect();
        conn.transaction("data", |tx| tx.add(Record::new().with("name", "a")))
            .expect("seed");

        let err = conn
            .transaction("data", |tx| {
                tx.add(Record::new().with("name", "b"))?;
                tx.add(Record::new().with("name", "a"))
            })
            .expect_err("collision");
        assert_eq!(err.code(), StashErrorCode::DuplicateKey);
        assert_eq!(conn.table("data").expect("table").count(), 1);
    }

    #[test]
    fn snapshots_are_isolated_from_later_writes() {
        let store = Store::open(&StashConfig::default()).expect("open");
        let conn = store.connect();
        let before = conn.table("data").expect("table");
        conn.transaction("data", |tx| tx.put(Record::new().with("name", "x")))
            .expect("put");
        assert_eq!(before.count(), 0);
        assert_eq!(conn.table("data").expect("table").count(), 1);
    }

    #[test]
    fn unknown_table_and_closed_store_are_errors() {
        let store = Store::open(&StashConfig::default()).expect("open");
        let conn = store.connect();
        let err = conn.table("missing").expect_err("missing");
        assert_eq!(err.code(), StashErrorCode::TableNotFound);

        store.close().expect("close");
        let err = conn.table("data").expect_err("closed");
        assert_eq!(err.code(), StashErrorCode::StoreClosed);
        store.close().expect("idempotent close");
    }

    #[test]
    fn upgrade_hooks_do_not_run_on_a_fresh_store() {
        let config = StashConfig::in_memory("fresh").with_version(
            SchemaVersion::new(2)
                .table("data", "name, n")
                .upgrade(|_| Err(StashError::Validation("hook must not run".into()))),
        );
        let store = Store::open(&config).expect("open");
        assert_eq!(store.version(), 2);
        assert!(
            store
                .connect()
                .table("data")
                .expect("table")
                .supports_index("n")
        );
    }

    #[test]
    fn bulk_delete_counts_existing_keys() {
        let store = Store::open(&StashConfig::default()).expect("open");
        let conn = store.connect();
        let removed = conn
            .transaction("data", |tx| {
                tx.bulk_add(vec![
                    Record::new().with("name", "a"),
                    Record::new().with("name", "b"),
                ])?;
                Ok(tx.bulk_delete(&[Value::from("a"), Value::from("zz")]))
            })
            .expect("tx");
        assert_eq!(removed, 1);
    }
}
