use crate::catalog::types::{OneOrMany, Record, Value};
use crate::error::StashError;
use crate::query::plan::{Request, Response, Select};
use crate::query::planner::execute_select;
use crate::storage::store::Connection;
use tracing::{debug, warn};

/// Maps tagged requests onto storage and planner calls.
#[derive(Debug, Clone)]
pub struct Router {
    connection: Connection,
}

impl Router {
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Returns `Ok(None)` for actions this router does not know.
    pub fn route(&self, request: Request) -> Result<Option<Response>, StashError> {
        let response = match request {
            Request::Insert { table, elements } => self.on_insert(table, elements)?,
            Request::Update {
                table,
                key_name,
                elements,
            } => self.on_update(table, &key_name, elements)?,
            Request::Merge { table, elements, .. } => self.on_merge(table, elements)?,
            Request::Delete { table, key } => self.on_delete(table, key)?,
            Request::Select(select) => self.on_select(&select)?,
            Request::Unknown => {
                warn!("request with unknown action ignored");
                return Ok(None);
            }
        };
        Ok(Some(response))
    }

    pub fn on_insert(
        &self,
        table: String,
        elements: OneOrMany<Record>,
    ) -> Result<Response, StashError> {
        let element_changed = self.connection.transaction(&table, |tx| match elements {
            OneOrMany::One(record) => tx.add(record).map(|_| 1),
            OneOrMany::Many(records) => Ok(tx.bulk_add(records.into_vec())?.len()),
        })?;
        debug!(table = %table, element_changed, "insert applied");
        Ok(Response::Insert {
            table,
            element_changed: element_changed as u64,
        })
    }

    /// Patches each element's record in place, located by `key_name`. Only
    /// elements whose key exists count as changed.
    pub fn on_update(
        &self,
        table: String,
        key_name: &str,
        elements: OneOrMany<Record>,
    ) -> Result<Response, StashError> {
        let element_changed = self.connection.transaction(&table, |tx| {
            let mut changed = 0usize;
            for element in elements.as_slice() {
                let key = element_key(&table, key_name, element)?;
                if tx.update(&key, element)? {
                    changed += 1;
                }
            }
            Ok(changed)
        })?;
        debug!(table = %table, element_changed, "update applied");
        Ok(Response::Update {
            table,
            element_changed: element_changed as u64,
        })
    }

    pub fn on_merge(
        &self,
        table: String,
        elements: OneOrMany<Record>,
    ) -> Result<Response, StashError> {
        let element_changed = self
            .connection
            .transaction(&table, |tx| Ok(tx.bulk_put(elements.into_vec())?.len()))?;
        debug!(table = %table, element_changed, "merge applied");
        Ok(Response::Merge {
            table,
            element_changed: element_changed as u64,
        })
    }

    pub fn on_delete(&self, table: String, key: OneOrMany<Value>) -> Result<Response, StashError> {
        let removed = self
            .connection
            .transaction(&table, |tx| Ok(tx.bulk_delete(key.as_slice())))?;
        debug!(table = %table, removed, "delete applied");
        Ok(Response::Delete { table })
    }

    pub fn on_select(&self, select: &Select) -> Result<Response, StashError> {
        let snapshot = self.connection.table(&select.table)?;
        execute_select(&snapshot, select)
    }
}

fn element_key(table: &str, key_name: &str, element: &Record) -> Result<Value, StashError> {
    match element.get(key_name) {
        Some(key) if !key.is_null() => Ok(key.clone()),
        _ => Err(StashError::Validation(format!(
            "update on '{table}' has an element without key '{key_name}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::Router;
    use crate::catalog::types::{OneOrMany, Record, Value};
    use crate::config::StashConfig;
    use crate::error::StashErrorCode;
    use crate::query::plan::{Filter, Request, Select};
    use crate::storage::store::Store;

    fn router() -> Router {
        let store = Store::open(&StashConfig::default()).expect("open");
        Router::new(store.connect())
    }

    fn rec(name: &str, n: i64) -> Record {
        Record::new().with("name", name).with("n", n)
    }

    #[test]
    fn insert_counts_elements() {
        let router = router();
        let single = router
            .route(Request::insert("data", rec("a", 1)))
            .expect("insert")
            .expect("response");
        assert_eq!(single.element_changed(), Some(1));

        let batch = Request::insert(
            "data",
            OneOrMany::many(vec![rec("b", 2), rec("c", 3)]).expect("batch"),
        );
        let response = router.route(batch).expect("insert").expect("response");
        assert_eq!(response.element_changed(), Some(2));
    }

    #[test]
    fn update_counts_only_existing_keys() {
        let router = router();
        router
            .route(Request::insert("data", rec("a", 1)))
            .expect("insert");
        let request = Request::update(
            "data",
            "name",
            OneOrMany::many(vec![rec("a", 10), rec("missing", 0)]).expect("batch"),
        );
        let response = router.route(request).expect("update").expect("response");
        assert_eq!(response.element_changed(), Some(1));

        let rows = router
            .route(Select::from_table("data").filter(Filter::eq("name", "a")).into())
            .expect("select")
            .expect("response");
        assert_eq!(rows.rows().expect("rows")[0].get("n"), Some(&Value::from(10)));
    }

    #[test]
    fn update_without_key_field_is_rejected() {
        let router = router();
        let err = router
            .route(Request::update("data", "name", Record::new().with("n", 1)))
            .expect_err("missing key");
        assert_eq!(err.code(), StashErrorCode::Validation);
    }

    #[test]
    fn unknown_action_yields_no_response() {
        assert!(router().route(Request::Unknown).expect("route").is_none());
    }

    #[test]
    fn unknown_table_is_rejected() {
        let err = router()
            .route(Request::delete("nope", Value::from("a")))
            .expect_err("table");
        assert_eq!(err.code(), StashErrorCode::TableNotFound);
    }
}
