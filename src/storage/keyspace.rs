use crate::catalog::schema::TableSchema;
use crate::catalog::types::{Record, Value};
use crate::error::StashError;
use crate::storage::index::{SecondaryIndex, index_key};
use im::{HashMap, OrdMap};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableData {
    pub rows: OrdMap<Value, Record>,
    pub indexes: HashMap<String, SecondaryIndex>,
    #[serde(default = "first_auto_key")]
    pub next_auto_key: i64,
}

fn first_auto_key() -> i64 {
    1
}

impl TableData {
    pub fn new(schema: &TableSchema) -> Self {
        let indexes = schema
            .indexes
            .iter()
            .map(|def| (def.column.clone(), SecondaryIndex::new(&def.column, def.unique)))
            .collect();
        Self {
            rows: OrdMap::new(),
            indexes,
            next_auto_key: first_auto_key(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, key: &Value) -> Option<&Record> {
        self.rows.get(key)
    }

    /// Inserts a new record and returns its primary key. Fails when the key
    /// is already present.
    pub fn add(&mut self, schema: &TableSchema, mut record: Record) -> Result<Value, StashError> {
        let key = self.resolve_key(schema, &mut record)?;
        if self.rows.contains_key(&key) {
            return Err(StashError::DuplicateKey {
                table: schema.table_name.clone(),
                key: key.to_string(),
            });
        }
        self.check_unique(schema, &key, &record)?;
        self.index_record(&key, &record);
        self.rows.insert(key.clone(), record);
        Ok(key)
    }

    /// Inserts or replaces the record stored under its primary key.
    pub fn put(&mut self, schema: &TableSchema, mut record: Record) -> Result<Value, StashError> {
        let key = self.resolve_key(schema, &mut record)?;
        self.check_unique(schema, &key, &record)?;
        if let Some(previous) = self.rows.get(&key).cloned() {
            self.unindex_record(&key, &previous);
        }
        self.index_record(&key, &record);
        self.rows.insert(key.clone(), record);
        Ok(key)
    }

    /// Overlays `patch` onto the record stored under `key`. Returns whether
    /// the key existed.
    pub fn update(
        &mut self,
        schema: &TableSchema,
        key: &Value,
        patch: &Record,
    ) -> Result<bool, StashError> {
        let Some(previous) = self.rows.get(key).cloned() else {
            return Ok(false);
        };
        if let Some(patched_key) = patch.get(&schema.primary_key.column)
            && patched_key != key
        {
            return Err(StashError::Validation(format!(
                "update of '{}' cannot change primary key {key} to {patched_key}",
                schema.table_name
            )));
        }
        let mut next = previous.clone();
        next.merge(patch);
        self.check_unique(schema, key, &next)?;
        self.unindex_record(key, &previous);
        self.index_record(key, &next);
        self.rows.insert(key.clone(), next);
        Ok(true)
    }

    pub fn delete(&mut self, key: &Value) -> bool {
        let Some(previous) = self.rows.remove(key) else {
            return false;
        };
        self.unindex_record(key, &previous);
        true
    }

    pub fn clear(&mut self) {
        self.rows = OrdMap::new();
        for (_, index) in self.indexes.iter_mut() {
            index.entries = OrdMap::new();
        }
    }

    /// Rebuilds secondary indexes to match `schema`, dropping indexes it no
    /// longer declares.
    pub fn rebuild_indexes(&mut self, schema: &TableSchema) -> Result<(), StashError> {
        let mut indexes = HashMap::new();
        for def in &schema.indexes {
            let mut index = SecondaryIndex::new(&def.column, def.unique);
            for (pk, record) in &self.rows {
                let Some(value) = index_key(record, &def.column) else {
                    continue;
                };
                if let Some(existing) = index.unique_conflict(value, pk) {
                    return Err(StashError::UniqueViolation {
                        table: schema.table_name.clone(),
                        index: def.column.clone(),
                        key: format!("{value} (held by {existing})"),
                    });
                }
                index.insert(value.clone(), pk.clone());
            }
            indexes.insert(def.column.clone(), index);
        }
        self.indexes = indexes;
        Ok(())
    }

    fn resolve_key(&mut self, schema: &TableSchema, record: &mut Record) -> Result<Value, StashError> {
        let pk = &schema.primary_key;
        match record.get(&pk.column) {
            Some(key) if !key.is_null() => {
                let key = key.clone();
                if pk.auto_increment
                    && let Some(n) = key.as_i64()
                {
                    self.next_auto_key = self.next_auto_key.max(n.saturating_add(1));
                }
                Ok(key)
            }
            _ if pk.auto_increment => {
                let key = Value::Integer(self.next_auto_key);
                self.next_auto_key = self.next_auto_key.saturating_add(1);
                record.set(pk.column.clone(), key.clone());
                Ok(key)
            }
            _ => Err(StashError::Validation(format!(
                "record for '{}' is missing primary key '{}'",
                schema.table_name, pk.column
            ))),
        }
    }

    fn check_unique(&self, schema: &TableSchema, pk: &Value, record: &Record) -> Result<(), StashError> {
        for index in self.indexes.values() {
            let Some(value) = index_key(record, &index.column) else {
                continue;
            };
            if index.unique_conflict(value, pk).is_some() {
                return Err(StashError::UniqueViolation {
                    table: schema.table_name.clone(),
                    index: index.column.clone(),
                    key: value.to_string(),
                });
            }
        }
        Ok(())
    }

    fn index_record(&mut self, pk: &Value, record: &Record) {
        for (_, index) in self.indexes.iter_mut() {
            if let Some(value) = index_key(record, &index.column) {
                index.insert(value.clone(), pk.clone());
            }
        }
    }

    fn unindex_record(&mut self, pk: &Value, record: &Record) {
        for (_, index) in self.indexes.iter_mut() {
            if let Some(value) = index_key(record, &index.column) {
                index.remove(value, pk);
            }
        }
    }
}

/// Row data for every table in the store.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Keyspace {
    pub tables: HashMap<String, TableData>,
}

impl Keyspace {
    pub fn table(&self, name: &str) -> Option<&TableData> {
        self.tables.get(name)
    }

    pub fn table_mut(&mut self, name: &str) -> Option<&mut TableData> {
        self.tables.get_mut(name)
    }

    pub fn insert_table(&mut self, name: impl Into<String>, data: TableData) {
        self.tables.insert(name.into(), data);
    }

    pub fn drop_table(&mut self, name: &str) {
        self.tables.remove(name);
    }

    pub fn row_count(&self) -> usize {
        self.tables.values().map(TableData::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::{Keyspace, TableData};
    use crate::catalog::schema::TableSchema;
    use crate::catalog::types::{Record, Value};
    use crate::error::StashErrorCode;

    fn users() -> TableSchema {
        TableSchema::parse("users", "++id, name, &email").expect("schema")
    }

    #[test]
    fn auto_increment_assigns_and_tracks_explicit_keys() {
        let schema = users();
        let mut data = TableData::new(&schema);
        let k1 = data.add(&schema, Record::new().with("name", "a")).expect("add");
        assert_eq!(k1, Value::Integer(1));
        let k10 = data
            .add(&schema, Record::new().with("id", 10).with("name", "b"))
            .expect("explicit");
        assert_eq!(k10, Value::Integer(10));
        let k11 = data.add(&schema, Record::new().with("name", "c")).expect("add");
        assert_eq!(k11, Value::Integer(11));
        assert_eq!(data.get(&k1).and_then(|r| r.get("id")), Some(&Value::Integer(1)));
    }

    #[test]
    fn add_rejects_duplicate_key_and_unique_violation() {
        let schema = users();
        let mut data = TableData::new(&schema);
        data.add(&schema, Record::new().with("id", 1).with("email", "x"))
            .expect("add");
        let err = data
            .add(&schema, Record::new().with("id", 1))
            .expect_err("dup");
        assert_eq!(err.code(), StashErrorCode::DuplicateKey);
        let err = data
            .add(&schema, Record::new().with("id", 2).with("email", "x"))
            .expect_err("unique");
        assert_eq!(err.code(), StashErrorCode::UniqueViolation);
        assert_eq!(data.len(), 1);
    }

    #[test]
    fn put_and_update_keep_indexes_in_sync() {
        let schema = users();
        let mut data = TableData::new(&schema);
        data.put(&schema, Record::new().with("id", 1).with("name", "a"))
            .expect("put");
        data.put(&schema, Record::new().with("id", 1).with("name", "b"))
            .expect("put again");
        let names = &data.indexes.get("name").expect("name index");
        assert!(names.scan_eq(&Value::from("a")).is_empty());
        assert_eq!(names.scan_eq(&Value::from("b")), vec![Value::Integer(1)]);

        assert!(data
            .update(&schema, &Value::Integer(1), &Record::new().with("name", "c"))
            .expect("update"));
        assert!(!data
            .update(&schema, &Value::Integer(7), &Record::new().with("name", "z"))
            .expect("missing"));
        assert_eq!(
            data.indexes.get("name").expect("name index").scan_eq(&Value::from("c")),
            vec![Value::Integer(1)]
        );

        let err = data
            .update(&schema, &Value::Integer(1), &Record::new().with("id", 2))
            .expect_err("pk change");
        assert_eq!(err.code(), StashErrorCode::Validation);
    }

    #[test]
    fn missing_primary_key_is_rejected_without_auto_increment() {
        let schema = TableSchema::parse("data", "name").expect("schema");
        let mut data = TableData::new(&schema);
        let err = data
            .add(&schema, Record::new().with("n", 1))
            .expect_err("no pk");
        assert_eq!(err.code(), StashErrorCode::Validation);
    }

    #[test]
    fn null_and_absent_columns_are_not_indexed() {
        let schema = users();
        let mut data = TableData::new(&schema);
        data.add(&schema, Record::new().with("id", 1).with("name", Value::Null))
            .expect("add");
        data.add(&schema, Record::new().with("id", 2)).expect("add");
        assert!(data.indexes.get("name").expect("name index").entries.is_empty());
        assert!(data.delete(&Value::Integer(1)));
        assert!(!data.delete(&Value::Integer(1)));
    }

    #[test]
    fn rebuild_detects_unique_conflicts() {
        let plain = TableSchema::parse("users", "++id, email").expect("schema");
        let mut data = TableData::new(&plain);
        data.add(&plain, Record::new().with("email", "x")).expect("add");
        data.add(&plain, Record::new().with("email", "x")).expect("add");
        let err = data.rebuild_indexes(&users()).expect_err("conflict");
        assert_eq!(err.code(), StashErrorCode::UniqueViolation);

        let mut keyspace = Keyspace::default();
        keyspace.insert_table("users", data);
        assert_eq!(keyspace.row_count(), 2);
        keyspace.drop_table("users");
        assert!(keyspace.table("users").is_none());
    }
}
