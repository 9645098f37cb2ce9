use crate::catalog::types::{Record, Value};
use im::{OrdMap, OrdSet};
use serde::{Deserialize, Serialize};
use std::ops::Bound;

/// Secondary index over one column: column value to the primary keys holding
/// it. Records whose column is absent or `Null` are not indexed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SecondaryIndex {
    pub column: String,
    pub unique: bool,
    pub entries: OrdMap<Value, OrdSet<Value>>,
}

impl SecondaryIndex {
    pub fn new(column: impl Into<String>, unique: bool) -> Self {
        Self {
            column: column.into(),
            unique,
            entries: OrdMap::new(),
        }
    }

    pub fn insert(&mut self, key: Value, pk: Value) {
        let mut pks = self.entries.get(&key).cloned().unwrap_or_default();
        pks.insert(pk);
        self.entries.insert(key, pks);
    }

    pub fn remove(&mut self, key: &Value, pk: &Value) {
        let Some(mut pks) = self.entries.get(key).cloned() else {
            return;
        };
        pks.remove(pk);
        if pks.is_empty() {
            self.entries.remove(key);
        } else {
            self.entries.insert(key.clone(), pks);
        }
    }

    pub fn scan_eq(&self, key: &Value) -> Vec<Value> {
        self.entries
            .get(key)
            .map(|pks| pks.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn scan_range(&self, start: Bound<Value>, end: Bound<Value>) -> Vec<Value> {
        self.entries
            .range((start, end))
            .flat_map(|(_, pks)| pks.iter().cloned())
            .collect()
    }

    /// Primary keys whose indexed value satisfies `keep`, in index order.
    pub fn scan_where<F>(&self, mut keep: F) -> Vec<Value>
    where
        F: FnMut(&Value) -> bool,
    {
        self.entries
            .iter()
            .filter(|(key, _)| keep(key))
            .flat_map(|(_, pks)| pks.iter().cloned())
            .collect()
    }

    /// Every indexed primary key in index order.
    pub fn scan_all(&self) -> Vec<Value> {
        self.scan_where(|_| true)
    }

    /// The primary key already holding `key`, other than `pk`.
    pub fn unique_conflict(&self, key: &Value, pk: &Value) -> Option<Value> {
        if !self.unique {
            return None;
        }
        self.entries
            .get(key)
            .and_then(|pks| pks.iter().find(|existing| *existing != pk).cloned())
    }
}

/// The indexable value of `column` in a record, if any.
pub fn index_key<'a>(record: &'a Record, column: &str) -> Option<&'a Value> {
    record.get(column).filter(|value| !value.is_null())
}
