use crate::catalog::schema::TableSchema;
use crate::catalog::types::{Record, Value};
use crate::query::operators::{
    FilterOperator, LimitOperator, OffsetOperator, Operator, Predicate, ReverseOperator,
    ScanOperator, SortOperator, drain,
};
use crate::query::plan::Direction;
use crate::storage::index::index_key;
use crate::storage::keyspace::TableData;
use std::collections::BTreeSet;
use std::ops::Bound;
use std::sync::Arc;

/// A consistent read view of one table. Cloning is cheap: rows and indexes
/// are persistent maps shared with the store.
#[derive(Debug, Clone)]
pub struct TableSnapshot {
    schema: Arc<TableSchema>,
    data: TableData,
}

impl TableSnapshot {
    pub(crate) fn new(schema: TableSchema, data: TableData) -> Self {
        Self {
            schema: Arc::new(schema),
            data,
        }
    }

    pub fn name(&self) -> &str {
        &self.schema.table_name
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn count(&self) -> usize {
        self.data.len()
    }

    pub fn get(&self, key: &Value) -> Option<Record> {
        self.data.get(key).cloned()
    }

    /// Every record in primary key order.
    pub fn to_array(&self) -> Vec<Record> {
        self.data.rows.values().cloned().collect()
    }

    pub fn to_collection(&self) -> Collection {
        Collection::from_records(self.to_array())
    }

    pub fn supports_index(&self, column: &str) -> bool {
        self.schema.is_indexed(column)
    }

    /// Native query entry point on `column`; `None` when the column carries
    /// no index.
    pub fn where_clause(&self, column: &str) -> Option<WhereClause<'_>> {
        if !self.supports_index(column) {
            return None;
        }
        Some(WhereClause {
            table: self,
            column: column.to_string(),
        })
    }

    /// Records in index order of `column`. Records not present in the index
    /// come first, in primary key order.
    pub fn order_by(&self, column: &str) -> Option<Collection> {
        if self.schema.primary_key.column == column {
            return Some(self.to_collection());
        }
        let index = self.data.indexes.get(column)?;
        let unindexed = self
            .data
            .rows
            .values()
            .filter(|record| index_key(record, column).is_none())
            .cloned();
        let mut records: Vec<Record> = unindexed.collect();
        records.extend(self.lookup(index.scan_all()));
        Some(Collection::from_records(records))
    }

    pub fn reverse(&self) -> Collection {
        self.to_collection().reverse()
    }

    fn lookup(&self, keys: Vec<Value>) -> Vec<Record> {
        keys.iter()
            .filter_map(|key| self.data.get(key).cloned())
            .collect()
    }
}

/// Native index query over one indexed column. Matches come back in primary
/// key order; records whose column is absent or `Null` never match.
pub struct WhereClause<'a> {
    table: &'a TableSnapshot,
    column: String,
}

impl WhereClause<'_> {
    pub fn equals(&self, value: &Value) -> Collection {
        self.range(Bound::Included(value.clone()), Bound::Included(value.clone()))
    }

    pub fn not_equal(&self, value: &Value) -> Collection {
        self.scan(|key| key != value)
    }

    pub fn above(&self, value: &Value) -> Collection {
        self.range(Bound::Excluded(value.clone()), Bound::Unbounded)
    }

    pub fn above_or_equal(&self, value: &Value) -> Collection {
        self.range(Bound::Included(value.clone()), Bound::Unbounded)
    }

    pub fn below(&self, value: &Value) -> Collection {
        self.range(Bound::Unbounded, Bound::Excluded(value.clone()))
    }

    pub fn below_or_equal(&self, value: &Value) -> Collection {
        self.range(Bound::Unbounded, Bound::Included(value.clone()))
    }

    pub fn any_of(&self, values: &[Value]) -> Collection {
        let set: BTreeSet<&Value> = values.iter().collect();
        self.scan(|key| set.contains(&key))
    }

    pub fn none_of(&self, values: &[Value]) -> Collection {
        let set: BTreeSet<&Value> = values.iter().collect();
        self.scan(|key| !set.contains(&key))
    }

    fn range(&self, start: Bound<Value>, end: Bound<Value>) -> Collection {
        if self.is_primary() {
            let records = self
                .table
                .data
                .rows
                .range((start, end))
                .map(|(_, record)| record.clone())
                .collect();
            return Collection::from_records(records);
        }
        let keys = self
            .table
            .data
            .indexes
            .get(&self.column)
            .map(|index| index.scan_range(start, end))
            .unwrap_or_default();
        self.matches(keys)
    }

    fn scan<F>(&self, keep: F) -> Collection
    where
        F: Fn(&Value) -> bool,
    {
        if self.is_primary() {
            let records = self
                .table
                .data
                .rows
                .iter()
                .filter(|(key, _)| keep(*key))
                .map(|(_, record)| record.clone())
                .collect();
            return Collection::from_records(records);
        }
        let keys = self
            .table
            .data
            .indexes
            .get(&self.column)
            .map(|index| index.scan_where(|key| keep(key)))
            .unwrap_or_default();
        self.matches(keys)
    }

    fn matches(&self, mut keys: Vec<Value>) -> Collection {
        keys.sort();
        Collection::from_records(self.table.lookup(keys))
    }

    fn is_primary(&self) -> bool {
        self.table.schema.primary_key.column == self.column
    }
}

/// A lazy record sequence built from operators.
pub struct Collection {
    op: Box<dyn Operator + Send>,
}

impl Collection {
    pub fn from_records(records: Vec<Record>) -> Self {
        Self {
            op: Box::new(ScanOperator::new(records)),
        }
    }

    pub fn filter(self, predicate: Predicate) -> Self {
        Self {
            op: Box::new(FilterOperator::new(self.op, predicate)),
        }
    }

    pub fn reverse(self) -> Self {
        Self {
            op: Box::new(ReverseOperator::new(self.op)),
        }
    }

    pub fn offset(self, skip: usize) -> Self {
        Self {
            op: Box::new(OffsetOperator::new(self.op, skip)),
        }
    }

    pub fn limit(self, limit: usize) -> Self {
        Self {
            op: Box::new(LimitOperator::new(self.op, limit)),
        }
    }

    pub fn count(mut self) -> usize {
        let mut n = 0;
        while self.op.next().is_some() {
            n += 1;
        }
        n
    }

    pub fn to_array(self) -> Vec<Record> {
        drain(self.op)
    }

    /// Materializes the sequence stably sorted on `column`.
    pub fn sort_by(self, column: &str, direction: Direction) -> Vec<Record> {
        drain(Box::new(SortOperator::new(self.op, column, direction)))
    }
}

/// What a planning stage currently holds: the untouched table, which can
/// still take a native index step, or a sequence only filterable in memory.
pub enum QueryHandle {
    IndexAccelerated(TableSnapshot),
    LinearScan(Collection),
}

impl QueryHandle {
    pub fn is_index_accelerated(&self) -> bool {
        matches!(self, QueryHandle::IndexAccelerated(_))
    }

    pub fn into_collection(self) -> Collection {
        match self {
            QueryHandle::IndexAccelerated(table) => table.to_collection(),
            QueryHandle::LinearScan(collection) => collection,
        }
    }

    pub fn count(self) -> usize {
        match self {
            QueryHandle::IndexAccelerated(table) => table.count(),
            QueryHandle::LinearScan(collection) => collection.count(),
        }
    }
}
