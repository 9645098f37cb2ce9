use crate::catalog::types::{NonEmpty, OneOrMany, Record, Value};
use serde::{Deserialize, Serialize};

/// A request against one table, tagged by `action` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Request {
    Insert {
        table: String,
        elements: OneOrMany<Record>,
    },
    Update {
        table: String,
        key_name: String,
        elements: OneOrMany<Record>,
    },
    Merge {
        table: String,
        key_name: String,
        elements: OneOrMany<Record>,
    },
    Delete {
        table: String,
        key: OneOrMany<Value>,
    },
    Select(Select),
    #[serde(other)]
    Unknown,
}

impl Request {
    pub fn insert(table: impl Into<String>, elements: impl Into<OneOrMany<Record>>) -> Self {
        Request::Insert {
            table: table.into(),
            elements: elements.into(),
        }
    }

    pub fn update(
        table: impl Into<String>,
        key_name: impl Into<String>,
        elements: impl Into<OneOrMany<Record>>,
    ) -> Self {
        Request::Update {
            table: table.into(),
            key_name: key_name.into(),
            elements: elements.into(),
        }
    }

    pub fn merge(
        table: impl Into<String>,
        key_name: impl Into<String>,
        elements: impl Into<OneOrMany<Record>>,
    ) -> Self {
        Request::Merge {
            table: table.into(),
            key_name: key_name.into(),
            elements: elements.into(),
        }
    }

    pub fn delete(table: impl Into<String>, key: impl Into<OneOrMany<Value>>) -> Self {
        Request::Delete {
            table: table.into(),
            key: key.into(),
        }
    }

    pub fn table(&self) -> Option<&str> {
        match self {
            Request::Insert { table, .. }
            | Request::Update { table, .. }
            | Request::Merge { table, .. }
            | Request::Delete { table, .. } => Some(table),
            Request::Select(select) => Some(&select.table),
            Request::Unknown => None,
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            Request::Insert { .. } => "insert",
            Request::Update { .. } => "update",
            Request::Merge { .. } => "merge",
            Request::Delete { .. } => "delete",
            Request::Select(_) => "select",
            Request::Unknown => "unknown",
        }
    }
}

impl From<Select> for Request {
    fn from(select: Select) -> Self {
        Request::Select(select)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Select {
    pub table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ResultMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<OrderBy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<NonEmpty<Filter>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paginator: Option<Paginator>,
}

impl Select {
    pub fn from_table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        match &mut self.filters {
            Some(filters) => filters.push(filter),
            None => self.filters = Some(NonEmpty::new(filter)),
        }
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, direction: Direction) -> Self {
        self.order = Some(OrderBy {
            column: column.into(),
            direction,
        });
        self
    }

    pub fn paginate(mut self, page: u64, page_size: u64) -> Self {
        self.paginator = Some(Paginator { page, page_size });
        self
    }

    pub fn count(mut self) -> Self {
        self.result = Some(ResultMode::Count);
        self
    }

    pub fn is_count(&self) -> bool {
        self.result == Some(ResultMode::Count)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultMode {
    #[default]
    Records,
    Count,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub column: String,
    #[serde(default, alias = "type")]
    pub direction: Direction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    #[serde(alias = "des")]
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paginator {
    pub page: u64,
    pub page_size: u64,
}

impl Paginator {
    /// Half-open record range `[page * page_size, (page + 1) * page_size)`.
    pub fn bounds(&self) -> (usize, usize) {
        let start = self.page.saturating_mul(self.page_size);
        let end = start.saturating_add(self.page_size);
        (
            usize::try_from(start).unwrap_or(usize::MAX),
            usize::try_from(end).unwrap_or(usize::MAX),
        )
    }
}

/// One predicate of a select, tagged by `operation` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum Filter {
    Eq { column: String, value: Value },
    NotEq { column: String, value: Value },
    Gt { column: String, value: Value },
    Ge { column: String, value: Value },
    Ls { column: String, value: Value },
    Le { column: String, value: Value },
    In { column: String, values: NonEmpty<Value> },
    NotIn { column: String, values: NonEmpty<Value> },
    Like { column: String, value: Pattern },
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn not_eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::NotEq {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn gt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Gt {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn ge(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Ge {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn ls(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Ls {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn le(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Le {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn any_of(column: impl Into<String>, values: NonEmpty<Value>) -> Self {
        Filter::In {
            column: column.into(),
            values,
        }
    }

    pub fn none_of(column: impl Into<String>, values: NonEmpty<Value>) -> Self {
        Filter::NotIn {
            column: column.into(),
            values,
        }
    }

    pub fn like(column: impl Into<String>, pattern: Pattern) -> Self {
        Filter::Like {
            column: column.into(),
            value: pattern,
        }
    }

    pub fn column(&self) -> &str {
        match self {
            Filter::Eq { column, .. }
            | Filter::NotEq { column, .. }
            | Filter::Gt { column, .. }
            | Filter::Ge { column, .. }
            | Filter::Ls { column, .. }
            | Filter::Le { column, .. }
            | Filter::In { column, .. }
            | Filter::NotIn { column, .. }
            | Filter::Like { column, .. } => column,
        }
    }
}

/// Pattern of a `like` filter, matched against the string form of a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "pattern", rename_all = "snake_case")]
pub enum Pattern {
    Regex(String),
    Contains(String),
    Wildcard(String),
}

/// Reply to a [`Request`], tagged by `action` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Response {
    Insert {
        table: String,
        element_changed: u64,
    },
    Update {
        table: String,
        element_changed: u64,
    },
    Merge {
        table: String,
        element_changed: u64,
    },
    Delete {
        table: String,
    },
    Select {
        table: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Vec<Record>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        count: Option<u64>,
    },
    Error {
        table: String,
        message: String,
    },
}

impl Response {
    pub fn table(&self) -> &str {
        match self {
            Response::Insert { table, .. }
            | Response::Update { table, .. }
            | Response::Merge { table, .. }
            | Response::Delete { table }
            | Response::Select { table, .. }
            | Response::Error { table, .. } => table,
        }
    }

    pub fn element_changed(&self) -> Option<u64> {
        match self {
            Response::Insert {
                element_changed, ..
            }
            | Response::Update {
                element_changed, ..
            }
            | Response::Merge {
                element_changed, ..
            } => Some(*element_changed),
            _ => None,
        }
    }

    pub fn rows(&self) -> Option<&[Record]> {
        match self {
            Response::Select {
                result: Some(rows), ..
            } => Some(rows),
            _ => None,
        }
    }

    pub fn count(&self) -> Option<u64> {
        match self {
            Response::Select { count, .. } => *count,
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::{Direction, Filter, Paginator, Pattern, Request, Response, Select};
    use crate::catalog::types::{Record, Value};
    use serde_json::json;

    #[test]
    fn request_wire_shape_uses_action_tag_and_camel_case() {
        let request = Request::update("data", "name", Record::new().with("name", "a"));
        let json = serde_json::to_value(&request).expect("encode");
        assert_eq!(
            json,
            json!({"action": "update", "table": "data", "keyName": "name", "elements": {"name": "a"}})
        );
    }

    #[test]
    fn select_decodes_filters_order_and_paginator() {
        let select: Request = serde_json::from_value(json!({
            "action": "select",
            "table": "data",
            "order": {"column": "n", "type": "des"},
            "paginator": {"page": 1, "pageSize": 10},
            "filters": [
                {"column": "n", "operation": "gt", "value": 1},
                {"column": "name", "operation": "in", "values": ["a", "b"]},
                {"column": "name", "operation": "like", "value": {"kind": "wildcard", "pattern": "a%"}}
            ]
        }))
        .expect("decode");
        let Request::Select(select) = select else {
            panic!("expected select");
        };
        let order = select.order.as_ref().expect("order");
        assert_eq!(order.direction, Direction::Desc);
        assert_eq!(select.paginator.map(|p| p.bounds()), Some((10, 20)));
        let filters = select.filters.as_ref().expect("filters");
        assert_eq!(filters.len(), 3);
        assert_eq!(filters[0], Filter::gt("n", 1));
        assert_eq!(
            filters[2],
            Filter::like("name", Pattern::Wildcard("a%".into()))
        );
    }

    #[test]
    fn empty_filter_list_and_unknown_action_decode_as_expected() {
        let err = serde_json::from_value::<Request>(json!({
            "action": "select", "table": "data", "filters": []
        }));
        assert!(err.is_err());

        let unknown: Request =
            serde_json::from_value(json!({"action": "truncate", "table": "data"})).expect("decode");
        assert_eq!(unknown, Request::Unknown);
        assert_eq!(unknown.table(), None);
    }

    #[test]
    fn count_response_omits_result() {
        let response = Response::Select {
            table: "data".into(),
            result: None,
            count: Some(3),
        };
        let json = serde_json::to_value(&response).expect("encode");
        assert_eq!(json, json!({"action": "select", "table": "data", "count": 3}));
        assert_eq!(response.count(), Some(3));
    }

    #[test]
    fn builder_accumulates_filters() {
        let select = Select::from_table("data")
            .filter(Filter::eq("name", "a"))
            .filter(Filter::gt("n", Value::Integer(1)))
            .order_by("n", Direction::Asc)
            .count();
        assert!(select.is_count());
        assert_eq!(select.filters.map(|f| f.len()), Some(2));
        assert_eq!(Paginator { page: 0, page_size: 5 }.bounds(), (0, 5));
    }
}
