use crate::catalog::types::Record;
use crate::error::StashError;
use crate::query::filter::{CompareOp, FilterOperation, FilterStage, compile_filters};
use crate::query::plan::{Direction, Paginator, Response, Select};
use crate::storage::handle::{Collection, QueryHandle, TableSnapshot};
use tracing::debug;

/// One step taken while executing a select, in execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStage {
    NativeFilter {
        operation: FilterOperation,
        column: String,
    },
    LinearFilter {
        operation: FilterOperation,
    },
    Count,
    NativeOrder {
        column: String,
    },
    Sort {
        column: String,
    },
    Slice,
    OffsetLimit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectOutcome {
    pub response: Response,
    pub stages: Vec<ExecutionStage>,
}

enum Output {
    Lazy(QueryHandle),
    Materialized(Vec<Record>),
}

pub fn execute_select(table: &TableSnapshot, select: &Select) -> Result<Response, StashError> {
    run_select(table, select).map(|outcome| outcome.response)
}

/// Executes a select and reports which stages ran. At most one filter stage
/// is answered from an index: the first one, when its first column is
/// indexed and it is not a `like` stage.
pub fn run_select(table: &TableSnapshot, select: &Select) -> Result<SelectOutcome, StashError> {
    if let Some(paginator) = &select.paginator
        && paginator.page_size == 0
    {
        return Err(StashError::Validation(format!(
            "select on '{}' has pageSize 0",
            select.table
        )));
    }

    let filters = select
        .filters
        .as_ref()
        .map(|filters| filters.as_slice())
        .unwrap_or_default();
    let mut trace = Vec::new();
    let mut handle = QueryHandle::IndexAccelerated(table.clone());
    for stage in compile_filters(filters)? {
        handle = apply_stage(handle, stage, &mut trace);
    }

    if select.is_count() {
        trace.push(ExecutionStage::Count);
        let count = handle.count() as u64;
        debug!(table = %select.table, count, "select count");
        return Ok(SelectOutcome {
            response: Response::Select {
                table: select.table.clone(),
                result: None,
                count: Some(count),
            },
            stages: trace,
        });
    }

    let mut output = Output::Lazy(handle);
    if let Some(order) = &select.order {
        output = apply_order(output, &order.column, order.direction, &mut trace);
    }
    if let Some(paginator) = &select.paginator {
        output = apply_paginator(output, paginator, &mut trace);
    }

    let rows = match output {
        Output::Lazy(handle) => handle.into_collection().to_array(),
        Output::Materialized(rows) => rows,
    };
    debug!(table = %select.table, rows = rows.len(), "select complete");
    Ok(SelectOutcome {
        response: Response::Select {
            table: select.table.clone(),
            result: Some(rows),
            count: None,
        },
        stages: trace,
    })
}

fn apply_stage(
    handle: QueryHandle,
    stage: FilterStage,
    trace: &mut Vec<ExecutionStage>,
) -> QueryHandle {
    let operation = stage.operation();
    match handle {
        QueryHandle::IndexAccelerated(table) => {
            if let Some(collection) = native_filter(&table, &stage) {
                let column = stage.first_column().to_string();
                debug!(table = table.name(), column = %column, operation = operation.as_str(), "native index stage");
                trace.push(ExecutionStage::NativeFilter { operation, column });
                let collection = match stage.residual() {
                    Some(residual) => collection.filter(residual),
                    None => collection,
                };
                return QueryHandle::LinearScan(collection);
            }
            debug!(table = table.name(), operation = operation.as_str(), "linear filter stage");
            trace.push(ExecutionStage::LinearFilter { operation });
            QueryHandle::LinearScan(table.to_collection().filter(stage.into_predicate()))
        }
        QueryHandle::LinearScan(collection) => {
            trace.push(ExecutionStage::LinearFilter { operation });
            QueryHandle::LinearScan(collection.filter(stage.into_predicate()))
        }
    }
}

fn native_filter(table: &TableSnapshot, stage: &FilterStage) -> Option<Collection> {
    if !stage.is_indexable() {
        return None;
    }
    let clause = table.where_clause(stage.first_column())?;
    match stage {
        FilterStage::Value(stage) => {
            let value = stage.values.first()?;
            Some(match stage.op {
                CompareOp::Eq => clause.equals(value),
                CompareOp::NotEq => clause.not_equal(value),
                CompareOp::Gt => clause.above(value),
                CompareOp::Ge => clause.above_or_equal(value),
                CompareOp::Ls => clause.below(value),
                CompareOp::Le => clause.below_or_equal(value),
            })
        }
        FilterStage::Membership(stage) => {
            let values = stage.values.first()?;
            Some(if stage.negated {
                clause.none_of(values)
            } else {
                clause.any_of(values)
            })
        }
        FilterStage::Like(_) => None,
    }
}

fn apply_order(
    output: Output,
    column: &str,
    direction: Direction,
    trace: &mut Vec<ExecutionStage>,
) -> Output {
    let handle = match output {
        Output::Lazy(handle) => handle,
        Output::Materialized(rows) => QueryHandle::LinearScan(Collection::from_records(rows)),
    };
    if let QueryHandle::IndexAccelerated(table) = &handle
        && let Some(ordered) = table.order_by(column)
    {
        trace.push(ExecutionStage::NativeOrder {
            column: column.to_string(),
        });
        let ordered = match direction {
            Direction::Asc => ordered,
            Direction::Desc => ordered.reverse(),
        };
        return Output::Lazy(QueryHandle::LinearScan(ordered));
    }

    trace.push(ExecutionStage::Sort {
        column: column.to_string(),
    });
    let mut collection = handle.into_collection();
    if direction == Direction::Desc {
        collection = collection.reverse();
    }
    Output::Materialized(collection.sort_by(column, direction))
}

fn apply_paginator(
    output: Output,
    paginator: &Paginator,
    trace: &mut Vec<ExecutionStage>,
) -> Output {
    let (start, end) = paginator.bounds();
    match output {
        Output::Materialized(rows) => {
            trace.push(ExecutionStage::Slice);
            let start = start.min(rows.len());
            let end = end.min(rows.len());
            Output::Materialized(rows[start..end].to_vec())
        }
        Output::Lazy(handle) => {
            trace.push(ExecutionStage::OffsetLimit);
            let page = handle.into_collection().offset(start).limit(end - start);
            Output::Lazy(QueryHandle::LinearScan(page))
        }
    }
}
