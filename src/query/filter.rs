use crate::catalog::types::{NonEmpty, Record, Value};
use crate::error::StashError;
use crate::query::operators::{Predicate, compare_values, like_match};
use crate::query::plan::{Filter, Pattern};
use regex::Regex;
use std::cmp::Ordering;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOperation {
    Eq,
    NotEq,
    Gt,
    Ge,
    Ls,
    Le,
    In,
    NotIn,
    Like,
}

/// Order in which filter stages are applied to a select.
pub const STAGE_ORDER: [FilterOperation; 9] = [
    FilterOperation::Eq,
    FilterOperation::NotEq,
    FilterOperation::Gt,
    FilterOperation::Ge,
    FilterOperation::Ls,
    FilterOperation::Le,
    FilterOperation::In,
    FilterOperation::NotIn,
    FilterOperation::Like,
];

impl FilterOperation {
    pub fn of(filter: &Filter) -> Self {
        match filter {
            Filter::Eq { .. } => FilterOperation::Eq,
            Filter::NotEq { .. } => FilterOperation::NotEq,
            Filter::Gt { .. } => FilterOperation::Gt,
            Filter::Ge { .. } => FilterOperation::Ge,
            Filter::Ls { .. } => FilterOperation::Ls,
            Filter::Le { .. } => FilterOperation::Le,
            Filter::In { .. } => FilterOperation::In,
            Filter::NotIn { .. } => FilterOperation::NotIn,
            Filter::Like { .. } => FilterOperation::Like,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FilterOperation::Eq => "eq",
            FilterOperation::NotEq => "not_eq",
            FilterOperation::Gt => "gt",
            FilterOperation::Ge => "ge",
            FilterOperation::Ls => "ls",
            FilterOperation::Le => "le",
            FilterOperation::In => "in",
            FilterOperation::NotIn => "not_in",
            FilterOperation::Like => "like",
        }
    }
}

pub struct SplitFilters<'a> {
    pub filtered: Vec<&'a Filter>,
    pub remains: Vec<&'a Filter>,
}

/// Separates the filters of one operation kind from the rest, keeping the
/// relative order of both halves.
pub fn split_filters<'a>(filters: &[&'a Filter], operation: FilterOperation) -> SplitFilters<'a> {
    let (filtered, remains): (Vec<&'a Filter>, Vec<&'a Filter>) = filters
        .iter()
        .copied()
        .partition(|filter| FilterOperation::of(filter) == operation);
    SplitFilters { filtered, remains }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Gt,
    Ge,
    Ls,
    Le,
}

impl CompareOp {
    pub fn test(self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::NotEq => ordering != Ordering::Equal,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Ge => ordering != Ordering::Less,
            CompareOp::Ls => ordering == Ordering::Less,
            CompareOp::Le => ordering != Ordering::Greater,
        }
    }
}

/// Comparison stage: parallel `(column, value)` arrays of one operator.
#[derive(Debug, Clone)]
pub struct ValueStage {
    pub op: CompareOp,
    pub columns: Vec<String>,
    pub values: Vec<Value>,
}

#[derive(Debug, Clone)]
pub struct MembershipStage {
    pub negated: bool,
    pub columns: Vec<String>,
    pub values: Vec<NonEmpty<Value>>,
}

#[derive(Debug, Clone)]
pub enum CompiledPattern {
    Regex(Regex),
    Contains(String),
    Wildcard(String),
}

impl CompiledPattern {
    pub fn compile(pattern: &Pattern) -> Result<Self, StashError> {
        match pattern {
            Pattern::Regex(source) => Regex::new(source)
                .map(CompiledPattern::Regex)
                .map_err(|e| StashError::Validation(format!("invalid like pattern '{source}': {e}"))),
            Pattern::Contains(needle) => Ok(CompiledPattern::Contains(needle.clone())),
            Pattern::Wildcard(pattern) => Ok(CompiledPattern::Wildcard(pattern.clone())),
        }
    }

    pub fn is_match(&self, text: &str) -> bool {
        match self {
            CompiledPattern::Regex(regex) => regex.is_match(text),
            CompiledPattern::Contains(needle) => text.contains(needle.as_str()),
            CompiledPattern::Wildcard(pattern) => like_match(text, pattern),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LikeStage {
    pub columns: Vec<String>,
    pub patterns: Vec<CompiledPattern>,
}

/// All filters of one operation kind, applied together.
#[derive(Debug, Clone)]
pub enum FilterStage {
    Value(ValueStage),
    Membership(MembershipStage),
    Like(LikeStage),
}

impl FilterStage {
    pub fn operation(&self) -> FilterOperation {
        match self {
            FilterStage::Value(stage) => match stage.op {
                CompareOp::Eq => FilterOperation::Eq,
                CompareOp::NotEq => FilterOperation::NotEq,
                CompareOp::Gt => FilterOperation::Gt,
                CompareOp::Ge => FilterOperation::Ge,
                CompareOp::Ls => FilterOperation::Ls,
                CompareOp::Le => FilterOperation::Le,
            },
            FilterStage::Membership(stage) if stage.negated => FilterOperation::NotIn,
            FilterStage::Membership(_) => FilterOperation::In,
            FilterStage::Like(_) => FilterOperation::Like,
        }
    }

    pub fn columns(&self) -> &[String] {
        match self {
            FilterStage::Value(stage) => &stage.columns,
            FilterStage::Membership(stage) => &stage.columns,
            FilterStage::Like(stage) => &stage.columns,
        }
    }

    pub fn first_column(&self) -> &str {
        self.columns().first().map(String::as_str).unwrap_or_default()
    }

    /// Like stages always run per record.
    pub fn is_indexable(&self) -> bool {
        !matches!(self, FilterStage::Like(_))
    }

    /// True when `record` satisfies every column of the stage.
    pub fn matches(&self, record: &Record) -> bool {
        self.matches_from(record, 0)
    }

    fn matches_from(&self, record: &Record, start: usize) -> bool {
        match self {
            FilterStage::Value(stage) => stage
                .columns
                .iter()
                .zip(&stage.values)
                .skip(start)
                .all(|(column, value)| {
                    compare_values(record.get(column), value).is_some_and(|ord| stage.op.test(ord))
                }),
            FilterStage::Membership(stage) => stage
                .columns
                .iter()
                .zip(&stage.values)
                .skip(start)
                .all(|(column, values)| {
                    let Some(field) = record.get(column).filter(|v| !v.is_null()) else {
                        return false;
                    };
                    values.iter().any(|candidate| candidate == field) != stage.negated
                }),
            FilterStage::Like(stage) => stage
                .columns
                .iter()
                .zip(&stage.patterns)
                .skip(start)
                .all(|(column, pattern)| {
                    record
                        .get(column)
                        .is_some_and(|field| pattern.is_match(&field.to_string()))
                }),
        }
    }

    pub fn into_predicate(self) -> Predicate {
        let stage = Arc::new(self);
        Arc::new(move |record: &Record| stage.matches(record))
    }

    /// Predicate over every column but the first, for use after a native
    /// index step on the first column. `None` when nothing remains.
    pub fn residual(&self) -> Option<Predicate> {
        if self.columns().len() < 2 {
            return None;
        }
        let stage = Arc::new(self.clone());
        Some(Arc::new(move |record: &Record| stage.matches_from(record, 1)))
    }
}

/// Compiles filters into non-empty stages in [`STAGE_ORDER`].
pub fn compile_filters(filters: &[Filter]) -> Result<Vec<FilterStage>, StashError> {
    let mut remaining: Vec<&Filter> = filters.iter().collect();
    let mut stages = Vec::new();
    for operation in STAGE_ORDER {
        let split = split_filters(&remaining, operation);
        remaining = split.remains;
        if split.filtered.is_empty() {
            continue;
        }
        stages.push(build_stage(operation, &split.filtered)?);
    }
    Ok(stages)
}

fn build_stage(operation: FilterOperation, filters: &[&Filter]) -> Result<FilterStage, StashError> {
    let columns: Vec<String> = filters.iter().map(|f| f.column().to_string()).collect();
    let stage = match operation {
        FilterOperation::In | FilterOperation::NotIn => FilterStage::Membership(MembershipStage {
            negated: operation == FilterOperation::NotIn,
            columns,
            values: filters
                .iter()
                .filter_map(|filter| match filter {
                    Filter::In { values, .. } | Filter::NotIn { values, .. } => Some(values.clone()),
                    _ => None,
                })
                .collect(),
        }),
        FilterOperation::Like => FilterStage::Like(LikeStage {
            columns,
            patterns: filters
                .iter()
                .filter_map(|filter| match filter {
                    Filter::Like { value, .. } => Some(CompiledPattern::compile(value)),
                    _ => None,
                })
                .collect::<Result<_, _>>()?,
        }),
        _ => {
            let op = match operation {
                FilterOperation::Eq => CompareOp::Eq,
                FilterOperation::NotEq => CompareOp::NotEq,
                FilterOperation::Gt => CompareOp::Gt,
                FilterOperation::Ge => CompareOp::Ge,
                FilterOperation::Ls => CompareOp::Ls,
                _ => CompareOp::Le,
            };
            FilterStage::Value(ValueStage {
                op,
                columns,
                values: filters
                    .iter()
                    .filter_map(|filter| match filter {
                        Filter::Eq { value, .. }
                        | Filter::NotEq { value, .. }
                        | Filter::Gt { value, .. }
                        | Filter::Ge { value, .. }
                        | Filter::Ls { value, .. }
                        | Filter::Le { value, .. } => Some(value.clone()),
                        _ => None,
                    })
                    .collect(),
            })
        }
    };
    Ok(stage)
}

#[cfg(test)]
mod tests {
    use super::{FilterOperation, FilterStage, compile_filters, split_filters};
    use crate::catalog::types::{NonEmpty, Record, Value};
    use crate::error::StashErrorCode;
    use crate::query::plan::{Filter, Pattern};

    #[test]
    fn split_preserves_relative_order() {
        let filters = [
            Filter::gt("a", 1),
            Filter::eq("b", 2),
            Filter::gt("c", 3),
            Filter::le("d", 4),
        ];
        let refs: Vec<&Filter> = filters.iter().collect();
        let split = split_filters(&refs, FilterOperation::Gt);
        let columns: Vec<&str> = split.filtered.iter().map(|f| f.column()).collect();
        assert_eq!(columns, vec!["a", "c"]);
        let rest: Vec<&str> = split.remains.iter().map(|f| f.column()).collect();
        assert_eq!(rest, vec!["b", "d"]);
    }

    #[test]
    fn stages_follow_fixed_order_and_group_columns() {
        let filters = vec![
            Filter::like("name", Pattern::Contains("x".into())),
            Filter::any_of("k", NonEmpty::new(Value::Integer(1))),
            Filter::gt("n", 1),
            Filter::eq("a", 1),
            Filter::gt("m", 2),
        ];
        let stages = compile_filters(&filters).expect("compile");
        let ops: Vec<FilterOperation> = stages.iter().map(FilterStage::operation).collect();
        assert_eq!(
            ops,
            vec![
                FilterOperation::Eq,
                FilterOperation::Gt,
                FilterOperation::In,
                FilterOperation::Like
            ]
        );
        assert_eq!(stages[1].columns(), &["n".to_string(), "m".to_string()]);
        assert!(stages[1].residual().is_some());
        assert!(stages[0].residual().is_none());
        assert!(!stages[3].is_indexable());
    }

    #[test]
    fn records_without_the_column_never_match() {
        let stages = compile_filters(&[
            Filter::not_eq("n", 1),
            Filter::none_of("k", NonEmpty::new(Value::Integer(1))),
        ])
        .expect("compile");
        let bare = Record::new().with("name", "a");
        assert!(stages.iter().all(|stage| !stage.matches(&bare)));
        let full = Record::new().with("n", 2).with("k", 3);
        assert!(stages.iter().all(|stage| stage.matches(&full)));
    }

    #[test]
    fn like_patterns_match_string_form() {
        let stages = compile_filters(&[
            Filter::like("n", Pattern::Regex("^1[0-9]$".into())),
            Filter::like("name", Pattern::Wildcard("a_c%".into())),
        ])
        .expect("compile");
        let record = Record::new().with("n", 12).with("name", "abcdef");
        assert!(stages[0].matches(&record));
        let miss = Record::new().with("n", 2).with("name", "abcdef");
        assert!(!stages[0].matches(&miss));
    }

    #[test]
    fn invalid_regex_is_a_validation_error() {
        let err = compile_filters(&[Filter::like("n", Pattern::Regex("(".into()))])
            .expect_err("bad regex");
        assert_eq!(err.code(), StashErrorCode::Validation);
    }
}
