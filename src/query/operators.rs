use crate::catalog::types::{Record, Value};
use crate::query::plan::Direction;
use std::cmp::Ordering;
use std::sync::Arc;

pub type Predicate = Arc<dyn Fn(&Record) -> bool + Send + Sync>;

pub trait Operator {
    fn next(&mut self) -> Option<Record>;
    fn rows_examined(&self) -> usize {
        0
    }
}

pub struct ScanOperator {
    rows: Box<dyn Iterator<Item = Record> + Send>,
    examined: usize,
}

impl ScanOperator {
    pub fn new<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = Record>,
        I::IntoIter: Iterator<Item = Record> + Send + 'static,
    {
        Self {
            rows: Box::new(rows.into_iter()),
            examined: 0,
        }
    }
}

impl Operator for ScanOperator {
    fn next(&mut self) -> Option<Record> {
        let row = self.rows.next()?;
        self.examined += 1;
        Some(row)
    }

    fn rows_examined(&self) -> usize {
        self.examined
    }
}

pub struct FilterOperator {
    child: Box<dyn Operator + Send>,
    predicate: Predicate,
}

impl FilterOperator {
    pub fn new(child: Box<dyn Operator + Send>, predicate: Predicate) -> Self {
        Self { child, predicate }
    }
}

impl Operator for FilterOperator {
    fn next(&mut self) -> Option<Record> {
        loop {
            let row = self.child.next()?;
            if (self.predicate)(&row) {
                return Some(row);
            }
        }
    }

    fn rows_examined(&self) -> usize {
        self.child.rows_examined()
    }
}

pub struct OffsetOperator {
    child: Box<dyn Operator + Send>,
    skip: usize,
}

impl OffsetOperator {
    pub fn new(child: Box<dyn Operator + Send>, skip: usize) -> Self {
        Self { child, skip }
    }
}

impl Operator for OffsetOperator {
    fn next(&mut self) -> Option<Record> {
        while self.skip > 0 {
            self.child.next()?;
            self.skip -= 1;
        }
        self.child.next()
    }

    fn rows_examined(&self) -> usize {
        self.child.rows_examined()
    }
}

pub struct LimitOperator {
    child: Box<dyn Operator + Send>,
    remaining: usize,
}

impl LimitOperator {
    pub fn new(child: Box<dyn Operator + Send>, limit: usize) -> Self {
        Self {
            child,
            remaining: limit,
        }
    }
}

impl Operator for LimitOperator {
    fn next(&mut self) -> Option<Record> {
        if self.remaining == 0 {
            return None;
        }
        let row = self.child.next()?;
        self.remaining -= 1;
        Some(row)
    }

    fn rows_examined(&self) -> usize {
        self.child.rows_examined()
    }
}

/// Drains its child on the first pull and yields rows back to front.
pub struct ReverseOperator {
    child: Option<Box<dyn Operator + Send>>,
    rows: Vec<Record>,
    examined: usize,
}

impl ReverseOperator {
    pub fn new(child: Box<dyn Operator + Send>) -> Self {
        Self {
            child: Some(child),
            rows: Vec::new(),
            examined: 0,
        }
    }
}

impl Operator for ReverseOperator {
    fn next(&mut self) -> Option<Record> {
        if let Some(mut child) = self.child.take() {
            while let Some(row) = child.next() {
                self.rows.push(row);
            }
            self.examined = child.rows_examined();
        }
        self.rows.pop()
    }

    fn rows_examined(&self) -> usize {
        self.examined
    }
}

pub struct SortOperator {
    rows: std::vec::IntoIter<Record>,
    examined: usize,
}

impl SortOperator {
    /// Stable sort on one column. Rows lacking the column (or holding `Null`)
    /// sort lowest, so they lead ascending output and trail descending output.
    pub fn new(mut child: Box<dyn Operator + Send>, column: &str, direction: Direction) -> Self {
        let mut rows = Vec::new();
        while let Some(row) = child.next() {
            rows.push(row);
        }
        let examined = child.rows_examined();
        rows.sort_by(|a, b| {
            let cmp = sort_key(a, column).cmp(&sort_key(b, column));
            match direction {
                Direction::Asc => cmp,
                Direction::Desc => cmp.reverse(),
            }
        });
        Self {
            rows: rows.into_iter(),
            examined,
        }
    }
}

impl Operator for SortOperator {
    fn next(&mut self) -> Option<Record> {
        self.rows.next()
    }

    fn rows_examined(&self) -> usize {
        self.examined
    }
}

fn sort_key<'a>(row: &'a Record, column: &str) -> Option<&'a Value> {
    row.get(column).filter(|value| !value.is_null())
}

/// Compares a stored field against a filter operand. A field that is absent
/// or `Null` is incomparable, which makes every predicate on it false.
pub fn compare_values(field: Option<&Value>, operand: &Value) -> Option<Ordering> {
    match field {
        None | Some(Value::Null) => None,
        Some(value) => Some(value.cmp(operand)),
    }
}

/// SQL-style wildcard match: `%` is any run of characters, `_` is exactly one.
pub fn like_match(value: &str, pattern: &str) -> bool {
    let text: Vec<char> = value.chars().collect();
    let pat: Vec<char> = pattern.chars().collect();
    let mut ti = 0usize;
    let mut pi = 0usize;
    let mut star_pi: Option<usize> = None;
    let mut star_ti = 0usize;

    while ti < text.len() {
        if pi < pat.len() && (pat[pi] == '_' || pat[pi] == text[ti]) {
            ti += 1;
            pi += 1;
            continue;
        }
        if pi < pat.len() && pat[pi] == '%' {
            star_pi = Some(pi);
            pi += 1;
            star_ti = ti;
            continue;
        }
        if let Some(saved_pi) = star_pi {
            pi = saved_pi + 1;
            star_ti += 1;
            ti = star_ti;
            continue;
        }
        return false;
    }

    while pi < pat.len() && pat[pi] == '%' {
        pi += 1;
    }

    pi == pat.len()
}

pub fn drain(mut op: Box<dyn Operator + Send>) -> Vec<Record> {
    let mut rows = Vec::new();
    while let Some(row) = op.next() {
        rows.push(row);
    }
    rows
}
