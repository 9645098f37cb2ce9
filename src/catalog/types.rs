use crate::error::StashError;
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(CompactString),
}

impl Value {
    fn kind_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Boolean(_) => 1,
            Value::Integer(_) | Value::Float(_) => 2,
            Value::Text(_) => 3,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        let rank_cmp = self.kind_rank().cmp(&other.kind_rank());
        if rank_cmp != Ordering::Equal {
            return rank_cmp;
        }

        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => cmp_floats(*a, *b),
            (Value::Integer(a), Value::Float(b)) => cmp_int_float(*a, *b),
            (Value::Float(a), Value::Integer(b)) => cmp_int_float(*b, *a).reverse(),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}

/// `-0.0` and `0.0` are equal, both being equal to `Integer(0)`.
fn cmp_floats(a: f64, b: f64) -> Ordering {
    if a == b {
        Ordering::Equal
    } else {
        a.total_cmp(&b)
    }
}

/// Orders an integer against a float without rounding the integer through
/// `f64`. NaNs sort at the ends, as `total_cmp` places them.
fn cmp_int_float(int: i64, float: f64) -> Ordering {
    // 2^63; every float in [-2^63, 2^63) truncates to an exact i64.
    const I64_END: f64 = 9_223_372_036_854_775_808.0;

    if float.is_nan() {
        return if float.is_sign_negative() {
            Ordering::Greater
        } else {
            Ordering::Less
        };
    }
    if float >= I64_END {
        return Ordering::Less;
    }
    if float < -I64_END {
        return Ordering::Greater;
    }
    let whole = float.trunc();
    match int.cmp(&(whole as i64)) {
        Ordering::Equal if float > whole => Ordering::Less,
        Ordering::Equal if float < whole => Ordering::Greater,
        other => other,
    }
}

/// String coercion used by pattern filters.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Boolean(v) => write!(f, "{v}"),
            Value::Integer(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(v) => f.write_str(v),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(value as i64)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Integer(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.into())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value.into())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

/// One stored object: column name to value. A column that is absent is
/// different from a column holding `Null`; absent columns are never indexed.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: BTreeMap<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(column.into(), value.into());
        self
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields.get(column)
    }

    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(column.into(), value.into())
    }

    pub fn remove(&mut self, column: &str) -> Option<Value> {
        self.fields.remove(column)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.fields.contains_key(column)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Overlays every column of `patch` onto this record.
    pub fn merge(&mut self, patch: &Record) {
        for (column, value) in &patch.fields {
            self.fields.insert(column.clone(), value.clone());
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// A sequence that is never empty, checked on construction and on decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<T>", into = "Vec<T>")]
pub struct NonEmpty<T: Clone>(Vec<T>);

impl<T: Clone> NonEmpty<T> {
    pub fn new(first: T) -> Self {
        Self(vec![first])
    }

    pub fn from_vec(items: Vec<T>) -> Option<Self> {
        if items.is_empty() {
            None
        } else {
            Some(Self(items))
        }
    }

    pub fn push(&mut self, item: T) {
        self.0.push(item);
    }

    pub fn first(&self) -> &T {
        &self.0[0]
    }

    pub fn as_slice(&self) -> &[T] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<T> {
        self.0
    }

    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.0.iter()
    }
}

impl<T: Clone> TryFrom<Vec<T>> for NonEmpty<T> {
    type Error = StashError;

    fn try_from(items: Vec<T>) -> Result<Self, Self::Error> {
        Self::from_vec(items)
            .ok_or_else(|| StashError::Validation("sequence must not be empty".into()))
    }
}

impl<T: Clone> From<NonEmpty<T>> for Vec<T> {
    fn from(items: NonEmpty<T>) -> Self {
        items.0
    }
}

impl<T: Clone> std::ops::Deref for NonEmpty<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.0
    }
}

impl<'a, T: Clone> IntoIterator for &'a NonEmpty<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// A single element or a non-empty batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T: Clone> {
    Many(NonEmpty<T>),
    One(T),
}

impl<T: Clone> OneOrMany<T> {
    pub fn many(items: Vec<T>) -> Result<Self, StashError> {
        NonEmpty::try_from(items).map(OneOrMany::Many)
    }

    pub fn len(&self) -> usize {
        match self {
            OneOrMany::Many(items) => items.len(),
            OneOrMany::One(_) => 1,
        }
    }

    pub fn is_batch(&self) -> bool {
        matches!(self, OneOrMany::Many(_))
    }

    pub fn as_slice(&self) -> &[T] {
        match self {
            OneOrMany::Many(items) => items.as_slice(),
            OneOrMany::One(item) => std::slice::from_ref(item),
        }
    }

    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(items) => items.into_vec(),
            OneOrMany::One(item) => vec![item],
        }
    }
}

impl<T: Clone> From<T> for OneOrMany<T> {
    fn from(item: T) -> Self {
        OneOrMany::One(item)
    }
}

#[cfg(test)]
mod tests {
    use super::{NonEmpty, OneOrMany, Record, Value};
    use proptest::prelude::*;

    fn arb_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Boolean),
            any::<i64>().prop_map(Value::Integer),
            any::<f64>()
                .prop_filter("finite float only", |v| v.is_finite())
                .prop_map(Value::Float),
            "\\PC{0,16}".prop_map(|s| Value::Text(s.into())),
        ]
    }

    /// Numbers clustered where `i64 as f64` stops being exact.
    fn arb_number() -> impl Strategy<Value = Value> {
        const EDGE: i64 = 1 << 53;
        prop_oneof![
            (-3i64..=3).prop_map(|d| Value::Integer(EDGE + d)),
            (-3i64..=3).prop_map(|d| Value::Float((EDGE + d) as f64)),
            (-3i64..=3).prop_map(|d| Value::Integer(i64::MAX - d)),
            Just(Value::Float(i64::MAX as f64)),
            Just(Value::Float(i64::MIN as f64)),
            Just(Value::Integer(i64::MIN)),
            (-4i64..=4).prop_map(Value::Integer),
            (-8i32..=8).prop_map(|h| Value::Float(f64::from(h) / 2.0)),
            Just(Value::Float(-0.0)),
        ]
    }

    proptest! {
        #[test]
        fn ordering_is_transitive(a in arb_number(), b in arb_number(), c in arb_number()) {
            if a <= b && b <= c {
                prop_assert!(a <= c, "{:?} <= {:?} <= {:?}", a, b, c);
            }
            if a == b && b == c {
                prop_assert_eq!(&a, &c);
            }
            prop_assert_eq!(a.cmp(&b), b.cmp(&a).reverse());
        }

        #[test]
        fn ordering_is_antisymmetric(a in arb_value(), b in arb_value()) {
            prop_assert_eq!(a.cmp(&b), b.cmp(&a).reverse());
        }

        #[test]
        fn msgpack_roundtrip_preserves_ordering(a in arb_value(), b in arb_value()) {
            let a2: Value = rmp_serde::from_slice(&rmp_serde::to_vec_named(&a).unwrap()).unwrap();
            let b2: Value = rmp_serde::from_slice(&rmp_serde::to_vec_named(&b).unwrap()).unwrap();
            prop_assert_eq!(a.cmp(&b), a2.cmp(&b2));
        }
    }

    #[test]
    fn numbers_compare_across_integer_and_float() {
        assert_eq!(Value::Integer(2), Value::Float(2.0));
        assert!(Value::Integer(2) < Value::Float(2.5));
        assert!(Value::Float(1.5) < Value::Integer(2));
    }

    #[test]
    fn large_integers_do_not_collapse_onto_floats() {
        let edge = 1i64 << 53;
        assert_eq!(Value::Integer(edge), Value::Float(edge as f64));
        assert!(Value::Integer(edge + 1) > Value::Float(edge as f64));
        assert!(Value::Integer(i64::MAX) < Value::Float(i64::MAX as f64));
        assert_eq!(Value::Integer(i64::MIN), Value::Float(i64::MIN as f64));
        assert!(Value::Integer(-1) > Value::Float(-1.5));
        assert_eq!(Value::Integer(0), Value::Float(-0.0));
        assert_eq!(Value::Float(0.0), Value::Float(-0.0));
        assert!(Value::Integer(i64::MAX) < Value::Float(f64::INFINITY));
        assert!(Value::Integer(i64::MIN) > Value::Float(f64::NEG_INFINITY));
    }

    #[test]
    fn kinds_order_null_bool_number_text() {
        let mut values = vec![
            Value::from("a"),
            Value::Integer(1),
            Value::Boolean(true),
            Value::Null,
        ];
        values.sort();
        assert_eq!(
            values,
            vec![
                Value::Null,
                Value::Boolean(true),
                Value::Integer(1),
                Value::from("a")
            ]
        );
    }

    #[test]
    fn record_serializes_as_plain_object() {
        let record = Record::new().with("name", "a").with("n", 1);
        let json = serde_json::to_string(&record).expect("encode");
        assert_eq!(json, r#"{"n":1,"name":"a"}"#);
        let back: Record = serde_json::from_str(&json).expect("decode");
        assert_eq!(back, record);
    }

    #[test]
    fn record_merge_overlays_columns() {
        let mut record = Record::new().with("name", "b").with("n", 2);
        record.merge(&Record::new().with("n", 99).with("extra", true));
        assert_eq!(record.get("n"), Some(&Value::Integer(99)));
        assert_eq!(record.get("extra"), Some(&Value::Boolean(true)));
        assert_eq!(record.get("name"), Some(&Value::from("b")));
    }

    #[test]
    fn empty_sequences_are_rejected_on_decode() {
        let err = serde_json::from_str::<NonEmpty<Value>>("[]");
        assert!(err.is_err());
        let one: OneOrMany<Value> = serde_json::from_str("\"a\"").expect("single");
        assert_eq!(one.len(), 1);
        let many: OneOrMany<Value> = serde_json::from_str("[\"a\", \"b\"]").expect("batch");
        assert!(many.is_batch());
        assert_eq!(many.len(), 2);
        assert!(serde_json::from_str::<OneOrMany<Value>>("[]").is_err());
    }
}
