//! # Filter Tree
//!
//! Structured conditions accepted by every [`InstanceStore`](crate::store::InstanceStore)
//! operation: field equality, membership, comparison and boolean composition.
//!
//! Missing fields follow document-store semantics: `Eq(f, Null)` matches a
//! missing field, `Ne` and `NotIn` match it, everything else does not.

use crate::types::{Document, Value};
use std::cmp::Ordering;

/// Comparison operator of [`Filter::Cmp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Gt,
    Gte,
    Lt,
    Lte,
}

/// A condition tree over document fields.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Filter {
    /// Matches every document.
    #[default]
    All,
    Eq(String, Value),
    Ne(String, Value),
    In(String, Vec<Value>),
    NotIn(String, Vec<Value>),
    Cmp(String, CmpOp, Value),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    #[must_use]
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Filter::Eq(field.to_string(), value.into())
    }

    #[must_use]
    pub fn ne(field: &str, value: impl Into<Value>) -> Self {
        Filter::Ne(field.to_string(), value.into())
    }

    #[must_use]
    pub fn is_in<I, V>(field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Filter::In(field.to_string(), values.into_iter().map(Into::into).collect())
    }

    #[must_use]
    pub fn not_in<I, V>(field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Filter::NotIn(field.to_string(), values.into_iter().map(Into::into).collect())
    }

    #[must_use]
    pub fn cmp(field: &str, op: CmpOp, value: impl Into<Value>) -> Self {
        Filter::Cmp(field.to_string(), op, value.into())
    }

    /// Conjunction, flattening nested `And` and dropping `All`.
    #[must_use]
    pub fn and(self, other: Filter) -> Self {
        let mut parts = Vec::new();
        for f in [self, other] {
            match f {
                Filter::All => {}
                Filter::And(inner) => parts.extend(inner),
                f => parts.push(f),
            }
        }
        match parts.len() {
            0 => Filter::All,
            1 => parts.pop().unwrap_or_default(),
            _ => Filter::And(parts),
        }
    }

    #[must_use]
    pub fn or(self, other: Filter) -> Self {
        match self {
            Filter::Or(mut inner) => {
                inner.push(other);
                Filter::Or(inner)
            }
            f => Filter::Or(vec![f, other]),
        }
    }

    /// Evaluate the filter against a document.
    #[must_use]
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(field, value) => match doc.get(field) {
                Some(v) => v == value,
                None => value.is_null(),
            },
            Filter::Ne(field, value) => doc.get(field) != Some(value),
            Filter::In(field, values) => doc.get(field).is_some_and(|v| values.contains(v)),
            Filter::NotIn(field, values) => doc.get(field).is_none_or(|v| !values.contains(v)),
            Filter::Cmp(field, op, value) => doc
                .get(field)
                .and_then(|v| compare(v, value))
                .is_some_and(|ord| match op {
                    CmpOp::Gt => ord == Ordering::Greater,
                    CmpOp::Gte => ord != Ordering::Less,
                    CmpOp::Lt => ord == Ordering::Less,
                    CmpOp::Lte => ord != Ordering::Greater,
                }),
            Filter::And(parts) => parts.iter().all(|f| f.matches(doc)),
            Filter::Or(parts) => parts.iter().any(|f| f.matches(doc)),
        }
    }
}

/// Only values of the same kind are ordered against each other.
fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}
