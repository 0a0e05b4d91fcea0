//! # Query Specification
//!
//! Filter/sort/limit/offset over stored events, evaluated against the JSON
//! payload. Every storage adapter runs queries through [`QuerySpec::apply`]
//! so they agree on semantics.
//!
//! ## Evaluation Order
//! ```text
//! rows ──► drop tombstones (unless include_deleted)
//!      ──► filters (AND)
//!      ──► sorts (stable, in declaration order)
//!      ──► offset ──► limit
//! ```
//!
//! Field names may be dotted paths into nested objects (`"profile.city"`).
//! Comparisons between different JSON types never match.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::RawEvent;

/// Comparison applied by a [`Filter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    /// Value must be an array; matches when the field equals any element.
    In,
    IsNull,
    IsNotNull,
    /// String contains substring, or array contains element.
    Contains,
}

/// One predicate on a payload field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sort {
    pub field: String,
    pub order: SortOrder,
}

/// A complete query against one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    pub table: String,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub sorts: Vec<Sort>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
    #[serde(default)]
    pub include_deleted: bool,
}

impl QuerySpec {
    pub fn table(table: impl Into<String>) -> Self {
        QuerySpec {
            table: table.into(),
            filters: Vec::new(),
            sorts: Vec::new(),
            limit: None,
            offset: None,
            include_deleted: false,
        }
    }

    pub fn filter(mut self, field: impl Into<String>, op: FilterOp, value: Value) -> Self {
        self.filters.push(Filter {
            field: field.into(),
            op,
            value,
        });
        self
    }

    pub fn sort(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sorts.push(Sort {
            field: field.into(),
            order,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn include_deleted(mut self, include: bool) -> Self {
        self.include_deleted = include;
        self
    }

    /// Returns true when the event passes the tombstone rule and all filters.
    pub fn matches(&self, event: &RawEvent) -> bool {
        if event.is_deleted() && !self.include_deleted {
            return false;
        }
        let payload = event.payload().unwrap_or(&Value::Null);
        self.filters.iter().all(|f| f.matches(payload))
    }

    /// Runs the full query over an unordered row set.
    pub fn apply(&self, rows: impl IntoIterator<Item = RawEvent>) -> Vec<RawEvent> {
        let mut rows: Vec<RawEvent> = rows.into_iter().filter(|e| self.matches(e)).collect();

        if !self.sorts.is_empty() {
            rows.sort_by(|a, b| {
                let pa = a.payload().unwrap_or(&Value::Null);
                let pb = b.payload().unwrap_or(&Value::Null);
                for sort in &self.sorts {
                    let ord = total_order(field(pa, &sort.field), field(pb, &sort.field));
                    let ord = match sort.order {
                        SortOrder::Asc => ord,
                        SortOrder::Desc => ord.reverse(),
                    };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
        }

        let offset = self.offset.unwrap_or(0);
        let limit = self.limit.unwrap_or(usize::MAX);
        rows.into_iter().skip(offset).take(limit).collect()
    }
}

impl Filter {
    pub fn matches(&self, payload: &Value) -> bool {
        let actual = field(payload, &self.field);

        match self.op {
            FilterOp::IsNull => actual.map_or(true, Value::is_null),
            FilterOp::IsNotNull => actual.is_some_and(|v| !v.is_null()),
            FilterOp::Eq => actual.is_some_and(|v| json_eq(v, &self.value)),
            FilterOp::Ne => !actual.is_some_and(|v| json_eq(v, &self.value)),
            FilterOp::Gt => compare(actual, &self.value) == Some(Ordering::Greater),
            FilterOp::Gte => matches!(
                compare(actual, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            FilterOp::Lt => compare(actual, &self.value) == Some(Ordering::Less),
            FilterOp::Lte => matches!(
                compare(actual, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            FilterOp::In => match (&self.value, actual) {
                (Value::Array(options), Some(v)) => options.iter().any(|o| json_eq(v, o)),
                _ => false,
            },
            FilterOp::Contains => match (actual, &self.value) {
                (Some(Value::String(s)), Value::String(needle)) => s.contains(needle.as_str()),
                (Some(Value::Array(items)), needle) => items.iter().any(|i| json_eq(i, needle)),
                _ => false,
            },
        }
    }
}

/// Resolves a dotted path inside a JSON value.
fn field<'a>(payload: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(payload, |current, key| current.get(key))
}

/// Equality that treats `1` and `1.0` as the same number.
fn json_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Ordering within one JSON type; `None` across types.
fn compare(actual: Option<&Value>, expected: &Value) -> Option<Ordering> {
    match (actual?, expected) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Bool(_)) => 1,
        Some(Value::Number(_)) => 2,
        Some(Value::String(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Object(_)) => 5,
    }
}

/// Total order for sorting: missing/null < bool < number < string < others.
fn total_order(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let rank = type_rank(a).cmp(&type_rank(b));
    if rank != Ordering::Equal {
        return rank;
    }
    match (a, b) {
        (Some(x), Some(y)) => compare(Some(x), y).unwrap_or(Ordering::Equal),
        _ => Ordering::Equal,
    }
}
