use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::Row;

/// Column predicate understood by the hosted store.
///
/// Semantics follow SQL: a missing or null column never satisfies `neq`,
/// `gte` or `lte`, and only satisfies `eq` against an explicit null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Filter {
    Eq { column: String, value: Value },
    Neq { column: String, value: Value },
    In { column: String, values: Vec<Value> },
    Gte { column: String, value: Value },
    Lte { column: String, value: Value },
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Serialize) -> Self {
        Self::Eq {
            column: column.into(),
            value: to_value(value),
        }
    }

    pub fn neq(column: impl Into<String>, value: impl Serialize) -> Self {
        Self::Neq {
            column: column.into(),
            value: to_value(value),
        }
    }

    pub fn is_in<I, V>(column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Serialize,
    {
        Self::In {
            column: column.into(),
            values: values.into_iter().map(to_value).collect(),
        }
    }

    pub fn gte(column: impl Into<String>, value: impl Serialize) -> Self {
        Self::Gte {
            column: column.into(),
            value: to_value(value),
        }
    }

    pub fn lte(column: impl Into<String>, value: impl Serialize) -> Self {
        Self::Lte {
            column: column.into(),
            value: to_value(value),
        }
    }

    /// `gte` against a timestamp, encoded the way the store stores it.
    pub fn gte_time(column: impl Into<String>, at: OffsetDateTime) -> Self {
        Self::Gte {
            column: column.into(),
            value: time_value(at),
        }
    }

    /// `lte` against a timestamp, encoded the way the store stores it.
    pub fn lte_time(column: impl Into<String>, at: OffsetDateTime) -> Self {
        Self::Lte {
            column: column.into(),
            value: time_value(at),
        }
    }

    pub fn column(&self) -> &str {
        match self {
            Filter::Eq { column, .. }
            | Filter::Neq { column, .. }
            | Filter::In { column, .. }
            | Filter::Gte { column, .. }
            | Filter::Lte { column, .. } => column,
        }
    }

    /// Evaluate the predicate against a row.
    pub fn matches(&self, row: &Row) -> bool {
        let cell = row.get(self.column()).unwrap_or(&Value::Null);
        match self {
            Filter::Eq { value, .. } => loose_eq(cell, value),
            Filter::Neq { value, .. } => !cell.is_null() && !loose_eq(cell, value),
            Filter::In { values, .. } => values.iter().any(|value| loose_eq(cell, value)),
            Filter::Gte { value, .. } => {
                matches!(compare(cell, value), Some(Ordering::Greater | Ordering::Equal))
            }
            Filter::Lte { value, .. } => {
                matches!(compare(cell, value), Some(Ordering::Less | Ordering::Equal))
            }
        }
    }

    /// True when every filter matches the row. An empty slice matches everything.
    pub fn all_match(filters: &[Filter], row: &Row) -> bool {
        filters.iter().all(|filter| filter.matches(row))
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Eq { column, value } => write!(f, "{column}=eq.{}", display_value(value)),
            Filter::Neq { column, value } => write!(f, "{column}=neq.{}", display_value(value)),
            Filter::In { column, values } => {
                let joined: Vec<String> = values.iter().map(display_value).collect();
                write!(f, "{column}=in.({})", joined.join(","))
            }
            Filter::Gte { column, value } => write!(f, "{column}=gte.{}", display_value(value)),
            Filter::Lte { column, value } => write!(f, "{column}=lte.{}", display_value(value)),
        }
    }
}

fn to_value(value: impl Serialize) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn time_value(at: OffsetDateTime) -> Value {
    at.format(&Rfc3339).map(Value::String).unwrap_or(Value::Null)
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => {
            match (
                OffsetDateTime::parse(a, &Rfc3339),
                OffsetDateTime::parse(b, &Rfc3339),
            ) {
                (Ok(a), Ok(b)) => Some(a.cmp(&b)),
                _ => Some(a.cmp(b)),
            }
        }
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::macros::datetime;

    use super::*;

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => panic!("row fixture must be an object"),
        }
    }

    #[test]
    fn eq_treats_integers_and_floats_alike() {
        let row = row(json!({ "quantity": 3 }));
        assert!(Filter::eq("quantity", 3.0).matches(&row));
        assert!(!Filter::eq("quantity", 4).matches(&row));
    }

    #[test]
    fn neq_never_matches_missing_columns() {
        let row = row(json!({ "status": "pending" }));
        assert!(Filter::neq("status", "cancelled").matches(&row));
        assert!(!Filter::neq("delivery_method", "pickup").matches(&row));
    }

    #[test]
    fn in_matches_any_listed_value() {
        let row = row(json!({ "cart_id": "b" }));
        assert!(Filter::is_in("cart_id", ["a", "b"]).matches(&row));
        assert!(!Filter::is_in("cart_id", Vec::<String>::new()).matches(&row));
    }

    #[test]
    fn timestamps_compare_chronologically() {
        // Fractional seconds sort before `Z` lexically, so string order would be wrong here.
        let row = row(json!({ "created_at": "2026-10-19T00:00:00.500Z" }));
        let midnight = datetime!(2026-10-19 00:00 UTC);
        assert!(Filter::gte_time("created_at", midnight).matches(&row));
        assert!(!Filter::lte_time("created_at", midnight).matches(&row));
    }

    #[test]
    fn range_filters_skip_incomparable_values() {
        let row = row(json!({ "stock": "plenty" }));
        assert!(!Filter::gte("stock", 1).matches(&row));
        assert!(!Filter::lte("stock", 1).matches(&row));
    }

    #[test]
    fn empty_filter_list_matches_everything() {
        assert!(Filter::all_match(&[], &row(json!({}))));
    }

    #[test]
    fn display_uses_store_query_syntax() {
        assert_eq!(Filter::eq("user_id", "u1").to_string(), "user_id=eq.u1");
        assert_eq!(
            Filter::is_in("id", [1, 2]).to_string(),
            "id=in.(1,2)"
        );
    }
}
