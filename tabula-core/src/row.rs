//! Rows and row identity

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Placeholder rendered for missing or empty cell values.
pub const EMPTY_CELL: &str = "-";

/// A single table row: field key to scalar value.
///
/// Fields are kept in sorted key order, so serialized rows are stable
/// regardless of how they were built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(Map<String, Value>);

impl Row {
    /// Create an empty row.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Builder-style setter.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Convert a JSON value into a row. Only objects are rows.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Identity of this row under `field`, if it has one.
    ///
    /// A missing or `null` value means the row cannot be identified.
    pub fn key_of(&self, field: &str) -> Option<RowKey> {
        self.0.get(field).and_then(RowKey::from_value)
    }

    /// Text form of a cell for compact rendering.
    /// Missing, `null` and empty-string cells render as [`EMPTY_CELL`].
    pub fn display_value(&self, field: &str) -> String {
        match self.0.get(field) {
            None | Some(Value::Null) => EMPTY_CELL.to_string(),
            Some(Value::String(s)) if s.is_empty() => EMPTY_CELL.to_string(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }
}

impl From<Map<String, Value>> for Row {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<Row> for Value {
    fn from(row: Row) -> Self {
        Value::Object(row.0)
    }
}

/// Hashable identity of a row under its primary key field.
///
/// Values of different JSON types never compare equal, so `"1"` and `1`
/// are distinct keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RowKey {
    Bool(bool),
    Number(String),
    Text(String),
    /// Arrays and objects, compared by their serialized form
    Structured(String),
}

impl RowKey {
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(b) => Some(RowKey::Bool(*b)),
            Value::Number(n) => Some(RowKey::Number(n.to_string())),
            Value::String(s) => Some(RowKey::Text(s.clone())),
            other => Some(RowKey::Structured(other.to_string())),
        }
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowKey::Bool(b) => write!(f, "{}", b),
            RowKey::Number(n) | RowKey::Text(n) | RowKey::Structured(n) => f.write_str(n),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            "[a-z0-9]{0,6}".prop_map(Value::from),
            (-50i64..50).prop_map(Value::from),
            any::<bool>().prop_map(Value::from),
            Just(Value::Null),
        ]
    }

    fn arb_row() -> impl Strategy<Value = Row> {
        prop::collection::btree_map("[a-z]{1,4}", arb_scalar(), 0..6)
            .prop_map(|cells| cells.into_iter().fold(Row::new(), |row, (k, v)| row.with(k, v)))
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Property 1: two scalar cells yield the same key exactly when they
        /// are the same non-null JSON value
        #[test]
        fn prop_key_equality_matches_value_equality(a in arb_scalar(), b in arb_scalar()) {
            let ka = RowKey::from_value(&a);
            let kb = RowKey::from_value(&b);
            prop_assert_eq!(ka.is_none(), a.is_null());
            if !a.is_null() && !b.is_null() {
                prop_assert_eq!(ka == kb, a == b);
            }
        }

        /// Property 2: a row survives a JSON round trip unchanged
        #[test]
        fn prop_row_json_round_trip(row in arb_row()) {
            let text = serde_json::to_string(&row).unwrap();
            let back: Row = serde_json::from_str(&text).unwrap();
            prop_assert_eq!(back, row);
        }

        /// Property 3: every cell renders as non-empty text
        #[test]
        fn prop_display_value_never_empty(row in arb_row(), field in "[a-z]{1,4}") {
            prop_assert!(!row.display_value(&field).is_empty());
        }
    }
}
