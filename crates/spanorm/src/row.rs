//! Result-row surface handed back by the executor.

use crate::error::{OrmError, OrmResult};
use crate::value::Value;
use indexmap::IndexMap;

/// One result row: column names mapped to values, in select order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: IndexMap<String, Value>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a row from `(column, value)` pairs, keeping their order.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Self {
            columns: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Raw value of a column, if present.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.get(column)
    }

    /// Decode a column into a concrete type.
    pub fn try_get<T: FromValue>(&self, column: &str) -> OrmResult<T> {
        let value = self
            .columns
            .get(column)
            .ok_or_else(|| OrmError::decode(column, "column missing from row"))?;
        T::from_value(value).map_err(|message| OrmError::decode(column, message))
    }

    /// Value of the first column in select order.
    pub fn first_value(&self) -> Option<&Value> {
        self.columns.values().next()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Decode a single column value into a Rust type.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self, String>;
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self, String> {
        Ok(value.clone())
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self, String> {
        value
            .as_int()
            .ok_or_else(|| format!("expected integer, got {value:?}"))
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self, String> {
        value
            .as_float()
            .ok_or_else(|| format!("expected float, got {value:?}"))
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self, String> {
        value
            .as_bool()
            .ok_or_else(|| format!("expected bool, got {value:?}"))
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::String(s) => Ok(s.clone()),
            other => Err(format!("expected string, got {other:?}")),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self, String> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_and_decode() {
        let row = Row::from_pairs([("id", Value::Int(7)), ("name", Value::from("alice"))]);
        assert_eq!(row.get("id"), Some(&Value::Int(7)));
        assert_eq!(row.try_get::<i64>("id").unwrap(), 7);
        assert_eq!(row.try_get::<String>("name").unwrap(), "alice");
    }

    #[test]
    fn test_missing_column_is_decode_error() {
        let row = Row::from_pairs([("id", 1i64)]);
        let err = row.try_get::<i64>("nope").unwrap_err();
        assert!(matches!(err, OrmError::Decode { .. }));
    }

    #[test]
    fn test_optional_decode() {
        let row = Row::from_pairs([("age", Value::Null)]);
        assert_eq!(row.try_get::<Option<i64>>("age").unwrap(), None);
    }

    #[test]
    fn test_first_value_follows_select_order() {
        let row = Row::from_pairs([("b", 2i64), ("a", 1i64)]);
        assert_eq!(row.first_value(), Some(&Value::Int(2)));
    }
}
