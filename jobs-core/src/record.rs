//! Untyped query result rows and typed access to their fields

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

/// Column that carries the row timestamp in a pivoted Flux result
pub const TIME_COLUMN: &str = "_time";

/// A single cell value as decoded from the store
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    String(String),
    Float(f64),
    Integer(i64),
    UInteger(u64),
    Boolean(bool),
    Time(DateTime<Utc>),
    /// Flux duration literal, kept verbatim
    Duration(String),
    Binary(Vec<u8>),
}

impl FieldValue {
    /// Name of the value's type using the store's datatype vocabulary
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::String(_) => "string",
            FieldValue::Float(_) => "double",
            FieldValue::Integer(_) => "long",
            FieldValue::UInteger(_) => "unsignedLong",
            FieldValue::Boolean(_) => "boolean",
            FieldValue::Time(_) => "dateTime",
            FieldValue::Duration(_) => "duration",
            FieldValue::Binary(_) => "base64Binary",
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::String(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Boolean(value)
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(value: Vec<u8>) -> Self {
        FieldValue::Binary(value)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        FieldValue::Time(value)
    }
}

/// Outcome of reading a typed field from a [`RawRecord`]
#[derive(Debug, Clone, PartialEq)]
pub enum FieldAccess<T> {
    Present(T),
    Missing,
    WrongType { found: &'static str },
}

/// One row of a query result. Null cells are simply absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord {
    values: BTreeMap<String, FieldValue>,
}

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value<K: Into<String>, V: Into<FieldValue>>(mut self, key: K, value: V) -> Self {
        self.insert(key, value);
        self
    }

    pub fn with_time(self, time: DateTime<Utc>) -> Self {
        self.with_value(TIME_COLUMN, time)
    }

    pub fn insert<K: Into<String>, V: Into<FieldValue>>(&mut self, key: K, value: V) {
        self.values.insert(key.into(), value.into());
    }

    pub fn value_by_key(&self, key: &str) -> Option<&FieldValue> {
        self.values.get(key)
    }

    /// Row timestamp, if the row carries a time-typed `_time` column
    pub fn time(&self) -> Option<DateTime<Utc>> {
        match self.values.get(TIME_COLUMN) {
            Some(FieldValue::Time(time)) => Some(*time),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn string(&self, key: &str) -> FieldAccess<&str> {
        match self.values.get(key) {
            Some(FieldValue::String(value)) => FieldAccess::Present(value.as_str()),
            Some(other) => FieldAccess::WrongType {
                found: other.type_name(),
            },
            None => FieldAccess::Missing,
        }
    }

    /// Float-typed field. Integer columns are not widened.
    pub fn float(&self, key: &str) -> FieldAccess<f64> {
        match self.values.get(key) {
            Some(FieldValue::Float(value)) => FieldAccess::Present(*value),
            Some(other) => FieldAccess::WrongType {
                found: other.type_name(),
            },
            None => FieldAccess::Missing,
        }
    }
}
