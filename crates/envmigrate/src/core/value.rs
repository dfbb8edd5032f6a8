//! Record representation shared by every store adapter.
//!
//! Records are schemaless attribute maps, as in the key-value table stores
//! the engine migrates between. Ids and foreign-key values are compared as
//! strings regardless of whether the store holds them as strings or numbers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// A single record: attribute name -> JSON value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(pub Map<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Builder-style attribute setter.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(field.into(), value.into());
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    /// Attribute value as a key string. Strings are returned as-is, numbers
    /// in their canonical form; null, empty strings and composite values
    /// yield `None`.
    pub fn key_value(&self, field: &str) -> Option<String> {
        self.0.get(field).and_then(key_string)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Convert a scalar JSON value to the string form used for ids.
pub fn key_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(normalize_number(n).to_string()),
        _ => None,
    }
}

/// Collapse integral floating point numbers (e.g. `3.0`) to integers.
pub fn normalize_number(n: &Number) -> Number {
    if n.is_f64() {
        if let Some(f) = n.as_f64() {
            if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                return Number::from(f as i64);
            }
        }
    }
    n.clone()
}

/// Apply [`normalize_number`] recursively.
pub fn normalize_value(value: Value) -> Value {
    match value {
        Value::Number(n) => Value::Number(normalize_number(&n)),
        Value::Array(items) => Value::Array(items.into_iter().map(normalize_value).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, normalize_value(v)))
                .collect(),
        ),
        other => other,
    }
}
