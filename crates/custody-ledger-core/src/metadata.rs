//! Structured metadata attached to events.
//!
//! Metadata is open-ended (per event type) but typed: every value is one of
//! the [`MetadataValue`] variants, and maps are ordered so that iteration
//! order never depends on insertion order.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Event metadata: an ordered map of named values.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// A structured metadata value.
///
/// Serializes to plain JSON (`null`, `true`, `42`, `1.5`, `"text"`, arrays,
/// objects).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Array(Vec<MetadataValue>),
    Map(BTreeMap<String, MetadataValue>),
}

impl MetadataValue {
    /// Borrow as text, if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MetadataValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Read as f64 for integer and float values.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetadataValue::Integer(i) => Some(*i as f64),
            MetadataValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Nesting depth: scalars are 0, an array or map adds one level.
    pub fn depth(&self) -> usize {
        match self {
            MetadataValue::Array(items) => 1 + items.iter().map(Self::depth).max().unwrap_or(0),
            MetadataValue::Map(map) => 1 + map.values().map(Self::depth).max().unwrap_or(0),
            _ => 0,
        }
    }
}

impl From<bool> for MetadataValue {
    fn from(v: bool) -> Self {
        MetadataValue::Bool(v)
    }
}

impl From<i64> for MetadataValue {
    fn from(v: i64) -> Self {
        MetadataValue::Integer(v)
    }
}

impl From<f64> for MetadataValue {
    fn from(v: f64) -> Self {
        MetadataValue::Float(v)
    }
}

impl From<&str> for MetadataValue {
    fn from(v: &str) -> Self {
        MetadataValue::Text(v.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(v: String) -> Self {
        MetadataValue::Text(v)
    }
}

impl From<serde_json::Value> for MetadataValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => MetadataValue::Null,
            Value::Bool(b) => MetadataValue::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => MetadataValue::Integer(i),
                None => MetadataValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => MetadataValue::Text(s),
            Value::Array(items) => {
                MetadataValue::Array(items.into_iter().map(MetadataValue::from).collect())
            }
            Value::Object(map) => MetadataValue::Map(
                map.into_iter()
                    .map(|(k, v)| (k, MetadataValue::from(v)))
                    .collect(),
            ),
        }
    }
}
