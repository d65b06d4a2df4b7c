//! # Ticker Record
//!
//! The consumer-facing form of one decoded frame: a flat map from field name to
//! a normalized value. Only fields present on the wire appear.
//!
//! Normalization is part of the contract, not a presentation detail:
//! - 64-bit integers are base-10 strings, so no precision is lost in JSON;
//! - enum fields carry their symbolic name, never the number;
//! - floating point values are the shortest decimal string that round-trips at
//!   the declared width (`191.25`, not `191.25000610351562`).

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// A single normalized field value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Strings, 64-bit integers, floats, enum names and base64 bytes.
    Text(String),
    /// 32-bit integers.
    Integer(i64),
    Bool(bool),
}

impl FieldValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(text) => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(value) => Some(*value),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(text) => f.write_str(text),
            FieldValue::Integer(value) => write!(f, "{}", value),
            FieldValue::Bool(value) => write!(f, "{}", value),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

/// One decoded update. Serializes as a flat JSON object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TickerRecord {
    fields: BTreeMap<String, FieldValue>,
}

impl TickerRecord {
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Text value of `name`, if present and textual.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(FieldValue::as_str)
    }

    /// The instrument symbol (`id` field).
    pub fn symbol(&self) -> Option<&str> {
        self.text("id")
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Sets a field; a repeated tag on the wire overwrites (last one wins).
    pub(crate) fn insert(&mut self, name: String, value: FieldValue) {
        self.fields.insert(name, value);
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.fields
                .iter()
                .map(|(name, value)| {
                    let json = match value {
                        FieldValue::Text(text) => serde_json::Value::from(text.as_str()),
                        FieldValue::Integer(number) => serde_json::Value::from(*number),
                        FieldValue::Bool(flag) => serde_json::Value::from(*flag),
                    };
                    (name.clone(), json)
                })
                .collect(),
        )
    }
}

impl<K: Into<String>, V: Into<FieldValue>> FromIterator<(K, V)> for TickerRecord {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}
