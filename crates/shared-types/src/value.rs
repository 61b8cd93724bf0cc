//! Dynamically typed payload values.
//!
//! Parameters and results cross the wire as [`Value`]s. Binary serializers
//! carry the variant tag, so values arrive exactly as sent. Text serializers
//! carry plain JSON, which loses the distinction between e.g. `i64` and `f64`;
//! the receiver restores it with [`crate::TypeDescriptor::coerce`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A dynamically typed RPC value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Value {
    #[default]
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Record(BTreeMap<String, Value>),
}

impl Value {
    /// Build a record from `(field, value)` pairs.
    pub fn record<K, I>(fields: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Record(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Convert any serde-serializable value. Goes through JSON, so the result
    /// is untyped in the same way a text transport would deliver it.
    pub fn from_serialize<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_value(value).map(Value::from_json)
    }

    /// Deserialize into a concrete type.
    pub fn deserialize_into<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.to_json())
    }

    /// Plain JSON rendering. `Bytes` becomes an array of numbers and
    /// non-finite floats become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Value::Unit => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::Str(s) => Json::String(s.clone()),
            Value::Bytes(bytes) => Json::Array(bytes.iter().map(|b| Json::from(*b)).collect()),
            Value::List(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Record(fields) => Json::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// Generic decoding from JSON. Integral numbers that fit in `i64`
    /// become `Int`, every other number becomes `Float`.
    pub fn from_json(json: serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match json {
            Json::Null => Value::Unit,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => Value::Str(s),
            Json::Array(items) => Value::List(items.into_iter().map(Value::from_json).collect()),
            Json::Object(fields) => Value::Record(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Short variant name, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Unit => "unit",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Record(_) => "record",
        }
    }

    pub fn is_unit(&self) -> bool {
        matches!(self, Value::Unit)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Field lookup on a record.
    pub fn get(&self, field: &str) -> Option<&Value> {
        match self {
            Value::Record(fields) => fields.get(field),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::Bytes(bytes)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct User {
        id: i64,
        name: String,
    }

    #[test]
    fn test_json_integers_decode_as_int() {
        let value = Value::from_json(serde_json::json!(42));
        assert_eq!(value, Value::Int(42));
    }

    #[test]
    fn test_json_fractions_decode_as_float() {
        let value = Value::from_json(serde_json::json!(1.5));
        assert_eq!(value, Value::Float(1.5));
    }

    #[test]
    fn test_bytes_render_as_number_array() {
        let json = Value::Bytes(vec![1, 2, 255]).to_json();
        assert_eq!(json, serde_json::json!([1, 2, 255]));
    }

    #[test]
    fn test_typed_bridge() {
        let user = User {
            id: 42,
            name: "ada".into(),
        };
        let value = Value::from_serialize(&user).unwrap();
        assert_eq!(value.get("id"), Some(&Value::Int(42)));

        let back: User = value.deserialize_into().unwrap();
        assert_eq!(back, user);
    }

    #[test]
    fn test_record_builder() {
        let value = Value::record([("a", Value::from(1)), ("b", Value::from("x"))]);
        assert_eq!(value.get("b").and_then(Value::as_str), Some("x"));
        assert_eq!(value.kind(), "record");
    }

    #[test]
    fn test_bincode_keeps_variants() {
        let value = Value::List(vec![Value::Float(2.0), Value::Int(2), Value::Bytes(vec![7])]);
        let bytes = bincode::serialize(&value).unwrap();
        let back: Value = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, value);
    }
}
