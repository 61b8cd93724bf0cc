//! Declared type descriptors for parameters and results.
//!
//! Descriptors are compared in canonical form. Parsing folds the accepted
//! aliases (`int`, `long`, `double`, `str`, `void`, ...) onto one canonical
//! descriptor each, so two signatures that differ only in alias spelling
//! resolve to the same method.

use crate::value::Value;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while parsing descriptors or coercing values into them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoercionError {
    /// The value has the wrong shape for the declared type.
    #[error("type mismatch: expected {expected}, found {found}")]
    Mismatch { expected: String, found: String },

    /// The value has the right shape but does not fit the declared type.
    #[error("value {value} out of range for {expected}")]
    OutOfRange { expected: String, value: String },

    /// The descriptor text could not be parsed.
    #[error("invalid type descriptor: {0:?}")]
    InvalidDescriptor(String),
}

/// The declared type of a parameter or a return value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeDescriptor {
    Unit,
    Bool,
    I32,
    I64,
    F64,
    String,
    Bytes,
    /// Accepts any value unchanged.
    Any,
    List(Box<TypeDescriptor>),
    /// A named structured type, carried as a field map.
    Record(String),
}

impl TypeDescriptor {
    pub fn list(inner: TypeDescriptor) -> Self {
        TypeDescriptor::List(Box::new(inner))
    }

    pub fn record(name: impl Into<String>) -> Self {
        TypeDescriptor::Record(name.into())
    }

    /// Re-type a value into this descriptor.
    ///
    /// Conversions are limited to the ones a text encoding makes necessary:
    /// integral floats to integers, integers to floats, and small-integer
    /// lists to bytes. `Unit` is accepted for records and `any` as the
    /// absent value.
    pub fn coerce(&self, value: Value) -> Result<Value, CoercionError> {
        match (self, value) {
            (TypeDescriptor::Any, v) => Ok(v),
            (TypeDescriptor::Unit, Value::Unit) => Ok(Value::Unit),
            (TypeDescriptor::Bool, Value::Bool(b)) => Ok(Value::Bool(b)),
            (TypeDescriptor::I32, Value::Int(i)) => {
                if i32::try_from(i).is_ok() {
                    Ok(Value::Int(i))
                } else {
                    Err(self.out_of_range(i))
                }
            }
            (TypeDescriptor::I32, Value::Float(f)) => {
                let i = self.integral(f)?;
                TypeDescriptor::I32.coerce(Value::Int(i))
            }
            (TypeDescriptor::I64, Value::Int(i)) => Ok(Value::Int(i)),
            (TypeDescriptor::I64, Value::Float(f)) => self.integral(f).map(Value::Int),
            (TypeDescriptor::F64, Value::Float(f)) => Ok(Value::Float(f)),
            (TypeDescriptor::F64, Value::Int(i)) => Ok(Value::Float(i as f64)),
            (TypeDescriptor::String, Value::Str(s)) => Ok(Value::Str(s)),
            (TypeDescriptor::Bytes, Value::Bytes(b)) => Ok(Value::Bytes(b)),
            (TypeDescriptor::Bytes, Value::List(items)) => items
                .into_iter()
                .map(|item| match item {
                    Value::Int(i) => u8::try_from(i).map_err(|_| self.out_of_range(i)),
                    other => Err(self.mismatch(&other)),
                })
                .collect::<Result<Vec<u8>, _>>()
                .map(Value::Bytes),
            (TypeDescriptor::List(inner), Value::List(items)) => items
                .into_iter()
                .map(|item| inner.coerce(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            (TypeDescriptor::Record(_), Value::Record(fields)) => Ok(Value::Record(fields)),
            (TypeDescriptor::Record(_), Value::Unit) => Ok(Value::Unit),
            (_, other) => Err(self.mismatch(&other)),
        }
    }

    fn integral(&self, f: f64) -> Result<i64, CoercionError> {
        // i64::MAX as f64 rounds up to 2^63, hence the strict upper bound
        if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
            Ok(f as i64)
        } else {
            Err(self.out_of_range(f))
        }
    }

    fn mismatch(&self, found: &Value) -> CoercionError {
        CoercionError::Mismatch {
            expected: self.to_string(),
            found: found.kind().to_string(),
        }
    }

    fn out_of_range(&self, value: impl fmt::Display) -> CoercionError {
        CoercionError::OutOfRange {
            expected: self.to_string(),
            value: value.to_string(),
        }
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDescriptor::Unit => f.write_str("unit"),
            TypeDescriptor::Bool => f.write_str("bool"),
            TypeDescriptor::I32 => f.write_str("i32"),
            TypeDescriptor::I64 => f.write_str("i64"),
            TypeDescriptor::F64 => f.write_str("f64"),
            TypeDescriptor::String => f.write_str("string"),
            TypeDescriptor::Bytes => f.write_str("bytes"),
            TypeDescriptor::Any => f.write_str("any"),
            TypeDescriptor::List(inner) => write!(f, "list<{inner}>"),
            TypeDescriptor::Record(name) => f.write_str(name),
        }
    }
}

impl FromStr for TypeDescriptor {
    type Err = CoercionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        let lowered = text.to_ascii_lowercase();

        let builtin = match lowered.as_str() {
            "unit" | "void" | "()" => Some(TypeDescriptor::Unit),
            "bool" | "boolean" => Some(TypeDescriptor::Bool),
            "i32" | "int" | "integer" => Some(TypeDescriptor::I32),
            "i64" | "long" => Some(TypeDescriptor::I64),
            "f64" | "double" | "float" => Some(TypeDescriptor::F64),
            "string" | "str" => Some(TypeDescriptor::String),
            "bytes" => Some(TypeDescriptor::Bytes),
            "any" => Some(TypeDescriptor::Any),
            _ => None,
        };
        if let Some(descriptor) = builtin {
            return Ok(descriptor);
        }

        if lowered.starts_with("list<") && text.ends_with('>') {
            let inner = &text[5..text.len() - 1];
            return inner.parse().map(TypeDescriptor::list);
        }

        let valid_record = !text.is_empty()
            && text
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && text
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == ':');
        if valid_record {
            Ok(TypeDescriptor::Record(text.to_string()))
        } else {
            Err(CoercionError::InvalidDescriptor(s.to_string()))
        }
    }
}

impl Serialize for TypeDescriptor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TypeDescriptor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}
