//! The wire type system of the Connect v2 protocol.
//!
//! Every manifest entry declares one of six scalar types. All multi-byte
//! values on the wire are little-endian; strings are length-prefixed UTF-8.
//! [`Value`] is the decoded, owned form handed to application code.

use std::fmt;

/// Command id of the manifest-fetch request.
///
/// Regular manifest entries use ids `>= 0`; the catalog itself is fetched
/// by issuing a read for this sentinel id.
pub const MANIFEST_COMMAND_ID: i32 = -1;

/// Scalar type of a state variable, as declared by the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireType {
    /// One byte; nonzero decodes as `true`.
    Boolean,
    /// 32-bit signed integer.
    Integer,
    /// 32-bit IEEE-754 float.
    Float,
    /// 64-bit IEEE-754 float.
    Double,
    /// Length-prefixed UTF-8 text.
    String,
    /// 64-bit signed integer.
    Long,
}

impl WireType {
    /// Map a manifest type code to a `WireType`.
    ///
    /// Returns `None` for codes outside `0..=5`; the catalog parser treats
    /// those entries as invokable commands rather than readable state.
    pub fn from_code(code: i32) -> Option<WireType> {
        match code {
            0 => Some(WireType::Boolean),
            1 => Some(WireType::Integer),
            2 => Some(WireType::Float),
            3 => Some(WireType::Double),
            4 => Some(WireType::String),
            5 => Some(WireType::Long),
            _ => None,
        }
    }

    /// The numeric type code used in manifest text.
    pub fn code(self) -> i32 {
        match self {
            WireType::Boolean => 0,
            WireType::Integer => 1,
            WireType::Float => 2,
            WireType::Double => 3,
            WireType::String => 4,
            WireType::Long => 5,
        }
    }
}

impl fmt::Display for WireType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WireType::Boolean => "Boolean",
            WireType::Integer => "Integer",
            WireType::Float => "Float",
            WireType::Double => "Double",
            WireType::String => "String",
            WireType::Long => "Long",
        };
        write!(f, "{s}")
    }
}

/// A decoded state value.
///
/// The variant always matches the manifest-declared [`WireType`] of the
/// entry it was decoded for; `set` requires the same correspondence in the
/// other direction.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A boolean flag (e.g. `aircraft/0/on_ground`).
    Boolean(bool),
    /// A 32-bit signed integer.
    Integer(i32),
    /// A 32-bit float.
    Float(f32),
    /// A 64-bit float.
    Double(f64),
    /// UTF-8 text (e.g. a callsign).
    Text(String),
    /// A 64-bit signed integer.
    Long(i64),
}

impl Value {
    /// The wire type this value encodes as.
    pub fn wire_type(&self) -> WireType {
        match self {
            Value::Boolean(_) => WireType::Boolean,
            Value::Integer(_) => WireType::Integer,
            Value::Float(_) => WireType::Float,
            Value::Double(_) => WireType::Double,
            Value::Text(_) => WireType::String,
            Value::Long(_) => WireType::Long,
        }
    }

    /// Return the boolean value, if this is a `Boolean`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Return the integer value, if this is an `Integer`.
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Return the float value, if this is a `Float`.
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Return the double value, if this is a `Double`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Return the text, if this is a `Text`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Return the long value, if this is a `Long`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Integer(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::Text(s) => write!(f, "{s}"),
            Value::Long(v) => write!(f, "{v}"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}
