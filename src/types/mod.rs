//! Entry value model and the ordered key used by regions and indexes

mod key;

pub use key::{Key, KeyClass, OrderedFloat};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Value stored in a region entry
///
/// Objects are modelled as `Map`s of field name to value; a collection-valued
/// field is either a `List` or a nested `Map`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Value {
    /// Explicit null
    Null,

    /// Result of navigating to a field that does not exist
    Undefined,

    /// Boolean value
    Bool(bool),

    /// Integer value
    Integer(i64),

    /// Floating point value
    Float(f64),

    /// Text string
    Text(String),

    /// Ordered collection
    List(Vec<Value>),

    /// Object fields or a keyed collection
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Null or undefined: never matched by ordinary comparisons
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Null | Value::Undefined)
    }

    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    /// Build a `Map` value from `(field, value)` pairs
    pub fn object<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = (S, Value)>,
        S: Into<String>,
    {
        Value::Map(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Field lookup on a `Map`, `None` for every other shape
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Map(fields) => fields.get(name),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Undefined => "undefined",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Undefined => write!(f, "UNDEFINED"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "'{}'", s),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Map(fields) => {
                write!(f, "{{")?;
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", name, value)?;
                }
                write!(f, "}}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_field_lookup() {
        let v = Value::object([("ID", Value::Integer(7)), ("status", Value::text("active"))]);
        assert_eq!(v.field("ID"), Some(&Value::Integer(7)));
        assert_eq!(v.field("missing"), None);
        assert_eq!(Value::Integer(1).field("ID"), None);
    }

    #[test]
    fn test_undefined_markers() {
        assert!(Value::Null.is_undefined());
        assert!(Value::Undefined.is_undefined());
        assert!(!Value::Integer(0).is_undefined());
    }

    #[test]
    fn test_display() {
        let v = Value::object([("a", Value::List(vec![Value::Integer(1), Value::Bool(true)]))]);
        assert_eq!(v.to_string(), "{a: [1, true]}");
    }
}
