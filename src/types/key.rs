//! Totally ordered, hashable key
//!
//! Used both as the region's entry key and as the indexed value inside index
//! structures. Keys of different classes never compare equal; within the
//! numeric class integers and floats compare by magnitude.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use super::Value;
use crate::{Result, StorageError};

/// f64 with a total order (`f64::total_cmp`) and bitwise hashing
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OrderedFloat(pub f64);

impl PartialEq for OrderedFloat {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OrderedFloat {}

impl PartialOrd for OrderedFloat {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedFloat {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl Hash for OrderedFloat {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

/// Comparison class of a key; range predicates never cross classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyClass {
    Bool,
    Number,
    Text,
    Composite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Key {
    Bool(bool),
    Int(i64),
    /// Non-integral (or out of i64 range) float; build through `Key::float`
    Float(OrderedFloat),
    Text(String),
    Composite(Vec<Key>),
}

impl Key {
    /// Float key, normalized to `Int` when the value is integral
    pub fn float(f: f64) -> Key {
        if f.is_nan() {
            return Key::Float(OrderedFloat(f64::NAN));
        }
        if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
            return Key::Int(f as i64);
        }
        Key::Float(OrderedFloat(f))
    }

    pub fn text(s: impl Into<String>) -> Key {
        Key::Text(s.into())
    }

    /// Convert an evaluated value into an index key
    ///
    /// `Ok(None)` for null/undefined (the undefined bucket), an evaluation
    /// error for shapes that cannot be ordered.
    pub fn try_from_value(value: &Value) -> Result<Option<Key>> {
        match value {
            Value::Null | Value::Undefined => Ok(None),
            Value::Bool(b) => Ok(Some(Key::Bool(*b))),
            Value::Integer(i) => Ok(Some(Key::Int(*i))),
            Value::Float(f) => Ok(Some(Key::float(*f))),
            Value::Text(s) => Ok(Some(Key::Text(s.clone()))),
            Value::List(items) => {
                let mut parts = Vec::with_capacity(items.len());
                for item in items {
                    match Key::try_from_value(item)? {
                        Some(k) => parts.push(k),
                        None => {
                            return Err(StorageError::Evaluation(
                                "null element inside a composite value".to_string(),
                            ))
                        }
                    }
                }
                Ok(Some(Key::Composite(parts)))
            }
            Value::Map(_) => Err(StorageError::Evaluation(
                "map values cannot be used as index keys".to_string(),
            )),
        }
    }

    /// Convert back into a value (used when returning region keys to callers)
    pub fn to_value(&self) -> Value {
        match self {
            Key::Bool(b) => Value::Bool(*b),
            Key::Int(i) => Value::Integer(*i),
            Key::Float(f) => Value::Float(f.0),
            Key::Text(s) => Value::Text(s.clone()),
            Key::Composite(parts) => Value::List(parts.iter().map(Key::to_value).collect()),
        }
    }

    pub fn class(&self) -> KeyClass {
        match self {
            Key::Bool(_) => KeyClass::Bool,
            Key::Int(_) | Key::Float(_) => KeyClass::Number,
            Key::Text(_) => KeyClass::Text,
            Key::Composite(_) => KeyClass::Composite,
        }
    }

    /// Smallest key of a class
    pub fn class_floor(class: KeyClass) -> Key {
        match class {
            KeyClass::Bool => Key::Bool(false),
            KeyClass::Number => Key::Float(OrderedFloat(f64::NEG_INFINITY)),
            KeyClass::Text => Key::Text(String::new()),
            KeyClass::Composite => Key::Composite(Vec::new()),
        }
    }
}

fn cmp_numbers(a: &Key, b: &Key) -> Ordering {
    match (a, b) {
        (Key::Int(x), Key::Int(y)) => x.cmp(y),
        (Key::Float(x), Key::Float(y)) => x.cmp(y),
        // Integral floats are normalized away, so a tie only happens through
        // rounding; break it deterministically.
        (Key::Int(x), Key::Float(y)) => (*x as f64).total_cmp(&y.0).then(Ordering::Less),
        (Key::Float(x), Key::Int(y)) => x.0.total_cmp(&(*y as f64)).then(Ordering::Greater),
        _ => Ordering::Equal,
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.class().cmp(&other.class()) {
            Ordering::Equal => {}
            unequal => return unequal,
        }
        match (self, other) {
            (Key::Bool(a), Key::Bool(b)) => a.cmp(b),
            (Key::Text(a), Key::Text(b)) => a.cmp(b),
            (Key::Composite(a), Key::Composite(b)) => a.cmp(b),
            _ => cmp_numbers(self, other),
        }
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Key::Bool(b) => b.hash(state),
            Key::Int(i) => i.hash(state),
            Key::Float(f) => f.hash(state),
            Key::Text(s) => s.hash(state),
            Key::Composite(parts) => parts.hash(state),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Bool(b) => write!(f, "{}", b),
            Key::Int(i) => write!(f, "{}", i),
            Key::Float(x) => write!(f, "{}", x.0),
            Key::Text(s) => write!(f, "'{}'", s),
            Key::Composite(parts) => {
                write!(f, "(")?;
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", part)?;
                }
                write!(f, ")")
            }
        }
    }
}

impl From<i64> for Key {
    fn from(v: i64) -> Self {
        Key::Int(v)
    }
}

impl From<i32> for Key {
    fn from(v: i32) -> Self {
        Key::Int(v as i64)
    }
}

impl From<&str> for Key {
    fn from(v: &str) -> Self {
        Key::Text(v.to_string())
    }
}

impl From<String> for Key {
    fn from(v: String) -> Self {
        Key::Text(v)
    }
}
