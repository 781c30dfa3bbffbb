//! Guest value representation
//!
//! Operand stack entries and local slots hold a [`Value`]. Primitive kinds
//! follow the guest type system: booleans, bytes, chars and shorts are all
//! carried as `Int`, so a boolean pushed by the runtime is normalized to
//! `0`/`1`.

use crate::object::ObjectRef;
use std::fmt;

/// A guest value
#[derive(Clone, Copy, PartialEq)]
pub enum Value {
    /// The null reference
    Null,
    /// 32-bit integer (also booleans, chars, bytes, shorts)
    Int(i32),
    /// 64-bit integer
    Long(i64),
    /// 32-bit float
    Float(f32),
    /// 64-bit float
    Double(f64),
    /// Reference to a heap object or array
    Ref(ObjectRef),
}

impl Value {
    /// Create a null value
    #[inline]
    pub const fn null() -> Self {
        Value::Null
    }

    /// Create a boolean value (normalized to 0/1)
    #[inline]
    pub const fn bool(b: bool) -> Self {
        Value::Int(b as i32)
    }

    /// Create an i32 value
    #[inline]
    pub const fn i32(i: i32) -> Self {
        Value::Int(i)
    }

    /// Create an i64 value
    #[inline]
    pub const fn i64(i: i64) -> Self {
        Value::Long(i)
    }

    /// Check if this value is null
    #[inline]
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Extract i32 value
    #[inline]
    pub const fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Extract i64 value
    #[inline]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Long(i) => Some(*i),
            _ => None,
        }
    }

    /// Extract an object reference
    #[inline]
    pub const fn as_object(&self) -> Option<ObjectRef> {
        match self {
            Value::Ref(r) => Some(*r),
            _ => None,
        }
    }

    /// Whether this value occupies two local slots (long/double)
    #[inline]
    pub const fn is_wide(&self) -> bool {
        matches!(self, Value::Long(_) | Value::Double(_))
    }

    /// Zero value for a field/array descriptor character
    pub fn zero_for(descriptor: &str) -> Self {
        match descriptor.as_bytes().first() {
            Some(b'J') => Value::Long(0),
            Some(b'F') => Value::Float(0.0),
            Some(b'D') => Value::Double(0.0),
            Some(b'L') | Some(b'[') => Value::Null,
            _ => Value::Int(0),
        }
    }

    /// Shallow JSON rendering (references render as their id)
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Long(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Value::from(*f as f64),
            Value::Double(f) => serde_json::Value::from(*f),
            Value::Ref(r) => serde_json::json!({ "ref": r.as_u64() }),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Long(i)
    }
}

impl From<f32> for Value {
    fn from(f: f32) -> Self {
        Value::Float(f)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Double(f)
    }
}

impl From<ObjectRef> for Value {
    fn from(r: ObjectRef) -> Self {
        Value::Ref(r)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Int(i) => write!(f, "{}", i),
            Value::Long(i) => write!(f, "{}L", i),
            Value::Float(x) => write!(f, "{}f", x),
            Value::Double(x) => write!(f, "{}d", x),
            Value::Ref(r) => write!(f, "@{}", r.as_u64()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bool_normalized_to_int() {
        assert_eq!(Value::from(true), Value::Int(1));
        assert_eq!(Value::from(false), Value::Int(0));
    }

    #[test]
    fn test_zero_for_descriptor() {
        assert_eq!(Value::zero_for("J"), Value::Long(0));
        assert_eq!(Value::zero_for("Ljava/lang/Object;"), Value::Null);
        assert_eq!(Value::zero_for("[I"), Value::Null);
        assert_eq!(Value::zero_for("I"), Value::Int(0));
        assert_eq!(Value::zero_for("D"), Value::Double(0.0));
    }

    #[test]
    fn test_wide_values() {
        assert!(Value::i64(3).is_wide());
        assert!(Value::Double(1.0).is_wide());
        assert!(!Value::i32(3).is_wide());
    }

    #[test]
    fn test_debug_format() {
        assert_eq!(format!("{:?}", Value::null()), "null");
        assert_eq!(format!("{:?}", Value::i64(7)), "7L");
    }
}
