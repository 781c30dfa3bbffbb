//! Guest string support: intern table and char array conversion

use crate::object::{Heap, ObjectRef};
use crate::value::Value;
use rustc_hash::FxHashMap;

/// Descriptor of the guest string class
pub const STRING_CLASS: &str = "Ljava/lang/String;";

/// Descriptor of the guest char array class
pub const CHAR_ARRAY_CLASS: &str = "[C";

/// String field holding the char array
pub const STRING_VALUE_FIELD: &str = "Ljava/lang/String;value";

/// String field holding the char count
pub const STRING_COUNT_FIELD: &str = "Ljava/lang/String;count";

/// Intern table owned by one runtime instance
#[derive(Debug, Default)]
pub struct StringPool {
    interned: FxHashMap<String, ObjectRef>,
}

impl StringPool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Interned object for `s`, if any
    pub fn get(&self, s: &str) -> Option<ObjectRef> {
        self.interned.get(s).copied()
    }

    /// Record `obj` as the interned instance of `s`
    pub fn insert(&mut self, s: &str, obj: ObjectRef) {
        self.interned.insert(s.to_string(), obj);
    }

    /// Number of interned strings
    pub fn len(&self) -> usize {
        self.interned.len()
    }

    /// Whether nothing has been interned
    pub fn is_empty(&self) -> bool {
        self.interned.is_empty()
    }
}

/// UTF-16 code units of `s` as guest chars
pub fn char_values(s: &str) -> Vec<Value> {
    s.encode_utf16().map(|c| Value::Int(c as i32)).collect()
}

/// Decode a guest string object back into a host string
///
/// Returns `None` when `obj` is not shaped like a guest string.
pub fn read_string(heap: &Heap, obj: ObjectRef) -> Option<String> {
    let chars = heap.field(obj, STRING_VALUE_FIELD)?.as_object()?;
    let units: Vec<u16> = heap
        .array(chars)?
        .iter()
        .map(|v| v.as_i32().unwrap_or(0) as u16)
        .collect();
    let count = heap
        .field(obj, STRING_COUNT_FIELD)
        .and_then(|v| v.as_i32())
        .map(|c| c.max(0) as usize)
        .unwrap_or(units.len())
        .min(units.len());
    Some(String::from_utf16_lossy(&units[..count]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestClass;

    #[test]
    fn test_char_values_utf16() {
        assert_eq!(char_values("hi"), vec![Value::Int(104), Value::Int(105)]);
        assert_eq!(char_values("\u{1F600}").len(), 2);
    }

    #[test]
    fn test_pool() {
        let mut pool = StringPool::new();
        assert!(pool.get("a").is_none());
        pool.insert("a", ObjectRef::from_u64(3));
        assert_eq!(pool.get("a"), Some(ObjectRef::from_u64(3)));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_read_string() {
        let mut heap = Heap::new();
        let chars = heap.new_array(TestClass::bare(CHAR_ARRAY_CLASS), char_values("kestrel"));
        let s = heap.new_object(
            TestClass::bare(STRING_CLASS),
            [
                (STRING_VALUE_FIELD, Value::Ref(chars)),
                (STRING_COUNT_FIELD, Value::i32(4)),
            ],
        );
        assert_eq!(read_string(&heap, s).as_deref(), Some("kest"));
        assert!(read_string(&heap, chars).is_none());
    }
}
