//! Object store for the guest objects the runtime touches
//!
//! The core only needs identity, a class pointer and field/element storage.
//! Layout, GC and field resolution belong to the embedder; this store hands
//! out stable [`ObjectRef`] handles and renders object graphs for state
//! dumps.

use crate::class::ClassRef;
use crate::value::Value;
use rustc_hash::{FxHashMap, FxHashSet};
use std::fmt;

/// Identity of a heap object or array
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef(u64);

impl ObjectRef {
    /// Get the numeric reference
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Create an ObjectRef from a raw value
    pub fn from_u64(raw: u64) -> Self {
        ObjectRef(raw)
    }
}

/// Object instance with named fields
pub struct Object {
    /// Class of this instance
    pub class: ClassRef,
    /// Field values keyed by qualified field name, e.g. `Ljava/lang/String;value`
    pub fields: FxHashMap<String, Value>,
}

/// Array instance
pub struct Array {
    /// Array class, e.g. `[C`
    pub class: ClassRef,
    /// Elements
    pub elements: Vec<Value>,
}

/// One entry in the heap
pub enum HeapEntry {
    /// Plain object
    Object(Object),
    /// Array
    Array(Array),
}

impl HeapEntry {
    /// Class of the entry
    pub fn class(&self) -> &ClassRef {
        match self {
            HeapEntry::Object(o) => &o.class,
            HeapEntry::Array(a) => &a.class,
        }
    }
}

impl fmt::Debug for HeapEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeapEntry::Object(o) => {
                write!(f, "Object({}, {} fields)", o.class.name(), o.fields.len())
            }
            HeapEntry::Array(a) => {
                write!(f, "Array({}, len {})", a.class.name(), a.elements.len())
            }
        }
    }
}

/// Object store owned by one runtime instance
pub struct Heap {
    entries: FxHashMap<ObjectRef, HeapEntry>,
    /// Next reference to hand out; 0 is never used
    high_oref: u64,
}

impl Heap {
    /// Create an empty heap
    pub fn new() -> Self {
        Self {
            entries: FxHashMap::default(),
            high_oref: 1,
        }
    }

    fn next_ref(&mut self) -> ObjectRef {
        let r = ObjectRef(self.high_oref);
        self.high_oref += 1;
        r
    }

    /// Build an object of `class` with the given field values
    pub fn new_object<I, K>(&mut self, class: ClassRef, fields: I) -> ObjectRef
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let r = self.next_ref();
        let fields = fields.into_iter().map(|(k, v)| (k.into(), v)).collect();
        self.entries.insert(r, HeapEntry::Object(Object { class, fields }));
        r
    }

    /// Build an array of `class` holding `elements`
    pub fn new_array(&mut self, class: ClassRef, elements: Vec<Value>) -> ObjectRef {
        let r = self.next_ref();
        self.entries.insert(r, HeapEntry::Array(Array { class, elements }));
        r
    }

    /// Look up an entry
    pub fn get(&self, r: ObjectRef) -> Option<&HeapEntry> {
        self.entries.get(&r)
    }

    /// Read an object field
    pub fn field(&self, r: ObjectRef, name: &str) -> Option<Value> {
        match self.entries.get(&r)? {
            HeapEntry::Object(o) => o.fields.get(name).copied(),
            HeapEntry::Array(_) => None,
        }
    }

    /// Write an object field; returns false if `r` is not an object
    pub fn set_field(&mut self, r: ObjectRef, name: &str, value: Value) -> bool {
        match self.entries.get_mut(&r) {
            Some(HeapEntry::Object(o)) => {
                o.fields.insert(name.to_string(), value);
                true
            }
            _ => false,
        }
    }

    /// Borrow an array's elements
    pub fn array(&self, r: ObjectRef) -> Option<&[Value]> {
        match self.entries.get(&r)? {
            HeapEntry::Array(a) => Some(&a.elements),
            HeapEntry::Object(_) => None,
        }
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the heap holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Deep JSON rendering of a value
    ///
    /// Objects already present in `visited` render as a bare reference so
    /// cyclic graphs terminate.
    pub fn serialize_value(
        &self,
        value: Value,
        visited: &mut FxHashSet<ObjectRef>,
    ) -> serde_json::Value {
        let r = match value {
            Value::Ref(r) => r,
            other => return other.to_json(),
        };
        if !visited.insert(r) {
            return serde_json::json!({ "ref": r.as_u64() });
        }
        match self.entries.get(&r) {
            Some(HeapEntry::Object(o)) => {
                let mut names: Vec<&String> = o.fields.keys().collect();
                names.sort();
                let mut fields = serde_json::Map::new();
                for name in names {
                    let rendered = self.serialize_value(o.fields[name], visited);
                    fields.insert(name.clone(), rendered);
                }
                serde_json::json!({
                    "ref": r.as_u64(),
                    "type": o.class.name(),
                    "fields": fields,
                })
            }
            Some(HeapEntry::Array(a)) => {
                let elements: Vec<_> = a
                    .elements
                    .iter()
                    .map(|v| self.serialize_value(*v, visited))
                    .collect();
                serde_json::json!({
                    "ref": r.as_u64(),
                    "type": a.class.name(),
                    "elements": elements,
                })
            }
            None => serde_json::json!({ "ref": r.as_u64(), "dangling": true }),
        }
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}
