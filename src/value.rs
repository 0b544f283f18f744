//! The in-memory value model.
//!
//! Decoding produces [`Value`]s and encoding consumes them. Scalars are
//! plain enum variants; every compound AMF3 type (array, object,
//! dictionary) is represented by the single [`Table`] container, whose
//! shape decides the wire type it is written as.

use bytes::Bytes;
use std::cell::RefCell;
use std::rc::Rc;

/// A dynamically typed AMF3 value.
///
/// Strings are byte strings: the decoder never validates UTF-8, so
/// anything that came off the wire round-trips unchanged. [`Value::as_str`]
/// gives a checked view for callers that expect text.
#[derive(Debug, Clone)]
pub enum Value {
    /// The `undefined` marker. Distinct from [`Value::Null`].
    Undefined,
    /// The typed `null` marker.
    Null,
    /// `true` or `false`.
    Boolean(bool),
    /// A whole number. Values within `[-2^28, 2^28 - 1]` use the compact
    /// INTEGER wire type; anything wider falls back to DOUBLE.
    Integer(i64),
    /// An IEEE-754 double.
    Double(f64),
    /// A byte string.
    String(Bytes),
    /// A compound value (array, object or dictionary shaped).
    Table(Table),
}

impl Value {
    /// Whether this is the `undefined` marker.
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Whether this is the typed `null` marker.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Try to view this value as a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to view this value as an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Try to view this value as a float, accepting integers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    /// Try to view this value as UTF-8 text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => std::str::from_utf8(s).ok(),
            _ => None,
        }
    }

    /// Try to view this value as a byte string.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to view this value as a table.
    pub fn as_table(&self) -> Option<&Table> {
        match self {
            Value::Table(t) => Some(t),
            _ => None,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Table(a), Value::Table(b)) => a == b,
            _ => false,
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
        Value::Integer(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(Bytes::copy_from_slice(v.as_bytes()))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(Bytes::from(v.into_bytes()))
    }
}

impl From<Bytes> for Value {
    fn from(v: Bytes) -> Self {
        Value::String(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::String(Bytes::copy_from_slice(v))
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::String(Bytes::from(v))
    }
}

impl From<Table> for Value {
    fn from(v: Table) -> Self {
        Value::Table(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Table(Table::array(v))
    }
}

/// A shared, mutable compound value.
///
/// `Table` is the one container of the model, mirroring the table type of
/// dynamic host languages: a dense part addressed by 0-based `Integer`
/// keys, an insertion-ordered associative part with keys of any kind, and
/// three attributes the codec itself maintains:
///
/// - the array mark ([`Table::array_len`]), present on every decoded
///   ARRAY and on tables that should encode as dense arrays;
/// - the class name, present on decoded typed objects;
/// - the external payload, present on decoded externalizable objects.
///
/// Cloning a handle aliases the same storage ([`Table::ptr_eq`] observes
/// this). That identity is what lets the encoder write a back reference
/// the second time it meets a table, and the decoder rebuild shared and
/// even cyclic structures.
///
/// Structural comparison treats a dense entry at index `i` and an
/// associative entry keyed `Integer(i)` as the same thing, so a table
/// that went through a dictionary round trip still compares equal to the
/// original. Keys compare like values, except table keys, which match by
/// handle identity. Comparing a cyclic table to a structurally identical
/// but distinct one does not terminate.
#[derive(Debug, Clone, Default)]
pub struct Table {
    data: Rc<RefCell<TableData>>,
}

#[derive(Debug, Default)]
struct TableData {
    dense: Vec<Value>,
    pairs: Vec<(Value, Value)>,
    array_len: Option<u32>,
    class_name: Option<Bytes>,
    external: Option<Value>,
}

impl Table {
    /// Creates an empty table.
    pub fn new() -> Self {
        Table::default()
    }

    /// Creates a dense, array-marked table from `entries`.
    pub fn array<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        let dense: Vec<Value> = entries.into_iter().collect();
        let len = dense.len() as u32;
        Table {
            data: Rc::new(RefCell::new(TableData {
                dense,
                array_len: Some(len),
                ..TableData::default()
            })),
        }
    }

    /// Appends `value` to the dense part, extending the array mark when
    /// one is set.
    pub fn push(&self, value: Value) {
        let mut data = self.data.borrow_mut();
        data.dense.push(value);
        if let Some(len) = data.array_len {
            data.array_len = Some(len.max(data.dense.len() as u32));
        }
    }

    /// Sets `key` to `value`, replacing an existing entry with a matching
    /// key. Integer keys addressing the dense part write through to it.
    pub fn insert(&self, key: Value, value: Value) {
        let mut data = self.data.borrow_mut();
        if let Value::Integer(i) = key {
            if i >= 0 && (i as usize) < data.dense.len() {
                data.dense[i as usize] = value;
                return;
            }
        }
        if let Some(entry) = data.pairs.iter_mut().find(|entry| key_eq(&entry.0, &key)) {
            entry.1 = value;
        } else {
            data.pairs.push((key, value));
        }
    }

    /// Looks up `key`. Dense entries answer to 0-based `Integer` keys.
    pub fn get(&self, key: &Value) -> Option<Value> {
        let data = self.data.borrow();
        if let Value::Integer(i) = key {
            if *i >= 0 && (*i as usize) < data.dense.len() {
                return Some(data.dense[*i as usize].clone());
            }
        }
        data.pairs
            .iter()
            .find(|entry| key_eq(&entry.0, key))
            .map(|entry| entry.1.clone())
    }

    /// Total number of logical entries (dense plus associative).
    pub fn len(&self) -> usize {
        let data = self.data.borrow();
        data.dense.len() + data.pairs.len()
    }

    /// Whether the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of dense entries.
    pub fn dense_len(&self) -> usize {
        self.data.borrow().dense.len()
    }

    /// Dense entry at `index`.
    pub fn dense_get(&self, index: usize) -> Option<Value> {
        self.data.borrow().dense.get(index).cloned()
    }

    /// Snapshot of the dense part.
    pub fn dense(&self) -> Vec<Value> {
        self.data.borrow().dense.clone()
    }

    /// Snapshot of the associative part, in insertion order.
    pub fn pairs(&self) -> Vec<(Value, Value)> {
        self.data.borrow().pairs.clone()
    }

    /// The array mark: the dense length this table claims on the wire.
    pub fn array_len(&self) -> Option<u32> {
        self.data.borrow().array_len
    }

    /// Sets or clears the array mark.
    pub fn set_array_len(&self, len: Option<u32>) {
        self.data.borrow_mut().array_len = len;
    }

    /// The class name of a typed object.
    pub fn class_name(&self) -> Option<Bytes> {
        self.data.borrow().class_name.clone()
    }

    /// Sets or clears the class name.
    pub fn set_class_name(&self, name: Option<Bytes>) {
        self.data.borrow_mut().class_name = name;
    }

    /// The payload of an externalizable object.
    pub fn external(&self) -> Option<Value> {
        self.data.borrow().external.clone()
    }

    /// Sets or clears the externalizable payload.
    pub fn set_external(&self, value: Option<Value>) {
        self.data.borrow_mut().external = value;
    }

    /// Whether two handles alias the same storage.
    pub fn ptr_eq(&self, other: &Table) -> bool {
        Rc::ptr_eq(&self.data, &other.data)
    }

    pub(crate) fn address(&self) -> usize {
        Rc::as_ptr(&self.data) as usize
    }
}

impl PartialEq for Table {
    fn eq(&self, other: &Self) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        let a = self.data.borrow();
        let b = other.data.borrow();
        if a.array_len != b.array_len
            || a.class_name != b.class_name
            || a.external != b.external
        {
            return false;
        }
        if a.dense.len() + a.pairs.len() != b.dense.len() + b.pairs.len() {
            return false;
        }
        for (i, value) in a.dense.iter().enumerate() {
            match other.get(&Value::Integer(i as i64)) {
                Some(v) if v == *value => {}
                _ => return false,
            }
        }
        for (key, value) in a.pairs.iter() {
            match other.get(key) {
                Some(v) if v == *value => {}
                _ => return false,
            }
        }
        true
    }
}

fn key_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Table(x), Value::Table(y)) => x.ptr_eq(y),
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_accessors() {
        let s = Value::from("test");
        assert_eq!(s.as_str(), Some("test"));
        assert_eq!(s.as_f64(), None);

        let n = Value::from(42);
        assert_eq!(n.as_i64(), Some(42));
        assert_eq!(n.as_f64(), Some(42.0));
        assert_eq!(n.as_str(), None);

        let d = Value::from(1.5);
        assert_eq!(d.as_f64(), Some(1.5));
        assert_eq!(d.as_i64(), None);

        assert!(Value::Null.is_null());
        assert!(Value::Undefined.is_undefined());
        assert!(!Value::Null.is_undefined());
    }

    #[test]
    fn test_from_conversions() {
        assert_eq!(Value::from(true), Value::Boolean(true));
        assert_eq!(Value::from(7u32), Value::Integer(7));
        assert_eq!(Value::from(7i64), Value::Integer(7));
        assert_eq!(Value::from(2.5), Value::Double(2.5));
        assert_eq!(Value::from(String::from("x")), Value::from("x"));
        assert_eq!(
            Value::from(vec![0xFFu8, 0x00]).as_bytes().unwrap().as_ref(),
            &[0xFF, 0x00]
        );

        let v = Value::from(vec![Value::from(1), Value::from(2)]);
        let t = v.as_table().unwrap();
        assert_eq!(t.array_len(), Some(2));
        assert_eq!(t.dense_get(1), Some(Value::from(2)));
    }

    #[test]
    fn test_non_utf8_string_has_no_str_view() {
        let v = Value::from(vec![0xFF, 0xFE]);
        assert_eq!(v.as_str(), None);
        assert!(v.as_bytes().is_some());
    }

    #[test]
    fn test_table_insert_and_get() {
        let t = Table::new();
        t.insert(Value::from("k"), Value::from(1));
        t.insert(Value::from("k"), Value::from(2));
        assert_eq!(t.get(&Value::from("k")), Some(Value::from(2)));
        assert_eq!(t.get(&Value::from("missing")), None);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_dense_entries_answer_to_integer_keys() {
        let t = Table::array(vec![Value::from("a"), Value::from("b")]);
        assert_eq!(t.get(&Value::from(0)), Some(Value::from("a")));
        assert_eq!(t.get(&Value::from(1)), Some(Value::from("b")));
        assert_eq!(t.get(&Value::from(2)), None);

        t.insert(Value::from(1), Value::from("c"));
        assert_eq!(t.dense_get(1), Some(Value::from("c")));
        assert_eq!(t.dense_len(), 2);
    }

    #[test]
    fn test_push_extends_array_mark() {
        let t = Table::array(vec![Value::from(1)]);
        t.push(Value::from(2));
        assert_eq!(t.array_len(), Some(2));

        let plain = Table::new();
        plain.push(Value::from(1));
        assert_eq!(plain.array_len(), None);
    }

    #[test]
    fn test_clone_aliases_storage() {
        let t = Table::new();
        let u = t.clone();
        u.insert(Value::from("k"), Value::from(1));
        assert_eq!(t.get(&Value::from("k")), Some(Value::from(1)));
        assert!(t.ptr_eq(&u));
        assert!(!t.ptr_eq(&Table::new()));
    }

    #[test]
    fn test_structural_equality_bridges_dense_and_pairs() {
        let dense = Table::new();
        dense.push(Value::from(10));
        dense.push(Value::from(20));

        let sparse = Table::new();
        sparse.insert(Value::from(0), Value::from(10));
        sparse.insert(Value::from(1), Value::from(20));

        assert_eq!(dense, sparse);

        sparse.insert(Value::from(1), Value::from(99));
        assert_ne!(dense, sparse);
    }

    #[test]
    fn test_attributes_participate_in_equality() {
        let a = Table::new();
        let b = Table::new();
        assert_eq!(a, b);

        a.set_class_name(Some(Bytes::from_static(b"com.Example")));
        assert_ne!(a, b);

        b.set_class_name(Some(Bytes::from_static(b"com.Example")));
        assert_eq!(a, b);
    }

    #[test]
    fn test_table_keys_match_by_identity() {
        let outer = Table::new();
        let k1 = Table::new();
        let k2 = Table::new();
        outer.insert(Value::Table(k1.clone()), Value::from(1));
        outer.insert(Value::Table(k2), Value::from(2));
        assert_eq!(outer.len(), 2);
        assert_eq!(outer.get(&Value::Table(k1)), Some(Value::from(1)));
    }

    #[test]
    fn test_default_value_is_null() {
        assert_eq!(Value::default(), Value::Null);
    }
}
