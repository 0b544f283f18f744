//! AMF3 encoder.
//!
//! The encoder walks a [`Value`] depth first and writes it to a growable
//! buffer. Per call it keeps the reference tables the format defines:
//! strings interned by content and tables interned by handle identity.
//! A table is registered before its payload is walked, so a value that
//! contains itself encodes as a legal back reference rather than
//! recursing; the depth guard exists for deep chains of distinct tables.
//!
//! The wire type of a table follows its shape: an array mark makes a
//! dense ARRAY, all-string keys make an anonymous dynamic OBJECT, and
//! any other key shape falls back to DICTIONARY. Every object shares the
//! one anonymous traits record: the first object writes it inline, the
//! rest reference it.

use bytes::{BufMut, Bytes, BytesMut};
use std::collections::HashMap;

use crate::error::{EncodeErrorKind, EncodeResult};
use crate::marker;
use crate::value::{Table, Value};
use crate::{DEFAULT_MAX_DEPTH, INTEGER_MAX, INTEGER_MIN};

/// Widest index a reference prefix can carry (28 bits).
const INDEX_MAX: u32 = 0x0FFF_FFFF;

/// Transform hook consulted once per value before it is written.
///
/// Returning `Some` encodes the replacement instead of the original.
pub type EncodeHook<'a> = &'a dyn Fn(&Value) -> Option<Value>;

/// Growable output buffer with the AMF3 wire primitives.
///
/// All multi-byte scalars are big-endian on the wire.
#[derive(Debug, Default)]
pub(crate) struct Writer {
    buf: BytesMut,
}

impl Writer {
    pub(crate) fn new() -> Self {
        Writer {
            buf: BytesMut::with_capacity(128),
        }
    }

    pub(crate) fn put_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    /// Writes a U29 varint. The value is masked to 29 bits first, so a
    /// sign-extended integer produces the canonical 4-byte form.
    pub(crate) fn put_u29(&mut self, value: u32) {
        let value = value & 0x1FFF_FFFF;
        if value < 0x80 {
            self.buf.put_u8(value as u8);
        } else if value < 0x4000 {
            self.buf.put_u8(((value >> 7) | 0x80) as u8);
            self.buf.put_u8((value & 0x7F) as u8);
        } else if value < 0x20_0000 {
            self.buf.put_u8(((value >> 14) | 0x80) as u8);
            self.buf.put_u8(((value >> 7) | 0x80) as u8);
            self.buf.put_u8((value & 0x7F) as u8);
        } else {
            self.buf.put_u8(((value >> 22) | 0x80) as u8);
            self.buf.put_u8(((value >> 15) | 0x80) as u8);
            self.buf.put_u8(((value >> 8) | 0x80) as u8);
            self.buf.put_u8((value & 0xFF) as u8);
        }
    }

    pub(crate) fn put_u32(&mut self, value: u32) {
        self.buf.put_u32(value);
    }

    pub(crate) fn put_f64(&mut self, value: f64) {
        self.buf.put_f64(value);
    }

    pub(crate) fn put_slice(&mut self, data: &[u8]) {
        self.buf.put_slice(data);
    }

    pub(crate) fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

/// AMF3 encoder with per-call reference tables.
///
/// An encoder may be reused for sequential [`Encoder::encode`] calls;
/// every call starts from empty tables, so each output is
/// self-contained.
pub struct Encoder<'a> {
    out: Writer,
    strings: HashMap<Bytes, u32>,
    tables: HashMap<usize, u32>,
    traits_emitted: bool,
    hook: Option<EncodeHook<'a>>,
    depth: usize,
    max_depth: usize,
}

/// The wire type a table encodes as, with its payload snapshot.
enum TableKind {
    Array { len: u32 },
    Object { members: Vec<(Bytes, Value)> },
    Dictionary { entries: Vec<(Value, Value)> },
}

impl<'a> Encoder<'a> {
    /// Creates an encoder with the default depth limit.
    pub fn new() -> Self {
        Encoder {
            out: Writer::new(),
            strings: HashMap::new(),
            tables: HashMap::new(),
            traits_emitted: false,
            hook: None,
            depth: 0,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Creates an encoder that consults `hook` before writing each value.
    pub fn with_hook(hook: EncodeHook<'a>) -> Self {
        let mut encoder = Encoder::new();
        encoder.hook = Some(hook);
        encoder
    }

    /// Adjusts the nesting depth limit.
    pub fn set_max_depth(&mut self, depth: usize) {
        self.max_depth = depth;
    }

    /// Encodes `value` into a self-contained AMF3 byte string.
    pub fn encode(&mut self, value: &Value) -> EncodeResult<Bytes> {
        self.out = Writer::new();
        self.strings.clear();
        self.tables.clear();
        self.traits_emitted = false;
        self.depth = 0;
        self.encode_value(value)?;
        let bytes = std::mem::take(&mut self.out).finish();
        tracing::trace!(
            len = bytes.len(),
            strings = self.strings.len(),
            tables = self.tables.len(),
            "encoded value"
        );
        Ok(bytes)
    }

    fn encode_value(&mut self, value: &Value) -> EncodeResult<()> {
        if let Some(hook) = self.hook {
            if let Some(replacement) = hook(value) {
                return self.encode_value_data(&replacement);
            }
        }
        self.encode_value_data(value)
    }

    fn encode_value_data(&mut self, value: &Value) -> EncodeResult<()> {
        match value {
            Value::Undefined => self.out.put_u8(marker::UNDEFINED),
            Value::Null => self.out.put_u8(marker::NULL),
            Value::Boolean(false) => self.out.put_u8(marker::FALSE),
            Value::Boolean(true) => self.out.put_u8(marker::TRUE),
            Value::Integer(i) => {
                if (INTEGER_MIN..=INTEGER_MAX).contains(i) {
                    self.out.put_u8(marker::INTEGER);
                    self.out.put_u29(*i as u32);
                } else {
                    // Too wide for the 29-bit wire type.
                    self.out.put_u8(marker::DOUBLE);
                    self.out.put_f64(*i as f64);
                }
            }
            Value::Double(d) => {
                self.out.put_u8(marker::DOUBLE);
                self.out.put_f64(*d);
            }
            Value::String(s) => {
                self.out.put_u8(marker::STRING);
                self.put_string(s)?;
            }
            Value::Table(t) => return self.encode_table(t),
        }
        Ok(())
    }

    fn encode_table(&mut self, table: &Table) -> EncodeResult<()> {
        if self.depth >= self.max_depth {
            return Err(EncodeErrorKind::RecursionLimit.into());
        }
        self.depth += 1;
        let result = self.encode_table_data(table);
        self.depth -= 1;
        result
    }

    fn encode_table_data(&mut self, table: &Table) -> EncodeResult<()> {
        match classify(table)? {
            TableKind::Array { len } => {
                self.out.put_u8(marker::ARRAY);
                if self.put_table_ref(table)? {
                    return Ok(());
                }
                self.encode_array(table, len)
            }
            TableKind::Object { members } => {
                self.out.put_u8(marker::OBJECT);
                if self.put_table_ref(table)? {
                    return Ok(());
                }
                self.encode_object(members)
            }
            TableKind::Dictionary { entries } => {
                self.out.put_u8(marker::DICTIONARY);
                if self.put_table_ref(table)? {
                    return Ok(());
                }
                self.encode_dictionary(entries)
            }
        }
    }

    /// Interns `table` in the complex-value table. A hit writes the back
    /// reference and reports `true`; a miss registers the table before
    /// its payload is walked, so self-references resolve.
    fn put_table_ref(&mut self, table: &Table) -> EncodeResult<bool> {
        if let Some(&index) = self.tables.get(&table.address()) {
            self.out.put_u29(index << 1);
            return Ok(true);
        }
        let index = self.tables.len() as u32;
        if index > INDEX_MAX {
            return Err(EncodeErrorKind::ReferenceOverflow.into());
        }
        self.tables.insert(table.address(), index);
        Ok(false)
    }

    fn encode_array(&mut self, table: &Table, len: u32) -> EncodeResult<()> {
        self.out.put_u29((len << 1) | 1);
        self.out.put_u8(0x01); // empty associative part
        for i in 0..len as usize {
            let value = table.dense_get(i).unwrap_or(Value::Undefined);
            self.encode_value(&value).map_err(|e| e.trace_index(i))?;
        }
        Ok(())
    }

    fn encode_object(&mut self, members: Vec<(Bytes, Value)>) -> EncodeResult<()> {
        if self.traits_emitted {
            self.out.put_u8(0x01); // reference to traits index 0
        } else {
            self.traits_emitted = true;
            self.out.put_u8(0x0B); // dynamic, not externalizable, no sealed members
            self.out.put_u8(0x01); // empty class name
        }
        for (name, value) in members {
            self.put_string(&name)?;
            self.encode_value(&value)
                .map_err(|e| e.trace_key(&Value::String(name.clone())))?;
        }
        self.out.put_u8(0x01); // empty key terminator
        Ok(())
    }

    fn encode_dictionary(&mut self, entries: Vec<(Value, Value)>) -> EncodeResult<()> {
        self.out.put_u29(((entries.len() as u32) << 1) | 1);
        self.out.put_u8(0x00); // weak-keys=0
        for (key, value) in entries {
            self.encode_value(&key).map_err(|e| e.trace_key(&key))?;
            self.encode_value(&value).map_err(|e| e.trace_key(&key))?;
        }
        Ok(())
    }

    /// Writes a string through the string table. The empty string is
    /// always written inline.
    fn put_string(&mut self, s: &Bytes) -> EncodeResult<()> {
        if !s.is_empty() {
            if let Some(&index) = self.strings.get(s) {
                self.out.put_u29(index << 1);
                return Ok(());
            }
            let index = self.strings.len() as u32;
            if index > INDEX_MAX {
                return Err(EncodeErrorKind::ReferenceOverflow.into());
            }
            self.strings.insert(s.clone(), index);
        }
        if s.len() > INTEGER_MAX as usize {
            return Err(EncodeErrorKind::StringTooLong { length: s.len() }.into());
        }
        self.out.put_u29(((s.len() as u32) << 1) | 1);
        self.out.put_slice(s);
        Ok(())
    }
}

impl Default for Encoder<'_> {
    fn default() -> Self {
        Encoder::new()
    }
}

/// Picks the wire type of a table and snapshots the payload it needs.
fn classify(table: &Table) -> EncodeResult<TableKind> {
    if let Some(len) = table.array_len() {
        if len as i64 > INTEGER_MAX {
            return Err(EncodeErrorKind::TableTooBig {
                length: len as usize,
            }
            .into());
        }
        return Ok(TableKind::Array { len });
    }
    let dense = table.dense();
    let pairs = table.pairs();
    if dense.is_empty() {
        let mut members = Vec::with_capacity(pairs.len());
        let mut object_shaped = true;
        for (key, value) in &pairs {
            match key {
                Value::String(s) if !s.is_empty() => members.push((s.clone(), value.clone())),
                _ => {
                    object_shaped = false;
                    break;
                }
            }
        }
        if object_shaped {
            return Ok(TableKind::Object { members });
        }
    }
    let len = dense.len() + pairs.len();
    if len > INTEGER_MAX as usize {
        return Err(EncodeErrorKind::TableTooBig { length: len }.into());
    }
    let mut entries = Vec::with_capacity(len);
    for (i, value) in dense.into_iter().enumerate() {
        entries.push((Value::Integer(i as i64), value));
    }
    entries.extend(pairs);
    Ok(TableKind::Dictionary { entries })
}

/// Encodes `value` into a self-contained AMF3 byte string.
pub fn encode(value: &Value) -> EncodeResult<Bytes> {
    Encoder::new().encode(value)
}

/// Encodes `value`, consulting `hook` before each value is written.
pub fn encode_with(value: &Value, hook: EncodeHook<'_>) -> EncodeResult<Bytes> {
    Encoder::with_hook(hook).encode(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes_of(value: &Value) -> Vec<u8> {
        encode(value).unwrap().to_vec()
    }

    #[test]
    fn test_encode_scalars() {
        assert_eq!(bytes_of(&Value::Undefined), [0x00]);
        assert_eq!(bytes_of(&Value::Null), [0x01]);
        assert_eq!(bytes_of(&Value::from(false)), [0x02]);
        assert_eq!(bytes_of(&Value::from(true)), [0x03]);
    }

    #[test]
    fn test_encode_integer() {
        assert_eq!(bytes_of(&Value::from(0)), [0x04, 0x00]);
        assert_eq!(bytes_of(&Value::from(1)), [0x04, 0x01]);
        assert_eq!(bytes_of(&Value::from(-1)), [0x04, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(
            bytes_of(&Value::from(268435455)),
            [0x04, 0xBF, 0xFF, 0xFF, 0xFF]
        );
    }

    #[test]
    fn test_wide_integer_falls_back_to_double() {
        let out = bytes_of(&Value::from(0x1000_0000));
        assert_eq!(out[0], 0x05);
        assert_eq!(out.len(), 9);
        assert_eq!(f64::from_be_bytes(out[1..9].try_into().unwrap()), 268435456.0);

        let out = bytes_of(&Value::from(crate::INTEGER_MIN - 1));
        assert_eq!(out[0], 0x05);
    }

    #[test]
    fn test_encode_double() {
        assert_eq!(
            bytes_of(&Value::from(1.5)),
            [0x05, 0x3F, 0xF8, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn test_encode_string() {
        assert_eq!(bytes_of(&Value::from("abc")), [0x06, 0x07, 0x61, 0x62, 0x63]);
        // The empty string is written inline, never by reference.
        assert_eq!(bytes_of(&Value::from("")), [0x06, 0x01]);
    }

    #[test]
    fn test_repeated_string_uses_reference() {
        let array = Table::array(vec![Value::from("x"), Value::from("x")]);
        assert_eq!(
            bytes_of(&Value::Table(array)),
            [0x09, 0x05, 0x01, 0x06, 0x03, 0x78, 0x06, 0x00]
        );
    }

    #[test]
    fn test_repeated_empty_string_stays_inline() {
        let array = Table::array(vec![Value::from(""), Value::from("")]);
        assert_eq!(
            bytes_of(&Value::Table(array)),
            [0x09, 0x05, 0x01, 0x06, 0x01, 0x06, 0x01]
        );
    }

    #[test]
    fn test_encode_anonymous_object() {
        let object = Table::new();
        object.insert(Value::from("k"), Value::from("v"));
        assert_eq!(
            bytes_of(&Value::Table(object)),
            [0x0A, 0x0B, 0x01, 0x03, 0x6B, 0x06, 0x03, 0x76, 0x01]
        );
    }

    #[test]
    fn test_second_anonymous_object_reuses_traits() {
        let a = Table::new();
        a.insert(Value::from("k"), Value::from(1));
        let b = Table::new();
        b.insert(Value::from("k"), Value::from(2));
        let array = Table::array(vec![Value::Table(a), Value::Table(b)]);
        assert_eq!(
            bytes_of(&Value::Table(array)),
            [
                0x09, 0x05, 0x01, // array, 2 dense, no assoc
                0x0A, 0x0B, 0x01, 0x03, 0x6B, 0x04, 0x01, 0x01, // first object
                0x0A, 0x01, 0x00, 0x04, 0x02, 0x01 // traits ref 0, key ref 0
            ]
        );
    }

    #[test]
    fn test_encode_dictionary_with_integer_key() {
        let dict = Table::new();
        dict.insert(Value::from(1), Value::from("y"));
        assert_eq!(
            bytes_of(&Value::Table(dict)),
            [0x11, 0x03, 0x00, 0x04, 0x01, 0x06, 0x03, 0x79]
        );
    }

    #[test]
    fn test_dense_table_without_mark_becomes_dictionary() {
        let t = Table::new();
        t.push(Value::from("a"));
        let out = bytes_of(&Value::Table(t));
        // dictionary, one pair: integer key 0 and the string
        assert_eq!(out, [0x11, 0x03, 0x00, 0x04, 0x00, 0x06, 0x03, 0x61]);
    }

    #[test]
    fn test_array_mark_pads_missing_entries_with_undefined() {
        let t = Table::array(vec![Value::from(7)]);
        t.set_array_len(Some(3));
        assert_eq!(
            bytes_of(&Value::Table(t)),
            [0x09, 0x07, 0x01, 0x04, 0x07, 0x00, 0x00]
        );
    }

    #[test]
    fn test_shared_table_encodes_as_back_reference() {
        let inner = Table::array(vec![Value::from(1)]);
        let outer = Table::array(vec![
            Value::Table(inner.clone()),
            Value::Table(inner),
        ]);
        assert_eq!(
            bytes_of(&Value::Table(outer)),
            [
                0x09, 0x05, 0x01, // outer: 2 dense
                0x09, 0x03, 0x01, 0x04, 0x01, // inner, index 1
                0x09, 0x02 // back reference to index 1
            ]
        );
    }

    #[test]
    fn test_self_referencing_table_encodes_as_back_reference() {
        let t = Table::array(vec![]);
        t.push(Value::Table(t.clone()));
        assert_eq!(
            bytes_of(&Value::Table(t)),
            [0x09, 0x03, 0x01, 0x09, 0x00]
        );
    }

    #[test]
    fn test_class_and_external_attributes_are_not_reencoded() {
        let typed = Table::new();
        typed.insert(Value::from("k"), Value::from("v"));
        typed.set_class_name(Some(Bytes::from_static(b"org.Example")));
        // Same anonymous object as without the class name.
        assert_eq!(
            bytes_of(&Value::Table(typed)),
            [0x0A, 0x0B, 0x01, 0x03, 0x6B, 0x06, 0x03, 0x76, 0x01]
        );

        let external = Table::new();
        external.set_external(Some(Value::from(42)));
        assert_eq!(bytes_of(&Value::Table(external)), [0x0A, 0x0B, 0x01, 0x01]);
    }

    #[test]
    fn test_recursion_limit_on_deep_nesting() {
        let mut value = Value::Null;
        for _ in 0..1100 {
            value = Value::Table(Table::array(vec![value]));
        }
        let err = encode(&value).unwrap_err();
        assert_eq!(err.kind(), &EncodeErrorKind::RecursionLimit);
    }

    #[test]
    fn test_error_trace_names_the_path() {
        let inner = Table::array(vec![Value::Table(Table::array(vec![]))]);
        let outer = Table::new();
        outer.insert(Value::from("a"), Value::Table(inner));

        let mut encoder = Encoder::new();
        encoder.set_max_depth(2);
        let err = encoder.encode(&Value::Table(outer)).unwrap_err();
        assert_eq!(err.to_string(), "[\"a\"] => [0] => recursion detected");
    }

    #[test]
    fn test_encode_hook_replaces_values() {
        let hook = |value: &Value| -> Option<Value> {
            value.as_i64().map(|i| Value::from(i + 1))
        };
        let array = Table::array(vec![Value::from(1), Value::from("s")]);
        let out = encode_with(&Value::Table(array), &hook).unwrap();
        assert_eq!(
            out.to_vec(),
            [0x09, 0x05, 0x01, 0x04, 0x02, 0x06, 0x03, 0x73]
        );
    }

    #[test]
    fn test_u29_boundaries() {
        let cases: [(u32, &[u8]); 8] = [
            (0x00, &[0x00]),
            (0x7F, &[0x7F]),
            (0x80, &[0x81, 0x00]),
            (0x3FFF, &[0xFF, 0x7F]),
            (0x4000, &[0x81, 0x80, 0x00]),
            (0x1F_FFFF, &[0xFF, 0xFF, 0x7F]),
            (0x20_0000, &[0x80, 0xC0, 0x80, 0x00]),
            (0x1FFF_FFFF, &[0xFF, 0xFF, 0xFF, 0xFF]),
        ];
        for (value, expected) in cases {
            let mut out = Writer::new();
            out.put_u29(value);
            assert_eq!(out.finish().to_vec(), expected, "u29 {:#x}", value);
        }
    }
}
