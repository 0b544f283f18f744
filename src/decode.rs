//! AMF3 decoder.
//!
//! The decoder walks a byte slice with a bounds-checked cursor; every
//! error carries the offset at which it was detected, since the input is
//! untrusted. Decoded strings land in the string table, compound values
//! in the complex-value table (registered before their payload is read,
//! so back references inside a payload resolve, including cyclic ones),
//! and class descriptors in the traits table.

use bytes::Bytes;
use std::rc::Rc;

use crate::error::{DecodeError, DecodeResult};
use crate::marker;
use crate::value::{Table, Value};
use crate::DEFAULT_MAX_DEPTH;

/// Bounds-checked cursor over the input buffer.
///
/// Every read either advances the cursor by the exact width of the field
/// or fails with `InsufficientData` carrying the field's start offset.
#[derive(Debug)]
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn seek(&mut self, pos: usize) -> DecodeResult<()> {
        if pos > self.buf.len() {
            return Err(DecodeError::OutOfRange { position: pos });
        }
        self.pos = pos;
        Ok(())
    }

    fn next_byte(&mut self, field_start: usize) -> DecodeResult<u8> {
        if self.pos >= self.buf.len() {
            return Err(DecodeError::InsufficientData {
                position: field_start,
            });
        }
        let b = self.buf[self.pos];
        self.pos += 1;
        Ok(b)
    }

    pub(crate) fn read_u8(&mut self) -> DecodeResult<u8> {
        let start = self.pos;
        self.next_byte(start)
    }

    /// Reads a U29 varint: up to three continuation bytes of 7 bits,
    /// then a fourth byte contributing all 8 bits.
    pub(crate) fn read_u29(&mut self) -> DecodeResult<u32> {
        let start = self.pos;
        let mut value: u32 = 0;
        for _ in 0..3 {
            let b = self.next_byte(start)?;
            value = (value << 7) | (b & 0x7F) as u32;
            if b & 0x80 == 0 {
                return Ok(value);
            }
        }
        let b = self.next_byte(start)?;
        Ok((value << 8) | b as u32)
    }

    pub(crate) fn read_u32(&mut self) -> DecodeResult<u32> {
        if self.buf.len() - self.pos < 4 {
            return Err(DecodeError::InsufficientData { position: self.pos });
        }
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.buf[self.pos..self.pos + 4]);
        self.pos += 4;
        Ok(u32::from_be_bytes(raw))
    }

    pub(crate) fn read_f64(&mut self) -> DecodeResult<f64> {
        if self.buf.len() - self.pos < 8 {
            return Err(DecodeError::InsufficientData { position: self.pos });
        }
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.buf[self.pos..self.pos + 8]);
        self.pos += 8;
        Ok(f64::from_be_bytes(raw))
    }

    pub(crate) fn read_bytes(&mut self, len: usize) -> DecodeResult<Bytes> {
        if self.buf.len() - self.pos < len {
            return Err(DecodeError::InsufficientData { position: self.pos });
        }
        let data = Bytes::copy_from_slice(&self.buf[self.pos..self.pos + len]);
        self.pos += len;
        Ok(data)
    }
}

/// Sign-extends bit 28 of a U29, yielding the INTEGER wire type's value.
pub(crate) fn sign_extend(value: u32) -> i64 {
    if value & 0x1000_0000 != 0 {
        value as i64 - 0x2000_0000
    } else {
        value as i64
    }
}

/// A ref-or-inline U29 prefix: bit 0 picks between reusing a table entry
/// and an inline definition whose payload follows.
#[derive(Debug)]
enum Prefix {
    Reference(usize),
    Inline(u32),
}

/// A decoded class descriptor.
#[derive(Debug)]
struct Traits {
    class_name: Bytes,
    is_external: bool,
    is_dynamic: bool,
    members: Vec<Bytes>,
}

/// AMF3 decoder over a byte slice.
///
/// Reference tables persist across sequential [`Decoder::decode`] calls,
/// matching how AMF3 frames several values in one context; call
/// [`Decoder::reset`] to drop them. The free functions [`decode`],
/// [`decode_at`] and [`decode_with`] construct a fresh decoder per call.
pub struct Decoder<'a, 'h> {
    input: Reader<'a>,
    strings: Vec<Bytes>,
    complexes: Vec<Value>,
    traits: Vec<Rc<Traits>>,
    hook: Option<&'h mut dyn FnMut(Value) -> Value>,
    depth: usize,
    max_depth: usize,
}

impl<'a, 'h> Decoder<'a, 'h> {
    /// Creates a decoder reading from the start of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Decoder {
            input: Reader::new(buf),
            strings: Vec::new(),
            complexes: Vec::new(),
            traits: Vec::new(),
            hook: None,
            depth: 0,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Installs a transform hook, invoked for every decoded compound
    /// after it has been registered; its return value replaces the
    /// compound in the result.
    pub fn set_hook(&mut self, hook: &'h mut dyn FnMut(Value) -> Value) {
        self.hook = Some(hook);
    }

    /// Adjusts the nesting depth limit.
    pub fn set_max_depth(&mut self, depth: usize) {
        self.max_depth = depth;
    }

    /// Current byte offset.
    pub fn position(&self) -> usize {
        self.input.position()
    }

    /// Moves the cursor. Fails if `pos` lies beyond the buffer.
    pub fn seek(&mut self, pos: usize) -> DecodeResult<()> {
        self.input.seek(pos)
    }

    /// Drops all reference tables.
    pub fn reset(&mut self) {
        self.strings.clear();
        self.complexes.clear();
        self.traits.clear();
    }

    /// Decodes one value at the cursor, advancing past it.
    pub fn decode(&mut self) -> DecodeResult<Value> {
        let start = self.input.position();
        let value = self.decode_value()?;
        tracing::trace!(
            consumed = self.input.position() - start,
            complexes = self.complexes.len(),
            "decoded value"
        );
        Ok(value)
    }

    fn decode_value(&mut self) -> DecodeResult<Value> {
        if self.depth >= self.max_depth {
            return Err(DecodeError::TooDeep {
                position: self.input.position(),
            });
        }
        self.depth += 1;
        let result = self.decode_value_data();
        self.depth -= 1;
        let value = result?;
        if let Value::Table(_) = value {
            if let Some(hook) = self.hook.as_mut() {
                return Ok(hook(value));
            }
        }
        Ok(value)
    }

    fn decode_value_data(&mut self) -> DecodeResult<Value> {
        let start = self.input.position();
        let kind = self.input.read_u8()?;
        match kind {
            marker::UNDEFINED => Ok(Value::Undefined),
            marker::NULL => Ok(Value::Null),
            marker::FALSE => Ok(Value::Boolean(false)),
            marker::TRUE => Ok(Value::Boolean(true)),
            marker::INTEGER => Ok(Value::Integer(sign_extend(self.input.read_u29()?))),
            marker::DOUBLE => Ok(Value::Double(self.input.read_f64()?)),
            marker::STRING => Ok(Value::String(self.read_string()?)),
            marker::XML_DOC | marker::XML | marker::BYTE_ARRAY => self.decode_blob(),
            marker::DATE => self.decode_date(),
            marker::ARRAY => self.decode_array(),
            marker::OBJECT => self.decode_object(),
            marker::VECTOR_INT
            | marker::VECTOR_UINT
            | marker::VECTOR_DOUBLE
            | marker::VECTOR_OBJECT => self.decode_vector(kind),
            marker::DICTIONARY => self.decode_dictionary(),
            _ => Err(DecodeError::InvalidMarker {
                marker: kind,
                position: start,
            }),
        }
    }

    fn read_prefix(&mut self) -> DecodeResult<Prefix> {
        let prefix = self.input.read_u29()?;
        if prefix & 1 == 0 {
            Ok(Prefix::Reference((prefix >> 1) as usize))
        } else {
            Ok(Prefix::Inline(prefix >> 1))
        }
    }

    fn complex_at(&self, index: usize, position: usize) -> DecodeResult<Value> {
        self.complexes
            .get(index)
            .cloned()
            .ok_or(DecodeError::InvalidReference { index, position })
    }

    /// Reads a string through the string table. Only nonempty inline
    /// strings are registered.
    fn read_string(&mut self) -> DecodeResult<Bytes> {
        let start = self.input.position();
        match self.read_prefix()? {
            Prefix::Reference(index) => self
                .strings
                .get(index)
                .cloned()
                .ok_or(DecodeError::InvalidReference {
                    index,
                    position: start,
                }),
            Prefix::Inline(len) => {
                let data = self.input.read_bytes(len as usize)?;
                if !data.is_empty() {
                    self.strings.push(data.clone());
                }
                Ok(data)
            }
        }
    }

    /// XML, XMLDOC and BYTEARRAY payloads: raw byte blobs registered in
    /// the complex-value table rather than the string table.
    fn decode_blob(&mut self) -> DecodeResult<Value> {
        let start = self.input.position();
        match self.read_prefix()? {
            Prefix::Reference(index) => self.complex_at(index, start),
            Prefix::Inline(len) => {
                let value = Value::String(self.input.read_bytes(len as usize)?);
                self.complexes.push(value.clone());
                Ok(value)
            }
        }
    }

    fn decode_date(&mut self) -> DecodeResult<Value> {
        let start = self.input.position();
        match self.read_prefix()? {
            Prefix::Reference(index) => self.complex_at(index, start),
            Prefix::Inline(_) => {
                let value = Value::Double(self.input.read_f64()?);
                self.complexes.push(value.clone());
                Ok(value)
            }
        }
    }

    fn decode_array(&mut self) -> DecodeResult<Value> {
        let start = self.input.position();
        let len = match self.read_prefix()? {
            Prefix::Reference(index) => return self.complex_at(index, start),
            Prefix::Inline(len) => len,
        };
        let table = Table::new();
        self.complexes.push(Value::Table(table.clone()));
        loop {
            // Associative part, terminated by the empty key.
            let key = self.read_string()?;
            if key.is_empty() {
                break;
            }
            let value = self.decode_value()?;
            table.insert(Value::String(key), value);
        }
        for _ in 0..len {
            let value = self.decode_value()?;
            table.push(value);
        }
        table.set_array_len(Some(len));
        Ok(Value::Table(table))
    }

    fn decode_object(&mut self) -> DecodeResult<Value> {
        let start = self.input.position();
        let prefix = match self.read_prefix()? {
            Prefix::Reference(index) => return self.complex_at(index, start),
            Prefix::Inline(prefix) => prefix,
        };
        let traits = self.decode_traits(prefix, start)?;
        let table = Table::new();
        self.complexes.push(Value::Table(table.clone()));
        if traits.is_external {
            let data = self.decode_value()?;
            table.set_external(Some(data));
        } else {
            for name in &traits.members {
                let value = self.decode_value()?;
                table.insert(Value::String(name.clone()), value);
            }
            if traits.is_dynamic {
                loop {
                    let key = self.read_string()?;
                    if key.is_empty() {
                        break;
                    }
                    let value = self.decode_value()?;
                    table.insert(Value::String(key), value);
                }
            }
        }
        if !traits.class_name.is_empty() {
            table.set_class_name(Some(traits.class_name.clone()));
        }
        Ok(Value::Table(table))
    }

    /// Inner prefix of an inline object: bit 0 selects a new traits
    /// definition over a traits-table reference. A new definition packs
    /// externalizable into bit 1, dynamic into bit 2 and the sealed
    /// member count into the rest.
    fn decode_traits(&mut self, prefix: u32, start: usize) -> DecodeResult<Rc<Traits>> {
        if prefix & 1 == 0 {
            let index = (prefix >> 1) as usize;
            return self
                .traits
                .get(index)
                .cloned()
                .ok_or(DecodeError::InvalidReference {
                    index,
                    position: start,
                });
        }
        let bits = prefix >> 1;
        let class_name = self.read_string()?;
        let count = (bits >> 2) as usize;
        let mut members = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            members.push(self.read_string()?);
        }
        let traits = Rc::new(Traits {
            class_name,
            is_external: bits & 0b01 != 0,
            is_dynamic: bits & 0b10 != 0,
            members,
        });
        self.traits.push(traits.clone());
        Ok(traits)
    }

    fn decode_vector(&mut self, kind: u8) -> DecodeResult<Value> {
        let start = self.input.position();
        let len = match self.read_prefix()? {
            Prefix::Reference(index) => return self.complex_at(index, start),
            Prefix::Inline(len) => len,
        };
        let _is_fixed = self.input.read_u8()?;
        if kind == marker::VECTOR_OBJECT {
            let _type_name = self.read_string()?;
        }
        let table = Table::new();
        self.complexes.push(Value::Table(table.clone()));
        for _ in 0..len {
            let item = match kind {
                marker::VECTOR_INT => Value::Integer(self.input.read_u32()? as i32 as i64),
                marker::VECTOR_UINT => Value::Integer(self.input.read_u32()? as i64),
                marker::VECTOR_DOUBLE => Value::Double(self.input.read_f64()?),
                _ => self.decode_value()?,
            };
            table.push(item);
        }
        Ok(Value::Table(table))
    }

    fn decode_dictionary(&mut self) -> DecodeResult<Value> {
        let start = self.input.position();
        let len = match self.read_prefix()? {
            Prefix::Reference(index) => return self.complex_at(index, start),
            Prefix::Inline(len) => len,
        };
        let _weak_keys = self.input.read_u8()?;
        let table = Table::new();
        self.complexes.push(Value::Table(table.clone()));
        for _ in 0..len {
            let key = self.decode_value()?;
            let value = self.decode_value()?;
            // Undefined keys are silently dropped.
            if !key.is_undefined() {
                table.insert(key, value);
            }
        }
        Ok(Value::Table(table))
    }
}

/// Decodes one value from the start of `buf`, returning it and the
/// offset one past the last byte consumed.
pub fn decode(buf: &[u8]) -> DecodeResult<(Value, usize)> {
    decode_at(buf, 0)
}

/// Decodes one value starting at byte offset `pos`.
pub fn decode_at(buf: &[u8], pos: usize) -> DecodeResult<(Value, usize)> {
    let mut decoder = Decoder::new(buf);
    decoder.seek(pos)?;
    let value = decoder.decode()?;
    Ok((value, decoder.position()))
}

/// Decodes one value starting at `pos`, passing every decoded compound
/// through `hook`.
pub fn decode_with<F>(buf: &[u8], pos: usize, mut hook: F) -> DecodeResult<(Value, usize)>
where
    F: FnMut(Value) -> Value,
{
    let mut decoder = Decoder::new(buf);
    decoder.seek(pos)?;
    decoder.set_hook(&mut hook);
    let value = decoder.decode()?;
    Ok((value, decoder.position()))
}
