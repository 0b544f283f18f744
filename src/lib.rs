//! AMF3 (Action Message Format 3) encoder and decoder.
//!
//! AMF3 is the compact binary serialization format of the Flash runtime,
//! carried by Flex RPC and RTMP. This crate converts between AMF3 byte
//! streams and a dynamically typed in-memory model: scalars map onto
//! [`Value`] variants and every compound type (array, object, dictionary)
//! onto the shared [`Table`] container.
//!
//! Type markers:
//!
//! ```text
//! 0x00 Undefined    0x07 XmlDocument   0x0D VectorInt
//! 0x01 Null         0x08 Date          0x0E VectorUint
//! 0x02 False        0x09 Array         0x0F VectorDouble
//! 0x03 True         0x0A Object        0x10 VectorObject
//! 0x04 Integer      0x0B Xml           0x11 Dictionary
//! 0x05 Double       0x0C ByteArray
//! 0x06 String
//! ```
//!
//! Both directions keep the three reference tables the format defines
//! (strings, complex values, class traits) in lockstep, so repeated
//! strings are written once, shared tables decode to shared handles, and
//! even cyclic structures survive a round trip.
//!
//! # Examples
//!
//! ```
//! use amf3::{Table, Value};
//!
//! let table = Table::new();
//! table.insert(Value::from("name"), Value::from("amf3"));
//! table.insert(Value::from("answer"), Value::from(42));
//!
//! let bytes = amf3::encode(&Value::Table(table)).unwrap();
//! let (value, consumed) = amf3::decode(&bytes).unwrap();
//! assert_eq!(consumed, bytes.len());
//!
//! let decoded = value.as_table().unwrap();
//! assert_eq!(decoded.get(&Value::from("answer")), Some(Value::from(42)));
//! ```

pub mod error;

mod decode;
mod encode;
mod pack;
mod value;

pub use decode::{decode, decode_at, decode_with, Decoder};
pub use encode::{encode, encode_with, EncodeHook, Encoder};
pub use error::{DecodeError, DecodeResult, EncodeError, EncodeErrorKind, EncodeResult};
pub use pack::{pack, unpack, unpack_at};
pub use value::{Table, Value};

/// Name of this library.
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Version of this library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The typed null sentinel, distinct from [`Value::Undefined`].
pub const NULL: Value = Value::Null;

/// Smallest value the INTEGER wire type can carry (-2^28).
pub const INTEGER_MIN: i64 = -0x1000_0000;

/// Largest value the INTEGER wire type can carry (2^28 - 1).
pub const INTEGER_MAX: i64 = 0x0FFF_FFFF;

/// Largest unsigned value a U29 varint can carry (2^29 - 1).
pub const U29_MAX: u32 = 0x1FFF_FFFF;

/// Default nesting limit for both directions of the codec.
pub(crate) const DEFAULT_MAX_DEPTH: usize = 1000;

pub(crate) mod marker {
    pub const UNDEFINED: u8 = 0x00;
    pub const NULL: u8 = 0x01;
    pub const FALSE: u8 = 0x02;
    pub const TRUE: u8 = 0x03;
    pub const INTEGER: u8 = 0x04;
    pub const DOUBLE: u8 = 0x05;
    pub const STRING: u8 = 0x06;
    pub const XML_DOC: u8 = 0x07;
    pub const DATE: u8 = 0x08;
    pub const ARRAY: u8 = 0x09;
    pub const OBJECT: u8 = 0x0A;
    pub const XML: u8 = 0x0B;
    pub const BYTE_ARRAY: u8 = 0x0C;
    pub const VECTOR_INT: u8 = 0x0D;
    pub const VECTOR_UINT: u8 = 0x0E;
    pub const VECTOR_DOUBLE: u8 = 0x0F;
    pub const VECTOR_OBJECT: u8 = 0x10;
    pub const DICTIONARY: u8 = 0x11;
}
