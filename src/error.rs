//! Error types for encoding and decoding.

use std::error::Error;
use std::fmt;

use crate::value::Value;

/// Result of a decode operation.
pub type DecodeResult<T> = Result<T, DecodeError>;

/// Result of an encode operation.
pub type EncodeResult<T> = Result<T, EncodeError>;

/// Error raised while reading an AMF3 byte stream.
///
/// Variants that concern the input carry the byte offset at which the
/// fault was detected (the start offset of the field being read).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The buffer ended before the current field was complete.
    InsufficientData {
        /// Offset of the field that could not be read.
        position: usize,
    },
    /// A type marker outside the range AMF3 defines.
    InvalidMarker {
        /// The offending marker byte.
        marker: u8,
        /// Offset of the marker.
        position: usize,
    },
    /// A reference index with no entry in the relevant table.
    InvalidReference {
        /// The out-of-range index.
        index: usize,
        /// Offset of the reference prefix.
        position: usize,
    },
    /// Nesting exceeded the decoder's depth limit.
    TooDeep {
        /// Offset of the value that crossed the limit.
        position: usize,
    },
    /// The requested start offset lies beyond the end of the buffer.
    OutOfRange {
        /// The requested offset.
        position: usize,
    },
    /// An unknown `unpack` format option.
    BadFormat {
        /// The offending option character.
        option: char,
    },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::InsufficientData { position } => {
                write!(f, "insufficient data at offset {}", position)
            }
            DecodeError::InvalidMarker { marker, position } => {
                write!(f, "invalid value type 0x{:02x} at offset {}", marker, position)
            }
            DecodeError::InvalidReference { index, position } => {
                write!(f, "invalid reference {} at offset {}", index, position)
            }
            DecodeError::TooDeep { position } => {
                write!(f, "too many nested values at offset {}", position)
            }
            DecodeError::OutOfRange { position } => {
                write!(f, "offset {} is out of range", position)
            }
            DecodeError::BadFormat { option } => {
                write!(f, "invalid format option '{}'", option)
            }
        }
    }
}

impl Error for DecodeError {}

/// Error raised while writing a value.
///
/// The error carries the structural path from the root value down to the
/// value that failed, so `Display` output reads like
/// `["items"] => [2] => recursion detected`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeError {
    kind: EncodeErrorKind,
    /// Path segments, innermost first.
    trace: Vec<String>,
}

/// The failure class of an [`EncodeError`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeErrorKind {
    /// A reference table grew past the widest index a reference prefix
    /// can carry.
    ReferenceOverflow,
    /// Nesting exceeded the encoder's depth limit.
    RecursionLimit,
    /// A string longer than a U29 length prefix can describe.
    StringTooLong {
        /// Byte length of the string.
        length: usize,
    },
    /// A table with more entries than a U29 length prefix can describe.
    TableTooBig {
        /// Entry count of the table.
        length: usize,
    },
    /// A `pack` argument outside the range of its format option.
    OutOfRange {
        /// The format option.
        option: char,
    },
    /// A `pack` argument of the wrong kind for its format option.
    BadArgument {
        /// The format option.
        option: char,
    },
    /// Fewer `pack` arguments than format options.
    MissingArgument {
        /// Index of the first missing argument.
        index: usize,
    },
    /// An unknown `pack` format option.
    BadFormat {
        /// The offending option character.
        option: char,
    },
}

impl EncodeError {
    pub(crate) fn new(kind: EncodeErrorKind) -> Self {
        EncodeError {
            kind,
            trace: Vec::new(),
        }
    }

    /// The failure class.
    pub fn kind(&self) -> &EncodeErrorKind {
        &self.kind
    }

    /// Structural path to the failed value, outermost segment first.
    pub fn path(&self) -> Vec<&str> {
        self.trace.iter().rev().map(String::as_str).collect()
    }

    pub(crate) fn trace(mut self, segment: String) -> Self {
        self.trace.push(segment);
        self
    }

    pub(crate) fn trace_index(self, index: usize) -> Self {
        self.trace(format!("[{}]", index))
    }

    pub(crate) fn trace_key(self, key: &Value) -> Self {
        let segment = match key {
            Value::Undefined => "[undefined]".to_string(),
            Value::Null => "[null]".to_string(),
            Value::Boolean(b) => format!("[{}]", b),
            Value::Integer(i) => format!("[{}]", i),
            Value::Double(d) => format!("[{}]", d),
            Value::String(s) => format!("[\"{}\"]", String::from_utf8_lossy(s)),
            Value::Table(_) => "[table]".to_string(),
        };
        self.trace(segment)
    }
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in self.trace.iter().rev() {
            write!(f, "{} => ", segment)?;
        }
        write!(f, "{}", self.kind)
    }
}

impl fmt::Display for EncodeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodeErrorKind::ReferenceOverflow => write!(f, "reference table overflow"),
            EncodeErrorKind::RecursionLimit => write!(f, "recursion detected"),
            EncodeErrorKind::StringTooLong { length } => {
                write!(f, "string of {} bytes is too long", length)
            }
            EncodeErrorKind::TableTooBig { length } => {
                write!(f, "table with {} entries is too big", length)
            }
            EncodeErrorKind::OutOfRange { option } => {
                write!(f, "value out of range for format option '{}'", option)
            }
            EncodeErrorKind::BadArgument { option } => {
                write!(f, "unsuitable value for format option '{}'", option)
            }
            EncodeErrorKind::MissingArgument { index } => {
                write!(f, "argument {} expected", index)
            }
            EncodeErrorKind::BadFormat { option } => {
                write!(f, "invalid format option '{}'", option)
            }
        }
    }
}

impl Error for EncodeError {}

impl From<EncodeErrorKind> for EncodeError {
    fn from(kind: EncodeErrorKind) -> Self {
        EncodeError::new(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_display() {
        let e = DecodeError::InsufficientData { position: 7 };
        assert_eq!(e.to_string(), "insufficient data at offset 7");

        let e = DecodeError::InvalidMarker {
            marker: 0x42,
            position: 0,
        };
        assert_eq!(e.to_string(), "invalid value type 0x42 at offset 0");
    }

    #[test]
    fn test_encode_error_trace_renders_outermost_first() {
        let e = EncodeError::new(EncodeErrorKind::RecursionLimit)
            .trace_index(3)
            .trace_key(&Value::from("items"));
        assert_eq!(e.to_string(), "[\"items\"] => [3] => recursion detected");
        assert_eq!(e.path(), vec!["[\"items\"]", "[3]"]);
    }
}
