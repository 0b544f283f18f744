//! Format-string packing helpers for primitive wire framing.
//!
//! [`pack`] and [`unpack`] expose the codec's wire primitives to callers
//! that frame their own data (lengths, tags, headers) around encoded
//! values. One character of the format string describes one argument:
//!
//! ```text
//! b   single byte, 0..=255
//! i   U29, signed (sign-extended through bit 28)
//! I   32-bit signed, big-endian
//! u   U29, unsigned
//! U   32-bit unsigned, big-endian
//! d   IEEE-754 double, big-endian
//! s   byte string with a U29 length prefix
//! S   byte string with a U32 length prefix
//! ```

use bytes::Bytes;

use crate::decode::{sign_extend, Reader};
use crate::encode::Writer;
use crate::error::{DecodeError, DecodeResult, EncodeErrorKind, EncodeResult};
use crate::value::Value;
use crate::{INTEGER_MAX, INTEGER_MIN, U29_MAX};

/// Packs `args` per `format` into a byte string.
///
/// Integer options take [`Value::Integer`], `d` also accepts one, and
/// the string options take [`Value::String`]. Arguments beyond the
/// format string are ignored.
pub fn pack(format: &str, args: &[Value]) -> EncodeResult<Bytes> {
    let mut out = Writer::new();
    for (index, option) in format.chars().enumerate() {
        let arg = args
            .get(index)
            .ok_or(EncodeErrorKind::MissingArgument { index })?;
        match option {
            'b' => {
                let v = int_arg(arg, option)?;
                if !(0..=0xFF).contains(&v) {
                    return Err(EncodeErrorKind::OutOfRange { option }.into());
                }
                out.put_u8(v as u8);
            }
            'i' => {
                let v = int_arg(arg, option)?;
                if !(INTEGER_MIN..=INTEGER_MAX).contains(&v) {
                    return Err(EncodeErrorKind::OutOfRange { option }.into());
                }
                out.put_u29(v as u32);
            }
            'I' => {
                let v = int_arg(arg, option)?;
                if !(i64::from(i32::MIN)..=i64::from(i32::MAX)).contains(&v) {
                    return Err(EncodeErrorKind::OutOfRange { option }.into());
                }
                out.put_u32(v as i32 as u32);
            }
            'u' => {
                let v = int_arg(arg, option)?;
                if !(0..=U29_MAX as i64).contains(&v) {
                    return Err(EncodeErrorKind::OutOfRange { option }.into());
                }
                out.put_u29(v as u32);
            }
            'U' => {
                let v = int_arg(arg, option)?;
                if !(0..=u32::MAX as i64).contains(&v) {
                    return Err(EncodeErrorKind::OutOfRange { option }.into());
                }
                out.put_u32(v as u32);
            }
            'd' => {
                let v = arg
                    .as_f64()
                    .ok_or(EncodeErrorKind::BadArgument { option })?;
                out.put_f64(v);
            }
            's' => {
                let data = bytes_arg(arg, option)?;
                if data.len() > U29_MAX as usize {
                    return Err(EncodeErrorKind::StringTooLong { length: data.len() }.into());
                }
                out.put_u29(data.len() as u32);
                out.put_slice(&data);
            }
            'S' => {
                let data = bytes_arg(arg, option)?;
                if data.len() > u32::MAX as usize {
                    return Err(EncodeErrorKind::StringTooLong { length: data.len() }.into());
                }
                out.put_u32(data.len() as u32);
                out.put_slice(&data);
            }
            _ => return Err(EncodeErrorKind::BadFormat { option }.into()),
        }
    }
    Ok(out.finish())
}

/// Unpacks values per `format` from the start of `buf`, returning them
/// and the offset one past the last byte consumed.
pub fn unpack(format: &str, buf: &[u8]) -> DecodeResult<(Vec<Value>, usize)> {
    unpack_at(format, buf, 0)
}

/// Unpacks values per `format` starting at byte offset `pos`.
pub fn unpack_at(format: &str, buf: &[u8], pos: usize) -> DecodeResult<(Vec<Value>, usize)> {
    let mut input = Reader::new(buf);
    input.seek(pos)?;
    let mut values = Vec::with_capacity(format.len());
    for option in format.chars() {
        let value = match option {
            'b' => Value::Integer(input.read_u8()? as i64),
            'i' => Value::Integer(sign_extend(input.read_u29()?)),
            'I' => Value::Integer(input.read_u32()? as i32 as i64),
            'u' => Value::Integer(input.read_u29()? as i64),
            'U' => Value::Integer(input.read_u32()? as i64),
            'd' => Value::Double(input.read_f64()?),
            's' => {
                let len = input.read_u29()? as usize;
                Value::String(input.read_bytes(len)?)
            }
            'S' => {
                let len = input.read_u32()? as usize;
                Value::String(input.read_bytes(len)?)
            }
            _ => return Err(DecodeError::BadFormat { option }),
        };
        values.push(value);
    }
    Ok((values, input.position()))
}

fn int_arg(value: &Value, option: char) -> EncodeResult<i64> {
    value
        .as_i64()
        .ok_or_else(|| EncodeErrorKind::BadArgument { option }.into())
}

fn bytes_arg(value: &Value, option: char) -> EncodeResult<Bytes> {
    value
        .as_bytes()
        .cloned()
        .ok_or_else(|| EncodeErrorKind::BadArgument { option }.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_and_unpack_every_option() {
        let args = [
            Value::from(5),
            Value::from(-1),
            Value::from(-2),
            Value::from(300),
            Value::from(4294967295u32),
            Value::from(1.5),
            Value::from("abc"),
            Value::from("d"),
        ];
        let buf = pack("biIuUdsS", &args).unwrap();
        let (values, next) = unpack("biIuUdsS", &buf).unwrap();
        assert_eq!(values, args);
        assert_eq!(next, buf.len());
    }

    #[test]
    fn test_pack_byte_layout() {
        let buf = pack("bIs", &[Value::from(7), Value::from(-2), Value::from("ab")]).unwrap();
        assert_eq!(
            buf.to_vec(),
            [0x07, 0xFF, 0xFF, 0xFF, 0xFE, 0x02, 0x61, 0x62]
        );
    }

    #[test]
    fn test_pack_string_length_has_no_reference_bit() {
        // A 3-byte string gets length prefix 3, not (3 << 1) | 1.
        let buf = pack("s", &[Value::from("xyz")]).unwrap();
        assert_eq!(buf.to_vec(), [0x03, 0x78, 0x79, 0x7A]);
    }

    #[test]
    fn test_pack_range_checks() {
        let err = pack("b", &[Value::from(300)]).unwrap_err();
        assert_eq!(err.kind(), &EncodeErrorKind::OutOfRange { option: 'b' });

        let err = pack("u", &[Value::from(-1)]).unwrap_err();
        assert_eq!(err.kind(), &EncodeErrorKind::OutOfRange { option: 'u' });

        let err = pack("i", &[Value::from(crate::INTEGER_MAX + 1)]).unwrap_err();
        assert_eq!(err.kind(), &EncodeErrorKind::OutOfRange { option: 'i' });

        let err = pack("d", &[Value::from("not a number")]).unwrap_err();
        assert_eq!(err.kind(), &EncodeErrorKind::BadArgument { option: 'd' });
    }

    #[test]
    fn test_pack_missing_argument() {
        let err = pack("bb", &[Value::from(1)]).unwrap_err();
        assert_eq!(err.kind(), &EncodeErrorKind::MissingArgument { index: 1 });
    }

    #[test]
    fn test_bad_format_option() {
        let err = pack("z", &[Value::from(1)]).unwrap_err();
        assert_eq!(err.kind(), &EncodeErrorKind::BadFormat { option: 'z' });

        assert_eq!(
            unpack("z", &[0x00]).unwrap_err(),
            DecodeError::BadFormat { option: 'z' }
        );
    }

    #[test]
    fn test_unpack_at_offset() {
        let (values, next) = unpack_at("b", &[0xAA, 0x07], 1).unwrap();
        assert_eq!(values, vec![Value::Integer(7)]);
        assert_eq!(next, 2);

        assert_eq!(
            unpack_at("b", &[], 1).unwrap_err(),
            DecodeError::OutOfRange { position: 1 }
        );
    }

    #[test]
    fn test_unpack_truncated_input() {
        assert_eq!(
            unpack("d", &[0x3F, 0xF8]).unwrap_err(),
            DecodeError::InsufficientData { position: 0 }
        );
        assert_eq!(
            unpack("s", &[0x05, 0x61]).unwrap_err(),
            DecodeError::InsufficientData { position: 1 }
        );
    }

    #[test]
    fn test_unpack_sign_extension() {
        let buf = pack("i", &[Value::from(-1)]).unwrap();
        assert_eq!(buf.to_vec(), [0xFF, 0xFF, 0xFF, 0xFF]);
        let (values, _) = unpack("i", &buf).unwrap();
        assert_eq!(values, vec![Value::Integer(-1)]);

        // The same bytes read unsigned give the full 29-bit value.
        let (values, _) = unpack("u", &buf).unwrap();
        assert_eq!(values, vec![Value::Integer(0x1FFF_FFFF)]);
    }
}
