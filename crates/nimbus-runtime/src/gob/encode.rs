//! Schema-driven gob encoder.
//!
//! The encoder knows the descriptors of the types it may send. Before the
//! first value of a type it emits the type-definition messages for that type
//! and every type it reaches that the peer has not seen yet, outer type
//! first, the way Go's encoder orders them.

use std::collections::HashSet;

use super::error::{GobError, GobResult};
use super::types::{
    self, is_primitive, TypeId, TypeTable, WireKind, WireType, BOOL, BYTES, COMPLEX, FLOAT, INT,
    INTERFACE, STRING, UINT,
};
use super::value::Value;

/// Appends the gob encoding of an unsigned integer.
///
/// Values below 128 take one byte. Larger values are sent as the negated
/// byte count followed by the big-endian bytes with leading zeros dropped.
pub fn write_uint(buf: &mut Vec<u8>, value: u64) {
    if value < 0x80 {
        buf.push(value as u8);
        return;
    }
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|byte| **byte == 0).count();
    let len = bytes.len() - skip;
    buf.push((len as u8).wrapping_neg());
    buf.extend_from_slice(&bytes[skip..]);
}

/// Appends the gob encoding of a signed integer.
///
/// The sign lives in the low bit; negative values are complemented first.
pub fn write_int(buf: &mut Vec<u8>, value: i64) {
    let folded = if value < 0 {
        (((!value) as u64) << 1) | 1
    } else {
        (value as u64) << 1
    };
    write_uint(buf, folded);
}

/// Appends the gob encoding of a float: its bits byte-reversed, as a uint.
pub fn write_float(buf: &mut Vec<u8>, value: f64) {
    write_uint(buf, value.to_bits().swap_bytes());
}

/// Appends a length-prefixed byte string.
pub fn write_bytes(buf: &mut Vec<u8>, value: &[u8]) {
    write_uint(buf, value.len() as u64);
    buf.extend_from_slice(value);
}

/// Encoder state for one outgoing stream.
#[derive(Debug, Default)]
pub struct Encoder {
    types: TypeTable,
    sent: HashSet<TypeId>,
}

impl Encoder {
    /// Creates an encoder that knows the given descriptors.
    pub fn new(schema: impl IntoIterator<Item = WireType>) -> Self {
        let mut encoder = Self::default();
        for wire in schema {
            encoder.types.insert(wire.id, wire);
        }
        encoder
    }

    /// Encodes a top-level value of type `id`.
    ///
    /// Returns the bytes to write: any pending type-definition messages
    /// followed by the value message.
    pub fn encode(&mut self, id: TypeId, value: &Value) -> GobResult<Vec<u8>> {
        let mut out = Vec::new();
        self.send_type(&mut out, id)?;

        let mut message = Vec::new();
        write_int(&mut message, id);
        if self.types.is_struct(id) {
            self.encode_struct(&mut message, id, value)?;
        } else {
            // Non-struct values are framed as a struct with a single field.
            write_uint(&mut message, 0);
            self.encode_value(&mut message, id, value)?;
        }
        write_message(&mut out, &message);
        Ok(out)
    }

    fn send_type(&mut self, out: &mut Vec<u8>, id: TypeId) -> GobResult<()> {
        if is_primitive(id) || id < types::FIRST_USER_ID || self.sent.contains(&id) {
            return Ok(());
        }
        let wire = self.types.get(id).cloned().ok_or(GobError::UnknownType(id))?;

        let mut message = Vec::new();
        write_int(&mut message, -id);
        self.encode_struct(&mut message, types::WIRE_TYPE, &Value::from(&wire))?;
        write_message(out, &message);
        self.sent.insert(id);

        for child in wire.children() {
            self.send_type(out, child)?;
        }
        Ok(())
    }

    fn encode_struct(&self, buf: &mut Vec<u8>, id: TypeId, value: &Value) -> GobResult<()> {
        let Some(WireType {
            kind: WireKind::Struct { fields },
            ..
        }) = self.types.get(id)
        else {
            return Err(GobError::UnknownType(id));
        };
        let Value::Struct(values) = value else {
            return Err(GobError::mismatch("struct", value.kind()));
        };

        let mut previous: i64 = -1;
        for (number, field) in (0_i64..).zip(fields) {
            let Some(field_value) = values.get(&field.name) else {
                continue;
            };
            if field_value.is_zero() {
                continue;
            }
            write_uint(buf, (number - previous) as u64);
            self.encode_value(buf, field.id, field_value)?;
            previous = number;
        }
        write_uint(buf, 0);
        Ok(())
    }

    fn encode_value(&self, buf: &mut Vec<u8>, id: TypeId, value: &Value) -> GobResult<()> {
        match (id, value) {
            (BOOL, Value::Bool(v)) => write_uint(buf, u64::from(*v)),
            (INT, Value::Int(v)) => write_int(buf, *v),
            (UINT, Value::Uint(v)) => write_uint(buf, *v),
            (FLOAT, Value::Float(v)) => write_float(buf, *v),
            (COMPLEX, Value::Complex(re, im)) => {
                write_float(buf, *re);
                write_float(buf, *im);
            }
            (BYTES, Value::Bytes(v)) => write_bytes(buf, v),
            (STRING, Value::String(v)) => write_bytes(buf, v.as_bytes()),
            (INTERFACE, Value::Interface(None)) => write_uint(buf, 0),
            (INTERFACE, Value::Interface(Some(_))) => {
                return Err(GobError::unsupported("encoding non-nil interface values"));
            }
            (id, value) if is_primitive(id) => {
                return Err(GobError::mismatch(primitive_name(id), value.kind()));
            }
            (id, value) => {
                let wire = self.types.get(id).ok_or(GobError::UnknownType(id))?;
                match (&wire.kind, value) {
                    (WireKind::Struct { .. }, _) => self.encode_struct(buf, id, value)?,
                    (WireKind::Slice { elem }, Value::List(items)) => {
                        write_uint(buf, items.len() as u64);
                        for item in items {
                            self.encode_value(buf, *elem, item)?;
                        }
                    }
                    (WireKind::Array { elem, len }, Value::List(items)) => {
                        if items.len() as i64 != *len {
                            return Err(GobError::mismatch(
                                format!("array of {len}"),
                                format!("list of {}", items.len()),
                            ));
                        }
                        write_uint(buf, items.len() as u64);
                        for item in items {
                            self.encode_value(buf, *elem, item)?;
                        }
                    }
                    (WireKind::Map { key, elem }, Value::Map(entries)) => {
                        write_uint(buf, entries.len() as u64);
                        for (k, v) in entries {
                            self.encode_value(buf, *key, k)?;
                            self.encode_value(buf, *elem, v)?;
                        }
                    }
                    (WireKind::Opaque(_), Value::Opaque(bytes)) => write_bytes(buf, bytes),
                    (kind, value) => {
                        return Err(GobError::mismatch(format!("{kind:?}"), value.kind()));
                    }
                }
            }
        }
        Ok(())
    }
}

fn write_message(out: &mut Vec<u8>, message: &[u8]) {
    write_uint(out, message.len() as u64);
    out.extend_from_slice(message);
}

pub(crate) const fn primitive_name(id: TypeId) -> &'static str {
    match id {
        BOOL => "bool",
        INT => "int",
        UINT => "uint",
        FLOAT => "float",
        BYTES => "bytes",
        STRING => "string",
        COMPLEX => "complex",
        INTERFACE => "interface",
        _ => "user type",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gob::types::FieldType;

    fn uint_bytes(value: u64) -> Vec<u8> {
        let mut buf = Vec::new();
        write_uint(&mut buf, value);
        buf
    }

    fn int_bytes(value: i64) -> Vec<u8> {
        let mut buf = Vec::new();
        write_int(&mut buf, value);
        buf
    }

    #[test]
    fn test_uint_encoding() {
        assert_eq!(uint_bytes(0), [0x00]);
        assert_eq!(uint_bytes(7), [0x07]);
        assert_eq!(uint_bytes(127), [0x7f]);
        assert_eq!(uint_bytes(128), [0xff, 0x80]);
        assert_eq!(uint_bytes(256), [0xfe, 0x01, 0x00]);
        assert_eq!(
            uint_bytes(u64::MAX),
            [0xf8, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]
        );
    }

    #[test]
    fn test_int_encoding() {
        assert_eq!(int_bytes(0), [0x00]);
        assert_eq!(int_bytes(-1), [0x01]);
        assert_eq!(int_bytes(1), [0x02]);
        assert_eq!(int_bytes(22), [0x2c]);
        assert_eq!(int_bytes(65), [0xff, 0x82]);
        assert_eq!(int_bytes(-65), [0xff, 0x81]);
    }

    #[test]
    fn test_float_encoding() {
        // 17.0 has bits 0x4031000000000000; reversed, the leading zeros drop.
        let mut buf = Vec::new();
        write_float(&mut buf, 17.0);
        assert_eq!(buf, [0xfe, 0x31, 0x40]);
    }

    /// The `Point{22, 33}` stream from the `encoding/gob` package docs.
    #[test]
    fn test_point_stream_matches_reference_bytes() {
        let point = WireType::structure(
            "Point",
            65,
            vec![FieldType::new("X", INT), FieldType::new("Y", INT)],
        );
        let mut encoder = Encoder::new([point]);
        let value = Value::structure([("X", Value::Int(22)), ("Y", Value::Int(33))]);

        let bytes = encoder.encode(65, &value).unwrap();
        let expected: Vec<u8> = vec![
            0x1f, 0xff, 0x81, 0x03, 0x01, 0x01, 0x05, b'P', b'o', b'i', b'n', b't', 0x01, 0xff,
            0x82, 0x00, 0x01, 0x02, 0x01, 0x01, b'X', 0x01, 0x04, 0x00, 0x01, 0x01, b'Y', 0x01,
            0x04, 0x00, 0x00, 0x00, // type definition
            0x07, 0xff, 0x82, 0x01, 0x2c, 0x01, 0x42, 0x00, // value
        ];
        assert_eq!(bytes, expected);

        // The descriptor goes out once per stream.
        let again = encoder.encode(65, &value).unwrap();
        assert_eq!(again, expected[32..]);
    }

    #[test]
    fn test_zero_fields_are_omitted() {
        let point = WireType::structure(
            "Point",
            65,
            vec![FieldType::new("X", INT), FieldType::new("Y", INT)],
        );
        let mut encoder = Encoder::new([point]);
        let bytes = encoder
            .encode(65, &Value::structure([("X", Value::Int(0)), ("Y", Value::Int(1))]))
            .unwrap();
        // length, id, delta 2 to field Y, 1<<1, end of struct
        assert_eq!(bytes[32..], [0x05, 0xff, 0x82, 0x02, 0x02, 0x00]);
    }

    #[test]
    fn test_non_struct_values_are_singletons() {
        let mut encoder = Encoder::default();
        let bytes = encoder
            .encode(STRING, &Value::String("hi".to_string()))
            .unwrap();
        assert_eq!(bytes, [0x05, 0x0c, 0x00, 0x02, b'h', b'i']);
    }

    #[test]
    fn test_type_mismatch() {
        let mut encoder = Encoder::default();
        let err = encoder.encode(STRING, &Value::Int(1)).unwrap_err();
        assert!(matches!(err, GobError::TypeMismatch { .. }));
    }
}
