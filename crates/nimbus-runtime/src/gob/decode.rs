//! Dynamic gob decoder.
//!
//! Learns the peer's type descriptors as they arrive and decodes values into
//! [`Value`] trees keyed by field name.

use super::error::{GobError, GobResult};
use super::types::{
    TypeId, TypeTable, WireKind, WireType, BOOL, BYTES, COMPLEX, FLOAT, INT, INTERFACE, STRING,
    UINT, WIRE_TYPE,
};
use super::value::{Fields, Value};

/// Nesting depth past which a value is rejected as corrupt.
const MAX_DEPTH: usize = 64;

/// Cursor over the bytes of a single message.
#[derive(Debug)]
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Wraps a message body.
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub const fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> GobResult<&'a [u8]> {
        if n > self.remaining() {
            return Err(GobError::UnexpectedEof);
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Reads an unsigned integer.
    pub fn read_uint(&mut self) -> GobResult<u64> {
        let first = self.take(1)?[0];
        if first < 0x80 {
            return Ok(u64::from(first));
        }
        let len = usize::from(first.wrapping_neg());
        if len > 8 {
            return Err(GobError::corrupt(format!("uint with {len} bytes")));
        }
        Ok(self
            .take(len)?
            .iter()
            .fold(0_u64, |acc, byte| (acc << 8) | u64::from(*byte)))
    }

    /// Reads a signed integer.
    pub fn read_int(&mut self) -> GobResult<i64> {
        let folded = self.read_uint()?;
        let magnitude = (folded >> 1) as i64;
        Ok(if folded & 1 == 1 { !magnitude } else { magnitude })
    }

    /// Reads a float.
    pub fn read_float(&mut self) -> GobResult<f64> {
        Ok(f64::from_bits(self.read_uint()?.swap_bytes()))
    }

    /// Reads a length-prefixed byte string.
    pub fn read_bytes(&mut self) -> GobResult<&'a [u8]> {
        let len = self.read_len()?;
        self.take(len)
    }

    fn read_string(&mut self) -> GobResult<String> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes.to_vec()).map_err(|_| GobError::corrupt("string is not UTF-8"))
    }

    /// Reads a count and checks it against the bytes left, since every
    /// element takes at least one byte.
    fn read_len(&mut self) -> GobResult<usize> {
        let len = self.read_uint()?;
        usize::try_from(len)
            .ok()
            .filter(|len| *len <= self.remaining())
            .ok_or(GobError::UnexpectedEof)
    }
}

/// Decoder state for one incoming stream.
#[derive(Debug, Default)]
pub struct Decoder {
    types: TypeTable,
}

impl Decoder {
    /// Creates a decoder that knows only the predefined types.
    pub fn new() -> Self {
        Self::default()
    }

    /// Descriptor the peer sent for `id`, if any.
    pub fn wire_type(&self, id: TypeId) -> Option<&WireType> {
        self.types.get(id)
    }

    /// Decodes one message.
    ///
    /// Type definitions are recorded and yield `None`; values yield their
    /// type id and decoded tree.
    pub fn decode_message(&mut self, message: &[u8]) -> GobResult<Option<(TypeId, Value)>> {
        let mut reader = Reader::new(message);
        let id = reader.read_int()?;

        if id < 0 {
            let descriptor = self.decode_struct(&mut reader, WIRE_TYPE, 0)?;
            let wire = WireType::try_from(descriptor)?;
            tracing::trace!(id = -id, name = %wire.name, "received gob type definition");
            self.types.insert(-id, wire);
            self.expect_end(&reader)?;
            return Ok(None);
        }
        if id == 0 {
            return Err(GobError::corrupt("value with type id 0"));
        }

        let value = if self.types.is_struct(id) {
            self.decode_struct(&mut reader, id, 0)?
        } else {
            if reader.read_uint()? != 0 {
                return Err(GobError::corrupt("non-struct value without singleton framing"));
            }
            self.decode_value(&mut reader, id, 0)?
        };
        self.expect_end(&reader)?;
        Ok(Some((id, value)))
    }

    /// Decodes every message of a complete stream held in memory.
    pub fn decode_stream(&mut self, mut stream: &[u8]) -> GobResult<Vec<(TypeId, Value)>> {
        let mut values = Vec::new();
        while !stream.is_empty() {
            let mut reader = Reader::new(stream);
            let len = reader.read_len()?;
            let start = reader.pos;
            let message = &stream[start..start + len];
            if let Some(value) = self.decode_message(message)? {
                values.push(value);
            }
            stream = &stream[start + len..];
        }
        Ok(values)
    }

    fn expect_end(&self, reader: &Reader<'_>) -> GobResult<()> {
        if reader.remaining() == 0 {
            Ok(())
        } else {
            Err(GobError::corrupt(format!(
                "{} trailing bytes after value",
                reader.remaining()
            )))
        }
    }

    fn decode_struct(&self, reader: &mut Reader<'_>, id: TypeId, depth: usize) -> GobResult<Value> {
        let Some(WireType {
            kind: WireKind::Struct { fields },
            ..
        }) = self.types.get(id)
        else {
            return Err(GobError::UnknownType(id));
        };

        let mut values = Fields::new();
        let mut number: i64 = -1;
        loop {
            let delta = reader.read_uint()?;
            if delta == 0 {
                break;
            }
            number = i64::try_from(delta)
                .ok()
                .and_then(|delta| number.checked_add(delta))
                .ok_or_else(|| GobError::corrupt("field number overflow"))?;
            let field = usize::try_from(number)
                .ok()
                .and_then(|index| fields.get(index))
                .ok_or_else(|| GobError::corrupt(format!("field {number} out of range")))?;
            let value = self.decode_value(reader, field.id, depth + 1)?;
            values.insert(field.name.clone(), value);
        }
        Ok(Value::Struct(values))
    }

    fn decode_value(&self, reader: &mut Reader<'_>, id: TypeId, depth: usize) -> GobResult<Value> {
        if depth > MAX_DEPTH {
            return Err(GobError::corrupt("value nested too deeply"));
        }
        Ok(match id {
            BOOL => Value::Bool(reader.read_uint()? != 0),
            INT => Value::Int(reader.read_int()?),
            UINT => Value::Uint(reader.read_uint()?),
            FLOAT => Value::Float(reader.read_float()?),
            COMPLEX => Value::Complex(reader.read_float()?, reader.read_float()?),
            BYTES => Value::Bytes(reader.read_bytes()?.to_vec()),
            STRING => Value::String(reader.read_string()?),
            INTERFACE => self.decode_interface(reader, depth)?,
            _ => {
                let wire = self.types.get(id).ok_or(GobError::UnknownType(id))?;
                match &wire.kind {
                    WireKind::Struct { .. } => self.decode_struct(reader, id, depth)?,
                    WireKind::Slice { elem } => {
                        let len = reader.read_len()?;
                        Value::List(self.decode_items(reader, *elem, len, depth)?)
                    }
                    WireKind::Array { elem, len } => {
                        let count = reader.read_len()?;
                        if count as i64 != *len {
                            return Err(GobError::corrupt(format!(
                                "array of {len} sent with {count} elements"
                            )));
                        }
                        Value::List(self.decode_items(reader, *elem, count, depth)?)
                    }
                    WireKind::Map { key, elem } => {
                        let len = reader.read_len()?;
                        let mut entries = Vec::with_capacity(len);
                        for _ in 0..len {
                            let k = self.decode_value(reader, *key, depth + 1)?;
                            let v = self.decode_value(reader, *elem, depth + 1)?;
                            entries.push((k, v));
                        }
                        Value::Map(entries)
                    }
                    WireKind::Opaque(_) => Value::Opaque(reader.read_bytes()?.to_vec()),
                }
            }
        })
    }

    fn decode_items(
        &self,
        reader: &mut Reader<'_>,
        elem: TypeId,
        len: usize,
        depth: usize,
    ) -> GobResult<Vec<Value>> {
        let mut items = Vec::with_capacity(len);
        for _ in 0..len {
            items.push(self.decode_value(reader, elem, depth + 1)?);
        }
        Ok(items)
    }

    /// Interface values carry the concrete type's registered name, its id,
    /// a byte count and the value framed like a top-level value.
    fn decode_interface(&self, reader: &mut Reader<'_>, depth: usize) -> GobResult<Value> {
        let name = reader.read_string()?;
        if name.is_empty() {
            return Ok(Value::Interface(None));
        }
        let id = reader.read_int()?;
        if id < 0 {
            return Err(GobError::unsupported(
                "type definitions nested inside interface values",
            ));
        }
        let len = reader.read_len()?;
        let mut inner = Reader::new(reader.take(len)?);
        let value = if self.types.is_struct(id) {
            self.decode_struct(&mut inner, id, depth + 1)?
        } else {
            if inner.read_uint()? != 0 {
                return Err(GobError::corrupt("interface value without singleton framing"));
            }
            self.decode_value(&mut inner, id, depth + 1)?
        };
        Ok(Value::Interface(Some((name, Box::new(value)))))
    }
}
