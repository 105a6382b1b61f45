//! Dynamic gob values.
//!
//! The decoder produces a [`Value`] tree and the encoder consumes one.
//! Struct values are keyed by field name, which is how gob matches fields
//! between peers.

use indexmap::IndexMap;

use super::error::{GobError, GobResult};
use super::types::{FieldType, OpaqueKind, TypeId, WireKind, WireType};

/// Struct fields by name, in wire order.
pub type Fields = IndexMap<String, Value>;

/// A decoded (or to-be-encoded) gob value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// `bool`
    Bool(bool),
    /// Any signed integer.
    Int(i64),
    /// Any unsigned integer.
    Uint(u64),
    /// Any float.
    Float(f64),
    /// Complex number as (real, imaginary).
    Complex(f64, f64),
    /// `[]byte`
    Bytes(Vec<u8>),
    /// `string`
    String(String),
    /// Slice or array elements.
    List(Vec<Value>),
    /// Map entries in wire order.
    Map(Vec<(Value, Value)>),
    /// Struct fields that were present on the wire.
    Struct(Fields),
    /// Interface value: concrete type name and value, or `None` for nil.
    Interface(Option<(String, Box<Value>)>),
    /// Bytes produced by a self-marshalling type.
    Opaque(Vec<u8>),
}

impl Value {
    /// Builds a struct value from `(name, value)` pairs.
    pub fn structure<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = (S, Value)>,
        S: Into<String>,
    {
        Self::Struct(
            fields
                .into_iter()
                .map(|(name, value)| (name.into(), value))
                .collect(),
        )
    }

    /// Returns `true` for values gob omits from a struct.
    ///
    /// Nested structs are never zero: a struct value is always sent.
    pub fn is_zero(&self) -> bool {
        match self {
            Self::Bool(value) => !value,
            Self::Int(value) => *value == 0,
            Self::Uint(value) => *value == 0,
            Self::Float(value) => *value == 0.0,
            Self::Complex(re, im) => *re == 0.0 && *im == 0.0,
            Self::Bytes(value) | Self::Opaque(value) => value.is_empty(),
            Self::String(value) => value.is_empty(),
            Self::List(values) => values.is_empty(),
            Self::Map(entries) => entries.is_empty(),
            Self::Interface(value) => value.is_none(),
            Self::Struct(_) => false,
        }
    }

    /// Short name of the variant, for error messages.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Uint(_) => "uint",
            Self::Float(_) => "float",
            Self::Complex(..) => "complex",
            Self::Bytes(_) => "bytes",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Struct(_) => "struct",
            Self::Interface(_) => "interface",
            Self::Opaque(_) => "opaque",
        }
    }

    /// Struct fields, or a type mismatch.
    pub fn into_fields(self) -> GobResult<Fields> {
        match self {
            Self::Struct(fields) => Ok(fields),
            other => Err(GobError::mismatch("struct", other.kind())),
        }
    }
}

/// Typed access to the fields of a decoded struct.
///
/// Absent fields read as the zero value of the requested type, mirroring
/// gob's omission of zero fields.
pub trait FieldsExt {
    /// String field.
    fn take_string(&mut self, name: &str) -> GobResult<String>;
    /// Byte-slice field.
    fn take_bytes(&mut self, name: &str) -> GobResult<Vec<u8>>;
    /// Signed integer field.
    fn take_int(&mut self, name: &str) -> GobResult<i64>;
    /// Unsigned integer field.
    fn take_uint(&mut self, name: &str) -> GobResult<u64>;
    /// Boolean field.
    fn take_bool(&mut self, name: &str) -> GobResult<bool>;
    /// Any field, `None` when absent.
    fn take_value(&mut self, name: &str) -> Option<Value>;
}

impl FieldsExt for Fields {
    fn take_string(&mut self, name: &str) -> GobResult<String> {
        match self.shift_remove(name) {
            None => Ok(String::new()),
            Some(Value::String(value)) => Ok(value),
            Some(other) => Err(GobError::field_mismatch(name, "string", other.kind())),
        }
    }

    fn take_bytes(&mut self, name: &str) -> GobResult<Vec<u8>> {
        match self.shift_remove(name) {
            None => Ok(Vec::new()),
            Some(Value::Bytes(value)) => Ok(value),
            Some(other) => Err(GobError::field_mismatch(name, "bytes", other.kind())),
        }
    }

    fn take_int(&mut self, name: &str) -> GobResult<i64> {
        match self.shift_remove(name) {
            None => Ok(0),
            Some(Value::Int(value)) => Ok(value),
            Some(other) => Err(GobError::field_mismatch(name, "int", other.kind())),
        }
    }

    fn take_uint(&mut self, name: &str) -> GobResult<u64> {
        match self.shift_remove(name) {
            None => Ok(0),
            Some(Value::Uint(value)) => Ok(value),
            Some(other) => Err(GobError::field_mismatch(name, "uint", other.kind())),
        }
    }

    fn take_bool(&mut self, name: &str) -> GobResult<bool> {
        match self.shift_remove(name) {
            None => Ok(false),
            Some(Value::Bool(value)) => Ok(value),
            Some(other) => Err(GobError::field_mismatch(name, "bool", other.kind())),
        }
    }

    fn take_value(&mut self, name: &str) -> Option<Value> {
        self.shift_remove(name)
    }
}

// ============================================================================
// Descriptor <-> value conversion
// ============================================================================

fn common_type(name: &str, id: TypeId) -> Value {
    let mut fields = Fields::new();
    if !name.is_empty() {
        fields.insert("Name".to_string(), Value::String(name.to_string()));
    }
    if id != 0 {
        fields.insert("Id".to_string(), Value::Int(id));
    }
    Value::Struct(fields)
}

impl From<&WireType> for Value {
    fn from(wire: &WireType) -> Self {
        let common = common_type(&wire.name, wire.id);
        let (slot, body) = match &wire.kind {
            WireKind::Array { elem, len } => (
                "ArrayT",
                Value::structure([
                    ("CommonType", common),
                    ("Elem", Value::Int(*elem)),
                    ("Len", Value::Int(*len)),
                ]),
            ),
            WireKind::Slice { elem } => (
                "SliceT",
                Value::structure([("CommonType", common), ("Elem", Value::Int(*elem))]),
            ),
            WireKind::Struct { fields } => {
                let fields = fields
                    .iter()
                    .map(|field| {
                        Value::structure([
                            ("Name", Value::String(field.name.clone())),
                            ("Id", Value::Int(field.id)),
                        ])
                    })
                    .collect();
                (
                    "StructT",
                    Value::structure([("CommonType", common), ("Field", Value::List(fields))]),
                )
            }
            WireKind::Map { key, elem } => (
                "MapT",
                Value::structure([
                    ("CommonType", common),
                    ("Key", Value::Int(*key)),
                    ("Elem", Value::Int(*elem)),
                ]),
            ),
            WireKind::Opaque(kind) => {
                (kind.field_name(), Value::structure([("CommonType", common)]))
            }
        };
        Value::structure([(slot, body)])
    }
}

impl TryFrom<Value> for WireType {
    type Error = GobError;

    fn try_from(value: Value) -> GobResult<Self> {
        let mut fields = value.into_fields()?;
        let (slot, body) = fields
            .pop()
            .ok_or_else(|| GobError::corrupt("empty type descriptor"))?;
        if !fields.is_empty() {
            return Err(GobError::corrupt("type descriptor with several shapes"));
        }

        let mut body = body.into_fields()?;
        let mut common = match body.take_value("CommonType") {
            Some(common) => common.into_fields()?,
            None => Fields::new(),
        };
        let name = common.take_string("Name")?;
        let id = common.take_int("Id")?;

        let kind = match slot.as_str() {
            "ArrayT" => WireKind::Array {
                elem: body.take_int("Elem")?,
                len: body.take_int("Len")?,
            },
            "SliceT" => WireKind::Slice {
                elem: body.take_int("Elem")?,
            },
            "StructT" => {
                let list = match body.take_value("Field") {
                    None => Vec::new(),
                    Some(Value::List(list)) => list,
                    Some(other) => {
                        return Err(GobError::field_mismatch("Field", "list", other.kind()))
                    }
                };
                let fields = list
                    .into_iter()
                    .map(|field| {
                        let mut field = field.into_fields()?;
                        Ok(FieldType::new(
                            field.take_string("Name")?,
                            field.take_int("Id")?,
                        ))
                    })
                    .collect::<GobResult<Vec<_>>>()?;
                WireKind::Struct { fields }
            }
            "MapT" => WireKind::Map {
                key: body.take_int("Key")?,
                elem: body.take_int("Elem")?,
            },
            "GobEncoderT" => WireKind::Opaque(OpaqueKind::GobEncoder),
            "BinaryMarshalerT" => WireKind::Opaque(OpaqueKind::BinaryMarshaler),
            "TextMarshalerT" => WireKind::Opaque(OpaqueKind::TextMarshaler),
            other => return Err(GobError::corrupt(format!("unknown descriptor shape {other}"))),
        };

        Ok(Self { name, id, kind })
    }
}
