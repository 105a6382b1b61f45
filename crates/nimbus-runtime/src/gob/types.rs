//! Gob type identifiers and type descriptors.
//!
//! Every value on a gob stream is tagged with a type id. Ids below
//! [`FIRST_USER_ID`] are predefined by the format; user types are described
//! once per stream by a [`WireType`] sent ahead of the first value using
//! them. A peer is free to pick any id for its own types, so decoding never
//! relies on the concrete numbers, only on the descriptors.

use std::collections::HashMap;

/// A gob type identifier.
pub type TypeId = i64;

/// `bool`
pub const BOOL: TypeId = 1;
/// Signed integer of any width.
pub const INT: TypeId = 2;
/// Unsigned integer of any width.
pub const UINT: TypeId = 3;
/// Floating point number of any width.
pub const FLOAT: TypeId = 4;
/// `[]byte`
pub const BYTES: TypeId = 5;
/// `string`
pub const STRING: TypeId = 6;
/// Complex number.
pub const COMPLEX: TypeId = 7;
/// Interface value.
pub const INTERFACE: TypeId = 8;

/// The descriptor type itself.
pub const WIRE_TYPE: TypeId = 16;
const ARRAY_TYPE: TypeId = 17;
const COMMON_TYPE: TypeId = 18;
const SLICE_TYPE: TypeId = 19;
const STRUCT_TYPE: TypeId = 20;
const FIELD_TYPE: TypeId = 21;
const FIELD_TYPE_SLICE: TypeId = 22;
const MAP_TYPE: TypeId = 23;
// Never sent: only referenced from the predefined descriptor of WIRE_TYPE.
const GOB_ENCODER_TYPE: TypeId = 24;

/// First id available to user-defined types.
pub const FIRST_USER_ID: TypeId = 65;

/// Field of a struct descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldType {
    /// Field name, as declared by the peer.
    pub name: String,
    /// Type of the field.
    pub id: TypeId,
}

impl FieldType {
    /// Creates a field descriptor.
    pub fn new(name: impl Into<String>, id: TypeId) -> Self {
        Self {
            name: name.into(),
            id,
        }
    }
}

/// Shape of a described type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireKind {
    /// Fixed-length array.
    Array {
        /// Element type.
        elem: TypeId,
        /// Number of elements.
        len: i64,
    },
    /// Variable-length sequence.
    Slice {
        /// Element type.
        elem: TypeId,
    },
    /// Struct with ordered fields.
    Struct {
        /// Fields in declaration order; the index is the wire field number.
        fields: Vec<FieldType>,
    },
    /// Key/value map.
    Map {
        /// Key type.
        key: TypeId,
        /// Value type.
        elem: TypeId,
    },
    /// Type that marshals itself to opaque bytes.
    Opaque(OpaqueKind),
}

/// Which self-marshalling interface produced an opaque type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpaqueKind {
    /// `GobEncoder`
    GobEncoder,
    /// `BinaryMarshaler`
    BinaryMarshaler,
    /// `TextMarshaler`
    TextMarshaler,
}

impl OpaqueKind {
    /// Name of the descriptor field that carries this kind.
    pub(crate) const fn field_name(self) -> &'static str {
        match self {
            Self::GobEncoder => "GobEncoderT",
            Self::BinaryMarshaler => "BinaryMarshalerT",
            Self::TextMarshaler => "TextMarshalerT",
        }
    }
}

/// Descriptor of a user type, as carried by type-definition messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireType {
    /// Type name, informational only.
    pub name: String,
    /// Id the sender assigned to the type.
    pub id: TypeId,
    /// Shape of the type.
    pub kind: WireKind,
}

impl WireType {
    /// Describes a struct.
    pub fn structure(name: impl Into<String>, id: TypeId, fields: Vec<FieldType>) -> Self {
        Self {
            name: name.into(),
            id,
            kind: WireKind::Struct { fields },
        }
    }

    /// Describes a slice.
    pub fn slice(name: impl Into<String>, id: TypeId, elem: TypeId) -> Self {
        Self {
            name: name.into(),
            id,
            kind: WireKind::Slice { elem },
        }
    }

    /// Describes a map.
    pub fn map(name: impl Into<String>, id: TypeId, key: TypeId, elem: TypeId) -> Self {
        Self {
            name: name.into(),
            id,
            kind: WireKind::Map { key, elem },
        }
    }

    /// Returns `true` for struct types.
    pub const fn is_struct(&self) -> bool {
        matches!(self.kind, WireKind::Struct { .. })
    }

    /// Ids of the types this type refers to directly.
    pub fn children(&self) -> Vec<TypeId> {
        match &self.kind {
            WireKind::Array { elem, .. } | WireKind::Slice { elem } => vec![*elem],
            WireKind::Struct { fields } => fields.iter().map(|field| field.id).collect(),
            WireKind::Map { key, elem } => vec![*key, *elem],
            WireKind::Opaque(_) => Vec::new(),
        }
    }
}

/// Returns `true` for ids of primitive types that need no descriptor.
pub const fn is_primitive(id: TypeId) -> bool {
    matches!(
        id,
        BOOL | INT | UINT | FLOAT | BYTES | STRING | COMPLEX | INTERFACE
    )
}

/// Known descriptors, keyed by id.
///
/// A fresh table already holds the descriptors of the format's own
/// bootstrap types, so type-definition messages decode like any other value.
#[derive(Debug, Clone)]
pub struct TypeTable {
    types: HashMap<TypeId, WireType>,
}

impl Default for TypeTable {
    fn default() -> Self {
        let common = || FieldType::new("CommonType", COMMON_TYPE);
        let predefined = [
            WireType::structure(
                "wireType",
                WIRE_TYPE,
                vec![
                    FieldType::new("ArrayT", ARRAY_TYPE),
                    FieldType::new("SliceT", SLICE_TYPE),
                    FieldType::new("StructT", STRUCT_TYPE),
                    FieldType::new("MapT", MAP_TYPE),
                    FieldType::new("GobEncoderT", GOB_ENCODER_TYPE),
                    FieldType::new("BinaryMarshalerT", GOB_ENCODER_TYPE),
                    FieldType::new("TextMarshalerT", GOB_ENCODER_TYPE),
                ],
            ),
            WireType::structure(
                "arrayType",
                ARRAY_TYPE,
                vec![common(), FieldType::new("Elem", INT), FieldType::new("Len", INT)],
            ),
            WireType::structure(
                "CommonType",
                COMMON_TYPE,
                vec![FieldType::new("Name", STRING), FieldType::new("Id", INT)],
            ),
            WireType::structure(
                "sliceType",
                SLICE_TYPE,
                vec![common(), FieldType::new("Elem", INT)],
            ),
            WireType::structure(
                "structType",
                STRUCT_TYPE,
                vec![common(), FieldType::new("Field", FIELD_TYPE_SLICE)],
            ),
            WireType::structure(
                "fieldType",
                FIELD_TYPE,
                vec![FieldType::new("Name", STRING), FieldType::new("Id", INT)],
            ),
            WireType::slice("[]gob.fieldType", FIELD_TYPE_SLICE, FIELD_TYPE),
            WireType::structure(
                "mapType",
                MAP_TYPE,
                vec![common(), FieldType::new("Key", INT), FieldType::new("Elem", INT)],
            ),
            WireType::structure("gobEncoderType", GOB_ENCODER_TYPE, vec![common()]),
        ];

        Self {
            types: predefined.into_iter().map(|wire| (wire.id, wire)).collect(),
        }
    }
}

impl TypeTable {
    /// Creates a table holding only the predefined descriptors.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a descriptor under `id`, replacing any earlier one.
    pub fn insert(&mut self, id: TypeId, wire: WireType) {
        self.types.insert(id, wire);
    }

    /// Looks a descriptor up.
    pub fn get(&self, id: TypeId) -> Option<&WireType> {
        self.types.get(&id)
    }

    /// Returns `true` if values of `id` are framed as structs.
    pub fn is_struct(&self, id: TypeId) -> bool {
        self.get(id).is_some_and(WireType::is_struct)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predefined_descriptors() {
        let table = TypeTable::new();
        assert!(table.is_struct(WIRE_TYPE));
        assert!(!table.is_struct(STRING));
        assert!(table.get(FIRST_USER_ID).is_none());
        assert!(is_primitive(BYTES));
        assert!(!is_primitive(WIRE_TYPE));
    }

    #[test]
    fn test_children() {
        let wire = WireType::map("map[string]string", 70, STRING, STRING);
        assert_eq!(wire.children(), vec![STRING, STRING]);
    }
}
