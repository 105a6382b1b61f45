//! The `encoding/gob` stream format.
//!
//! Go's `net/rpc` package frames every call as gob messages, and function
//! processes built with the standard Go runtime library speak nothing else.
//! This module implements enough of the format to talk to them in both
//! directions:
//!
//! - primitive encodings and length-prefixed messages
//! - type-definition messages for struct, slice, array, map and opaque types
//! - a schema-driven [`Encoder`] and a dynamic [`Decoder`] producing
//!   [`Value`] trees keyed by field name
//! - [`GobStream`], which runs both over an async transport
//!
//! # Example
//!
//! ```rust
//! use nimbus_runtime::gob::{Decoder, Encoder, FieldType, Value, WireType, INT};
//!
//! let point = WireType::structure("Point", 65, vec![
//!     FieldType::new("X", INT),
//!     FieldType::new("Y", INT),
//! ]);
//! let mut encoder = Encoder::new([point]);
//! let bytes = encoder
//!     .encode(65, &Value::structure([("X", Value::Int(22)), ("Y", Value::Int(33))]))
//!     .unwrap();
//!
//! let values = Decoder::new().decode_stream(&bytes).unwrap();
//! assert_eq!(values[0].1, Value::structure([("X", Value::Int(22)), ("Y", Value::Int(33))]));
//! ```

mod decode;
mod encode;
mod error;
mod stream;
mod types;
mod value;

pub use decode::{Decoder, Reader};
pub use encode::{write_bytes, write_float, write_int, write_uint, Encoder};
pub use error::{GobError, GobResult};
pub use stream::{read_message, GobMessage, GobStream, MAX_MESSAGE_SIZE};
pub use types::{
    is_primitive, FieldType, OpaqueKind, TypeId, TypeTable, WireKind, WireType, BOOL, BYTES,
    COMPLEX, FIRST_USER_ID, FLOAT, INT, INTERFACE, STRING, UINT, WIRE_TYPE,
};
pub use value::{Fields, FieldsExt, Value};
