//! Gob codec errors.

use thiserror::Error;

use super::types::TypeId;

/// Errors raised while encoding or decoding a gob stream.
#[derive(Debug, Error)]
pub enum GobError {
    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream ended in the middle of a message.
    #[error("unexpected end of gob stream")]
    UnexpectedEof,

    /// A message announced a length above the configured bound.
    #[error("gob message of {size} bytes exceeds the {limit} byte limit")]
    MessageTooLarge {
        /// Announced length.
        size: u64,
        /// Configured bound.
        limit: usize,
    },

    /// Bytes that do not form valid gob data.
    #[error("corrupt gob data: {message}")]
    Corrupt {
        /// What was wrong.
        message: String,
    },

    /// A value referenced a type that was never described.
    #[error("unknown gob type id {0}")]
    UnknownType(TypeId),

    /// A value did not have the shape its type requires.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// Expected shape.
        expected: String,
        /// Shape actually found.
        found: String,
    },

    /// Valid gob data this codec does not handle.
    #[error("unsupported gob feature: {message}")]
    Unsupported {
        /// Which feature.
        message: String,
    },
}

impl GobError {
    /// Create a corrupt-data error.
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt {
            message: message.into(),
        }
    }

    /// Create a type mismatch error.
    pub fn mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Create a type mismatch error naming the offending struct field.
    pub fn field_mismatch(field: &str, expected: &str, found: &str) -> Self {
        Self::TypeMismatch {
            expected: format!("{expected} for field {field}"),
            found: found.to_string(),
        }
    }

    /// Create an unsupported-feature error.
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }

    /// Returns `true` if the error came from the connection, not the data.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Io(_) | Self::UnexpectedEof)
    }
}

/// Result type for gob operations.
pub type GobResult<T> = Result<T, GobError>;
