//! Error types for request extraction.

use thiserror::Error;

/// Where a piece of request data was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionSource {
    /// Request header, including `Cookie`.
    Header,
    /// URL query string.
    Query,
    /// URL-encoded form body.
    Form,
    /// JSON body.
    Json,
}

impl std::fmt::Display for ExtractionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Header => write!(f, "header"),
            Self::Query => write!(f, "query"),
            Self::Form => write!(f, "form"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Errors raised while reading data out of a buffered request.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// A required value is absent.
    #[error("missing {location} value: {name}")]
    Missing {
        /// Where the value was expected.
        location: ExtractionSource,
        /// What was expected.
        name: String,
    },

    /// The value is present but could not be parsed.
    #[error("invalid {location} data: {message}")]
    Invalid {
        /// Where the value was read from.
        location: ExtractionSource,
        /// Parser message.
        message: String,
    },
}

impl ExtractionError {
    /// Create a missing-value error.
    pub fn missing(location: ExtractionSource, name: impl Into<String>) -> Self {
        Self::Missing {
            location,
            name: name.into(),
        }
    }

    /// Create an invalid-data error.
    pub fn invalid(location: ExtractionSource, message: impl Into<String>) -> Self {
        Self::Invalid {
            location,
            message: message.into(),
        }
    }

    /// HTTP status code for this error; always a client error.
    pub fn status_code(&self) -> u16 {
        400
    }
}

/// Result type for extraction.
pub type ExtractionResult<T> = Result<T, ExtractionError>;
