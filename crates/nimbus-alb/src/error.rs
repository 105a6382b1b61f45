//! Error types for the load balancer.

use nimbus_core::{ErrorResponse, ExtractionError, HttpResponse};
use nimbus_runtime::RuntimeError;
use thiserror::Error;

/// Load balancer and OIDC errors.
#[derive(Debug, Error)]
pub enum AlbError {
    /// A target function could not be invoked, or reported a failure.
    #[error(transparent)]
    Invocation(#[from] RuntimeError),

    /// A target function replied with something that is not a target
    /// group response.
    #[error("invalid response from {function}: {message}")]
    InvalidResponse {
        /// Function resource name.
        function: String,
        /// What was wrong with it.
        message: String,
    },

    /// The request was malformed.
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    /// Signing or key encoding failed.
    #[error("signing error: {message}")]
    Signing {
        /// Error message.
        message: String,
    },

    /// A rule or provider setting is unusable.
    #[error("configuration error: {message}")]
    Config {
        /// Error message.
        message: String,
    },

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AlbError {
    /// Create an invalid response error.
    pub fn invalid_response(function: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            function: function.into(),
            message: message.into(),
        }
    }

    /// Create a signing error.
    pub fn signing(message: impl Into<String>) -> Self {
        Self::Signing {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Invocation(err) => err.status_code(),
            Self::Extraction(err) => err.status_code(),
            Self::InvalidResponse { .. }
            | Self::Signing { .. }
            | Self::Config { .. }
            | Self::Json(_) => 500,
        }
    }

    /// Get the error category for logs.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Invocation(err) => err.category(),
            Self::InvalidResponse { .. } => "invalid_response",
            Self::Extraction(_) => "extraction",
            Self::Signing { .. } => "signing",
            Self::Config { .. } => "config",
            Self::Json(_) => "json",
        }
    }

    /// Renders the error as a JSON response.
    pub fn into_response(self) -> HttpResponse {
        let status = self.status_code();
        ErrorResponse::new(self.category(), self.to_string()).into_response(status)
    }
}

/// Result type for load balancer operations.
pub type AlbResult<T> = Result<T, AlbError>;
