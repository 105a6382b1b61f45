//! Error types for the API gateway.

use nimbus_core::{ErrorResponse, HttpResponse};
use nimbus_runtime::RuntimeError;
use thiserror::Error;

/// Errors raised while authorizing or proxying an API request.
#[derive(Debug, Error)]
pub enum ApiGatewayError {
    /// The function could not be invoked, or reported a failure.
    #[error(transparent)]
    Invocation(#[from] RuntimeError),

    /// The function replied with something that is not the expected shape.
    #[error("invalid response from {function}: {message}")]
    InvalidResponse {
        /// Function resource name.
        function: String,
        /// What was wrong with it.
        message: String,
    },

    /// A route or authorizer definition is unusable.
    #[error("configuration error: {message}")]
    Config {
        /// Error message.
        message: String,
    },

    /// A payload could not be serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ApiGatewayError {
    /// Create an invalid response error.
    pub fn invalid_response(function: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            function: function.into(),
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
            Self::InvalidResponse { .. } | Self::Config { .. } | Self::Json(_) => 500,
        }
    }

    /// Get the error category for logs.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Invocation(err) => err.category(),
            Self::InvalidResponse { .. } => "invalid_response",
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

/// Result type for API gateway operations.
pub type ApiGatewayResult<T> = Result<T, ApiGatewayError>;
