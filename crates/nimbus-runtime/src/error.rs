//! Error types for the function runtime.

use thiserror::Error;

use crate::gob::GobError;

/// Errors raised while registering, invoking or stopping functions.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The function could not be deployed: bad archive, path traversal or
    /// spawn failure. The function never becomes invocable.
    #[error("deployment of {function} failed: {message}")]
    Deployment {
        /// Function name.
        function: String,
        /// What went wrong.
        message: String,
    },

    /// A function with the same identifier is already registered.
    #[error("function {name} already exists")]
    Duplicate {
        /// Function name.
        name: String,
    },

    /// No function is registered under the identifier.
    #[error("no function with arn {arn}")]
    NotFound {
        /// Requested identifier.
        arn: String,
    },

    /// The function process could not be reached, or the connection broke
    /// before a reply arrived.
    #[error("transport error: {message}")]
    Transport {
        /// What went wrong.
        message: String,
    },

    /// The function ran and reported a failure.
    #[error("function error ({error_type}): {message}")]
    Function {
        /// Error type reported by the function.
        error_type: String,
        /// Error message reported by the function.
        message: String,
    },

    /// The reply was not a valid protocol message.
    #[error("protocol error: {message}")]
    Protocol {
        /// What went wrong.
        message: String,
    },

    /// A function process could not be stopped.
    #[error("failed to stop {function}: {message}")]
    Shutdown {
        /// Function name.
        function: String,
        /// What went wrong.
        message: String,
    },

    /// Payload could not be encoded as JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RuntimeError {
    /// Create a deployment error.
    pub fn deployment(function: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Deployment {
            function: function.into(),
            message: message.into(),
        }
    }

    /// Create a duplicate registration error.
    pub fn duplicate(name: impl Into<String>) -> Self {
        Self::Duplicate { name: name.into() }
    }

    /// Create a not-found error.
    pub fn not_found(arn: impl Into<String>) -> Self {
        Self::NotFound { arn: arn.into() }
    }

    /// Create a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a function error.
    pub fn function(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Function {
            error_type: error_type.into(),
            message: message.into(),
        }
    }

    /// Create a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a shutdown error.
    pub fn shutdown(function: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Shutdown {
            function: function.into(),
            message: message.into(),
        }
    }

    /// HTTP status code a gateway should answer with.
    #[allow(clippy::match_same_arms)]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Function { .. } => 502,
            Self::Deployment { .. } => 500,
            Self::Duplicate { .. } => 409,
            Self::NotFound { .. } => 500,
            Self::Transport { .. } => 500,
            Self::Protocol { .. } => 500,
            Self::Shutdown { .. } => 500,
            Self::Json(_) => 500,
        }
    }

    /// Returns `true` if the function ran and reported a failure.
    pub fn is_function_error(&self) -> bool {
        matches!(self, Self::Function { .. })
    }

    /// Get the error category for logging.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Deployment { .. } => "deployment",
            Self::Duplicate { .. } => "duplicate",
            Self::NotFound { .. } => "not_found",
            Self::Transport { .. } => "transport",
            Self::Function { .. } => "function",
            Self::Protocol { .. } => "protocol",
            Self::Shutdown { .. } => "shutdown",
            Self::Json(_) => "json",
        }
    }
}

impl From<GobError> for RuntimeError {
    fn from(err: GobError) -> Self {
        if err.is_transport() {
            Self::transport(err.to_string())
        } else {
            Self::protocol(err.to_string())
        }
    }
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(RuntimeError::function("errorString", "boom").status_code(), 502);
        assert_eq!(RuntimeError::transport("refused").status_code(), 500);
        assert_eq!(RuntimeError::not_found("arn").status_code(), 500);
    }

    #[test]
    fn test_gob_errors_split_by_cause() {
        let eof: RuntimeError = GobError::UnexpectedEof.into();
        assert_eq!(eof.category(), "transport");

        let corrupt: RuntimeError = GobError::corrupt("bad").into();
        assert_eq!(corrupt.category(), "protocol");
    }
}
