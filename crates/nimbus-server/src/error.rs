//! Error types for the Nimbus server.

use nimbus_alb::AlbError;
use nimbus_apigw::ApiGatewayError;
use nimbus_runtime::RuntimeError;
use thiserror::Error;

/// Server start-up and runtime errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Configuration could not be loaded or is inconsistent.
    #[error("configuration error: {message}")]
    Config {
        /// Error message.
        message: String,
    },

    /// Logging could not be initialised.
    #[error("logging error: {message}")]
    Logging {
        /// Error message.
        message: String,
    },

    /// A function could not be deployed.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// An API could not be built.
    #[error(transparent)]
    ApiGateway(#[from] ApiGatewayError),

    /// A load balancer or the OIDC provider could not be built.
    #[error(transparent)]
    Alb(#[from] AlbError),

    /// Listener failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a logging error.
    pub fn logging(message: impl Into<String>) -> Self {
        Self::Logging {
            message: message.into(),
        }
    }

    /// Get the error category for logs.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::Logging { .. } => "logging",
            Self::Runtime(err) => err.category(),
            Self::ApiGateway(err) => err.category(),
            Self::Alb(err) => err.category(),
            Self::Io(_) => "io",
        }
    }
}

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;
