//! # Nimbus Server
//!
//! The front door of the Nimbus serverless emulator.
//!
//! A single listener serves every emulated endpoint, told apart by host
//! name below the configured domain:
//!
//! ```text
//!   api.<domain>/restapis/<id>/...   REST APIs with custom authorizers
//!   auth.<domain>/...                identity provider (login, userinfo, ...)
//!   <alb>.<domain>/...               one host per load balancer
//! ```
//!
//! Every request is routed to a function hosted by the
//! [`FunctionFactory`](nimbus_runtime::FunctionFactory), which starts one
//! child process per configured function.
//!
//! # Example Usage
//!
//! ```bash
//! # Run with a configuration file
//! $ nimbus --config nimbus.toml
//!
//! # Override the listener from the environment
//! $ NIMBUS_PORT=9000 NIMBUS_LOG_LEVEL=debug nimbus
//! ```

#![doc(html_root_url = "https://docs.rs/nimbus-server/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod logging;
pub mod router;
pub mod server;
pub mod shutdown;
pub mod stack;

pub use config::{AlbConfig, ApiConfig, ApiRouteConfig, FunctionConfig, NimbusConfig, ServerSettings};
pub use error::{ServerError, ServerResult};
pub use logging::{init_logging, LogConfig};
pub use router::Router;
pub use server::NimbusServer;
pub use shutdown::{ConnectionTracker, ShutdownSignal};

/// Server version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
