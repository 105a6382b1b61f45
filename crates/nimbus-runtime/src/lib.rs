//! # Nimbus Runtime
//!
//! Hosts functions as local processes and invokes them over Go's `net/rpc`
//! gob protocol.
//!
//! - [`archive`]: unpacks deployment zips, rejecting entries that escape
//!   the destination
//! - [`process`]: one supervised child per function, invoked one call at a
//!   time
//! - [`client`]: the `Function.Invoke` call, plus a server half for
//!   functions written in Rust
//! - [`factory`]: the registry gateways dispatch through
//!
//! ## Example
//!
//! ```rust,ignore
//! use nimbus_runtime::{FunctionDescriptor, FunctionFactory, RuntimeConfig};
//!
//! let factory = FunctionFactory::new(RuntimeConfig::default());
//! let arn = factory
//!     .add(FunctionDescriptor::new("echo", std::fs::read("echo.zip")?))
//!     .await?;
//! let reply = factory.invoke(&arn, br#"{"hello":"world"}"#.to_vec().into()).await?;
//! factory.close().await;
//! ```

#![doc(html_root_url = "https://docs.rs/nimbus-runtime/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod archive;
pub mod client;
pub mod config;
pub mod error;
pub mod factory;
pub mod gob;
pub mod process;
pub mod protocol;

pub use archive::{extract_archive, ArchiveError, ENTRY_POINT};
pub use client::{invoke, serve_connection, InvokeOptions};
pub use config::{RuntimeConfig, MAX_FUNCTION_TIMEOUT, MAX_READY_TIMEOUT};
pub use error::{RuntimeError, RuntimeResult};
pub use factory::{
    FunctionCode, FunctionDescriptor, FunctionFactory, FunctionInvoker, InvokeFuture,
    SharedInvoker,
};
pub use process::{FunctionProcess, ProcessSpec};
pub use protocol::{Deadline, InvokeError, InvokeRequest, InvokeResponse};
