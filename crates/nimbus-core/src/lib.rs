//! # Nimbus Core
//!
//! Shared building blocks for the Nimbus serverless emulator.
//!
//! This crate provides:
//!
//! - [`ExpiringCache`]: concurrent key/value store with per-entry TTL, used
//!   for authorizer decisions and authorization codes
//! - [`events`]: JSON payloads exchanged with hosted functions
//! - [`http`]: the buffered request/response handler abstraction shared by
//!   every front end
//! - [`extract`]: cookie, form, query and header helpers
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//! use nimbus_core::ExpiringCache;
//!
//! let decisions = ExpiringCache::new();
//! decisions.set("Bearer abc".to_string(), true, Duration::from_secs(300));
//! assert_eq!(decisions.get("Bearer abc"), Some(true));
//! ```

#![doc(html_root_url = "https://docs.rs/nimbus-core/0.1.0")]

pub mod cache;
pub mod error;
pub mod events;
pub mod extract;
pub mod http;

pub use cache::{CacheStats, ExpiringCache};
pub use error::{ExtractionError, ExtractionResult, ExtractionSource};
pub use events::{
    AlbTargetGroupRequest, AlbTargetGroupResponse, ApiGatewayProxyRequest,
    ApiGatewayProxyResponse, CustomAuthorizerResponse, CustomAuthorizerTokenRequest,
    PolicyDocument, PolicyEffect, PolicyStatement,
};
pub use crate::http::{
    AuthorizerContext, BoxHandler, ErrorResponse, Handler, HttpRequest, HttpResponse, Route,
    RouteMatch,
};
