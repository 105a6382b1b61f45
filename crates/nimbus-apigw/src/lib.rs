//! # Nimbus API Gateway
//!
//! Emulates a REST API gateway in front of hosted functions.
//!
//! A [`RestApi`] collects routes under the `/restapis/<id>` prefix. Every
//! route proxies to one function; a route may additionally be guarded by a
//! custom [`Authorizer`]. The routes are handed to the server's router as
//! [`Route`] declarations.
//!
//! ## Example
//!
//! ```rust,ignore
//! use nimbus_apigw::{AuthorizerConfig, AuthorizerKind, RestApi};
//!
//! let mut api = RestApi::new("abc123", invoker);
//! api.route(
//!     Some(Method::GET),
//!     "/pets/{id}",
//!     "arn:aws:lambda:us-east-1:123456789012:function:pets",
//!     Some(AuthorizerConfig::new(
//!         "arn:aws:lambda:us-east-1:123456789012:function:auth",
//!         AuthorizerKind::Token,
//!     )),
//! );
//! ```

#![doc(html_root_url = "https://docs.rs/nimbus-apigw/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod authorizer;
pub mod error;
pub mod proxy;

use std::sync::Arc;

use nimbus_core::http::Method;
use nimbus_core::Route;
use nimbus_runtime::SharedInvoker;

pub use authorizer::{
    Authorizer, AuthorizerConfig, AuthorizerKind, DecisionCache, DecisionKey,
};
pub use error::{ApiGatewayError, ApiGatewayResult};
pub use proxy::{proxy_event, FunctionProxy};

/// An emulated REST API.
pub struct RestApi {
    id: String,
    invoker: SharedInvoker,
    decisions: Arc<DecisionCache>,
    routes: Vec<Route>,
}

impl std::fmt::Debug for RestApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestApi")
            .field("id", &self.id)
            .field("routes", &self.routes)
            .finish_non_exhaustive()
    }
}

impl RestApi {
    /// Creates an API with no routes.
    pub fn new(id: impl Into<String>, invoker: SharedInvoker) -> Self {
        let id = id.into();
        tracing::info!(api_id = %id, "creating api gateway");
        Self {
            id,
            invoker,
            decisions: Arc::new(DecisionCache::new()),
            routes: Vec::new(),
        }
    }

    /// API identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Path prefix every route of this API lives under.
    pub fn prefix(&self) -> String {
        format!("/restapis/{}", self.id)
    }

    /// Adds a route proxying to `function`.
    ///
    /// `path` is relative to the API prefix and may contain `{param}`
    /// segments.
    pub fn route(
        &mut self,
        method: Option<Method>,
        path: &str,
        function: impl Into<String>,
        authorizer: Option<AuthorizerConfig>,
    ) -> &mut Self {
        let prefix = self.prefix();
        let function = function.into();
        let mut handler = FunctionProxy::new(
            self.id.clone(),
            prefix.clone(),
            function.clone(),
            Arc::clone(&self.invoker),
        )
        .into_handler();

        if let Some(config) = authorizer {
            tracing::info!(
                api_id = %self.id,
                path,
                authorizer = %config.function,
                kind = %config.kind,
                "guarding route with authorizer"
            );
            handler = Authorizer::new(
                self.id.clone(),
                prefix.clone(),
                config,
                Arc::clone(&self.invoker),
                Arc::clone(&self.decisions),
                handler,
            )
            .into_handler();
        }

        let path = if path.starts_with('/') {
            format!("{prefix}{path}")
        } else {
            format!("{prefix}/{path}")
        };
        tracing::debug!(api_id = %self.id, path = %path, arn = %function, "added route");
        let mut route = Route::new(path, handler);
        if let Some(method) = method {
            route = route.method(method);
        }
        self.routes.push(route);
        self
    }

    /// Routes in registration order.
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Consumes the API, returning its routes.
    pub fn into_routes(self) -> Vec<Route> {
        self.routes
    }

    /// Authorizer decisions cached for this API.
    pub fn decisions(&self) -> &DecisionCache {
        &self.decisions
    }
}
