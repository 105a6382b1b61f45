//! # Nimbus Load Balancer
//!
//! Emulates an application load balancer with OIDC authentication.
//!
//! A [`LoadBalancer`] owns an ordered list of rules. Each rule matches on
//! path, methods and headers, and either forwards to a function target or
//! serves a fixed response. Rules marked `oidc` sit behind the session gate
//! of the shared [`OidcProvider`], which also serves the identity provider
//! endpoints on the `auth` host.
//!
//! ## Example
//!
//! ```rust,ignore
//! use nimbus_alb::{AlbRule, LoadBalancer, OidcProvider, OidcSettings};
//!
//! let provider = Arc::new(OidcProvider::new(OidcSettings::default())?);
//! let mut alb = LoadBalancer::new("alb", invoker, Some(provider));
//! alb.add_rule(AlbRule::function("/api/", "arn:aws:lambda:us-east-1:123456789012:function:api").with_oidc())?;
//! ```

#![doc(html_root_url = "https://docs.rs/nimbus-alb/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod error;
pub mod oidc;
pub mod target;

use std::collections::BTreeMap;
use std::sync::Arc;

use nimbus_core::http::Method;
use nimbus_core::Route;
use nimbus_runtime::SharedInvoker;
use serde::{Deserialize, Serialize};

pub use error::{AlbError, AlbResult};
pub use oidc::handlers::{auth_routes, gate};
pub use oidc::{MockTokenData, OidcProvider, OidcSettings};
pub use target::{FixedResponse, FunctionTarget};

/// One load balancer rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlbRule {
    /// Path to match; a trailing `/` matches everything below it.
    pub path: String,
    /// Accepted methods; empty accepts any.
    pub methods: Vec<String>,
    /// Headers that must be present with exactly these values.
    pub headers: BTreeMap<String, String>,
    /// Require an authenticated OIDC session.
    pub oidc: bool,
    /// Function to forward to.
    pub function: Option<String>,
    /// Response to serve instead of forwarding.
    pub fixed_response: Option<FixedResponse>,
}

impl AlbRule {
    /// Rule forwarding `path` to `function`.
    pub fn function(path: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            function: Some(function.into()),
            ..Self::default()
        }
    }

    /// Rule serving `response` on `path`.
    pub fn fixed(path: impl Into<String>, response: FixedResponse) -> Self {
        Self {
            path: path.into(),
            fixed_response: Some(response),
            ..Self::default()
        }
    }

    /// Puts the rule behind the OIDC session gate.
    pub fn with_oidc(mut self) -> Self {
        self.oidc = true;
        self
    }

    /// Restricts the rule to `method`.
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.methods.push(method.into());
        self
    }

    /// Requires a header value.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// An emulated load balancer.
pub struct LoadBalancer {
    name: String,
    invoker: SharedInvoker,
    oidc: Option<Arc<OidcProvider>>,
    routes: Vec<Route>,
    rules: usize,
}

impl std::fmt::Debug for LoadBalancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadBalancer")
            .field("name", &self.name)
            .field("oidc", &self.oidc.is_some())
            .field("routes", &self.routes)
            .finish_non_exhaustive()
    }
}

impl LoadBalancer {
    /// Creates a load balancer; with a provider it also serves the
    /// code-exchange callback.
    pub fn new(
        name: impl Into<String>,
        invoker: SharedInvoker,
        oidc: Option<Arc<OidcProvider>>,
    ) -> Self {
        let name = name.into();
        let mut routes = Vec::new();
        if let Some(provider) = &oidc {
            routes.push(oidc::handlers::idp_response_route(provider, &name));
        }
        tracing::info!(alb = %name, oidc = oidc.is_some(), "creating load balancer");
        Self {
            name,
            invoker,
            oidc,
            routes,
            rules: 0,
        }
    }

    /// Load balancer name, also its host label.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Appends a rule; rules are matched in the order they were added.
    pub fn add_rule(&mut self, rule: AlbRule) -> AlbResult<&mut Self> {
        if !rule.path.starts_with('/') {
            return Err(AlbError::config(format!(
                "rule path {:?} must start with '/'",
                rule.path
            )));
        }

        let mut handler = match (&rule.function, rule.fixed_response.clone()) {
            (Some(function), None) => {
                let target_group = format!(
                    "arn:aws:elasticloadbalancing:us-east-1:123456789012:targetgroup/{}-{}/{:016x}",
                    self.name, self.rules, self.rules
                );
                FunctionTarget::new(function.clone(), target_group, Arc::clone(&self.invoker))
                    .into_handler()
            }
            (None, Some(response)) => response.into_handler()?,
            (Some(_), Some(_)) => {
                return Err(AlbError::config(format!(
                    "rule {} has both a function and a fixed response",
                    rule.path
                )))
            }
            (None, None) => {
                return Err(AlbError::config(format!("rule {} has no action", rule.path)))
            }
        };

        if rule.oidc {
            let provider = self.oidc.as_ref().ok_or_else(|| {
                AlbError::config(format!(
                    "rule {} requires oidc but {} has no provider",
                    rule.path, self.name
                ))
            })?;
            handler = gate(Arc::clone(provider), handler);
        }

        let mut route = Route::new(rule.path.clone(), handler).prefix(rule.path.ends_with('/'));
        for method in &rule.methods {
            let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
                .map_err(|_| AlbError::config(format!("invalid method {method:?}")))?;
            route = route.method(method);
        }
        for (name, value) in &rule.headers {
            route = route.header(name.to_ascii_lowercase(), value.clone());
        }

        tracing::debug!(
            alb = %self.name,
            path = %rule.path,
            oidc = rule.oidc,
            function = rule.function.as_deref().unwrap_or("-"),
            "added rule"
        );
        self.routes.push(route);
        self.rules += 1;
        Ok(self)
    }

    /// Routes in match order.
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Consumes the load balancer, returning its routes.
    pub fn into_routes(self) -> Vec<Route> {
        self.routes
    }
}
