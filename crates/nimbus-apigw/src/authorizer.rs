//! Custom authorizers.
//!
//! An [`Authorizer`] guards a route. Each request goes through:
//!
//! 1. credential lookup in the configured identity source header; a request
//!    without one is rejected without invoking anything
//! 2. a decision cache keyed by the authorizer (function, payload kind and
//!    identity source) together with the raw credential
//! 3. on a miss, a call to the authorizer function, whose decision is cached
//!    whatever its outcome
//! 4. policy evaluation, where any deny statement wins
//!
//! Allowed requests reach the wrapped handler with the decision's context
//! attached as an [`AuthorizerContext`] extension.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use nimbus_core::http::{json, StatusCode};
use nimbus_core::{
    AuthorizerContext, BoxHandler, CustomAuthorizerResponse, CustomAuthorizerTokenRequest,
    ExpiringCache, HttpRequest, HttpResponse, PolicyEffect,
};
use nimbus_runtime::SharedInvoker;
use serde::{Deserialize, Serialize};

use crate::error::{ApiGatewayError, ApiGatewayResult};
use crate::proxy::proxy_event;

/// Decision cache shared by the authorizers of one API.
pub type DecisionCache = ExpiringCache<DecisionKey, CustomAuthorizerResponse>;

/// Identifies a cached decision.
///
/// Routes of one API may use different authorizers, so a decision is only
/// reused by the authorizer that made it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DecisionKey {
    /// Authorizer function.
    pub function: String,
    /// Payload kind the function received.
    pub kind: AuthorizerKind,
    /// Header the credential was read from, lowercased.
    pub identity_source: String,
    /// The raw credential.
    pub credential: String,
}

/// Which payload the authorizer function receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AuthorizerKind {
    /// The raw credential and a resource descriptor.
    Token,
    /// Method, path, query, headers and path parameters.
    Request,
}

impl AuthorizerKind {
    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Token => "token",
            Self::Request => "request",
        }
    }
}

impl FromStr for AuthorizerKind {
    type Err = ApiGatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("token") {
            Ok(Self::Token)
        } else if s.eq_ignore_ascii_case("request") {
            Ok(Self::Request)
        } else {
            Err(ApiGatewayError::config(format!("unknown authorizer kind `{s}`")))
        }
    }
}

impl TryFrom<String> for AuthorizerKind {
    type Error = ApiGatewayError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AuthorizerKind> for String {
    fn from(kind: AuthorizerKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for AuthorizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authorizer settings for one route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizerConfig {
    /// Authorizer function. A bare name in configuration files; the
    /// resource name once the gateway is built.
    pub function: String,
    /// Payload shape.
    #[serde(default = "default_kind")]
    pub kind: AuthorizerKind,
    /// Header holding the credential.
    #[serde(default = "default_identity_source")]
    pub identity_source: String,
    /// How long decisions are cached, in seconds.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_kind() -> AuthorizerKind {
    AuthorizerKind::Token
}

fn default_identity_source() -> String {
    "Authorization".to_string()
}

fn default_ttl_secs() -> u64 {
    300
}

impl AuthorizerConfig {
    /// Settings with the default identity source and TTL.
    pub fn new(function: impl Into<String>, kind: AuthorizerKind) -> Self {
        Self {
            function: function.into(),
            kind,
            identity_source: default_identity_source(),
            ttl_secs: default_ttl_secs(),
        }
    }

    /// Decision lifetime.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// A route guard backed by an authorizer function.
pub struct Authorizer {
    api_id: String,
    prefix: String,
    config: AuthorizerConfig,
    invoker: SharedInvoker,
    decisions: Arc<DecisionCache>,
    inner: BoxHandler,
}

impl fmt::Debug for Authorizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authorizer")
            .field("api_id", &self.api_id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Authorizer {
    /// Guards `inner` with the authorizer described by `config`.
    pub fn new(
        api_id: impl Into<String>,
        prefix: impl Into<String>,
        config: AuthorizerConfig,
        invoker: SharedInvoker,
        decisions: Arc<DecisionCache>,
        inner: BoxHandler,
    ) -> Self {
        Self {
            api_id: api_id.into(),
            prefix: prefix.into(),
            config,
            invoker,
            decisions,
            inner,
        }
    }

    /// Runs the authorizer state machine for one request.
    pub async fn handle(&self, mut request: HttpRequest) -> HttpResponse {
        let credential = request
            .headers()
            .get(self.config.identity_source.as_str())
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        let Some(credential) = credential else {
            tracing::info!(api_id = %self.api_id, "missing credential");
            return unauthorized();
        };

        let key = DecisionKey {
            function: self.config.function.clone(),
            kind: self.config.kind,
            identity_source: self.config.identity_source.to_ascii_lowercase(),
            credential,
        };
        let cached = self.decisions.get(&key);
        tracing::info!(
            api_id = %self.api_id,
            cache_hit = cached.is_some(),
            "checking authorizer cache"
        );

        let decision = match cached {
            Some(decision) => decision,
            None => match self.authorize(&key.credential, &request).await {
                Ok(decision) => {
                    self.decisions
                        .set(key, decision.clone(), self.config.ttl());
                    decision
                }
                Err(err) => {
                    tracing::error!(
                        api_id = %self.api_id,
                        arn = %self.config.function,
                        category = err.category(),
                        error = %err,
                        "unable to invoke authorizer"
                    );
                    return err.into_response();
                }
            },
        };

        match decision.decision() {
            PolicyEffect::Deny => {
                tracing::info!(api_id = %self.api_id, "policy deny");
                unauthorized()
            }
            PolicyEffect::Allow => {
                tracing::info!(api_id = %self.api_id, "policy allow");
                request
                    .extensions_mut()
                    .insert(AuthorizerContext(decision.forwarded_context()));
                self.inner.call(request).await
            }
        }
    }

    async fn authorize(
        &self,
        credential: &str,
        request: &HttpRequest,
    ) -> ApiGatewayResult<CustomAuthorizerResponse> {
        let payload = match self.config.kind {
            AuthorizerKind::Token => serde_json::to_value(CustomAuthorizerTokenRequest::new(
                credential,
                self.method_arn(request),
            ))?,
            AuthorizerKind::Request => {
                serde_json::to_value(proxy_event(&self.api_id, &self.prefix, request))?
            }
        };

        let reply = self.invoker.invoke(&self.config.function, payload).await?;
        serde_json::from_slice(&reply).map_err(|err| {
            ApiGatewayError::invalid_response(&self.config.function, err.to_string())
        })
    }

    fn method_arn(&self, request: &HttpRequest) -> String {
        let path = request
            .uri()
            .path()
            .strip_prefix(self.prefix.as_str())
            .unwrap_or_else(|| request.uri().path());
        format!(
            "arn:aws:execute-api:us-east-1:123456789012:{}/local/{}{}",
            self.api_id,
            request.method(),
            path
        )
    }

    /// Wraps the authorizer as a shareable handler.
    pub fn into_handler(self) -> BoxHandler {
        let authorizer = Arc::new(self);
        Arc::new(move |request: HttpRequest| {
            let authorizer = Arc::clone(&authorizer);
            async move { authorizer.handle(request).await }
        })
    }
}

fn unauthorized() -> HttpResponse {
    json(
        StatusCode::UNAUTHORIZED,
        &serde_json::json!({ "message": "Unauthorized" }),
    )
}
