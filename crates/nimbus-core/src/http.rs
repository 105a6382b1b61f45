//! Buffered HTTP handler abstraction.
//!
//! Every front end in the emulator works on fully buffered requests: the
//! server reads the body before dispatch, so handlers receive a
//! `Request<Bytes>` and produce a `Response<Full<Bytes>>`. Handlers never
//! fail; errors are rendered into responses where they happen.
//!
//! # Example
//!
//! ```rust
//! use nimbus_core::http::{text, BoxHandler, HttpRequest, StatusCode};
//! use std::sync::Arc;
//!
//! let handler: BoxHandler = Arc::new(|_req: HttpRequest| async {
//!     text(StatusCode::OK, "hello")
//! });
//! # let _ = handler;
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use ::bytes::Bytes;
use http_body_util::Full;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use ::http::{header, HeaderMap, HeaderValue, Method, Request, Response, StatusCode, Uri};

/// A request whose body has been read into memory.
pub type HttpRequest = Request<Bytes>;

/// A fully materialised response.
pub type HttpResponse = Response<Full<Bytes>>;

/// Boxed future returned by [`Handler::call`].
pub type HandlerFuture = Pin<Box<dyn Future<Output = HttpResponse> + Send>>;

/// Something that turns a buffered request into a response.
pub trait Handler: Send + Sync + 'static {
    /// Handle one request.
    fn call(&self, request: HttpRequest) -> HandlerFuture;
}

impl<F, Fut> Handler for F
where
    F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HttpResponse> + Send + 'static,
{
    fn call(&self, request: HttpRequest) -> HandlerFuture {
        Box::pin(self(request))
    }
}

/// Shared, type-erased handler.
pub type BoxHandler = Arc<dyn Handler>;

/// Route match information attached to a request as an extension.
///
/// Holds the route template that matched (for example `/pets/{id}`) and
/// the values captured by its `{param}` segments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteMatch {
    /// Template of the matching route.
    pub template: String,
    /// Path parameters by name.
    pub params: HashMap<String, String>,
}

impl RouteMatch {
    /// Creates a match for `template` with no parameters.
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            params: HashMap::new(),
        }
    }

    /// Returns a captured parameter.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

/// A route declaration handed to the server's router.
///
/// Paths may contain `{param}` segments. A prefix route matches its path
/// and everything below it. An empty method list accepts any method.
#[derive(Clone)]
pub struct Route {
    /// Path template.
    pub path: String,
    /// Match everything below `path` as well.
    pub prefix: bool,
    /// Accepted methods.
    pub methods: Vec<Method>,
    /// Headers that must be present with exactly these values.
    pub headers: Vec<(String, String)>,
    /// Request handler.
    pub handler: BoxHandler,
}

impl Route {
    /// Route for `path` accepting any method.
    pub fn new(path: impl Into<String>, handler: BoxHandler) -> Self {
        Self {
            path: path.into(),
            prefix: false,
            methods: Vec::new(),
            headers: Vec::new(),
            handler,
        }
    }

    /// Restricts the route to `method`.
    pub fn method(mut self, method: Method) -> Self {
        self.methods.push(method);
        self
    }

    /// Makes this a prefix route.
    pub fn prefix(mut self, prefix: bool) -> Self {
        self.prefix = prefix;
        self
    }

    /// Requires a header value.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("path", &self.path)
            .field("prefix", &self.prefix)
            .field("methods", &self.methods)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Authorizer context attached to an allowed request as an extension.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthorizerContext(pub Map<String, Value>);

// ============================================================================
// Response builders
// ============================================================================

/// Empty response with the given status.
pub fn status(status: StatusCode) -> HttpResponse {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

/// Response with the given body bytes and content type.
pub fn content(status: StatusCode, content_type: &str, body: impl Into<Bytes>) -> HttpResponse {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    if let Ok(value) = HeaderValue::from_str(content_type) {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    response
}

/// Plain-text response.
pub fn text(status: StatusCode, body: impl Into<String>) -> HttpResponse {
    content(status, "text/plain; charset=utf-8", body.into())
}

/// HTML response with status 200.
pub fn html(body: impl Into<String>) -> HttpResponse {
    content(StatusCode::OK, "text/html; charset=utf-8", body.into())
}

/// JSON response; serialisation failures become a 500.
pub fn json<T: Serialize + ?Sized>(status: StatusCode, value: &T) -> HttpResponse {
    match serde_json::to_vec(value) {
        Ok(body) => content(status, "application/json", body),
        Err(err) => {
            tracing::error!(error = %err, "failed to serialise response body");
            text(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

/// `302 Found` redirect to `location`.
pub fn redirect_found(location: &str) -> HttpResponse {
    let mut response = status(StatusCode::FOUND);
    match HeaderValue::from_str(location) {
        Ok(value) => {
            response.headers_mut().insert(header::LOCATION, value);
            response
        }
        Err(_) => text(StatusCode::INTERNAL_SERVER_ERROR, "invalid redirect target"),
    }
}

/// Plain-text response carrying the canonical reason phrase.
pub fn reason(status: StatusCode) -> HttpResponse {
    text(status, status.canonical_reason().unwrap_or("error"))
}

/// JSON body rendered for failed requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error category.
    pub error: String,
    /// Human-readable message.
    pub message: String,
}

impl ErrorResponse {
    /// Creates an error body.
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }

    /// Renders the body with the given status code.
    ///
    /// Codes outside the valid range render as 500.
    pub fn into_response(self, status: u16) -> HttpResponse {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        json(status, &self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_of(response: HttpResponse) -> Bytes {
        response.into_body().collect().await.unwrap().to_bytes()
    }

    #[tokio::test]
    async fn test_closure_is_handler() {
        let handler: BoxHandler = Arc::new(|request: HttpRequest| async move {
            text(StatusCode::OK, request.uri().path().to_string())
        });

        let request = Request::builder().uri("/echo").body(Bytes::new()).unwrap();
        let response = handler.call(request).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_of(response).await, Bytes::from_static(b"/echo"));
    }

    #[tokio::test]
    async fn test_json_response() {
        let response = json(StatusCode::OK, &serde_json::json!({"active": false}));
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            HeaderValue::from_static("application/json")
        );
        assert_eq!(body_of(response).await, Bytes::from_static(br#"{"active":false}"#));
    }

    #[test]
    fn test_redirect_found() {
        let response = redirect_found("/login?redirect=%2F");
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[header::LOCATION], "/login?redirect=%2F");
    }

    #[tokio::test]
    async fn test_error_response() {
        let response = ErrorResponse::new("transport", "connection refused").into_response(500);
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: ErrorResponse = serde_json::from_slice(&body_of(response).await).unwrap();
        assert_eq!(body.error, "transport");
    }

    #[test]
    fn test_route_match_param() {
        let mut route = RouteMatch::new("/pets/{id}");
        route.params.insert("id".to_string(), "7".to_string());
        assert_eq!(route.param("id"), Some("7"));
        assert_eq!(route.param("name"), None);
    }
}
