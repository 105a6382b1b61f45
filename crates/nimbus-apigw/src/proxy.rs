//! Function proxy integration.
//!
//! Turns an inbound HTTP request into an API gateway proxy event, invokes
//! the route's function and renders the proxy response it returns.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use nimbus_core::events::ApiGatewayRequestContext;
use nimbus_core::extract::{header_maps, query_maps};
use nimbus_core::http::{header, HeaderValue, Response, StatusCode};
use nimbus_core::{
    ApiGatewayProxyRequest, ApiGatewayProxyResponse, AuthorizerContext, BoxHandler, HttpRequest,
    HttpResponse, RouteMatch,
};
use nimbus_runtime::SharedInvoker;

use crate::error::{ApiGatewayError, ApiGatewayResult};

/// Resource reported when no route template is known.
pub const DEFAULT_RESOURCE: &str = "/{proxy+}";

/// Builds the proxy event for `request` without its body.
///
/// `prefix` is the API's path prefix (`/restapis/<id>`); it is stripped from
/// both the path and the matched route template.
pub fn proxy_event(api_id: &str, prefix: &str, request: &HttpRequest) -> ApiGatewayProxyRequest {
    let (headers, multi_value_headers) = header_maps(request.headers());
    let (query_string_parameters, multi_value_query_string_parameters) =
        query_maps(request.uri());

    let route = request.extensions().get::<RouteMatch>();
    let resource = route
        .map(|route| strip_prefix(&route.template, prefix).to_string())
        .unwrap_or_else(|| DEFAULT_RESOURCE.to_string());
    let path_parameters = route.map(|route| route.params.clone()).unwrap_or_default();

    ApiGatewayProxyRequest {
        resource,
        path: strip_prefix(request.uri().path(), prefix).to_string(),
        http_method: request.method().as_str().to_string(),
        headers,
        multi_value_headers,
        query_string_parameters,
        multi_value_query_string_parameters,
        path_parameters,
        request_context: ApiGatewayRequestContext {
            api_id: api_id.to_string(),
            ..ApiGatewayRequestContext::default()
        },
        body: None,
        is_base64_encoded: false,
    }
}

fn strip_prefix<'a>(path: &'a str, prefix: &str) -> &'a str {
    match path.strip_prefix(prefix) {
        Some("") => "/",
        Some(rest) if rest.starts_with('/') => rest,
        _ => path,
    }
}

/// Invokes one function for every request on a route.
#[derive(Clone)]
pub struct FunctionProxy {
    api_id: String,
    prefix: String,
    function: String,
    invoker: SharedInvoker,
    requests: Arc<AtomicU64>,
}

impl std::fmt::Debug for FunctionProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionProxy")
            .field("api_id", &self.api_id)
            .field("function", &self.function)
            .finish_non_exhaustive()
    }
}

impl FunctionProxy {
    /// Creates a proxy for `function` on the API `api_id`.
    pub fn new(
        api_id: impl Into<String>,
        prefix: impl Into<String>,
        function: impl Into<String>,
        invoker: SharedInvoker,
    ) -> Self {
        Self {
            api_id: api_id.into(),
            prefix: prefix.into(),
            function: function.into(),
            invoker,
            requests: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Function resource name.
    pub fn function(&self) -> &str {
        &self.function
    }

    /// Handles one request; failures are rendered as error responses.
    pub async fn handle(&self, request: HttpRequest) -> HttpResponse {
        match self.forward(request).await {
            Ok(response) => response,
            Err(err) => {
                tracing::error!(
                    api_id = %self.api_id,
                    arn = %self.function,
                    category = err.category(),
                    error = %err,
                    "function proxy failed"
                );
                err.into_response()
            }
        }
    }

    async fn forward(&self, request: HttpRequest) -> ApiGatewayResult<HttpResponse> {
        let mut event = proxy_event(&self.api_id, &self.prefix, &request);
        let sequence = self.requests.fetch_add(1, Ordering::Relaxed);
        event.request_context.request_id = format!("{}-{sequence:08}", self.api_id);
        if let Some(AuthorizerContext(context)) = request.extensions().get::<AuthorizerContext>() {
            event.request_context.authorizer = context.clone();
        }

        let body = request.body();
        if !body.is_empty() {
            match std::str::from_utf8(body) {
                Ok(text) => event.body = Some(text.to_string()),
                Err(_) => {
                    event.body = Some(STANDARD.encode(body));
                    event.is_base64_encoded = true;
                }
            }
        }

        let payload = serde_json::to_value(&event)?;
        let reply = self.invoker.invoke(&self.function, payload).await?;
        let response: ApiGatewayProxyResponse = serde_json::from_slice(&reply)
            .map_err(|err| ApiGatewayError::invalid_response(&self.function, err.to_string()))?;
        render(&self.function, response)
    }

    /// Wraps the proxy as a shareable handler.
    pub fn into_handler(self) -> BoxHandler {
        let proxy = Arc::new(self);
        Arc::new(move |request: HttpRequest| {
            let proxy = Arc::clone(&proxy);
            async move { proxy.handle(request).await }
        })
    }
}

/// Converts a function's proxy response into an HTTP response.
///
/// A zero status renders as 200.
pub fn render(function: &str, response: ApiGatewayProxyResponse) -> ApiGatewayResult<HttpResponse> {
    let status = match response.status_code {
        0 => StatusCode::OK,
        code => StatusCode::from_u16(code).map_err(|_| {
            ApiGatewayError::invalid_response(function, format!("invalid status code {code}"))
        })?,
    };

    let body = if response.is_base64_encoded {
        STANDARD
            .decode(response.body.as_bytes())
            .map(Bytes::from)
            .map_err(|err| ApiGatewayError::invalid_response(function, err.to_string()))?
    } else {
        Bytes::from(response.body)
    };

    let mut rendered = Response::new(http_body_util::Full::new(body));
    *rendered.status_mut() = status;
    let headers = rendered.headers_mut();
    for (name, value) in &response.headers {
        if let (Ok(name), Ok(value)) = (
            header::HeaderName::try_from(name.as_str()),
            HeaderValue::from_str(value),
        ) {
            headers.insert(name, value);
        }
    }
    for (name, values) in &response.multi_value_headers {
        let Ok(name) = header::HeaderName::try_from(name.as_str()) else {
            continue;
        };
        headers.remove(&name);
        for value in values {
            if let Ok(value) = HeaderValue::from_str(value) {
                headers.append(name.clone(), value);
            }
        }
    }
    Ok(rendered)
}
