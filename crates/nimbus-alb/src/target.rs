//! Rule actions: function targets and fixed responses.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use nimbus_core::events::{AlbContextElb, AlbRequestContext};
use nimbus_core::extract::{header_maps, query_maps};
use nimbus_core::http::{content, header, HeaderValue, Response, StatusCode};
use nimbus_core::{AlbTargetGroupRequest, AlbTargetGroupResponse, BoxHandler, HttpRequest, HttpResponse};
use nimbus_runtime::SharedInvoker;
use serde::{Deserialize, Serialize};

use crate::error::{AlbError, AlbResult};

/// Builds the target group event for `request`.
pub fn target_event(target_group_arn: &str, request: &HttpRequest) -> AlbTargetGroupRequest {
    let (headers, multi_value_headers) = header_maps(request.headers());
    let (query_string_parameters, _) = query_maps(request.uri());

    let mut event = AlbTargetGroupRequest {
        http_method: request.method().as_str().to_string(),
        path: request.uri().path().to_string(),
        query_string_parameters,
        headers,
        multi_value_headers,
        request_context: AlbRequestContext {
            elb: AlbContextElb {
                target_group_arn: target_group_arn.to_string(),
            },
        },
        is_base64_encoded: false,
        body: String::new(),
    };

    let body = request.body();
    match std::str::from_utf8(body) {
        Ok(text) => event.body = text.to_string(),
        Err(_) => {
            event.body = STANDARD.encode(body);
            event.is_base64_encoded = true;
        }
    }
    event
}

/// Forwards requests to a function registered as a load balancer target.
#[derive(Clone)]
pub struct FunctionTarget {
    function: String,
    target_group_arn: String,
    invoker: SharedInvoker,
}

impl std::fmt::Debug for FunctionTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionTarget")
            .field("function", &self.function)
            .field("target_group_arn", &self.target_group_arn)
            .finish_non_exhaustive()
    }
}

impl FunctionTarget {
    /// Creates a target for `function`.
    pub fn new(
        function: impl Into<String>,
        target_group_arn: impl Into<String>,
        invoker: SharedInvoker,
    ) -> Self {
        Self {
            function: function.into(),
            target_group_arn: target_group_arn.into(),
            invoker,
        }
    }

    /// Handles one request; failures are rendered as error responses.
    pub async fn handle(&self, request: HttpRequest) -> HttpResponse {
        match self.forward(&request).await {
            Ok(response) => response,
            Err(err) => {
                tracing::error!(
                    arn = %self.function,
                    target_group = %self.target_group_arn,
                    category = err.category(),
                    error = %err,
                    "load balancer target failed"
                );
                err.into_response()
            }
        }
    }

    async fn forward(&self, request: &HttpRequest) -> AlbResult<HttpResponse> {
        let event = target_event(&self.target_group_arn, request);
        let payload = serde_json::to_value(&event)?;
        let reply = self.invoker.invoke(&self.function, payload).await?;
        let response: AlbTargetGroupResponse = serde_json::from_slice(&reply)
            .map_err(|err| AlbError::invalid_response(&self.function, err.to_string()))?;
        render(&self.function, response)
    }

    /// Wraps the target as a shareable handler.
    pub fn into_handler(self) -> BoxHandler {
        let target = Arc::new(self);
        Arc::new(move |request: HttpRequest| {
            let target = Arc::clone(&target);
            async move { target.handle(request).await }
        })
    }
}

/// Converts a target group response into an HTTP response.
pub fn render(function: &str, response: AlbTargetGroupResponse) -> AlbResult<HttpResponse> {
    let status = match response.status_code {
        0 => StatusCode::OK,
        code => StatusCode::from_u16(code).map_err(|_| {
            AlbError::invalid_response(function, format!("invalid status code {code}"))
        })?,
    };
    let body = if response.is_base64_encoded {
        STANDARD
            .decode(response.body.as_bytes())
            .map(Bytes::from)
            .map_err(|err| AlbError::invalid_response(function, err.to_string()))?
    } else {
        Bytes::from(response.body)
    };

    let mut rendered = Response::new(http_body_util::Full::new(body));
    *rendered.status_mut() = status;
    let headers = rendered.headers_mut();
    for (name, values) in &response.multi_value_headers {
        let Ok(name) = header::HeaderName::try_from(name.as_str()) else {
            continue;
        };
        for value in values {
            if let Ok(value) = HeaderValue::from_str(value) {
                headers.append(name.clone(), value);
            }
        }
    }
    for (name, value) in &response.headers {
        if let (Ok(name), Ok(value)) = (
            header::HeaderName::try_from(name.as_str()),
            HeaderValue::from_str(value),
        ) {
            headers.append(name, value);
        }
    }
    Ok(rendered)
}

fn default_status_code() -> u16 {
    200
}

fn default_content_type() -> String {
    "text/plain".to_string()
}

/// A canned response served without invoking anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedResponse {
    /// Response body.
    #[serde(default)]
    pub body: String,
    /// `Content-Type` of the body.
    #[serde(default = "default_content_type")]
    pub content_type: String,
    /// Response status.
    #[serde(default = "default_status_code")]
    pub status_code: u16,
}

impl FixedResponse {
    /// A 200 response with `body`.
    pub fn new(body: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            content_type: content_type.into(),
            status_code: default_status_code(),
        }
    }

    /// Wraps the response as a shareable handler.
    pub fn into_handler(self) -> AlbResult<BoxHandler> {
        let status = StatusCode::from_u16(self.status_code).map_err(|_| {
            AlbError::config(format!("invalid fixed response status {}", self.status_code))
        })?;
        let body = Bytes::from(self.body);
        let content_type = self.content_type;
        Ok(Arc::new(move |_request: HttpRequest| {
            std::future::ready(content(status, &content_type, body.clone()))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use nimbus_core::http::Request;

    #[test]
    fn test_target_event() {
        let request = Request::builder()
            .method("POST")
            .uri("/orders?tag=a&tag=b")
            .header("x-trace", "1")
            .body(Bytes::from_static(b"{\"id\":1}"))
            .unwrap();
        let event = target_event("arn:tg", &request);

        assert_eq!(event.http_method, "POST");
        assert_eq!(event.path, "/orders");
        assert_eq!(event.query_string_parameters["tag"], "a b");
        assert_eq!(event.headers["x-trace"], "1");
        assert_eq!(event.request_context.elb.target_group_arn, "arn:tg");
        assert_eq!(event.body, "{\"id\":1}");
        assert!(!event.is_base64_encoded);

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["httpMethod"], "POST");
        assert_eq!(value["requestContext"]["elb"]["targetGroupArn"], "arn:tg");
    }

    #[test]
    fn test_render() {
        let mut response = AlbTargetGroupResponse {
            status_code: 201,
            body: "aGk=".to_string(),
            is_base64_encoded: true,
            ..AlbTargetGroupResponse::default()
        };
        response
            .headers
            .insert("content-type".to_string(), "text/plain".to_string());
        response
            .multi_value_headers
            .insert("set-cookie".to_string(), vec!["a=1".to_string(), "b=2".to_string()]);

        let rendered = render("fn", response).unwrap();
        assert_eq!(rendered.status(), StatusCode::CREATED);
        assert_eq!(rendered.headers().get_all(header::SET_COOKIE).iter().count(), 2);
        assert_eq!(rendered.headers()[header::CONTENT_TYPE], "text/plain");

        let invalid = AlbTargetGroupResponse {
            status_code: 1000,
            ..AlbTargetGroupResponse::default()
        };
        assert_eq!(render("fn", invalid).unwrap_err().category(), "invalid_response");
    }

    #[tokio::test]
    async fn test_fixed_response() {
        let handler = FixedResponse::new("maintenance", "text/html")
            .into_handler()
            .unwrap();
        let request = Request::builder().uri("/").body(Bytes::new()).unwrap();
        let response = handler.call(request).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/html");
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, Bytes::from_static(b"maintenance"));
    }
}
