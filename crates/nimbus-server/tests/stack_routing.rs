//! Host routing across the api, auth and load balancer hosts built from a
//! configuration file.

use std::sync::Arc;

use bytes::Bytes;
use http_body_util::BodyExt;
use nimbus_core::http::{header, Method, Request, StatusCode};
use nimbus_core::{HttpRequest, HttpResponse};
use nimbus_runtime::{FunctionFactory, FunctionInvoker, InvokeFuture, RuntimeConfig, RuntimeError};
use parking_lot::Mutex;
use serde_json::{json, Value};

use nimbus_server::stack::{build_router, deploy};
use nimbus_server::{NimbusConfig, Router, ServerError};

const CONFIG: &str = r#"
[[functions]]
name = "pets"
zip_file = "pets.zip"

[[functions]]
name = "gatekeeper"
zip_file = "gatekeeper.zip"

[[apis]]
id = "shop"

[[apis.routes]]
path = "/pets/{id}"
method = "GET"
function = "pets"
authorizer = { function = "gatekeeper", kind = "token" }

[[albs]]
name = "alb"

[[albs.rules]]
path = "/health"
fixed_response = { body = "ok", content_type = "text/plain" }

[[albs.rules]]
path = "/app/"
oidc = true
function = "pets"
"#;

#[derive(Default)]
struct MockInvoker {
    calls: Mutex<Vec<String>>,
}

impl MockInvoker {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

impl FunctionInvoker for MockInvoker {
    fn invoke<'a>(&'a self, arn: &'a str, payload: Value) -> InvokeFuture<'a> {
        Box::pin(async move {
            self.calls.lock().push(arn.to_string());
            let reply = if arn.ends_with(":function:gatekeeper") {
                json!({
                    "principalId": "user-1",
                    "policyDocument": {
                        "Version": "2012-10-17",
                        "Statement": [{"Action": "execute-api:Invoke", "Effect": "Allow", "Resource": "*"}]
                    }
                })
            } else if arn.ends_with(":function:pets") {
                json!({"statusCode": 200, "body": payload["path"]})
            } else {
                return Err(RuntimeError::not_found(arn));
            };
            Ok(Bytes::from(reply.to_string()))
        })
    }
}

fn config() -> NimbusConfig {
    let config: NimbusConfig = toml::from_str(CONFIG).unwrap();
    config.validate().unwrap();
    config
}

fn router() -> (Router, Arc<MockInvoker>) {
    let invoker = Arc::new(MockInvoker::default());
    let router = build_router(&config(), invoker.clone()).unwrap();
    (router, invoker)
}

fn request(method: Method, host: &str, path: &str) -> http::request::Builder {
    Request::builder()
        .method(method)
        .uri(path)
        .header(header::HOST, format!("{host}.127.0.0.1.nip.io:8080"))
}

fn empty(builder: http::request::Builder) -> HttpRequest {
    builder.body(Bytes::new()).unwrap()
}

async fn body(response: HttpResponse) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_api_route_runs_authorizer_then_function() {
    let (router, invoker) = router();

    let response = router
        .dispatch(empty(
            request(Method::GET, "api", "/restapis/shop/pets/7")
                .header(header::AUTHORIZATION, "Bearer abc"),
        ))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body(response).await, "/pets/7");
    assert_eq!(
        invoker.calls(),
        vec![
            "arn:aws:lambda:us-east-1:123456789012:function:gatekeeper".to_string(),
            "arn:aws:lambda:us-east-1:123456789012:function:pets".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_api_route_without_credential_is_unauthorized() {
    let (router, invoker) = router();

    let response = router
        .dispatch(empty(request(Method::GET, "api", "/restapis/shop/pets/7")))
        .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(invoker.calls().is_empty());
}

#[tokio::test]
async fn test_method_mismatch_and_unknown_paths() {
    let (router, _) = router();

    let response = router
        .dispatch(empty(request(Method::POST, "api", "/restapis/shop/pets/7")))
        .await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

    let response = router
        .dispatch(empty(request(Method::GET, "api", "/restapis/other/pets/7")))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = router
        .dispatch(empty(request(Method::GET, "nowhere", "/health")))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_load_balancer_rules() {
    let (router, invoker) = router();

    let response = router
        .dispatch(empty(request(Method::GET, "alb", "/health")))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body(response).await, "ok");

    let response = router
        .dispatch(empty(request(Method::GET, "alb", "/app/orders")))
        .await;
    assert_eq!(response.status(), StatusCode::FOUND);
    let location = response.headers()[header::LOCATION].to_str().unwrap();
    assert!(location.starts_with("http://auth.127.0.0.1.nip.io:8080/login?redirect="));
    assert!(invoker.calls().is_empty());
}

#[tokio::test]
async fn test_auth_host_serves_login_form() {
    let (router, _) = router();

    let response = router
        .dispatch(empty(request(
            Method::GET,
            "auth",
            "/login?redirect=http%3A%2F%2Falb.127.0.0.1.nip.io%3A8080%2Fapp%2F",
        )))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(body(response).await.contains("<form"));
}

#[tokio::test]
async fn test_deploy_fails_for_missing_archive() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config();
    for function in &mut config.functions {
        function.zip_file = dir.path().join(&function.zip_file);
    }

    let factory = FunctionFactory::new(RuntimeConfig::default());
    let err = deploy(&config, &factory).await.unwrap_err();

    assert!(matches!(err, ServerError::Runtime(RuntimeError::Deployment { .. })));
    assert!(factory.arns().is_empty());
}
