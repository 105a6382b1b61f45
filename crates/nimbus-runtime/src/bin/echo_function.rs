//! Nimbus echo function
//!
//! A function process written against [`nimbus_runtime::serve_connection`].
//! It answers every invocation with its payload, except for a few control
//! keys used by the integration tests:
//!
//! - `{"sleep_ms": N}` sleeps for N milliseconds and reports when it entered
//!   and left the handler
//! - `{"error": "message"}` fails with a function error
//! - `{"env": "NAME"}` reports an environment variable
//! - `{"deadline": true}` reports the milliseconds left before the deadline
//! - `{"exit": N}` terminates the process with status N without replying

use std::net::Ipv4Addr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nimbus_runtime::{serve_connection, InvokeError, InvokeRequest, InvokeResponse};

async fn handle(request: InvokeRequest) -> InvokeResponse {
    let event: Value = match serde_json::from_slice(&request.payload) {
        Ok(event) => event,
        Err(err) => {
            return InvokeResponse::failed(InvokeError::new("InvalidPayload", err.to_string()))
        }
    };

    if let Some(message) = event.get("error").and_then(Value::as_str) {
        return InvokeResponse::failed(InvokeError::new("EchoError", message));
    }

    if let Some(sleep_ms) = event.get("sleep_ms").and_then(Value::as_u64) {
        let entered = epoch_millis();
        tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
        return reply(&json!({ "entered": entered, "exited": epoch_millis() }));
    }

    if let Some(name) = event.get("env").and_then(Value::as_str) {
        return reply(&json!({ "name": name, "value": std::env::var(name).ok() }));
    }

    if let Some(code) = event.get("exit").and_then(Value::as_i64) {
        warn!(code, "exiting on request");
        std::process::exit(i32::try_from(code).unwrap_or(1));
    }

    if event.get("deadline").is_some() {
        let remaining = request.deadline.remaining().as_millis() as u64;
        return reply(&json!({ "remaining_ms": remaining }));
    }

    InvokeResponse::ok(request.payload)
}

fn reply(body: &Value) -> InvokeResponse {
    InvokeResponse::ok(body.to_string().into_bytes())
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nimbus_echo_function=info,warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let port: u16 = match std::env::var("_LAMBDA_SERVER_PORT").map(|raw| raw.parse()) {
        Ok(Ok(port)) => port,
        _ => {
            error!("_LAMBDA_SERVER_PORT is not set to a port number");
            std::process::exit(1);
        }
    };

    let listener = match TcpListener::bind((Ipv4Addr::LOCALHOST, port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind port {}: {}", port, e);
            std::process::exit(1);
        }
    };
    info!(port, "echo function listening");

    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                tokio::spawn(async move {
                    if let Err(e) = serve_connection(stream, handle).await {
                        warn!(error = %e, "connection ended with an error");
                    }
                });
            }
            Err(e) => warn!(error = %e, "accept failed"),
        }
    }
}
