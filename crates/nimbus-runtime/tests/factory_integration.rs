//! Registry integration tests.
//!
//! Every test deploys the `nimbus-echo-function` binary as a function's
//! `bootstrap` and talks to it through the real gob RPC path.

use std::io::{Cursor, Write};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde_json::{json, Value};
use zip::write::SimpleFileOptions;

use nimbus_runtime::{
    FunctionDescriptor, FunctionFactory, FunctionInvoker, RuntimeConfig, RuntimeError,
    MAX_FUNCTION_TIMEOUT,
};

fn echo_binary() -> Vec<u8> {
    std::fs::read(env!("CARGO_BIN_EXE_nimbus-echo-function")).expect("echo binary is built")
}

fn zip_with(entries: &[(&str, &[u8])]) -> Bytes {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, body) in entries {
        let options = SimpleFileOptions::default().unix_permissions(0o755);
        writer.start_file(*name, options).unwrap();
        writer.write_all(body).unwrap();
    }
    Bytes::from(writer.finish().unwrap().into_inner())
}

fn echo_archive() -> Bytes {
    zip_with(&[("bootstrap", &echo_binary())])
}

async fn factory_with_echo(name: &str) -> (FunctionFactory, String) {
    let factory = FunctionFactory::new(RuntimeConfig::default());
    let arn = factory
        .add(FunctionDescriptor::new(name, echo_archive()).with_env("GREETING", "hi"))
        .await
        .unwrap();
    (factory, arn)
}

async fn call(factory: &FunctionFactory, arn: &str, payload: Value) -> Result<Value, RuntimeError> {
    let reply = FunctionInvoker::invoke(factory, arn, payload).await?;
    Ok(serde_json::from_slice(&reply).unwrap())
}

#[tokio::test]
async fn test_echo_round_trip() {
    let (factory, arn) = factory_with_echo("echo").await;
    assert_eq!(arn, "arn:aws:lambda:us-east-1:123456789012:function:echo");

    let reply = call(&factory, &arn, json!({"hello": "world"})).await.unwrap();
    assert_eq!(reply, json!({"hello": "world"}));

    assert!(factory.close().await.is_empty());
}

#[tokio::test]
async fn test_invocations_do_not_overlap() {
    let (factory, arn) = factory_with_echo("sleepy").await;
    let factory = Arc::new(factory);

    let first = {
        let factory = Arc::clone(&factory);
        let arn = arn.clone();
        tokio::spawn(async move { call(&factory, &arn, json!({"sleep_ms": 200})).await })
    };
    let second = {
        let factory = Arc::clone(&factory);
        let arn = arn.clone();
        tokio::spawn(async move { call(&factory, &arn, json!({"sleep_ms": 200})).await })
    };

    let a = first.await.unwrap().unwrap();
    let b = second.await.unwrap().unwrap();
    let (earlier, later) = if a["entered"].as_u64() <= b["entered"].as_u64() {
        (a, b)
    } else {
        (b, a)
    };
    assert!(
        earlier["exited"].as_u64().unwrap() <= later["entered"].as_u64().unwrap(),
        "calls overlapped: {earlier} / {later}"
    );

    factory.close().await;
}

#[tokio::test]
async fn test_environment_is_passed_through() {
    let (factory, arn) = factory_with_echo("envy").await;

    let reply = call(&factory, &arn, json!({"env": "GREETING"})).await.unwrap();
    assert_eq!(reply["value"], "hi");

    let reply = call(&factory, &arn, json!({"env": "AWS_LAMBDA_FUNCTION_NAME"}))
        .await
        .unwrap();
    assert_eq!(reply["value"], "envy");

    let reply = call(&factory, &arn, json!({"env": "_X_AMZN_TRACE_ID"}))
        .await
        .unwrap();
    assert_eq!(reply["value"], nimbus_runtime::process::TRACE_ID);

    factory.close().await;
}

#[tokio::test]
async fn test_deadline_reflects_timeout() {
    let factory = FunctionFactory::new(RuntimeConfig::default());
    let arn = factory
        .add(FunctionDescriptor::new("timed", echo_archive()).with_timeout(Duration::from_secs(10)))
        .await
        .unwrap();

    let reply = call(&factory, &arn, json!({"deadline": true})).await.unwrap();
    let remaining = reply["remaining_ms"].as_u64().unwrap();
    assert!(remaining > 5_000 && remaining <= 10_000, "remaining {remaining}");

    factory.close().await;
}

#[tokio::test]
async fn test_function_error_is_reported() {
    let (factory, arn) = factory_with_echo("grumpy").await;

    let err = call(&factory, &arn, json!({"error": "nope"})).await.unwrap_err();
    assert!(err.is_function_error());
    assert_eq!(err.status_code(), 502);
    assert!(err.to_string().contains("nope"));

    factory.close().await;
}

#[tokio::test]
async fn test_duplicate_registration_keeps_original() {
    let (factory, arn) = factory_with_echo("twice").await;

    let err = factory
        .add(FunctionDescriptor::new("twice", echo_archive()))
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::Duplicate { .. }));

    let reply = call(&factory, &arn, json!({"still": "here"})).await.unwrap();
    assert_eq!(reply, json!({"still": "here"}));

    factory.close().await;
}

#[tokio::test]
async fn test_unknown_function() {
    let (factory, _) = factory_with_echo("known").await;
    let err = call(&factory, "arn:aws:lambda:us-east-1:123456789012:function:unknown", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::NotFound { .. }));
    factory.close().await;
}

#[tokio::test]
async fn test_dead_process_is_a_transport_error() {
    let (factory, arn) = factory_with_echo("doomed").await;
    let process = factory.process(&arn).unwrap();
    process.stop().await.unwrap();
    assert!(!process.is_running().await);

    let err = call(&factory, &arn, json!({})).await.unwrap_err();
    assert_eq!(err.category(), "transport");

    factory.close().await;
}

#[tokio::test]
async fn test_crashed_process_closes_cleanly() {
    let (factory, arn) = factory_with_echo("crashy").await;
    let process = factory.process(&arn).unwrap();

    let err = call(&factory, &arn, json!({"exit": 3})).await.unwrap_err();
    assert_eq!(err.category(), "transport");

    let mut reaped = false;
    for _ in 0..100 {
        if !process.is_running().await {
            reaped = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(reaped, "child should have exited");

    assert!(factory.close().await.is_empty());
}

#[tokio::test]
async fn test_longest_timeout_is_invocable() {
    let factory = FunctionFactory::new(RuntimeConfig::default());
    let arn = factory
        .add(
            FunctionDescriptor::new("patient", echo_archive())
                .with_timeout(MAX_FUNCTION_TIMEOUT),
        )
        .await
        .unwrap();

    let reply = call(&factory, &arn, json!({"deadline": true})).await.unwrap();
    let remaining = reply["remaining_ms"].as_u64().unwrap();
    assert!(remaining > 890_000, "remaining {remaining}");

    factory.close().await;
}

#[tokio::test]
async fn test_path_traversal_archive_is_rejected() {
    let factory = FunctionFactory::new(RuntimeConfig::default());
    let archive = zip_with(&[("bootstrap", &echo_binary()), ("../../etc/evil", b"owned")]);

    let err = factory
        .add(FunctionDescriptor::new("evil", archive))
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::Deployment { .. }));
    assert!(factory.arns().is_empty());
}

#[tokio::test]
async fn test_missing_environment_values_are_skipped() {
    let factory = FunctionFactory::new(RuntimeConfig::default());
    let mut descriptor = FunctionDescriptor::new("sparse", echo_archive());
    descriptor.environment.insert("UNSET".to_string(), None);
    let arn = factory.add(descriptor).await.unwrap();

    let reply = call(&factory, &arn, json!({"env": "UNSET"})).await.unwrap();
    assert_eq!(reply["value"], Value::Null);

    factory.close().await;
}
