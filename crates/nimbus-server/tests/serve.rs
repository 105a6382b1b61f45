//! The listener end to end: a raw HTTP/1.1 exchange, then shutdown.

use std::sync::Arc;
use std::time::Duration;

use nimbus_alb::{AlbRule, FixedResponse, LoadBalancer};
use nimbus_runtime::{FunctionFactory, RuntimeConfig, SharedInvoker};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use nimbus_server::{NimbusServer, Router, ShutdownSignal};

async fn exchange(addr: std::net::SocketAddr, request: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    String::from_utf8(response).unwrap()
}

#[tokio::test]
async fn test_serves_until_shutdown() {
    let factory = Arc::new(FunctionFactory::new(RuntimeConfig::default()));
    let invoker: SharedInvoker = factory.clone();

    let mut alb = LoadBalancer::new("alb", invoker, None);
    alb.add_rule(AlbRule::fixed(
        "/health",
        FixedResponse::new("healthy", "text/plain"),
    ))
    .unwrap();
    let mut router = Router::new("127.0.0.1.nip.io");
    router.mount("alb", alb.into_routes());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = ShutdownSignal::new();
    let server = NimbusServer::from_parts(addr, router, factory)
        .with_shutdown_timeout(Duration::from_secs(1));
    let task = tokio::spawn(server.serve(listener, shutdown.clone()));

    let response = exchange(
        addr,
        "GET /health HTTP/1.1\r\nHost: alb.127.0.0.1.nip.io\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert!(response.ends_with("healthy"), "{response}");

    let response = exchange(
        addr,
        "GET /health HTTP/1.1\r\nHost: elsewhere.example.com\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 404"), "{response}");

    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("server should stop")
        .unwrap()
        .unwrap();
    assert!(TcpStream::connect(addr).await.is_err());
}
