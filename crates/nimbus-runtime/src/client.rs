//! Invocation protocol client and server halves.
//!
//! [`invoke`] performs one synchronous call: fresh connection, one request,
//! one reply, no retry. [`serve_connection`] is the other side, used by
//! functions written in Rust.

use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use bytes::Bytes;
use tokio::net::TcpStream;

use crate::error::{RuntimeError, RuntimeResult};
use crate::gob::GobStream;
use crate::protocol::{
    self, InvokeRequest, InvokeResponse, RpcRequest, RpcResponse, INVOKE_METHOD,
};

/// Per-call options.
#[derive(Debug, Clone, Copy, Default)]
pub struct InvokeOptions {
    /// Abandon the call after this long. `None` waits for as long as the
    /// function takes, leaving the deadline as advisory metadata.
    pub timeout: Option<Duration>,
}

/// Calls `Function.Invoke` on the process listening on `port`.
///
/// Connection failures and broken streams are transport errors; an error
/// reported by the function is a function error. On success the reply
/// payload is returned unmodified.
pub async fn invoke(
    port: u16,
    request: &InvokeRequest,
    options: InvokeOptions,
) -> RuntimeResult<Bytes> {
    let call = call(port, request);
    let response = match options.timeout {
        Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
            RuntimeError::transport(format!("no reply within {} ms", limit.as_millis()))
        })??,
        None => call.await?,
    };

    match response.error {
        Some(error) => Err(RuntimeError::function(error.error_type, error.message)),
        None => Ok(response.payload),
    }
}

async fn call(port: u16, request: &InvokeRequest) -> RuntimeResult<InvokeResponse> {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|err| RuntimeError::transport(format!("connect to {addr}: {err}")))?;
    stream.set_nodelay(true).ok();

    let mut rpc = GobStream::new(stream, protocol::schema());
    rpc.queue(&RpcRequest {
        service_method: INVOKE_METHOD.to_string(),
        seq: 0,
    })?;
    rpc.queue(request)?;
    rpc.flush().await?;

    let header: RpcResponse = rpc.read().await?;
    if !header.error.is_empty() {
        return Err(RuntimeError::protocol(format!("rpc: {}", header.error)));
    }
    Ok(rpc.read().await?)
}

/// Serves `Function.Invoke` calls on one connection until the peer hangs up.
///
/// Calls to any other method are answered with an RPC-level error.
pub async fn serve_connection<F, Fut>(stream: TcpStream, handler: F) -> RuntimeResult<()>
where
    F: Fn(InvokeRequest) -> Fut,
    Fut: Future<Output = InvokeResponse>,
{
    stream.set_nodelay(true).ok();
    let mut rpc = GobStream::new(stream, protocol::schema());

    while let Some(header) = rpc.try_read::<RpcRequest>().await? {
        if header.service_method != INVOKE_METHOD {
            // Drain the body so the stream stays in sync.
            rpc.read_value().await?;
            rpc.queue(&RpcResponse {
                error: format!("rpc: can't find method {}", header.service_method),
                service_method: header.service_method,
                seq: header.seq,
            })?;
            rpc.queue(&InvokeResponse::default())?;
            rpc.flush().await?;
            continue;
        }

        let request: InvokeRequest = rpc.read().await?;
        let response = handler(request).await;
        rpc.queue(&RpcResponse {
            service_method: header.service_method,
            seq: header.seq,
            error: String::new(),
        })?;
        rpc.queue(&response)?;
        rpc.flush().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Deadline, InvokeError};
    use tokio::net::TcpListener;

    async fn spawn_server<F, Fut>(handler: F) -> u16
    where
        F: Fn(InvokeRequest) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = InvokeResponse> + Send,
    {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let handler = handler.clone();
                tokio::spawn(async move {
                    let _ = serve_connection(stream, handler).await;
                });
            }
        });
        port
    }

    fn request(payload: &'static [u8]) -> InvokeRequest {
        InvokeRequest::new(payload, Deadline::after(Duration::from_secs(3)))
    }

    #[tokio::test]
    async fn test_invoke_returns_payload_unmodified() {
        let port = spawn_server(|request: InvokeRequest| async move {
            assert_eq!(request.request_id, "0");
            InvokeResponse::ok(request.payload)
        })
        .await;

        let reply = invoke(port, &request(br#"{"a":1}"#), InvokeOptions::default())
            .await
            .unwrap();
        assert_eq!(&reply[..], br#"{"a":1}"#);
    }

    #[tokio::test]
    async fn test_function_error() {
        let port = spawn_server(|_| async {
            InvokeResponse::failed(InvokeError::new("Boom", "it broke"))
        })
        .await;

        let err = invoke(port, &request(b"{}"), InvokeOptions::default())
            .await
            .unwrap_err();
        match err {
            RuntimeError::Function {
                error_type,
                message,
            } => {
                assert_eq!(error_type, "Boom");
                assert_eq!(message, "it broke");
            }
            other => panic!("expected function error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let port = {
            let listener = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
            listener.local_addr().unwrap().port()
        };
        let err = invoke(port, &request(b"{}"), InvokeOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.category(), "transport");
    }

    #[tokio::test]
    async fn test_enforced_timeout() {
        let port = spawn_server(|request: InvokeRequest| async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            InvokeResponse::ok(request.payload)
        })
        .await;

        let options = InvokeOptions {
            timeout: Some(Duration::from_millis(50)),
        };
        let err = invoke(port, &request(b"{}"), options).await.unwrap_err();
        assert_eq!(err.category(), "transport");
    }

    #[tokio::test]
    async fn test_unknown_method_gets_rpc_error() {
        let port = spawn_server(|request: InvokeRequest| async move {
            InvokeResponse::ok(request.payload)
        })
        .await;

        let stream = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).await.unwrap();
        let mut rpc = GobStream::new(stream, protocol::schema());
        rpc.queue(&RpcRequest {
            service_method: "Function.Ping".to_string(),
            seq: 7,
        })
        .unwrap();
        rpc.queue(&request(b"{}")).unwrap();
        rpc.flush().await.unwrap();

        let header: RpcResponse = rpc.read().await.unwrap();
        assert_eq!(header.seq, 7);
        assert!(header.error.contains("can't find method Function.Ping"));
    }
}
