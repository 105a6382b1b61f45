//! The HTTP front door.
//!
//! One listener serves every host. Each connection runs in its own task;
//! request bodies are buffered before dispatch because every front end
//! forwards the whole body to a function.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use nimbus_core::http::{self, header, StatusCode};
use nimbus_core::HttpResponse;
use nimbus_runtime::{FunctionFactory, SharedInvoker};
use tokio::net::{TcpListener, TcpStream};

use crate::config::NimbusConfig;
use crate::error::{ServerError, ServerResult};
use crate::router::Router;
use crate::shutdown::{ConnectionTracker, ShutdownSignal};
use crate::stack;

/// How long open connections get to finish after shutdown starts.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// A configured emulator: deployed functions plus the router in front of
/// them.
#[derive(Debug)]
pub struct NimbusServer {
    addr: SocketAddr,
    router: Arc<Router>,
    factory: Arc<FunctionFactory>,
    shutdown_timeout: Duration,
}

impl NimbusServer {
    /// Deploys every function in `config` and builds the router.
    ///
    /// Functions already started are stopped again if a later step fails.
    pub async fn build(config: &NimbusConfig) -> ServerResult<Self> {
        let addr = format!("{}:{}", config.server.listen_addr, config.server.port)
            .parse::<SocketAddr>()
            .map_err(|e| ServerError::config(format!("invalid listen address: {e}")))?;

        let factory = Arc::new(FunctionFactory::new(config.runtime.clone()));
        let built = match stack::deploy(config, &factory).await {
            Ok(_) => {
                let invoker: SharedInvoker = factory.clone();
                stack::build_router(config, invoker)
            }
            Err(err) => Err(err),
        };

        match built {
            Ok(router) => Ok(Self::from_parts(addr, router, factory)),
            Err(err) => {
                close_factory(&factory).await;
                Err(err)
            }
        }
    }

    /// Assembles a server from already built parts.
    pub fn from_parts(addr: SocketAddr, router: Router, factory: Arc<FunctionFactory>) -> Self {
        Self {
            addr,
            router: Arc::new(router),
            factory,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Sets how long open connections get to finish after shutdown starts.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Configured listen address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The function registry behind the router.
    pub fn factory(&self) -> &Arc<FunctionFactory> {
        &self.factory
    }

    /// Binds the configured address and serves until SIGTERM or SIGINT.
    pub async fn run(self) -> ServerResult<()> {
        let listener = TcpListener::bind(self.addr).await?;
        self.serve(listener, ShutdownSignal::with_os_signals()).await
    }

    /// Serves `listener` until `shutdown` is triggered, then drains open
    /// connections and stops every function.
    pub async fn serve(self, listener: TcpListener, shutdown: ShutdownSignal) -> ServerResult<()> {
        let local_addr = listener.local_addr()?;
        tracing::info!(
            addr = %local_addr,
            domain = %self.router.domain(),
            hosts = ?self.router.labels(),
            "nimbus listening"
        );

        let tracker = ConnectionTracker::new();
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote_addr)) => {
                        let router = Arc::clone(&self.router);
                        let token = tracker.acquire();
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(err) = serve_connection(router, stream, shutdown).await {
                                tracing::debug!(remote_addr = %remote_addr, error = %err, "connection error");
                            }
                            drop(token);
                        });
                    }
                    Err(err) => tracing::error!(error = %err, "failed to accept connection"),
                },
                () = shutdown.recv() => {
                    tracing::info!("shutdown signal received, no longer accepting connections");
                    break;
                }
            }
        }
        drop(listener);

        tokio::select! {
            () = tracker.wait_for_shutdown() => tracing::info!("all connections closed"),
            () = tokio::time::sleep(self.shutdown_timeout) => tracing::warn!(
                active = tracker.active_connections(),
                "shutdown timeout reached with connections still open"
            ),
        }

        close_factory(&self.factory).await;
        tracing::info!("nimbus stopped");
        Ok(())
    }
}

async fn close_factory(factory: &FunctionFactory) {
    for err in factory.close().await {
        tracing::warn!(error = %err, category = err.category(), "failed to stop function");
    }
}

async fn serve_connection(
    router: Arc<Router>,
    stream: TcpStream,
    shutdown: ShutdownSignal,
) -> Result<(), hyper::Error> {
    let service = service_fn(move |request: Request<Incoming>| {
        let router = Arc::clone(&router);
        async move { Ok::<_, Infallible>(handle_request(&router, request).await) }
    });

    let conn = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
    tokio::pin!(conn);

    tokio::select! {
        result = conn.as_mut() => result,
        () = shutdown.recv() => {
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    }
}

async fn handle_request(router: &Router, request: Request<Incoming>) -> HttpResponse {
    let started = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("-")
        .to_string();

    let (parts, body) = request.into_parts();
    let response = match body.collect().await {
        Ok(collected) => {
            router
                .dispatch(Request::from_parts(parts, collected.to_bytes()))
                .await
        }
        Err(err) => {
            tracing::warn!(error = %err, "failed to read request body");
            http::reason(StatusCode::BAD_REQUEST)
        }
    };

    tracing::info!(
        method = %method,
        host = %host,
        path = %path,
        status = response.status().as_u16(),
        duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        "request"
    );
    response
}
