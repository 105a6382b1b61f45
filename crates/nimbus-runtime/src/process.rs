//! Function process supervision.
//!
//! A [`FunctionProcess`] owns everything one function needs for its whole
//! registered lifetime: the unpacked deployment, a private local port, the
//! child process and the lock that keeps invocations one at a time. There is
//! no restart policy; once the child dies every call fails with a transport
//! error.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, TcpListener};
use std::process::Stdio;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use crate::archive::{self, ENTRY_POINT};
use crate::client::{self, InvokeOptions};
use crate::error::{RuntimeError, RuntimeResult};
use crate::protocol::{Deadline, InvokeRequest};

/// Trace header handed to every function process.
pub const TRACE_ID: &str = "Root=1-00000000-000000000000000000000000;Parent";

/// Everything needed to start a function process.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    /// Function name.
    pub name: String,
    /// Deployment archive contents.
    pub archive: Bytes,
    /// Per-invocation timeout.
    pub timeout: Duration,
    /// Variables set in the child's environment.
    pub environment: HashMap<String, String>,
    /// Region reported to the child.
    pub region: String,
    /// Bound on the post-spawn readiness wait.
    pub ready_timeout: Duration,
    /// Abandon calls at the deadline instead of only advertising it.
    pub enforce_deadline: bool,
}

/// A running function process.
#[derive(Debug)]
pub struct FunctionProcess {
    name: String,
    port: u16,
    timeout: Duration,
    enforce_deadline: bool,
    child: Mutex<Option<Child>>,
    invoke_lock: Mutex<()>,
    // Dropped last: the child must be gone before its files are removed.
    workdir: TempDir,
}

impl FunctionProcess {
    /// Unpacks the deployment, reserves a port and starts the entry point.
    pub async fn start(spec: ProcessSpec) -> RuntimeResult<Self> {
        let name = spec.name.clone();
        let deploy_err = |message: String| RuntimeError::deployment(&name, message);

        let workdir = tempfile::Builder::new()
            .prefix(&format!("nimbus-{name}-"))
            .tempdir()
            .map_err(|err| deploy_err(format!("create work directory: {err}")))?;

        let archive = spec.archive.clone();
        let dest = workdir.path().to_path_buf();
        tokio::task::spawn_blocking(move || archive::extract_archive(&archive, &dest))
            .await
            .map_err(|err| deploy_err(format!("extraction task failed: {err}")))?
            .map_err(|err| deploy_err(err.to_string()))?;

        let port = reserve_port().map_err(|err| deploy_err(format!("reserve port: {err}")))?;

        let mut command = Command::new(workdir.path().join(ENTRY_POINT));
        command
            .current_dir(workdir.path())
            .env_clear()
            .env("AWS_LAMBDA_FUNCTION_NAME", &spec.name)
            .env(
                "AWS_LAMBDA_FUNCTION_TIMEOUT",
                spec.timeout.as_secs().to_string(),
            )
            .env("AWS_REGION", &spec.region)
            .envs(&spec.environment)
            .env("_LAMBDA_SERVER_PORT", port.to_string())
            .env("_X_AMZN_TRACE_ID", TRACE_ID)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|err| deploy_err(format!("spawn {ENTRY_POINT}: {err}")))?;

        if let Some(stdout) = child.stdout.take() {
            forward_output(spec.name.clone(), "stdout", stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            forward_output(spec.name.clone(), "stderr", stderr);
        }

        tracing::info!(
            function = %spec.name,
            port,
            pid = child.id(),
            workdir = %workdir.path().display(),
            "started function process"
        );

        let process = Self {
            name: spec.name,
            port,
            timeout: spec.timeout,
            enforce_deadline: spec.enforce_deadline,
            child: Mutex::new(Some(child)),
            invoke_lock: Mutex::new(()),
            workdir,
        };
        process.wait_ready(spec.ready_timeout).await;
        Ok(process)
    }

    /// Function name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Local port the process serves on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Per-invocation timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Directory holding the unpacked deployment.
    pub fn workdir(&self) -> &std::path::Path {
        self.workdir.path()
    }

    /// Invokes the function with a JSON payload.
    ///
    /// Holds the process's invocation lock for the whole call, so calls to
    /// the same function never overlap. The deadline is the function's
    /// timeout from the moment the lock is acquired.
    pub async fn invoke(&self, payload: Bytes) -> RuntimeResult<Bytes> {
        let _guard = self.invoke_lock.lock().await;

        let started = Instant::now();
        let request = InvokeRequest::new(payload, Deadline::after(self.timeout));
        let options = InvokeOptions {
            timeout: self.enforce_deadline.then_some(self.timeout),
        };
        let result = client::invoke(self.port, &request, options).await;

        let duration_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(body) => tracing::debug!(
                function = %self.name,
                duration_ms,
                response_bytes = body.len(),
                "invocation completed"
            ),
            Err(err) => tracing::warn!(
                function = %self.name,
                duration_ms,
                category = err.category(),
                error = %err,
                "invocation failed"
            ),
        }
        result
    }

    /// Kills the child process.
    ///
    /// Stopping an already stopped or exited process is not an error.
    pub async fn stop(&self) -> RuntimeResult<()> {
        tracing::info!(function = %self.name, "stopping function process");
        let Some(mut child) = self.child.lock().await.take() else {
            return Ok(());
        };
        if let Ok(Some(status)) = child.try_wait() {
            tracing::info!(function = %self.name, %status, "function process had already exited");
            return Ok(());
        }
        match child.kill().await {
            Ok(()) => Ok(()),
            Err(err) => {
                tracing::error!(function = %self.name, error = %err, "failed to stop function process");
                Err(RuntimeError::shutdown(&self.name, err.to_string()))
            }
        }
    }

    /// Returns `true` while the child has not exited.
    pub async fn is_running(&self) -> bool {
        match self.child.lock().await.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    async fn wait_ready(&self, limit: Duration) {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, self.port));
        let deadline = Instant::now().checked_add(limit);
        loop {
            if TcpStream::connect(addr).await.is_ok() {
                tracing::debug!(function = %self.name, port = self.port, "function process ready");
                return;
            }
            if deadline.map_or(true, |deadline| Instant::now() >= deadline) {
                tracing::warn!(
                    function = %self.name,
                    port = self.port,
                    wait_ms = limit.as_millis() as u64,
                    "function process is not accepting connections yet"
                );
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

/// Picks a free local port by binding port 0 and releasing it.
fn reserve_port() -> std::io::Result<u16> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
    Ok(listener.local_addr()?.port())
}

/// Re-emits every line the child writes as a log event.
fn forward_output<R>(function: String, stream: &'static str, output: R)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(output).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => tracing::info!(function = %function, stream, "{line}"),
                Ok(None) => break,
                Err(err) => {
                    tracing::debug!(function = %function, stream, error = %err, "output closed");
                    break;
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_port_is_usable() {
        let port = reserve_port().unwrap();
        assert_ne!(port, 0);
        TcpListener::bind((Ipv4Addr::LOCALHOST, port)).unwrap();
    }

    #[tokio::test]
    async fn test_bad_archive_is_a_deployment_error() {
        let spec = ProcessSpec {
            name: "broken".to_string(),
            archive: Bytes::from_static(b"not a zip"),
            timeout: Duration::from_secs(1),
            environment: HashMap::new(),
            region: "us-east-1".to_string(),
            ready_timeout: Duration::from_millis(10),
            enforce_deadline: false,
        };
        let err = FunctionProcess::start(spec).await.unwrap_err();
        assert_eq!(err.category(), "deployment");
    }
}
