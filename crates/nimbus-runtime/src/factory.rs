//! The function registry.
//!
//! [`FunctionFactory`] owns every [`FunctionProcess`] and dispatches calls by
//! resource name. Gateways only see the [`FunctionInvoker`] trait, which lets
//! tests substitute an in-memory implementation.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::config::{RuntimeConfig, MAX_FUNCTION_TIMEOUT};
use crate::error::{RuntimeError, RuntimeResult};
use crate::process::{FunctionProcess, ProcessSpec};

/// Boxed future returned by [`FunctionInvoker::invoke`].
pub type InvokeFuture<'a> = Pin<Box<dyn Future<Output = RuntimeResult<Bytes>> + Send + 'a>>;

/// Something that can invoke functions by resource name.
pub trait FunctionInvoker: Send + Sync {
    /// Invokes `arn` with a JSON payload and returns the raw reply payload.
    fn invoke<'a>(&'a self, arn: &'a str, payload: serde_json::Value) -> InvokeFuture<'a>;
}

/// Shared handle to an invoker.
pub type SharedInvoker = Arc<dyn FunctionInvoker>;

/// Where a function's deployment archive comes from.
#[derive(Debug, Clone)]
pub enum FunctionCode {
    /// Archive bytes already in memory.
    ZipFile(Bytes),
    /// Path of an archive on disk.
    ZipPath(PathBuf),
}

/// A function to register.
#[derive(Debug, Clone)]
pub struct FunctionDescriptor {
    /// Function name; the resource name is derived from it.
    pub name: String,
    /// Deployment archive.
    pub code: FunctionCode,
    /// Per-invocation timeout; the runtime default when `None`.
    pub timeout: Option<Duration>,
    /// Environment variables. Variables without a value are skipped.
    pub environment: BTreeMap<String, Option<String>>,
}

impl FunctionDescriptor {
    /// Descriptor for an in-memory archive.
    pub fn new(name: impl Into<String>, zip_file: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            code: FunctionCode::ZipFile(zip_file.into()),
            timeout: None,
            environment: BTreeMap::new(),
        }
    }

    /// Sets the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Adds an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), Some(value.into()));
        self
    }
}

/// Registry of running functions.
#[derive(Debug, Default)]
pub struct FunctionFactory {
    config: RuntimeConfig,
    functions: RwLock<HashMap<String, Arc<FunctionProcess>>>,
}

impl FunctionFactory {
    /// Creates an empty registry.
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            functions: RwLock::new(HashMap::new()),
        }
    }

    /// Runtime settings in use.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Deploys and starts a function, returning its resource name.
    ///
    /// Fails with a duplicate error if the name is taken, leaving the
    /// existing registration untouched, or with a deployment error if the
    /// timeouts are out of range, the archive cannot be unpacked or the
    /// process cannot be spawned.
    pub async fn add(&self, descriptor: FunctionDescriptor) -> RuntimeResult<String> {
        let arn = self.config.function_arn(&descriptor.name);
        if self.contains(&arn) {
            return Err(RuntimeError::duplicate(&descriptor.name));
        }

        if let Some(message) = self.config.out_of_range() {
            return Err(RuntimeError::deployment(&descriptor.name, message));
        }
        let timeout = descriptor
            .timeout
            .unwrap_or_else(|| self.config.default_timeout());
        if timeout.is_zero() || timeout > MAX_FUNCTION_TIMEOUT {
            return Err(RuntimeError::deployment(
                &descriptor.name,
                format!(
                    "timeout must be between 1s and {}s",
                    MAX_FUNCTION_TIMEOUT.as_secs()
                ),
            ));
        }

        let archive = match descriptor.code {
            FunctionCode::ZipFile(bytes) => bytes,
            FunctionCode::ZipPath(path) => tokio::fs::read(&path)
                .await
                .map(Bytes::from)
                .map_err(|err| {
                    RuntimeError::deployment(
                        &descriptor.name,
                        format!("read {}: {err}", path.display()),
                    )
                })?,
        };

        let mut environment = HashMap::new();
        for (key, value) in descriptor.environment {
            match value {
                Some(value) => {
                    environment.insert(key, value);
                }
                None => tracing::warn!(
                    function = %descriptor.name,
                    environment_variable = %key,
                    "unable to set environment variable as value was missing"
                ),
            }
        }

        let process = FunctionProcess::start(ProcessSpec {
            name: descriptor.name.clone(),
            archive,
            timeout,
            environment,
            region: self.config.region.clone(),
            ready_timeout: self.config.ready_timeout(),
            enforce_deadline: self.config.enforce_deadline,
        })
        .await?;

        let process = Arc::new(process);
        {
            let mut functions = self.functions.write();
            if functions.contains_key(&arn) {
                // Lost a race with a concurrent add of the same name.
                drop(functions);
                if let Err(err) = process.stop().await {
                    tracing::warn!(error = %err, "failed to stop duplicate process");
                }
                return Err(RuntimeError::duplicate(&descriptor.name));
            }
            functions.insert(arn.clone(), process);
        }

        tracing::info!(function = %descriptor.name, arn = %arn, "registered function");
        Ok(arn)
    }

    /// Invokes a registered function.
    ///
    /// Fails immediately with a not-found error for unknown names.
    pub async fn invoke(&self, arn: &str, payload: Bytes) -> RuntimeResult<Bytes> {
        let process = self
            .functions
            .read()
            .get(arn)
            .cloned()
            .ok_or_else(|| RuntimeError::not_found(arn))?;
        process.invoke(payload).await
    }

    /// Returns `true` if `arn` is registered.
    pub fn contains(&self, arn: &str) -> bool {
        self.functions.read().contains_key(arn)
    }

    /// Resource names of every registered function, sorted.
    pub fn arns(&self) -> Vec<String> {
        let mut arns: Vec<_> = self.functions.read().keys().cloned().collect();
        arns.sort();
        arns
    }

    /// Registered process for `arn`.
    pub fn process(&self, arn: &str) -> Option<Arc<FunctionProcess>> {
        self.functions.read().get(arn).cloned()
    }

    /// Stops every registered process.
    ///
    /// Never fails: individual stop failures are returned as warnings.
    /// Must not run concurrently with invocations.
    pub async fn close(&self) -> Vec<RuntimeError> {
        tracing::info!("closing function factory");
        let processes: Vec<_> = self.functions.write().drain().map(|(_, p)| p).collect();

        let mut warnings = Vec::new();
        for process in processes {
            if let Err(err) = process.stop().await {
                warnings.push(err);
            }
        }
        warnings
    }
}

impl FunctionInvoker for FunctionFactory {
    fn invoke<'a>(&'a self, arn: &'a str, payload: serde_json::Value) -> InvokeFuture<'a> {
        Box::pin(async move {
            let body = serde_json::to_vec(&payload)?;
            FunctionFactory::invoke(self, arn, Bytes::from(body)).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invoke_unknown_function() {
        let factory = FunctionFactory::new(RuntimeConfig::default());
        let err = factory
            .invoke("arn:aws:lambda:us-east-1:123456789012:function:nope", Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_deployment_error_leaves_nothing_registered() {
        let factory = FunctionFactory::new(RuntimeConfig::default());
        let err = factory
            .add(FunctionDescriptor::new("bad", Bytes::from_static(b"junk")))
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Deployment { .. }));
        assert!(factory.arns().is_empty());
    }

    #[tokio::test]
    async fn test_missing_archive_path() {
        let factory = FunctionFactory::new(RuntimeConfig::default());
        let descriptor = FunctionDescriptor {
            code: FunctionCode::ZipPath(PathBuf::from("/definitely/not/here.zip")),
            ..FunctionDescriptor::new("ghost", Bytes::new())
        };
        let err = factory.add(descriptor).await.unwrap_err();
        assert_eq!(err.category(), "deployment");
    }

    #[tokio::test]
    async fn test_out_of_range_timeout_is_rejected_before_deploying() {
        let factory = FunctionFactory::new(RuntimeConfig::default());
        let descriptor = FunctionDescriptor::new("slow", Bytes::from_static(b"junk"))
            .with_timeout(Duration::from_secs(u64::MAX));
        let err = factory.add(descriptor).await.unwrap_err();
        assert!(err.to_string().contains("timeout must be between"), "{err}");
        assert!(factory.arns().is_empty());

        let factory = FunctionFactory::new(RuntimeConfig {
            ready_timeout_ms: u64::MAX,
            ..RuntimeConfig::default()
        });
        let err = factory
            .add(FunctionDescriptor::new("slow", Bytes::from_static(b"junk")))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ready_timeout_ms"), "{err}");
    }

    #[tokio::test]
    async fn test_close_empty_factory() {
        let factory = FunctionFactory::new(RuntimeConfig::default());
        assert!(factory.close().await.is_empty());
    }
}
