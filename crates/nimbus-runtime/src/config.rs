//! Runtime settings shared by every hosted function.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Longest per-invocation timeout a function may have.
pub const MAX_FUNCTION_TIMEOUT: Duration = Duration::from_secs(900);

/// Longest wait for a new process to accept connections.
pub const MAX_READY_TIMEOUT: Duration = Duration::from_secs(300);

/// Function runtime settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Timeout applied to functions that do not configure one, in seconds.
    pub default_timeout_secs: u64,
    /// How long to wait for a freshly started process to accept
    /// connections, in milliseconds.
    pub ready_timeout_ms: u64,
    /// Abandon calls once the function's deadline has passed.
    ///
    /// Off by default: the deadline is then only passed to the function.
    pub enforce_deadline: bool,
    /// Region used in function resource names.
    pub region: String,
    /// Account id used in function resource names.
    pub account_id: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 3,
            ready_timeout_ms: 2_000,
            enforce_deadline: false,
            region: "us-east-1".to_string(),
            account_id: "123456789012".to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Default function timeout.
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    /// Bound on the post-spawn readiness wait.
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    /// Describes the first setting that is out of range.
    pub fn out_of_range(&self) -> Option<String> {
        if self.default_timeout_secs == 0
            || self.default_timeout_secs > MAX_FUNCTION_TIMEOUT.as_secs()
        {
            return Some(format!(
                "runtime.default_timeout_secs must be between 1 and {}",
                MAX_FUNCTION_TIMEOUT.as_secs()
            ));
        }
        if u128::from(self.ready_timeout_ms) > MAX_READY_TIMEOUT.as_millis() {
            return Some(format!(
                "runtime.ready_timeout_ms must be at most {}",
                MAX_READY_TIMEOUT.as_millis()
            ));
        }
        None
    }

    /// Resource name of the function called `name`.
    pub fn function_arn(&self, name: &str) -> String {
        format!(
            "arn:aws:lambda:{}:{}:function:{name}",
            self.region, self.account_id
        )
    }
}
