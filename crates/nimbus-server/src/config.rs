//! Configuration for the Nimbus server.
//!
//! Functions, APIs and load balancers refer to functions by name; names are
//! turned into resource names when the stack is built.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use nimbus_alb::{AlbRule, OidcSettings};
use nimbus_apigw::AuthorizerConfig;
use nimbus_runtime::{FunctionCode, FunctionDescriptor, RuntimeConfig, MAX_FUNCTION_TIMEOUT};
use serde::{Deserialize, Serialize};

use crate::error::{ServerError, ServerResult};
use crate::logging::LogConfig;

/// Path loaded when no configuration file is named.
pub const DEFAULT_CONFIG_PATH: &str = "nimbus.toml";

/// Host labels that belong to the built-in services.
pub const RESERVED_HOSTS: [&str; 2] = ["api", "auth"];

/// Nimbus configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NimbusConfig {
    /// Listener and public URL settings.
    pub server: ServerSettings,
    /// Logging settings.
    pub logging: LogConfig,
    /// Function runtime settings.
    pub runtime: RuntimeConfig,
    /// Functions to deploy at start-up.
    pub functions: Vec<FunctionConfig>,
    /// REST APIs.
    pub apis: Vec<ApiConfig>,
    /// Load balancers.
    pub albs: Vec<AlbConfig>,
    /// Identity provider settings.
    pub oidc: OidcSettings,
}

impl NimbusConfig {
    /// Load configuration from a TOML or JSON file.
    ///
    /// Relative archive paths are resolved against the file's directory.
    pub fn from_file(path: impl Into<PathBuf>) -> ServerResult<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| {
            ServerError::config(format!("failed to read {}: {e}", path.display()))
        })?;

        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");
        let mut config: Self = match extension {
            "toml" => toml::from_str(&content)
                .map_err(|e| ServerError::config(format!("invalid TOML: {e}")))?,
            "json" => serde_json::from_str(&content)
                .map_err(|e| ServerError::config(format!("invalid JSON: {e}")))?,
            _ => {
                return Err(ServerError::config(format!(
                    "unsupported config format: {extension}"
                )))
            }
        };

        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        for function in &mut self.functions {
            if function.zip_file.is_relative() {
                function.zip_file = base.join(&function.zip_file);
            }
        }
    }

    /// Apply `NIMBUS_*` environment variable overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(addr) = std::env::var("NIMBUS_LISTEN_ADDR") {
            self.server.listen_addr = addr;
        }

        if let Ok(port) = std::env::var("NIMBUS_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }

        if let Ok(domain) = std::env::var("NIMBUS_DOMAIN") {
            self.server.domain = domain;
        }

        if let Ok(level) = std::env::var("NIMBUS_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(json) = std::env::var("NIMBUS_LOG_JSON") {
            self.logging.json_format = matches!(json.as_str(), "1" | "true" | "yes");
        }

        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ServerResult<()> {
        if self.server.domain.is_empty() {
            return Err(ServerError::config("server.domain is required"));
        }
        if self.server.listen_addr.parse::<std::net::IpAddr>().is_err() {
            return Err(ServerError::config(format!(
                "server.listen_addr {:?} is not an IP address",
                self.server.listen_addr
            )));
        }

        if let Some(message) = self.runtime.out_of_range() {
            return Err(ServerError::config(message));
        }

        let mut functions = HashSet::new();
        for function in &self.functions {
            if function.name.is_empty() {
                return Err(ServerError::config("function name is required"));
            }
            if let Some(timeout) = function.timeout_secs {
                if timeout == 0 || timeout > MAX_FUNCTION_TIMEOUT.as_secs() {
                    return Err(ServerError::config(format!(
                        "timeout_secs of function {} must be between 1 and {}",
                        function.name,
                        MAX_FUNCTION_TIMEOUT.as_secs()
                    )));
                }
            }
            if !functions.insert(function.name.as_str()) {
                return Err(ServerError::config(format!(
                    "function {} is defined twice",
                    function.name
                )));
            }
        }
        let known = |name: &str, context: &str| {
            if functions.contains(name) {
                Ok(())
            } else {
                Err(ServerError::config(format!(
                    "{context} refers to unknown function {name}"
                )))
            }
        };

        let mut apis = HashSet::new();
        for api in &self.apis {
            if api.id.is_empty() || api.id.contains('/') {
                return Err(ServerError::config(format!("invalid api id {:?}", api.id)));
            }
            if !apis.insert(api.id.as_str()) {
                return Err(ServerError::config(format!("api {} is defined twice", api.id)));
            }
            for route in &api.routes {
                let context = format!("route {} of api {}", route.path, api.id);
                known(&route.function, &context)?;
                if let Some(authorizer) = &route.authorizer {
                    known(&authorizer.function, &format!("authorizer of {context}"))?;
                }
            }
        }

        let mut albs = HashSet::new();
        for alb in &self.albs {
            if alb.name.is_empty() || alb.name.contains('.') {
                return Err(ServerError::config(format!(
                    "invalid load balancer name {:?}",
                    alb.name
                )));
            }
            if RESERVED_HOSTS.contains(&alb.name.as_str()) {
                return Err(ServerError::config(format!(
                    "load balancer name {} is reserved",
                    alb.name
                )));
            }
            if !albs.insert(alb.name.as_str()) {
                return Err(ServerError::config(format!(
                    "load balancer {} is defined twice",
                    alb.name
                )));
            }
            for rule in &alb.rules {
                let context = format!("rule {} of load balancer {}", rule.path, alb.name);
                match (&rule.function, &rule.fixed_response) {
                    (Some(function), None) => known(function, &context)?,
                    (None, Some(_)) => {}
                    _ => {
                        return Err(ServerError::config(format!(
                            "{context} needs exactly one of function or fixed_response"
                        )))
                    }
                }
            }
        }

        Ok(())
    }

    /// Settings for the identity provider, with the public URL parts taken
    /// from the server section.
    pub fn oidc_settings(&self) -> OidcSettings {
        OidcSettings {
            domain: self.server.domain.clone(),
            scheme: self.server.public_scheme.clone(),
            port: self.server.public_port.unwrap_or(self.server.port),
            ..self.oidc.clone()
        }
    }
}

/// Listener and public URL settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Address to bind to.
    pub listen_addr: String,
    /// Port to bind to.
    pub port: u16,
    /// Domain every emulated host lives under.
    pub domain: String,
    /// Scheme used in redirect URLs.
    pub public_scheme: String,
    /// Port used in redirect URLs when it differs from `port`.
    pub public_port: Option<u16>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1".to_string(),
            port: 8080,
            domain: "127.0.0.1.nip.io".to_string(),
            public_scheme: "http".to_string(),
            public_port: None,
        }
    }
}

/// A function to deploy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FunctionConfig {
    /// Function name.
    pub name: String,
    /// Deployment archive.
    pub zip_file: PathBuf,
    /// Timeout in seconds; the runtime default when unset.
    pub timeout_secs: Option<u64>,
    /// Environment variables; a variable without a value is skipped.
    pub environment: BTreeMap<String, Option<String>>,
}

impl FunctionConfig {
    /// The registry descriptor for this function.
    pub fn descriptor(&self) -> FunctionDescriptor {
        FunctionDescriptor {
            name: self.name.clone(),
            code: FunctionCode::ZipPath(self.zip_file.clone()),
            timeout: self.timeout_secs.map(Duration::from_secs),
            environment: self.environment.clone(),
        }
    }
}

/// A REST API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// API identifier; routes live under `/restapis/<id>`.
    pub id: String,
    /// Routes in match order.
    pub routes: Vec<ApiRouteConfig>,
}

/// One API route.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiRouteConfig {
    /// Path below the API prefix; may contain `{param}` segments.
    pub path: String,
    /// Accepted method; any when unset.
    pub method: Option<String>,
    /// Function to proxy to.
    pub function: String,
    /// Custom authorizer guarding the route.
    pub authorizer: Option<AuthorizerConfig>,
}

/// A load balancer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlbConfig {
    /// Name, also the host label.
    pub name: String,
    /// Rules in match order.
    pub rules: Vec<AlbRule>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_apigw::AuthorizerKind;
    use std::io::Write;

    const EXAMPLE: &str = r#"
[server]
port = 9000

[logging]
level = "debug"

[runtime]
enforce_deadline = true

[[functions]]
name = "pets"
zip_file = "build/pets.zip"
timeout_secs = 10
environment = { STAGE = "local" }

[[functions]]
name = "auth"
zip_file = "/srv/auth.zip"

[[apis]]
id = "abc123"

[[apis.routes]]
path = "/pets/{id}"
method = "GET"
function = "pets"
authorizer = { function = "auth", kind = "REQUEST", identity_source = "X-Api-Key" }

[[albs]]
name = "shop"

[[albs.rules]]
path = "/api/"
oidc = true
function = "pets"

[[albs.rules]]
path = "/health"
fixed_response = { body = "ok", content_type = "text/plain" }

[oidc]
cookie_max_age_secs = 600
"#;

    #[test]
    fn test_default_config() {
        let config = NimbusConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.domain, "127.0.0.1.nip.io");
        assert!(config.functions.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nimbus.toml");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(EXAMPLE.as_bytes())
            .unwrap();

        let config = NimbusConfig::from_file(&path).unwrap();
        config.validate().unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.logging.level, "debug");
        assert!(config.runtime.enforce_deadline);
        assert_eq!(config.functions[0].zip_file, dir.path().join("build/pets.zip"));
        assert_eq!(config.functions[1].zip_file, PathBuf::from("/srv/auth.zip"));
        assert_eq!(
            config.functions[0].descriptor().timeout,
            Some(Duration::from_secs(10))
        );

        let authorizer = config.apis[0].routes[0].authorizer.as_ref().unwrap();
        assert_eq!(authorizer.kind, AuthorizerKind::Request);
        assert_eq!(authorizer.identity_source, "X-Api-Key");
        assert_eq!(authorizer.ttl_secs, 300);

        assert!(config.albs[0].rules[0].oidc);
        assert_eq!(
            config.albs[0].rules[1].fixed_response.as_ref().unwrap().status_code,
            200
        );

        let oidc = config.oidc_settings();
        assert_eq!(oidc.cookie_max_age_secs, 600);
        assert_eq!(oidc.port, 9000);
        assert_eq!(oidc.code_ttl_secs, 60);
    }

    #[test]
    fn test_json_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nimbus.json");
        std::fs::write(&path, r#"{"server": {"domain": "localtest.me"}}"#).unwrap();
        let config = NimbusConfig::from_file(&path).unwrap();
        assert_eq!(config.server.domain, "localtest.me");

        let path = dir.path().join("nimbus.yaml");
        std::fs::write(&path, "server: {}").unwrap();
        assert!(NimbusConfig::from_file(&path).is_err());
    }

    #[test]
    fn test_unknown_authorizer_kind_is_rejected() {
        let toml = r#"
[[apis]]
id = "abc"
[[apis.routes]]
path = "/"
function = "f"
authorizer = { function = "a", kind = "cognito" }
"#;
        assert!(toml::from_str::<NimbusConfig>(toml).is_err());
    }

    #[test]
    fn test_validation() {
        let mut config: NimbusConfig = toml::from_str(EXAMPLE).unwrap();
        config.functions.push(config.functions[0].clone());
        assert!(config.validate().is_err());

        let mut config: NimbusConfig = toml::from_str(EXAMPLE).unwrap();
        config.apis[0].routes[0].function = "missing".to_string();
        assert!(config.validate().is_err());

        let mut config: NimbusConfig = toml::from_str(EXAMPLE).unwrap();
        config.albs[0].rules[0].function = None;
        config.albs[0].rules[0].fixed_response = None;
        assert!(config.validate().is_err());

        let mut config: NimbusConfig = toml::from_str(EXAMPLE).unwrap();
        config.albs[0].name = "auth".to_string();
        assert!(config.validate().is_err());

        let mut config: NimbusConfig = toml::from_str(EXAMPLE).unwrap();
        config.server.listen_addr = "localhost".to_string();
        assert!(config.validate().is_err());    }

    #[test]
    fn test_timeouts_must_be_in_range() {
        let mut config: NimbusConfig = toml::from_str(EXAMPLE).unwrap();
        config.functions[0].timeout_secs = Some(9_223_372_036_854_775_807);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("timeout_secs"), "{err}");

        let mut config: NimbusConfig = toml::from_str(EXAMPLE).unwrap();
        config.functions[0].timeout_secs = Some(0);
        assert!(config.validate().is_err());

        let mut config: NimbusConfig = toml::from_str(EXAMPLE).unwrap();
        config.functions[0].timeout_secs = Some(900);
        config.validate().unwrap();

        let mut config: NimbusConfig = toml::from_str(EXAMPLE).unwrap();
        config.runtime.ready_timeout_ms = u64::MAX;
        assert!(config.validate().is_err());

        let mut config: NimbusConfig = toml::from_str(EXAMPLE).unwrap();
        config.runtime.default_timeout_secs = u64::MAX;
        assert!(config.validate().is_err());
    }
}
