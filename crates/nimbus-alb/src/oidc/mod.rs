//! OIDC authentication emulation.
//!
//! The provider stands in for the identity provider a real load balancer
//! would redirect to. A login is a form where the caller chooses the subject
//! and every claim; submitting it issues a short-lived authorization code
//! and an access token. Exchanging the code at the load balancer's
//! `/oauth2/idpresponse` binds the token to a session cookie, and gated rules
//! then receive the same headers a real load balancer adds.
//!
//! State is process-lifetime only: codes live in an [`ExpiringCache`] and
//! token records in memory.

pub mod handlers;
pub mod session;
pub mod token;

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use nimbus_core::ExpiringCache;
use parking_lot::RwLock;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::AlbResult;
pub use session::{Session, SessionCodec, DEFAULT_COOKIE_MAX_AGE, SESSION_COOKIE};
pub use token::TokenSigner;

/// Length of authorization codes and access tokens.
pub const CREDENTIAL_LEN: usize = 32;

/// Lifetime of minted identity tokens.
pub const IDENTITY_TOKEN_TTL_SECS: i64 = 300;

/// Claims preloaded for a fixed access token.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MockTokenData {
    /// Introspection response claims.
    pub introspection: Map<String, Value>,
    /// Userinfo claims.
    pub userinfo: Map<String, Value>,
}

/// OIDC provider settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OidcSettings {
    /// Domain every emulated host lives under.
    pub domain: String,
    /// Scheme used in redirect URLs.
    pub scheme: String,
    /// Port used in redirect URLs; omitted when it is the scheme default.
    pub port: u16,
    /// Load balancer that receives logins without a return target.
    pub default_alb: String,
    /// Secret for the session cookie MAC; random per run when unset.
    pub cookie_secret: Option<String>,
    /// Cookie lifetime used when a login does not choose one, in seconds.
    pub cookie_max_age_secs: u64,
    /// Lifetime of authorization codes, in seconds.
    pub code_ttl_secs: u64,
    /// Introspection JSON pre-filled in the login form.
    pub default_introspection: String,
    /// Userinfo JSON pre-filled in the login form.
    pub default_userinfo: String,
    /// `iss` of identity tokens.
    pub issuer: String,
    /// `client` of identity tokens.
    pub client_id: String,
    /// `signer` of identity tokens.
    pub signer_arn: String,
    /// Key identifier of the signing key.
    pub key_id: String,
    /// Access tokens that are valid from start-up.
    pub mock_data: BTreeMap<String, MockTokenData>,
}

impl Default for OidcSettings {
    fn default() -> Self {
        Self {
            domain: "127.0.0.1.nip.io".to_string(),
            scheme: "http".to_string(),
            port: 8080,
            default_alb: "alb".to_string(),
            cookie_secret: None,
            cookie_max_age_secs: DEFAULT_COOKIE_MAX_AGE,
            code_ttl_secs: 60,
            default_introspection: r#"{"active": true,"scope": "openid"}"#.to_string(),
            default_userinfo: "{}".to_string(),
            issuer: "http://fake.alb.io".to_string(),
            client_id: "some-oidc-client".to_string(),
            signer_arn: "arn:aws:elasticloadbalancing:us-east-1:123456789012:loadbalancer/app/nimbus/0123456789abcdef".to_string(),
            key_id: "fakekey".to_string(),
            mock_data: BTreeMap::new(),
        }
    }
}

impl OidcSettings {
    /// Base URL of the emulated host `<label>.<domain>`.
    pub fn host_url(&self, label: &str) -> String {
        let default_port = match self.scheme.as_str() {
            "https" => 443,
            _ => 80,
        };
        if self.port == default_port {
            format!("{}://{label}.{}", self.scheme, self.domain)
        } else {
            format!("{}://{label}.{}:{}", self.scheme, self.domain, self.port)
        }
    }

    /// Base URL of the identity provider host.
    pub fn auth_url(&self) -> String {
        self.host_url("auth")
    }

    /// Authorization code lifetime.
    pub fn code_ttl(&self) -> Duration {
        Duration::from_secs(self.code_ttl_secs)
    }
}

/// What a login submission asks for.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Login {
    /// Subject.
    pub subject: String,
    /// Introspection claims.
    pub introspection: Map<String, Value>,
    /// Userinfo document exactly as submitted.
    pub userinfo: String,
    /// Cookie lifetime override, in seconds.
    pub cookie_max_age: Option<u64>,
}

/// Everything known about one access token.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenRecord {
    /// Subject the token was issued for.
    pub subject: String,
    /// Introspection response, `sub` included.
    pub introspection: Map<String, Value>,
    /// Userinfo document returned verbatim by the userinfo endpoint.
    pub userinfo: String,
    /// Identity token claims, `sub` included.
    pub claims: Map<String, Value>,
    /// Current signed identity token.
    pub identity_token: String,
    /// When `identity_token` expires, as Unix seconds.
    pub identity_expires_at: i64,
    /// Cookie lifetime chosen at login.
    pub cookie_max_age: Option<u64>,
}

/// Headers a gated request is forwarded with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OidcHeaders {
    /// `x-amzn-oidc-accesstoken`.
    pub access_token: String,
    /// `x-amzn-oidc-data`.
    pub data: String,
    /// `x-amzn-oidc-identity`.
    pub identity: String,
}

/// The emulated identity provider.
#[derive(Debug)]
pub struct OidcProvider {
    settings: OidcSettings,
    codes: ExpiringCache<String, String>,
    tokens: RwLock<HashMap<String, TokenRecord>>,
    subjects: RwLock<HashMap<String, String>>,
    signer: TokenSigner,
    sessions: SessionCodec,
}

impl OidcProvider {
    /// Creates a provider with a fresh signing key and the configured
    /// pre-seeded tokens.
    pub fn new(settings: OidcSettings) -> AlbResult<Self> {
        let sessions = SessionCodec::new(settings.cookie_secret.as_deref())?;
        let signer = TokenSigner::generate(settings.key_id.clone());
        let provider = Self {
            codes: ExpiringCache::new(),
            tokens: RwLock::new(HashMap::new()),
            subjects: RwLock::new(HashMap::new()),
            signer,
            sessions,
            settings,
        };

        for (token, data) in &provider.settings.mock_data {
            let subject = data
                .userinfo
                .get("sub")
                .and_then(Value::as_str)
                .unwrap_or(token)
                .to_string();
            let userinfo = serde_json::to_string(&data.userinfo)?;
            let record = provider.record(
                subject,
                data.introspection.clone(),
                userinfo,
                data.userinfo.clone(),
                None,
            )?;
            provider.tokens.write().insert(token.clone(), record);
        }
        tracing::info!(
            key_id = %provider.settings.key_id,
            preloaded_tokens = provider.settings.mock_data.len(),
            "created oidc provider"
        );
        Ok(provider)
    }

    /// Provider settings.
    pub fn settings(&self) -> &OidcSettings {
        &self.settings
    }

    /// Identity token signer.
    pub fn signer(&self) -> &TokenSigner {
        &self.signer
    }

    /// Session cookie codec.
    pub fn sessions(&self) -> &SessionCodec {
        &self.sessions
    }

    /// Records a login and issues an authorization code for it.
    ///
    /// Returns the code and the access token it will exchange for. Any
    /// earlier token of the same subject stops being valid.
    pub fn login(&self, login: Login) -> AlbResult<(String, String)> {
        let Login {
            subject,
            mut introspection,
            userinfo,
            cookie_max_age,
        } = login;

        introspection.insert("sub".to_string(), Value::String(subject.clone()));
        let mut claims: Map<String, Value> = serde_json::from_str(&userinfo).unwrap_or_default();
        claims.insert("sub".to_string(), Value::String(subject.clone()));

        let record = self.record(subject.clone(), introspection, userinfo, claims, cookie_max_age)?;
        let token = random_credential();
        let code = random_credential();

        // Lock order: subjects, then tokens.
        {
            let mut subjects = self.subjects.write();
            let mut tokens = self.tokens.write();
            if let Some(previous) = subjects.insert(subject.clone(), token.clone()) {
                tokens.remove(&previous);
            }
            tokens.insert(token.clone(), record);
        }
        self.codes
            .set(code.clone(), token.clone(), self.settings.code_ttl());

        tracing::info!(sub = %subject, "issued authorization code");
        Ok((code, token))
    }

    /// Exchanges an authorization code for its access token.
    ///
    /// Codes are single use; an unknown, expired or already exchanged code
    /// yields `None`.
    pub fn exchange(&self, code: &str) -> Option<String> {
        let token = self.codes.take(code);
        tracing::info!(found = token.is_some(), "authorization code exchange");
        token
    }

    /// Looks up an access token.
    pub fn token(&self, token: &str) -> Option<TokenRecord> {
        self.tokens.read().get(token).cloned()
    }

    /// Headers for a request made with `token`, re-minting the identity
    /// token once it has expired.
    pub fn headers(&self, token: &str) -> AlbResult<Option<OidcHeaders>> {
        let now = chrono::Utc::now().timestamp();
        let mut tokens = self.tokens.write();
        let Some(record) = tokens.get_mut(token) else {
            return Ok(None);
        };
        if record.identity_expires_at <= now {
            let (identity_token, expires_at) = self.mint(&record.claims)?;
            record.identity_token = identity_token;
            record.identity_expires_at = expires_at;
            tracing::debug!(sub = %record.subject, "re-minted identity token");
        }
        Ok(Some(OidcHeaders {
            access_token: token.to_string(),
            data: record.identity_token.clone(),
            identity: record.subject.clone(),
        }))
    }

    /// Cookie lifetime for a session bound to `token`.
    pub fn cookie_max_age(&self, token: &str) -> u64 {
        self.tokens
            .read()
            .get(token)
            .and_then(|record| record.cookie_max_age)
            .unwrap_or(self.settings.cookie_max_age_secs)
    }

    fn record(
        &self,
        subject: String,
        introspection: Map<String, Value>,
        userinfo: String,
        claims: Map<String, Value>,
        cookie_max_age: Option<u64>,
    ) -> AlbResult<TokenRecord> {
        let (identity_token, identity_expires_at) = self.mint(&claims)?;
        Ok(TokenRecord {
            subject,
            introspection,
            userinfo,
            claims,
            identity_token,
            identity_expires_at,
            cookie_max_age,
        })
    }

    fn mint(&self, claims: &Map<String, Value>) -> AlbResult<(String, i64)> {
        let expires_at = chrono::Utc::now().timestamp() + IDENTITY_TOKEN_TTL_SECS;
        let mut header = Map::new();
        header.insert("alg".to_string(), Value::from("ES256"));
        header.insert("client".to_string(), Value::from(self.settings.client_id.as_str()));
        header.insert("exp".to_string(), Value::from(expires_at));
        header.insert("iss".to_string(), Value::from(self.settings.issuer.as_str()));
        header.insert("kid".to_string(), Value::from(self.signer.key_id()));
        header.insert("signer".to_string(), Value::from(self.settings.signer_arn.as_str()));
        header.insert("typ".to_string(), Value::from("JWT"));
        Ok((self.signer.sign(&header, claims)?, expires_at))
    }
}

/// A random alphanumeric credential from the OS random source.
pub fn random_credential() -> String {
    rand::rngs::OsRng
        .sample_iter(&Alphanumeric)
        .take(CREDENTIAL_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn login(subject: &str) -> Login {
        Login {
            subject: subject.to_string(),
            introspection: Map::new(),
            userinfo: r#"{"email":"user@test.io"}"#.to_string(),
            cookie_max_age: None,
        }
    }

    #[test]
    fn test_random_credential() {
        let a = random_credential();
        assert_eq!(a.len(), CREDENTIAL_LEN);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, random_credential());
    }

    #[test]
    fn test_code_is_single_use() {
        let provider = OidcProvider::new(OidcSettings::default()).unwrap();
        let (code, token) = provider.login(login("user@test.io")).unwrap();

        assert_eq!(provider.exchange(&code), Some(token));
        assert_eq!(provider.exchange(&code), None);
        assert_eq!(provider.exchange("never-issued"), None);
    }

    #[test]
    fn test_new_login_supersedes_previous_token() {
        let provider = OidcProvider::new(OidcSettings::default()).unwrap();
        let (_, first) = provider.login(login("user@test.io")).unwrap();
        let (_, second) = provider.login(login("user@test.io")).unwrap();

        assert!(provider.token(&first).is_none());
        let record = provider.token(&second).unwrap();
        assert_eq!(record.claims["sub"], "user@test.io");
        assert_eq!(record.claims["email"], "user@test.io");
        assert_eq!(record.introspection["sub"], "user@test.io");
    }

    #[test]
    fn test_headers_carry_identity_token() {
        let provider = OidcProvider::new(OidcSettings::default()).unwrap();
        let (_, token) = provider.login(login("user@test.io")).unwrap();

        let headers = provider.headers(&token).unwrap().unwrap();
        assert_eq!(headers.access_token, token);
        assert_eq!(headers.identity, "user@test.io");
        let (header, claims) =
            token::verify(&headers.data, &provider.signer().verifying_key()).unwrap();
        assert_eq!(header["alg"], "ES256");
        assert_eq!(header["kid"], "fakekey");
        assert_eq!(header["typ"], "JWT");
        assert_eq!(claims["sub"], "user@test.io");

        assert!(provider.headers("unknown").unwrap().is_none());
    }

    #[test]
    fn test_expired_identity_token_is_reminted() {
        let provider = OidcProvider::new(OidcSettings::default()).unwrap();
        let (_, token) = provider.login(login("user@test.io")).unwrap();
        provider.tokens.write().get_mut(&token).unwrap().identity_expires_at = 0;

        let headers = provider.headers(&token).unwrap().unwrap();
        let record = provider.token(&token).unwrap();
        assert!(record.identity_expires_at > 0);
        assert_eq!(headers.data, record.identity_token);
    }

    #[test]
    fn test_mock_data_is_preloaded() {
        let mut settings = OidcSettings::default();
        settings.mock_data.insert(
            "static-token".to_string(),
            MockTokenData {
                introspection: json!({"active": true}).as_object().unwrap().clone(),
                userinfo: json!({"sub": "svc"}).as_object().unwrap().clone(),
            },
        );
        let provider = OidcProvider::new(settings).unwrap();
        let record = provider.token("static-token").unwrap();
        assert_eq!(record.subject, "svc");
        assert_eq!(record.userinfo, r#"{"sub":"svc"}"#);
    }

    #[test]
    fn test_host_url() {
        let mut settings = OidcSettings::default();
        assert_eq!(settings.auth_url(), "http://auth.127.0.0.1.nip.io:8080");
        settings.port = 80;
        assert_eq!(settings.host_url("alb"), "http://alb.127.0.0.1.nip.io");
    }
}
