//! Client-side session cookie.
//!
//! The session lives entirely in the `nimbus_session` cookie as
//! `base64url(json) "." base64url(hmac-sha256(json))`. A cookie whose MAC
//! does not verify is treated as absent.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{AlbError, AlbResult};

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "nimbus_session";

/// Cookie lifetime used when the login did not ask for one, in seconds.
pub const DEFAULT_COOKIE_MAX_AGE: u64 = 300;

const KEY_BYTES: usize = 32;

type HmacSha256 = Hmac<Sha256>;

/// Contents of the session cookie.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Set once a code exchange succeeded.
    pub authenticated: bool,
    /// Access token the session is bound to.
    pub token: String,
}

impl Session {
    /// An authenticated session bound to `token`.
    pub fn authenticated(token: impl Into<String>) -> Self {
        Self {
            authenticated: true,
            token: token.into(),
        }
    }
}

/// Seals and opens session cookies.
#[derive(Clone)]
pub struct SessionCodec {
    key: Vec<u8>,
}

impl std::fmt::Debug for SessionCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCodec").finish_non_exhaustive()
    }
}

impl SessionCodec {
    /// Codec keyed with `secret`; a random key is generated when `None`.
    pub fn new(secret: Option<&str>) -> AlbResult<Self> {
        let key = match secret {
            Some(secret) if !secret.is_empty() => secret.as_bytes().to_vec(),
            Some(_) => return Err(AlbError::config("cookie secret must not be empty")),
            None => {
                let mut key = vec![0_u8; KEY_BYTES];
                rand::rngs::OsRng.fill_bytes(&mut key);
                key
            }
        };
        Ok(Self { key })
    }

    /// Serializes and signs a session.
    pub fn seal(&self, session: &Session) -> AlbResult<String> {
        let body = serde_json::to_vec(session)?;
        let tag = self.mac(&body)?.finalize().into_bytes();
        Ok(format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&body),
            URL_SAFE_NO_PAD.encode(tag)
        ))
    }

    /// Verifies and deserializes a cookie value.
    pub fn open(&self, value: &str) -> Option<Session> {
        let (body, tag) = value.split_once('.')?;
        let body = URL_SAFE_NO_PAD.decode(body).ok()?;
        let tag = URL_SAFE_NO_PAD.decode(tag).ok()?;
        self.mac(&body).ok()?.verify_slice(&tag).ok()?;
        serde_json::from_slice(&body).ok()
    }

    fn mac(&self, body: &[u8]) -> AlbResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|err| AlbError::config(format!("invalid cookie key: {err}")))?;
        mac.update(body);
        Ok(mac)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_and_open() {
        let codec = SessionCodec::new(Some("secret")).unwrap();
        let sealed = codec.seal(&Session::authenticated("tok")).unwrap();
        assert_eq!(codec.open(&sealed), Some(Session::authenticated("tok")));
    }

    #[test]
    fn test_tampered_cookie_is_rejected() {
        let codec = SessionCodec::new(Some("secret")).unwrap();
        let sealed = codec.seal(&Session::authenticated("tok")).unwrap();
        let (_, tag) = sealed.split_once('.').unwrap();
        let forged = URL_SAFE_NO_PAD.encode(br#"{"authenticated":true,"token":"other"}"#);

        assert_eq!(codec.open(&format!("{forged}.{tag}")), None);
        assert_eq!(codec.open("garbage"), None);
        assert_eq!(codec.open(&URL_SAFE_NO_PAD.encode(b"{}")), None);
    }

    #[test]
    fn test_keys_differ() {
        let sealed = SessionCodec::new(None)
            .unwrap()
            .seal(&Session::authenticated("tok"))
            .unwrap();
        assert_eq!(SessionCodec::new(None).unwrap().open(&sealed), None);
        assert!(SessionCodec::new(Some("")).is_err());
    }
}
