//! Helpers for reading cookies, forms, queries and headers out of a
//! buffered request, and for writing `Set-Cookie` headers.
//!
//! # Example
//!
//! ```rust
//! use nimbus_core::extract::{Cookies, SetCookie};
//!
//! let cookies = Cookies::parse("session=abc123; theme=dark");
//! assert_eq!(cookies.get("session"), Some("abc123"));
//!
//! let header = SetCookie::new("session", "abc123")
//!     .http_only(true)
//!     .path("/")
//!     .max_age_secs(300)
//!     .to_header_value();
//! assert_eq!(header, "session=abc123; Path=/; Max-Age=300; HttpOnly");
//! ```

use std::collections::HashMap;

use ::http::{header, HeaderMap, Uri};
use serde::de::DeserializeOwned;

use crate::error::{ExtractionError, ExtractionResult, ExtractionSource};
use crate::events::{MultiStringMap, StringMap};

/// Default maximum body size for form extraction (1 MB).
pub const DEFAULT_MAX_FORM_SIZE: usize = 1024 * 1024;

/// Cookies parsed from a `Cookie` header.
#[derive(Debug, Clone, Default)]
pub struct Cookies {
    cookies: HashMap<String, String>,
}

impl Cookies {
    /// Parse cookies from a `Cookie` header value.
    pub fn parse(header_value: &str) -> Self {
        let mut cookies = HashMap::new();

        for cookie in header_value.split(';') {
            let cookie = cookie.trim();
            if let Some((name, value)) = cookie.split_once('=') {
                let value = value.trim().trim_matches('"');
                cookies.insert(name.trim().to_string(), value.to_string());
            }
        }

        Self { cookies }
    }

    /// Collect cookies from every `Cookie` header in `headers`.
    ///
    /// Headers that are not valid UTF-8 are skipped.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut cookies = HashMap::new();
        for value in headers.get_all(header::COOKIE) {
            if let Ok(value) = value.to_str() {
                cookies.extend(Self::parse(value).cookies);
            }
        }
        Self { cookies }
    }

    /// Get a cookie value by name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    /// Number of cookies.
    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    /// Returns `true` if no cookie was sent.
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }
}

/// Builder for a `Set-Cookie` response header.
#[derive(Debug, Clone)]
pub struct SetCookie {
    name: String,
    value: String,
    path: Option<String>,
    domain: Option<String>,
    max_age: Option<u64>,
    http_only: bool,
}

impl SetCookie {
    /// Create a new Set-Cookie builder.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            path: None,
            domain: None,
            max_age: None,
            http_only: false,
        }
    }

    /// Create a cookie that removes `name` from the client (`Max-Age=0`).
    pub fn remove(name: impl Into<String>) -> Self {
        Self::new(name, "").max_age_secs(0)
    }

    /// Set the Path attribute.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Set the Domain attribute, sharing the cookie with every host below
    /// `domain`.
    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Set the Max-Age attribute in seconds.
    pub fn max_age_secs(mut self, seconds: u64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    /// Set the `HttpOnly` attribute.
    pub fn http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    /// Convert to a Set-Cookie header value.
    pub fn to_header_value(&self) -> String {
        let mut parts = vec![format!("{}={}", self.name, self.value)];

        if let Some(ref path) = self.path {
            parts.push(format!("Path={path}"));
        }
        if let Some(ref domain) = self.domain {
            parts.push(format!("Domain={domain}"));
        }
        if let Some(max_age) = self.max_age {
            parts.push(format!("Max-Age={max_age}"));
        }
        if self.http_only {
            parts.push("HttpOnly".to_string());
        }

        parts.join("; ")
    }
}

/// Deserialize a URL-encoded form body.
pub fn parse_form<T: DeserializeOwned>(body: &[u8]) -> ExtractionResult<T> {
    if body.len() > DEFAULT_MAX_FORM_SIZE {
        return Err(ExtractionError::invalid(
            ExtractionSource::Form,
            format!("body exceeds {DEFAULT_MAX_FORM_SIZE} bytes"),
        ));
    }
    serde_urlencoded::from_bytes(body)
        .map_err(|err| ExtractionError::invalid(ExtractionSource::Form, err.to_string()))
}

/// Deserialize the query string of `uri`; a missing query is treated as empty.
pub fn parse_query<T: DeserializeOwned>(uri: &Uri) -> ExtractionResult<T> {
    serde_urlencoded::from_str(uri.query().unwrap_or(""))
        .map_err(|err| ExtractionError::invalid(ExtractionSource::Query, err.to_string()))
}

/// Query parameters in both single- and multi-valued form.
///
/// The single-valued map joins repeated values with a space.
pub fn query_maps(uri: &Uri) -> (StringMap, MultiStringMap) {
    let pairs: Vec<(String, String)> =
        serde_urlencoded::from_str(uri.query().unwrap_or("")).unwrap_or_default();

    let mut multi: MultiStringMap = HashMap::new();
    for (name, value) in pairs {
        multi.entry(name).or_default().push(value);
    }
    let single = multi
        .iter()
        .map(|(name, values)| (name.clone(), values.join(" ")))
        .collect();
    (single, multi)
}

/// Headers in both single- and multi-valued form.
///
/// The single-valued map keeps the first value. Values that are not valid
/// UTF-8 are skipped.
pub fn header_maps(headers: &HeaderMap) -> (StringMap, MultiStringMap) {
    let mut single = HashMap::new();
    let mut multi: MultiStringMap = HashMap::new();
    for (name, value) in headers {
        let Ok(value) = value.to_str() else {
            continue;
        };
        single
            .entry(name.as_str().to_string())
            .or_insert_with(|| value.to_string());
        multi
            .entry(name.as_str().to_string())
            .or_default()
            .push(value.to_string());
    }
    (single, multi)
}

/// Token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() {
        Some(token.trim())
    } else {
        None
    }
}
