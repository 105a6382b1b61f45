//! HTTP endpoints of the emulated identity provider, the code-exchange
//! callback and the session gate.

use std::sync::Arc;

use nimbus_core::extract::{bearer_token, parse_form, parse_query, Cookies, SetCookie};
use nimbus_core::http::{
    content, header, json, reason, redirect_found, BoxHandler, HeaderValue, Method, StatusCode,
};
use nimbus_core::{ExtractionError, ExtractionSource, HttpRequest, HttpResponse, Route, RouteMatch};
use serde::Deserialize;
use serde_json::{json as json_value, Map, Value};
use url::form_urlencoded;
use url::Url;

use super::{Login, OidcHeaders, OidcProvider, Session, SESSION_COOKIE};
use crate::error::{AlbError, AlbResult};

/// Header carrying the raw access token.
pub const ACCESS_TOKEN_HEADER: &str = "x-amzn-oidc-accesstoken";
/// Header carrying the signed identity token.
pub const DATA_HEADER: &str = "x-amzn-oidc-data";
/// Header carrying the subject.
pub const IDENTITY_HEADER: &str = "x-amzn-oidc-identity";

/// Path of the code-exchange callback on every load balancer host.
pub const IDP_RESPONSE_PATH: &str = "/oauth2/idpresponse";

const LOGIN_FORM: &str = r#"<!DOCTYPE html>
<html>
  <head>
    <meta charset="utf-8">
    <title>Login</title>
  </head>
  <body>
    <form action="/submit" method="POST">
      <label for="sub">SUB:</label>
      <textarea id="sub" name="sub">{sub}</textarea>
      <label for="introspection">INTROSPECTION:</label>
      <textarea id="introspection" name="introspection">{introspection}</textarea>
      <label for="userinfo">USERINFO:</label>
      <textarea id="userinfo" name="userinfo">{userinfo}</textarea>
      <label for="cookie_max_age">COOKIE MAX AGE:</label>
      <input id="cookie_max_age" name="cookie_max_age" value="">
      <input type="hidden" name="redirect" value="{redirect}">
      <button type="submit">Submit</button>
    </form>
  </body>
</html>
"#;

/// Routes served on the identity provider host.
pub fn auth_routes(provider: &Arc<OidcProvider>) -> Vec<Route> {
    vec![
        Route::new("/login", endpoint(provider, login)).method(Method::GET),
        Route::new("/submit", endpoint(provider, submit)).method(Method::POST),
        Route::new("/end", endpoint(provider, end_session)).method(Method::GET),
        Route::new("/userinfo", endpoint(provider, userinfo)).method(Method::GET),
        Route::new("/introspection", endpoint(provider, introspection)).method(Method::POST),
        Route::new("/keys/{kid}", endpoint(provider, public_key)).method(Method::GET),
    ]
}

/// The code-exchange callback for the load balancer `alb`.
pub fn idp_response_route(provider: &Arc<OidcProvider>, alb: &str) -> Route {
    let alb = alb.to_string();
    let handler = endpoint(provider, move |provider, request| {
        idp_response(provider, &alb, &request)
    });
    Route::new(IDP_RESPONSE_PATH, handler).method(Method::GET)
}

/// Wraps `inner` so it only runs for requests with an authenticated
/// session, adding the identity headers before forwarding.
///
/// Requests without a session are redirected to the login page with the
/// original URL as the return target.
pub fn gate(provider: Arc<OidcProvider>, inner: BoxHandler) -> BoxHandler {
    Arc::new(move |mut request: HttpRequest| {
        let provider = Arc::clone(&provider);
        let inner = Arc::clone(&inner);
        async move {
            for name in [ACCESS_TOKEN_HEADER, DATA_HEADER, IDENTITY_HEADER] {
                request.headers_mut().remove(name);
            }

            let headers = match session_token(&provider, &request)
                .map(|token| provider.headers(&token))
                .transpose()
            {
                Ok(Some(Some(headers))) => headers,
                Ok(_) => {
                    let target = request_url(&request);
                    tracing::debug!(target = %target, "no session, redirecting to login");
                    return redirect_found(&login_url(&provider, &target));
                }
                Err(err) => return err_response(err),
            };

            insert_oidc_headers(&mut request, &headers);
            inner.call(request).await
        }
    })
}

fn endpoint<F>(provider: &Arc<OidcProvider>, f: F) -> BoxHandler
where
    F: Fn(&OidcProvider, HttpRequest) -> HttpResponse + Send + Sync + 'static,
{
    let provider = Arc::clone(provider);
    Arc::new(move |request: HttpRequest| std::future::ready(f(provider.as_ref(), request)))
}

fn err_response(err: AlbError) -> HttpResponse {
    tracing::warn!(error = %err, category = err.category(), "oidc request failed");
    err.into_response()
}

fn unauthorized() -> HttpResponse {
    json(StatusCode::UNAUTHORIZED, &json_value!({"message": "Unauthorized"}))
}

// ============================================================================
// Identity provider host
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct LoginQuery {
    #[serde(default)]
    redirect: String,
}

fn login(provider: &OidcProvider, request: HttpRequest) -> HttpResponse {
    let query: LoginQuery = match parse_query(request.uri()) {
        Ok(query) => query,
        Err(err) => return err_response(err.into()),
    };
    let settings = provider.settings();
    let page = LOGIN_FORM
        .replace("{sub}", "user@test.io")
        .replace("{introspection}", &escape_html(&settings.default_introspection))
        .replace("{userinfo}", &escape_html(&settings.default_userinfo))
        .replace("{redirect}", &escape_html(&query.redirect));
    nimbus_core::http::html(page)
}

#[derive(Debug, Deserialize)]
struct SubmitForm {
    sub: Option<String>,
    #[serde(default)]
    introspection: String,
    #[serde(default)]
    userinfo: String,
    #[serde(default)]
    cookie_max_age: String,
    #[serde(default)]
    redirect: String,
}

fn submit(provider: &OidcProvider, request: HttpRequest) -> HttpResponse {
    match try_submit(provider, &request) {
        Ok(location) => redirect_found(&location),
        Err(err) => err_response(err),
    }
}

fn try_submit(provider: &OidcProvider, request: &HttpRequest) -> AlbResult<String> {
    let form: SubmitForm = parse_form(request.body())?;
    let subject = form
        .sub
        .map(|sub| sub.trim().to_string())
        .filter(|sub| !sub.is_empty())
        .ok_or_else(|| ExtractionError::missing(ExtractionSource::Form, "sub"))?;

    let cookie_max_age = match form.cookie_max_age.trim() {
        "" => None,
        raw => Some(raw.parse::<u64>().map_err(|err| {
            ExtractionError::invalid(ExtractionSource::Form, format!("cookie_max_age: {err}"))
        })?),
    };
    let introspection: Map<String, Value> =
        serde_json::from_str(&form.introspection).unwrap_or_default();

    let (code, _) = provider.login(Login {
        subject,
        introspection,
        userinfo: form.userinfo,
        cookie_max_age,
    })?;

    let settings = provider.settings();
    let alb = alb_label(provider, &form.redirect).unwrap_or_else(|| settings.default_alb.clone());
    let query = form_urlencoded::Serializer::new(String::new())
        .append_pair("code", &code)
        .append_pair("state", &form.redirect)
        .finish();
    Ok(format!("{}{IDP_RESPONSE_PATH}?{query}", settings.host_url(&alb)))
}

#[derive(Debug, Default, Deserialize)]
struct EndQuery {
    post_logout_redirect_uri: Option<String>,
}

fn end_session(provider: &OidcProvider, request: HttpRequest) -> HttpResponse {
    let target = match parse_query::<EndQuery>(request.uri()) {
        Ok(EndQuery {
            post_logout_redirect_uri: Some(target),
        }) if !target.is_empty() => target,
        Ok(_) => {
            return err_response(
                ExtractionError::missing(ExtractionSource::Query, "post_logout_redirect_uri")
                    .into(),
            )
        }
        Err(err) => return err_response(err.into()),
    };

    let mut response = redirect_found(&target);
    set_cookie(
        &mut response,
        &session_cookie(provider, String::new()).max_age_secs(0),
    );
    response
}

fn userinfo(provider: &OidcProvider, request: HttpRequest) -> HttpResponse {
    let Some(record) = bearer_token(request.headers()).and_then(|token| provider.token(token))
    else {
        return unauthorized();
    };
    content(StatusCode::OK, "application/json", record.userinfo)
}

#[derive(Debug, Default, Deserialize)]
struct IntrospectionForm {
    token: Option<String>,
}

fn introspection(provider: &OidcProvider, request: HttpRequest) -> HttpResponse {
    let form: IntrospectionForm = match parse_form(request.body()) {
        Ok(form) => form,
        Err(err) => return err_response(err.into()),
    };
    match form.token.and_then(|token| provider.token(&token)) {
        Some(record) => json(StatusCode::OK, &record.introspection),
        None => json(StatusCode::OK, &json_value!({"active": false})),
    }
}

fn public_key(provider: &OidcProvider, request: HttpRequest) -> HttpResponse {
    let kid = request
        .extensions()
        .get::<RouteMatch>()
        .and_then(|route| route.param("kid"));
    if kid != Some(provider.signer().key_id()) {
        return reason(StatusCode::NOT_FOUND);
    }
    match provider.signer().public_key_pem() {
        Ok(pem) => content(StatusCode::OK, "application/x-pem-file", pem),
        Err(err) => err_response(err),
    }
}

// ============================================================================
// Load balancer host
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct IdpResponseQuery {
    #[serde(default)]
    code: String,
    #[serde(default)]
    state: String,
}

fn idp_response(provider: &OidcProvider, alb: &str, request: &HttpRequest) -> HttpResponse {
    let query: IdpResponseQuery = parse_query(request.uri()).unwrap_or_default();
    let target = safe_target(provider, alb, &query.state);

    let Some(token) = provider.exchange(&query.code) else {
        return redirect_found(&login_url(provider, &target));
    };

    let sealed = match provider.sessions().seal(&Session::authenticated(token.as_str())) {
        Ok(sealed) => sealed,
        Err(err) => return err_response(err),
    };
    let cookie = session_cookie(provider, sealed)
        .max_age_secs(provider.cookie_max_age(&token))
        .http_only(true);

    let mut response = redirect_found(&target);
    set_cookie(&mut response, &cookie);
    response
}

// ============================================================================
// Helpers
// ============================================================================

fn session_token(provider: &OidcProvider, request: &HttpRequest) -> Option<String> {
    let cookies = Cookies::from_headers(request.headers());
    let session = provider.sessions().open(cookies.get(SESSION_COOKIE)?)?;
    session.authenticated.then_some(session.token)
}

fn insert_oidc_headers(request: &mut HttpRequest, oidc: &OidcHeaders) {
    for (name, value) in [
        (ACCESS_TOKEN_HEADER, &oidc.access_token),
        (DATA_HEADER, &oidc.data),
        (IDENTITY_HEADER, &oidc.identity),
    ] {
        match HeaderValue::from_str(value) {
            Ok(value) => {
                request
                    .headers_mut()
                    .insert(header::HeaderName::from_static(name), value);
            }
            Err(_) => tracing::warn!(header = name, "dropping header with invalid value"),
        }
    }
}

/// The session cookie, scoped to the whole domain so that the identity
/// provider host can expire what a load balancer host issued.
fn session_cookie(provider: &OidcProvider, value: String) -> SetCookie {
    SetCookie::new(SESSION_COOKIE, value)
        .path("/")
        .domain(provider.settings().domain.as_str())
}

fn set_cookie(response: &mut HttpResponse, cookie: &SetCookie) {
    if let Ok(value) = HeaderValue::from_str(&cookie.to_header_value()) {
        response.headers_mut().append(header::SET_COOKIE, value);
    }
}

fn login_url(provider: &OidcProvider, target: &str) -> String {
    let query = form_urlencoded::Serializer::new(String::new())
        .append_pair("redirect", target)
        .finish();
    format!("{}/login?{query}", provider.settings().auth_url())
}

/// Full URL of `request` as the client addressed it.
fn request_url(request: &HttpRequest) -> String {
    let path = request
        .uri()
        .path_and_query()
        .map_or("/", |path| path.as_str());
    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|host| host.to_str().ok())
        .or_else(|| request.uri().authority().map(|authority| authority.as_str()));
    match host {
        Some(host) => {
            let scheme = request.uri().scheme_str().unwrap_or("http");
            format!("{scheme}://{host}{path}")
        }
        None => path.to_string(),
    }
}

/// Label of the emulated host `target` points at, when it is one.
fn alb_label(provider: &OidcProvider, target: &str) -> Option<String> {
    let url = Url::parse(target).ok()?;
    let host = url.host_str()?;
    let label = host.strip_suffix(&format!(".{}", provider.settings().domain))?;
    if label.is_empty() || label.contains('.') || label == "auth" || label == "api" {
        return None;
    }
    Some(label.to_string())
}

/// The return target after a code exchange.
///
/// Relative paths and URLs on the emulator domain are honoured; anything
/// else goes to the root of the load balancer.
fn safe_target(provider: &OidcProvider, alb: &str, state: &str) -> String {
    let settings = provider.settings();
    let root = format!("{}/", settings.host_url(alb));
    if state.starts_with('/') && !state.starts_with("//") && !state.starts_with("/\\") {
        return format!("{}{state}", settings.host_url(alb));
    }
    match Url::parse(state) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => match url.host_str() {
            Some(host)
                if host == settings.domain
                    || host.ends_with(&format!(".{}", settings.domain)) =>
            {
                state.to_string()
            }
            _ => root,
        },
        _ => root,
    }
}

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}
