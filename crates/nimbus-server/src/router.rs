//! Host and path routing.
//!
//! Every front end mounts its routes under a host label: `api` for the REST
//! APIs, `auth` for the identity provider and one label per load balancer.
//! A request for `alb.127.0.0.1.nip.io` is dispatched against the routes
//! mounted under `alb`.
//!
//! Within a host, routes are tried in registration order and the first
//! route whose path, headers and method all match wins. If some route
//! matched everything but the method the answer is `405`, otherwise `404`.

use std::collections::HashMap;

use nimbus_core::http::{self, header, StatusCode};
use nimbus_core::{HttpRequest, HttpResponse, Route, RouteMatch};

/// Dispatches requests by host label, then by path.
#[derive(Debug, Default)]
pub struct Router {
    domain: String,
    hosts: HashMap<String, Vec<Route>>,
}

impl Router {
    /// Creates a router for hosts below `domain`.
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into().to_ascii_lowercase(),
            hosts: HashMap::new(),
        }
    }

    /// Domain the host labels live under.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Appends routes to the host `label`.
    pub fn mount(&mut self, label: impl Into<String>, routes: Vec<Route>) -> &mut Self {
        let label = label.into().to_ascii_lowercase();
        tracing::debug!(host = %label, routes = routes.len(), "mounting routes");
        self.hosts.entry(label).or_default().extend(routes);
        self
    }

    /// Host labels with at least one route, sorted.
    pub fn labels(&self) -> Vec<&str> {
        let mut labels: Vec<_> = self.hosts.keys().map(String::as_str).collect();
        labels.sort_unstable();
        labels
    }

    /// Resolves the host label of a request, if it is below the domain.
    pub fn host_label(&self, request: &HttpRequest) -> Option<String> {
        let host = request_host(request)?;
        let host = strip_port(&host).to_ascii_lowercase();
        host.strip_suffix(&self.domain)
            .and_then(|rest| rest.strip_suffix('.'))
            .filter(|label| !label.is_empty())
            .map(str::to_string)
    }

    /// Routes a request to its handler.
    pub async fn dispatch(&self, mut request: HttpRequest) -> HttpResponse {
        let Some(routes) = self
            .host_label(&request)
            .and_then(|label| self.hosts.get(&label))
        else {
            return http::reason(StatusCode::NOT_FOUND);
        };

        let mut method_mismatch = false;
        for route in routes {
            let Some(params) = match_path(&route.path, route.prefix, request.uri().path()) else {
                continue;
            };
            if !headers_match(route, &request) {
                continue;
            }
            if !route.methods.is_empty() && !route.methods.contains(request.method()) {
                method_mismatch = true;
                continue;
            }

            request.extensions_mut().insert(RouteMatch {
                template: route.path.clone(),
                params,
            });
            return route.handler.call(request).await;
        }

        if method_mismatch {
            http::reason(StatusCode::METHOD_NOT_ALLOWED)
        } else {
            http::reason(StatusCode::NOT_FOUND)
        }
    }
}

fn request_host(request: &HttpRequest) -> Option<String> {
    request
        .headers()
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| request.uri().host().map(str::to_string))
}

fn strip_port(host: &str) -> &str {
    match host.rsplit_once(':') {
        Some((name, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => {
            name
        }
        _ => host,
    }
}

fn headers_match(route: &Route, request: &HttpRequest) -> bool {
    route.headers.iter().all(|(name, expected)| {
        request
            .headers()
            .get_all(name.as_str())
            .iter()
            .any(|value| value.to_str().is_ok_and(|value| value == expected))
    })
}

fn segments(path: &str) -> Vec<&str> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        Vec::new()
    } else {
        trimmed.split('/').collect()
    }
}

/// Matches `path` against a route template, returning captured parameters.
///
/// `{name}` captures one non-empty segment and `{name+}` captures the rest
/// of the path. A prefix template matches itself with a trailing slash and
/// anything below it.
pub fn match_path(template: &str, prefix: bool, path: &str) -> Option<HashMap<String, String>> {
    let expected = segments(template);
    let actual = segments(path);
    let mut params = HashMap::new();

    for (index, segment) in expected.iter().enumerate() {
        match segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            Some(name) => {
                if let Some(name) = name.strip_suffix('+') {
                    let rest = actual.get(index..).filter(|rest| !rest.is_empty())?;
                    params.insert(name.to_string(), rest.join("/"));
                    return Some(params);
                }
                let value = actual.get(index).filter(|value| !value.is_empty())?;
                params.insert(name.to_string(), (*value).to_string());
            }
            None if actual.get(index) == Some(segment) => {}
            None => return None,
        }
    }

    let matched = if prefix {
        actual.len() > expected.len() || (actual.len() == expected.len() && path.ends_with('/'))
    } else {
        actual.len() == expected.len()
    };
    matched.then_some(params)
}
