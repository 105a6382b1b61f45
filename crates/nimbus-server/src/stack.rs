//! Wiring of functions, APIs and load balancers into one router.

use std::sync::Arc;

use nimbus_alb::{auth_routes, LoadBalancer, OidcProvider};
use nimbus_apigw::RestApi;
use nimbus_core::http::Method;
use nimbus_runtime::{FunctionFactory, SharedInvoker};

use crate::config::NimbusConfig;
use crate::error::{ServerError, ServerResult};
use crate::router::Router;

/// Host label of the REST APIs.
pub const API_HOST: &str = "api";

/// Host label of the identity provider.
pub const AUTH_HOST: &str = "auth";

/// Deploys every configured function.
///
/// Stops at the first failure; functions deployed before it stay
/// registered so the caller can close the factory.
pub async fn deploy(config: &NimbusConfig, factory: &FunctionFactory) -> ServerResult<Vec<String>> {
    let mut arns = Vec::with_capacity(config.functions.len());
    for function in &config.functions {
        let arn = factory.add(function.descriptor()).await?;
        arns.push(arn);
    }
    Ok(arns)
}

/// Builds the router for every API and load balancer in `config`.
///
/// Function names are resolved to resource names with the runtime
/// settings, so the invoker only ever sees resource names.
pub fn build_router(config: &NimbusConfig, invoker: SharedInvoker) -> ServerResult<Router> {
    let arn = |name: &str| config.runtime.function_arn(name);
    let mut router = Router::new(config.server.domain.clone());

    let mut api_routes = Vec::new();
    for api in &config.apis {
        let mut rest_api = RestApi::new(api.id.clone(), Arc::clone(&invoker));
        for route in &api.routes {
            let method = route
                .method
                .as_deref()
                .map(|method| {
                    Method::from_bytes(method.to_ascii_uppercase().as_bytes()).map_err(|_| {
                        ServerError::config(format!(
                            "invalid method {method:?} on route {} of api {}",
                            route.path, api.id
                        ))
                    })
                })
                .transpose()?;
            let authorizer = route.authorizer.clone().map(|mut authorizer| {
                authorizer.function = arn(&authorizer.function);
                authorizer
            });
            rest_api.route(method, &route.path, arn(&route.function), authorizer);
        }
        api_routes.extend(rest_api.into_routes());
    }
    router.mount(API_HOST, api_routes);

    let provider = Arc::new(OidcProvider::new(config.oidc_settings())?);
    router.mount(AUTH_HOST, auth_routes(&provider));

    for alb in &config.albs {
        let mut balancer =
            LoadBalancer::new(alb.name.clone(), Arc::clone(&invoker), Some(Arc::clone(&provider)));
        for rule in &alb.rules {
            let mut rule = rule.clone();
            rule.function = rule.function.as_deref().map(arn);
            balancer.add_rule(rule)?;
        }
        router.mount(alb.name.clone(), balancer.into_routes());
    }

    tracing::info!(
        domain = %config.server.domain,
        apis = config.apis.len(),
        albs = config.albs.len(),
        "router built"
    );
    Ok(router)
}
