//! Event payloads exchanged with hosted functions.
//!
//! These mirror the JSON shapes the emulated cloud services hand to
//! functions: API gateway proxy events, custom authorizer events and
//! load balancer target group events. Field names follow the wire format,
//! not Rust conventions.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// String-keyed header/parameter map used by every event shape.
pub type StringMap = HashMap<String, String>;

/// Multi-valued variant of [`StringMap`].
pub type MultiStringMap = HashMap<String, Vec<String>>;

// ============================================================================
// API gateway proxy integration
// ============================================================================

/// Request delivered to a function behind an API gateway proxy integration.
///
/// Also used as the payload of request-style custom authorizers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiGatewayProxyRequest {
    /// Route template that matched, e.g. `/pets/{id}`.
    pub resource: String,
    /// Request path with the stage prefix removed.
    pub path: String,
    /// HTTP method.
    pub http_method: String,
    /// First value of every request header.
    #[serde(default)]
    pub headers: StringMap,
    /// Every value of every request header.
    #[serde(default)]
    pub multi_value_headers: MultiStringMap,
    /// Query parameters, multiple values joined by a space.
    #[serde(default)]
    pub query_string_parameters: StringMap,
    /// Every value of every query parameter.
    #[serde(default)]
    pub multi_value_query_string_parameters: MultiStringMap,
    /// Values captured by `{param}` segments of the route template.
    #[serde(default)]
    pub path_parameters: StringMap,
    /// Request context, including authorizer output.
    #[serde(default)]
    pub request_context: ApiGatewayRequestContext,
    /// Request body, base64-encoded when `is_base64_encoded` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Whether `body` is base64.
    #[serde(default)]
    pub is_base64_encoded: bool,
}

/// Context attached to an API gateway proxy request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiGatewayRequestContext {
    /// Identifier of the API.
    #[serde(default)]
    pub api_id: String,
    /// Request identifier.
    #[serde(default)]
    pub request_id: String,
    /// Context forwarded from a custom authorizer decision.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub authorizer: Map<String, Value>,
}

/// Response returned by a function behind an API gateway proxy integration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiGatewayProxyResponse {
    /// HTTP status code; zero is rendered as 200.
    #[serde(default)]
    pub status_code: u16,
    /// Single-valued response headers.
    #[serde(default)]
    pub headers: StringMap,
    /// Multi-valued response headers.
    #[serde(default)]
    pub multi_value_headers: MultiStringMap,
    /// Response body.
    #[serde(default)]
    pub body: String,
    /// Whether `body` is base64.
    #[serde(default)]
    pub is_base64_encoded: bool,
}

// ============================================================================
// Custom authorizers
// ============================================================================

/// Payload of a token-style custom authorizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomAuthorizerTokenRequest {
    /// Always `TOKEN`.
    #[serde(rename = "type")]
    pub kind: String,
    /// The raw credential taken from the identity source.
    pub authorization_token: String,
    /// Resource descriptor of the method being called.
    pub method_arn: String,
}

impl CustomAuthorizerTokenRequest {
    /// Builds a token request for the given raw credential.
    pub fn new(token: impl Into<String>, method_arn: impl Into<String>) -> Self {
        Self {
            kind: "TOKEN".to_string(),
            authorization_token: token.into(),
            method_arn: method_arn.into(),
        }
    }
}

/// Decision returned by a custom authorizer function.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomAuthorizerResponse {
    /// Principal the decision was made for.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub principal_id: String,
    /// The policy to evaluate.
    #[serde(default)]
    pub policy_document: PolicyDocument,
    /// Opaque context forwarded to downstream invocations.
    #[serde(default)]
    pub context: Map<String, Value>,
    /// Usage plan key, carried but unused.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_identifier_key: Option<String>,
}

impl CustomAuthorizerResponse {
    /// Evaluates the policy; see [`PolicyDocument::decision`].
    pub fn decision(&self) -> PolicyEffect {
        self.policy_document.decision()
    }

    /// The context forwarded to downstream functions.
    ///
    /// Includes `principalId` when the authorizer set one.
    pub fn forwarded_context(&self) -> Map<String, Value> {
        let mut context = self.context.clone();
        if !self.principal_id.is_empty() {
            context.insert(
                "principalId".to_string(),
                Value::String(self.principal_id.clone()),
            );
        }
        context
    }
}

/// An IAM-style policy document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDocument {
    /// Policy language version.
    #[serde(rename = "Version", default)]
    pub version: String,
    /// Ordered statements.
    #[serde(rename = "Statement", default)]
    pub statement: Vec<PolicyStatement>,
}

impl PolicyDocument {
    /// Overall effect of the policy.
    ///
    /// Any `Deny` statement wins regardless of position or of accompanying
    /// `Allow` statements. A policy with no deny is an allow.
    pub fn decision(&self) -> PolicyEffect {
        if self
            .statement
            .iter()
            .any(|statement| statement.effect() == PolicyEffect::Deny)
        {
            PolicyEffect::Deny
        } else {
            PolicyEffect::Allow
        }
    }
}

/// A single policy statement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyStatement {
    /// Actions the statement covers.
    #[serde(rename = "Action", default, deserialize_with = "one_or_many")]
    pub action: Vec<String>,
    /// `Allow` or `Deny`, compared case-insensitively.
    #[serde(rename = "Effect", default)]
    pub effect: String,
    /// Resources the statement covers.
    #[serde(rename = "Resource", default, deserialize_with = "one_or_many")]
    pub resource: Vec<String>,
}

impl PolicyStatement {
    /// Builds a statement.
    pub fn new(effect: PolicyEffect, action: &str, resource: &str) -> Self {
        Self {
            action: vec![action.to_string()],
            effect: effect.as_str().to_string(),
            resource: vec![resource.to_string()],
        }
    }

    /// Parsed effect; anything other than `deny` counts as allow.
    pub fn effect(&self) -> PolicyEffect {
        if self.effect.eq_ignore_ascii_case("deny") {
            PolicyEffect::Deny
        } else {
            PolicyEffect::Allow
        }
    }
}

/// Outcome of policy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyEffect {
    /// Request may proceed.
    Allow,
    /// Request is rejected.
    Deny,
}

impl PolicyEffect {
    /// Wire spelling of the effect.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "Allow",
            Self::Deny => "Deny",
        }
    }

    /// Returns `true` for [`PolicyEffect::Allow`].
    pub const fn is_allow(self) -> bool {
        matches!(self, Self::Allow)
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        Some(OneOrMany::One(value)) => vec![value],
        Some(OneOrMany::Many(values)) => values,
        None => Vec::new(),
    })
}

// ============================================================================
// Load balancer target groups
// ============================================================================

/// Request delivered to a function registered as a load balancer target.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlbTargetGroupRequest {
    /// HTTP method.
    pub http_method: String,
    /// Request path.
    pub path: String,
    /// Query parameters, multiple values joined by a space.
    #[serde(default)]
    pub query_string_parameters: StringMap,
    /// First value of every request header.
    #[serde(default)]
    pub headers: StringMap,
    /// Every value of every request header.
    #[serde(default)]
    pub multi_value_headers: MultiStringMap,
    /// Target group context.
    #[serde(default)]
    pub request_context: AlbRequestContext,
    /// Whether `body` is base64.
    #[serde(default)]
    pub is_base64_encoded: bool,
    /// Request body.
    #[serde(default)]
    pub body: String,
}

/// Context attached to a load balancer target request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlbRequestContext {
    /// Load balancer details.
    pub elb: AlbContextElb,
}

/// Load balancer identity within [`AlbRequestContext`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlbContextElb {
    /// Target group the request was routed through.
    pub target_group_arn: String,
}

/// Response returned by a load balancer target function.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlbTargetGroupResponse {
    /// HTTP status code; zero is rendered as 200.
    #[serde(default)]
    pub status_code: u16,
    /// Reason phrase, unused by the emulator.
    #[serde(default)]
    pub status_description: String,
    /// Single-valued response headers.
    #[serde(default)]
    pub headers: StringMap,
    /// Multi-valued response headers.
    #[serde(default)]
    pub multi_value_headers: MultiStringMap,
    /// Response body.
    #[serde(default)]
    pub body: String,
    /// Whether `body` is base64.
    #[serde(default)]
    pub is_base64_encoded: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn policy(effects: &[PolicyEffect]) -> PolicyDocument {
        PolicyDocument {
            version: "2012-10-17".to_string(),
            statement: effects
                .iter()
                .map(|effect| PolicyStatement::new(*effect, "*", "my-resource"))
                .collect(),
        }
    }

    #[test]
    fn test_deny_wins_regardless_of_order() {
        use PolicyEffect::{Allow, Deny};

        assert_eq!(policy(&[Allow]).decision(), Allow);
        assert_eq!(policy(&[Deny]).decision(), Deny);
        assert_eq!(policy(&[Allow, Deny]).decision(), Deny);
        assert_eq!(policy(&[Deny, Allow]).decision(), Deny);
        assert_eq!(policy(&[Allow, Allow, Deny, Allow]).decision(), Deny);
    }

    #[test]
    fn test_empty_policy_allows() {
        assert_eq!(PolicyDocument::default().decision(), PolicyEffect::Allow);
    }

    #[test]
    fn test_effect_is_case_insensitive() {
        let statement = PolicyStatement {
            effect: "DENY".to_string(),
            ..PolicyStatement::default()
        };
        assert_eq!(statement.effect(), PolicyEffect::Deny);
    }

    #[test]
    fn test_authorizer_response_accepts_string_or_list() {
        let response: CustomAuthorizerResponse = serde_json::from_value(json!({
            "principalId": "user-1",
            "policyDocument": {
                "Version": "2012-10-17",
                "Statement": [
                    {"Action": "execute-api:Invoke", "Effect": "Allow", "Resource": ["a", "b"]}
                ]
            },
            "context": {"tenant": "acme"}
        }))
        .unwrap();

        let statement = &response.policy_document.statement[0];
        assert_eq!(statement.action, vec!["execute-api:Invoke"]);
        assert_eq!(statement.resource, vec!["a", "b"]);
        assert_eq!(response.decision(), PolicyEffect::Allow);

        let forwarded = response.forwarded_context();
        assert_eq!(forwarded["tenant"], "acme");
        assert_eq!(forwarded["principalId"], "user-1");
    }

    #[test]
    fn test_token_request_wire_shape() {
        let request = CustomAuthorizerTokenRequest::new("secret", "arn:placeholder");
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({"type": "TOKEN", "authorizationToken": "secret", "methodArn": "arn:placeholder"})
        );
    }

    #[test]
    fn test_proxy_response_defaults() {
        let response: ApiGatewayProxyResponse =
            serde_json::from_value(json!({"body": "hi"})).unwrap();
        assert_eq!(response.status_code, 0);
        assert_eq!(response.body, "hi");
        assert!(!response.is_base64_encoded);
    }
}
