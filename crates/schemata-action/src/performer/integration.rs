//! HTTP integration performer.
//!
//! Exposes an external API from the `[[integrations]]` configuration as a
//! performer. Outcomes target it by the integration name and pick an
//! operation through their method, e.g. `type = "shipping"`,
//! `method = "create_label"`.
//!
//! Fields named by `{placeholders}` in the operation path fill the path.
//! The remaining fields become query parameters for GET and DELETE and a
//! JSON body otherwise. The decoded JSON reply is the outcome's result.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use schemata_core::config::{ApiKeyLocation, IntegrationAuth, IntegrationConfig, IntegrationOperation};
use schemata_core::types::{ActionResponse, Outcome};

use crate::error::ActionError;
use crate::performer::{ActionPerformer, PerformerOutput};
use crate::store::display_value;

/// Performer backed by one configured integration.
pub struct IntegrationPerformer {
    config: IntegrationConfig,
    client: Client,
}

impl IntegrationPerformer {
    /// Build the performer and its HTTP client.
    pub fn new(config: IntegrationConfig) -> Result<Self, ActionError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ActionError::PerformerFailed {
                performer: config.name.clone(),
                message: format!("failed to create HTTP client: {}", e),
            })?;
        Ok(Self { config, client })
    }

    fn failed(&self, message: impl Into<String>) -> ActionError {
        ActionError::PerformerFailed {
            performer: self.config.name.clone(),
            message: message.into(),
        }
    }

    fn operation(&self, name: &str) -> Result<&IntegrationOperation, ActionError> {
        self.config
            .operations
            .get(name)
            .ok_or_else(|| self.failed(format!("no such operation: {}", name)))
    }

    fn request(
        &self,
        operation: &IntegrationOperation,
        fields: &Map<String, Value>,
    ) -> Result<RequestBuilder, ActionError> {
        let method = reqwest::Method::from_bytes(operation.method.to_uppercase().as_bytes())
            .map_err(|_| self.failed(format!("invalid HTTP method: {}", operation.method)))?;

        let (path, used) = fill_path(&operation.path, fields).map_err(|name| {
            self.failed(format!("missing value for path parameter {}", name))
        })?;
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);

        let rest: Map<String, Value> = fields
            .iter()
            .filter(|(key, value)| !used.contains(key) && !value.is_null())
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let mut query: Vec<(String, String)> = Vec::new();
        let sends_body = !matches!(method, reqwest::Method::GET | reqwest::Method::DELETE);
        if !sends_body {
            query.extend(rest.iter().map(|(k, v)| (k.clone(), display_value(v))));
        }

        let mut request = self.client.request(method, url);
        for (name, value) in &operation.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        request = match &self.config.auth {
            IntegrationAuth::None => request,
            IntegrationAuth::Bearer { token } => request.bearer_auth(token),
            IntegrationAuth::Basic { username, password } => {
                request.basic_auth(username, Some(password))
            }
            IntegrationAuth::ApiKey {
                name,
                value,
                location,
            } => match location {
                ApiKeyLocation::Header => request.header(name.as_str(), value.as_str()),
                ApiKeyLocation::Cookie => request.header("Cookie", format!("{}={}", name, value)),
                ApiKeyLocation::Query => {
                    query.push((name.clone(), value.clone()));
                    request
                }
            },
        };

        if !query.is_empty() {
            request = request.query(&query);
        }
        if sends_body {
            request = request.json(&Value::Object(rest));
        }
        Ok(request)
    }
}

#[async_trait]
impl ActionPerformer for IntegrationPerformer {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn perform(
        &self,
        outcome: &Outcome,
        fields: &Map<String, Value>,
    ) -> Result<PerformerOutput, ActionError> {
        let operation_name = outcome.method.as_str();
        let operation = self.operation(operation_name)?;
        let request = self.request(operation, fields)?;

        debug!(
            integration = %self.config.name,
            operation = operation_name,
            method = %operation.method,
            path = %operation.path,
            "Calling integration"
        );

        let response = request
            .send()
            .await
            .map_err(|e| self.failed(format!("{} request failed: {}", operation_name, e)))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| self.failed(format!("failed to read {} reply: {}", operation_name, e)))?;

        if !status.is_success() {
            warn!(
                integration = %self.config.name,
                operation = operation_name,
                status = status.as_u16(),
                "Integration call returned an error status"
            );
            return Err(self.failed(format!("{} returned {}: {}", operation_name, status, text)));
        }

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).map_err(|e| {
                self.failed(format!("{} reply is not JSON: {}", operation_name, e))
            })?
        };

        let prefix = format!("{}.{}", self.config.name, operation_name);
        let responses = vec![
            ActionResponse::new(format!("{}.response", prefix), body.clone()),
            ActionResponse::new(format!("{}.statusCode", prefix), json!(status.as_u16())),
        ];

        Ok(PerformerOutput {
            result: (!body.is_null()).then_some(body),
            responses,
        })
    }
}

/// Substitute `{name}` segments from `fields`. Returns the filled path and
/// the consumed field names, or the first name without a value.
fn fill_path(template: &str, fields: &Map<String, Value>) -> Result<(String, Vec<String>), String> {
    let mut path = String::with_capacity(template.len());
    let mut used = Vec::new();
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        let Some(len) = rest[start..].find('}') else {
            break;
        };
        let name = &rest[start + 1..start + len];
        let value = match fields.get(name) {
            None | Some(Value::Null) => return Err(name.to_string()),
            Some(value) => display_value(value),
        };
        path.push_str(&rest[..start]);
        path.push_str(&value);
        used.push(name.to_string());
        rest = &rest[start + len + 1..];
    }
    path.push_str(rest);
    Ok((path, used))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use schemata_core::types::Method;
    use std::collections::HashMap;

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    fn shipping(base_url: String, auth: IntegrationAuth) -> IntegrationPerformer {
        let mut operations = HashMap::new();
        operations.insert(
            "create_label".to_string(),
            IntegrationOperation {
                method: "POST".to_string(),
                path: "/labels/{order_id}".to_string(),
                headers: HashMap::from([("X-Source".to_string(), "schemata".to_string())]),
            },
        );
        operations.insert(
            "track".to_string(),
            IntegrationOperation {
                method: "GET".to_string(),
                path: "/tracking/{code}".to_string(),
                headers: HashMap::new(),
            },
        );
        IntegrationPerformer::new(IntegrationConfig {
            name: "shipping".to_string(),
            base_url,
            auth,
            timeout_ms: 5_000,
            operations,
        })
        .unwrap()
    }

    fn outcome(operation: &str) -> Outcome {
        Outcome::new("shipping", Method::from(operation), json!({}))
    }

    // ---- path templates ----

    #[test]
    fn test_fill_path() {
        let f = fields(json!({"order_id": "abc", "n": 2}));
        let (path, used) = fill_path("/orders/{order_id}/items/{n}", &f).unwrap();
        assert_eq!(path, "/orders/abc/items/2");
        assert_eq!(used, vec!["order_id".to_string(), "n".to_string()]);

        assert_eq!(fill_path("/labels/{missing}", &f).unwrap_err(), "missing");
        assert_eq!(fill_path("/plain", &f).unwrap().0, "/plain");
    }

    // ---- calls ----

    #[tokio::test]
    async fn test_post_sends_json_body_and_bearer_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/labels/abc")
            .match_header("authorization", "Bearer t0ken")
            .match_header("x-source", "schemata")
            .match_body(Matcher::Json(json!({"carrier": "ups", "weight": 2})))
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(r#"{"label_id": "L-1", "url": "https://labels/L-1.pdf"}"#)
            .create_async()
            .await;

        let performer = shipping(
            server.url(),
            IntegrationAuth::Bearer {
                token: "t0ken".to_string(),
            },
        );
        let output = performer
            .perform(
                &outcome("create_label"),
                &fields(json!({"order_id": "abc", "carrier": "ups", "weight": 2})),
            )
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(
            output.result,
            Some(json!({"label_id": "L-1", "url": "https://labels/L-1.pdf"}))
        );
        assert_eq!(output.responses.len(), 2);
        assert_eq!(output.responses[0].response_type, "shipping.create_label.response");
        assert_eq!(output.responses[1].response_type, "shipping.create_label.statusCode");
        assert_eq!(output.responses[1].attributes, json!(201));
    }

    #[tokio::test]
    async fn test_get_sends_query_and_api_key() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/tracking/Z9")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("verbose".into(), "true".into()),
                Matcher::UrlEncoded("key".into(), "secret".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"status": "in_transit"}"#)
            .create_async()
            .await;

        let performer = shipping(
            server.url(),
            IntegrationAuth::ApiKey {
                name: "key".to_string(),
                value: "secret".to_string(),
                location: ApiKeyLocation::Query,
            },
        );
        let output = performer
            .perform(&outcome("track"), &fields(json!({"code": "Z9", "verbose": true})))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(output.result, Some(json!({"status": "in_transit"})));
    }

    #[tokio::test]
    async fn test_basic_auth_header() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/tracking/Z9")
            .match_header("authorization", "Basic dXNlcjpwYXNz")
            .with_status(204)
            .create_async()
            .await;

        let performer = shipping(
            server.url(),
            IntegrationAuth::Basic {
                username: "user".to_string(),
                password: "pass".to_string(),
            },
        );
        let output = performer
            .perform(&outcome("track"), &fields(json!({"code": "Z9"})))
            .await
            .unwrap();

        mock.assert_async().await;
        assert!(output.result.is_none());
        assert_eq!(output.responses[1].attributes, json!(204));
    }

    #[tokio::test]
    async fn test_error_status_fails() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/labels/abc")
            .with_status(422)
            .with_body(r#"{"error": "weight required"}"#)
            .create_async()
            .await;

        let performer = shipping(server.url(), IntegrationAuth::None);
        let err = performer
            .perform(&outcome("create_label"), &fields(json!({"order_id": "abc"})))
            .await
            .unwrap_err();
        match err {
            ActionError::PerformerFailed { performer, message } => {
                assert_eq!(performer, "shipping");
                assert!(message.contains("422"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_non_json_reply_fails() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/tracking/Z9")
            .with_status(200)
            .with_body("<html>oops</html>")
            .create_async()
            .await;

        let performer = shipping(server.url(), IntegrationAuth::None);
        let err = performer
            .perform(&outcome("track"), &fields(json!({"code": "Z9"})))
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::PerformerFailed { .. }));
    }

    #[tokio::test]
    async fn test_unknown_operation_and_missing_path_value() {
        let performer = shipping("http://127.0.0.1:9".to_string(), IntegrationAuth::None);

        let err = performer
            .perform(&outcome("refund"), &Map::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no such operation: refund"));

        let err = performer
            .perform(&outcome("create_label"), &Map::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("order_id"));
    }
}
