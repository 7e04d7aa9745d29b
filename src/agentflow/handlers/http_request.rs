//! Generic HTTP request connector.
//!
//! The workhorse leaf for straight-line flows: fetch a URL, post a JSON
//! body, call an internal service. Output carries the status code, the
//! response headers, and the body (parsed as JSON when possible).

use crate::agentflow::handler::{
    Handler, HandlerResult, ParamMap, ParameterSpec, ParameterType,
};
use crate::agentflow::http_pool::shared_client;
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

pub struct HttpRequestHandler;

impl HttpRequestHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for HttpRequestHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Handler for HttpRequestHandler {
    async fn execute(&self, params: &ParamMap, _creds: &ParamMap) -> HandlerResult {
        let url = match params.get("url").and_then(|v| v.as_str()) {
            Some(url) => url.to_string(),
            None => return HandlerResult::failure("'url' is required"),
        };
        let method = params
            .get("method")
            .and_then(|v| v.as_str())
            .unwrap_or("GET")
            .to_uppercase();
        let timeout_secs = params
            .get("timeout")
            .and_then(|v| v.as_u64())
            .unwrap_or(30);

        let method = match method.parse::<reqwest::Method>() {
            Ok(method) => method,
            Err(_) => return HandlerResult::failure(format!("invalid HTTP method '{}'", method)),
        };

        let mut request = shared_client()
            .request(method, &url)
            .timeout(Duration::from_secs(timeout_secs));
        if let Some(headers) = params.get("headers").and_then(|v| v.as_object()) {
            for (name, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(name, value);
                }
            }
        }
        if let Some(body) = params.get("body") {
            request = request.json(body);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return HandlerResult::failure(format!("request failed: {}", e)),
        };

        let status_code = response.status().as_u16();
        let headers: serde_json::Map<String, serde_json::Value> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|v| (k.to_string(), serde_json::Value::String(v.to_string())))
            })
            .collect();
        let text = response.text().await.unwrap_or_default();
        let body: serde_json::Value =
            serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text));

        HandlerResult::success(json!({
            "status_code": status_code,
            "headers": headers,
            "body": body,
        }))
    }

    fn parameter_specs(&self) -> Vec<ParameterSpec> {
        vec![
            ParameterSpec::new("url", ParameterType::String)
                .required()
                .with_description("Target URL"),
            ParameterSpec::new("method", ParameterType::String)
                .with_default(json!("GET"))
                .with_description("HTTP method"),
            ParameterSpec::new("headers", ParameterType::Object),
            ParameterSpec::new("body", ParameterType::Any),
            ParameterSpec::new("timeout", ParameterType::Integer).with_default(json!(30)),
        ]
    }
}
