//! Slack message connector.

use crate::agentflow::handler::{
    Handler, HandlerResult, ParamMap, ParameterSpec, ParameterType,
};
use crate::agentflow::http_pool::shared_client;
use async_trait::async_trait;
use serde_json::json;

pub struct SlackPostMessageHandler;

impl SlackPostMessageHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SlackPostMessageHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Handler for SlackPostMessageHandler {
    async fn execute(&self, params: &ParamMap, creds: &ParamMap) -> HandlerResult {
        let channel = match params.get("channel").and_then(|v| v.as_str()) {
            Some(channel) => channel,
            None => return HandlerResult::failure("'channel' is required"),
        };
        let text = match params.get("text").and_then(|v| v.as_str()) {
            Some(text) => text,
            None => return HandlerResult::failure("'text' is required"),
        };
        let bot_token = match creds.get("bot_token").and_then(|v| v.as_str()) {
            Some(token) => token,
            None => return HandlerResult::failure("missing 'bot_token' credential"),
        };

        let response = match shared_client()
            .post("https://slack.com/api/chat.postMessage")
            .bearer_auth(bot_token)
            .json(&json!({ "channel": channel, "text": text }))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return HandlerResult::failure(format!("slack request failed: {}", e)),
        };
        let body: serde_json::Value = response.json().await.unwrap_or(json!({}));
        if body["ok"] != json!(true) {
            let error = body["error"].as_str().unwrap_or("unknown error");
            return HandlerResult::failure(format!("slack API error: {}", error));
        }

        HandlerResult::success(json!({
            "channel": channel,
            "ts": body["ts"],
        }))
    }

    fn parameter_specs(&self) -> Vec<ParameterSpec> {
        vec![
            ParameterSpec::new("channel", ParameterType::String)
                .required()
                .with_description("Channel id or name"),
            ParameterSpec::new("text", ParameterType::String)
                .required()
                .with_description("Message text"),
        ]
    }
}
